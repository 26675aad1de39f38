//! End-to-end encryption envelope.
//!
//! Pure functions only: no network or storage I/O. Clients exchange X25519
//! public keys through the server, derive a shared symmetric key locally and
//! seal message bodies and attachments with XChaCha20-Poly1305. The server only
//! ever stores and forwards the resulting ciphertext and nonce.
//!
//! Private keys can be backed up under a passphrase: Argon2id stretches the
//! passphrase with a random salt into a wrapping key, which then seals the
//! private key.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::{digest::consts::U32, Blake2b, Digest};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{
    ARGON2_ITERATIONS, ARGON2_LANES, ARGON2_MEMORY_KIB, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; KEY_SIZE];
pub type PublicKeyBytes = [u8; KEY_SIZE];
pub type PrivateKeyBytes = [u8; KEY_SIZE];

/// Unkeyed BLAKE2b with a 32-byte digest (libsodium `crypto_generichash`).
type Blake2b256 = Blake2b<U32>;

/// An X25519 keypair. The secret half is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_private_bytes(private_key: PrivateKeyBytes) -> Self {
        let secret = StaticSecret::from(private_key);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.public.to_bytes()
    }

    pub fn private_key(&self) -> PrivateKeyBytes {
        self.secret.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &encode_b64(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// Scalar multiplication of `private_key` against the X25519 base point.
pub fn derive_public_key(private_key: &PrivateKeyBytes) -> PublicKeyBytes {
    PublicKey::from(&StaticSecret::from(*private_key)).to_bytes()
}

/// X25519 agreement hashed with unkeyed BLAKE2b-256 into a symmetric key.
///
/// `derive_shared_key(a.priv, b.pub) == derive_shared_key(b.priv, a.pub)`.
/// Low-order peer keys, which would force an all-zero secret, are rejected.
pub fn derive_shared_key(
    private_key: &PrivateKeyBytes,
    peer_public_key: &PublicKeyBytes,
) -> Result<SymmetricKey, CryptoError> {
    let secret = StaticSecret::from(*private_key);
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public_key));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }
    let digest = Blake2b256::digest(shared.as_bytes());
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    Ok(key)
}

/// Ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(Sealed { ciphertext, nonce })
}

/// Open a sealed payload. Fails as a whole with `AuthenticationFailed` if the
/// key, nonce or ciphertext do not verify.
pub fn decrypt(key: &SymmetricKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypt UTF-8 text, returning base64 `(ciphertext, nonce)` as sent on the wire.
pub fn encrypt_text(key: &SymmetricKey, plaintext: &str) -> Result<(String, String), CryptoError> {
    let sealed = encrypt(key, plaintext.as_bytes())?;
    Ok((encode_b64(&sealed.ciphertext), encode_b64(&sealed.nonce)))
}

pub fn decrypt_text(
    key: &SymmetricKey,
    ciphertext_b64: &str,
    nonce_b64: &str,
) -> Result<String, CryptoError> {
    let ciphertext = decode_b64(ciphertext_b64)?;
    let nonce = decode_b64(nonce_b64)?;
    let plaintext = decrypt(key, &ciphertext, &nonce)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

// ---------------------------------------------------------------------------
// Passphrase-protected key backup
// ---------------------------------------------------------------------------

/// A private key wrapped under a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBackup {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub encrypted_key: Vec<u8>,
}

/// Wire / storage form of [`KeyBackup`]: every field base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBackupRecord {
    pub salt: String,
    pub nonce: String,
    pub encrypted_key: String,
}

impl KeyBackup {
    pub fn to_record(&self) -> KeyBackupRecord {
        KeyBackupRecord {
            salt: encode_b64(&self.salt),
            nonce: encode_b64(&self.nonce),
            encrypted_key: encode_b64(&self.encrypted_key),
        }
    }

    pub fn from_record(record: &KeyBackupRecord) -> Result<Self, CryptoError> {
        Ok(Self {
            salt: decode_fixed(&record.salt)?,
            nonce: decode_fixed(&record.nonce)?,
            encrypted_key: decode_b64(&record.encrypted_key)?,
        })
    }
}

fn derive_wrapping_key(passphrase: &str, salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_LANES,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

pub fn backup_encrypt(
    private_key: &PrivateKeyBytes,
    passphrase: &str,
) -> Result<KeyBackup, CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let wrapping_key = derive_wrapping_key(passphrase, &salt)?;
    let sealed = encrypt(&wrapping_key, private_key)?;

    Ok(KeyBackup {
        salt,
        nonce: sealed.nonce,
        encrypted_key: sealed.ciphertext,
    })
}

pub fn backup_decrypt(backup: &KeyBackup, passphrase: &str) -> Result<PrivateKeyBytes, CryptoError> {
    let wrapping_key = derive_wrapping_key(passphrase, &backup.salt)?;
    let plaintext = decrypt(&wrapping_key, &backup.encrypted_key, &backup.nonce)
        .map_err(|_| CryptoError::WrongPassphrase)?;

    plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        })
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_b64(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Decode a base64 string that must hold exactly `N` bytes (keys, salts, nonces).
pub fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode_b64(encoded)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: N,
            actual: bytes.len(),
        })
}
