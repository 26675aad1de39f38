use thiserror::Error;

#[derive(Error, Debug)]
pub enum HuddleError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Authentication failed: invalid ciphertext, nonce or key")]
    AuthenticationFailed,

    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Peer public key is a low-order point")]
    NonContributory,

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} bytes")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid characters")]
    InvalidCharacters { field: &'static str },

    #[error("Message has neither content nor attachments")]
    EmptyMessage,

    #[error("Attachment size {size} is out of range")]
    AttachmentSize { size: u64 },
}
