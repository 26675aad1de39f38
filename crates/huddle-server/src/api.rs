use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_shared::constants::{KEY_SIZE, PROTOCOL_VERSION};
use huddle_shared::crypto::{decode_fixed, KeyBackup, KeyBackupRecord};
use huddle_shared::protocol::{Attachment, ChatMessage};
use huddle_shared::types::{ChatId, UserId};
use huddle_store::ChatStore;

use crate::blob_store::{upload_key, ObjectStore};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway;
use crate::hub::Hub;

/// Files accepted in one upload request.
const MAX_FILES_PER_UPLOAD: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub store: Arc<dyn ChatStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state
        .config
        .max_upload_size
        .saturating_mul(MAX_FILES_PER_UPLOAD);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/chats/:chat_id/messages", get(chat_messages))
        .route(
            "/api/users/:user_id/publicKey",
            get(get_public_key).post(set_public_key),
        )
        .route(
            "/api/users/:user_id/backup",
            get(get_key_backup).post(set_key_backup),
        )
        .route("/api/uploads", axum::routing::post(upload))
        .route("/api/uploads/:key", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyBody {
    public_key: String,
}

#[derive(Serialize)]
struct UploadResponse {
    attachments: Vec<Attachment>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

/// Message history of a chat, oldest first.
async fn chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let chat_id = ChatId::parse(chat_id)?;
    let messages = state
        .hub
        .lifecycle()
        .call(state.store.messages_for_chat(&chat_id))
        .await?;
    Ok(Json(messages.into_iter().map(ChatMessage::from).collect()))
}

async fn get_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PublicKeyBody>, ServerError> {
    let user_id = UserId::parse(user_id)?;
    let public_key = state
        .hub
        .lifecycle()
        .call(state.store.get_public_key(&user_id))
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("No public key for {user_id}")))?;
    Ok(Json(PublicKeyBody { public_key }))
}

async fn set_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<PublicKeyBody>,
) -> Result<Json<PublicKeyBody>, ServerError> {
    let user_id = UserId::parse(user_id)?;
    decode_fixed::<KEY_SIZE>(&body.public_key)?;

    state
        .hub
        .lifecycle()
        .call(state.store.set_public_key(&user_id, &body.public_key))
        .await?;

    info!(user_id = %user_id, "Public key published");
    Ok(Json(body))
}

async fn get_key_backup(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KeyBackupRecord>, ServerError> {
    let user_id = UserId::parse(user_id)?;
    let backup = state
        .hub
        .lifecycle()
        .call(state.store.get_key_backup(&user_id))
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("No key backup for {user_id}")))?;
    Ok(Json(backup))
}

/// Store a passphrase-wrapped private key. The server only checks the shape;
/// it cannot unwrap it.
async fn set_key_backup(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(record): Json<KeyBackupRecord>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user_id = UserId::parse(user_id)?;
    KeyBackup::from_record(&record)?;

    state
        .hub
        .lifecycle()
        .call(state.store.set_key_backup(&user_id, &record))
        .await?;

    info!(user_id = %user_id, "Key backup stored");
    Ok(Json(serde_json::json!({ "stored": true })))
}

/// Multipart upload: repeated `files` parts with a parallel list of `nonces`
/// (empty for unencrypted files).
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut files: Vec<(String, String, Bytes)> = Vec::new();
    let mut nonces: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                if files.len() == MAX_FILES_PER_UPLOAD {
                    return Err(ServerError::BadRequest(format!(
                        "At most {MAX_FILES_PER_UPLOAD} files per upload"
                    )));
                }
                let filename = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                files.push((filename, content_type, data));
            }
            "nonces" => {
                let nonce = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                nonces.push(nonce);
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ServerError::BadRequest(
            "Missing 'files' field in multipart form".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut attachments = Vec::with_capacity(files.len());

    for (i, (filename, content_type, data)) in files.into_iter().enumerate() {
        // Offset keeps keys distinct when one request repeats a filename.
        let key = upload_key(&filename, now + i as i64);
        let size = data.len() as u64;

        let url = tokio::time::timeout(
            state.config.store_timeout,
            state.objects.put(data, &key, &content_type),
        )
        .await
        .map_err(|_| ServerError::ObjectStorage(format!("Upload of {key} timed out")))??;

        info!(key = %key, size, "Attachment uploaded");

        attachments.push(Attachment {
            key,
            url,
            filename,
            content_type,
            size,
            nonce: nonces.get(i).filter(|n| !n.is_empty()).cloned(),
        });
    }

    Ok(Json(UploadResponse { attachments }))
}

async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, content_type) =
        tokio::time::timeout(state.config.store_timeout, state.objects.get(&key))
            .await
            .map_err(|_| ServerError::ObjectStorage(format!("Download of {key} timed out")))??;

    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use huddle_shared::crypto::{encode_b64, generate_key_pair};
    use huddle_store::{CreateMessage, MemoryStore};

    use crate::blob_store::FsObjectStore;

    async fn test_state() -> (AppState, Arc<MemoryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = ServerConfig {
            blob_storage_path: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let objects = FsObjectStore::new(
            config.blob_storage_path.clone(),
            config.max_upload_size,
            "https://files.example.org",
        )
        .await
        .unwrap();

        let state = AppState {
            hub: Hub::new(store.clone(), Duration::from_secs(5)),
            store: store.clone(),
            objects: Arc::new(objects),
            config: Arc::new(config),
        };
        (state, store, dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn add_user(store: &MemoryStore, id: &str) -> UserId {
        let id = UserId::parse(id).unwrap();
        store.upsert_user(&id, "Alice").await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _, _dir) = test_state().await;
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_public_key_publish_and_fetch() {
        let (state, store, _dir) = test_state().await;
        add_user(&store, "alice").await;
        let app = build_router(state);
        let public_key = encode_b64(&generate_key_pair().public_key());

        let response = app
            .clone()
            .oneshot(Request::get("/api/users/alice/publicKey").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_post(
                "/api/users/alice/publicKey",
                serde_json::json!({ "publicKey": public_key }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/api/users/alice/publicKey").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["publicKey"], public_key);

        // Not a 32-byte key.
        let response = app
            .clone()
            .oneshot(json_post(
                "/api/users/alice/publicKey",
                serde_json::json!({ "publicKey": encode_b64(b"short") }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(json_post(
                "/api/users/nobody/publicKey",
                serde_json::json!({ "publicKey": public_key }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_key_backup_round_trip() {
        let (state, store, _dir) = test_state().await;
        add_user(&store, "alice").await;
        let app = build_router(state);

        let record = serde_json::json!({
            "salt": encode_b64(&[1u8; 16]),
            "nonce": encode_b64(&[2u8; 24]),
            "encryptedKey": encode_b64(&[3u8; 48]),
        });

        let response = app
            .clone()
            .oneshot(Request::get("/api/users/alice/backup").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_post("/api/users/alice/backup", record.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/api/users/alice/backup").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await, record);

        let response = app
            .oneshot(json_post(
                "/api/users/alice/backup",
                serde_json::json!({ "salt": "AA==", "nonce": "AA==", "encryptedKey": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_history_in_order() {
        let (state, store, _dir) = test_state().await;
        let alice = add_user(&store, "alice").await;
        let chat = ChatId::parse("r1").unwrap();
        let t0 = chrono::Utc::now();

        for (content, offset) in [("second", 5), ("first", 0)] {
            store
                .create_message(CreateMessage {
                    chat_id: chat.clone(),
                    sender_id: alice.clone(),
                    content: content.into(),
                    nonce: None,
                    attachments: vec![],
                    created_at: t0 + chrono::Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        let response = build_router(state)
            .oneshot(Request::get("/api/chats/r1/messages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        let contents: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(body[0]["sender"]["id"], "alice");
    }

    #[tokio::test]
    async fn test_invalid_chat_id_rejected() {
        let (state, _, _dir) = test_state().await;
        let response = build_router(state)
            .oneshot(Request::get("/api/chats/bad%20id/messages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (state, _, _dir) = test_state().await;
        let app = build_router(state);

        let body = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"my notes.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "ciphertext\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"nonces\"\r\n\r\n",
            "bm9uY2U=\r\n",
            "--XBOUNDARY--\r\n",
        );
        let request = Request::post("/api/uploads")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let attachment = &body["attachments"][0];
        let key = attachment["key"].as_str().unwrap().to_string();

        assert!(key.ends_with("-my_notes.txt"));
        assert_eq!(
            attachment["url"],
            format!("https://files.example.org/api/uploads/{key}")
        );
        assert_eq!(attachment["filename"], "my notes.txt");
        assert_eq!(attachment["contentType"], "text/plain");
        assert_eq!(attachment["size"], 10);
        assert_eq!(attachment["nonce"], "bm9uY2U=");

        let response = app
            .oneshot(
                Request::get(format!("/api/uploads/{key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ciphertext");
    }

    #[tokio::test]
    async fn test_upload_without_files_rejected() {
        let (state, _, _dir) = test_state().await;
        let body = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"nonces\"\r\n\r\n",
            "\r\n",
            "--XBOUNDARY--\r\n",
        );
        let request = Request::post("/api/uploads")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
