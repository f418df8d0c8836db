use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router as HttpRouter,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_shared::{ChatMessage, Recipient, UserId};

use crate::config::ServerConfig;
use crate::delivery::Hub;
use crate::error::{RouteError, ServerError};
use crate::file_store::FileStore;
use crate::router::Router;
use crate::ws::{ws_handler, JoinedSessions};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub hub: Arc<Hub>,
    pub sessions: Arc<JoinedSessions>,
    pub files: Arc<FileStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> HttpRouter {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = state.files.max_size() + 64 * 1024;

    HttpRouter::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/online-users", get(online_users))
        .route("/api/chat-history", get(chat_history))
        .route("/api/clear-chat-history", delete(clear_chat_history))
        .route("/api/files/upload", post(file_upload))
        .route("/api/files/download/{name}", get(file_download))
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
struct ClearResponse {
    cleared: bool,
}

/// The two sides of a conversation, as the browser client names them.
#[derive(Deserialize)]
struct ParticipantsQuery {
    user1: String,
    user2: String,
}

impl ParticipantsQuery {
    fn parse(&self) -> Result<(Recipient, Recipient), ServerError> {
        Ok((parse_participant(&self.user1)?, parse_participant(&self.user2)?))
    }
}

/// A conversation participant: a user, or `"everyone"` for broadcast history.
fn parse_participant(raw: &str) -> Result<Recipient, ServerError> {
    if raw.is_empty() {
        return Err(ServerError::BadRequest("Participant name is empty".into()));
    }
    Recipient::parse(Some(raw))
        .map_err(|e| ServerError::BadRequest(format!("Invalid participant '{raw}': {e}")))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn online_users(State(state): State<AppState>) -> Json<Vec<UserId>> {
    Json(state.router.online_users())
}

async fn chat_history(
    State(state): State<AppState>,
    Query(query): Query<ParticipantsQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let (a, b) = query.parse()?;
    Ok(Json(state.router.history(&a, &b)))
}

async fn clear_chat_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<ParticipantsQuery>,
) -> Result<Json<ClearResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let (a, b) = query.parse()?;
    state.router.clear_history(&a, &b);
    Ok(Json(ClearResponse { cleared: true }))
}

/// Clearing history is an administrative action once `ADMIN_TOKEN` is set.
fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Ok(());
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Store an upload and hand back the message that announces it.
///
/// The message is not routed here; the client sends it over the WebSocket
/// like any other chat message.
async fn file_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChatMessage>, ServerError> {
    let mut file = None;
    let mut sender = None;
    let mut receiver = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                file = Some((file_name, content_type, data));
            }
            "sender" | "receiver" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                if name == "sender" {
                    sender = Some(value);
                } else {
                    receiver = Some(value);
                }
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, data)) = file else {
        return Err(ServerError::BadRequest(
            "Missing 'file' field in multipart form".to_string(),
        ));
    };

    let sender = UserId::parse(sender.as_deref().unwrap_or(""))
        .map_err(RouteError::InvalidSender)?;
    let recipient =
        Recipient::parse(receiver.as_deref()).map_err(RouteError::InvalidReceiver)?;

    let stored = state.files.store(&file_name, &content_type, &data).await?;

    info!(
        sender = %sender,
        name = %stored.name,
        size = stored.size,
        "File uploaded via API"
    );

    let receiver = match &recipient {
        Recipient::Everyone => None,
        Recipient::User(id) => Some(id.as_str()),
    };
    Ok(Json(ChatMessage::attachment(
        sender.as_str(),
        receiver,
        stored.reference,
        file_name,
        content_type,
        stored.size,
    )))
}

async fn file_download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let (data, meta) = state.files.load(&name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, meta.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"",
                    meta.original_name.replace(['"', '\\'], "_")
                ),
            ),
        ],
        data,
    )
        .into_response())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
