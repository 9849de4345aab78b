use crate::status::{snapshot, StatusHandle};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
struct ServerState {
    token: String,
    status: StatusHandle,
}

pub async fn start(
    addr: SocketAddr,
    token: String,
    status: StatusHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState { token, status });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(session_status))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn session_status(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    (StatusCode::OK, axum::Json(snapshot(&state.status))).into_response()
}

fn is_token_valid(headers: &HeaderMap, query: &HashMap<String, String>, token: &str) -> bool {
    // Authorization header first, "Bearer <token>"
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(provided_token) = auth_str.strip_prefix("Bearer ") {
                return provided_token == token;
            }
        }
    }

    query.get("token").map(|t| t == token).unwrap_or(false)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}
