use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, post},
};
use std::sync::Arc;
use std::time::Duration;

use super::memory::MemoryKeeper;
use super::protocol::{
    ENDPOINT_HEARTBEAT, ENDPOINT_REQUEST, ENDPOINT_SESSION, KeeperRequest, KeeperRequestEnvelope,
    KeeperResponse, SessionAck, SessionResponse,
};
use super::types::KeeperError;

/// What the HTTP handlers share: the tree and the session policy.
pub struct KeeperServerState {
    pub keeper: MemoryKeeper,
    pub session_timeout: Duration,
}

impl KeeperServerState {
    pub fn new(keeper: MemoryKeeper, session_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            keeper,
            session_timeout,
        })
    }
}

/// Routes for serving a keeper over HTTP.
pub fn router(state: Arc<KeeperServerState>) -> Router {
    Router::new()
        .route(ENDPOINT_SESSION, post(handle_open_session))
        .route(
            &format!("{}/:id{}", ENDPOINT_SESSION, ENDPOINT_HEARTBEAT),
            post(handle_heartbeat),
        )
        .route(
            &format!("{}/:id", ENDPOINT_SESSION),
            delete(handle_close_session),
        )
        .route(ENDPOINT_REQUEST, post(handle_request))
        .layer(Extension(state))
}

pub async fn handle_open_session(
    Extension(state): Extension<Arc<KeeperServerState>>,
) -> (StatusCode, Json<SessionResponse>) {
    let session_id = state.keeper.open_session(true);
    let timeout_ms = state.session_timeout.as_millis() as u64;
    tracing::info!("Opened remote session {}", session_id);

    (
        StatusCode::OK,
        Json(SessionResponse {
            session_id,
            heartbeat_interval_ms: (timeout_ms / 3).max(1),
            session_timeout_ms: timeout_ms,
        }),
    )
}

pub async fn handle_heartbeat(
    Extension(state): Extension<Arc<KeeperServerState>>,
    Path(session_id): Path<u64>,
) -> (StatusCode, Json<SessionAck>) {
    match state.keeper.heartbeat(session_id) {
        Ok(()) => (StatusCode::OK, Json(SessionAck { alive: true })),
        Err(_) => {
            tracing::debug!("Heartbeat for expired session {}", session_id);
            (StatusCode::GONE, Json(SessionAck { alive: false }))
        }
    }
}

pub async fn handle_close_session(
    Extension(state): Extension<Arc<KeeperServerState>>,
    Path(session_id): Path<u64>,
) -> (StatusCode, Json<SessionAck>) {
    state.keeper.close_session(session_id);
    tracing::info!("Closed remote session {}", session_id);
    (StatusCode::OK, Json(SessionAck { alive: false }))
}

pub async fn handle_request(
    Extension(state): Extension<Arc<KeeperServerState>>,
    Json(envelope): Json<KeeperRequestEnvelope>,
) -> (StatusCode, Json<KeeperResponse>) {
    let keeper = &state.keeper;
    let session = envelope.session_id;
    if keeper.heartbeat(session).is_err() {
        tracing::debug!("Request on expired session {}", session);
    }

    let response = match envelope.request {
        KeeperRequest::Exists { path } => keeper
            .exists(session, &path)
            .map(KeeperResponse::Exists)
            .unwrap_or_else(error_response),
        KeeperRequest::Get { path } => keeper
            .get(session, &path)
            .map(|(data, stat)| KeeperResponse::Data { data, stat })
            .unwrap_or_else(error_response),
        KeeperRequest::Create { path, data, mode } => keeper
            .create(session, &path, data, mode)
            .map(|path| KeeperResponse::Created { path })
            .unwrap_or_else(error_response),
        KeeperRequest::Set {
            path,
            data,
            version,
        } => keeper
            .set(session, &path, data, version)
            .map(KeeperResponse::Set)
            .unwrap_or_else(error_response),
        KeeperRequest::Remove { path, version } => keeper
            .remove(session, &path, version)
            .map(|_| KeeperResponse::Removed)
            .unwrap_or_else(error_response),
        KeeperRequest::Children { path } => keeper
            .children(session, &path)
            .map(KeeperResponse::Children)
            .unwrap_or_else(error_response),
        KeeperRequest::Multi { ops } => match keeper.multi(session, ops) {
            Ok(results) => KeeperResponse::Multi(results),
            Err(e) => KeeperResponse::Error {
                code: e.code,
                path: e.path,
                index: Some(e.index),
            },
        },
        KeeperRequest::Sync { path } => keeper
            .sync(session, &path)
            .map(|_| KeeperResponse::Synced)
            .unwrap_or_else(error_response),
    };

    (StatusCode::OK, Json(response))
}

fn error_response(e: KeeperError) -> KeeperResponse {
    KeeperResponse::Error {
        code: e.code,
        path: e.path,
        index: None,
    }
}
