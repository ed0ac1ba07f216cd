//! HTTP control surface: health, session creation, counters.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use skylink_session::{Clock, SessionError};

use crate::server::ServerState;
use crate::stats::{bump, StatsSnapshot};

#[derive(Debug, Serialize)]
struct Health {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct Created {
    code: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct Refused {
    error: &'static str,
}

/// Builds the control router. Session creation answers both GET and POST.
pub(crate) fn router<C: Clock>(state: Arc<ServerState<C>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/session/create",
            get(create_session::<C>).post(create_session::<C>),
        )
        .route("/stats", get(stats::<C>))
        .with_state(state)
}

async fn health() -> Json<Health> {
    Json(Health { ok: true })
}

async fn create_session<C: Clock>(
    State(state): State<Arc<ServerState<C>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let origin = addr.ip();
    let now = state.clock.now_ms();

    if !state.throttle.lock().await.try_acquire(origin, now) {
        bump(&state.stats.creations_throttled);
        return refuse("rate_limited");
    }

    let mut store = state.store.lock().await;
    match store.create(Some(origin)) {
        Ok(session) => {
            let body = Created {
                code: session.code.clone(),
                token: session.reconnect_token.clone(),
            };
            drop(store);
            bump(&state.stats.sessions_created);
            tracing::info!(code = %body.code, %origin, "session created");
            Json(body).into_response()
        }
        Err(e @ SessionError::TooManySessions { .. }) => {
            tracing::warn!(%origin, error = %e, "session creation refused");
            refuse("too_many_sessions")
        }
        Err(e) => {
            tracing::error!(%origin, error = %e, "session creation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn stats<C: Clock>(State(state): State<Arc<ServerState<C>>>) -> Json<StatsSnapshot> {
    Json(state.snapshot().await)
}

fn refuse(error: &'static str) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, Json(Refused { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuse_uses_too_many_requests() {
        let response = refuse("rate_limited");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let Json(body) = health().await;
        assert!(body.ok);
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"ok":true}"#);
    }
}
