//! HTTP surface: banner, health probe and the WebSocket route.

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::signal::{self, GatewayState};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub participants: usize,
    pub sessions: usize,
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let report = HealthReport {
        status: "ok",
        participants: state.relay.participant_count().await,
        sessions: state.relay.session_count().await,
    };
    (StatusCode::OK, Json(report))
}

/// CORS layer for the given origin list; `None` allows any origin.
pub fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match origins {
        None => AllowOrigin::any(),
        Some(origins) => {
            let values: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("ignoring invalid CORS origin {:?}", origin);
                        None
                    }
                })
                .collect();
            if values.is_empty() {
                warn!("no valid CORS origins configured; cross-origin browser access will be blocked");
            }
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(state: GatewayState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(|| async { "Watchparty signaling server is running" }))
        .route("/health", get(health))
        .route("/ws", get(signal::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
