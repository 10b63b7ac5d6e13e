//! Watchparty signaling gateway.
//!
//! Pairs exactly two participants per room and relays the messages they
//! need to negotiate a direct media connection:
//! - `registry`: room slots and id allocation
//! - `relay`: "send to the other occupant" routing
//! - `signal`: the per-participant WebSocket endpoint
//! - `web`: HTTP routes

#![forbid(unsafe_code)]

pub mod config;
pub mod registry;
pub mod relay;
pub mod signal;
pub mod web;

pub use config::GatewayConfig;
pub use registry::{JoinError, Pairing, ParticipantId, SessionRegistry, SessionState};
pub use relay::{Envelope, RelayLimits, SharedRelay, SignalRelay, Signaler};
pub use signal::{EndpointLimits, GatewayState};

/// Build the full application router for `config`.
pub fn app(config: &GatewayConfig) -> (axum::Router, GatewayState) {
    let state = GatewayState::new(config.relay_limits(), config.endpoint_limits());
    let origins = config.cors_origin_list();
    let cors = web::build_cors_layer(origins.as_deref());
    (web::router(state.clone(), cors), state)
}
