//! Gateway configuration, from command-line flags or the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use watchparty_common::helpers::split_list;

use crate::relay::RelayLimits;
use crate::signal::EndpointLimits;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_SDP_BYTES: usize = 32 * 1024;
const DEFAULT_MAX_CANDIDATE_BYTES: usize = 4096;
const DEFAULT_OUTBOX_CAPACITY: usize = 128;
const DEFAULT_MAX_MESSAGES_PER_MINUTE: u32 = 600;
const DEFAULT_MAX_CONNECTIONS: usize = 4096;

#[derive(Parser, Debug, Clone)]
#[command(name = "watchparty-gateway")]
#[command(about = "Watchparty signaling gateway - pairs two participants per room")]
pub struct GatewayConfig {
    /// Listen address
    #[arg(long, env = "WATCHPARTY_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Allow binding to a non-loopback address
    #[arg(long, env = "WATCHPARTY_ALLOW_PUBLIC_BIND")]
    pub allow_public_bind: bool,

    /// Allowed CORS origins, comma separated ("*" allows any)
    #[arg(long, env = "WATCHPARTY_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Largest accepted WebSocket text frame
    #[arg(long, env = "WATCHPARTY_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Largest session description relayed in an offer or answer
    #[arg(long, env = "WATCHPARTY_MAX_SDP_BYTES", default_value_t = DEFAULT_MAX_SDP_BYTES)]
    pub max_sdp_bytes: usize,

    /// Largest ICE candidate relayed
    #[arg(long, env = "WATCHPARTY_MAX_CANDIDATE_BYTES", default_value_t = DEFAULT_MAX_CANDIDATE_BYTES)]
    pub max_candidate_bytes: usize,

    /// Messages queued per participant before further ones are dropped
    #[arg(long, env = "WATCHPARTY_OUTBOX_CAPACITY", default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Per-connection message budget per minute
    #[arg(long, env = "WATCHPARTY_MAX_MESSAGES_PER_MINUTE", default_value_t = DEFAULT_MAX_MESSAGES_PER_MINUTE)]
    pub max_messages_per_minute: u32,

    /// Concurrent WebSocket connections
    #[arg(long, env = "WATCHPARTY_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Log level
    #[arg(long, env = "WATCHPARTY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            allow_public_bind: false,
            cors_origins: "*".to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_sdp_bytes: DEFAULT_MAX_SDP_BYTES,
            max_candidate_bytes: DEFAULT_MAX_CANDIDATE_BYTES,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_messages_per_minute: DEFAULT_MAX_MESSAGES_PER_MINUTE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Refuse a non-loopback bind unless it was asked for explicitly.
    pub fn check_bind_allowed(&self) -> watchparty_common::Result<()> {
        if self.host.is_loopback() || self.allow_public_bind {
            return Ok(());
        }
        Err(watchparty_common::Error::config(format!(
            "refusing non-loopback bind to {} without --allow-public-bind",
            self.host
        )))
    }

    /// Explicit origin list, or `None` when any origin is allowed.
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        let origins = split_list(&self.cors_origins);
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }

    pub fn relay_limits(&self) -> RelayLimits {
        RelayLimits {
            max_sdp_bytes: self.max_sdp_bytes,
            max_candidate_bytes: self.max_candidate_bytes,
        }
    }

    pub fn endpoint_limits(&self) -> EndpointLimits {
        EndpointLimits {
            max_message_bytes: self.max_message_bytes,
            max_messages_per_minute: self.max_messages_per_minute,
            outbox_capacity: self.outbox_capacity.max(1),
            max_connections: self.max_connections,
        }
    }
}
