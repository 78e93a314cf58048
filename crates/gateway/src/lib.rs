//! Gateway: HTTP token endpoints and the real-time channel, guarded by the
//! channel security gate.
//!
//! Lifecycle:
//! 1. Load config and validate signing secrets
//! 2. Open the renewal-token store
//! 3. Build the gate from `[channel]`
//! 4. Start the HTTP server (health, token endpoints, WebSocket upgrade)
//! 5. Start the sweep, token cleanup and SIGHUP reload tasks

pub mod auth;
pub mod content;
pub mod gate;
pub mod origin;
pub mod rate_limit;
pub mod reload;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    gate::{ChannelSecurityGate, GateRejection},
    server::{build_gateway_app, prepare_gateway, start_gateway},
    state::GatewayState,
};
