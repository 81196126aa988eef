//! HTTP façade for the WhatsApp gateway.
//!
//! Routes (mounted under `/wa` and `/sec-server/wa`):
//! - `GET /status`, `GET /qr`
//! - `POST /upload`, `GET /files`, `DELETE /files/{id}`
//! - `POST /send`, `POST /send-files`, `POST /send-file`
//!
//! plus `GET /health` at the root.

pub mod error;
pub mod request_throttle;
pub mod requests;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    error::ApiError,
    server::{AppState, build_gateway_app, start_gateway},
    state::GatewayState,
};
