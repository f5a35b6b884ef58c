//! # roster-server
//!
//! Axum HTTP + `WebSocket` server for the Roster bot directory.
//!
//! - `WebSocket` gateway at `/api/ws`: authorization handshake, per-connection
//!   delivery loop, inbound echo loop
//! - Producer REST API: stats posting, maintenance toggles, promotion CRUD —
//!   each successful mutation publishes an event to the shared log
//! - `/health` and `/metrics` endpoints
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use server::{start, AppState, ServerHandle};
