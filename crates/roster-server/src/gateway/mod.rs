//! Real-time gateway: connection lifecycle, authorization, and delivery.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection session state, tri-state outbound sends |
//! | `registry` | Process-wide registry of open connections |
//! | `handshake` | Credential validation and the authorization state machine |
//! | `delivery` | Tick-driven scan of the event log per connection |
//! | `session` | WebSocket upgrade through disconnect: writer, echo loop, teardown |
//!
//! ## Data flow
//!
//! `session` runs the handshake → registers the connection → spawns
//! `delivery` alongside the inbound echo loop. Producers publish into the
//! shared `EventLog`; each connection's delivery loop claims and pushes
//! matching entries until disconnect.

pub mod connection;
pub mod delivery;
pub mod handshake;
pub mod registry;
pub mod session;
