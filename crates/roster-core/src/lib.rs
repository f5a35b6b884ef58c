//! # roster-core
//!
//! Shared building blocks for the Roster backend:
//!
//! - branded identifiers (`ConnectionId`, `BotId`, `ApiToken`)
//! - the real-time wire protocol (`ServerFrame`, credentials validation,
//!   close codes)

#![deny(unsafe_code)]

pub mod ids;
pub mod protocol;
