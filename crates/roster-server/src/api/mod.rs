//! Producer-side REST API.
//!
//! Every successful mutation here is the producer side of the event log:
//! stats posts, maintenance toggles, and promotion changes each publish an
//! event that the gateway fans out to subscribed connections.
//!
//! Responses use the `{"done": bool, "reason": string|null}` envelope.

pub mod bots;
pub mod promotions;

use metrics::counter;
use roster_core::ids::ApiToken;
use roster_directory::{BotSubject, SqliteDirectory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::metrics::EVENTS_PUBLISHED_TOTAL;

/// The `{"done", "reason"}` response envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// Whether the operation succeeded.
    pub done: bool,
    /// Failure reason code, absent on success.
    pub reason: Option<String>,
}

impl ApiEnvelope {
    /// Success envelope.
    pub fn done() -> Self {
        Self {
            done: true,
            reason: None,
        }
    }

    /// Failure envelope with a reason code.
    pub fn fail(reason: &str) -> Self {
        Self {
            done: false,
            reason: Some(reason.to_owned()),
        }
    }
}

/// Reason code for an unknown API token.
pub const NO_AUTH: &str = "NO_AUTH";
/// Reason code for a too-short promotion title.
pub const TEXT_TOO_SMALL: &str = "TEXT_TOO_SMALL";
/// Reason code for a maintenance mode outside `{0, 1}`.
pub const UNSUPPORTED_MODE: &str = "UNSUPPORTED_MODE";
/// Reason code for a missing promotion row.
pub const NO_PROMOTION_FOUND: &str = "NO_PROMOTION_FOUND";
/// Reason code for an unexpected directory failure.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Authenticate a request body's API token against the directory.
pub fn authorize_token(directory: &SqliteDirectory, token: &str) -> Option<BotSubject> {
    match directory.lookup_token(&ApiToken::new(token)) {
        Ok(subject) => subject,
        Err(e) => {
            error!(error = %e, "token lookup failed");
            None
        }
    }
}

/// Publish a producer event and bump the counter.
pub fn publish(events: &roster_events::EventLog, subject: roster_core::ids::BotId, payload: Value) {
    let _ = events.publish(subject, payload);
    counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
}
