//! # roster-directory
//!
//! The bot directory: the external collaborator the gateway consults to turn
//! client-supplied API tokens into authorized subjects, plus the mutations
//! the producer-side REST API performs (stats, maintenance, promotions).

#![deny(unsafe_code)]

pub mod error;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use roster_core::ids::{ApiToken, BotId};
use serde::{Deserialize, Serialize};

pub use error::DirectoryError;
pub use sqlite::SqliteDirectory;

/// The subject record a credential resolves to.
///
/// Mirrors the directory row the handshake looks up: the bot id plus its
/// current server count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSubject {
    /// The bot this subject identifies.
    pub bot_id: BotId,
    /// Server count at resolution time.
    pub server_count: i64,
}

/// Credential → subject resolution.
///
/// Each token resolves to at most one subject; an unknown token is `Ok(None)`,
/// not an error — the handshake silently drops it.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Look up the subject a token authorizes, if any.
    async fn resolve(&self, token: &ApiToken) -> Result<Option<BotSubject>, DirectoryError>;
}

/// In-memory resolver for tests and local tooling.
#[derive(Default)]
pub struct StaticResolver {
    subjects: RwLock<HashMap<String, BotSubject>>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token → subject mapping.
    pub fn insert(&self, token: impl Into<String>, subject: BotSubject) {
        let _ = self.subjects.write().insert(token.into(), subject);
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(&self, token: &ApiToken) -> Result<Option<BotSubject>, DirectoryError> {
        Ok(self.subjects.read().get(token.expose()).copied())
    }
}
