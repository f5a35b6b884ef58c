//! Authorization handshake.
//!
//! Per-connection state machine: `AwaitingIdentity → AwaitingCredentials →
//! Authorized | Rejected`. A connection that arrives with pre-resolved
//! subjects (reconnect with cached tokens on the upgrade URL) skips straight
//! to `Authorized`.

use roster_core::ids::ApiToken;
use roster_core::protocol::{self, CredentialsError};
use roster_directory::{BotSubject, CredentialResolver};
use tracing::{debug, warn};

/// Handshake states. `Authorized` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Connection opened; `IDENTITY` challenge not yet sent.
    AwaitingIdentity,
    /// Challenge sent; waiting for the credentials frame.
    AwaitingCredentials,
    /// At least one credential resolved; connection is registered.
    Authorized,
    /// No usable credentials; connection closes with the auth failure code.
    Rejected,
}

/// Why a handshake was rejected.
///
/// All variants produce the identical client-visible outcome
/// (`KILL_CONN`/`NO_AUTH`, close code 4004); the split exists for logging.
#[derive(Debug, thiserror::Error)]
pub enum AuthRejection {
    /// The client disconnected, timed out, or sent a non-text frame.
    #[error("no credentials frame received")]
    MissingCredentials,
    /// The frame failed validation (bad JSON, wrong type, empty list).
    #[error("invalid credentials frame: {0}")]
    Malformed(#[from] CredentialsError),
    /// Every presented credential failed to resolve.
    #[error("no credential resolved to a subject")]
    NoneResolved,
}

/// The per-connection handshake driver.
pub struct Handshake {
    state: HandshakeState,
}

impl Handshake {
    /// Start a handshake for a new connection.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingIdentity,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Record that the `IDENTITY` challenge went out.
    pub fn challenge_sent(&mut self) {
        debug_assert_eq!(self.state, HandshakeState::AwaitingIdentity);
        self.state = HandshakeState::AwaitingCredentials;
    }

    /// Skip the challenge: the connection arrived with resolved subjects.
    pub fn preauthorized(&mut self, subjects: &[BotSubject]) {
        debug_assert!(!subjects.is_empty());
        self.state = HandshakeState::Authorized;
    }

    /// Consume the credentials frame (or its absence) and settle the
    /// handshake.
    ///
    /// `frame` is `None` when the wait ended without a text frame — client
    /// disconnect or timeout; both reject identically to a malformed frame.
    pub async fn on_credentials(
        &mut self,
        resolver: &dyn CredentialResolver,
        frame: Option<&str>,
    ) -> Result<Vec<BotSubject>, AuthRejection> {
        debug_assert_eq!(self.state, HandshakeState::AwaitingCredentials);
        let result = evaluate(resolver, frame).await;
        self.state = match &result {
            Ok(_) => HandshakeState::Authorized,
            Err(_) => HandshakeState::Rejected,
        };
        result
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

async fn evaluate(
    resolver: &dyn CredentialResolver,
    frame: Option<&str>,
) -> Result<Vec<BotSubject>, AuthRejection> {
    let text = frame.ok_or(AuthRejection::MissingCredentials)?;
    let tokens = protocol::parse_credentials(text)?;
    let subjects = resolve_tokens(resolver, &tokens).await;
    if subjects.is_empty() {
        return Err(AuthRejection::NoneResolved);
    }
    Ok(subjects)
}

/// Resolve a token list against the directory, keeping every hit.
///
/// Unresolvable tokens are dropped without error; a directory failure is
/// logged and treated as a miss so one bad lookup cannot take down the
/// handshake for the remaining tokens.
pub async fn resolve_tokens(
    resolver: &dyn CredentialResolver,
    tokens: &[ApiToken],
) -> Vec<BotSubject> {
    let mut subjects = Vec::new();
    for token in tokens {
        match resolver.resolve(token).await {
            Ok(Some(subject)) => {
                debug!(bot_id = %subject.bot_id, "credential resolved");
                subjects.push(subject);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "directory lookup failed, dropping credential"),
        }
    }
    subjects
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::ids::BotId;
    use roster_directory::StaticResolver;

    fn resolver_with(entries: &[(&str, i64)]) -> StaticResolver {
        let resolver = StaticResolver::new();
        for (token, id) in entries {
            resolver.insert(
                *token,
                BotSubject {
                    bot_id: BotId(*id),
                    server_count: 0,
                },
            );
        }
        resolver
    }

    #[test]
    fn starts_awaiting_identity() {
        let hs = Handshake::new();
        assert_eq!(hs.state(), HandshakeState::AwaitingIdentity);
    }

    #[test]
    fn challenge_moves_to_awaiting_credentials() {
        let mut hs = Handshake::new();
        hs.challenge_sent();
        assert_eq!(hs.state(), HandshakeState::AwaitingCredentials);
    }

    #[test]
    fn preauthorized_skips_to_authorized() {
        let mut hs = Handshake::new();
        hs.preauthorized(&[BotSubject {
            bot_id: BotId(1),
            server_count: 0,
        }]);
        assert_eq!(hs.state(), HandshakeState::Authorized);
    }

    #[tokio::test]
    async fn valid_credentials_authorize() {
        let resolver = resolver_with(&[("tok_42", 42)]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let subjects = hs
            .on_credentials(&resolver, Some(r#"{"api_token": ["tok_42"]}"#))
            .await
            .unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].bot_id, BotId(42));
        assert_eq!(hs.state(), HandshakeState::Authorized);
    }

    #[tokio::test]
    async fn unresolvable_tokens_dropped_but_one_hit_suffices() {
        let resolver = resolver_with(&[("good", 7)]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let subjects = hs
            .on_credentials(&resolver, Some(r#"{"api_token": ["bad1", "good", "bad2"]}"#))
            .await
            .unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].bot_id, BotId(7));
    }

    #[tokio::test]
    async fn empty_list_rejected() {
        let resolver = resolver_with(&[]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let err = hs
            .on_credentials(&resolver, Some(r#"{"api_token": []}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::Malformed(CredentialsError::Empty)));
        assert_eq!(hs.state(), HandshakeState::Rejected);
    }

    #[tokio::test]
    async fn bare_scalar_rejected_like_empty() {
        let resolver = resolver_with(&[("tok", 1)]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let err = hs
            .on_credentials(&resolver, Some(r#"{"api_token": 123}"#))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthRejection::Malformed(CredentialsError::NotAList)
        ));
        assert_eq!(hs.state(), HandshakeState::Rejected);
    }

    #[tokio::test]
    async fn missing_frame_rejected() {
        let resolver = resolver_with(&[("tok", 1)]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let err = hs.on_credentials(&resolver, None).await.unwrap_err();
        assert!(matches!(err, AuthRejection::MissingCredentials));
        assert_eq!(hs.state(), HandshakeState::Rejected);
    }

    #[tokio::test]
    async fn all_unresolvable_rejected() {
        let resolver = resolver_with(&[]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let err = hs
            .on_credentials(&resolver, Some(r#"{"api_token": ["a", "b"]}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::NoneResolved));
    }

    #[tokio::test]
    async fn not_json_rejected() {
        let resolver = resolver_with(&[]);
        let mut hs = Handshake::new();
        hs.challenge_sent();

        let err = hs
            .on_credentials(&resolver, Some("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthRejection::Malformed(CredentialsError::NotJson)
        ));
    }

    #[tokio::test]
    async fn resolve_tokens_accumulates_all_hits() {
        let resolver = resolver_with(&[("a", 1), ("b", 2)]);
        let subjects = resolve_tokens(
            &resolver,
            &[ApiToken::new("a"), ApiToken::new("miss"), ApiToken::new("b")],
        )
        .await;
        let ids: Vec<BotId> = subjects.iter().map(|s| s.bot_id).collect();
        assert_eq!(ids, vec![BotId(1), BotId(2)]);
    }

    #[tokio::test]
    async fn duplicate_tokens_resolve_twice() {
        // The original accumulates per-credential with no dedup.
        let resolver = resolver_with(&[("a", 1)]);
        let subjects =
            resolve_tokens(&resolver, &[ApiToken::new("a"), ApiToken::new("a")]).await;
        assert_eq!(subjects.len(), 2);
    }
}
