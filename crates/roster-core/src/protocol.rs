//! Real-time wire protocol: server frames, credentials frame validation,
//! and application close codes.
//!
//! Every server→client message is a JSON object tagged by a `msg` field:
//!
//! | msg | reason | meaning |
//! |---|---|---|
//! | `IDENTITY` | null | requesting credentials |
//! | `READY` | `AUTH_DONE` | handshake succeeded |
//! | `KILL_CONN` | `NO_AUTH` | handshake failed, connection closing |
//! | `EVENT` | `<bot_id>` | event delivery, payload in `data` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ApiToken, BotId};

/// Application close code sent when the authorization handshake fails.
pub const CLOSE_NO_AUTH: u16 = 4004;

/// Reason string attached to `READY`.
pub const REASON_AUTH_DONE: &str = "AUTH_DONE";

/// Reason string attached to `KILL_CONN`.
pub const REASON_NO_AUTH: &str = "NO_AUTH";

/// The `msg` tag of a server frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// Credentials challenge.
    Identity,
    /// Handshake complete, events will follow.
    Ready,
    /// Handshake failed, the connection is about to close.
    KillConn,
    /// Event delivery.
    Event,
}

/// One server→client frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Frame tag.
    pub msg: FrameKind,
    /// `AUTH_DONE`, `NO_AUTH`, or the subject bot id for events.
    pub reason: Option<String>,
    /// Event payload; absent on handshake frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerFrame {
    /// The credentials challenge sent on connect.
    pub fn identity() -> Self {
        Self {
            msg: FrameKind::Identity,
            reason: None,
            data: None,
        }
    }

    /// Handshake success notification.
    pub fn ready() -> Self {
        Self {
            msg: FrameKind::Ready,
            reason: Some(REASON_AUTH_DONE.to_owned()),
            data: None,
        }
    }

    /// Handshake failure notification, sent just before closing.
    pub fn kill_conn() -> Self {
        Self {
            msg: FrameKind::KillConn,
            reason: Some(REASON_NO_AUTH.to_owned()),
            data: None,
        }
    }

    /// An event delivery frame; `reason` carries the subject bot id.
    pub fn event(subject: BotId, payload: Value) -> Self {
        Self {
            msg: FrameKind::Event,
            reason: Some(subject.to_string()),
            data: Some(payload),
        }
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> String {
        // ServerFrame contains only JSON-representable fields.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Why a credentials frame was rejected.
///
/// Every variant is handled identically (`KILL_CONN` + close 4004); the
/// distinction exists for logs and tests only.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    /// The frame was not valid JSON.
    #[error("credentials frame is not valid JSON")]
    NotJson,
    /// The frame had no `api_token` key, or it was not an array.
    ///
    /// A bare scalar (e.g. `123`) lands here: wrong type and missing auth
    /// are deliberately indistinguishable to the client.
    #[error("credentials frame has no token list")]
    NotAList,
    /// The token list was empty.
    #[error("credentials frame has an empty token list")]
    Empty,
}

/// Parse and validate a client credentials frame.
///
/// The expected shape is `{"api_token": ["tok", ...]}`. Array elements that
/// are not strings are coerced to their JSON text (numbers become `"123"`),
/// which then simply fail to resolve downstream.
pub fn parse_credentials(text: &str) -> Result<Vec<ApiToken>, CredentialsError> {
    let value: Value = serde_json::from_str(text).map_err(|_| CredentialsError::NotJson)?;
    let list = value
        .get("api_token")
        .and_then(Value::as_array)
        .ok_or(CredentialsError::NotAList)?;
    if list.is_empty() {
        return Err(CredentialsError::Empty);
    }
    let tokens = list
        .iter()
        .map(|v| match v {
            Value::String(s) => ApiToken::new(s.clone()),
            other => ApiToken::new(other.to_string()),
        })
        .collect();
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_frame_wire_shape() {
        let frame = ServerFrame::identity();
        let parsed: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed["msg"], "IDENTITY");
        assert_eq!(parsed["reason"], Value::Null);
        assert!(parsed.get("data").is_none());
    }

    #[test]
    fn ready_frame_wire_shape() {
        let frame = ServerFrame::ready();
        let parsed: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed["msg"], "READY");
        assert_eq!(parsed["reason"], "AUTH_DONE");
    }

    #[test]
    fn kill_conn_frame_wire_shape() {
        let frame = ServerFrame::kill_conn();
        let parsed: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed["msg"], "KILL_CONN");
        assert_eq!(parsed["reason"], "NO_AUTH");
    }

    #[test]
    fn event_frame_carries_subject_and_payload() {
        let frame = ServerFrame::event(BotId(42), json!({"guild_count": 100}));
        let parsed: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed["msg"], "EVENT");
        assert_eq!(parsed["reason"], "42");
        assert_eq!(parsed["data"]["guild_count"], 100);
    }

    #[test]
    fn frame_roundtrips_through_serde() {
        let frame = ServerFrame::event(BotId(7), json!([1, 2, 3]));
        let json = frame.to_json();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.msg, FrameKind::Event);
        assert_eq!(back.reason.as_deref(), Some("7"));
    }

    #[test]
    fn close_code_value() {
        assert_eq!(CLOSE_NO_AUTH, 4004);
    }

    // ── parse_credentials ──

    #[test]
    fn valid_token_list_parses() {
        let tokens = parse_credentials(r#"{"api_token": ["a", "b"]}"#).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].expose(), "a");
        assert_eq!(tokens[1].expose(), "b");
    }

    #[test]
    fn single_token_list_parses() {
        let tokens = parse_credentials(r#"{"api_token": ["only"]}"#).unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn garbage_is_not_json() {
        assert_eq!(
            parse_credentials("not json").unwrap_err(),
            CredentialsError::NotJson
        );
    }

    #[test]
    fn missing_key_rejected() {
        assert_eq!(
            parse_credentials(r#"{"something": []}"#).unwrap_err(),
            CredentialsError::NotAList
        );
    }

    #[test]
    fn bare_scalar_rejected_like_missing() {
        // `{"api_token": 123}` — wrong type, same rejection as no auth at all.
        assert_eq!(
            parse_credentials(r#"{"api_token": 123}"#).unwrap_err(),
            CredentialsError::NotAList
        );
    }

    #[test]
    fn top_level_scalar_rejected() {
        assert_eq!(
            parse_credentials("123").unwrap_err(),
            CredentialsError::NotAList
        );
    }

    #[test]
    fn empty_list_rejected() {
        assert_eq!(
            parse_credentials(r#"{"api_token": []}"#).unwrap_err(),
            CredentialsError::Empty
        );
    }

    #[test]
    fn numeric_elements_coerced_to_strings() {
        let tokens = parse_credentials(r#"{"api_token": [42, "real"]}"#).unwrap();
        assert_eq!(tokens[0].expose(), "42");
        assert_eq!(tokens[1].expose(), "real");
    }

    #[test]
    fn null_element_coerced_not_fatal() {
        let tokens = parse_credentials(r#"{"api_token": [null]}"#).unwrap();
        assert_eq!(tokens[0].expose(), "null");
    }
}
