//! Guild/shard stats and maintenance-mode endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{authorize_token, publish, ApiEnvelope, INTERNAL_ERROR, NO_AUTH, UNSUPPORTED_MODE};
use crate::server::AppState;

/// Body of `POST /api/bots/stats`.
#[derive(Debug, Deserialize)]
pub struct StatsBody {
    /// Bot API token.
    pub api_token: String,
    /// New guild (server) count.
    pub guild_count: i64,
    /// New shard count.
    pub shard_count: i64,
}

/// POST `/api/bots/stats` — set a bot's guild/shard counts.
pub async fn post_stats(
    State(state): State<AppState>,
    Json(body): Json<StatsBody>,
) -> (StatusCode, Json<ApiEnvelope>) {
    let Some(subject) = authorize_token(&state.directory, &body.api_token) else {
        return (StatusCode::UNAUTHORIZED, Json(ApiEnvelope::fail(NO_AUTH)));
    };
    if let Err(e) = state
        .directory
        .set_stats(subject.bot_id, body.guild_count, body.shard_count)
    {
        tracing::error!(error = %e, "stats update failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiEnvelope::fail(INTERNAL_ERROR)),
        );
    }
    info!(bot_id = %subject.bot_id, guild_count = body.guild_count, "stats updated");
    publish(
        &state.events,
        subject.bot_id,
        json!({
            "guild_count": body.guild_count,
            "shard_count": body.shard_count,
        }),
    );
    (StatusCode::OK, Json(ApiEnvelope::done()))
}

/// Body of `POST /api/bots/maint`.
#[derive(Debug, Deserialize)]
pub struct MaintBody {
    /// Bot API token.
    pub api_token: String,
    /// `1` to enter maintenance, `0` to leave.
    #[serde(default = "default_mode")]
    pub mode: i64,
    /// Operator-facing reason text.
    pub reason: String,
}

fn default_mode() -> i64 {
    1
}

/// POST `/api/bots/maint` — enter or leave maintenance mode.
pub async fn post_maint(
    State(state): State<AppState>,
    Json(body): Json<MaintBody>,
) -> (StatusCode, Json<ApiEnvelope>) {
    if !matches!(body.mode, 0 | 1) {
        return (StatusCode::OK, Json(ApiEnvelope::fail(UNSUPPORTED_MODE)));
    }
    let Some(subject) = authorize_token(&state.directory, &body.api_token) else {
        return (StatusCode::OK, Json(ApiEnvelope::fail(NO_AUTH)));
    };
    if let Err(e) = state
        .directory
        .set_maintenance(subject.bot_id, body.mode, &body.reason)
    {
        tracing::error!(error = %e, "maintenance update failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiEnvelope::fail(INTERNAL_ERROR)),
        );
    }
    info!(bot_id = %subject.bot_id, mode = body.mode, "maintenance updated");
    publish(
        &state.events,
        subject.bot_id,
        json!({
            "maint": { "mode": body.mode, "reason": body.reason },
        }),
    );
    (StatusCode::OK, Json(ApiEnvelope::done()))
}
