//! Promotion CRUD endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use roster_directory::DirectoryError;

use super::{
    authorize_token, publish, ApiEnvelope, INTERNAL_ERROR, NO_AUTH, NO_PROMOTION_FOUND,
    TEXT_TOO_SMALL,
};
use crate::server::AppState;

/// Minimum accepted promotion title length.
const MIN_TITLE_LEN: usize = 3;

/// Query of `GET /api/promotion`.
#[derive(Debug, Deserialize)]
pub struct PromotionQuery {
    /// Bot API token.
    pub api_token: String,
}

/// GET `/api/promotion` — list a bot's promotions.
pub async fn get_promotions(
    State(state): State<AppState>,
    Query(query): Query<PromotionQuery>,
) -> axum::response::Response {
    let Some(subject) = authorize_token(&state.directory, &query.api_token) else {
        return (StatusCode::OK, Json(ApiEnvelope::fail(NO_AUTH))).into_response();
    };
    match state.directory.promotions_for(subject.bot_id) {
        Ok(promos) => (StatusCode::OK, Json(promos)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "promotion listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiEnvelope::fail(INTERNAL_ERROR)),
            )
                .into_response()
        }
    }
}

/// Body of `PUT /api/promotion`.
#[derive(Debug, Deserialize)]
pub struct PromotionBody {
    /// Bot API token.
    pub api_token: String,
    /// Promotion headline.
    pub title: String,
    /// Promotion body text.
    pub info: String,
}

/// PUT `/api/promotion` — create a promotion.
pub async fn put_promotion(
    State(state): State<AppState>,
    Json(body): Json<PromotionBody>,
) -> (StatusCode, Json<ApiEnvelope>) {
    if body.title.len() < MIN_TITLE_LEN {
        return (StatusCode::OK, Json(ApiEnvelope::fail(TEXT_TOO_SMALL)));
    }
    let Some(subject) = authorize_token(&state.directory, &body.api_token) else {
        return (StatusCode::OK, Json(ApiEnvelope::fail(NO_AUTH)));
    };
    match state
        .directory
        .create_promotion(subject.bot_id, &body.title, &body.info)
    {
        Ok(promo) => {
            info!(bot_id = %subject.bot_id, promo_id = %promo.id, "promotion created");
            publish(
                &state.events,
                subject.bot_id,
                json!({
                    "action": "create",
                    "promo": { "id": promo.id, "title": promo.title, "info": promo.info },
                }),
            );
            (StatusCode::OK, Json(ApiEnvelope::done()))
        }
        Err(e) => {
            tracing::error!(error = %e, "promotion create failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiEnvelope::fail(INTERNAL_ERROR)),
            )
        }
    }
}

/// Body of `PATCH /api/promotion`.
#[derive(Debug, Deserialize)]
pub struct PromotionPatchBody {
    /// Bot API token.
    pub api_token: String,
    /// Promotion to edit.
    pub promo_id: String,
    /// New headline.
    pub title: String,
    /// New body text.
    pub info: String,
}

/// PATCH `/api/promotion` — edit a promotion.
pub async fn patch_promotion(
    State(state): State<AppState>,
    Json(body): Json<PromotionPatchBody>,
) -> (StatusCode, Json<ApiEnvelope>) {
    if body.title.len() < MIN_TITLE_LEN {
        return (StatusCode::OK, Json(ApiEnvelope::fail(TEXT_TOO_SMALL)));
    }
    let Some(subject) = authorize_token(&state.directory, &body.api_token) else {
        return (StatusCode::OK, Json(ApiEnvelope::fail(NO_AUTH)));
    };
    match state
        .directory
        .edit_promotion(subject.bot_id, &body.promo_id, &body.title, &body.info)
    {
        Ok(()) => {
            info!(bot_id = %subject.bot_id, promo_id = %body.promo_id, "promotion edited");
            publish(
                &state.events,
                subject.bot_id,
                json!({
                    "action": "edit",
                    "promo": { "id": body.promo_id, "title": body.title, "info": body.info },
                }),
            );
            (StatusCode::OK, Json(ApiEnvelope::done()))
        }
        Err(DirectoryError::NotFound(_)) => {
            (StatusCode::OK, Json(ApiEnvelope::fail(NO_PROMOTION_FOUND)))
        }
        Err(e) => {
            tracing::error!(error = %e, "promotion edit failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiEnvelope::fail(INTERNAL_ERROR)),
            )
        }
    }
}

/// Body of `DELETE /api/promotion`.
#[derive(Debug, Deserialize)]
pub struct PromotionDeleteBody {
    /// Bot API token.
    pub api_token: String,
    /// Promotion to delete; omit to delete all of the bot's promotions.
    pub promo_id: Option<String>,
}

/// DELETE `/api/promotion` — delete one or all promotions.
pub async fn delete_promotion(
    State(state): State<AppState>,
    Json(body): Json<PromotionDeleteBody>,
) -> (StatusCode, Json<ApiEnvelope>) {
    let Some(subject) = authorize_token(&state.directory, &body.api_token) else {
        return (StatusCode::OK, Json(ApiEnvelope::fail(NO_AUTH)));
    };
    match state
        .directory
        .delete_promotions(subject.bot_id, body.promo_id.as_deref())
    {
        Ok(removed) => {
            info!(bot_id = %subject.bot_id, removed, "promotions deleted");
            publish(
                &state.events,
                subject.bot_id,
                json!({
                    "action": "delete",
                    "promo_id": body.promo_id,
                    "removed": removed,
                }),
            );
            (StatusCode::OK, Json(ApiEnvelope::done()))
        }
        Err(DirectoryError::NotFound(_)) => {
            (StatusCode::OK, Json(ApiEnvelope::fail(NO_PROMOTION_FOUND)))
        }
        Err(e) => {
            tracing::error!(error = %e, "promotion delete failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiEnvelope::fail(INTERNAL_ERROR)),
            )
        }
    }
}
