use axum::{
    extract::State,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{TokenRequest, UpdateEmailRequest, UpdateNameRequest, UpdatePasswordRequest, UpdatePhoneRequest},
    repo_types::PublicUser,
};
use crate::{
    auth::{dto::MessageResponse, extractors::AuthUser},
    error::AppResult,
    state::AppState,
    validation::ValidatedJson,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/email", patch(request_email_change))
        .route("/users/email/confirm", post(confirm_email_change))
        .route("/users/password", patch(update_password))
        .route("/users/phone", patch(update_phone))
        .route("/users/name", patch(update_name))
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.profiles.me(user.id).await?))
}

#[instrument(skip(state, payload))]
pub async fn request_email_change(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdateEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.request_email_change(user.id, &payload.new_email).await?;
    Ok(Json(MessageResponse::new("Confirmation link sent to the new email")))
}

/// Redeem an email-change token. No session required.
#[instrument(skip(state, payload))]
pub async fn confirm_email_change(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<TokenRequest>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.auth.confirm_email_change(&payload.token).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdatePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .update_password(user.id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

#[instrument(skip(state, payload))]
pub async fn update_phone(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdatePhoneRequest>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.profiles.update_phone(user.id, &payload.new_phone).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_name(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdateNameRequest>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.profiles.update_name(user.id, &payload.new_name).await?))
}
