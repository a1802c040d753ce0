use axum::{extract::State, routing::post, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use super::{
    cookies::{clear_tokens, token_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
    dto::{
        LoginRequest, LoginResponse, MessageResponse, PasswordResetConfirm, PasswordResetRequest,
        RefreshRequest, RefreshResponse, RegisterRequest,
    },
    services::Registration,
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    users::repo_types::PublicUser,
    validation::ValidatedJson,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/password-reset/request", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .auth
        .register(Registration {
            email: payload.email,
            password: payload.password,
            name: payload.name,
            phone: payload.phone,
        })
        .await?;
    Ok(Json(user))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let out = state.auth.login(&payload.email, &payload.password).await?;

    let secure = state.config.cookie_secure;
    let jwt = state.auth.jwt();
    let jar = jar
        .add(token_cookie(ACCESS_COOKIE, out.access_token.clone(), jwt.access_ttl(), secure))
        .add(token_cookie(REFRESH_COOKIE, out.refresh_token.clone(), jwt.refresh_ttl(), secure));

    Ok((
        jar,
        Json(LoginResponse {
            user: out.user,
            access_token: out.access_token,
            refresh_token: out.refresh_token,
        }),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<RefreshResponse>)> {
    let from_body = payload.and_then(|Json(body)| body.refresh_token);
    let refresh_token = from_body
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned()))
        .ok_or_else(|| AppError::Unauthorized("Refresh token is missing".into()))?;

    let access_token = state.auth.refresh(&refresh_token).await?;
    let jar = jar.add(token_cookie(
        ACCESS_COOKIE,
        access_token.clone(),
        state.auth.jwt().access_ttl(),
        state.config.cookie_secure,
    ));
    Ok((jar, Json(RefreshResponse { access_token })))
}

#[instrument(skip(jar))]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (clear_tokens(jar), Json(MessageResponse::new("Logged out successfully")))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<PasswordResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.request_password_reset(&payload.email).await?;
    Ok(Json(MessageResponse::new(
        "If the email is registered, a password reset link has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<PasswordResetConfirm>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .confirm_password_reset(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}
