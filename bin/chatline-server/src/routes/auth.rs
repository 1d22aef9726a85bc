//! Signup, signin and the current-user endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::auth::password::{hash_password, verify_password};
use crate::entities::{UserRecord, UserStore};
use crate::error::ServerError;
use crate::schemas::ValidatedJson;
use crate::schemas::auth::{SigninRequest, SignupRequest, TokenResponse, UserResponse, normalize_email};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(signup, signin, me),
    components(schemas(SignupRequest, SigninRequest, TokenResponse, UserResponse))
)]
pub struct AuthApi;

/// Routes reachable without a token.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
}

/// Routes behind [`crate::middleware::auth::require_user`].
pub fn protected_router() -> Router<Arc<AppState>> {
    Router::new().route("/auth/me", get(me))
}

fn issue(state: &AppState, user: CurrentUser) -> Result<TokenResponse, ServerError> {
    let token = state
        .jwt
        .issue(&user.id)
        .map_err(|e| ServerError::Internal(format!("failed to sign token: {e}")))?;
    Ok(TokenResponse::bearer(token, user.into()))
}

/// Create an account and return an access token.
#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Account created", body = TokenResponse),
        (status = 400, description = "Invalid body or email already registered"),
    )
)]
pub async fn signup(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    let email = normalize_email(&req.email);
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ServerError::BadRequest("Email already registered".into()));
    }

    let password_hash = hash_password(req.password, state.config.bcrypt_cost).await?;
    let user = UserRecord {
        id: Uuid::new_v4().to_string(),
        email,
        name: req.name.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty()),
        password_hash,
        created_at: Utc::now(),
    };
    match state.store.insert_user(user.clone()).await {
        Ok(()) => {}
        // Lost a race with a concurrent signup for the same email.
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ServerError::BadRequest("Email already registered".into()));
        }
        Err(e) => return Err(e.into()),
    }
    info!(user_id = %user.id, "user signed up");

    Ok(Json(issue(&state, user.into())?))
}

/// Exchange email and password for an access token.
#[utoipa::path(
    post,
    path = "/auth/signin",
    tag = "auth",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenResponse),
        (status = 401, description = "Incorrect email or password"),
    )
)]
pub async fn signin(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SigninRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    let rejected = || ServerError::Unauthorized("Incorrect email or password".into());

    let user = state
        .store
        .find_user_by_email(&normalize_email(&req.email))
        .await?
        .ok_or_else(rejected)?;
    if !verify_password(req.password, user.password_hash.clone()).await? {
        return Err(rejected());
    }
    info!(user_id = %user.id, "user signed in");

    Ok(Json(issue(&state, user.into())?))
}

/// The authenticated user.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid token"),
    )
)]
pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(user.into())
}
