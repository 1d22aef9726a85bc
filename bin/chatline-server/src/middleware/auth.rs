use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::auth::CurrentUser;
use crate::entities::UserStore;
use crate::error::ServerError;
use crate::state::AppState;

/// Resolve the bearer token to a [`CurrentUser`] and attach it to the
/// request.  Anything short of a valid token for an existing user is a 401,
/// returned before the handler runs.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(&req).map(str::to_owned);
    match authenticate(&state, token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<CurrentUser, ServerError> {
    let token = token.ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;
    let claims = state.jwt.verify(&token).map_err(|e| {
        debug!(error = %e, "rejected access token");
        ServerError::Unauthorized("invalid or expired token".into())
    })?;
    let user = state
        .store
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| ServerError::Unauthorized("user no longer exists".into()))?;
    Ok(user.into())
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
