//! Credentials: password hashing, access tokens and the authenticated caller.

pub mod jwt;
pub mod password;

pub use jwt::JwtKeys;

use chrono::{DateTime, Utc};

use crate::entities::UserRecord;

/// The authenticated caller, inserted into request extensions by
/// [`crate::middleware::auth::require_user`].  Handlers take it as
/// `Extension<CurrentUser>`; no handler reads identity from anywhere else.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for CurrentUser {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
        }
    }
}
