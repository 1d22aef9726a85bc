use chrono::{DateTime, Utc};

/// A row in the `users` table.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    /// Stored lower-cased; unique.
    pub email: String,
    pub name: Option<String>,
    /// bcrypt hash, never the password itself.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
