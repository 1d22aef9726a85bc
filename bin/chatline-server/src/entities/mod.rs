//! Persistence layer.
//!
//! One trait per concern ([`UserStore`], [`ConversationStore`],
//! [`MessageStore`]), all implemented by [`SqliteStore`].  Trait methods use
//! `impl Future` in their signatures, so no `async-trait` is needed here.
//!
//! Queries use the runtime-checked `sqlx::query` form so no `DATABASE_URL` is
//! needed at compile time.  Migrations under `./migrations` are embedded into
//! the binary and applied by [`SqliteStore::connect`].

pub mod conversation;
pub mod dao;
pub mod message;
pub mod user;

pub use dao::{ConversationRecord, MessageRecord, MessageRole, UserRecord, DEFAULT_TITLE};

pub use conversation::ConversationStore;
pub use message::MessageStore;
pub use user::UserStore;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// SQLite-backed store for users, conversations and messages.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `"sqlite://chatline.db"`.  In-memory
    /// databases (`"sqlite::memory:"`) are pinned to a single connection,
    /// since every connection would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh, migrated in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::connect("sqlite::memory:").await.expect("in-memory sqlite")
    }
}

// ── time helpers ─────────────────────────────────────────────────────────────

pub(crate) fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub(crate) fn from_micros(raw: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(raw).unwrap_or_else(|| {
        tracing::warn!(raw, "timestamp out of range; using now");
        Utc::now()
    })
}
