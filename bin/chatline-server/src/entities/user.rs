use crate::entities::{SqliteStore, dao::UserRecord, from_micros, to_micros};
use std::future::Future;

type UserRow = (String, String, Option<String>, String, i64);

pub trait UserStore: Send + Sync + 'static {
    /// Fails with a unique-constraint violation if the email is taken.
    fn insert_user(&self, user: UserRecord) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn get_user(&self, id: &str) -> impl Future<Output = Result<Option<UserRecord>, sqlx::Error>> + Send;
    fn find_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, sqlx::Error>> + Send;
}

fn from_row((id, email, name, password_hash, created_at): UserRow) -> UserRecord {
    UserRecord {
        id,
        email,
        name,
        password_hash,
        created_at: from_micros(created_at),
    }
}

impl UserStore for SqliteStore {
    async fn insert_user(&self, user: UserRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(to_micros(user.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, name, password_hash, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, name, password_hash, created_at FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }
}
