use crate::entities::{SqliteStore, dao::ConversationRecord, from_micros, to_micros};
use std::future::Future;

type ConversationRow = (String, String, String, bool, i64);

pub trait ConversationStore: Send + Sync + 'static {
    fn create_conversation(
        &self,
        conversation: ConversationRecord,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn get_conversation(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ConversationRecord>, sqlx::Error>> + Send;
    /// Newest first.
    fn list_conversations(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<ConversationRecord>, sqlx::Error>> + Send;
    /// Store a generated title unless one was already generated.
    /// Returns `true` when this call set it.
    fn set_generated_title(
        &self,
        id: &str,
        title: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
    /// Store a title unconditionally and mark it generated.
    fn overwrite_title(&self, id: &str, title: &str) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

fn from_row((id, user_id, title, title_generated, created_at): ConversationRow) -> ConversationRecord {
    ConversationRecord {
        id,
        user_id,
        title,
        title_generated,
        created_at: from_micros(created_at),
    }
}

impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, conversation: ConversationRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, title_generated, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.title_generated)
        .bind(to_micros(conversation.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>, sqlx::Error> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, title_generated, created_at \
             FROM conversations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRecord>, sqlx::Error> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, user_id, title, title_generated, created_at \
             FROM conversations WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn set_generated_title(&self, id: &str, title: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?1, title_generated = 1 \
             WHERE id = ?2 AND title_generated = 0",
        )
        .bind(title)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn overwrite_title(&self, id: &str, title: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE conversations SET title = ?1, title_generated = 1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
