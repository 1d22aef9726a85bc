use crate::entities::{SqliteStore, dao::MessageRecord, dao::MessageRole, from_micros, to_micros};
use std::future::Future;
use std::str::FromStr;

type MessageRow = (String, String, String, String, i64);

pub trait MessageStore: Send + Sync + 'static {
    /// Append a message to its conversation.
    ///
    /// The stored timestamp is moved forward if needed so that it is strictly
    /// greater than every earlier message of the same conversation; the
    /// returned record carries the timestamp actually stored.
    fn append_message(
        &self,
        message: MessageRecord,
    ) -> impl Future<Output = Result<MessageRecord, sqlx::Error>> + Send;
    /// All messages of a conversation, oldest first.
    fn list_messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, sqlx::Error>> + Send;
    /// The first `limit` messages of a conversation, oldest first.
    fn list_first_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, sqlx::Error>> + Send;
    fn count_messages(&self, conversation_id: &str) -> impl Future<Output = Result<i64, sqlx::Error>> + Send;
}

fn from_row((id, conversation_id, role, content, created_at): MessageRow) -> Result<MessageRecord, sqlx::Error> {
    let role = MessageRole::from_str(&role).map_err(|e| sqlx::Error::ColumnDecode {
        index: "role".into(),
        source: Box::new(e),
    })?;
    Ok(MessageRecord {
        id,
        conversation_id,
        role,
        content,
        created_at: from_micros(created_at),
    })
}

impl MessageStore for SqliteStore {
    async fn append_message(&self, mut message: MessageRecord) -> Result<MessageRecord, sqlx::Error> {
        let (stored_at,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, MAX(?5, COALESCE( \
                 (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?2), 0) + 1)) \
             RETURNING created_at",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_ref())
        .bind(&message.content)
        .bind(to_micros(message.created_at))
        .fetch_one(&self.pool)
        .await?;
        message.created_at = from_micros(stored_at);
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, created_at \
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn list_first_messages(&self, conversation_id: &str, limit: i64) -> Result<Vec<MessageRecord>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, created_at \
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn count_messages(&self, conversation_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
