use chrono::{DateTime, Utc};

/// Title every conversation starts with until one is generated.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// A row in the `conversations` table.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Set once a title has been produced by the agent.
    pub title_generated: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_owned(),
            title_generated: false,
            created_at: Utc::now(),
        }
    }
}
