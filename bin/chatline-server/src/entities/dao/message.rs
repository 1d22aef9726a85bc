use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl From<MessageRole> for chatline_agent::Role {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => chatline_agent::Role::User,
            MessageRole::Assistant => chatline_agent::Role::Assistant,
        }
    }
}

/// A single row in the `messages` table.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// A fresh message stamped with the current time.  The store may move the
    /// timestamp forward to keep the conversation strictly ordered.
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn to_agent_message(&self) -> chatline_agent::AgentMessage {
        chatline_agent::AgentMessage::new(self.role.into(), self.content.clone())
    }
}
