use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::entities::{ConversationRecord, MessageRecord};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StreamRequest {
    /// Omit to start a new conversation.  An unknown id creates a
    /// conversation with that id.
    #[serde(default, alias = "conv_id")]
    #[validate(
        length(min = 1, max = 128, message = "conversation id must be 1 to 128 characters"),
        custom(function = "conversation_id_charset")
    )]
    pub conversation_id: Option<String>,
    #[schema(example = "Hello")]
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<ConversationRecord> for ConversationSummary {
    fn from(conversation: ConversationRecord) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRecord> for MessageResponse {
    fn from(message: MessageRecord) -> Self {
        Self {
            id: message.id,
            role: message.role.to_string(),
            content: message.content,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TitleResponse {
    pub title: String,
}

/// Conversation ids travel back in a response header, so keep them to a
/// header-safe alphabet.
fn conversation_id_charset(id: &str) -> Result<(), ValidationError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(ValidationError::new("conversation_id_charset")
            .with_message("conversation id may only contain letters, digits, '-' and '_'".into()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conv_id_is_accepted_as_alias() {
        let req: StreamRequest = serde_json::from_str(r#"{"conv_id": "abc", "prompt": "hi"}"#).unwrap();
        assert_eq!(req.conversation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn conversation_id_is_optional() {
        let req: StreamRequest = serde_json::from_str(r#"{"prompt": "hi"}"#).unwrap();
        assert!(req.conversation_id.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn conversation_id_must_be_header_safe() {
        let req = StreamRequest {
            conversation_id: Some("bad id\n".into()),
            prompt: "hi".into(),
        };
        assert!(req.validate().is_err());
        let req = StreamRequest {
            conversation_id: Some("2f1c-ok_id".into()),
            prompt: "hi".into(),
        };
        assert!(req.validate().is_ok());
    }
}
