pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{ConversationRecord, DEFAULT_TITLE};
pub use message::{MessageRecord, MessageRole};
pub use user::UserRecord;
