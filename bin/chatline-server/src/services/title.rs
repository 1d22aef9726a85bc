//! Conversation titles.
//!
//! A conversation moves from its placeholder title to a generated one exactly
//! once: after a completed turn brings it to the configured message count, a
//! background job asks the title agent for a short summary and stores it with
//! a conditional update.  While a job runs, its conversation id is claimed in
//! [`TitleJobs`] so concurrent turns cannot start a second one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chatline_agent::{AgentMessage, ChatAgent};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::entities::{
    ConversationRecord, ConversationStore, MessageRecord, MessageRole, MessageStore, SqliteStore,
};
use crate::error::ServerError;

pub const TITLE_SYSTEM_PROMPT: &str = "You are a title generation specialist. Based on the \
    conversation content, generate a concise, descriptive title (maximum 50 characters) that \
    captures the main topic or theme of the conversation. Return only the title, nothing else.";

/// Only the opening of a conversation is summarised.
pub const TITLE_HISTORY_LIMIT: i64 = 10;

pub const MAX_TITLE_CHARS: usize = 50;

/// Used when the agent answers with nothing usable.
pub const FALLBACK_TITLE: &str = "Conversation";

/// Build the title request for the opening messages of a conversation.
pub fn title_prompt(messages: &[MessageRecord]) -> Vec<AgentMessage> {
    let transcript = messages
        .iter()
        .map(|m| match m.role {
            MessageRole::User => format!("User: {}", m.content),
            MessageRole::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        AgentMessage::system(TITLE_SYSTEM_PROMPT),
        AgentMessage::user(format!("Generate a title for this conversation:\n\n{transcript}")),
    ]
}

/// Strip quotes and whitespace, and cap the length at [`MAX_TITLE_CHARS`].
pub fn clean_title(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let title = stripped.trim();
    if title.is_empty() {
        return FALLBACK_TITLE.to_owned();
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let mut short: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        short.push_str("...");
        return short;
    }
    title.to_owned()
}

/// In-flight title jobs keyed by conversation id.
#[derive(Clone, Default)]
pub struct TitleJobs {
    handles: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl std::fmt::Debug for TitleJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handles.lock().map(|h| h.len()).unwrap_or(0);
        write!(f, "TitleJobs({count} running)")
    }
}

impl TitleJobs {
    /// Spawn `job` unless one is already running for `conversation_id`.
    /// The claim is released when the job finishes, whatever its outcome.
    pub fn spawn_once<F>(&self, conversation_id: &str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut map) = self.handles.lock() else {
            return false;
        };
        if map.contains_key(conversation_id) {
            return false;
        }
        let jobs = self.clone();
        let key = conversation_id.to_owned();
        // The map stays locked until the handle is in, so the job's own
        // release cannot run first.
        let handle = tokio::spawn(async move {
            job.await;
            jobs.release(&key);
        });
        map.insert(conversation_id.to_owned(), handle.abort_handle());
        true
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.handles
            .lock()
            .map(|map| map.contains_key(conversation_id))
            .unwrap_or(false)
    }

    /// Abort every running job.  Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let Ok(mut map) = self.handles.lock() else {
            return 0;
        };
        let count = map.len();
        for (_, handle) in map.drain() {
            handle.abort();
        }
        count
    }

    fn release(&self, conversation_id: &str) {
        if let Ok(mut map) = self.handles.lock() {
            map.remove(conversation_id);
        }
    }
}

/// Generates and stores conversation titles.
#[derive(Clone)]
pub struct TitleService {
    store: Arc<SqliteStore>,
    agent: Arc<dyn ChatAgent>,
    threshold: i64,
    jobs: TitleJobs,
}

impl TitleService {
    pub fn new(store: Arc<SqliteStore>, agent: Arc<dyn ChatAgent>, threshold: i64) -> Self {
        Self {
            store,
            agent,
            threshold,
            jobs: TitleJobs::default(),
        }
    }

    pub fn jobs(&self) -> &TitleJobs {
        &self.jobs
    }

    /// Called once a turn's assistant message is stored.  Starts a background
    /// title job if the conversation just became eligible.
    pub async fn after_turn(&self, conversation_id: &str) {
        match self.is_due(conversation_id).await {
            Ok(true) => self.schedule(conversation_id),
            Ok(false) => {}
            Err(e) => warn!(conversation_id, error = %e, "could not check title eligibility"),
        }
    }

    async fn is_due(&self, conversation_id: &str) -> Result<bool, sqlx::Error> {
        let Some(conversation) = self.store.get_conversation(conversation_id).await? else {
            return Ok(false);
        };
        if conversation.title_generated {
            return Ok(false);
        }
        Ok(self.store.count_messages(conversation_id).await? >= self.threshold)
    }

    fn schedule(&self, conversation_id: &str) {
        let service = self.clone();
        let id = conversation_id.to_owned();
        let started = self
            .jobs
            .spawn_once(conversation_id, async move { service.run_job(&id).await });
        if started {
            debug!(conversation_id, "title generation scheduled");
        } else {
            debug!(conversation_id, "title generation already in progress");
        }
    }

    async fn run_job(&self, conversation_id: &str) {
        let title = match self.generate(conversation_id).await {
            Ok(Some(title)) => title,
            Ok(None) => return,
            Err(e) => {
                warn!(conversation_id, error = %e, "title generation failed; will retry after the next turn");
                return;
            }
        };
        match self.store.set_generated_title(conversation_id, &title).await {
            Ok(true) => info!(conversation_id, %title, "conversation title generated"),
            Ok(false) => debug!(conversation_id, "conversation already has a generated title"),
            Err(e) => warn!(conversation_id, error = %e, "failed to store generated title"),
        }
    }

    /// Ask the agent for a title.  `None` when the conversation has no messages.
    pub async fn generate(&self, conversation_id: &str) -> Result<Option<String>, ServerError> {
        let opening = self
            .store
            .list_first_messages(conversation_id, TITLE_HISTORY_LIMIT)
            .await?;
        if opening.is_empty() {
            return Ok(None);
        }
        let raw = self.agent.complete(title_prompt(&opening)).await?;
        Ok(Some(clean_title(&raw)))
    }

    /// Generate and store a title now, regardless of message count or of an
    /// earlier generated title.
    pub async fn force(&self, conversation: &ConversationRecord) -> Result<String, ServerError> {
        match self.generate(&conversation.id).await? {
            Some(title) => {
                self.store.overwrite_title(&conversation.id, &title).await?;
                Ok(title)
            }
            None => Ok(conversation.title.clone()),
        }
    }

    pub fn shutdown(&self) {
        let aborted = self.jobs.abort_all();
        if aborted > 0 {
            info!(aborted, "aborted in-flight title jobs");
        }
    }
}
