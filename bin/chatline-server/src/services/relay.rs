//! The streaming relay.
//!
//! One call to [`StreamRelay::start`] is one turn: the prompt is stored, the
//! stored history is handed to the agent, and agent fragments are forwarded
//! to the caller's [`TurnStream`] as they arrive.  The reply is stored only
//! when the agent completes; the stream then ends with [`RelayEvent::Done`].
//! Any failure after the stream started ends it with [`RelayEvent::Error`]
//! and nothing is stored for the reply.
//!
//! Every turn runs in its own task with its own channel and accumulator.
//! Dropping the [`TurnStream`] (client disconnect) cancels the turn, which
//! drops the agent stream and therefore the upstream request.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use chatline_agent::{AgentError, ChatAgent};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::entities::{
    ConversationRecord, ConversationStore, MessageRecord, MessageRole, MessageStore, SqliteStore,
};
use crate::error::ServerError;
use crate::services::title::TitleService;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const ERROR_PREFIX: &str = "[ERROR]";
pub const ERROR_EVENT: &str = "error";

/// Fragments buffered between the turn task and a slow client.
const CHANNEL_CAPACITY: usize = 64;

/// One item of a turn's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Fragment(String),
    Done,
    Error(String),
}

impl RelayEvent {
    /// Render as an SSE event.  Fragment text must not contain `\r`;
    /// [`normalize_newlines`] guarantees that for everything the relay emits.
    pub fn into_event(self) -> Event {
        match self {
            RelayEvent::Fragment(text) => Event::default().data(text),
            RelayEvent::Done => Event::default().data(DONE_SENTINEL),
            RelayEvent::Error(message) => Event::default()
                .event(ERROR_EVENT)
                .data(format!("{ERROR_PREFIX} {}", normalize_newlines(&message))),
        }
    }
}

/// SSE field values cannot carry carriage returns.
pub fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_owned();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Why a turn ended without a stored reply.
#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("stream cancelled")]
    Cancelled,
}

impl TurnError {
    /// Text for the error sentinel.  Upstream details stay in the logs.
    fn client_message(&self) -> String {
        match self {
            TurnError::Agent(e @ (AgentError::Timeout(_) | AgentError::EmptyResponse)) => e.to_string(),
            TurnError::Agent(AgentError::NotConfigured(_)) => "agent is not configured".to_owned(),
            TurnError::Agent(_) => "agent request failed".to_owned(),
            TurnError::Cancelled => "stream cancelled".to_owned(),
        }
    }
}

/// Events of one turn.  Dropping it cancels the turn.
pub struct TurnStream {
    pub conversation_id: String,
    events: ReceiverStream<RelayEvent>,
    _cancel: DropGuard,
}

impl Stream for TurnStream {
    type Item = RelayEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    store: Arc<SqliteStore>,
    agent: Arc<dyn ChatAgent>,
    titles: TitleService,
    idle_timeout: Duration,
    /// Parent of every turn's token; cancelled at shutdown.
    shutdown: CancellationToken,
}

impl StreamRelay {
    pub fn new(
        store: Arc<SqliteStore>,
        agent: Arc<dyn ChatAgent>,
        titles: TitleService,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            agent,
            titles,
            idle_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Store the prompt and start the turn.
    ///
    /// Errors returned here happen before anything was streamed and map to a
    /// plain HTTP error response.
    pub async fn start(
        &self,
        user: &CurrentUser,
        conversation_id: Option<String>,
        prompt: String,
    ) -> Result<TurnStream, ServerError> {
        let conversation = self.resolve_conversation(user, conversation_id).await?;
        self.store
            .append_message(MessageRecord::new(&conversation.id, MessageRole::User, prompt))
            .await?;
        let history = self.store.list_messages(&conversation.id).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();
        let turn = Turn {
            relay: self.clone(),
            conversation_id: conversation.id.clone(),
            history,
            cancel: cancel.clone(),
            tx,
        };
        let span = info_span!(
            "turn",
            conversation_id = %conversation.id,
            user_id = %user.id,
            agent = self.agent.name(),
        );
        tokio::spawn(turn.run().instrument(span));

        Ok(TurnStream {
            conversation_id: conversation.id,
            events: ReceiverStream::new(rx),
            _cancel: cancel.drop_guard(),
        })
    }

    /// Cancel every active turn.  New turns are not refused; call this only
    /// once the server stops accepting requests.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Find the caller's conversation, or create it.  Someone else's
    /// conversation is reported as not found.
    async fn resolve_conversation(
        &self,
        user: &CurrentUser,
        conversation_id: Option<String>,
    ) -> Result<ConversationRecord, ServerError> {
        let id = match conversation_id {
            Some(id) => {
                if let Some(existing) = self.owned_conversation(user, &id).await? {
                    return Ok(existing);
                }
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let conversation = ConversationRecord::new(id, user.id.clone());
        match self.store.create_conversation(conversation.clone()).await {
            Ok(()) => {
                info!(conversation_id = %conversation.id, user_id = %user.id, "conversation created");
                Ok(conversation)
            }
            // A concurrent request created the same id first.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => self
                .owned_conversation(user, &conversation.id)
                .await?
                .ok_or_else(|| ServerError::NotFound("conversation not found".into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn owned_conversation(
        &self,
        user: &CurrentUser,
        id: &str,
    ) -> Result<Option<ConversationRecord>, ServerError> {
        match self.store.get_conversation(id).await? {
            Some(conversation) if conversation.user_id == user.id => Ok(Some(conversation)),
            Some(_) => Err(ServerError::NotFound("conversation not found".into())),
            None => Ok(None),
        }
    }
}

struct Turn {
    relay: StreamRelay,
    conversation_id: String,
    history: Vec<MessageRecord>,
    cancel: CancellationToken,
    tx: mpsc::Sender<RelayEvent>,
}

impl Turn {
    async fn run(self) {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TurnError::Cancelled),
            outcome = self.forward() => outcome,
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    TurnError::Cancelled => info!("turn cancelled; reply discarded"),
                    TurnError::Agent(err) => warn!(error = %err, "agent failed; reply discarded"),
                }
                // The receiver is gone when the client disconnected.
                let _ = self.tx.send(RelayEvent::Error(e.client_message())).await;
                return;
            }
        };

        let stored = self
            .relay
            .store
            .append_message(MessageRecord::new(&self.conversation_id, MessageRole::Assistant, reply))
            .await;
        match stored {
            Ok(message) => {
                debug!(message_id = %message.id, bytes = message.content.len(), "reply stored");
                let _ = self.tx.send(RelayEvent::Done).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to store reply");
                let _ = self
                    .tx
                    .send(RelayEvent::Error("failed to save response".to_owned()))
                    .await;
                return;
            }
        }

        // Close the client stream before any title work.
        drop(self.tx);
        self.relay.titles.after_turn(&self.conversation_id).await;
    }

    /// Forward fragments until the agent completes; returns the full reply.
    async fn forward(&self) -> Result<String, TurnError> {
        let history = self.history.iter().map(MessageRecord::to_agent_message).collect();
        let idle = self.relay.idle_timeout;

        let mut fragments = tokio::time::timeout(idle, self.relay.agent.stream(history))
            .await
            .map_err(|_| AgentError::Timeout(idle.as_secs()))??;

        let mut reply = String::new();
        // A fragment that reads as the terminal sentinel is held back and
        // sent together with the next one.
        let mut held: Option<String> = None;
        loop {
            let next = tokio::time::timeout(idle, fragments.next())
                .await
                .map_err(|_| AgentError::Timeout(idle.as_secs()))?;
            let fragment = match next {
                Some(fragment) => normalize_newlines(&fragment?),
                None => break,
            };
            if fragment.is_empty() {
                continue;
            }
            reply.push_str(&fragment);
            let fragment = match held.take() {
                Some(prefix) => prefix + &fragment,
                None if fragment == DONE_SENTINEL => {
                    held = Some(fragment);
                    continue;
                }
                None => fragment,
            };
            self.emit(fragment).await?;
        }

        if reply.is_empty() {
            return Err(AgentError::EmptyResponse.into());
        }
        if let Some(sentinel) = held {
            // Nothing followed it; split so neither piece reads as `[DONE]`.
            let (head, tail) = sentinel.split_at(sentinel.len() - 1);
            self.emit(head.to_owned()).await?;
            self.emit(tail.to_owned()).await?;
        }
        Ok(reply)
    }

    async fn emit(&self, fragment: String) -> Result<(), TurnError> {
        self.tx
            .send(RelayEvent::Fragment(fragment))
            .await
            .map_err(|_| TurnError::Cancelled)
    }
}
