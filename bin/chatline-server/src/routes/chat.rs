//! Conversations, message history, streamed turns and titles.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::StreamExt;
use utoipa::OpenApi;

use crate::auth::CurrentUser;
use crate::entities::{ConversationRecord, ConversationStore, MessageStore};
use crate::error::ServerError;
use crate::schemas::ValidatedJson;
use crate::schemas::chat::{ConversationSummary, MessageResponse, StreamRequest, TitleResponse};
use crate::services::RelayEvent;
use crate::state::AppState;

/// Response header carrying the id of the conversation a turn belongs to.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(OpenApi)]
#[openapi(
    paths(list_conversations, list_messages, stream_chat, generate_title),
    components(schemas(ConversationSummary, MessageResponse, StreamRequest, TitleResponse))
)]
pub struct ChatApi;

/// All chat routes require a token.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", get(list_conversations))
        .route("/chat/stream", post(stream_chat))
        .route("/chat/{id}/messages", get(list_messages))
        .route("/chat/{id}/title", post(generate_title))
}

/// Load a conversation the caller owns.  Missing and foreign conversations
/// look the same.
async fn owned_conversation(
    state: &AppState,
    user: &CurrentUser,
    id: &str,
) -> Result<ConversationRecord, ServerError> {
    state
        .store
        .get_conversation(id)
        .await?
        .filter(|c| c.user_id == user.id)
        .ok_or_else(|| ServerError::NotFound("conversation not found".into()))
}

/// The caller's conversations, newest first.
#[utoipa::path(
    get,
    path = "/chat",
    tag = "chat",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Conversations", body = [ConversationSummary]),
        (status = 401, description = "Missing or invalid token"),
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let conversations = state.store.list_conversations(&user.id).await?;
    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

/// Messages of one conversation in the order they were written.
#[utoipa::path(
    get,
    path = "/chat/{id}/messages",
    tag = "chat",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Messages", body = [MessageResponse]),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "No such conversation for this user"),
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ServerError> {
    owned_conversation(&state, &user, &id).await?;
    let messages = state.store.list_messages(&id).await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

/// Send a prompt and stream the reply as Server-Sent Events.
///
/// Each fragment is one `data:` event; the stream ends with `data: [DONE]`
/// once the reply is stored, or with an `error` event carrying
/// `data: [ERROR] <message>` when it is not.
#[utoipa::path(
    post,
    path = "/chat/stream",
    tag = "chat",
    security(("bearer" = [])),
    request_body = StreamRequest,
    responses(
        (status = 200, description = "Reply stream", content_type = "text/event-stream", body = String,
            headers(("x-conversation-id" = String, description = "Conversation the turn belongs to"))),
        (status = 400, description = "Empty or oversized prompt"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Conversation belongs to another user"),
    )
)]
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    ValidatedJson(req): ValidatedJson<StreamRequest>,
) -> Result<Response, ServerError> {
    if req.prompt.trim().is_empty() {
        return Err(ServerError::BadRequest("prompt must not be empty".into()));
    }
    if req.prompt.len() > state.config.max_prompt_bytes {
        return Err(ServerError::BadRequest(format!(
            "prompt exceeds {} bytes",
            state.config.max_prompt_bytes
        )));
    }

    let turn = state.relay.start(&user, req.conversation_id, req.prompt).await?;
    let conversation_id = HeaderValue::from_str(&turn.conversation_id)
        .map_err(|e| ServerError::Internal(format!("conversation id is not a valid header: {e}")))?;

    let events = turn.map(|event: RelayEvent| Ok::<_, Infallible>(event.into_event()));
    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    response
        .headers_mut()
        .insert(CONVERSATION_ID_HEADER, conversation_id);
    Ok(response)
}

/// Generate a title now, replacing the current one.
#[utoipa::path(
    post,
    path = "/chat/{id}/title",
    tag = "chat",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "New title", body = TitleResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "No such conversation for this user"),
        (status = 502, description = "Title agent failed"),
    )
)]
pub async fn generate_title(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<TitleResponse>, ServerError> {
    let conversation = owned_conversation(&state, &user, &id).await?;
    let title = state.titles.force(&conversation).await?;
    Ok(Json(TitleResponse { title }))
}
