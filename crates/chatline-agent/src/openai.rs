//! OpenAI-compatible chat-completions agent.
//!
//! Streaming replies are requested with `"stream": true` and decoded from the
//! upstream SSE body chunk by chunk; nothing is buffered beyond the current
//! incomplete event.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use derive_builder::Builder;
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::agent::{ChatAgent, FragmentStream};
use crate::error::AgentError;
use crate::message::{AgentMessage, Role};
use crate::sse::SseDecoder;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Connection settings for [`OpenAiAgent`].
#[derive(Clone, Builder)]
pub struct OpenAiConfig {
    /// Bearer key; without it every call fails with `NotConfigured`.
    #[builder(default, setter(into, strip_option))]
    pub api_key: Option<String>,
    #[builder(default = "DEFAULT_BASE_URL.to_owned()", setter(into))]
    pub base_url: String,
    #[builder(default = "DEFAULT_MODEL.to_owned()", setter(into))]
    pub model: String,
    /// Prepended to the history unless it already starts with a system message.
    #[builder(default, setter(into, strip_option))]
    pub system_prompt: Option<String>,
    #[builder(default, setter(strip_option))]
    pub temperature: Option<f32>,
    #[builder(default, setter(strip_option))]
    pub max_tokens: Option<u32>,
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
    /// Whole-request limit for non-streaming calls.
    #[builder(default = "Duration::from_secs(60)")]
    pub request_timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Agent backed by an OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiAgent {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, history: &[AgentMessage], stream: bool) -> serde_json::Value {
        let system = self
            .config
            .system_prompt
            .as_ref()
            .map(|p| AgentMessage::system(p.clone()));
        let mut messages: Vec<&AgentMessage> = Vec::with_capacity(history.len() + 1);
        let has_system = history.first().is_some_and(|m| m.role == Role::System);
        if let (Some(system), false) = (system.as_ref(), has_system) {
            messages.push(system);
        }
        messages.extend(history.iter());

        let mut body = json!({
            "model":    self.config.model,
            "messages": messages,
            "stream":   stream,
        });
        if let Some(t) = self.config.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = self.config.max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }

    fn request(&self, body: &serde_json::Value) -> Result<reqwest::RequestBuilder, AgentError> {
        let key = self.config.api_key.as_deref().ok_or_else(|| {
            AgentError::NotConfigured("no API key set for the agent endpoint".into())
        })?;
        Ok(self.client.post(self.endpoint()).bearer_auth(key).json(body))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::Api { status: status.as_u16(), body })
}

#[async_trait]
impl ChatAgent for OpenAiAgent {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, history: Vec<AgentMessage>) -> Result<FragmentStream, AgentError> {
        let body = self.request_body(&history, true);
        debug!(model = %self.config.model, messages = history.len(), "opening agent stream");
        let response = check_status(self.request(&body)?.send().await?).await?;
        Ok(fragments(response.bytes_stream()))
    }

    async fn complete(&self, history: Vec<AgentMessage>) -> Result<String, AgentError> {
        let body = self.request_body(&history, false);
        debug!(model = %self.config.model, messages = history.len(), "agent completion request");
        let response = check_status(
            self.request(&body)?
                .timeout(self.config.request_timeout)
                .send()
                .await?,
        )
        .await?;
        let completion: Completion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::Parse("missing choices[0].message.content".into()))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

// ── Stream decoding ──────────────────────────────────────────────────────────

struct Decode<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, AgentError>>,
    /// `[DONE]` seen, or a terminal error queued.
    done: bool,
    /// Some choice reported a `finish_reason`.
    finished: bool,
}

impl<S> Decode<S> {
    fn absorb(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            if self.done {
                return;
            }
            if payload.trim() == "[DONE]" {
                self.done = true;
                return;
            }
            match serde_json::from_str::<StreamChunk>(&payload) {
                Ok(chunk) => {
                    if let Some(err) = chunk.error {
                        self.fail(AgentError::Api { status: 200, body: err.to_string() });
                        return;
                    }
                    for choice in chunk.choices {
                        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                            self.pending.push_back(Ok(text));
                        }
                        if choice.finish_reason.is_some() {
                            self.finished = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "undecodable agent stream payload");
                    self.fail(AgentError::Parse(e.to_string()));
                    return;
                }
            }
        }
    }

    fn fail(&mut self, err: AgentError) {
        self.pending.push_back(Err(err));
        self.done = true;
    }
}

/// Turn a raw chat-completions SSE body into a [`FragmentStream`].
///
/// Completion is `[DONE]`, or end-of-body after a `finish_reason`; any other
/// end-of-body yields [`AgentError::Incomplete`].
pub fn fragments<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = Decode {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = st.decoder.push(&chunk);
                    st.absorb(payloads);
                }
                Some(Err(e)) => st.fail(AgentError::Transport(e.to_string())),
                None => {
                    let tail: Vec<String> = st.decoder.finish().into_iter().collect();
                    st.absorb(tail);
                    if !st.done {
                        if st.finished {
                            st.done = true;
                        } else {
                            st.fail(AgentError::Incomplete);
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::Infallible;
    use tracing_test::traced_test;

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
        )
    }

    fn body(chunks: Vec<String>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String, String>> {
        stream
            .map(|r| r.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    fn agent(system_prompt: Option<&str>) -> OpenAiAgent {
        let mut builder = OpenAiConfigBuilder::default();
        builder.api_key("sk-test").model("test-model");
        if let Some(p) = system_prompt {
            builder.system_prompt(p);
        }
        OpenAiAgent::new(builder.build().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn yields_deltas_until_done() {
        let chunks = vec![
            delta("Hi"),
            delta(" there"),
            delta("!"),
            "data: [DONE]\n\n".to_owned(),
        ];
        let got = collect(fragments(body(chunks))).await;
        assert_eq!(
            got,
            vec![Ok("Hi".to_owned()), Ok(" there".to_owned()), Ok("!".to_owned())]
        );
    }

    #[tokio::test]
    async fn deltas_split_mid_event_are_reassembled() {
        let whole = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo"));
        let (a, b) = whole.split_at(17);
        let got = collect(fragments(body(vec![a.to_owned(), b.to_owned()]))).await;
        assert_eq!(got, vec![Ok("Hel".to_owned()), Ok("lo".to_owned())]);
    }

    #[tokio::test]
    async fn skips_role_only_and_empty_deltas() {
        let role_only = format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] })
        );
        let chunks = vec![role_only, delta(""), delta("x"), "data: [DONE]\n\n".into()];
        let got = collect(fragments(body(chunks))).await;
        assert_eq!(got, vec![Ok("x".to_owned())]);
    }

    #[tokio::test]
    async fn end_of_body_without_completion_is_an_error() {
        let got = collect(fragments(body(vec![delta("partial")]))).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], Ok("partial".to_owned()));
        assert!(got[1].is_err());
    }

    #[tokio::test]
    async fn finish_reason_counts_as_completion() {
        let stop = format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] })
        );
        let got = collect(fragments(body(vec![delta("ok"), stop]))).await;
        assert_eq!(got, vec![Ok("ok".to_owned())]);
    }

    #[tokio::test]
    async fn in_band_error_aborts_stream() {
        let err = format!("data: {}\n\n", json!({ "error": { "message": "overloaded" } }));
        let chunks = vec![delta("a"), err, delta("never")];
        let got = collect(fragments(body(chunks))).await;
        assert_eq!(got[0], Ok("a".to_owned()));
        assert!(got[1].as_ref().unwrap_err().contains("overloaded"));
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn transport_error_follows_already_decoded_fragments() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(delta("a"))),
            Err(std::io::Error::other("connection reset")),
        ];
        let got = collect(fragments(stream::iter(chunks))).await;
        assert_eq!(got[0], Ok("a".to_owned()));
        assert!(got[1].as_ref().unwrap_err().contains("connection reset"));
    }

    #[tokio::test]
    #[traced_test]
    async fn undecodable_payload_is_a_parse_error() {
        let chunks = vec![delta("a"), "data: {not json\n\n".to_owned()];
        let got = collect(fragments(body(chunks))).await;
        assert_eq!(got[0], Ok("a".to_owned()));
        assert!(got[1].as_ref().unwrap_err().starts_with("failed to parse agent response"));
        assert!(logs_contain("undecodable agent stream payload"));
    }

    #[test]
    fn request_body_prepends_system_prompt_once() {
        let agent = agent(Some("be brief"));
        let body = agent.request_body(&[AgentMessage::user("hi")], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "test-model");

        let explicit = [AgentMessage::system("titles only"), AgentMessage::user("x")];
        let body = agent.request_body(&explicit, false);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["content"], "titles only");
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let agent = OpenAiAgent::new(OpenAiConfigBuilder::default().build().unwrap()).unwrap();
        let err = agent.stream(vec![AgentMessage::user("hi")]).await.err().unwrap();
        assert!(matches!(err, AgentError::NotConfigured(_)));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let rendered = format!("{:?}", agent(None).config());
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("***"));
    }
}
