//! The [`ChatAgent`] seam between chatline and the external agent.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::AgentError;
use crate::message::AgentMessage;

/// Fragments of one streamed reply.
///
/// The stream ending normally means the agent signalled completion; an `Err`
/// item means the reply was aborted and no further items follow.  Dropping
/// the stream cancels the in-flight upstream call.
pub type FragmentStream = BoxStream<'static, Result<String, AgentError>>;

/// An external text-generation service.
///
/// Implementations are stateless with respect to conversations: the caller
/// passes the complete ordered history on every call.
#[async_trait]
pub trait ChatAgent: Send + Sync + 'static {
    /// Short identifier used in logs (e.g. the model name).
    fn name(&self) -> &str;

    /// Start a streamed reply to `history`.
    ///
    /// Errors returned here happen before the first fragment (connection
    /// refused, authentication, bad status).
    async fn stream(&self, history: Vec<AgentMessage>) -> Result<FragmentStream, AgentError>;

    /// Produce one complete reply to `history`.
    ///
    /// The default implementation drains [`ChatAgent::stream`].
    async fn complete(&self, history: Vec<AgentMessage>) -> Result<String, AgentError> {
        let mut fragments = self.stream(history).await?;
        let mut reply = String::new();
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::stream;

    struct Canned(Vec<Result<&'static str, &'static str>>);

    #[async_trait]
    impl ChatAgent for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn stream(&self, _history: Vec<AgentMessage>) -> Result<FragmentStream, AgentError> {
            let items: Vec<Result<String, AgentError>> = self
                .0
                .iter()
                .map(|r| match r {
                    Ok(s) => Ok((*s).to_owned()),
                    Err(e) => Err(AgentError::Transport((*e).to_owned())),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    #[tokio::test]
    async fn default_complete_concatenates_fragments() {
        let agent = Canned(vec![Ok("Hi"), Ok(" there"), Ok("!")]);
        let reply = agent.complete(vec![AgentMessage::user("Hello")]).await.unwrap();
        assert_eq!(reply, "Hi there!");
    }

    #[tokio::test]
    async fn default_complete_surfaces_mid_stream_error() {
        let agent = Canned(vec![Ok("Hi"), Err("reset by peer")]);
        let err = agent.complete(vec![AgentMessage::user("Hello")]).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(m) if m == "reset by peer"));
    }
}
