use thiserror::Error;

/// Errors that can be returned by an agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The HTTP request to the agent failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent answered with a non-success status or an in-band error.
    #[error("agent API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response stream broke off while fragments were still arriving.
    #[error("agent stream interrupted: {0}")]
    Transport(String),

    /// The stream ended without the agent signalling completion.
    #[error("agent stream ended before completion")]
    Incomplete,

    /// A payload could not be decoded.
    #[error("failed to parse agent response: {0}")]
    Parse(String),

    /// No fragment arrived within the configured idle window.
    #[error("agent did not respond within {0} seconds")]
    Timeout(u64),

    /// The agent finished without producing any text.
    #[error("agent returned an empty response")]
    EmptyResponse,

    /// Missing credentials or endpoint.
    #[error("agent not configured: {0}")]
    NotConfigured(String),
}
