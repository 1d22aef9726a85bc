//! chatline-agent – client side of the external AI agent.
//!
//! The rest of chatline only sees the [`ChatAgent`] trait: hand it the full,
//! ordered message history and it either streams text fragments back or
//! returns one complete reply.  [`OpenAiAgent`] is the production
//! implementation and talks to any OpenAI-compatible chat-completions
//! endpoint.

pub mod agent;
pub mod error;
pub mod message;
pub mod openai;
pub mod sse;

pub use agent::{ChatAgent, FragmentStream};
pub use error::AgentError;
pub use message::{AgentMessage, Role};
pub use openai::{OpenAiAgent, OpenAiConfig, OpenAiConfigBuilder};
