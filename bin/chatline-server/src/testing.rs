//! In-process fakes shared by the unit and router tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatline_agent::{AgentError, AgentMessage, ChatAgent, FragmentStream};
use futures::{StreamExt, stream};

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::state::AppState;

/// What a [`ScriptedAgent`] does on one call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments, then complete.
    Reply(Vec<String>),
    /// Stream these fragments, then fail.
    FailAfter(Vec<String>, String),
    /// Stream these fragments, then never produce another item.
    HangAfter(Vec<String>),
    /// Fail before streaming anything.
    Refuse(String),
}

impl Script {
    pub fn reply<const N: usize>(fragments: [&str; N]) -> Self {
        Script::Reply(fragments.iter().map(|s| s.to_string()).collect())
    }

    pub fn fail_after<const N: usize>(fragments: [&str; N], error: &str) -> Self {
        Script::FailAfter(fragments.iter().map(|s| s.to_string()).collect(), error.to_owned())
    }

    pub fn hang_after<const N: usize>(fragments: [&str; N]) -> Self {
        Script::HangAfter(fragments.iter().map(|s| s.to_string()).collect())
    }

    pub fn refuse(error: &str) -> Self {
        Script::Refuse(error.to_owned())
    }
}

/// Agent that plays back one [`Script`] per call and records every history
/// it was handed.  Once the scripts run out every call is refused.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Vec<AgentMessage>>>,
}

impl ScriptedAgent {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<AgentMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, history: Vec<AgentMessage>) -> Result<FragmentStream, AgentError> {
        self.calls.lock().unwrap().push(history);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::refuse("no script left"));

        let ok = |fragments: Vec<String>| stream::iter(fragments.into_iter().map(Ok));
        Ok(match script {
            Script::Reply(fragments) => ok(fragments).boxed(),
            Script::FailAfter(fragments, error) => ok(fragments)
                .chain(stream::once(async move { Err(AgentError::Transport(error)) }))
                .boxed(),
            Script::HangAfter(fragments) => ok(fragments).chain(stream::pending()).boxed(),
            Script::Refuse(error) => {
                return Err(AgentError::Api { status: 503, body: error });
            }
        })
    }
}

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".into(),
        database_url: "sqlite::memory:".into(),
        log_level: "debug".into(),
        log_json: false,
        jwt_secret: "test-secret".into(),
        jwt_expiry_hours: 1,
        bcrypt_cost: 4,
        agent_api_key: None,
        agent_base_url: "http://127.0.0.1:9".into(),
        agent_model: "scripted".into(),
        title_model: None,
        system_prompt: "test".into(),
        agent_idle_timeout: Duration::from_secs(5),
        title_threshold: 4,
        max_prompt_bytes: 1024,
        cors_allowed_origins: "*".into(),
        enable_docs: true,
    }
}

/// Application state over a fresh in-memory database.
pub async fn test_state(agent: Arc<ScriptedAgent>, title_agent: Arc<ScriptedAgent>) -> Arc<AppState> {
    let store = SqliteStore::in_memory().await;
    Arc::new(AppState::new(test_config(), store, agent, title_agent))
}
