//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Used when `CHATLINE_JWT_SECRET` is unset; `main` warns loudly about it.
pub const DEV_JWT_SECRET: &str = "chatline-dev-secret-change-in-production";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Respond to the user's \
    message while considering the conversation history. Be conversational and helpful.";

/// Runtime configuration for chatline-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set (the agent then answers every
/// request with a "not configured" error until `OPENAI_API_KEY` is set).
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://chatline.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// HS256 signing secret for access tokens.
    pub jwt_secret: String,

    /// Access-token lifetime in hours.
    pub jwt_expiry_hours: i64,

    pub bcrypt_cost: u32,

    pub agent_api_key: Option<String>,
    pub agent_base_url: String,
    pub agent_model: String,
    /// Model used for title generation; `None` reuses `agent_model`.
    pub title_model: Option<String>,
    pub system_prompt: String,

    /// Longest silence tolerated between two streamed fragments.
    pub agent_idle_timeout: Duration,

    /// Message count at which a conversation gets its generated title.
    pub title_threshold: i64,

    /// Upper bound on a single prompt, in bytes.
    pub max_prompt_bytes: usize,

    /// Comma-separated list of allowed CORS origins; `*` allows any.
    pub cors_allowed_origins: String,

    /// Serve the OpenAPI reference UI at `/docs`.
    pub enable_docs: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("CHATLINE_BIND", "0.0.0.0:8000"),
            database_url: env_or("CHATLINE_DATABASE_URL", "sqlite://chatline.db"),
            log_level: env_or("CHATLINE_LOG", "info"),
            log_json: parse_bool("CHATLINE_LOG_JSON", false),
            jwt_secret: env_or("CHATLINE_JWT_SECRET", DEV_JWT_SECRET),
            jwt_expiry_hours: parse_env("CHATLINE_JWT_EXPIRY_HOURS", 24),
            bcrypt_cost: parse_env("CHATLINE_BCRYPT_COST", bcrypt::DEFAULT_COST),
            agent_api_key: env_opt("OPENAI_API_KEY"),
            agent_base_url: env_or("CHATLINE_AGENT_BASE_URL", chatline_agent::openai::DEFAULT_BASE_URL),
            agent_model: env_or("CHATLINE_AGENT_MODEL", chatline_agent::openai::DEFAULT_MODEL),
            title_model: env_opt("CHATLINE_TITLE_MODEL"),
            system_prompt: env_or("CHATLINE_SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            agent_idle_timeout: Duration::from_secs(parse_env("CHATLINE_AGENT_IDLE_TIMEOUT_SECS", 60)),
            title_threshold: parse_env("CHATLINE_TITLE_THRESHOLD", 4),
            max_prompt_bytes: parse_env("CHATLINE_MAX_PROMPT_BYTES", 128 * 1024),
            cors_allowed_origins: env_or("CHATLINE_CORS_ORIGINS", "http://localhost:3000"),
            enable_docs: parse_bool("CHATLINE_ENABLE_DOCS", true),
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
