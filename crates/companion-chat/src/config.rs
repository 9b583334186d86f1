use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub encryption_key: Option<String>,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub stream_timeout_seconds: u64,
    pub memory_top_k: usize,
    pub recent_window: usize,
    pub title_max_chars: usize,
    pub compaction_interval: usize,
    pub serialize_conversation_turns: bool,
    pub transformation_keyword: String,
    pub identity_cache_ttl_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            api_host: var("API_HOST", "127.0.0.1"),
            api_port: var("API_PORT", "8000").parse().context("API_PORT")?,
            database_path: PathBuf::from(var("DATABASE_PATH", "./data/companion.db")),
            encryption_key: non_empty("ENCRYPTION_KEY"),
            llm_base_url: var("LLM_BASE_URL", "https://api.deepseek.com/v1"),
            llm_api_key: non_empty("LLM_API_KEY").or_else(|| non_empty("DEEPSEEK_API_KEY")),
            llm_model: var("LLM_MODEL", "deepseek-chat"),
            llm_temperature: var("LLM_TEMPERATURE", "0.4").parse().context("LLM_TEMPERATURE")?,
            llm_max_tokens: var("LLM_MAX_TOKENS", "2000").parse().context("LLM_MAX_TOKENS")?,
            stream_timeout_seconds: var("STREAM_TIMEOUT_SECONDS", "120")
                .parse()
                .context("STREAM_TIMEOUT_SECONDS")?,
            memory_top_k: var("MEMORY_TOP_K", "5").parse().context("MEMORY_TOP_K")?,
            recent_window: var("RECENT_WINDOW", "5").parse().context("RECENT_WINDOW")?,
            title_max_chars: var("TITLE_MAX_CHARS", "50").parse().context("TITLE_MAX_CHARS")?,
            compaction_interval: var("COMPACTION_INTERVAL", "20")
                .parse()
                .context("COMPACTION_INTERVAL")?,
            serialize_conversation_turns: var("SERIALIZE_CONVERSATION_TURNS", "true")
                .parse()
                .context("SERIALIZE_CONVERSATION_TURNS")?,
            transformation_keyword: var("TRANSFORMATION_KEYWORD", "transformation"),
            identity_cache_ttl_seconds: var("IDENTITY_CACHE_TTL_SECONDS", "60")
                .parse()
                .context("IDENTITY_CACHE_TTL_SECONDS")?,
        })
    }

    pub fn require_llm_api_key(&self) -> Result<&str> {
        self.llm_api_key
            .as_deref()
            .context("LLM_API_KEY (or DEEPSEEK_API_KEY) environment variable not set")
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- Encryption key: {}", if self.encryption_key.is_some() { "configured" } else { "temporary" });
        info!("- LLM: {} ({})", self.llm_base_url, self.llm_model);
        info!("- LLM API key: {}", if self.llm_api_key.is_some() { "configured" } else { "missing" });
        info!("- Temperature: {}, max tokens: {}", self.llm_temperature, self.llm_max_tokens);
        info!("- Stream timeout: {}s", self.stream_timeout_seconds);
        info!("- Memory top-k: {}, recent window: {}", self.memory_top_k, self.recent_window);
        info!("- Compaction every {} messages", self.compaction_interval);
        info!("- Serialize conversation turns: {}", self.serialize_conversation_turns);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}
