use roleplay_core::generator::DEFAULT_BASE_URL;
use roleplay_core::speech::DEFAULT_TTS_SERVER_URL;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where role-play turns and analyses come from.
#[derive(Clone, Debug, PartialEq)]
pub enum Provider {
    OpenAI,
    /// Canned offline replies; needs no API key.
    Simulated,
}

/// Holds all configuration loaded from the environment at startup.
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub tts_server_url: String,
    pub llm_timeout: Duration,
    pub session_idle_ttl: Duration,
    pub prompts_dir: Option<PathBuf>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:8000".
    /// *   `LLM_PROVIDER`: "openai" or "simulated". Defaults to "openai".
    /// *   `OPENAI_API_KEY`: Your secret key for the OpenAI API. Required if provider is "openai".
    /// *   `OPENAI_BASE_URL`: (Optional) Base URL of an OpenAI-compatible API.
    /// *   `CHAT_MODEL`: (Optional) The chat model for role-play and analysis. Defaults to "gpt-4-turbo".
    /// *   `TTS_SERVER_URL`: (Optional) The local speech synthesis server. Defaults to "http://localhost:5000".
    /// *   `LLM_TIMEOUT_SECS`: (Optional) Deadline for each model call. Defaults to 30.
    /// *   `SESSION_IDLE_TTL_SECS`: (Optional) Idle time after which a session is dropped. Defaults to 1800.
    /// *   `PROMPTS_DIR`: (Optional) Directory of prompt files replacing the built-in texts.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = var("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "simulated" => Provider::Simulated,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of 'openai', 'simulated'", other),
                ));
            }
        };

        let openai_api_key = var("OPENAI_API_KEY").filter(|key| !key.is_empty());
        let openai_base_url = var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| "gpt-4-turbo".to_string());
        let tts_server_url =
            var("TTS_SERVER_URL").unwrap_or_else(|| DEFAULT_TTS_SERVER_URL.to_string());

        let llm_timeout = positive_secs(&var, "LLM_TIMEOUT_SECS", 30)?;
        let session_idle_ttl = positive_secs(&var, "SESSION_IDLE_TTL_SECS", 30 * 60)?;

        let prompts_dir = var("PROMPTS_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        if provider == Provider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            provider,
            openai_api_key,
            openai_base_url,
            chat_model,
            tts_server_url,
            llm_timeout,
            session_idle_ttl,
            prompts_dir,
            log_level,
        })
    }
}

fn positive_secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(secs) = var(key) else {
        return Ok(Duration::from_secs(default));
    };
    secs.parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("'{}' is not a positive number of seconds", secs),
            )
        })
}
