use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{DuetError, Result};

/// Placeholder substituted with the caller's latest user message
pub const USER_TEXT_PLACEHOLDER: &str = "{user_text}";

/// Main configuration structure for Duet
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Companion model configuration
    #[serde(default)]
    pub companion: CompanionConfig,
    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP proxy server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the upstream chat-completion API, without `/v1/...`
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Timeout for whole-body upstream requests in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for establishing upstream connections in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between two streamed frames, in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ProxyConfig {
    /// Full URL of the chat completions endpoint on the upstream
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

/// Companion model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompanionConfig {
    /// Dispatch a companion call for every request
    #[serde(default = "default_companion_enabled")]
    pub enabled: bool,
    /// Model to ask; falls back to the model named in the inbound request
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature sent with the companion request
    #[serde(default = "default_companion_temperature")]
    pub temperature: f32,
    /// Token ceiling for the companion answer
    #[serde(default = "default_companion_max_tokens")]
    pub max_tokens: u32,
    /// Absolute timeout on the companion HTTP call, in seconds
    #[serde(default = "default_companion_timeout_secs")]
    pub timeout_secs: u64,
    /// How long the response path waits on the companion before giving up
    #[serde(default = "default_companion_wait_secs")]
    pub wait_secs: u64,
    /// Text placed between the main answer and the companion answer
    #[serde(default = "default_companion_separator")]
    pub separator: String,
    /// Prompt template; `{user_text}` is replaced with the latest user message
    #[serde(default = "default_companion_prompt_template")]
    pub prompt_template: String,
    /// File whose trimmed contents replace `prompt_template`
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            enabled: default_companion_enabled(),
            model: None,
            temperature: default_companion_temperature(),
            max_tokens: default_companion_max_tokens(),
            timeout_secs: default_companion_timeout_secs(),
            wait_secs: default_companion_wait_secs(),
            separator: default_companion_separator(),
            prompt_template: default_companion_prompt_template(),
            prompt_file: None,
        }
    }
}

impl CompanionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

fn default_companion_enabled() -> bool {
    true
}

fn default_companion_temperature() -> f32 {
    0.7
}

fn default_companion_max_tokens() -> u32 {
    1024
}

fn default_companion_timeout_secs() -> u64 {
    8
}

fn default_companion_wait_secs() -> u64 {
    5
}

fn default_companion_separator() -> String {
    "\n——\n".to_string()
}

fn default_companion_prompt_template() -> String {
    crate::companion::prompt::DEFAULT_PROMPT_TEMPLATE.to_string()
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default verbosity when RUST_LOG is unset (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DuetError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| DuetError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load the config from an explicit path, or the first default location that exists
    pub fn discover(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".duet").join("config.toml")),
            dirs::config_dir().map(|c| c.join("duet").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Apply the process environment on top of the file settings
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    ///
    /// Recognized keys: `API_BASE`, `PROXY_PORT`, `COMPANION_TEMPERATURE`,
    /// `COMPANION_MODEL`, `COMPANION_PROMPT_FILE`, `LOG_LEVEL`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = lookup("API_BASE") {
            self.proxy.api_base = api_base;
        }

        if let Some(port) = lookup("PROXY_PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| DuetError::Config(format!("Invalid PROXY_PORT '{port}': {e}")))?;
            let host = self
                .proxy
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.proxy.listen_addr = format!("{host}:{port}");
        }

        if let Some(temperature) = lookup("COMPANION_TEMPERATURE") {
            self.companion.temperature = temperature.trim().parse().map_err(|e| {
                DuetError::Config(format!("Invalid COMPANION_TEMPERATURE '{temperature}': {e}"))
            })?;
        }

        if let Some(model) = lookup("COMPANION_MODEL") {
            self.companion.model = Some(model);
        }

        if let Some(prompt_file) = lookup("COMPANION_PROMPT_FILE") {
            self.companion.prompt_file = Some(PathBuf::from(prompt_file));
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        Ok(())
    }

    /// Replace the inline prompt template with the prompt file, if one is configured
    pub fn resolve_prompt_file(&mut self) -> Result<()> {
        let Some(path) = &self.companion.prompt_file else {
            return Ok(());
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            DuetError::Config(format!(
                "Failed to read companion prompt file {}: {}",
                path.display(),
                e
            ))
        })?;
        self.companion.prompt_template = content.trim().to_string();
        Ok(())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        let api_base = Url::parse(&self.proxy.api_base).map_err(|e| {
            DuetError::Config(format!("Invalid api_base '{}': {e}", self.proxy.api_base))
        })?;
        if api_base.scheme() != "http" && api_base.scheme() != "https" {
            return Err(DuetError::Config(format!(
                "Unsupported api_base scheme '{}': only http and https are allowed",
                api_base.scheme()
            )));
        }

        if !(0.0..=2.0).contains(&self.companion.temperature) {
            return Err(DuetError::Config(format!(
                "Companion temperature {} is outside 0.0..=2.0",
                self.companion.temperature
            )));
        }

        if self.companion.wait_secs == 0 || self.companion.timeout_secs == 0 {
            return Err(DuetError::Config(
                "Companion wait_secs and timeout_secs must be positive".to_string(),
            ));
        }

        if self.proxy.timeout_secs == 0 || self.proxy.idle_timeout_secs == 0 {
            return Err(DuetError::Config(
                "Proxy timeout_secs and idle_timeout_secs must be positive".to_string(),
            ));
        }

        if !self.companion.prompt_template.contains(USER_TEXT_PLACEHOLDER) {
            tracing::warn!(
                "Companion prompt template has no {USER_TEXT_PLACEHOLDER} placeholder; \
                 every companion call will send the same prompt"
            );
        }

        Ok(())
    }
}
