use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::CompletionStrategy;

/// How prompt text is entered into the chat composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingMode {
    /// One character at a time with a random per-key delay.
    #[default]
    Human,
    /// One character at a time, no delay.
    Fast,
    /// Whole chunks inserted at once.
    Paste,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_home_url")]
    pub home_url: String,
    /// chrome | edge | chromium
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Persistent profile; a throwaway one is created when unset.
    #[serde(default)]
    pub profile_dir: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_explicit_timeout_secs")]
    pub explicit_timeout_secs: u64,
    #[serde(default)]
    pub typing_mode: TypingMode,
    #[serde(default = "default_key_delay_min_ms")]
    pub key_delay_min_ms: u64,
    #[serde(default = "default_key_delay_max_ms")]
    pub key_delay_max_ms: u64,
    #[serde(default = "default_paste_chunk_size")]
    pub paste_chunk_size: usize,
    /// How long the reply text must stay unchanged before it is trusted.
    #[serde(default = "default_stream_settle_ms")]
    pub stream_settle_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Glyph appended to text that is still streaming.
    #[serde(default = "default_cursor_marker")]
    pub cursor_marker: String,
    /// Sign in with `credentials` right after the browser starts.
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default)]
    pub credentials: Credentials,
}

/// Account used when `autoLogin` is enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

fn default_home_url() -> String {
    "https://chatgpt.com/".to_string()
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_explicit_timeout_secs() -> u64 {
    15
}

fn default_key_delay_min_ms() -> u64 {
    80
}

fn default_key_delay_max_ms() -> u64 {
    300
}

fn default_paste_chunk_size() -> usize {
    50_000
}

fn default_stream_settle_ms() -> u64 {
    800
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_cursor_marker() -> String {
    "▍".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            home_url: default_home_url(),
            engine: default_engine(),
            profile_dir: None,
            headless: false,
            explicit_timeout_secs: default_explicit_timeout_secs(),
            typing_mode: TypingMode::default(),
            key_delay_min_ms: default_key_delay_min_ms(),
            key_delay_max_ms: default_key_delay_max_ms(),
            paste_chunk_size: default_paste_chunk_size(),
            stream_settle_ms: default_stream_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cursor_marker: default_cursor_marker(),
            auto_login: false,
            credentials: Credentials::default(),
        }
    }
}

impl BrowserConfig {
    pub fn explicit_timeout(&self) -> Duration {
        Duration::from_secs(self.explicit_timeout_secs)
    }

    pub fn stream_settle(&self) -> Duration {
        Duration::from_millis(self.stream_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Key delay bounds, ordered so that `min <= max`.
    pub fn key_delay_range(&self) -> (u64, u64) {
        let lo = self.key_delay_min_ms.min(self.key_delay_max_ms);
        let hi = self.key_delay_min_ms.max(self.key_delay_max_ms);
        (lo, hi)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub strategy: CompletionStrategy,
    /// Extra attempts allowed after a network-class failure.
    #[serde(default = "default_network_error_retries")]
    pub network_error_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Embed a correlation marker in prompts sent with the polling strategy.
    #[serde(default = "default_tag_prompts")]
    pub tag_prompts: bool,
    /// Shut the browser down after this long without a request.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_network_error_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    7_200
}

fn default_tag_prompts() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: CompletionStrategy::default(),
            network_error_retries: default_network_error_retries(),
            retry_delay_ms: 0,
            default_timeout_secs: default_timeout_secs(),
            tag_prompts: default_tag_prompts(),
            idle_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_backend_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// None = follow environment, Some("") = force direct connect.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_api_base() -> String {
    "https://chatgpt.com/backend-api/conversation".to_string()
}

fn default_backend_poll_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            auth_token: String::new(),
            poll_interval_ms: default_backend_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            proxy: None,
        }
    }
}

impl BackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Replies longer than this are never treated as error bubbles.
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
    #[serde(default)]
    pub extra_network_phrases: Vec<String>,
    #[serde(default)]
    pub extra_length_phrases: Vec<String>,
}

fn default_max_error_chars() -> usize {
    180
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_error_chars: default_max_error_chars(),
            extra_network_phrases: Vec::new(),
            extra_length_phrases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    #[serde(default = "default_notify_enabled")]
    pub enabled: bool,
}

fn default_notify_enabled() -> bool {
    true
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_notify_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `CHATPILOT_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("CHATPILOT_AUTH_TOKEN") {
            self.backend.auth_token = token;
        }
        if let Some(dir) = lookup("CHATPILOT_PROFILE_DIR") {
            self.browser.profile_dir = Some(dir);
        }
        if let Some(raw) = lookup("CHATPILOT_HEADLESS") {
            self.browser.headless = parse_bool(&raw);
        }
        if let Some(raw) = lookup("CHATPILOT_AUTO_LOGIN") {
            self.browser.auto_login = parse_bool(&raw);
        }
        if let Some(email) = lookup("CHATPILOT_EMAIL") {
            self.browser.credentials.email = email;
        }
        if let Some(password) = lookup("CHATPILOT_PASSWORD") {
            self.browser.credentials.password = password;
        }
        if let Some(raw) = lookup("CHATPILOT_NETWORK_ERROR_RETRIES") {
            match raw.trim().parse() {
                Ok(n) => self.session.network_error_retries = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid CHATPILOT_NETWORK_ERROR_RETRIES"),
            }
        }
        if let Some(raw) = lookup("CHATPILOT_STRATEGY") {
            match raw.parse() {
                Ok(strategy) => self.session.strategy = strategy,
                Err(e) => warn!(error = %e, "Ignoring invalid CHATPILOT_STRATEGY"),
            }
        }
        debug!(strategy = ?self.session.strategy, "Configuration overrides applied");
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.strategy == CompletionStrategy::Polling
            && self.backend.auth_token.trim().is_empty()
        {
            return Err(Error::Config(
                "polling strategy requires backend.authToken (or CHATPILOT_AUTH_TOKEN)".to_string(),
            ));
        }
        if self.browser.auto_login && !self.browser.credentials.is_complete() {
            return Err(Error::Config(
                "browser.autoLogin requires credentials.email and credentials.password \
                 (or CHATPILOT_EMAIL / CHATPILOT_PASSWORD)"
                    .to_string(),
            ));
        }
        if self.browser.home_url.trim().is_empty() {
            return Err(Error::Config("browser.homeUrl must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
