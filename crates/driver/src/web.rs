//! Chat driver backed by a real browser over CDP.

use crate::cdp::{CdpClient, EvalOutcome, MODIFIER_SHIFT};
use crate::completion::{Completion, CompletionDetector, Observation, OutputProbe, ProbeError};
use crate::driver::{ChatDriver, DriverFactory};
use crate::launcher::{self, BrowserProcess};
use crate::locators;
use async_trait::async_trait;
use chatpilot_core::{BrowserConfig, Error, Paths, Result, TypingMode};
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PASTE_PAUSE: Duration = Duration::from_millis(50);

pub struct CdpChatDriver {
    config: BrowserConfig,
    detector: CompletionDetector,
    cdp: Option<CdpClient>,
    process: Option<BrowserProcess>,
    /// Assistant blocks already on the page before the current prompt.
    prev_count: usize,
}

impl CdpChatDriver {
    /// Launch a browser and open the chat home page.
    pub async fn launch(config: &BrowserConfig, paths: &Paths) -> Result<Self> {
        let (process, cdp) = launcher::launch(config, paths).await?;
        let mut driver = Self {
            config: config.clone(),
            detector: CompletionDetector::from_config(config),
            cdp: Some(cdp),
            process: Some(process),
            prev_count: 0,
        };
        if let Err(e) = driver.open_home().await {
            let _ = driver.quit().await;
            return Err(e);
        }
        Ok(driver)
    }

    async fn open_home(&mut self) -> Result<()> {
        let home = self.config.home_url.clone();
        self.cdp()?.navigate(&home).await?;
        if self.config.auto_login {
            self.log_in().await?;
        }
        if let Err(e) = self
            .wait_for("chat composer", &locators::prompt_ready_script())
            .await
        {
            // A login wall keeps the composer hidden; later calls will fail
            // with a clearer error.
            warn!(url = %home, error = %e, "Chat composer not visible after launch");
        }
        self.prev_count = self.count_blocks().await.unwrap_or(0);
        info!(url = %home, "Chat page opened");
        Ok(())
    }

    /// Fill the two-step email/password form with the configured account.
    async fn log_in(&self) -> Result<()> {
        let credentials = &self.config.credentials;
        if !credentials.is_complete() {
            return Err(Error::Config(
                "auto login enabled but credentials are missing".to_string(),
            ));
        }

        let steps = [
            (
                "email",
                locators::EMAIL_INPUT_ID,
                locators::EMAIL_CONTINUE_XPATH,
                credentials.email.as_str(),
            ),
            (
                "password",
                locators::PASSWORD_INPUT_ID,
                locators::PASSWORD_CONTINUE_XPATH,
                credentials.password.as_str(),
            ),
        ];
        for (what, field_id, continue_xpath, value) in steps {
            self.wait_for(&format!("{} field", what), &locators::field_visible_script(field_id))
                .await?;
            self.type_into(field_id, value).await?;
            self.wait_for(
                &format!("{} continue button", what),
                &locators::click_xpath_script(continue_xpath),
            )
            .await?;
            debug!(step = what, "Login step submitted");
        }
        info!(email = %credentials.email, "Logged in");
        Ok(())
    }

    fn cdp(&self) -> Result<&CdpClient> {
        self.cdp
            .as_ref()
            .ok_or_else(|| Error::Driver("browser already closed".to_string()))
    }

    /// Poll `script` until it evaluates to `true` within the explicit timeout.
    async fn wait_for(&self, what: &str, script: &str) -> Result<()> {
        let cdp = self.cdp()?;
        let timeout = self.config.explicit_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let EvalOutcome::Value(Value::Bool(true)) = cdp.evaluate(script).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Driver(format!(
                    "timed out after {}s waiting for {}",
                    timeout.as_secs(),
                    what
                )));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn count_blocks(&self) -> Result<usize> {
        let value = self
            .cdp()?
            .evaluate_value(&locators::count_blocks_script())
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn block_texts(&self, start: usize) -> Result<Vec<String>> {
        let value = self
            .cdp()?
            .evaluate_value(&locators::block_texts_script(start))
            .await?;
        Ok(string_array(&value))
    }

    async fn error_texts(&self) -> Result<Vec<String>> {
        let value = self
            .cdp()?
            .evaluate_value(&locators::error_texts_script())
            .await?;
        Ok(string_array(&value))
    }

    async fn type_prompt(&self, prompt: &str) -> Result<()> {
        self.type_into(locators::PROMPT_INPUT_ID, prompt).await
    }

    /// Focus the element with `field_id` and enter `text` in the configured
    /// typing mode.
    async fn type_into(&self, field_id: &str, text: &str) -> Result<()> {
        let cdp = self.cdp()?;
        if cdp.evaluate_value(&locators::focus_field_script(field_id)).await? != Value::Bool(true) {
            return Err(Error::Driver(format!("input #{} not found", field_id)));
        }

        let mode = self.config.typing_mode;
        debug!(mode = ?mode, field = field_id, chars = text.chars().count(), "Typing text");
        match mode {
            TypingMode::Paste => {
                for chunk in chunk_chars(text, self.config.paste_chunk_size) {
                    cdp.insert_text(chunk).await?;
                    tokio::time::sleep(PASTE_PAUSE).await;
                }
            }
            TypingMode::Fast | TypingMode::Human => {
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 {
                        // Plain Enter would submit the prompt early.
                        cdp.press_key("Enter", "Enter", MODIFIER_SHIFT).await?;
                    }
                    if mode == TypingMode::Fast {
                        if !line.is_empty() {
                            cdp.insert_text(line).await?;
                        }
                        continue;
                    }
                    for ch in line.chars() {
                        let mut buf = [0u8; 4];
                        cdp.insert_text(ch.encode_utf8(&mut buf)).await?;
                        tokio::time::sleep(self.key_delay()).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn key_delay(&self) -> Duration {
        let (lo, hi) = self.config.key_delay_range();
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    async fn submit(&self) -> Result<()> {
        self.wait_for("submit button", &locators::click_submit_script())
            .await
    }

    /// Wait until a new assistant block or an error bubble shows up.
    /// Returns true when an error bubble is visible.
    async fn wait_for_reply_start(&self) -> Result<bool> {
        let cdp = self.cdp()?;
        let timeout = self.config.explicit_timeout();
        let deadline = Instant::now() + timeout;
        let script = locators::reply_started_script();
        loop {
            if let EvalOutcome::Value(v) = cdp.evaluate(&script).await? {
                let count = v.get("count").and_then(|c| c.as_u64()).unwrap_or(0) as usize;
                let errors = v.get("errors").and_then(|c| c.as_u64()).unwrap_or(0);
                if errors > 0 {
                    return Ok(true);
                }
                if count > self.prev_count {
                    return Ok(false);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Driver(format!(
                    "no reply started within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

#[async_trait]
impl ChatDriver for CdpChatDriver {
    async fn open_new_chat(&mut self, model: Option<&str>) -> Result<()> {
        let url = new_chat_url(&self.config.home_url, model)?;
        self.cdp()?.navigate(&url).await?;
        self.wait_for("chat composer", &locators::prompt_ready_script())
            .await?;
        self.prev_count = self.count_blocks().await?;
        debug!(url = %url, prev_count = self.prev_count, "Opened new chat");
        Ok(())
    }

    async fn send_message(
        &mut self,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<String>> {
        self.type_prompt(prompt).await?;
        self.submit().await?;

        if self.wait_for_reply_start().await? {
            let errors = self.error_texts().await?;
            if !errors.is_empty() {
                warn!(error = %errors.join(" | "), "Error bubble before reply started");
                return Ok(errors);
            }
        }

        let start = self.prev_count;
        let completion = {
            let mut probe = DomProbe {
                cdp: self.cdp()?,
                start,
            };
            self.detector.wait(&mut probe, deadline).await?
        };

        let mut fragments = self.block_texts(start).await?;
        self.prev_count = self.count_blocks().await?;
        if completion == Completion::ErrorVisible {
            // The error text goes last so it is what gets classified.
            let errors = self.error_texts().await?;
            warn!(error = %errors.join(" | "), "Error bubble during reply");
            fragments.extend(errors);
        }
        fragments.retain(|f| !f.is_empty());
        Ok(fragments)
    }

    async fn send_prompt(&mut self, prompt: &str) -> Result<String> {
        self.type_prompt(prompt).await?;
        self.submit().await?;

        let cdp = self.cdp()?;
        let timeout = self.config.explicit_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let path = cdp.evaluate_value(locators::location_path_script()).await?;
            if let Some(id) = path.as_str().and_then(conversation_id_from_path) {
                debug!(conversation_id = %id, "Conversation id assigned");
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(Error::Driver(format!(
                    "no conversation id within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn quit(&mut self) -> Result<()> {
        if let Some(cdp) = self.cdp.take() {
            if let Err(e) = cdp.close_browser().await {
                debug!("Browser.close failed (may already be closed): {}", e);
            }
        }
        if let Some(mut process) = self.process.take() {
            process.shutdown().await;
            info!(port = process.debug_port, "Browser stopped");
        }
        Ok(())
    }
}

/// Samples the reply area through one page script per observation.
struct DomProbe<'a> {
    cdp: &'a CdpClient,
    start: usize,
}

#[async_trait]
impl<'a> OutputProbe for DomProbe<'a> {
    async fn observe(&mut self) -> std::result::Result<Observation, ProbeError> {
        match self.cdp.evaluate(&locators::observe_script(self.start)).await? {
            EvalOutcome::Exception(text) => Err(ProbeError::Stale(text)),
            EvalOutcome::Value(value) => parse_observation(&value)
                .ok_or_else(|| ProbeError::Stale(format!("unexpected observation: {}", value))),
        }
    }
}

fn parse_observation(value: &Value) -> Option<Observation> {
    let obj = value.as_object()?;
    Some(Observation {
        error_visible: obj.get("error").and_then(|v| v.as_bool()).unwrap_or(false),
        busy: obj.get("busy").and_then(|v| v.as_bool()).unwrap_or(false),
        snapshot: string_array(obj.get("texts")?).join("\n"),
    })
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn new_chat_url(home: &str, model: Option<&str>) -> Result<String> {
    let mut url = url::Url::parse(home)
        .map_err(|e| Error::Config(format!("invalid home url '{}': {}", home, e)))?;
    if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
        url.query_pairs_mut().append_pair("model", model);
    }
    Ok(url.to_string())
}

/// Extract the conversation id from a `/c/<id>` page path.
fn conversation_id_from_path(path: &str) -> Option<String> {
    let re = Regex::new(r"/c/([A-Za-z0-9-]+)").ok()?;
    re.captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Split `text` into pieces of at most `size` characters.
fn chunk_chars(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Launches a [`CdpChatDriver`] per request.
pub struct CdpDriverFactory {
    config: BrowserConfig,
    paths: Paths,
}

impl CdpDriverFactory {
    pub fn new(config: BrowserConfig, paths: Paths) -> Self {
        Self { config, paths }
    }
}

#[async_trait]
impl DriverFactory for CdpDriverFactory {
    async fn launch(&self) -> Result<Box<dyn ChatDriver>> {
        let driver = CdpChatDriver::launch(&self.config, &self.paths).await?;
        Ok(Box::new(driver))
    }
}
