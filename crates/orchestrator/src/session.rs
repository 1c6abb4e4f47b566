//! One automated browser and the ask-with-retry protocol run on it.

use crate::classifier::ErrorClassifier;
use crate::notify::{Notifier, TerminalBell};
use chatpilot_backend::BackendPoller;
use chatpilot_core::{CompletionStrategy, Config, Error, ErrorType, Result};
use chatpilot_driver::ChatDriver;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const UNEXPECTED_FAILURE: &str = "unexpected failure";

/// Everything a session needs besides its driver. Cloned into each new
/// session the pool creates.
#[derive(Clone)]
pub struct SessionSettings {
    pub strategy: CompletionStrategy,
    /// Extra attempts after a network-class failure.
    pub network_error_retries: u32,
    /// Base delay between attempts; doubled per attempt, capped at 16x.
    pub retry_delay: Duration,
    pub tag_prompts: bool,
    pub backend_poll_interval: Duration,
    pub classifier: ErrorClassifier,
    pub poller: Option<BackendPoller>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            strategy: CompletionStrategy::Direct,
            network_error_retries: 2,
            retry_delay: Duration::ZERO,
            tag_prompts: true,
            backend_poll_interval: Duration::from_secs(1),
            classifier: ErrorClassifier::default(),
            poller: None,
            notifier: None,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let poller = (config.session.strategy == CompletionStrategy::Polling)
            .then(|| BackendPoller::from_config(&config.backend, &config.browser.home_url));
        let notifier: Option<Arc<dyn Notifier>> = config
            .notify
            .enabled
            .then(|| Arc::new(TerminalBell) as Arc<dyn Notifier>);
        Self {
            strategy: config.session.strategy,
            network_error_retries: config.session.network_error_retries,
            retry_delay: Duration::from_millis(config.session.retry_delay_ms),
            tag_prompts: config.session.tag_prompts,
            backend_poll_interval: config.backend.poll_interval(),
            classifier: ErrorClassifier::from_config(&config.classifier),
            poller,
            notifier,
        }
    }
}

pub struct Session {
    id: String,
    driver: Mutex<Box<dyn ChatDriver>>,
    last_used_at: std::sync::Mutex<Instant>,
    /// Asks between entry and return, including backend polling that runs
    /// without the driver lock.
    in_flight: AtomicUsize,
    closed: AtomicBool,
    settings: SessionSettings,
}

/// Counts one ask for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session {
    pub fn new(driver: Box<dyn ChatDriver>, settings: SessionSettings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            driver: Mutex::new(driver),
            last_used_at: std::sync::Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_used_at(&self) -> Instant {
        *self
            .last_used_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_used_at())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// True while an ask is running or some caller holds the driver.
    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0 || self.driver.try_lock().is_err()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Session(format!("session {} is shut down", self.id)));
        }
        Ok(())
    }

    fn touch(&self) {
        *self
            .last_used_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    /// Send `prompt` in a fresh conversation and return the reply fragments.
    ///
    /// Network-class failures and unexpected driver errors are retried up to
    /// `network_error_retries` extra times. `timeout` bounds the whole call,
    /// lock waits included.
    pub async fn ask(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        self.ensure_open()?;
        let _in_flight = InFlight::enter(&self.in_flight);
        let deadline = Instant::now() + timeout;
        let result = match tokio::time::timeout_at(
            deadline,
            self.ask_with_retry(prompt, model, deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no reply within {}s",
                timeout.as_secs()
            ))),
        };
        self.touch();
        result
    }

    async fn ask_with_retry(
        &self,
        prompt: &str,
        model: Option<&str>,
        deadline: Instant,
    ) -> Result<Vec<String>> {
        let max_retries = self.settings.network_error_retries;
        let base_delay = self.settings.retry_delay;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 && !base_delay.is_zero() {
                let delay = base_delay * (1u32 << (attempt - 1).min(4));
                warn!(
                    session_id = %self.id,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying ask after transient error"
                );
                tokio::time::sleep(delay).await;
            }

            let fragments = match self.attempt(prompt, model, deadline).await {
                Ok(fragments) => fragments,
                Err(e) if e.is_timeout() => return Err(e),
                Err(e @ Error::Session(_)) => {
                    warn!(session_id = %self.id, attempt, "Session shut down during ask");
                    return Err(e);
                }
                Err(e) => {
                    error!(session_id = %self.id, attempt, max_retries, error = %e, "Unexpected failure during ask");
                    last_error = Some(Error::terminal(ErrorType::Generic, UNEXPECTED_FAILURE));
                    continue;
                }
            };

            let last = fragments
                .last()
                .map(|f| f.trim().to_string())
                .unwrap_or_else(|| "empty reply".to_string());
            match self.settings.classifier.classify(&fragments) {
                ErrorType::None => {
                    if attempt > 0 {
                        info!(session_id = %self.id, attempt, "Ask succeeded after retry");
                    }
                    self.notify_reply_ready();
                    return Ok(fragments);
                }
                kind if kind.is_retryable() => {
                    warn!(session_id = %self.id, attempt, max_retries, kind = %kind, error = %last, "Retryable error reply");
                    last_error = Some(Error::terminal(kind, last));
                }
                kind => {
                    warn!(session_id = %self.id, kind = %kind, error = %last, "Terminal error reply, not retrying");
                    return Err(Error::terminal(kind, last));
                }
            }
        }

        let e = last_error
            .unwrap_or_else(|| Error::terminal(ErrorType::Generic, UNEXPECTED_FAILURE));
        warn!(session_id = %self.id, retries = max_retries, error = %e, "Ask failed after all retries");
        Err(e)
    }

    /// One round: fresh chat, submit, obtain reply.
    async fn attempt(
        &self,
        prompt: &str,
        model: Option<&str>,
        deadline: Instant,
    ) -> Result<Vec<String>> {
        self.ensure_open()?;
        match self.settings.strategy {
            CompletionStrategy::Direct => {
                let mut driver = self.driver.lock().await;
                self.ensure_open()?;
                self.touch();
                driver.open_new_chat(model).await?;
                driver.send_message(prompt, Some(deadline)).await
            }
            CompletionStrategy::Polling => {
                let poller = self.settings.poller.as_ref().ok_or_else(|| {
                    Error::Config("polling strategy requires a backend poller".to_string())
                })?;
                let tag = uuid::Uuid::new_v4().to_string();
                let text = if self.settings.tag_prompts {
                    tag_prompt(prompt, &tag)
                } else {
                    prompt.to_string()
                };

                // The driver is released once the prompt is in; polling runs
                // without it so the next caller can submit meanwhile.
                let conversation_id = {
                    let mut driver = self.driver.lock().await;
                    self.ensure_open()?;
                    self.touch();
                    driver.open_new_chat(model).await?;
                    driver.send_prompt(&text).await?
                };
                info!(
                    session_id = %self.id,
                    request_tag = %tag,
                    conversation_id = %conversation_id,
                    "Prompt submitted, polling backend"
                );

                let remaining = deadline.saturating_duration_since(Instant::now());
                let reply = poller
                    .wait_for_completion(
                        &conversation_id,
                        remaining,
                        self.settings.backend_poll_interval,
                    )
                    .await?;
                Ok(vec![reply])
            }
        }
    }

    fn notify_reply_ready(&self) {
        if let Some(notifier) = self.settings.notifier.clone() {
            let id = self.id.clone();
            tokio::spawn(async move {
                notifier.reply_ready(&id).await;
            });
        }
    }

    /// Quit the driver. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.id, "Session already shut down");
            return Ok(());
        }
        let mut driver = self.driver.lock().await;
        driver.quit().await?;
        info!(session_id = %self.id, "Session shut down");
        Ok(())
    }
}

/// Append the correlation marker matched against backend records.
pub fn tag_prompt(prompt: &str, tag: &str) -> String {
    format!("{}\n<chatName=\"Request\" uChatId=\"{}\"/>", prompt, tag)
}
