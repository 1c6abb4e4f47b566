//! Streaming-completion detection.
//!
//! A reply is rendered incrementally, so "done" is inferred from the page:
//! the text must stop changing for a settle window while neither the busy
//! indicator nor the trailing cursor glyph is present. A visible error
//! bubble ends detection immediately.

use async_trait::async_trait;
use chatpilot_core::{BrowserConfig, Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One sample of the reply area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub error_visible: bool,
    pub busy: bool,
    pub snapshot: String,
}

/// Why a sample could not be taken.
#[derive(Debug)]
pub enum ProbeError {
    /// The page changed under the read (detached node, re-render). Retried.
    Stale(String),
    /// Anything else. Propagated.
    Failed(Error),
}

impl From<Error> for ProbeError {
    fn from(e: Error) -> Self {
        ProbeError::Failed(e)
    }
}

/// Source of observations, normally backed by the live page.
#[async_trait]
pub trait OutputProbe: Send {
    async fn observe(&mut self) -> std::result::Result<Observation, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The reply stopped changing; carries the final snapshot.
    Settled(String),
    /// An error bubble appeared.
    ErrorVisible,
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    poll_interval: Duration,
    settle: Duration,
    cursor_marker: String,
}

impl CompletionDetector {
    pub fn new(poll_interval: Duration, settle: Duration) -> Self {
        Self {
            poll_interval,
            settle,
            cursor_marker: "▍".to_string(),
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(config.poll_interval(), config.stream_settle())
            .with_cursor_marker(&config.cursor_marker)
    }

    pub fn with_cursor_marker(mut self, marker: &str) -> Self {
        self.cursor_marker = marker.to_string();
        self
    }

    fn shows_cursor(&self, snapshot: &str) -> bool {
        !self.cursor_marker.is_empty() && snapshot.trim_end().ends_with(&self.cursor_marker)
    }

    /// Poll `probe` until the reply settles, an error shows, or `deadline`
    /// passes.
    pub async fn wait<P>(&self, probe: &mut P, deadline: Option<Instant>) -> Result<Completion>
    where
        P: OutputProbe + ?Sized,
    {
        let mut last = String::new();
        let mut stable_since = Instant::now();
        let mut samples: u64 = 0;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(format!(
                        "reply did not settle after {} samples",
                        samples
                    )));
                }
            }

            let obs = match probe.observe().await {
                Ok(obs) => obs,
                Err(ProbeError::Stale(reason)) => {
                    debug!(reason = %reason, "Stale read while waiting for reply, retrying");
                    tokio::time::sleep(self.poll_interval / 2).await;
                    continue;
                }
                Err(ProbeError::Failed(e)) => return Err(e),
            };
            samples += 1;

            if obs.error_visible {
                debug!(samples, "Error bubble visible, stopping detection");
                return Ok(Completion::ErrorVisible);
            }

            let now = Instant::now();
            if obs.snapshot.trim().is_empty() {
                last.clear();
                stable_since = now;
            } else if obs.busy || self.shows_cursor(&obs.snapshot) || obs.snapshot != last {
                trace!(busy = obs.busy, len = obs.snapshot.len(), "Reply still changing");
                last = obs.snapshot;
                stable_since = now;
            } else if now.duration_since(stable_since) >= self.settle {
                debug!(samples, len = last.len(), "Reply settled");
                return Ok(Completion::Settled(last));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
