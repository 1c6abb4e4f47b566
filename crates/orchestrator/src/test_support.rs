//! Scripted driver and factory shared by the session and pool tests.

use async_trait::async_trait;
use chatpilot_core::{Error, Result};
use chatpilot_driver::{ChatDriver, DriverFactory};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Observable side effects of every driver a factory hands out.
#[derive(Default)]
pub struct DriverLog {
    pub launches: AtomicUsize,
    pub new_chats: AtomicUsize,
    pub sends: AtomicUsize,
    pub completed: AtomicUsize,
    pub quits: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub deadlines: Mutex<Vec<Option<Instant>>>,
    replies: Mutex<VecDeque<Result<Vec<String>>>>,
}

impl DriverLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_reply(&self, reply: Result<Vec<String>>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_text(&self, text: &str) {
        self.push_reply(Ok(vec![text.to_string()]));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Result<Vec<String>> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec!["default answer".to_string()]))
    }
}

pub struct FakeDriver {
    log: Arc<DriverLog>,
    reply_delay: Duration,
    conversation_id: String,
}

impl FakeDriver {
    pub fn new(log: Arc<DriverLog>) -> Self {
        Self {
            log,
            reply_delay: Duration::ZERO,
            conversation_id: "conv-1".to_string(),
        }
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}

#[async_trait]
impl ChatDriver for FakeDriver {
    async fn open_new_chat(&mut self, _model: Option<&str>) -> Result<()> {
        self.log.new_chats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(
        &mut self,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<String>> {
        self.log.sends.fetch_add(1, Ordering::SeqCst);
        self.log.prompts.lock().unwrap().push(prompt.to_string());
        self.log.deadlines.lock().unwrap().push(deadline);
        if !self.reply_delay.is_zero() {
            let ready_at = Instant::now() + self.reply_delay;
            match deadline {
                Some(deadline) if deadline < ready_at => {
                    tokio::time::sleep_until(deadline).await;
                    return Err(Error::Timeout("reply still streaming".to_string()));
                }
                _ => tokio::time::sleep_until(ready_at).await,
            }
        }
        let reply = self.log.next_reply();
        self.log.completed.fetch_add(1, Ordering::SeqCst);
        reply
    }

    async fn send_prompt(&mut self, prompt: &str) -> Result<String> {
        self.log.sends.fetch_add(1, Ordering::SeqCst);
        self.log.prompts.lock().unwrap().push(prompt.to_string());
        self.log.completed.fetch_add(1, Ordering::SeqCst);
        Ok(self.conversation_id.clone())
    }

    async fn quit(&mut self) -> Result<()> {
        self.log.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeFactory {
    pub log: Arc<DriverLog>,
    pub launch_delay: Duration,
    pub reply_delay: Duration,
    pub fail_launch: bool,
}

impl FakeFactory {
    pub fn new(log: Arc<DriverLog>) -> Self {
        Self {
            log,
            launch_delay: Duration::ZERO,
            reply_delay: Duration::ZERO,
            fail_launch: false,
        }
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn launch(&self) -> Result<Box<dyn ChatDriver>> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch {
            return Err(Error::Driver("browser not found".to_string()));
        }
        Ok(Box::new(
            FakeDriver::new(self.log.clone()).with_reply_delay(self.reply_delay),
        ))
    }
}
