//! Lazily created, shared session with sync and async entry points.

use crate::session::{Session, SessionSettings};
use chatpilot_core::{AskRequest, AskResult, Error, Result};
use chatpilot_driver::DriverFactory;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes every request onto one [`Session`], created on first use.
pub struct SessionPool {
    factory: Arc<dyn DriverFactory>,
    settings: SessionSettings,
    slot: RwLock<Option<Arc<Session>>>,
    /// Serializes creation and teardown of the session in `slot`.
    create_lock: Mutex<()>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn DriverFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            slot: RwLock::new(None),
            create_lock: Mutex::new(()),
        }
    }

    /// The live session, if one has been created.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, session: Option<Arc<Session>>) -> Option<Arc<Session>> {
        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, session)
    }

    /// Return the session, launching a driver for it on first use.
    pub async fn session(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let driver = self.factory.launch().await?;
        let session = Arc::new(Session::new(driver, self.settings.clone()));
        info!(session_id = %session.id(), "Session created");
        self.replace(Some(session.clone()));
        Ok(session)
    }

    /// Ask on the shared session, awaited in place by the caller.
    pub async fn ask(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<AskResult> {
        let session = self.session().await?;
        let fragments = session.ask(prompt, model, timeout).await?;
        Ok(AskResult {
            session_id: session.id().to_string(),
            fragments,
        })
    }

    /// Blocking variant for threads outside the runtime. Must not be called
    /// from within an async context.
    pub fn ask_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<AskResult> {
        handle.block_on(self.ask(prompt, model, timeout))
    }

    /// Run the ask on its own task. When `cancel` fires the caller stops
    /// waiting, but the browser interaction still runs to completion.
    pub async fn ask_async(
        self: &Arc<Self>,
        prompt: String,
        model: Option<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<AskResult> {
        let pool = Arc::clone(self);
        let task = tokio::spawn(async move { pool.ask(&prompt, model.as_deref(), timeout).await });

        tokio::select! {
            joined = task => joined.map_err(|e| Error::Other(format!("ask task failed: {}", e)))?,
            _ = cancel.cancelled() => {
                info!("Caller stopped waiting, ask continues in background");
                Err(Error::Cancelled("caller stopped waiting".to_string()))
            }
        }
    }

    /// Front-end entry point. Incremental delivery is not supported.
    pub async fn submit(self: &Arc<Self>, request: AskRequest) -> Result<AskResult> {
        if request.stream {
            return Err(Error::StreamingUnsupported);
        }
        self.ask_async(
            request.prompt,
            request.model,
            request.timeout,
            CancellationToken::new(),
        )
        .await
    }

    /// Shut the session down and empty the pool.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.create_lock.lock().await;
        match self.replace(None) {
            Some(session) => session.shutdown().await,
            None => Ok(()),
        }
    }

    /// Shut the session down if it has not been used for `idle_limit`.
    /// Returns whether it was reclaimed; the next ask recreates it.
    pub async fn reap_idle(&self, idle_limit: Duration) -> Result<bool> {
        let _guard = self.create_lock.lock().await;
        let Some(session) = self.current() else {
            return Ok(false);
        };
        if session.is_busy() {
            debug!(
                session_id = %session.id(),
                in_flight = session.in_flight(),
                "Session busy, not reclaiming"
            );
            return Ok(false);
        }
        if session.idle_for() < idle_limit {
            return Ok(false);
        }

        self.replace(None);
        info!(
            session_id = %session.id(),
            idle_secs = session.idle_for().as_secs(),
            "Reclaiming idle session"
        );
        session.shutdown().await?;
        Ok(true)
    }
}

/// Periodically reclaim the pool's session once it has been idle for
/// `idle_limit`. Stops when `cancel` fires.
pub fn spawn_idle_reaper(
    pool: Arc<SessionPool>,
    check_every: Duration,
    idle_limit: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Idle reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = pool.reap_idle(idle_limit).await {
                        warn!(error = %e, "Idle session shutdown failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DriverLog, FakeFactory};
    use async_trait::async_trait;
    use chatpilot_backend::{BackendPoller, ConversationSource};
    use chatpilot_core::CompletionStrategy;
    use serde_json::{json, Value};

    const LONG: Duration = Duration::from_secs(7200);

    fn pool_with(factory: FakeFactory) -> Arc<SessionPool> {
        Arc::new(SessionPool::new(Arc::new(factory), SessionSettings::default()))
    }

    #[tokio::test]
    async fn test_ask_creates_session_once() {
        let log = DriverLog::new();
        let pool = pool_with(FakeFactory::new(log.clone()));
        let first = pool.ask("one", None, LONG).await.unwrap();
        let second = pool.ask("two", None, LONG).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(DriverLog::count(&log.launches), 1);
        assert_eq!(DriverLog::count(&log.sends), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_one_driver() {
        let log = DriverLog::new();
        let mut factory = FakeFactory::new(log.clone());
        factory.launch_delay = Duration::from_millis(50);
        let pool = pool_with(factory);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.ask(&format!("q{}", i), None, LONG).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().session_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(DriverLog::count(&log.launches), 1);
        assert_eq!(DriverLog::count(&log.sends), 8);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_pool_empty() {
        let log = DriverLog::new();
        let mut factory = FakeFactory::new(log.clone());
        factory.fail_launch = true;
        let pool = pool_with(factory);
        assert!(matches!(pool.ask("q", None, LONG).await, Err(Error::Driver(_))));
        assert!(pool.current().is_none());
    }

    #[tokio::test]
    async fn test_submit_rejects_streaming() {
        let log = DriverLog::new();
        let pool = pool_with(FakeFactory::new(log.clone()));
        let mut request = AskRequest::new("hi");
        request.stream = true;
        assert!(matches!(pool.submit(request).await, Err(Error::StreamingUnsupported)));
        assert_eq!(DriverLog::count(&log.launches), 0);
    }

    #[tokio::test]
    async fn test_submit_returns_fragments() {
        let log = DriverLog::new();
        log.push_text("answer");
        let pool = pool_with(FakeFactory::new(log.clone()));
        let result = pool
            .submit(AskRequest::new("hi").with_model(Some("gpt-4o".into())))
            .await
            .unwrap();
        assert_eq!(result.fragments, vec!["answer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_abort_ask() {
        let log = DriverLog::new();
        let mut factory = FakeFactory::new(log.clone());
        factory.reply_delay = Duration::from_secs(30);
        let pool = pool_with(factory);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = pool
            .ask_async("slow".into(), None, LONG, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(DriverLog::count(&log.completed), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(DriverLog::count(&log.completed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_empties_pool() {
        let log = DriverLog::new();
        let pool = pool_with(FakeFactory::new(log.clone()));
        pool.ask("q", None, LONG).await.unwrap();
        pool.shutdown().await.unwrap();
        pool.shutdown().await.unwrap();
        assert!(pool.current().is_none());
        assert_eq!(DriverLog::count(&log.quits), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_recreates_on_next_ask() {
        let log = DriverLog::new();
        let pool = pool_with(FakeFactory::new(log.clone()));
        let first = pool.ask("q", None, LONG).await.unwrap();

        assert!(!pool.reap_idle(Duration::from_secs(60)).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(pool.reap_idle(Duration::from_secs(60)).await.unwrap());
        assert!(pool.current().is_none());
        assert_eq!(DriverLog::count(&log.quits), 1);

        let second = pool.ask("q", None, LONG).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(DriverLog::count(&log.launches), 2);
    }

    /// Backend that takes `delay` to produce a finished reply.
    struct SlowSource(Duration);

    #[async_trait]
    impl ConversationSource for SlowSource {
        async fn fetch(&self, _conversation_id: &str) -> Result<Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!({
                "mapping": {
                    "n1": {"message": {
                        "author": {"role": "assistant"},
                        "status": "finished_successfully",
                        "content": {"content_type": "text", "parts": ["late answer"]}
                    }}
                }
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_skips_ask_still_polling() {
        let log = DriverLog::new();
        let settings = SessionSettings {
            strategy: CompletionStrategy::Polling,
            poller: Some(BackendPoller::new(Arc::new(SlowSource(Duration::from_secs(120))))),
            ..Default::default()
        };
        let pool = Arc::new(SessionPool::new(
            Arc::new(FakeFactory::new(log.clone())),
            settings,
        ));

        let asker = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.ask("slow", None, LONG).await })
        };
        tokio::time::sleep(Duration::from_secs(61)).await;

        // The prompt was submitted 61s ago and the driver lock is free.
        assert!(!pool.reap_idle(Duration::from_secs(60)).await.unwrap());
        assert_eq!(DriverLog::count(&log.quits), 0);

        let result = asker.await.unwrap().unwrap();
        assert_eq!(result.fragments, vec!["late answer"]);

        // Idle time restarts when the ask returns.
        assert!(!pool.reap_idle(Duration::from_secs(60)).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(pool.reap_idle(Duration::from_secs(60)).await.unwrap());
        assert_eq!(DriverLog::count(&log.quits), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_reaper_task() {
        let log = DriverLog::new();
        let pool = pool_with(FakeFactory::new(log.clone()));
        pool.ask("q", None, LONG).await.unwrap();

        let cancel = CancellationToken::new();
        let reaper = spawn_idle_reaper(
            pool.clone(),
            Duration::from_secs(10),
            Duration::from_secs(30),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(pool.current().is_none());
        cancel.cancel();
        reaper.await.unwrap();
    }

    #[test]
    fn test_ask_blocking_outside_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let log = DriverLog::new();
        log.push_text("blocking answer");
        let pool = SessionPool::new(
            Arc::new(FakeFactory::new(log.clone())),
            SessionSettings::default(),
        );
        let result = pool
            .ask_blocking(runtime.handle(), "hi", None, LONG)
            .unwrap();
        assert_eq!(result.joined(), "blocking answer");
    }
}
