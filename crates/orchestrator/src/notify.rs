use async_trait::async_trait;
use std::io::Write;
use tracing::debug;

/// Told when a reply has been delivered. Runs detached from the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reply_ready(&self, session_id: &str);
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

#[async_trait]
impl Notifier for TerminalBell {
    async fn reply_ready(&self, session_id: &str) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            debug!(session_id, error = %e, "Terminal bell failed");
        }
    }
}
