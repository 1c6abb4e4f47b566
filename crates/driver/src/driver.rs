use async_trait::async_trait;
use chatpilot_core::Result;
use tokio::time::Instant;

/// One automated chat UI. Implementations are driven by a single caller at
/// a time; the owning session serializes access.
#[async_trait]
pub trait ChatDriver: Send {
    /// Start a fresh conversation, optionally selecting a model.
    async fn open_new_chat(&mut self, model: Option<&str>) -> Result<()>;

    /// Submit `prompt` and wait for the rendered reply. Returns the reply
    /// fragments, or the error bubble text when one appears. Waiting past
    /// `deadline` fails with a timeout error.
    async fn send_message(
        &mut self,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<String>>;

    /// Submit `prompt` without waiting for the reply; returns the
    /// conversation id assigned by the remote service.
    async fn send_prompt(&mut self, prompt: &str) -> Result<String>;

    /// Close the browser and release its resources. Safe to call twice.
    async fn quit(&mut self) -> Result<()>;
}

/// Creates drivers on demand.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn ChatDriver>>;
}
