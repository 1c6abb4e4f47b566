pub mod ask;
pub mod chat;
pub mod config_cmd;
pub mod poll;
pub mod status;

use chatpilot_core::{Config, Paths};
use chatpilot_driver::CdpDriverFactory;
use chatpilot_orchestrator::{SessionPool, SessionSettings};
use std::path::PathBuf;
use std::sync::Arc;

/// Where configuration lives for this invocation.
pub struct Context {
    pub paths: Paths,
    pub config_path: PathBuf,
}

impl Context {
    pub fn new(config_override: Option<PathBuf>) -> Self {
        let paths = Paths::new();
        let config_path = config_override.unwrap_or_else(|| paths.config_file());
        Self { paths, config_path }
    }

    /// File values (or defaults) with `CHATPILOT_*` overrides applied.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = if self.config_path.exists() {
            Config::load(&self.config_path)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Pool backed by a real browser.
pub fn build_pool(config: &Config, paths: &Paths) -> anyhow::Result<Arc<SessionPool>> {
    config.validate()?;
    let factory = CdpDriverFactory::new(config.browser.clone(), paths.clone());
    Ok(Arc::new(SessionPool::new(
        Arc::new(factory),
        SessionSettings::from_config(config),
    )))
}
