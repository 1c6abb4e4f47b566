pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{
    BackendConfig, BrowserConfig, ClassifierConfig, Config, Credentials, NotifyConfig,
    SessionConfig, TypingMode,
};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{AskRequest, AskResult, CompletionStatus, CompletionStrategy, ErrorType};
