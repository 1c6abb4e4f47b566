use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Category of a reply as decided by the classifier.
///
/// The string forms are stable and used in config, logs and serialized results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// A normal assistant answer.
    None,
    /// Transient failure; retried up to the configured bound.
    Network,
    /// Prompt rejected as too large. Terminal.
    Length,
    /// Unclassified failure. Terminal.
    Generic,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::None => "none",
            ErrorType::Network => "network",
            ErrorType::Length => "length",
            ErrorType::Generic => "generic",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorType::Network => true,
            ErrorType::None | ErrorType::Length | ErrorType::Generic => false,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ErrorType::None),
            "network" => Ok(ErrorType::Network),
            "length" => Ok(ErrorType::Length),
            "generic" => Ok(ErrorType::Generic),
            other => Err(format!("unknown error type '{}'", other)),
        }
    }
}

/// Status of the newest node in a backend conversation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Pending,
    FinishedSuccessfully,
    FinishedOther,
}

impl CompletionStatus {
    pub fn from_wire(status: Option<&str>) -> Self {
        match status {
            Some("finished_successfully") => CompletionStatus::FinishedSuccessfully,
            Some("in_progress") | None => CompletionStatus::Pending,
            Some(_) => CompletionStatus::FinishedOther,
        }
    }
}

/// How a session learns that a submitted prompt has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStrategy {
    /// Watch the rendered page until the reply settles.
    #[default]
    Direct,
    /// Submit, release the browser, then poll the conversation API.
    Polling,
}

impl FromStr for CompletionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "dom" => Ok(CompletionStrategy::Direct),
            "polling" | "backend" => Ok(CompletionStrategy::Polling),
            other => Err(format!("unknown completion strategy '{}'", other)),
        }
    }
}

/// A single prompt submission as handed over by a front end.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub timeout: Duration,
    /// Incremental delivery is never offered; requests asking for it are rejected.
    pub stream: bool,
}

impl AskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            timeout: Duration::from_secs(7_200),
            stream: false,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AskResult {
    pub session_id: String,
    pub fragments: Vec<String>,
}

impl AskResult {
    /// Fragments joined the way front ends present a single reply.
    pub fn joined(&self) -> String {
        self.fragments.concat().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_string_forms_are_stable() {
        for kind in [
            ErrorType::None,
            ErrorType::Network,
            ErrorType::Length,
            ErrorType::Generic,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<ErrorType>().unwrap(), kind);
        }
        assert!("timeout".parse::<ErrorType>().is_err());
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(ErrorType::Network.is_retryable());
        assert!(!ErrorType::Length.is_retryable());
        assert!(!ErrorType::Generic.is_retryable());
        assert!(!ErrorType::None.is_retryable());
    }

    #[test]
    fn test_completion_status_from_wire() {
        assert_eq!(
            CompletionStatus::from_wire(Some("finished_successfully")),
            CompletionStatus::FinishedSuccessfully
        );
        assert_eq!(CompletionStatus::from_wire(None), CompletionStatus::Pending);
        assert_eq!(
            CompletionStatus::from_wire(Some("finished_partial_completion")),
            CompletionStatus::FinishedOther
        );
    }

    #[test]
    fn test_ask_result_joined_and_camel_case() {
        let result = AskResult {
            session_id: "s1".into(),
            fragments: vec!["Hello ".into(), "world\n".into()],
        };
        assert_eq!(result.joined(), "Hello world");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sessionId"], "s1");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("polling".parse::<CompletionStrategy>().unwrap(), CompletionStrategy::Polling);
        assert_eq!(" Direct ".parse::<CompletionStrategy>().unwrap(), CompletionStrategy::Direct);
        assert!("magic".parse::<CompletionStrategy>().is_err());
    }
}
