//! Classification of the final reply fragment into an [`ErrorType`].
//!
//! Error bubbles in the chat UI are short, fixed sentences. Anything longer
//! than the configured ceiling is a real answer, whatever it says.

use chatpilot_core::{ClassifierConfig, ErrorType};
use std::collections::HashSet;

pub const DEFAULT_NETWORK_PHRASES: &[&str] = &["a network error occurred", "network error"];

pub const DEFAULT_LENGTH_PHRASES: &[&str] = &[
    "the message you submitted was too long",
    "message too long",
    "the message you submitted was too long, please reload the conversation and submit something shorter",
];

const DEFAULT_MAX_ERROR_CHARS: usize = 180;

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_error_chars: usize,
    network: HashSet<String>,
    length: HashSet<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig {
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
            extra_network_phrases: Vec::new(),
            extra_length_phrases: Vec::new(),
        })
    }
}

impl ErrorClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let phrases = |defaults: &[&str], extra: &[String]| -> HashSet<String> {
            defaults
                .iter()
                .map(|p| canonicalize(p))
                .chain(extra.iter().map(|p| canonicalize(p)))
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            max_error_chars: config.max_error_chars,
            network: phrases(DEFAULT_NETWORK_PHRASES, &config.extra_network_phrases),
            length: phrases(DEFAULT_LENGTH_PHRASES, &config.extra_length_phrases),
        }
    }

    /// Classify a reply by its last fragment.
    pub fn classify(&self, fragments: &[String]) -> ErrorType {
        let Some(last) = fragments.last() else {
            return ErrorType::Generic;
        };
        let last = last.trim();
        if last.chars().count() > self.max_error_chars {
            return ErrorType::None;
        }

        let canon = canonicalize(last);
        if self.length.contains(&canon) {
            ErrorType::Length
        } else if self.network.contains(&canon) {
            ErrorType::Network
        } else {
            ErrorType::None
        }
    }
}

/// Classify with the built-in phrase tables.
pub fn classify(fragments: &[String]) -> ErrorType {
    ErrorClassifier::default().classify(fragments)
}

fn canonicalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .trim_end_matches(['.', '!', ' '])
        .to_string()
}
