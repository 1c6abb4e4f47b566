//! Completion polling against the conversation backend API.
//!
//! Instead of scraping the page, the conversation JSON is fetched until its
//! newest node is a finished assistant message with content.

use crate::client::build_http_client;
use async_trait::async_trait;
use chatpilot_core::{BackendConfig, CompletionStatus, Error, Result};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const BODY_SNIPPET_CHARS: usize = 300;

/// Fetches the raw conversation document for an id.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn fetch(&self, conversation_id: &str) -> Result<Value>;
}

/// Bearer-authenticated GET of `{api_base}/{id}`.
pub struct HttpConversationSource {
    client: Client,
    api_base: String,
    home_url: String,
    auth_token: String,
}

impl HttpConversationSource {
    pub fn new(config: &BackendConfig, home_url: &str) -> Self {
        let client = build_http_client(
            config.proxy.as_deref(),
            &config.api_base,
            config.request_timeout(),
        );
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            home_url: home_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        }
    }

    fn url(&self, conversation_id: &str) -> String {
        format!("{}/{}", self.api_base, conversation_id)
    }

    fn referer(&self, conversation_id: &str) -> String {
        format!("{}/c/{}", self.home_url, conversation_id)
    }
}

#[async_trait]
impl ConversationSource for HttpConversationSource {
    async fn fetch(&self, conversation_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(conversation_id))
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .header("Accept", "*/*")
            .header("Referer", self.referer(conversation_id))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        debug!(
            conversation_id,
            status = status.as_u16(),
            bytes = raw_body.len(),
            "Backend fetch"
        );

        if !status.is_success() {
            return Err(Error::Backend(format!(
                "HTTP {} for conversation {}: {}",
                status,
                conversation_id,
                snippet(&raw_body)
            )));
        }
        parse_body(&raw_body)
    }
}

/// Empty or non-JSON bodies mean the conversation is not ready yet.
pub fn parse_body(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Err(Error::NotReady("backend returned empty body".to_string()));
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::NotReady(format!(
            "backend body not valid JSON ({}): {}",
            e,
            snippet(raw)
        ))
    })
}

fn snippet(raw: &str) -> String {
    raw.chars()
        .take(BODY_SNIPPET_CHARS)
        .collect::<String>()
        .replace('\n', " ")
}

/// Text of a message `content` object.
pub fn extract_content(content: &Value) -> String {
    match content.get("content_type").and_then(|t| t.as_str()) {
        Some("text") => content
            .get("parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
            .trim()
            .to_string(),
        Some("execution_output") => content
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string(),
        // Interim reasoning nodes never count as the reply.
        Some("thoughts") => String::new(),
        _ if content.is_null() => String::new(),
        _ => content.to_string().trim().to_string(),
    }
}

/// Message of the most recently inserted node in `mapping`.
fn newest_message(conversation: &Value) -> Option<&Value> {
    conversation
        .get("mapping")?
        .as_object()?
        .values()
        .next_back()?
        .get("message")
        .filter(|m| m.is_object())
}

/// Role and completion status of the newest node, for progress logging.
pub fn newest_status(conversation: &Value) -> (Option<String>, CompletionStatus) {
    match newest_message(conversation) {
        Some(msg) => (
            msg.pointer("/author/role")
                .and_then(|r| r.as_str())
                .map(str::to_string),
            CompletionStatus::from_wire(msg.get("status").and_then(|s| s.as_str())),
        ),
        None => (None, CompletionStatus::Pending),
    }
}

/// The reply text if the newest node is a finished assistant message with
/// content.
pub fn finished_reply(conversation: &Value) -> Option<String> {
    let msg = newest_message(conversation)?;
    let status = CompletionStatus::from_wire(msg.get("status").and_then(|s| s.as_str()));
    if status != CompletionStatus::FinishedSuccessfully {
        return None;
    }
    if msg.pointer("/author/role").and_then(|r| r.as_str()) != Some("assistant") {
        return None;
    }
    let text = extract_content(msg.get("content").unwrap_or(&Value::Null));
    (!text.is_empty()).then_some(text)
}

#[derive(Clone)]
pub struct BackendPoller {
    source: Arc<dyn ConversationSource>,
}

impl BackendPoller {
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self { source }
    }

    pub fn from_config(config: &BackendConfig, home_url: &str) -> Self {
        Self::new(Arc::new(HttpConversationSource::new(config, home_url)))
    }

    pub async fn fetch(&self, conversation_id: &str) -> Result<Value> {
        self.source.fetch(conversation_id).await
    }

    /// Poll until the conversation has a finished assistant reply.
    pub async fn wait_for_completion(
        &self,
        conversation_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.source.fetch(conversation_id).await {
                Ok(conversation) => {
                    if let Some(reply) = finished_reply(&conversation) {
                        debug!(conversation_id, chars = reply.len(), "Backend reply finished");
                        return Ok(reply);
                    }
                    let (role, status) = newest_status(&conversation);
                    debug!(conversation_id, role = ?role, status = ?status, "Latest node");
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "Backend fetch failed, retrying");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }

        Err(Error::Timeout(format!(
            "No suitable assistant reply after {}s for conversation {}",
            timeout.as_secs(),
            conversation_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ConversationSource for ScriptedSource {
        async fn fetch(&self, _conversation_id: &str) -> Result<Value> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::NotReady("script exhausted".into())))
        }
    }

    fn node(role: &str, status: &str, content: Value) -> Value {
        json!({
            "message": {
                "author": {"role": role},
                "status": status,
                "content": content,
            }
        })
    }

    fn conversation(nodes: Vec<(&str, Value)>) -> Value {
        let mut mapping = serde_json::Map::new();
        for (id, n) in nodes {
            mapping.insert(id.to_string(), n);
        }
        json!({ "mapping": mapping })
    }

    fn text(parts: &[&str]) -> Value {
        json!({"content_type": "text", "parts": parts})
    }

    #[test]
    fn test_parse_body_not_ready() {
        assert!(matches!(parse_body(""), Err(Error::NotReady(_))));
        assert!(matches!(parse_body("  \n"), Err(Error::NotReady(_))));
        assert!(matches!(parse_body("<html>"), Err(Error::NotReady(_))));
        assert_eq!(parse_body(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_extract_content_types() {
        assert_eq!(extract_content(&text(&["Hello", "world "])), "Hello\nworld");
        assert_eq!(
            extract_content(&json!({"content_type": "execution_output", "text": " 42\n"})),
            "42"
        );
        assert_eq!(
            extract_content(&json!({"content_type": "thoughts", "thoughts": [{"summary": "x"}]})),
            ""
        );
        let other = json!({"content_type": "code", "text": "print(1)"});
        assert_eq!(extract_content(&other), other.to_string());
    }

    #[test]
    fn test_newest_node_wins_by_insertion_order() {
        let conv = conversation(vec![
            ("zzz", node("assistant", "finished_successfully", text(&["old"]))),
            ("aaa", node("assistant", "finished_successfully", text(&["new"]))),
        ]);
        assert_eq!(finished_reply(&conv).as_deref(), Some("new"));
    }

    #[test]
    fn test_thoughts_node_is_skipped() {
        let conv = conversation(vec![
            ("u", node("user", "finished_successfully", text(&["hi"]))),
            (
                "t",
                node(
                    "assistant",
                    "finished_successfully",
                    json!({"content_type": "thoughts", "thoughts": []}),
                ),
            ),
        ]);
        assert_eq!(finished_reply(&conv), None);
    }

    #[test]
    fn test_unfinished_or_user_node_is_skipped() {
        let streaming = conversation(vec![(
            "a",
            node("assistant", "in_progress", text(&["partial"])),
        )]);
        assert_eq!(finished_reply(&streaming), None);
        assert_eq!(newest_status(&streaming).1, CompletionStatus::Pending);

        let user = conversation(vec![("u", node("user", "finished_successfully", text(&["hi"])))]);
        assert_eq!(finished_reply(&user), None);

        assert_eq!(finished_reply(&json!({"mapping": {}})), None);
        assert_eq!(newest_status(&json!({})).1, CompletionStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_retries_until_finished() {
        let source = ScriptedSource::new(vec![
            Err(Error::NotReady("empty".into())),
            Err(Error::Backend("HTTP 502".into())),
            Ok(conversation(vec![(
                "a",
                node("assistant", "in_progress", text(&["par"])),
            )])),
            Ok(conversation(vec![(
                "a",
                node("assistant", "finished_successfully", text(&["done"])),
            )])),
        ]);
        let poller = BackendPoller::new(source.clone());
        let reply = poller
            .wait_for_completion("conv-1", Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "done");
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_conversation_id() {
        let source = ScriptedSource::new(vec![]);
        let poller = BackendPoller::new(source.clone());
        let err = poller
            .wait_for_completion("conv-9", Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("conv-9"));
        assert_eq!(source.calls(), 5);
    }

    #[test]
    fn test_http_source_urls() {
        let cfg = BackendConfig::default();
        let source = HttpConversationSource::new(&cfg, "https://chatgpt.com/");
        assert_eq!(
            source.url("abc"),
            "https://chatgpt.com/backend-api/conversation/abc"
        );
        assert_eq!(source.referer("abc"), "https://chatgpt.com/c/abc");
    }
}
