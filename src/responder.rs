use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::endpoint;
use crate::config::{ChatConfig, CompletionConfig, ResponderKind};
use crate::error::SyncError;
use crate::record::{ChatMessage, MessageRole};

/// What a generator sees when asked for a reply.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub user_message: ChatMessage,
    /// The session's messages as the screen knew them when the reply started.
    pub history: Vec<ChatMessage>,
}

/// A reply that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub role: MessageRole,
    pub content: String,
}

impl MessageDraft {
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            content: content.into(),
        }
    }

    pub fn payload(&self, session_id: &str) -> Value {
        serde_json::json!({
            "session_id": session_id,
            "role": self.role,
            "content": self.content,
        })
    }
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, context: &SessionContext) -> Result<MessageDraft, SyncError>;
}

/// Placeholder agent: answers every message by quoting it back.
pub struct EchoResponder;

impl EchoResponder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseGenerator for EchoResponder {
    async fn generate(&self, context: &SessionContext) -> Result<MessageDraft, SyncError> {
        Ok(MessageDraft::agent(format!(
            "I received your message: \"{}\". This is a simulated response; connect an agent backend for real replies.",
            context.user_message.content
        )))
    }
}

/// Replies through an OpenAI-compatible `/chat/completions` endpoint.
pub struct CompletionResponder {
    client: reqwest::Client,
    config: CompletionConfig,
}

fn completion_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Agent => "assistant",
        MessageRole::System => "system",
    }
}

fn completion_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                Value::Object(object) => object
                    .get("text")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn parse_completion_error_message(status: u16, payload: &Value) -> String {
    payload
        .get("error")
        .and_then(|error| error.get("message").or(Some(error)))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("completion request failed with status {status}"))
}

impl CompletionResponder {
    pub fn new(client: reqwest::Client, config: CompletionConfig) -> Self {
        Self { client, config }
    }

    fn build_messages(&self, context: &SessionContext) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(system_prompt) = self
            .config
            .system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
        {
            messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
        }
        for message in context
            .history
            .iter()
            .filter(|message| message.id != context.user_message.id)
        {
            messages.push(serde_json::json!({
                "role": completion_role(message.role),
                "content": message.content,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": context.user_message.content,
        }));
        messages
    }
}

#[async_trait]
impl ResponseGenerator for CompletionResponder {
    async fn generate(&self, context: &SessionContext) -> Result<MessageDraft, SyncError> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": self.build_messages(context),
            "stream": false,
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let mut request = self
            .client
            .post(endpoint(&self.config.base_url, "/chat/completions"))
            .json(&body);
        if let Some(api_key) = self.config.api_key.as_deref() {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::transport(format!("completion request failed: {err}")))?;

        let status = response.status().as_u16();
        let is_success = response.status().is_success();
        let payload = response.json::<Value>().await.unwrap_or(Value::Null);
        if !is_success {
            return Err(SyncError::Remote {
                status,
                message: parse_completion_error_message(status, &payload),
                payload,
            });
        }

        let text = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .map(completion_text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(SyncError::Decode(
                "completion response carried no assistant text".to_string(),
            ));
        }
        debug!(
            session_id = %context.session_id,
            model = %self.config.model,
            chars = text.len(),
            "generated agent reply"
        );
        Ok(MessageDraft::agent(text))
    }
}

pub fn build_responder(
    client: reqwest::Client,
    chat: &ChatConfig,
) -> Result<Arc<dyn ResponseGenerator>, SyncError> {
    match chat.responder {
        ResponderKind::Echo => Ok(Arc::new(EchoResponder::new())),
        ResponderKind::Completion => {
            let completion = chat.completion.clone().ok_or_else(|| {
                SyncError::Config(
                    "completion responder selected without a completion section".to_string(),
                )
            })?;
            Ok(Arc::new(CompletionResponder::new(client, completion)))
        }
    }
}
