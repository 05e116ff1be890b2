//! Chat model backends
//!
//! A provider-neutral message/tool-call shape plus one backend per
//! provider. The `ChatBackend` trait is the seam the router talks
//! through, so conversation handling and the tool loop never see
//! provider wire formats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool invocations requested by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `role = "tool"`: which call this result answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// A tool result answering `call_id`
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object
    pub arguments: Value,
}

/// Tool offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: Value,
}

/// One chat turn sent to a backend
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

/// What the model produced
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Provider seam for chat completion
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one completion turn
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response cannot be parsed
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Provider name for logging and prompt addenda
    fn name(&self) -> &'static str;
}

/// `OpenAI` chat completions backend
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiBackend {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn encode_message(message: &ChatMessage) -> Value {
        let mut encoded = json!({ "role": message.role });

        if message.role == "tool" {
            encoded["tool_call_id"] = json!(message.tool_call_id);
            encoded["content"] = json!(message.content.as_deref().unwrap_or_default());
            return encoded;
        }

        encoded["content"] = json!(message.content);
        if !message.tool_calls.is_empty() {
            encoded["tool_calls"] = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        },
                    })
                })
                .collect();
        }
        encoded
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages.iter().map(Self::encode_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
        }

        tracing::debug!(model = %request.model, tools = request.tools.len(), "openai chat request");

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("OpenAI API error {status}: {detail}")));
        }

        let payload: Value = response.json().await?;
        let message = payload
            .pointer("/choices/0/message")
            .ok_or_else(|| Error::Agent("OpenAI response missing message".to_string()))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map_or_else(Vec::new, |calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call.get("id")?.as_str()?.to_string();
                        let name = call.pointer("/function/name")?.as_str()?.to_string();
                        let raw = call.pointer("/function/arguments")?.as_str()?;
                        let arguments =
                            serde_json::from_str(raw).unwrap_or_else(|_| json!({}));
                        Some(ToolCall { id, name, arguments })
                    })
                    .collect()
            });

        Ok(ChatResponse { content, tool_calls })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Anthropic messages backend
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicBackend {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// Split the neutral transcript into the system prompt and the
    /// Anthropic message list (tool results ride as user content blocks)
    fn encode_messages(messages: &[ChatMessage]) -> (String, Vec<Value>) {
        let mut system = String::new();
        let mut encoded = Vec::new();

        for message in messages {
            match message.role.as_str() {
                "system" => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(message.content.as_deref().unwrap_or_default());
                }
                "tool" => {
                    encoded.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": message.tool_call_id,
                            "content": message.content.as_deref().unwrap_or_default(),
                        }],
                    }));
                }
                "assistant" if !message.tool_calls.is_empty() => {
                    let mut blocks = Vec::new();
                    if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
                        blocks.push(json!({ "type": "text", "text": text }));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    encoded.push(json!({ "role": "assistant", "content": blocks }));
                }
                role => {
                    encoded.push(json!({
                        "role": role,
                        "content": message.content.as_deref().unwrap_or_default(),
                    }));
                }
            }
        }

        (system, encoded)
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let (system, messages) = Self::encode_messages(&request.messages);

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
        }

        tracing::debug!(model = %request.model, tools = request.tools.len(), "anthropic chat request");

        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "Anthropic API error {status}: {detail}"
            )));
        }

        let payload: Value = response.json().await?;
        let blocks = payload
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Agent("Anthropic response missing content".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(chunk) = block.get("text").and_then(Value::as_str) {
                        text.push_str(chunk);
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.push(ToolCall { id, name, arguments });
                }
                _ => {}
            }
        }

        Ok(ChatResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_tool_message_carries_call_id() {
        let message = ChatMessage::tool_result("call_1", "72 degrees");
        let encoded = OpenAiBackend::encode_message(&message);
        assert_eq!(encoded["role"], "tool");
        assert_eq!(encoded["tool_call_id"], "call_1");
        assert_eq!(encoded["content"], "72 degrees");
    }

    #[test]
    fn openai_assistant_tool_calls_stringify_arguments() {
        let message = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: json!({ "city": "Portland" }),
            }],
            tool_call_id: None,
        };
        let encoded = OpenAiBackend::encode_message(&message);
        let args = encoded["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(args).unwrap(),
            json!({ "city": "Portland" })
        );
    }

    #[test]
    fn anthropic_splits_system_and_tool_results() {
        let messages = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("weather?"),
            ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: vec![ToolCall {
                    id: "tu_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: json!({}),
                }],
                tool_call_id: None,
            },
            ChatMessage::tool_result("tu_1", "sunny"),
        ];

        let (system, encoded) = AnthropicBackend::encode_messages(&messages);
        assert_eq!(system, "Be brief.");
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[1]["content"][0]["type"], "tool_use");
        assert_eq!(encoded[2]["role"], "user");
        assert_eq!(encoded[2]["content"][0]["type"], "tool_result");
        assert_eq!(encoded[2]["content"][0]["tool_use_id"], "tu_1");
    }
}
