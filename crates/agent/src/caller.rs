//! The model-caller seam and its OpenAI-compatible HTTP implementation.
//!
//! The invocation loop only ever sees [`ModelCaller`]; the wire shape lives
//! entirely in this module. [`HttpModelCaller`] targets any chat-completions
//! endpoint speaking the OpenAI format, which covers all three registered
//! vendors (Anthropic and Google both expose compatibility endpoints).

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::debug;

use lenda_core::message::{Content, ContentPart, Message, Role, ToolCall};
use lenda_core::registry::{ModelConfig, Vendor};
use lenda_core::tool::ToolDefinition;

/// Tool-choice binding for one model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl ToolChoice {
    fn as_wire(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Required => "required",
        }
    }
}

/// Per-call sampling parameters.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What the model produced: final text, proposed tool calls, or both.
#[derive(Clone, Debug, Default)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Abstract capability: given a resolved model, a full message sequence and
/// an optional bound tool set, return either final text or proposed tool
/// calls. The model is passed per call because one caller serves every
/// purpose (text, vision, judge); the invocation loop picks the
/// [`ModelConfig`] through the registry.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn invoke(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        options: &CallOptions,
    ) -> Result<ModelResponse>;
}

fn base_url_for(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::OpenAi => "https://api.openai.com/v1",
        Vendor::Anthropic => "https://api.anthropic.com/v1",
        Vendor::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
    }
}

/// HTTP model caller for OpenAI-compatible chat-completions endpoints. One
/// instance serves all vendors; the endpoint is derived from the vendor of
/// the model passed to each call.
#[derive(Default)]
pub struct HttpModelCaller {
    client: reqwest::Client,
    base_url_override: Option<String>,
}

impl HttpModelCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the endpoint, e.g. for a local OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }
}

#[async_trait]
impl ModelCaller for HttpModelCaller {
    async fn invoke(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        options: &CallOptions,
    ) -> Result<ModelResponse> {
        let mut body = json!({
            "model": model.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "temperature": options.temperature,
            "max_completion_tokens": options.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
            body["tool_choice"] = json!(tool_choice.as_wire());
        }

        let base_url = self
            .base_url_override
            .as_deref()
            .unwrap_or_else(|| base_url_for(model.vendor));
        debug!(model = %model.model, message_count = messages.len(), "dispatching model call");

        let mut request =
            self.client.post(format!("{base_url}/chat/completions")).json(&body);
        if let Some(api_key) = &model.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("model request failed")?;
        let status = response.status();
        let payload: Value = response.json().await.context("model response was not JSON")?;
        if !status.is_success() {
            let detail = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("model endpoint returned {status}: {detail}"));
        }

        parse_completion(&payload)
    }
}

/// Converts a [`Message`] into the chat-completions wire object.
pub fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let content = match &message.content {
        Content::Text(text) => json!(text),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image { url } => {
                        json!({ "type": "image_url", "image_url": { "url": url } })
                    }
                })
                .collect(),
        ),
    };

    let mut wire = json!({ "role": role, "content": content });

    if message.has_tool_calls() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }
    if message.role == Role::Tool {
        if let Some(name) = &message.name {
            wire["name"] = json!(name);
        }
    }

    wire
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters.to_json_schema(),
        }
    })
}

/// Parses a chat-completions response body into a [`ModelResponse`],
/// concatenating multi-part text content and decoding tool-call argument
/// strings. Missing tool-call ids are minted locally so the tool-link
/// invariant holds downstream.
pub fn parse_completion(payload: &Value) -> Result<ModelResponse> {
    let message = payload["choices"][0]["message"]
        .as_object()
        .ok_or_else(|| anyhow!("completion carried no message"))?;

    let content = match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect();
            Some(text)
        }
        _ => None,
    };

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let arguments = call["function"]["arguments"]
                        .as_str()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));
                    ToolCall {
                        id: call["id"]
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelResponse { content, tool_calls })
}
