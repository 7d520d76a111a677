use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role. Closed set; providers reject anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message body: plain text or an ordered sequence of content parts.
///
/// Plain text is the common case; parts appear only when an image rides
/// along with (or instead of) text. Serialized untagged so plain strings
/// stay plain strings on the wire and in fixtures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

/// A single tool invocation proposed by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One conversation turn.
///
/// `tool_calls` is populated only on assistant messages proposing
/// invocations; `tool_call_id` and `name` only on tool-role messages
/// carrying a result back. A tool-role message must reference a
/// `tool_call_id` that appeared in a preceding assistant message — see
/// [`tool_links_consistent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(parts),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Assistant message proposing tool invocations. `text` may be empty;
    /// some providers emit a preamble alongside the calls.
    pub fn assistant_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool-role message linking a result back to the call that requested it.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Text(payload.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(tool_name.into()),
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Concatenated text content, joining multi-part text segments and
    /// skipping image parts.
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Checks the tool-link invariant over an ordered message sequence: every
/// tool-role message references a `tool_call_id` proposed by an earlier
/// assistant message.
pub fn tool_links_consistent(messages: &[Message]) -> bool {
    let mut proposed: Vec<&str> = Vec::new();
    for message in messages {
        match message.role {
            Role::Assistant => {
                proposed.extend(message.tool_calls.iter().map(|call| call.id.as_str()));
            }
            Role::Tool => {
                let Some(id) = message.tool_call_id.as_deref() else {
                    return false;
                };
                if !proposed.iter().any(|known| *known == id) {
                    return false;
                }
            }
            Role::System | Role::User => {}
        }
    }
    true
}
