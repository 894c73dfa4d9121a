use serde::{Deserialize, Serialize};

/// One entry of a conversation, in the order it happened.
///
/// Tool traffic is modelled explicitly: a `ToolInvocation` is the model asking for one or
/// more tool calls, and each call is answered by exactly one `ToolResult` carrying the same
/// call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<ImageAttachment>,
    },
    AgentText {
        content: String,
    },
    ToolInvocation {
        /// Text the model produced alongside its tool calls, often empty.
        #[serde(default)]
        content: String,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        name: String,
        output: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    System,
    Human,
    AgentText,
    ToolInvocation,
    ToolResult,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Human => "human",
            MessageKind::AgentText => "agent_text",
            MessageKind::ToolInvocation => "tool_invocation",
            MessageKind::ToolResult => "tool_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Build a call with a freshly generated id (for backends that don't assign one).
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// Base64 image sent together with a human message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: String,
}

impl ImageAttachment {
    pub fn jpeg(data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data: data.into(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Audit record for one tool execution during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAction {
    pub tool: String,
    pub args: serde_json::Value,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
            image: None,
        }
    }

    pub fn human_with_image(content: impl Into<String>, image: ImageAttachment) -> Self {
        Message::Human {
            content: content.into(),
            image: Some(image),
        }
    }

    pub fn agent_text(content: impl Into<String>) -> Self {
        Message::AgentText {
            content: content.into(),
        }
    }

    pub fn tool_invocation(calls: Vec<ToolCall>) -> Self {
        Message::ToolInvocation {
            content: String::new(),
            calls,
        }
    }

    pub fn tool_result(call: &ToolCall, output: serde_json::Value) -> Self {
        Message::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System { .. } => MessageKind::System,
            Message::Human { .. } => MessageKind::Human,
            Message::AgentText { .. } => MessageKind::AgentText,
            Message::ToolInvocation { .. } => MessageKind::ToolInvocation,
            Message::ToolResult { .. } => MessageKind::ToolResult,
        }
    }

    /// Human-readable text of the message, if it has any.
    pub fn text(&self) -> Option<&str> {
        let text = match self {
            Message::System { content }
            | Message::Human { content, .. }
            | Message::AgentText { content }
            | Message::ToolInvocation { content, .. } => content.as_str(),
            Message::ToolResult { .. } => return None,
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Text the agent said, ignoring human, system and tool-result messages.
    pub fn agent_text_content(&self) -> Option<&str> {
        match self {
            Message::AgentText { .. } | Message::ToolInvocation { .. } => self.text(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_tag_is_snake_case() {
        let msg = Message::agent_text("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "agent_text");
        assert_eq!(msg.kind().as_str(), "agent_text");
    }

    #[test]
    fn tool_result_copies_call_identity() {
        let call = ToolCall::new("list_rooms", json!({}));
        assert!(call.id.starts_with("call_"));

        let result = Message::tool_result(&call, json!({"success": true}));
        match result {
            Message::ToolResult { call_id, name, .. } => {
                assert_eq!(call_id, call.id);
                assert_eq!(name, "list_rooms");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn human_without_image_omits_field() {
        let value = serde_json::to_value(Message::human("hello")).unwrap();
        assert!(value.get("image").is_none());

        let parsed: Message =
            serde_json::from_value(json!({"kind": "human", "content": "hello"})).unwrap();
        assert_eq!(parsed, Message::human("hello"));
    }

    #[test]
    fn blank_text_counts_as_missing() {
        let invocation = Message::tool_invocation(vec![ToolCall::new("list_rooms", json!({}))]);
        assert!(invocation.text().is_none());
        assert!(Message::agent_text("  ").agent_text_content().is_none());
        assert_eq!(Message::agent_text("ok").agent_text_content(), Some("ok"));
        assert!(Message::human("hey").agent_text_content().is_none());
    }

    #[test]
    fn image_data_url() {
        let image = ImageAttachment::jpeg("AAAA");
        assert_eq!(image.data_url(), "data:image/jpeg;base64,AAAA");
    }
}
