//! Rolling context window sent to the model.
//!
//! The window is one synthesized system message, an optional pinned notice, then at most
//! `max_history` of the most recent conversation messages. Tool invocations and their results
//! always travel together: a truncation point that would split a pair is moved forward.

use std::collections::HashSet;

use deskmate_common::Message;

use crate::providers::{ChatMessage, ChatRole, ContentBlock, MessagePart};

pub fn build_window(
    system_prompt: &str,
    notice: Option<&Message>,
    history: &[Message],
    max_history: usize,
) -> Vec<Message> {
    let conversational: Vec<&Message> = history
        .iter()
        .filter(|m| !matches!(m, Message::System { .. }))
        .collect();

    let tail_start = conversational.len().saturating_sub(max_history);
    let tail = &conversational[tail_start..];
    let start = safe_start(tail);
    let kept = drop_unpaired(&tail[start..]);

    let mut window = Vec::with_capacity(kept.len() + 2);
    window.push(Message::system(system_prompt));
    if let Some(notice) = notice {
        window.push(notice.clone());
    }
    window.extend(kept.into_iter().cloned());
    window
}

/// Index of the first message that can open a window.
fn safe_start(tail: &[&Message]) -> usize {
    let mut start = 0;
    for (i, message) in tail.iter().enumerate() {
        match message {
            Message::ToolResult { .. } => start = i + 1,
            Message::ToolInvocation { calls, .. } if !calls.is_empty() => {
                if invocation_complete(calls.iter().map(|c| c.id.as_str()), &tail[i + 1..]) {
                    break;
                }
                start = i + 1;
            }
            Message::Human { .. }
            | Message::AgentText { .. }
            | Message::ToolInvocation { .. }
            | Message::System { .. } => break,
        }
    }
    start
}

/// Whether every call id is answered before the next human message.
fn invocation_complete<'a>(call_ids: impl Iterator<Item = &'a str>, rest: &[&Message]) -> bool {
    let mut answered = HashSet::new();
    for message in rest {
        match message {
            Message::ToolResult { call_id, .. } => {
                answered.insert(call_id.as_str());
            }
            Message::Human { .. } => break,
            _ => {}
        }
    }
    call_ids.into_iter().all(|id| answered.contains(id))
}

/// Remove invocations missing any result and results whose invocation is absent.
fn drop_unpaired<'a>(messages: &[&'a Message]) -> Vec<&'a Message> {
    let answered: HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut kept_calls: HashSet<&str> = HashSet::new();
    let mut kept = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            Message::ToolInvocation { calls, .. } => {
                if calls.iter().all(|c| answered.contains(c.id.as_str())) {
                    kept_calls.extend(calls.iter().map(|c| c.id.as_str()));
                    kept.push(*message);
                }
            }
            Message::ToolResult { call_id, .. } => {
                if kept_calls.contains(call_id.as_str()) {
                    kept.push(*message);
                }
            }
            _ => kept.push(*message),
        }
    }
    kept
}

/// Convert a window into provider messages. System messages are joined into the system field;
/// consecutive tool results are grouped into a single tool turn.
pub fn to_chat_messages(window: &[Message]) -> (Option<String>, Vec<ChatMessage>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(window.len());

    for message in window {
        match message {
            Message::System { content } => system_parts.push(content),
            Message::Human { content, image } => {
                let content = match image {
                    Some(image) => MessagePart::Parts(vec![
                        ContentBlock::Text {
                            text: content.clone(),
                        },
                        ContentBlock::Image {
                            url: image.data_url(),
                        },
                    ]),
                    None => MessagePart::Text(content.clone()),
                };
                messages.push(ChatMessage {
                    role: ChatRole::User,
                    content,
                });
            }
            Message::AgentText { content } => messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: MessagePart::Text(content.clone()),
            }),
            Message::ToolInvocation { content, calls } => {
                let mut blocks = Vec::with_capacity(calls.len() + 1);
                if !content.trim().is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: content.clone(),
                    });
                }
                blocks.extend(calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: MessagePart::Parts(blocks),
                });
            }
            Message::ToolResult {
                call_id,
                name,
                output,
            } => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    name: name.clone(),
                    content: output.to_string(),
                };
                match messages.last_mut() {
                    Some(ChatMessage {
                        role: ChatRole::Tool,
                        content: MessagePart::Parts(blocks),
                    }) => blocks.push(block),
                    _ => messages.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: MessagePart::Parts(vec![block]),
                    }),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_common::{ImageAttachment, ToolCall};
    use serde_json::json;

    fn pair(name: &str) -> (Message, Message) {
        let call = ToolCall::new(name, json!({}));
        let result = Message::tool_result(&call, json!({"success": true}));
        (Message::tool_invocation(vec![call]), result)
    }

    fn double_pair() -> Vec<Message> {
        let a = ToolCall::new("list_rooms", json!({}));
        let b = ToolCall::new("get_my_bookings", json!({}));
        vec![
            Message::tool_invocation(vec![a.clone(), b.clone()]),
            Message::tool_result(&a, json!({"success": true})),
            Message::tool_result(&b, json!({"success": true})),
        ]
    }

    /// A long, mixed conversation: text turns, single and parallel tool calls.
    fn long_history() -> Vec<Message> {
        let mut history = Vec::new();
        for turn in 0..6 {
            history.push(Message::human(format!("question {turn}")));
            if turn % 2 == 0 {
                let (inv, res) = pair("get_leave_balance");
                history.push(inv);
                history.push(res);
            }
            if turn % 3 == 0 {
                history.extend(double_pair());
            }
            history.push(Message::agent_text(format!("answer {turn}")));
        }
        history
    }

    fn assert_paired(window: &[Message]) {
        let mut invoked: HashSet<String> = HashSet::new();
        let mut answered: HashSet<String> = HashSet::new();
        for message in window {
            match message {
                Message::ToolInvocation { calls, .. } => {
                    invoked.extend(calls.iter().map(|c| c.id.clone()));
                }
                Message::ToolResult { call_id, .. } => {
                    assert!(invoked.contains(call_id), "result {call_id} before its call");
                    answered.insert(call_id.clone());
                }
                _ => {}
            }
        }
        assert_eq!(invoked, answered);
    }

    #[test]
    fn short_history_is_kept_whole() {
        let history = vec![Message::human("hi"), Message::agent_text("hello")];
        let window = build_window("sys", None, &history, 6);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0], Message::system("sys"));
        assert_eq!(&window[1..], &history[..]);
    }

    #[test]
    fn orphan_result_at_start_is_skipped() {
        let (inv, res) = pair("list_rooms");
        let history = vec![
            Message::human("rooms?"),
            inv,
            res,
            Message::agent_text("two rooms"),
            Message::human("thanks"),
        ];
        // tail of 3 starts at the orphaned result
        let window = build_window("sys", None, &history, 3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[1], Message::agent_text("two rooms"));
    }

    #[test]
    fn invocation_missing_a_result_is_skipped() {
        let mut history = vec![Message::human("x")];
        history.extend(double_pair());
        history.push(Message::agent_text("done"));
        // drop the second result so the invocation is incomplete
        history.remove(3);
        let window = build_window("sys", None, &history, 10);
        assert_paired(&window);
        assert!(!window.iter().any(|m| matches!(m, Message::ToolInvocation { .. })));
        assert!(!window.iter().any(|m| matches!(m, Message::ToolResult { .. })));
    }

    #[test]
    fn pairing_holds_for_every_truncation_point() {
        let history = long_history();
        for max in 1..=history.len() + 2 {
            let window = build_window("sys", None, &history, max);
            assert!(window.len() <= max + 1, "max {max}: window of {}", window.len());
            assert_paired(&window);
            assert!(!matches!(window.get(1), Some(Message::ToolResult { .. })));
        }
    }

    #[test]
    fn stray_system_messages_are_dropped() {
        let history = vec![
            Message::system("old prompt"),
            Message::human("hi"),
            Message::agent_text("hello"),
        ];
        let window = build_window("fresh", None, &history, 6);
        let systems: Vec<_> = window
            .iter()
            .filter(|m| matches!(m, Message::System { .. }))
            .collect();
        assert_eq!(systems, vec![&Message::system("fresh")]);
    }

    #[test]
    fn notice_is_pinned_and_not_counted() {
        let notice = Message::system("unread: claim");
        let history: Vec<Message> = (0..10).map(|i| Message::human(format!("m{i}"))).collect();
        let window = build_window("sys", Some(&notice), &history, 4);
        assert_eq!(window.len(), 6);
        assert_eq!(window[1], notice);
        assert_eq!(window[2], Message::human("m6"));
    }

    #[test]
    fn chat_conversion_groups_results_and_joins_system() {
        let mut window = vec![
            Message::system("sys"),
            Message::system("notice"),
            Message::human_with_image("receipt", ImageAttachment::jpeg("AAAA")),
        ];
        window.extend(double_pair());
        window.push(Message::agent_text("submitted"));

        let (system, messages) = to_chat_messages(&window);
        assert_eq!(system.as_deref(), Some("sys\n\nnotice"));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatRole::User);
        match &messages[0].content {
            MessagePart::Parts(blocks) => assert!(matches!(blocks[1], ContentBlock::Image { .. })),
            other => panic!("expected parts, got {other:?}"),
        }
        assert_eq!(messages[2].role, ChatRole::Tool);
        match &messages[2].content {
            MessagePart::Parts(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("expected parts, got {other:?}"),
        }
        assert_eq!(messages[3].role, ChatRole::Assistant);
    }
}
