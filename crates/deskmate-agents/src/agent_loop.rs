//! One execution of the reasoning cycle.
//!
//! ```text
//! Reason -> Decide -> Act -> Reason ...
//!              \
//!               -> Done
//! ```
//!
//! `Reason` asks the model for the next message, `Decide` inspects it and `Act` runs the
//! requested tools. The loop has no iteration cap of its own; the supervisor's attempt
//! budget and the per-call timeout bound a turn.

use std::time::Duration;

use deskmate_common::{Error, Message, Result, ToolAction, ToolCall};
use deskmate_config::AgentConfig;
use tracing::{debug, info};

use crate::providers::{ContentBlock, LlmProvider, LlmRequest, LlmResponse, ToolDefinition, extract_text};
use crate::tools::{ToolContext, ToolRegistry};
use crate::window::{build_window, to_chat_messages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Reason,
    Decide,
    Act,
    Done,
}

/// Transition function. Only `Decide` looks at the last message.
pub fn next_phase(phase: LoopPhase, last: Option<&Message>) -> LoopPhase {
    match phase {
        LoopPhase::Reason => LoopPhase::Decide,
        LoopPhase::Decide => match last {
            Some(Message::ToolInvocation { calls, .. }) if !calls.is_empty() => LoopPhase::Act,
            _ => LoopPhase::Done,
        },
        LoopPhase::Act => LoopPhase::Reason,
        LoopPhase::Done => LoopPhase::Done,
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_history: usize,
    pub call_timeout: Duration,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl From<&AgentConfig> for LoopSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_history: config.max_history,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Messages and audit records produced by the current turn.
///
/// Survives failed attempts: a retry resumes from whatever was already appended.
#[derive(Debug, Clone)]
pub struct TurnState {
    /// Starts with the human message of the turn.
    pub messages: Vec<Message>,
    pub actions: Vec<ToolAction>,
    pub reasoning_steps: usize,
}

impl TurnState {
    pub fn new(human: Message) -> Self {
        Self {
            messages: vec![human],
            actions: Vec::new(),
            reasoning_steps: 0,
        }
    }

    /// Most recent non-empty text the agent produced this turn.
    pub fn final_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find_map(|m| m.agent_text_content())
    }
}

/// Fixed inputs of one turn.
pub struct TurnInputs<'a> {
    pub system_prompt: &'a str,
    pub notice: Option<&'a Message>,
    pub history: &'a [Message],
    pub context: &'a ToolContext,
}

pub struct AgentLoop<'a> {
    provider: &'a dyn LlmProvider,
    model: &'a str,
    registry: &'a ToolRegistry,
    settings: &'a LoopSettings,
    tools: Vec<ToolDefinition>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        provider: &'a dyn LlmProvider,
        model: &'a str,
        registry: &'a ToolRegistry,
        settings: &'a LoopSettings,
    ) -> Self {
        Self {
            provider,
            model,
            registry,
            settings,
            tools: registry.definitions(),
        }
    }

    /// Drive the state machine until `Done`. Only model calls can fail.
    pub async fn run(&self, inputs: &TurnInputs<'_>, state: &mut TurnState) -> Result<()> {
        let mut phase = LoopPhase::Reason;
        loop {
            match phase {
                LoopPhase::Reason => {
                    let reply = self.reason(inputs, state).await?;
                    state.reasoning_steps += 1;
                    state.messages.push(reply);
                }
                LoopPhase::Decide => {}
                LoopPhase::Act => self.act(inputs.context, state).await,
                LoopPhase::Done => return Ok(()),
            }
            phase = next_phase(phase, state.messages.last());
            debug!("loop phase -> {:?}", phase);
        }
    }

    async fn reason(&self, inputs: &TurnInputs<'_>, state: &TurnState) -> Result<Message> {
        let conversation: Vec<Message> = inputs
            .history
            .iter()
            .chain(state.messages.iter())
            .cloned()
            .collect();
        let window = build_window(
            inputs.system_prompt,
            inputs.notice,
            &conversation,
            self.settings.max_history,
        );
        let (system, messages) = to_chat_messages(&window);

        let request = LlmRequest {
            model: self.model.to_string(),
            messages,
            system,
            max_tokens: Some(self.settings.max_output_tokens),
            temperature: Some(self.settings.temperature),
            tools: self.tools.clone(),
        };

        let response = tokio::time::timeout(self.settings.call_timeout, self.provider.complete(&request))
            .await
            .map_err(|_| {
                Error::Provider(format!(
                    "{} call to {} deadline exceeded after {}s",
                    self.provider.provider_id(),
                    self.model,
                    self.settings.call_timeout.as_secs()
                ))
            })??;

        Ok(reply_message(&response))
    }

    async fn act(&self, context: &ToolContext, state: &mut TurnState) {
        let calls = match state.messages.last() {
            Some(Message::ToolInvocation { calls, .. }) => calls.clone(),
            _ => return,
        };
        for call in calls {
            let output = self
                .registry
                .execute(&call.name, context, call.arguments.clone())
                .await;
            info!(
                "tool {} for {} -> {}",
                call.name,
                context.user_id,
                if output.is_error { "failed" } else { "ok" }
            );
            state.messages.push(Message::tool_result(&call, output.payload));
            state.actions.push(ToolAction {
                tool: call.name,
                args: call.arguments,
            });
        }
    }
}

/// The model's reply as a conversation message.
fn reply_message(response: &LlmResponse) -> Message {
    let text = extract_text(&response.content);
    let calls: Vec<ToolCall> = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        })
        .collect();
    if calls.is_empty() {
        Message::agent_text(text)
    } else {
        Message::ToolInvocation {
            content: text,
            calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, seeded_workplace};
    use crate::tools::workplace_registry;
    use async_trait::async_trait;
    use deskmate_db::NudgeStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted responses and records every request it sees.
    struct Scripted {
        replies: Mutex<VecDeque<LlmResponse>>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Vec<ContentBlock>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|content| LlmResponse {
                            content,
                            model: "scripted".into(),
                            usage: None,
                            stop_reason: None,
                        })
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Provider("script exhausted".into()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    struct Stalled;

    #[async_trait]
    impl LlmProvider for Stalled {
        fn provider_id(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(Error::Provider("unreachable".into()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn settings() -> LoopSettings {
        LoopSettings::from(&AgentConfig::default())
    }

    fn registry() -> ToolRegistry {
        workplace_registry(
            seeded_workplace(),
            Arc::new(tokio::sync::Mutex::new(NudgeStore::in_memory().unwrap())),
        )
    }

    fn text(t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.into() }
    }

    fn tool_use(id: &str, name: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input: json!({}),
        }
    }

    #[test]
    fn transitions_follow_last_message() {
        let call = ToolCall::new("list_rooms", json!({}));
        let invocation = Message::tool_invocation(vec![call]);
        let answer = Message::agent_text("hi");

        assert_eq!(next_phase(LoopPhase::Reason, None), LoopPhase::Decide);
        assert_eq!(next_phase(LoopPhase::Decide, Some(&invocation)), LoopPhase::Act);
        assert_eq!(next_phase(LoopPhase::Decide, Some(&answer)), LoopPhase::Done);
        assert_eq!(
            next_phase(LoopPhase::Decide, Some(&Message::tool_invocation(vec![]))),
            LoopPhase::Done
        );
        assert_eq!(next_phase(LoopPhase::Act, Some(&answer)), LoopPhase::Reason);
        assert_eq!(next_phase(LoopPhase::Done, None), LoopPhase::Done);
    }

    #[tokio::test]
    async fn plain_answer_finishes_after_one_reason_step() {
        let provider = Scripted::new(vec![vec![text("Hello!")]]);
        let registry = registry();
        let settings = settings();
        let ctx = context("u-1");
        let inputs = TurnInputs {
            system_prompt: "sys",
            notice: None,
            history: &[],
            context: &ctx,
        };
        let mut state = TurnState::new(Message::human("hi"));

        AgentLoop::new(&provider, "m-1", &registry, &settings)
            .run(&inputs, &mut state)
            .await
            .unwrap();

        assert_eq!(state.reasoning_steps, 1);
        assert!(state.actions.is_empty());
        assert_eq!(state.final_text(), Some("Hello!"));
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model, "m-1");
        assert_eq!(seen[0].tools.len(), 13);
    }

    #[tokio::test]
    async fn two_calls_both_answered_before_next_reason() {
        let provider = Scripted::new(vec![
            vec![tool_use("c1", "list_rooms"), tool_use("c2", "get_today_info")],
            vec![text("Here you go")],
        ]);
        let registry = registry();
        let settings = settings();
        let ctx = context("u-1");
        let inputs = TurnInputs {
            system_prompt: "sys",
            notice: None,
            history: &[],
            context: &ctx,
        };
        let mut state = TurnState::new(Message::human("rooms and date?"));

        AgentLoop::new(&provider, "m-1", &registry, &settings)
            .run(&inputs, &mut state)
            .await
            .unwrap();

        let tools: Vec<&str> = state.actions.iter().map(|a| a.tool.as_str()).collect();
        assert_eq!(tools, ["list_rooms", "get_today_info"]);
        assert_eq!(state.reasoning_steps, 2);

        let seen = provider.seen.lock().unwrap();
        let second = &seen[1].messages;
        let tool_turn = second.last().unwrap();
        match &tool_turn.content {
            crate::providers::MessagePart::Parts(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("expected grouped tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_back_not_raised() {
        let provider = Scripted::new(vec![vec![tool_use("c1", "teleport")], vec![text("Sorry")]]);
        let registry = registry();
        let settings = settings();
        let ctx = context("u-1");
        let inputs = TurnInputs {
            system_prompt: "sys",
            notice: None,
            history: &[],
            context: &ctx,
        };
        let mut state = TurnState::new(Message::human("beam me up"));

        AgentLoop::new(&provider, "m-1", &registry, &settings)
            .run(&inputs, &mut state)
            .await
            .unwrap();

        let result = state
            .messages
            .iter()
            .find_map(|m| match m {
                Message::ToolResult { output, .. } => Some(output.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_hits_deadline() {
        let registry = registry();
        let mut settings = settings();
        settings.call_timeout = Duration::from_secs(2);
        let ctx = context("u-1");
        let inputs = TurnInputs {
            system_prompt: "sys",
            notice: None,
            history: &[],
            context: &ctx,
        };
        let mut state = TurnState::new(Message::human("hi"));

        let err = AgentLoop::new(&Stalled, "m-1", &registry, &settings)
            .run(&inputs, &mut state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deadline exceeded"));
        assert_eq!(state.messages.len(), 1);
    }
}
