use std::sync::{Arc, Mutex, PoisonError};

use chrono_tz::Tz;
use deskmate_common::{Error, ImageAttachment, Message, Result, ToolAction};
use deskmate_config::AgentConfig;
use tracing::{error, info, instrument, warn};

use crate::agent_loop::{AgentLoop, LoopSettings, TurnInputs, TurnState};
use crate::proactive::{NotificationFeed, fetch_notice};
use crate::prompt::build_system_prompt;
use crate::providers::{GeminiProvider, LlmProvider};
use crate::rotation::{ActiveBinding, RotationState};
use crate::tools::{ToolContext, ToolRegistry};

/// Returned when the model finished a turn without saying anything.
pub const FALLBACK_REPLY: &str = "Done! ✅";

/// Turns an active (model, credential) pair into a callable backend.
pub trait ModelBinder: Send + Sync {
    fn bind(&self, binding: &ActiveBinding) -> Result<Arc<dyn LlmProvider>>;
}

#[derive(Debug, Clone, Default)]
pub struct GeminiBinder {
    base_url: Option<String>,
}

impl GeminiBinder {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }
}

impl ModelBinder for GeminiBinder {
    fn bind(&self, binding: &ActiveBinding) -> Result<Arc<dyn LlmProvider>> {
        let mut provider = GeminiProvider::new(binding.credential.expose().to_string());
        if let Some(url) = &self.base_url {
            provider = provider.with_base_url(url.clone());
        }
        Ok(Arc::new(provider))
    }
}

#[derive(Clone)]
struct BoundAgent {
    binding: ActiveBinding,
    provider: Arc<dyn LlmProvider>,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_message: String,
    pub user_id: String,
    pub conversation_id: String,
    /// Persisted messages of the conversation before this turn.
    pub history: Vec<Message>,
    pub image: Option<ImageAttachment>,
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub response_text: String,
    /// Empty when the turn failed.
    pub tool_actions: Vec<ToolAction>,
    pub conversation_id: String,
    pub model_used: String,
    /// Messages to append to the conversation. Never includes the nudge notice.
    pub messages: Vec<Message>,
    pub attempts: usize,
    pub reasoning_steps: usize,
    pub error: Option<String>,
}

impl TurnResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Quota, rate limit and unknown/unavailable model failures are worth another model.
pub fn is_retryable(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();

    if let Some(status) = extract_status_code(&message)
        && matches!(status, 429 | 404 | 503)
    {
        return true;
    }

    let retryable_fragments = [
        "quota",
        "rate_limit",
        "rate limit",
        "resource_exhausted",
        "resource exhausted",
        "too many requests",
        "exceeded",
        "not_found",
        "not found",
        "unavailable",
    ];

    retryable_fragments
        .iter()
        .any(|fragment| message.contains(fragment))
}

fn extract_status_code(message: &str) -> Option<u16> {
    for marker in ["status=", "status:", "status code"] {
        let mut search_start = 0usize;
        while let Some(offset) = message[search_start..].find(marker) {
            let after_marker = search_start + offset + marker.len();
            let digits: String = message[after_marker..]
                .trim_start()
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect();

            if digits.len() >= 3
                && let Ok(status) = digits[..3].parse::<u16>()
            {
                return Some(status);
            }

            search_start = after_marker;
        }
    }
    None
}

/// Runs turns against the rotating model pool.
///
/// One attempt is a full agent loop. Retryable failures mark the model failed and retry
/// with a freshly bound agent, keeping whatever the turn already produced. Fatal failures
/// and an exhausted budget end the turn with an apology.
pub struct Supervisor {
    rotation: Arc<RotationState>,
    binder: Arc<dyn ModelBinder>,
    registry: Arc<ToolRegistry>,
    feed: Arc<dyn NotificationFeed>,
    settings: LoopSettings,
    max_attempts: usize,
    nudge_limit: usize,
    timezone: Tz,
    system_prompt: Option<String>,
    cached: Mutex<Option<BoundAgent>>,
}

impl Supervisor {
    pub fn new(
        config: &AgentConfig,
        rotation: Arc<RotationState>,
        binder: Arc<dyn ModelBinder>,
        registry: Arc<ToolRegistry>,
        feed: Arc<dyn NotificationFeed>,
    ) -> Result<Self> {
        let timezone = config
            .timezone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone: '{}'", config.timezone)))?;
        if config.max_attempts == 0 {
            return Err(Error::Config("agent.max_attempts must be at least 1".into()));
        }
        Ok(Self {
            rotation,
            binder,
            registry,
            feed,
            settings: LoopSettings::from(config),
            max_attempts: config.max_attempts,
            nudge_limit: config.nudge_limit,
            timezone,
            system_prompt: config.system_prompt.clone(),
            cached: Mutex::new(None),
        })
    }

    pub fn rotation(&self) -> &Arc<RotationState> {
        &self.rotation
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, conversation_id = %request.conversation_id)
    )]
    pub async fn run_turn(&self, request: TurnRequest) -> TurnResult {
        let TurnRequest {
            user_message,
            user_id,
            conversation_id,
            history,
            image,
        } = request;

        let system_prompt = build_system_prompt(self.system_prompt.as_deref(), &user_id);
        let notice = fetch_notice(self.feed.as_ref(), &user_id, self.nudge_limit).await;
        let context = ToolContext {
            user_id: user_id.clone(),
            conversation_id: conversation_id.clone(),
            timezone: self.timezone,
        };
        let inputs = TurnInputs {
            system_prompt: &system_prompt,
            notice: notice.as_ref(),
            history: &history,
            context: &context,
        };

        let human = match image {
            Some(image) => Message::human_with_image(user_message, image),
            None => Message::human(user_message),
        };
        let mut state = TurnState::new(human);
        let mut model_used = String::new();
        let mut last_error: Option<Error> = None;
        let mut attempts = 0;

        for attempt in 0..self.max_attempts {
            attempts = attempt + 1;
            let agent = match self.agent_for_attempt(attempt) {
                Ok(agent) => agent,
                Err(e) => {
                    error!("failed to bind model: {}", e);
                    last_error = Some(e);
                    break;
                }
            };
            model_used = agent.binding.model.clone();
            info!(
                "attempt {}/{} with {} (key {})",
                attempts,
                self.max_attempts,
                agent.binding.model,
                agent.binding.credential.fingerprint()
            );

            let agent_loop = AgentLoop::new(
                agent.provider.as_ref(),
                &agent.binding.model,
                &self.registry,
                &self.settings,
            );
            match agent_loop.run(&inputs, &mut state).await {
                Ok(()) => return finish(state, conversation_id, model_used, attempts),
                Err(e) if is_retryable(&e) && attempts < self.max_attempts => {
                    warn!("model {} failed, rotating: {}", agent.binding.model, e);
                    self.rotation.mark_failed(&agent.binding.model);
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("turn failed on {}: {}", agent.binding.model, e);
                    last_error = Some(e);
                    break;
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        fail(state, conversation_id, model_used, attempts, error)
    }

    /// Attempt 0 reuses the cached agent if it still matches the active pair.
    /// Every later attempt binds afresh.
    fn agent_for_attempt(&self, attempt: usize) -> Result<BoundAgent> {
        let active = self.rotation.get_active();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if attempt == 0
            && let Some(agent) = cached.as_ref().filter(|a| a.binding == active)
        {
            return Ok(agent.clone());
        }
        let agent = BoundAgent {
            provider: self.binder.bind(&active)?,
            binding: active,
        };
        *cached = Some(agent.clone());
        Ok(agent)
    }
}

fn finish(mut state: TurnState, conversation_id: String, model_used: String, attempts: usize) -> TurnResult {
    let response_text = state.final_text().unwrap_or(FALLBACK_REPLY).to_string();
    if let Some(Message::AgentText { content }) = state.messages.last_mut()
        && content.trim().is_empty()
    {
        *content = response_text.clone();
    }
    TurnResult {
        response_text,
        tool_actions: state.actions,
        conversation_id,
        model_used,
        messages: state.messages,
        attempts,
        reasoning_steps: state.reasoning_steps,
        error: None,
    }
}

fn fail(
    state: TurnState,
    conversation_id: String,
    model_used: String,
    attempts: usize,
    error: String,
) -> TurnResult {
    let response_text = format!(
        "Sorry, I couldn't complete that right now. Please try again in a moment.\n\n(Error: {error})"
    );
    let mut messages: Vec<Message> = state.messages.into_iter().take(1).collect();
    messages.push(Message::agent_text(response_text.clone()));
    TurnResult {
        response_text,
        tool_actions: Vec::new(),
        conversation_id,
        model_used,
        messages,
        attempts,
        reasoning_steps: state.reasoning_steps,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_error_classifier_matches_expected_cases() {
        let retryable = [
            Error::Provider("Gemini API error: status=429, body=quota".into()),
            Error::Provider("Gemini API error: status=404, body=model missing".into()),
            Error::Provider("Gemini API error: status=503, body=overloaded".into()),
            Error::Provider("RESOURCE_EXHAUSTED: try later".into()),
            Error::Provider("Rate limit reached".into()),
            Error::Provider("gemini call to m deadline exceeded after 15s".into()),
            Error::Provider("models/gemma-9 is NOT_FOUND".into()),
        ];
        for e in &retryable {
            assert!(is_retryable(e), "{e}");
        }

        let fatal = [
            Error::Provider("Gemini API error: status=400, body=bad request".into()),
            Error::Provider("Gemini API error: status=401, body=API key invalid".into()),
            Error::Provider("failed to parse response".into()),
            Error::Config("no keys".into()),
        ];
        for e in &fatal {
            assert!(!is_retryable(e), "{e}");
        }
    }

    #[test]
    fn status_code_is_found_after_markers() {
        assert_eq!(extract_status_code("error status=429, body=x"), Some(429));
        assert_eq!(extract_status_code("http status code 503"), Some(503));
        assert_eq!(extract_status_code("status: 40"), None);
        assert_eq!(extract_status_code("no code here"), None);
    }

    #[test]
    fn empty_final_reply_gets_fallback_text() {
        let mut state = TurnState::new(Message::human("thanks"));
        state.messages.push(Message::agent_text(""));
        let result = finish(state, "c".into(), "m".into(), 1);
        assert_eq!(result.response_text, FALLBACK_REPLY);
        assert_eq!(result.messages.last().and_then(|m| m.text()), Some(FALLBACK_REPLY));
    }

    #[test]
    fn failure_discards_partial_actions() {
        let mut state = TurnState::new(Message::human("book it"));
        state.actions.push(ToolAction {
            tool: "book_room".into(),
            args: serde_json::json!({}),
        });
        let result = fail(state, "c".into(), "m".into(), 7, "status=429".into());
        assert!(result.tool_actions.is_empty());
        assert_eq!(result.messages.len(), 2);
        assert!(result.response_text.contains("status=429"));
        assert!(!result.is_success());
    }
}
