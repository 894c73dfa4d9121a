use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use deskmate_common::{Error, Result};
use deskmate_db::{NudgeStore, WorkplaceStore};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::warn;

use crate::providers::ToolDefinition;

pub mod claims;
pub mod info;
pub mod leave;
pub mod nudges;
pub mod policy;
pub mod rooms;

/// Who a tool call acts for. Tools never take the user from model arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub conversation_id: String,
    pub timezone: Tz,
}

impl ToolContext {
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Structured tool result. The payload always carries a boolean `success`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(payload: Value) -> Self {
        Self {
            payload: with_success(payload, true),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::error_with(message, json!({}))
    }

    /// Failure with extra fields such as `suggestion` or a list of alternatives.
    pub fn error_with(message: impl Into<String>, extra: Value) -> Self {
        let mut payload = with_success(extra, false);
        payload["error"] = Value::String(message.into());
        Self {
            payload,
            is_error: true,
        }
    }
}

fn with_success(payload: Value, success: bool) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    map.insert("success".to_string(), Value::Bool(success));
    Value::Object(map)
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput>;
}

/// The fixed catalog offered to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Run one call. Unknown tools and handler errors become failure payloads.
    pub async fn execute(&self, name: &str, context: &ToolContext, args: Value) -> ToolOutput {
        let Some(tool) = self.find(name) else {
            return ToolOutput::error_with(
                format!("unknown tool: {name}"),
                json!({ "available_tools": self.names() }),
            );
        };
        match tool.execute(context, args).await {
            Ok(output) => output,
            Err(e) => {
                warn!("tool {} failed: {}", name, e);
                ToolOutput::error(e.to_string())
            }
        }
    }
}

/// Every workplace tool over the shared stores.
pub fn workplace_registry(
    workplace: Arc<Mutex<WorkplaceStore>>,
    nudges: Arc<Mutex<NudgeStore>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(leave::GetLeaveBalance::new(Arc::clone(&workplace))));
    registry.register(Box::new(leave::ApplyLeave::new(Arc::clone(&workplace))));
    registry.register(Box::new(leave::GetMyLeaves::new(Arc::clone(&workplace))));
    registry.register(Box::new(rooms::ListRooms::new(Arc::clone(&workplace))));
    registry.register(Box::new(rooms::CheckRoomAvailability::new(Arc::clone(&workplace))));
    registry.register(Box::new(rooms::BookRoom::new(Arc::clone(&workplace))));
    registry.register(Box::new(rooms::GetMyBookings::new(Arc::clone(&workplace))));
    registry.register(Box::new(claims::GetClaimCategories::new(Arc::clone(&workplace))));
    registry.register(Box::new(claims::SubmitClaim::new(Arc::clone(&workplace))));
    registry.register(Box::new(claims::GetMyClaims::new(Arc::clone(&workplace))));
    registry.register(Box::new(info::GetTodayInfo));
    registry.register(Box::new(policy::SearchPolicy::new(workplace)));
    registry.register(Box::new(nudges::GetMyNudges::new(nudges)));
    registry
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Tool(format!("missing or invalid '{key}' argument")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// `None` for a missing filter or "all", otherwise the matching entry of `allowed`.
pub(crate) fn status_filter<'a>(
    args: &Value,
    allowed: &[&'a str],
) -> std::result::Result<Option<&'a str>, ToolOutput> {
    let Some(s) = optional_str(args, "status") else {
        return Ok(None);
    };
    if s.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    match allowed.iter().find(|a| a.eq_ignore_ascii_case(s)) {
        Some(status) => Ok(Some(*status)),
        None => Err(ToolOutput::error_with(
            format!("Invalid status '{s}'"),
            json!({ "allowed": allowed }),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn context(user_id: &str) -> ToolContext {
        ToolContext {
            user_id: user_id.to_string(),
            conversation_id: "conv-1".to_string(),
            timezone: chrono_tz::Asia::Kuala_Lumpur,
        }
    }

    pub fn seeded_workplace() -> Arc<Mutex<WorkplaceStore>> {
        let store = WorkplaceStore::in_memory().expect("in-memory store should open");
        store.seed_defaults().expect("seed should succeed");
        Arc::new(Mutex::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::*;

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn name(&self) -> &'static str {
            "explode"
        }

        fn description(&self) -> &'static str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<ToolOutput> {
            Err(Error::Tool("boom".into()))
        }
    }

    #[test]
    fn outputs_always_carry_success_flag() {
        assert_eq!(ToolOutput::success(json!({"a": 1})).payload["success"], true);
        assert_eq!(ToolOutput::success(json!([1, 2])).payload["result"], json!([1, 2]));
        let failure = ToolOutput::error_with("nope", json!({"suggestion": "try again"}));
        assert_eq!(failure.payload["success"], false);
        assert_eq!(failure.payload["error"], "nope");
        assert_eq!(failure.payload["suggestion"], "try again");
        assert!(failure.is_error);
    }

    #[tokio::test]
    async fn handler_errors_become_failure_results() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Exploding));
        let output = registry.execute("explode", &context("u-1"), json!({})).await;
        assert!(output.is_error);
        assert_eq!(output.payload["error"], "tool error: boom");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failure_result() {
        let registry = ToolRegistry::new();
        let output = registry.execute("teleport", &context("u-1"), json!({})).await;
        assert_eq!(output.payload["success"], false);
        assert!(output.payload["error"].as_str().unwrap().contains("teleport"));
    }

    #[test]
    fn workplace_catalog_is_complete() {
        let registry = workplace_registry(
            seeded_workplace(),
            Arc::new(Mutex::new(NudgeStore::in_memory().unwrap())),
        );
        assert_eq!(registry.len(), 13);
        let definitions = registry.definitions();
        for def in &definitions {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
            assert!(!def.description.is_empty());
        }
        assert!(registry.names().contains(&"book_room"));
    }

    #[test]
    fn status_filter_handles_all_and_invalid() {
        let allowed = ["pending", "approved", "rejected"];
        assert_eq!(status_filter(&json!({}), &allowed).unwrap(), None);
        assert_eq!(status_filter(&json!({"status": "ALL"}), &allowed).unwrap(), None);
        assert_eq!(
            status_filter(&json!({"status": "pending"}), &allowed).unwrap(),
            Some("pending")
        );
        assert_eq!(
            status_filter(&json!({"status": "Pending"}), &allowed).unwrap(),
            Some("pending")
        );
        assert_eq!(
            status_filter(&json!({"status": "APPROVED"}), &allowed).unwrap(),
            Some("approved")
        );
        assert!(status_filter(&json!({"status": "lost"}), &allowed).is_err());
    }
}
