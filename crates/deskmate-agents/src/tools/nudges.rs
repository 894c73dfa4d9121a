use std::sync::Arc;

use async_trait::async_trait;
use deskmate_common::Result;
use deskmate_db::NudgeStore;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolOutput};

pub struct GetMyNudges {
    store: Arc<Mutex<NudgeStore>>,
}

impl GetMyNudges {
    pub fn new(store: Arc<Mutex<NudgeStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetMyNudges {
    fn name(&self) -> &'static str {
        "get_my_nudges"
    }

    fn description(&self) -> &'static str {
        "Get the user's unread reminders and notifications, such as pending claims."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let nudges: Vec<Value> = self
            .store
            .lock()
            .await
            .unread(&context.user_id, None)?
            .into_iter()
            .map(|n| {
                json!({
                    "id": n.id,
                    "type": n.nudge_type,
                    "title": n.title,
                    "content": n.content,
                    "created_at": n.created_at,
                })
            })
            .collect();
        Ok(ToolOutput::success(json!({
            "count": nudges.len(),
            "nudges": nudges,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::context;

    #[tokio::test]
    async fn lists_only_unread_for_user() {
        let store = NudgeStore::in_memory().unwrap();
        let first = store
            .create("u-1", "claim_reminder", "Claim pending", "Send the receipt", json!({}))
            .unwrap();
        store
            .create("u-1", "info", "Townhall", "Friday 3pm", json!({}))
            .unwrap();
        store
            .create("u-2", "info", "Other", "Not yours", json!({}))
            .unwrap();
        assert!(store.mark_read(&first.id, "u-1").unwrap());

        let out = GetMyNudges::new(Arc::new(Mutex::new(store)))
            .execute(&context("u-1"), json!({}))
            .await
            .unwrap();
        assert_eq!(out.payload["count"], 1);
        assert_eq!(out.payload["nudges"][0]["title"], "Townhall");
    }
}
