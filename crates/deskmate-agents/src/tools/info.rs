use async_trait::async_trait;
use chrono::Datelike;
use deskmate_common::Result;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutput};

pub struct GetTodayInfo;

#[async_trait]
impl Tool for GetTodayInfo {
    fn name(&self) -> &'static str {
        "get_today_info"
    }

    fn description(&self) -> &'static str {
        "Get today's date, weekday and time. Call this before working out relative dates \
         such as tomorrow or next Friday."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let now = context.now();
        Ok(ToolOutput::success(json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "day": now.format("%A").to_string(),
            "time": now.format("%H:%M").to_string(),
            "year": now.year(),
            "month": now.format("%B").to_string(),
            "week_number": now.iso_week().week(),
            "timezone": context.timezone.name(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::context;

    #[tokio::test]
    async fn reports_date_in_context_timezone() {
        let ctx = context("u-1");
        let out = GetTodayInfo.execute(&ctx, json!({})).await.unwrap();
        assert_eq!(out.payload["success"], true);
        assert_eq!(out.payload["timezone"], "Asia/Kuala_Lumpur");
        assert_eq!(out.payload["date"].as_str().unwrap().len(), 10);
        let week = out.payload["week_number"].as_u64().unwrap();
        assert!((1..=53).contains(&week));
    }
}
