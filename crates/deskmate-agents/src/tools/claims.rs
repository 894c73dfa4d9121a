use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deskmate_common::{Error, Result};
use deskmate_db::{NewClaim, WorkplaceStore};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolOutput, required_str, status_filter};

const HISTORY_LIMIT: usize = 10;
const CLAIM_STATUSES: &[&str] = &["pending", "approved", "rejected"];

pub struct GetClaimCategories {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl GetClaimCategories {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetClaimCategories {
    fn name(&self) -> &'static str {
        "get_claim_categories"
    }

    fn description(&self) -> &'static str {
        "Get the expense claim categories and their limits in RM."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let categories = self.store.lock().await.claim_categories()?;
        Ok(ToolOutput::success(json!({ "categories": categories })))
    }
}

pub struct SubmitClaim {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl SubmitClaim {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SubmitClaim {
    fn name(&self) -> &'static str {
        "submit_claim"
    }

    fn description(&self) -> &'static str {
        "Submit an expense claim for the user. Call when the user wants to claim or be \
         reimbursed, including from a photographed receipt."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Category name, e.g. Transport, Meals, Parking"
                },
                "amount": { "type": "number", "description": "Amount in RM" },
                "description": { "type": "string", "description": "What the expense was for" }
            },
            "required": ["category", "amount", "description"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let requested = required_str(&args, "category")?;
        let description = required_str(&args, "description")?;
        let amount = parse_amount(&args["amount"])
            .ok_or_else(|| Error::Tool("missing or invalid 'amount' argument".to_string()))?;

        let store = self.store.lock().await;
        let Some(category) = store.find_claim_category(requested)? else {
            let available: Vec<Value> = store
                .claim_categories()?
                .into_iter()
                .map(|c| json!({ "name": c.name, "max": c.max_amount }))
                .collect();
            return Ok(ToolOutput::error_with(
                format!("Category '{requested}' not found"),
                json!({ "available_categories": available }),
            ));
        };

        if amount <= 0.0 {
            return Ok(ToolOutput::error("Amount must be positive"));
        }
        if let Some(max) = category.max_amount.filter(|max| amount > *max) {
            return Ok(ToolOutput::error_with(
                format!("Amount RM{amount:.2} exceeds limit"),
                json!({
                    "max_allowed": max,
                    "suggestion": format!("Maximum for {} is RM{max:.2}", category.name),
                }),
            ));
        }

        let claim_id = store.create_claim(&NewClaim {
            user_id: context.user_id.clone(),
            category_id: category.id,
            amount,
            description: description.to_string(),
            claim_date: context.today(),
            created_at: Utc::now(),
        })?;

        Ok(ToolOutput::success(json!({
            "message": "✅ Claim submitted!",
            "details": {
                "category": category.name,
                "amount": format!("RM{amount:.2}"),
                "description": description,
                "status": "pending",
                "claim_id": claim_id,
            }
        })))
    }
}

pub struct GetMyClaims {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl GetMyClaims {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetMyClaims {
    fn name(&self) -> &'static str {
        "get_my_claims"
    }

    fn description(&self) -> &'static str {
        "Get the user's recent expense claims and the total still pending."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "approved", "rejected"],
                    "description": "Filter by status, default all"
                }
            }
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let status = match status_filter(&args, CLAIM_STATUSES) {
            Ok(status) => status,
            Err(output) => return Ok(output),
        };
        let claims = self
            .store
            .lock()
            .await
            .claims_for_user(&context.user_id, status, HISTORY_LIMIT)?;

        let total_pending: f64 = claims
            .iter()
            .filter(|c| c.status == "pending")
            .map(|c| c.amount)
            .sum();
        let listed: Vec<Value> = claims
            .iter()
            .map(|c| {
                json!({
                    "category": c.category,
                    "amount": format!("RM{:.2}", c.amount),
                    "description": c.description,
                    "date": c.claim_date,
                    "status": c.status,
                })
            })
            .collect();

        Ok(ToolOutput::success(json!({
            "count": listed.len(),
            "claims": listed,
            "total_pending": format!("RM{total_pending:.2}"),
        })))
    }
}

/// Models send amounts as numbers or as strings like "RM 12.50".
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches("RM")
                .trim_start_matches("rm")
                .chars()
                .filter(|c| *c != ',' && !c.is_whitespace())
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
    .filter(|a: &f64| a.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, seeded_workplace};

    #[test]
    fn amounts_parse_from_numbers_and_strings() {
        assert_eq!(parse_amount(&json!(12.5)), Some(12.5));
        assert_eq!(parse_amount(&json!("RM 1,250.00")), Some(1250.0));
        assert_eq!(parse_amount(&json!("lots")), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }

    #[tokio::test]
    async fn submit_and_list_claims() {
        let store = seeded_workplace();
        let out = SubmitClaim::new(Arc::clone(&store))
            .execute(
                &context("u-1"),
                json!({"category": "transport", "amount": 35, "description": "Grab to client"}),
            )
            .await
            .unwrap();
        assert!(!out.is_error, "{}", out.payload);
        assert_eq!(out.payload["details"]["amount"], "RM35.00");

        let listed = GetMyClaims::new(store)
            .execute(&context("u-1"), json!({}))
            .await
            .unwrap();
        assert_eq!(listed.payload["count"], 1);
        assert_eq!(listed.payload["total_pending"], "RM35.00");
    }

    #[tokio::test]
    async fn over_limit_reports_maximum() {
        let out = SubmitClaim::new(seeded_workplace())
            .execute(
                &context("u-1"),
                json!({"category": "Meals", "amount": 150.0, "description": "team dinner"}),
            )
            .await
            .unwrap();
        assert!(out.is_error);
        assert_eq!(out.payload["max_allowed"], 100.0);
        assert_eq!(out.payload["error"], "Amount RM150.00 exceeds limit");
    }

    #[tokio::test]
    async fn non_positive_and_unknown_category_fail() {
        let tool = SubmitClaim::new(seeded_workplace());
        let zero = tool
            .execute(
                &context("u-1"),
                json!({"category": "Parking", "amount": 0, "description": "x"}),
            )
            .await
            .unwrap();
        assert_eq!(zero.payload["error"], "Amount must be positive");

        let unknown = tool
            .execute(
                &context("u-1"),
                json!({"category": "Yacht", "amount": 10, "description": "x"}),
            )
            .await
            .unwrap();
        assert!(unknown.payload["available_categories"].as_array().unwrap().len() >= 5);
    }

    #[tokio::test]
    async fn categories_include_limits() {
        let out = GetClaimCategories::new(seeded_workplace())
            .execute(&context("u-1"), json!({}))
            .await
            .unwrap();
        assert_eq!(out.payload["categories"][0]["name"], "Transport");
        assert_eq!(out.payload["categories"][0]["max_amount"], 500.0);
    }
}
