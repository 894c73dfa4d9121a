use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use deskmate_common::Result;
use deskmate_db::{NewLeaveRequest, WorkplaceStore};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolOutput, optional_str, required_str, status_filter};

const HISTORY_LIMIT: usize = 10;
const LEAVE_STATUSES: &[&str] = &["pending", "approved", "rejected", "cancelled"];

pub struct GetLeaveBalance {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl GetLeaveBalance {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetLeaveBalance {
    fn name(&self) -> &'static str {
        "get_leave_balance"
    }

    fn description(&self) -> &'static str {
        "Get the user's leave balance for the current year, per leave type. \
         Call this when the user asks about remaining leave, cuti balance or baki cuti."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let year = context.today().year();
        let store = self.store.lock().await;

        let mut balances = Vec::new();
        let mut total_remaining = 0;
        for leave_type in store.leave_types()? {
            let balance = store.leave_balance(&context.user_id, &leave_type, year)?;
            total_remaining += balance.remaining();
            balances.push(json!({
                "type": balance.leave_type,
                "total": balance.total_days,
                "used": balance.used_days,
                "pending": balance.pending_days,
                "remaining": balance.remaining(),
            }));
        }

        Ok(ToolOutput::success(json!({
            "year": year,
            "balances": balances,
            "summary": format!("Total remaining leave: {total_remaining} days"),
        })))
    }
}

pub struct ApplyLeave {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl ApplyLeave {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ApplyLeave {
    fn name(&self) -> &'static str {
        "apply_leave"
    }

    fn description(&self) -> &'static str {
        "Apply for leave on behalf of the user. Call this when the user wants to apply, \
         mohon cuti or request time off. Dates are inclusive."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "leave_type": {
                    "type": "string",
                    "description": "Leave type: Annual, Medical (MC), Emergency or Unpaid"
                },
                "start_date": { "type": "string", "description": "First day, YYYY-MM-DD" },
                "end_date": { "type": "string", "description": "Last day, YYYY-MM-DD" },
                "reason": { "type": "string", "description": "Optional reason" }
            },
            "required": ["leave_type", "start_date", "end_date"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let requested_type = required_str(&args, "leave_type")?;
        let start_raw = required_str(&args, "start_date")?;
        let end_raw = required_str(&args, "end_date")?;
        let reason = optional_str(&args, "reason").unwrap_or_default();

        let store = self.store.lock().await;
        let Some(leave_type) = store.find_leave_type(requested_type)? else {
            let available: Vec<String> =
                store.leave_types()?.into_iter().map(|t| t.name).collect();
            return Ok(ToolOutput::error_with(
                format!("Leave type '{requested_type}' not found"),
                json!({
                    "available_types": available,
                    "suggestion": "Please specify one of the available leave types",
                }),
            ));
        };

        let (Ok(start), Ok(end)) = (parse_date(start_raw), parse_date(end_raw)) else {
            return Ok(ToolOutput::error_with(
                "Invalid date format. Please use YYYY-MM-DD format",
                json!({ "suggestion": "Example: 2026-02-01" }),
            ));
        };

        let total_days = (end - start).num_days() + 1;
        if total_days <= 0 {
            return Ok(ToolOutput::error("End date must be after start date"));
        }
        let today = context.today();
        if start < today {
            return Ok(ToolOutput::error("Cannot apply leave for past dates"));
        }

        let year = today.year();
        let balance = store.leave_balance(&context.user_id, &leave_type, year)?;
        let remaining = balance.remaining();
        if total_days > remaining {
            return Ok(ToolOutput::error_with(
                format!("Insufficient {} balance!", leave_type.name),
                json!({
                    "requested": total_days,
                    "remaining": remaining,
                    "suggestion": format!(
                        "You only have {remaining} days. Consider applying for fewer days or a different leave type."
                    ),
                }),
            ));
        }

        let leave_id = store.create_leave_request(&NewLeaveRequest {
            user_id: context.user_id.clone(),
            leave_type_id: leave_type.id,
            start_date: start,
            end_date: end,
            total_days,
            reason: reason.to_string(),
            year,
        })?;

        Ok(ToolOutput::success(json!({
            "message": format!("✅ {} leave applied successfully!", leave_type.name),
            "details": {
                "type": leave_type.name,
                "start": start_raw,
                "end": end_raw,
                "days": total_days,
                "status": "pending",
                "leave_id": leave_id,
            }
        })))
    }
}

pub struct GetMyLeaves {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl GetMyLeaves {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetMyLeaves {
    fn name(&self) -> &'static str {
        "get_my_leaves"
    }

    fn description(&self) -> &'static str {
        "Get the user's recent leave requests. Call when the user asks about leave history, \
         pending leave or past requests."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "approved", "rejected", "cancelled"],
                    "description": "Filter by status, default all"
                }
            }
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let status = match status_filter(&args, LEAVE_STATUSES) {
            Ok(status) => status,
            Err(output) => return Ok(output),
        };
        let store = self.store.lock().await;
        let leaves: Vec<Value> = store
            .leave_requests(&context.user_id, status, HISTORY_LIMIT)?
            .into_iter()
            .map(|leave| {
                json!({
                    "id": leave.id,
                    "type": leave.leave_type,
                    "start": leave.start_date,
                    "end": leave.end_date,
                    "days": leave.total_days,
                    "status": leave.status,
                    "reason": leave.reason,
                })
            })
            .collect();

        Ok(ToolOutput::success(json!({
            "count": leaves.len(),
            "leaves": leaves,
        })))
    }
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
}
