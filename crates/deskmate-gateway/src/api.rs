use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use deskmate_agents::TurnRequest;
use deskmate_common::Error;
use deskmate_db::Conversation;
use deskmate_security::InputValidator;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::state::SharedState;

pub type ApiResponse = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

/// Storage and internal failures are logged in full and reported generically.
fn internal_error(e: Error) -> ApiResponse {
    error!("request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn bad_request(e: Error) -> ApiResponse {
    let message = match e {
        Error::Gateway(message) => message,
        other => other.to_string(),
    };
    error_response(StatusCode::BAD_REQUEST, message)
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NudgeQuery {
    pub user_id: String,
    #[serde(default = "default_true")]
    pub unread_only: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Base64 image or `data:` URL.
    #[serde(default)]
    pub image_data: Option<String>,
}

/// Look up a conversation the user owns.
async fn owned_conversation(
    state: &SharedState,
    conversation_id: &str,
    user_id: &str,
) -> Result<Conversation, ApiResponse> {
    let found = state
        .stores
        .conversations
        .lock()
        .await
        .get_conversation(conversation_id)
        .map_err(internal_error)?;
    match found {
        None => Err(error_response(StatusCode::NOT_FOUND, "Conversation not found")),
        Some(c) if c.user_id != user_id => Err(error_response(
            StatusCode::FORBIDDEN,
            "You cannot access another user's conversation",
        )),
        Some(c) => Ok(c),
    }
}

pub async fn chat(State(state): State<SharedState>, Json(body): Json<ChatRequest>) -> ApiResponse {
    let user_id = match InputValidator::user_id(&body.user_id) {
        Ok(id) => id.to_string(),
        Err(e) => return bad_request(e),
    };
    let message = match InputValidator::message(&body.message) {
        Ok(m) => m,
        Err(e) => return bad_request(e),
    };
    let image = match body.image_data.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(raw) => match InputValidator::image(raw) {
            Ok(image) => Some(image),
            Err(e) => return bad_request(e),
        },
        None => None,
    };

    let conversation = match body.conversation_id.as_deref().filter(|c| !c.is_empty()) {
        Some(id) => match owned_conversation(&state, id, &user_id).await {
            Ok(c) => c,
            Err(response) => return response,
        },
        None => {
            let created = state
                .stores
                .conversations
                .lock()
                .await
                .create_conversation(&user_id, &message);
            match created {
                Ok(c) => {
                    info!("new conversation {} for {}", c.id, user_id);
                    c
                }
                Err(e) => return internal_error(e),
            }
        }
    };

    let history = match state
        .stores
        .conversations
        .lock()
        .await
        .load_messages(&conversation.id)
    {
        Ok(history) => history,
        Err(e) => return internal_error(e),
    };

    let result = state
        .supervisor
        .run_turn(TurnRequest {
            user_message: message.clone(),
            user_id,
            conversation_id: conversation.id.clone(),
            history,
            image,
        })
        .await;

    if !result.tool_actions.is_empty() {
        info!("turn executed {} tool action(s)", result.tool_actions.len());
    }
    if let Err(e) = state
        .stores
        .conversations
        .lock()
        .await
        .append_messages(&conversation.id, &result.messages)
    {
        warn!("failed to persist turn for {}: {}", conversation.id, e);
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": result.is_success(),
            "conversation_id": result.conversation_id,
            "message": message,
            "response": result.response_text,
            "tool_actions": result.tool_actions,
            "model_used": result.model_used,
        })),
    )
}

pub async fn list_conversations(
    State(state): State<SharedState>,
    Query(query): Query<UserQuery>,
) -> ApiResponse {
    let result = state
        .stores
        .conversations
        .lock()
        .await
        .list_conversations(&query.user_id);
    match result {
        Ok(conversations) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "total": conversations.len(),
                "data": conversations,
            })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn get_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResponse {
    let conversation = match owned_conversation(&state, &id, &query.user_id).await {
        Ok(c) => c,
        Err(response) => return response,
    };
    let messages = match state.stores.conversations.lock().await.load_messages(&id) {
        Ok(messages) => messages,
        Err(e) => return internal_error(e),
    };

    let mut data = match serde_json::to_value(&conversation) {
        Ok(data) => data,
        Err(e) => return internal_error(e.into()),
    };
    data["messages"] = json!(messages);
    (StatusCode::OK, Json(json!({ "success": true, "data": data })))
}

pub async fn delete_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResponse {
    if let Err(response) = owned_conversation(&state, &id, &query.user_id).await {
        return response;
    }
    match state.stores.conversations.lock().await.delete_conversation(&id) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "Conversation deleted" })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn list_nudges(
    State(state): State<SharedState>,
    Query(query): Query<NudgeQuery>,
) -> ApiResponse {
    let result = state
        .stores
        .nudges
        .lock()
        .await
        .list(&query.user_id, query.unread_only);
    match result {
        Ok(nudges) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "total": nudges.len(),
                "data": nudges,
            })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn mark_nudge_read(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResponse {
    match state.stores.nudges.lock().await.mark_read(&id, &query.user_id) {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "Nudge marked as read" })),
        ),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Nudge not found"),
        Err(e) => internal_error(e),
    }
}
