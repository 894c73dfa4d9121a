use async_trait::async_trait;
use deskmate_common::{Error, Result};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    ToolDefinition, Usage,
};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language `generateContent` backend.
pub struct GeminiProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn create_request_body(&self, request: &LlmRequest) -> Result<Value> {
        // Gemma endpoints reject systemInstruction, so the prompt rides in the first user turn.
        let inline_system = request.model.starts_with("gemma");
        let mut contents = convert_messages(&request.messages)?;

        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            if inline_system {
                contents.insert(0, json!({ "role": "user", "parts": [{ "text": system }] }));
            }
        }

        let mut generation_config = json!({});
        if let Some(temp) = request.temperature {
            generation_config["temperature"] = json!(temp);
        }
        if let Some(max) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            if !inline_system {
                body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
            }
        }

        if !request.tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": request.tools.iter().map(function_declaration).collect::<Vec<_>>()
            }]);
        }

        Ok(body)
    }
}

/// Gemini rejects OBJECT schemas with no properties, so argument-less tools omit `parameters`.
fn function_declaration(tool: &ToolDefinition) -> Value {
    let mut declaration = json!({
        "name": tool.name,
        "description": tool.description,
    });
    let has_properties = tool.input_schema["properties"]
        .as_object()
        .is_some_and(|p| !p.is_empty());
    if has_properties {
        declaration["parameters"] = tool.input_schema.clone();
    }
    declaration
}

fn convert_messages(messages: &[ChatMessage]) -> Result<Vec<Value>> {
    let mut contents = Vec::with_capacity(messages.len());
    for msg in messages {
        let role = match msg.role {
            ChatRole::User | ChatRole::Tool => "user",
            ChatRole::Assistant => "model",
            ChatRole::System => {
                return Err(Error::Provider(
                    "System messages should be passed via the `system` field, not in `messages`"
                        .to_string(),
                ));
            }
        };

        let parts = match &msg.content {
            MessagePart::Text(text) => vec![json!({ "text": text })],
            MessagePart::Parts(blocks) => {
                let mut parts = Vec::with_capacity(blocks.len());
                for block in blocks {
                    parts.push(convert_block(block)?);
                }
                parts
            }
        };

        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }
    Ok(contents)
}

fn convert_block(block: &ContentBlock) -> Result<Value> {
    Ok(match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::Image { url } => {
            let (mime_type, data) = split_data_url(url)?;
            json!({ "inlineData": { "mimeType": mime_type, "data": data } })
        }
        ContentBlock::ToolUse { name, input, .. } => {
            json!({ "functionCall": { "name": name, "args": input } })
        }
        ContentBlock::ToolResult { name, content, .. } => {
            // functionResponse.response must be an object.
            let response = match serde_json::from_str::<Value>(content) {
                Ok(value @ Value::Object(_)) => value,
                Ok(other) => json!({ "content": other }),
                Err(_) => json!({ "content": content }),
            };
            json!({ "functionResponse": { "name": name, "response": response } })
        }
    })
}

fn split_data_url(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| Error::Provider("Unsupported image URL scheme".to_string()))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::Provider("Invalid data URL".to_string()))?;
    let mime_type = meta.split(';').next().unwrap_or("image/jpeg");
    Ok((mime_type.to_string(), data.to_string()))
}

fn parse_response(raw: &Value, model: &str) -> Result<LlmResponse> {
    let candidate = raw["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| {
            Error::Provider(format!(
                "Gemini API error: response has no candidates, promptFeedback={}",
                raw["promptFeedback"]
            ))
        })?;

    let mut content = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if part["thought"].as_bool() == Some(true) {
                    continue;
                }
                content.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            } else if let Some(call) = part.get("functionCall") {
                let id = call["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                content.push(ContentBlock::ToolUse {
                    id,
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    input: call
                        .get("args")
                        .cloned()
                        .filter(|v| !v.is_null())
                        .unwrap_or_else(|| json!({})),
                });
            }
        }
    }

    let usage = raw.get("usageMetadata").map(|u| Usage {
        input_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
    });

    Ok(LlmResponse {
        content,
        model: raw["modelVersion"].as_str().unwrap_or(model).to_string(),
        usage,
        stop_reason: candidate["finishReason"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.create_request_body(request)?;
        debug!(model = %request.model, tools = request.tools.len(), "sending gemini request");

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Gemini API error: status={}, body={}",
                status.as_u16(),
                error_text
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Gemini response was not valid JSON: {e}")))?;
        parse_response(&raw, &request.model)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Gemini request failed: {e}")))?;
        Ok(response.status().is_success())
    }
}
