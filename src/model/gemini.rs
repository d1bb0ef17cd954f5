//! Gemini API client
//!
//! Implements [`LanguageModel`] over the `generateContent` REST endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{FunctionDeclaration, LanguageModel, ModelReply, ModelRequest};
use crate::error::OrchestrationError;
use crate::models::{FunctionCall, Part, Role, Turn};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: ModelRequest<'_>) -> crate::Result<ModelReply> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "GEMINI_API_KEY not set.".to_string(),
            ));
        }

        let body = build_request(&request);

        debug!(
            model = %self.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GenerateContentResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            info!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        normalize_response(gemini_response)
    }
}

//
// ================= Wire format =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

fn build_request(request: &ModelRequest<'_>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: request.turns.iter().map(to_wire_content).collect(),
        system_instruction: request.system_instruction.map(|text| WireContent {
            role: None,
            parts: vec![WirePart {
                text: Some(text.to_string()),
                ..Default::default()
            }],
        }),
        tools: if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: request.tools.to_vec(),
            }]
        },
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 8192,
        },
    }
}

fn to_wire_content(turn: &Turn) -> WireContent {
    // Function responses travel in user-role contents.
    let role = match turn.role {
        Role::User | Role::Function => "user",
        Role::Model => "model",
    };

    WireContent {
        role: Some(role.to_string()),
        parts: turn.parts.iter().map(to_wire_part).collect(),
    }
}

fn to_wire_part(part: &Part) -> WirePart {
    match part {
        Part::Text { text } => WirePart {
            text: Some(text.clone()),
            ..Default::default()
        },
        Part::InlineData { mime_type, data } => WirePart {
            inline_data: Some(WireInlineData {
                mime_type: mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            }),
            ..Default::default()
        },
        Part::FunctionCall(call) => WirePart {
            function_call: Some(WireFunctionCall {
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            ..Default::default()
        },
        Part::FunctionResponse { name, result } => WirePart {
            function_response: Some(WireFunctionResponse {
                name: name.clone(),
                response: serde_json::json!({ "result": result }),
            }),
            ..Default::default()
        },
    }
}

/// Collapse a raw response into one [`ModelReply`].
///
/// Only the first function call of a candidate is honoured so that tools run
/// one at a time.
fn normalize_response(response: GenerateContentResponse) -> crate::Result<ModelReply> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(OrchestrationError::LlmError(format!(
                "Prompt blocked by Gemini: {}",
                reason
            )));
        }
        return Ok(ModelReply::Empty);
    };

    if candidate.finish_reason.as_deref() == Some("MALFORMED_FUNCTION_CALL") {
        return Ok(ModelReply::Malformed(
            "Gemini reported a malformed function call".to_string(),
        ));
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    if let Some(call) = parts.iter().find_map(|p| p.function_call.as_ref()) {
        return Ok(match &call.args {
            Value::Object(_) => ModelReply::FunctionCall(FunctionCall {
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            Value::Null => ModelReply::FunctionCall(FunctionCall {
                name: call.name.clone(),
                args: Value::Object(Default::default()),
            }),
            other => ModelReply::Malformed(format!(
                "arguments for '{}' are not an object: {}",
                call.name, other
            )),
        });
    }

    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        Ok(ModelReply::Empty)
    } else {
        Ok(ModelReply::Text(text))
    }
}
