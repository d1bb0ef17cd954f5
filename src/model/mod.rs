//! Language model seam
//!
//! Every model call in the crate goes through [`LanguageModel`]. The transport
//! normalizes whatever the provider returns into a single [`ModelReply`].

use crate::error::OrchestrationError;
use crate::models::{FunctionCall, Turn};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

/// A tool the model may call, described by a JSON schema object.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_instruction: Option<&'a str>,
    pub turns: &'a [Turn],
    pub tools: &'a [FunctionDeclaration],
}

impl<'a> ModelRequest<'a> {
    pub fn new(turns: &'a [Turn]) -> Self {
        Self {
            system_instruction: None,
            turns,
            tools: &[],
        }
    }

    pub fn with_system(mut self, system_instruction: &'a str) -> Self {
        self.system_instruction = Some(system_instruction);
        self
    }

    pub fn with_tools(mut self, tools: &'a [FunctionDeclaration]) -> Self {
        self.tools = tools;
        self
    }
}

/// Normalized model response envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    FunctionCall(FunctionCall),
    /// The model tried to call a function but the call could not be decoded.
    Malformed(String),
    Empty,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelReply>;
}

/// Single-shot text completion without tools.
pub async fn complete_text(
    model: &dyn LanguageModel,
    system_instruction: Option<&str>,
    prompt: &str,
) -> Result<String> {
    let turns = [Turn::user(prompt)];
    let mut request = ModelRequest::new(&turns);
    if let Some(system) = system_instruction {
        request = request.with_system(system);
    }

    match model.generate(request).await? {
        ModelReply::Text(text) => Ok(text),
        ModelReply::Empty => Err(OrchestrationError::LlmError(
            "Empty response from model".to_string(),
        )),
        ModelReply::FunctionCall(call) => Err(OrchestrationError::LlmError(format!(
            "Unexpected function call '{}' in a text-only request",
            call.name
        ))),
        ModelReply::Malformed(detail) => Err(OrchestrationError::LlmError(detail)),
    }
}

/// What a [`ScriptedModel`] saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system_instruction: Option<String>,
    pub turns: Vec<Turn>,
    pub tool_names: Vec<String>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(ModelReply),
    Fail(String),
}

/// In-process model for development & testing
/// Replays queued replies in order, then repeats the fallback.
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().map(Scripted::Reply).collect()),
            fallback: Scripted::Fail("scripted model has no more replies".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same reply.
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Scripted::Reply(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Scripted::Fail(message.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelReply> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                system_instruction: request.system_instruction.map(str::to_string),
                turns: request.turns.to_vec(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let next = self
            .queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        match next {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Fail(message) => Err(OrchestrationError::LlmError(message)),
        }
    }
}
