//! Bounded tool dispatch loop
//!
//! The model proposes at most one function call per turn; the loop executes
//! it, feeds the result back and asks again until the model answers in text
//! or the turn budget runs out.

use crate::audit::SessionLog;
use crate::model::{FunctionDeclaration, LanguageModel, ModelReply, ModelRequest};
use crate::models::{Conversation, ToolResult, Turn};
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Model calls allowed per request. One tool execution at most per call.
pub const MAX_TOOL_TURNS: usize = 10;

pub const NO_FINAL_RESPONSE: &str = "No final response generated after tool calls.";
pub const MALFORMED_CALL: &str = "Error: the model returned a malformed function call.";

const CLARIFY_MALFORMED: &str = "Your last function call could not be parsed. \
Reissue it with valid arguments that match the tool declaration, \
or ask the user for the missing information.";

pub const SYSTEM_INSTRUCTION: &str = "You are an AI agent with access to tools. \
Call tools only with valid arguments as defined. \
For upload_drive_file, require 'filepath' (local path) and optional 'folder_id'. \
If arguments are missing from the request, ask for clarification instead of guessing. \
If the request includes 'Attached files:' followed by comma-separated file paths, treat those \
as the local 'filepath' arguments for upload (call the tool separately for each file if multiple). \
For expense reimbursement requests, use validate_reimbursement with the receipt path from the \
attached files (assume one file is the receipt; deny if no file).";

/// Everything a finished loop produced.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub output: String,
    pub tool_results: Vec<ToolResult>,
    pub model_calls: usize,
}

pub struct ToolDispatchLoop {
    model: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    declarations: Vec<FunctionDeclaration>,
    max_turns: usize,
}

impl ToolDispatchLoop {
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>) -> Self {
        let declarations = registry.declarations();
        Self {
            model,
            registry,
            declarations,
            max_turns: MAX_TOOL_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub async fn run(&self, request_text: &str, session: &SessionLog) -> String {
        self.execute(request_text, session).await.output
    }

    pub async fn execute(&self, request_text: &str, session: &SessionLog) -> DispatchOutcome {
        let mut conversation = Conversation::new();
        conversation.push(Turn::user(request_text));

        let mut tool_results = Vec::new();
        let mut model_calls = 0;
        let mut malformed_seen = false;
        let mut turns_left = self.max_turns;

        let finish = |output: String, tool_results: Vec<ToolResult>, model_calls: usize| {
            DispatchOutcome {
                output,
                tool_results,
                model_calls,
            }
        };

        while turns_left > 0 {
            turns_left -= 1;
            model_calls += 1;

            let request = ModelRequest::new(conversation.turns())
                .with_system(SYSTEM_INSTRUCTION)
                .with_tools(&self.declarations);

            let reply = match self.model.generate(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, model_calls, "Model call failed inside dispatch loop");
                    session.log_error("model_error", &e.to_string(), None).await;
                    return finish(format!("Agent Error: {}", e), tool_results, model_calls);
                }
            };

            match reply {
                ModelReply::Text(text) => {
                    session
                        .log_model_response(self.model.model_name(), request_text, &text)
                        .await;
                    info!(model_calls, tool_calls = tool_results.len(), "Dispatch loop finished");
                    return finish(text, tool_results, model_calls);
                }
                ModelReply::Empty => {
                    warn!(model_calls, "Model returned neither text nor a function call");
                    session
                        .log_error("empty_response", NO_FINAL_RESPONSE, None)
                        .await;
                    return finish(NO_FINAL_RESPONSE.to_string(), tool_results, model_calls);
                }
                ModelReply::Malformed(detail) => {
                    if malformed_seen {
                        warn!(%detail, "Second malformed function call, giving up");
                        session.log_error("malformed_function_call", &detail, None).await;
                        return finish(MALFORMED_CALL.to_string(), tool_results, model_calls);
                    }
                    malformed_seen = true;
                    debug!(%detail, "Malformed function call, asking the model to retry");
                    conversation.push(Turn::user(CLARIFY_MALFORMED));
                }
                ModelReply::FunctionCall(call) => {
                    debug!(tool_name = %call.name, turns_left, "Model requested tool");

                    let result = self.registry.dispatch(&call).await;
                    session
                        .log_tool_call(&call.name, &call.args, Some(&result.output))
                        .await;

                    conversation.push(Turn::model_call(call));
                    conversation.push(Turn::function_result(&result));
                    tool_results.push(result);
                }
            }
        }

        warn!(
            max_turns = self.max_turns,
            tool_round_trips = conversation.tool_round_trips(),
            "Turn budget exhausted without a final response"
        );
        session
            .log_error("turn_limit_exhausted", NO_FINAL_RESPONSE, None)
            .await;
        finish(NO_FINAL_RESPONSE.to_string(), tool_results, model_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SessionRecord;
    use crate::model::ScriptedModel;
    use crate::models::{ExecutionStatus, FunctionCall, Part, Role};
    use crate::tools::testing::{EchoTool, FailingTool, PanickingTool};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn call(name: &str, args: serde_json::Value) -> ModelReply {
        ModelReply::FunctionCall(FunctionCall {
            name: name.to_string(),
            args,
        })
    }

    fn registry_with_echo() -> (Arc<ToolRegistry>, Arc<EchoTool>) {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new();
        registry.register(echo.clone());
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(PanickingTool));
        (Arc::new(registry), echo)
    }

    #[tokio::test]
    async fn test_call_then_text() {
        let (registry, echo) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![
            call("echo", json!({ "text": "hi" })),
            ModelReply::Text("All done".to_string()),
        ]));
        let session = SessionLog::in_memory();

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .execute("say hi", &session)
            .await;

        assert_eq!(outcome.output, "All done");
        assert_eq!(outcome.model_calls, 2);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        // Second request carries the call and its response.
        let second = &model.requests()[1];
        assert_eq!(second.turns.len(), 3);
        assert_eq!(second.turns[1].role, Role::Model);
        assert_eq!(second.turns[2].role, Role::Function);
        assert_eq!(second.system_instruction.as_deref(), Some(SYSTEM_INSTRUCTION));
        assert!(second.tool_names.contains(&"echo".to_string()));

        let kinds: Vec<&str> = session.entries().await.iter().map(|e| e.record.kind()).collect();
        assert_eq!(kinds, vec!["tool_call", "model_response"]);
    }

    #[tokio::test]
    async fn test_always_calling_model_stops_after_max_turns() {
        let (registry, echo) = registry_with_echo();
        let model = Arc::new(ScriptedModel::repeating(call("echo", json!({ "text": "again" }))));
        let session = SessionLog::in_memory();

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .execute("loop forever", &session)
            .await;

        assert_eq!(outcome.output, NO_FINAL_RESPONSE);
        assert_eq!(model.call_count(), MAX_TOOL_TURNS);
        assert_eq!(echo.calls.load(Ordering::SeqCst), MAX_TOOL_TURNS);
        assert_eq!(outcome.tool_results.len(), MAX_TOOL_TURNS);

        let entries = session.entries().await;
        assert!(matches!(
            &entries.last().unwrap().record,
            SessionRecord::Error { error_type, .. } if error_type == "turn_limit_exhausted"
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_sentinel_back() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![
            call("delete_everything", json!({})),
            ModelReply::Text("I could not do that".to_string()),
        ]));

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .execute("delete", &SessionLog::in_memory())
            .await;

        assert_eq!(outcome.output, "I could not do that");
        assert_eq!(outcome.tool_results[0].status, ExecutionStatus::NotFound);
        assert_eq!(outcome.tool_results[0].output, crate::tools::TOOL_NOT_FOUND);

        let fed_back = &model.requests()[1].turns[2].parts[0];
        assert!(matches!(
            fed_back,
            Part::FunctionResponse { result, .. } if result == crate::tools::TOOL_NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_rejected_before_execution() {
        let (registry, echo) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![
            call("echo", json!({ "text": "hi", "volume": 11 })),
            ModelReply::Text("Sorry".to_string()),
        ]));

        let outcome = ToolDispatchLoop::new(model, registry)
            .execute("echo loudly", &SessionLog::in_memory())
            .await;

        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.tool_results[0].status, ExecutionStatus::Rejected);
        assert!(outcome.tool_results[0]
            .output
            .starts_with("Error: invalid arguments for echo"));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_tools_become_error_strings() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![
            call("failing", json!({})),
            call("panicking", json!({})),
            ModelReply::Text("Both broke".to_string()),
        ]));

        let outcome = ToolDispatchLoop::new(model, registry)
            .execute("break things", &SessionLog::in_memory())
            .await;

        assert_eq!(outcome.output, "Both broke");
        assert!(outcome.tool_results[0].output.starts_with("Error executing failing"));
        assert!(outcome.tool_results[1].output.starts_with("Error executing panicking"));
        assert!(outcome
            .tool_results
            .iter()
            .all(|r| r.status == ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn test_malformed_call_retries_once() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Malformed("bad args".to_string()),
            ModelReply::Text("Which file should I upload?".to_string()),
        ]));

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .execute("upload it", &SessionLog::in_memory())
            .await;

        assert_eq!(outcome.output, "Which file should I upload?");
        let retry = &model.requests()[1];
        assert_eq!(retry.turns.len(), 2);
        assert_eq!(retry.turns[1], Turn::user(CLARIFY_MALFORMED));
    }

    #[tokio::test]
    async fn test_second_malformed_call_is_terminal() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::repeating(ModelReply::Malformed(
            "bad args".to_string(),
        )));

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .execute("upload it", &SessionLog::in_memory())
            .await;

        assert_eq!(outcome.output, MALFORMED_CALL);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_reply_is_terminal() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::Empty]));

        let output = ToolDispatchLoop::new(model, registry)
            .run("anything", &SessionLog::in_memory())
            .await;
        assert_eq!(output, NO_FINAL_RESPONSE);
    }

    #[tokio::test]
    async fn test_model_failure_is_reported_as_agent_error() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::failing("quota exceeded"));

        let output = ToolDispatchLoop::new(model, registry)
            .run("anything", &SessionLog::in_memory())
            .await;
        assert_eq!(output, "Agent Error: LLM error: quota exceeded");
    }

    #[tokio::test]
    async fn test_custom_turn_budget() {
        let (registry, _) = registry_with_echo();
        let model = Arc::new(ScriptedModel::repeating(call("echo", json!({ "text": "x" }))));

        let outcome = ToolDispatchLoop::new(model.clone(), registry)
            .with_max_turns(3)
            .execute("loop", &SessionLog::in_memory())
            .await;
        assert_eq!(outcome.output, NO_FINAL_RESPONSE);
        assert_eq!(model.call_count(), 3);
    }
}
