//! General assistant
//!
//! Requests classified as general skip the tool loop and get a single
//! text-only model call.

use crate::audit::SessionLog;
use crate::model::{complete_text, LanguageModel};
use std::sync::Arc;
use tracing::{info, warn};

pub struct GeneralAssistant {
    model: Arc<dyn LanguageModel>,
}

impl GeneralAssistant {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Answer `prompt` directly. Failures come back as `"Error: <detail>"`.
    pub async fn ask(&self, prompt: &str) -> String {
        match complete_text(self.model.as_ref(), None, prompt).await {
            Ok(answer) => {
                info!(model = self.model.model_name(), answer_len = answer.len(), "General answer generated");
                answer
            }
            Err(e) => {
                warn!(error = %e, "General model call failed");
                format!("Error: {}", e)
            }
        }
    }

    /// [`ask`](Self::ask) that also records the exchange in the session.
    pub async fn ask_logged(&self, prompt: &str, session: &SessionLog) -> String {
        let answer = self.ask(prompt).await;
        if answer.starts_with("Error: ") {
            session.log_error("general_model_error", &answer, None).await;
        } else {
            session
                .log_model_response(self.model.model_name(), prompt, &answer)
                .await;
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelReply, ScriptedModel};

    #[tokio::test]
    async fn test_ask_returns_text_without_tools() {
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::Text(
            "Paris".to_string(),
        )]));
        let assistant = GeneralAssistant::new(model.clone());

        assert_eq!(assistant.ask("Capital of France?").await, "Paris");
        assert!(model.requests()[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_failure_becomes_error_string() {
        let assistant = GeneralAssistant::new(Arc::new(ScriptedModel::failing("quota")));
        let answer = assistant.ask("hi").await;
        assert!(answer.starts_with("Error: "));
        assert!(answer.contains("quota"));
    }

    #[tokio::test]
    async fn test_ask_logged_records_response() {
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::Text("Hello".to_string())]));
        let session = SessionLog::in_memory();

        GeneralAssistant::new(model).ask_logged("hi", &session).await;

        let entries = session.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.kind(), "model_response");
    }
}
