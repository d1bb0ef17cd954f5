//! Main orchestrator
//!
//! INPUT → CLASSIFY → ROUTE (tool loop | general) → OUTPUT
//!
//! Every step is recorded in the caller's [`SessionLog`]. Nothing here
//! returns an error: failures are folded into the answer string.

use crate::audit::{EventLog, SessionLog, EVENT_ERROR};
use crate::classifier::RequestClassifier;
use crate::conversational::GeneralAssistant;
use crate::execution::{ToolDispatchLoop, MALFORMED_CALL, NO_FINAL_RESPONSE};
use crate::model::LanguageModel;
use crate::models::{AgentRequest, Category};
use crate::tools::ToolRegistry;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Answer plus the category the request was routed to. `category` is `None`
/// when classification itself failed.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub category: Option<Category>,
    pub answer: String,
}

pub struct Orchestrator {
    classifier: RequestClassifier,
    dispatch: ToolDispatchLoop,
    general: GeneralAssistant,
    events: Option<Arc<EventLog>>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            classifier: RequestClassifier::new(model.clone()),
            dispatch: ToolDispatchLoop::new(model.clone(), registry),
            general: GeneralAssistant::new(model),
            events: None,
        }
    }

    /// Failed requests are also appended to `events` as `error` events.
    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dispatch_loop(&self) -> &ToolDispatchLoop {
        &self.dispatch
    }

    pub fn general(&self) -> &GeneralAssistant {
        &self.general
    }

    pub async fn handle_request(&self, request: &AgentRequest, session: &SessionLog) -> String {
        self.handle(request, session).await.answer
    }

    pub async fn handle(&self, request: &AgentRequest, session: &SessionLog) -> OrchestrationResult {
        let start = Instant::now();
        let full_text = request.full_text();

        info!(
            session_id = session.session_id(),
            attachments = request.files.len(),
            "Orchestrator: request received"
        );

        // === INPUT ===
        session
            .log_user_input(&request.instruction, &request.files)
            .await;

        // === CLASSIFY ===
        let category = match self.classifier.classify(&full_text).await {
            Ok(category) => category,
            Err(e) => {
                let answer = format!("Routing Error: {}", e);
                warn!(session_id = session.session_id(), error = %e, "Classification failed");
                session.log_error("routing_error", &e.to_string(), None).await;
                self.record_failure(&full_text, &answer).await;
                session.log_final_output(&answer).await;
                return OrchestrationResult {
                    category: None,
                    answer,
                };
            }
        };
        session
            .log_classification(category.as_str(), &full_text)
            .await;

        // === ROUTE ===
        let answer = if category.uses_tools() {
            session.log_routing("dispatch_loop", category.as_str()).await;
            self.dispatch.run(&full_text, session).await
        } else {
            session.log_routing("general_assistant", "ask").await;
            self.general.ask_logged(&full_text, session).await
        };

        if is_failed_answer(&answer) {
            self.record_failure(&full_text, &answer).await;
        }

        // === OUTPUT ===
        session.log_final_output(&answer).await;

        info!(
            session_id = session.session_id(),
            %category,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Orchestrator: request complete"
        );

        OrchestrationResult {
            category: Some(category),
            answer,
        }
    }

    async fn record_failure(&self, request_text: &str, message: &str) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events
            .append(
                EVENT_ERROR,
                "system",
                "agent_failure",
                json!({ "request": request_text, "message": message }),
            )
            .await
        {
            warn!(error = %e, "Failed to record agent failure event");
        }
    }
}

/// Answers the dispatch loop produces when it gave up.
fn is_failed_answer(answer: &str) -> bool {
    answer.starts_with("Agent Error:") || answer == NO_FINAL_RESPONSE || answer == MALFORMED_CALL
}
