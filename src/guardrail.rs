//! Chat guardrail
//!
//! Deterministic denylist check run before any model sees a chat message.

use crate::audit::{EventLog, EVENT_SECURITY};
use crate::Result;
use serde_json::json;
use tracing::{info, warn};

/// Matched case-insensitively as substrings, in this order.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "system prompt",
    "instructions",
    "directives",
    "ignore",
    "reveal",
    "secret",
    "password",
    "api key",
    "token",
    "credentials",
    "configuration",
    "admin",
    "override",
    "bypass",
    "jailbreak",
    "prompt injection",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Allowed,
    Blocked { term: &'static str },
}

impl GuardrailVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardrailVerdict::Blocked { .. })
    }
}

pub struct ChatGuardrail {
    terms: &'static [&'static str],
}

impl ChatGuardrail {
    pub fn new() -> Self {
        Self {
            terms: DEFAULT_DENYLIST,
        }
    }

    /// First denylisted term contained in `message`, if any.
    pub fn check(&self, message: &str) -> GuardrailVerdict {
        let lowered = message.to_lowercase();
        self.terms
            .iter()
            .find(|term| lowered.contains(&term.to_lowercase()))
            .map(|term| GuardrailVerdict::Blocked { term: *term })
            .unwrap_or(GuardrailVerdict::Allowed)
    }

    /// Check `message` and, when blocked, append one security event.
    pub async fn enforce(&self, message: &str, events: &EventLog) -> Result<GuardrailVerdict> {
        let verdict = self.check(message);

        match &verdict {
            GuardrailVerdict::Allowed => {
                info!(message_len = message.len(), "Chat message passed guardrail");
            }
            GuardrailVerdict::Blocked { term } => {
                warn!(blocked_term = *term, "Chat message blocked by guardrail");
                events
                    .append(
                        EVENT_SECURITY,
                        "redteam",
                        "prompt_injection_attempt",
                        json!({
                            "payload": message,
                            "blocked_term": term,
                            "flagged_count": 1,
                        }),
                    )
                    .await?;
            }
        }

        Ok(verdict)
    }
}

impl Default for ChatGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

pub fn refusal_message(term: &str) -> String {
    format!(
        "I cannot respond to questions about {}. Please ask about reimbursement policies, procedures, or your claim status.",
        term
    )
}
