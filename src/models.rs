//! Core data models for the workspace agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

//
// ================= Request =================
//

/// A free-text instruction with optional attachments (local file paths).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub instruction: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl AgentRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Instruction text plus the attachment list the model sees.
    pub fn full_text(&self) -> String {
        if self.files.is_empty() {
            self.instruction.clone()
        } else {
            format!(
                "{}\n\nAttached files: {}",
                self.instruction,
                self.files.join(", ")
            )
        }
    }
}

//
// ================= Category =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Mail,
    Storage,
    Expense,
    General,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Mail,
        Category::Storage,
        Category::Expense,
        Category::General,
    ];

    /// Parse a model-produced label. Never fails: unknown labels are general.
    pub fn from_label(label: &str) -> Self {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| c == '\'' || c == '"' || c == '`' || c == '.' || c == '*')
            .trim()
            .to_lowercase();

        match cleaned.as_str() {
            "mail" | "email" | "gmail" => Category::Mail,
            "storage" | "drive" => Category::Storage,
            "expense" => Category::Expense,
            _ => Category::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Mail => "mail",
            Category::Storage => "storage",
            Category::Expense => "expense",
            Category::General => "general",
        }
    }

    /// Whether requests in this category go through the tool-calling loop.
    pub fn uses_tools(&self) -> bool {
        !matches!(self, Category::General)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        mime_type: String,
        #[serde(skip)]
        data: Vec<u8>,
    },
    FunctionCall(FunctionCall),
    FunctionResponse {
        name: String,
        result: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn model_call(call: FunctionCall) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::FunctionCall(call)],
        }
    }

    pub fn function_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Function,
            parts: vec![Part::FunctionResponse {
                name: result.tool_name.clone(),
                result: result.output.clone(),
            }],
        }
    }
}

/// Append-only exchange between the user, the model and tool results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of tool results fed back to the model so far.
    pub fn tool_round_trips(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == Role::Function)
            .count()
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    NotFound,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub output: String,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
}

//
// ================= Reimbursement =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Declined => "declined",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = crate::error::OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "declined" => Ok(RequestStatus::Declined),
            other => Err(crate::error::OrchestrationError::InvalidRequest(format!(
                "unknown status '{}' (expected pending, approved or declined)",
                other
            ))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by the employee when submitting a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewReimbursement {
    pub filename: String,
    pub file_path: String,
    pub size: u64,
    pub receipt_sha256: String,
    pub uploaded_by: String,
    pub emp_name: String,
    pub emp_id: String,
    pub emp_amount: String,
    pub emp_date: String,
    pub emp_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReimbursementRequest {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub size: u64,
    #[serde(default)]
    pub receipt_sha256: String,
    pub uploaded_by: String,
    pub emp_name: String,
    pub emp_id: String,
    pub emp_amount: String,
    pub emp_date: String,
    pub emp_reason: String,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

impl ReimbursementRequest {
    pub fn from_submission(id: String, new: NewReimbursement, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            filename: new.filename,
            file_path: new.file_path,
            size: new.size,
            receipt_sha256: new.receipt_sha256,
            uploaded_by: new.uploaded_by,
            emp_name: new.emp_name,
            emp_id: new.emp_id,
            emp_amount: new.emp_amount,
            emp_date: new.emp_date,
            emp_reason: new.emp_reason,
            created_at,
            status: RequestStatus::Pending,
            decided_at: None,
            decision_reason: None,
        }
    }
}

//
// ================= Event =================
//

/// One line of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_without_files() {
        let request = AgentRequest::new("List my last 5 emails");
        assert_eq!(request.full_text(), "List my last 5 emails");
    }

    #[test]
    fn test_full_text_with_files() {
        let request = AgentRequest::new("Upload these")
            .with_files(vec!["/tmp/a.pdf".to_string(), "/tmp/b.txt".to_string()]);
        assert_eq!(
            request.full_text(),
            "Upload these\n\nAttached files: /tmp/a.pdf, /tmp/b.txt"
        );
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Category::from_label(" Mail\n"), Category::Mail);
        assert_eq!(Category::from_label("'gmail'"), Category::Mail);
        assert_eq!(Category::from_label("DRIVE"), Category::Storage);
        assert_eq!(Category::from_label("expense."), Category::Expense);
        assert_eq!(Category::from_label("general"), Category::General);
        assert_eq!(Category::from_label("calendar"), Category::General);
        assert_eq!(Category::from_label(""), Category::General);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Approved".parse::<RequestStatus>().unwrap(), RequestStatus::Approved);
        assert!("rejected".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn test_reimbursement_uses_camel_case() {
        let record = ReimbursementRequest::from_submission(
            "1700000000000".to_string(),
            NewReimbursement {
                filename: "receipt.pdf".to_string(),
                file_path: "/static/uploads/receipt.pdf".to_string(),
                size: 42,
                receipt_sha256: "ab".to_string(),
                uploaded_by: "jane@example.com".to_string(),
                emp_name: "Jane".to_string(),
                emp_id: "E-7".to_string(),
                emp_amount: "12.50".to_string(),
                emp_date: "2026-10-01".to_string(),
                emp_reason: "Taxi".to_string(),
            },
            Utc::now(),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["uploadedBy"], "jane@example.com");
        assert_eq!(json["status"], "pending");
        assert!(json.get("decidedAt").is_none());
    }
}
