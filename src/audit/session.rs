//! Per-request session log
//!
//! A [`SessionLog`] is created for each agent request and passed down
//! explicitly. It writes two files side by side: a JSON array that is
//! rewritten on every append and a human-readable `.log`. Every record is
//! mirrored to `tracing` as well.

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tool results longer than this are cut in the readable log.
pub const READABLE_RESULT_LIMIT: usize = 500;

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRecord {
    UserInput {
        input_text: String,
        uploaded_files: Vec<String>,
    },
    Classification {
        category: String,
        request: String,
    },
    Routing {
        destination: String,
        method: String,
    },
    ToolCall {
        tool_name: String,
        parameters: Value,
        result: Option<String>,
    },
    ModelResponse {
        model_name: String,
        prompt: String,
        response: String,
    },
    FinalOutput {
        output: String,
    },
    Error {
        error_type: String,
        message: String,
        context: Option<Value>,
    },
    SessionEnd {},
}

impl SessionRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionRecord::UserInput { .. } => "user_input",
            SessionRecord::Classification { .. } => "classification",
            SessionRecord::Routing { .. } => "routing",
            SessionRecord::ToolCall { .. } => "tool_call",
            SessionRecord::ModelResponse { .. } => "model_response",
            SessionRecord::FinalOutput { .. } => "final_output",
            SessionRecord::Error { .. } => "error",
            SessionRecord::SessionEnd {} => "session_end",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub record: SessionRecord,
}

struct SessionFiles {
    json_path: PathBuf,
    readable_path: PathBuf,
}

/// Where new sessions write. `dir: None` keeps sessions in memory.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub dir: Option<PathBuf>,
    pub console: bool,
}

impl SessionSettings {
    pub fn new(dir: impl Into<PathBuf>, console: bool) -> Self {
        Self {
            dir: Some(dir.into()),
            console,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a session, degrading to an in-memory one if the files cannot be
    /// created.
    pub async fn start(&self) -> SessionLog {
        let Some(dir) = &self.dir else {
            return SessionLog::in_memory();
        };
        match SessionLog::create(dir, self.console).await {
            Ok(session) => session,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to create session log files, keeping session in memory");
                SessionLog::in_memory()
            }
        }
    }
}

pub struct SessionLog {
    session_id: String,
    files: Option<SessionFiles>,
    console: bool,
    entries: Mutex<Vec<SessionEntry>>,
}

impl SessionLog {
    /// Start a session writing `session_<id>.json` and `session_<id>.log`
    /// under `dir`.
    pub async fn create(dir: &Path, console: bool) -> crate::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let session_id = new_session_id();
        let files = SessionFiles {
            json_path: dir.join(format!("session_{}.json", session_id)),
            readable_path: dir.join(format!("session_{}.log", session_id)),
        };

        tokio::fs::write(&files.json_path, b"[]").await?;
        tokio::fs::write(
            &files.readable_path,
            format!("{}\nSESSION LOG - {}\n{}\n\n", RULE, session_id, RULE),
        )
        .await?;

        debug!(session_id = %session_id, path = %files.json_path.display(), "Session log created");

        Ok(Self {
            session_id,
            files: Some(files),
            console,
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Session that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            session_id: new_session_id(),
            files: None,
            console: false,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn json_path(&self) -> Option<&Path> {
        self.files.as_ref().map(|f| f.json_path.as_path())
    }

    pub fn readable_path(&self) -> Option<&Path> {
        self.files.as_ref().map(|f| f.readable_path.as_path())
    }

    pub async fn entries(&self) -> Vec<SessionEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn log_user_input(&self, input_text: &str, uploaded_files: &[String]) {
        self.record(SessionRecord::UserInput {
            input_text: input_text.to_string(),
            uploaded_files: uploaded_files.to_vec(),
        })
        .await;
    }

    pub async fn log_classification(&self, category: &str, request: &str) {
        self.record(SessionRecord::Classification {
            category: category.to_string(),
            request: request.to_string(),
        })
        .await;
    }

    pub async fn log_routing(&self, destination: &str, method: &str) {
        self.record(SessionRecord::Routing {
            destination: destination.to_string(),
            method: method.to_string(),
        })
        .await;
    }

    pub async fn log_tool_call(&self, tool_name: &str, parameters: &Value, result: Option<&str>) {
        self.record(SessionRecord::ToolCall {
            tool_name: tool_name.to_string(),
            parameters: parameters.clone(),
            result: result.map(str::to_string),
        })
        .await;
    }

    pub async fn log_model_response(&self, model_name: &str, prompt: &str, response: &str) {
        self.record(SessionRecord::ModelResponse {
            model_name: model_name.to_string(),
            prompt: prompt.to_string(),
            response: response.to_string(),
        })
        .await;
    }

    pub async fn log_final_output(&self, output: &str) {
        self.record(SessionRecord::FinalOutput {
            output: output.to_string(),
        })
        .await;
    }

    pub async fn log_error(&self, error_type: &str, message: &str, context: Option<Value>) {
        self.record(SessionRecord::Error {
            error_type: error_type.to_string(),
            message: message.to_string(),
            context,
        })
        .await;
    }

    pub async fn end(&self) {
        self.record(SessionRecord::SessionEnd {}).await;
    }

    async fn record(&self, record: SessionRecord) {
        let entry = SessionEntry {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            record,
        };
        self.mirror(&entry);

        // Held across both writes so the JSON array and the readable file
        // stay in the same order.
        let mut entries = self.entries.lock().await;
        entries.push(entry);

        let Some(files) = &self.files else {
            return;
        };
        let Some(entry) = entries.last() else {
            return;
        };

        if let Err(e) = write_json(&files.json_path, &entries).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to write session JSON log");
        }
        if let Err(e) = append_readable(&files.readable_path, &render_readable(entry)).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to write session log");
        }
    }

    fn mirror(&self, entry: &SessionEntry) {
        let kind = entry.record.kind();
        let summary = summarize(&entry.record);
        if self.console {
            info!(session_id = %self.session_id, record = kind, "{}", summary);
        } else {
            debug!(session_id = %self.session_id, record = kind, "{}", summary);
        }
    }
}

fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

async fn write_json(path: &Path, entries: &[SessionEntry]) -> crate::Result<()> {
    let body = serde_json::to_vec_pretty(entries)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

async fn append_readable(path: &Path, text: &str) -> crate::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

fn summarize(record: &SessionRecord) -> String {
    match record {
        SessionRecord::UserInput { input_text, .. } => truncate(input_text, 120),
        SessionRecord::Classification { category, .. } => format!("category={}", category),
        SessionRecord::Routing { destination, method } => format!("{} -> {}", destination, method),
        SessionRecord::ToolCall { tool_name, .. } => format!("tool={}", tool_name),
        SessionRecord::ModelResponse { model_name, response, .. } => {
            format!("{}: {}", model_name, truncate(response, 120))
        }
        SessionRecord::FinalOutput { output } => truncate(output, 120),
        SessionRecord::Error { error_type, message, .. } => format!("{}: {}", error_type, message),
        SessionRecord::SessionEnd {} => "session ended".to_string(),
    }
}

fn render_readable(entry: &SessionEntry) -> String {
    let ts = &entry.timestamp;
    let lines: Vec<String> = match &entry.record {
        SessionRecord::UserInput {
            input_text,
            uploaded_files,
        } => {
            let mut lines = vec![
                format!("\n{}", THIN_RULE),
                format!("[{}] USER INPUT", ts),
                THIN_RULE.to_string(),
                format!("Input: {}", input_text),
            ];
            if !uploaded_files.is_empty() {
                lines.push(format!("Files: {}", uploaded_files.join(", ")));
            }
            lines
        }
        SessionRecord::Classification { category, request } => vec![
            format!("\n[{}] CLASSIFICATION", ts),
            format!("Category: {}", category),
            format!("Request: {}", request),
        ],
        SessionRecord::Routing { destination, method } => vec![
            format!("\n[{}] ROUTING", ts),
            format!("Destination: {}", destination),
            format!("Method: {}", method),
        ],
        SessionRecord::ToolCall {
            tool_name,
            parameters,
            result,
        } => {
            let mut lines = vec![
                format!("\n[{}] TOOL CALL", ts),
                format!("Tool: {}", tool_name),
                format!(
                    "Parameters: {}",
                    serde_json::to_string_pretty(parameters).unwrap_or_default()
                ),
            ];
            if let Some(result) = result {
                lines.push(format!("Result: {}", truncate(result, READABLE_RESULT_LIMIT)));
            }
            lines
        }
        SessionRecord::ModelResponse {
            model_name,
            prompt,
            response,
        } => vec![
            format!("\n[{}] MODEL RESPONSE", ts),
            format!("Model: {}", model_name),
            format!("Prompt: {}", truncate(prompt, READABLE_RESULT_LIMIT)),
            format!("Response: {}", response),
        ],
        SessionRecord::FinalOutput { output } => vec![
            format!("\n[{}] FINAL OUTPUT", ts),
            THIN_RULE.to_string(),
            output.clone(),
            THIN_RULE.to_string(),
        ],
        SessionRecord::Error {
            error_type,
            message,
            context,
        } => {
            let mut lines = vec![
                format!("\n[{}] ERROR", ts),
                format!("Type: {}", error_type),
                format!("Message: {}", message),
            ];
            if let Some(context) = context {
                lines.push(format!("Context: {}", context));
            }
            lines
        }
        SessionRecord::SessionEnd {} => vec![
            format!("\n{}", RULE),
            format!("[{}] SESSION END", ts),
            RULE.to_string(),
        ],
    };
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_session_keeps_order() {
        let session = SessionLog::in_memory();
        session.log_user_input("List my last 5 emails", &[]).await;
        session.log_classification("mail", "List my last 5 emails").await;
        session.end().await;

        let kinds: Vec<&str> = session
            .entries()
            .await
            .iter()
            .map(|e| e.record.kind())
            .collect();
        assert_eq!(kinds, vec!["user_input", "classification", "session_end"]);
        assert!(session.json_path().is_none());
    }

    #[tokio::test]
    async fn test_session_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionLog::create(dir.path(), false).await.unwrap();

        let json_name = session
            .json_path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(json_name.starts_with("session_"));
        assert!(json_name.ends_with(".json"));
        // session_YYYYmmdd_HHMMSS_xxxxxxxx.json
        assert_eq!(json_name.len(), "session_".len() + 15 + 1 + 8 + ".json".len());

        session
            .log_tool_call("list_emails", &json!({ "max_results": 5 }), Some(&"x".repeat(800)))
            .await;
        session.log_final_output("done").await;

        let raw = std::fs::read_to_string(session.json_path().unwrap()).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["type"], "tool_call");
        assert_eq!(parsed[0]["parameters"]["max_results"], 5);
        assert_eq!(parsed[0]["result"].as_str().unwrap().len(), 800);

        let readable = std::fs::read_to_string(session.readable_path().unwrap()).unwrap();
        assert!(readable.contains("SESSION LOG - "));
        assert!(readable.contains("TOOL CALL"));
        assert!(readable.contains(&format!("{}... (truncated)", "x".repeat(500))));
        assert!(!readable.contains(&"x".repeat(501)));
        assert!(readable.contains("FINAL OUTPUT"));
    }

    #[test]
    fn test_record_serializes_with_type_tag() {
        let entry = SessionEntry {
            timestamp: "2026-10-19 10:00:00.000".to_string(),
            record: SessionRecord::Routing {
                destination: "dispatch_loop".to_string(),
                method: "mail".to_string(),
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "routing");
        assert_eq!(value["destination"], "dispatch_loop");
        assert_eq!(value["timestamp"], "2026-10-19 10:00:00.000");
    }
}
