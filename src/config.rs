//! Runtime configuration read from the environment
//!
//! Binaries load `.env` through `dotenv` before calling [`AppConfig::from_env`].

use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub api_port: u16,
    pub log_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub expense_policy_path: Option<PathBuf>,
    pub gmail_access_token: Option<String>,
    pub resend_api_key: Option<String>,
    pub resend_from_email: Option<String>,
    pub drive_access_token: Option<String>,
    /// Mirror session log records to stdout as well as to files.
    pub session_log_console: bool,
}

impl AppConfig {
    pub fn from_env() -> crate::Result<Self> {
        let api_port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                crate::error::OrchestrationError::ConfigError(format!(
                    "PORT must be a valid port number, got '{}'",
                    raw
                ))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_port,
            log_dir: non_empty("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            uploads_dir: non_empty("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static/uploads")),
            expense_policy_path: non_empty("EXPENSE_POLICY_PATH").map(PathBuf::from),
            gmail_access_token: non_empty("GMAIL_ACCESS_TOKEN"),
            resend_api_key: non_empty("RESEND_API_KEY"),
            resend_from_email: non_empty("RESEND_FROM_EMAIL"),
            drive_access_token: non_empty("DRIVE_ACCESS_TOKEN"),
            session_log_console: env::var("SESSION_LOG_CONSOLE")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }

    pub fn requests_file(&self) -> PathBuf {
        self.log_dir.join("reimbursement_requests.json")
    }

    pub fn events_file(&self) -> PathBuf {
        self.log_dir.join("events.jsonl")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_MODEL.to_string(),
            api_port: DEFAULT_PORT,
            log_dir: PathBuf::from("logs"),
            uploads_dir: PathBuf::from("static/uploads"),
            expense_policy_path: None,
            gmail_access_token: None,
            resend_api_key: None,
            resend_from_email: None,
            drive_access_token: None,
            session_log_console: true,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
