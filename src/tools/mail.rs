//! Mail tools
//!
//! Reading and labelling go through the Gmail REST API with a bearer token;
//! sending goes through the Resend HTTP API.

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolRegistry};
use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::Result;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const RESEND_URL: &str = "https://api.resend.com/emails";

fn http_client() -> Client {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Clone)]
pub struct MailClient {
    client: Client,
    access_token: String,
    base_url: String,
}

impl MailClient {
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let access_token = config.gmail_access_token.clone()?;
        Some(Self {
            client: http_client(),
            access_token,
            base_url: GMAIL_BASE_URL.to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;
        read_json(response, path).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        read_json(response, path).await
    }
}

async fn read_json(response: reqwest::Response, path: &str) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(OrchestrationError::ToolError(format!(
            "Mail API returned {} for {}: {}",
            status, path, body
        )));
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

#[derive(Clone)]
pub struct SendClient {
    client: Client,
    api_key: String,
    from: String,
}

impl SendClient {
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        Some(Self {
            client: http_client(),
            api_key: config.resend_api_key.clone()?,
            from: config.resend_from_email.clone()?,
        })
    }
}

pub const MAIL_NOT_CONFIGURED: &str = "Error: GMAIL_ACCESS_TOKEN not set.";
pub const SEND_NOT_CONFIGURED: &str =
    "Error: RESEND_API_KEY or RESEND_FROM_EMAIL not set in environment variables.";

fn header<'a>(message: &'a Value, name: &str) -> Option<&'a str> {
    message
        .pointer("/payload/headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })?
        .get("value")?
        .as_str()
}

fn decode_body_data(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// First `text/plain` body in a message payload, searching nested parts.
fn plain_text_body(payload: &Value) -> Option<String> {
    let mime = payload.get("mimeType").and_then(Value::as_str).unwrap_or("");
    if mime == "text/plain" {
        if let Some(data) = payload.pointer("/body/data").and_then(Value::as_str) {
            return decode_body_data(data);
        }
    }

    payload
        .get("parts")
        .and_then(Value::as_array)
        .and_then(|parts| parts.iter().find_map(plain_text_body))
}

pub struct ListEmailsTool {
    api: Option<MailClient>,
}

const LIST_EMAILS_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional(
        "max_results",
        ParamKind::Integer,
        "Maximum number of emails to return (default 10)",
    ),
    ParamSpec::optional(
        "query",
        ParamKind::String,
        "Mailbox search query, e.g. 'is:unread' or 'from:boss@example.com'",
    ),
];

#[async_trait::async_trait]
impl Tool for ListEmailsTool {
    fn name(&self) -> &'static str {
        "list_emails"
    }

    fn description(&self) -> &'static str {
        "List recent emails from the inbox"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        LIST_EMAILS_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(MAIL_NOT_CONFIGURED.to_string());
        };

        let max_results = args.int_or("max_results", 10).clamp(1, 100);
        let mut query = vec![("maxResults", max_results.to_string())];
        if let Some(q) = args.str("query").filter(|q| !q.trim().is_empty()) {
            query.push(("q", q.to_string()));
        }

        let listing = api.get_json("/messages", &query).await?;
        let ids: Vec<&str> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|msgs| {
                msgs.iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok("No messages found.".to_string());
        }

        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let metadata = [
                ("format", "metadata".to_string()),
                ("metadataHeaders", "From".to_string()),
                ("metadataHeaders", "Subject".to_string()),
            ];
            match api.get_json(&format!("/messages/{}", id), &metadata).await {
                Ok(message) => lines.push(format!(
                    "ID: {} | From: {} | Subject: {}",
                    id,
                    header(&message, "From").unwrap_or("(unknown)"),
                    header(&message, "Subject").unwrap_or("(no subject)"),
                )),
                Err(_) => lines.push(format!("ID: {} | Error: Could not parse email", id)),
            }
        }

        Ok(lines.join("\n"))
    }
}

pub struct ReadEmailTool {
    api: Option<MailClient>,
}

const READ_EMAIL_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "message_id",
    ParamKind::String,
    "ID of the email to read (from list_emails)",
)];

#[async_trait::async_trait]
impl Tool for ReadEmailTool {
    fn name(&self) -> &'static str {
        "read_email"
    }

    fn description(&self) -> &'static str {
        "Read the full content of one email"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        READ_EMAIL_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(MAIL_NOT_CONFIGURED.to_string());
        };

        let message_id = args.require_str("message_id")?;
        let message = api
            .get_json(
                &format!("/messages/{}", message_id),
                &[("format", "full".to_string())],
            )
            .await?;

        let body = message
            .get("payload")
            .and_then(plain_text_body)
            .or_else(|| message.get("snippet").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        Ok(format!(
            "From: {}\nSubject: {}\n\nBody:\n{}",
            header(&message, "From").unwrap_or("(unknown)"),
            header(&message, "Subject").unwrap_or("(no subject)"),
            body
        ))
    }
}

pub struct SendEmailTool {
    sender: Option<SendClient>,
}

const SEND_EMAIL_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("to", ParamKind::String, "Recipient email address"),
    ParamSpec::required("subject", ParamKind::String, "Subject line"),
    ParamSpec::required("body", ParamKind::String, "Plain-text body"),
];

#[async_trait::async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &'static str {
        "send_email"
    }

    fn description(&self) -> &'static str {
        "Send a plain-text email"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        SEND_EMAIL_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(sender) = self.sender.as_ref() else {
            return Ok(SEND_NOT_CONFIGURED.to_string());
        };

        let to = args.require_str("to")?;
        if !to.contains('@') {
            return Ok(format!("Error: '{}' is not a valid email address.", to));
        }

        let response = sender
            .client
            .post(RESEND_URL)
            .bearer_auth(&sender.api_key)
            .json(&json!({
                "from": sender.from,
                "to": [to],
                "subject": args.require_str("subject")?,
                "text": args.require_str("body")?,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Ok(format!("Error sending email via Resend: {} {}", status, body));
        }

        let id = body.get("id").and_then(Value::as_str).unwrap_or("unknown");
        Ok(format!("Email sent successfully! ID: {}", id))
    }
}

pub struct CreateLabelTool {
    api: Option<MailClient>,
}

const CREATE_LABEL_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "label_name",
    ParamKind::String,
    "Name of the label to create",
)];

#[async_trait::async_trait]
impl Tool for CreateLabelTool {
    fn name(&self) -> &'static str {
        "create_label"
    }

    fn description(&self) -> &'static str {
        "Create a new mailbox label"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        CREATE_LABEL_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(MAIL_NOT_CONFIGURED.to_string());
        };

        let label_name = args.require_str("label_name")?;
        let label = api
            .post_json(
                "/labels",
                &json!({
                    "name": label_name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                }),
            )
            .await?;

        Ok(format!(
            "Label created: {} (ID: {})",
            label.get("name").and_then(Value::as_str).unwrap_or(label_name),
            label.get("id").and_then(Value::as_str).unwrap_or("unknown"),
        ))
    }
}

pub struct ApplyLabelTool {
    api: Option<MailClient>,
}

const APPLY_LABEL_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("message_id", ParamKind::String, "ID of the email"),
    ParamSpec::required("label_id", ParamKind::String, "ID of the label to apply"),
];

#[async_trait::async_trait]
impl Tool for ApplyLabelTool {
    fn name(&self) -> &'static str {
        "apply_label"
    }

    fn description(&self) -> &'static str {
        "Apply an existing label to an email"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        APPLY_LABEL_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(MAIL_NOT_CONFIGURED.to_string());
        };

        let message_id = args.require_str("message_id")?;
        let label_id = args.require_str("label_id")?;
        api.post_json(
            &format!("/messages/{}/modify", message_id),
            &json!({ "addLabelIds": [label_id] }),
        )
        .await?;

        Ok(format!(
            "Label {} applied to message {}.",
            label_id, message_id
        ))
    }
}

pub fn register(registry: &mut ToolRegistry, api: Option<MailClient>, sender: Option<SendClient>) {
    registry.register(Arc::new(ListEmailsTool { api: api.clone() }));
    registry.register(Arc::new(ReadEmailTool { api: api.clone() }));
    registry.register(Arc::new(SendEmailTool { sender }));
    registry.register(Arc::new(CreateLabelTool { api: api.clone() }));
    registry.register(Arc::new(ApplyLabelTool { api }));
}
