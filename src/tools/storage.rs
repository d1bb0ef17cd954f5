//! Cloud file storage tools (Google Drive v3 REST API)

use super::extract::{mime_for_path, DocumentExtractor};
use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolRegistry};
use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const NOT_CONFIGURED: &str = "Error: DRIVE_ACCESS_TOKEN not set.";
const LIST_FIELDS: &str = "files(id, name, mimeType, modifiedTime, size)";
const SEARCH_FIELDS: &str = "files(id, name, mimeType, webViewLink, size, modifiedTime)";

/// Document text returned to the model is cut at this many characters.
pub const MAX_DOCUMENT_CHARS: usize = 20_000;

#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    access_token: String,
    base_url: String,
    upload_url: String,
}

impl DriveClient {
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let access_token = config.drive_access_token.clone()?;
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()
            .ok()?;

        Some(Self {
            client,
            access_token,
            base_url: DRIVE_BASE_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        })
    }

    async fn list(&self, page_size: i64, query: Option<&str>, fields: &str) -> Result<Vec<Value>> {
        let mut params = vec![
            ("pageSize", page_size.clamp(1, 1000).to_string()),
            ("fields", fields.to_string()),
        ];
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()
            .await?;
        let body = check(response, "files.list").await?.json::<Value>().await?;

        Ok(body
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn metadata(&self, file_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.base_url, file_id))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "id,name,mimeType,size")])
            .send()
            .await?;
        Ok(check(response, "files.get").await?.json().await?)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.base_url, file_id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        Ok(check(response, "files.get media").await?.bytes().await?.to_vec())
    }

    async fn export(&self, file_id: &str, mime_type: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/files/{}/export", self.base_url, file_id))
            .bearer_auth(&self.access_token)
            .query(&[("mimeType", mime_type)])
            .send()
            .await?;
        Ok(check(response, "files.export").await?.bytes().await?.to_vec())
    }

    async fn upload(
        &self,
        name: &str,
        folder_id: Option<&str>,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<Value> {
        let mut metadata = json!({ "name": name });
        if let Some(folder) = folder_id {
            metadata["parents"] = json!([folder]);
        }

        let boundary = format!("upload-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &content);

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id,name")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        Ok(check(response, "files.create").await?.json().await?)
    }
}

async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OrchestrationError::ToolError(format!(
        "Drive API returned {} for {}: {}",
        status, operation, body
    )))
}

/// Metadata + media body for a `uploadType=multipart` request.
fn multipart_related(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

/// Quote a user term for a Drive `q` expression.
fn escape_query_term(term: &str) -> String {
    term.replace('\\', "\\\\").replace('\'', "\\'")
}

fn str_field<'a>(file: &'a Value, key: &str) -> &'a str {
    file.get(key).and_then(Value::as_str).unwrap_or("N/A")
}

fn format_listing(files: &[Value]) -> String {
    if files.is_empty() {
        return "No files found.".to_string();
    }

    let mut lines = vec!["Files found:".to_string()];
    for file in files {
        lines.push(format!(
            "ID: {} | Name: {} | Type: {} | Size: {} bytes",
            str_field(file, "id"),
            str_field(file, "name"),
            str_field(file, "mimeType"),
            str_field(file, "size"),
        ));
    }
    lines.join("\n")
}

fn format_content_search(query: &str, files: &[Value]) -> String {
    if files.is_empty() {
        return format!("No files found containing '{}'", query);
    }

    let mut lines = vec![format!("Content Search Results for: '{}'\n", query)];
    for (i, file) in files.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, str_field(file, "name")));
        lines.push(format!("   ID: {}", str_field(file, "id")));
        lines.push(format!("   Type: {}", str_field(file, "mimeType")));
        lines.push(format!("   Link: {}\n", str_field(file, "webViewLink")));
    }
    lines.join("\n")
}

async fn content_search(api: &DriveClient, query: &str, max_files: i64) -> Result<String> {
    let q = format!(
        "fullText contains '{}' and trashed = false",
        escape_query_term(query)
    );
    let files = api.list(max_files, Some(&q), SEARCH_FIELDS).await?;
    Ok(format_content_search(query, &files))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

pub struct ListDriveFilesTool {
    api: Option<DriveClient>,
}

const LIST_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("max_results", ParamKind::Integer, "Maximum number of files (default 10)"),
    ParamSpec::optional("query", ParamKind::String, "Drive query expression for filtering"),
];

#[async_trait::async_trait]
impl Tool for ListDriveFilesTool {
    fn name(&self) -> &'static str {
        "list_drive_files"
    }

    fn description(&self) -> &'static str {
        "List files in cloud storage"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        LIST_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };
        let files = api
            .list(args.int_or("max_results", 10), args.str("query"), LIST_FIELDS)
            .await?;
        Ok(format_listing(&files))
    }
}

pub struct SearchDriveFilesTool {
    api: Option<DriveClient>,
}

const SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("search_term", ParamKind::String, "Term to search for"),
    ParamSpec::optional(
        "use_semantic",
        ParamKind::Boolean,
        "Search inside file contents instead of file names (default false)",
    ),
];

#[async_trait::async_trait]
impl Tool for SearchDriveFilesTool {
    fn name(&self) -> &'static str {
        "search_drive_files"
    }

    fn description(&self) -> &'static str {
        "Search cloud storage files by name, or by content when use_semantic is true"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        SEARCH_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };
        let term = args.require_str("search_term")?;

        if args.bool_or("use_semantic", false) {
            return content_search(api, term, 5).await;
        }

        let q = format!("name contains '{}'", escape_query_term(term));
        let files = api.list(10, Some(&q), LIST_FIELDS).await?;
        Ok(format_listing(&files))
    }
}

pub struct DownloadDriveFileTool {
    api: Option<DriveClient>,
}

const DOWNLOAD_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("file_id", ParamKind::String, "ID of the file to download"),
    ParamSpec::optional("destination", ParamKind::String, "Local path to save the file"),
];

#[async_trait::async_trait]
impl Tool for DownloadDriveFileTool {
    fn name(&self) -> &'static str {
        "download_drive_file"
    }

    fn description(&self) -> &'static str {
        "Download a file from cloud storage to a local path"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        DOWNLOAD_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };
        let file_id = args.require_str("file_id")?;

        let metadata = api.metadata(file_id).await?;
        let filename = metadata
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(file_id)
            .to_string();
        let content = api.download(file_id).await?;

        let save_path = args
            .str("destination")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&filename));
        if let Some(parent) = save_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&save_path, &content).await?;

        info!(file_id, path = %save_path.display(), bytes = content.len(), "Downloaded file");
        Ok(format!(
            "File downloaded successfully to: {}",
            save_path.display()
        ))
    }
}

pub struct UploadDriveFileTool {
    api: Option<DriveClient>,
}

const UPLOAD_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("filepath", ParamKind::String, "Local path of the file to upload"),
    ParamSpec::optional("folder_id", ParamKind::String, "Destination folder ID"),
];

#[async_trait::async_trait]
impl Tool for UploadDriveFileTool {
    fn name(&self) -> &'static str {
        "upload_drive_file"
    }

    fn description(&self) -> &'static str {
        "Upload a local file to cloud storage"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        UPLOAD_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let filepath = args.require_str("filepath")?;
        let path = Path::new(filepath);
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(format!("Error: File not found at {}", filepath));
        }

        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filepath)
            .to_string();
        let content = tokio::fs::read(path).await?;
        let created = api
            .upload(&name, args.str("folder_id"), mime_for_path(path), content)
            .await?;

        Ok(format!(
            "File uploaded successfully! ID: {}, Name: {}",
            str_field(&created, "id"),
            str_field(&created, "name"),
        ))
    }
}

pub struct SemanticSearchTool {
    api: Option<DriveClient>,
}

const SEMANTIC_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("query", ParamKind::String, "Text to search for inside files"),
    ParamSpec::optional("max_files", ParamKind::Integer, "Maximum number of results (default 10)"),
];

#[async_trait::async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &'static str {
        "semantic_search"
    }

    fn description(&self) -> &'static str {
        "Full-text search inside documents, PDFs and text files in cloud storage"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        SEMANTIC_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };
        content_search(api, args.require_str("query")?, args.int_or("max_files", 10)).await
    }
}

pub struct ReadDriveDocumentTool {
    api: Option<DriveClient>,
    extractor: DocumentExtractor,
}

const READ_DOCUMENT_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "file_id",
    ParamKind::String,
    "ID of the document to read",
)];

#[async_trait::async_trait]
impl Tool for ReadDriveDocumentTool {
    fn name(&self) -> &'static str {
        "read_drive_document"
    }

    fn description(&self) -> &'static str {
        "Read the text content of a document in cloud storage"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        READ_DOCUMENT_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let Some(api) = self.api.as_ref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };
        let file_id = args.require_str("file_id")?;

        let metadata = api.metadata(file_id).await?;
        let name = str_field(&metadata, "name").to_string();
        let mime_type = str_field(&metadata, "mimeType").to_string();

        let text = match export_format(&mime_type) {
            Some(export_mime) => {
                let bytes = api.export(file_id, export_mime).await?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            None if mime_type.starts_with("application/vnd.google-apps.") => {
                return Ok(format!(
                    "Error: {} ({}) cannot be read as text.",
                    name, mime_type
                ));
            }
            None => {
                let bytes = api.download(file_id).await?;
                self.extractor.extract(bytes, &mime_type).await?
            }
        };

        Ok(format!(
            "Document: {}\n\n{}",
            name,
            truncate_chars(&text, MAX_DOCUMENT_CHARS)
        ))
    }
}

/// Export target for native Google formats; `None` for binary uploads.
fn export_format(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => Some("text/plain"),
        "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
        "application/vnd.google-apps.presentation" => Some("text/plain"),
        _ => None,
    }
}

pub fn register(registry: &mut ToolRegistry, api: Option<DriveClient>, extractor: DocumentExtractor) {
    registry.register(Arc::new(ListDriveFilesTool { api: api.clone() }));
    registry.register(Arc::new(SearchDriveFilesTool { api: api.clone() }));
    registry.register(Arc::new(DownloadDriveFileTool { api: api.clone() }));
    registry.register(Arc::new(UploadDriveFileTool { api: api.clone() }));
    registry.register(Arc::new(SemanticSearchTool { api: api.clone() }));
    registry.register(Arc::new(ReadDriveDocumentTool { api, extractor }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query_term() {
        assert_eq!(escape_query_term("O'Brien"), "O\\'Brien");
        assert_eq!(escape_query_term("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_format_listing() {
        assert_eq!(format_listing(&[]), "No files found.");

        let listing = format_listing(&[json!({
            "id": "f1", "name": "budget.xlsx", "mimeType": "application/vnd.ms-excel", "size": "2048"
        })]);
        assert!(listing.starts_with("Files found:"));
        assert!(listing.contains("ID: f1 | Name: budget.xlsx"));
        assert!(listing.contains("Size: 2048 bytes"));
    }

    #[test]
    fn test_format_content_search() {
        let out = format_content_search("invoice", &[json!({ "id": "x", "name": "Q3.pdf" })]);
        assert!(out.contains("1. Q3.pdf"));
        assert!(out.contains("Link: N/A"));
        assert_eq!(
            format_content_search("nothing", &[]),
            "No files found containing 'nothing'"
        );
    }

    #[test]
    fn test_multipart_related_layout() {
        let body = multipart_related("b", &json!({ "name": "a.txt" }), "text/plain", b"hello");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\nContent-Type: application/json"));
        assert!(text.contains("{\"name\":\"a.txt\"}"));
        assert!(text.contains("Content-Type: text/plain\r\n\r\nhello"));
        assert!(text.ends_with("\r\n--b--\r\n"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé... (truncated)");
    }

    #[tokio::test]
    async fn test_upload_checks_local_file_first() {
        let tool = UploadDriveFileTool { api: None };
        let args = ToolArgs::validate(
            UPLOAD_PARAMS,
            &json!({ "filepath": "/definitely/not/here.pdf" }),
        )
        .unwrap();
        let out = tool.execute(args).await.unwrap();
        assert_eq!(out, "Error: File not found at /definitely/not/here.pdf");
    }
}
