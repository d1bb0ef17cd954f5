//! Document text extraction
//!
//! Plain text is decoded locally. Anything else (PDF, images) is sent inline
//! to the model with an extraction instruction.

use crate::error::OrchestrationError;
use crate::model::{LanguageModel, ModelReply, ModelRequest};
use crate::models::{Part, Role, Turn};
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Inline payloads above this size are refused rather than uploaded.
pub const MAX_INLINE_BYTES: usize = 15 * 1024 * 1024;

const EXTRACTION_PROMPT: &str = "Extract all text from this document. \
Return only the text content, preserving line breaks, with no commentary.";

#[derive(Clone)]
pub struct DocumentExtractor {
    model: Arc<dyn LanguageModel>,
}

impl DocumentExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn extract(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        if is_plain_text(mime_type) {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        if bytes.len() > MAX_INLINE_BYTES {
            return Err(OrchestrationError::ToolError(format!(
                "document is {} bytes, above the {} byte extraction limit",
                bytes.len(),
                MAX_INLINE_BYTES
            )));
        }

        debug!(mime_type, size = bytes.len(), "Extracting document text via model");

        let turns = [Turn {
            role: Role::User,
            parts: vec![
                Part::InlineData {
                    mime_type: mime_type.to_string(),
                    data: bytes,
                },
                Part::Text {
                    text: EXTRACTION_PROMPT.to_string(),
                },
            ],
        }];

        match self.model.generate(ModelRequest::new(&turns)).await? {
            ModelReply::Text(text) => Ok(text),
            ModelReply::Empty => Ok(String::new()),
            other => Err(OrchestrationError::LlmError(format!(
                "unexpected extraction reply: {:?}",
                other
            ))),
        }
    }

    pub async fn extract_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        self.extract(bytes, mime_for_path(path)).await
    }
}

pub fn is_plain_text(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || mime_type == "application/json"
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;
    use std::io::Write;

    #[tokio::test]
    async fn test_plain_text_skips_model() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let extractor = DocumentExtractor::new(model.clone());

        let text = extractor
            .extract(b"Taxi 12.50".to_vec(), "text/plain")
            .await
            .unwrap();
        assert_eq!(text, "Taxi 12.50");
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pdf_goes_inline_to_model() {
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::Text(
            "Receipt 2026-10-01".to_string(),
        )]));
        let extractor = DocumentExtractor::new(model.clone());

        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.4").unwrap();

        let text = extractor.extract_file(file.path()).await.unwrap();
        assert_eq!(text, "Receipt 2026-10-01");

        let recorded = model.requests();
        assert!(matches!(
            &recorded[0].turns[0].parts[0],
            Part::InlineData { mime_type, .. } if mime_type == "application/pdf"
        ));
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/B.PDF")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("notes.txt")), "text/plain");
        assert_eq!(mime_for_path(Path::new("blob")), "application/octet-stream");
    }
}
