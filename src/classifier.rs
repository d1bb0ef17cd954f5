//! Request classifier
//!
//! Asks the model for a single category word:
//! - mail: reading, sending or labelling email
//! - storage: listing, searching, moving or reading cloud files
//! - expense: reimbursement claims and receipt checks
//! - general: anything else

use crate::error::OrchestrationError;
use crate::model::{complete_text, LanguageModel};
use crate::models::Category;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct RequestClassifier {
    model: Arc<dyn LanguageModel>,
}

impl RequestClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One model call, no retry. Unrecognised labels map to
    /// [`Category::General`].
    pub async fn classify(&self, request_text: &str) -> Result<Category> {
        let label = complete_text(self.model.as_ref(), None, &classification_prompt(request_text))
            .await
            .map_err(|e| OrchestrationError::ClassificationError(e.to_string()))?;
        let category = Category::from_label(&label);

        debug!(raw_label = %label.trim(), %category, "Request classified");
        Ok(category)
    }
}

fn classification_prompt(request_text: &str) -> String {
    let labels: Vec<String> = Category::ALL
        .iter()
        .map(|c| format!("'{}'", c.as_str()))
        .collect();

    format!(
        "Classify this request into one category: {}.\n\
         Request: {}\n\
         Output only the category.",
        labels.join(", "),
        request_text
    )
}
