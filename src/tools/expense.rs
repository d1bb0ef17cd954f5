//! Reimbursement validation against the expense policy

use super::extract::DocumentExtractor;
use super::{ParamKind, ParamSpec, Tool, ToolArgs};
use crate::model::{complete_text, LanguageModel};
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const APPROVED: &str = "APPROVED";
pub const DENIED: &str = "DENIED";

const BUILTIN_POLICY: &str = include_str!("../../config/expense_policy.txt");

/// Policy text from `path`, or the built-in policy when unset or unreadable.
pub fn load_policy(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return BUILTIN_POLICY.to_string();
    };

    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(path = %path.display(), "Expense policy file is empty, using built-in policy");
            BUILTIN_POLICY.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read expense policy, using built-in policy");
            BUILTIN_POLICY.to_string()
        }
    }
}

pub struct ValidateReimbursementTool {
    model: Arc<dyn LanguageModel>,
    extractor: DocumentExtractor,
    policy: String,
}

const VALIDATE_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "receipt_path",
    ParamKind::String,
    "Local path to the receipt file (PDF or text)",
)];

impl ValidateReimbursementTool {
    pub fn new(model: Arc<dyn LanguageModel>, extractor: DocumentExtractor, policy: String) -> Self {
        Self {
            model,
            extractor,
            policy,
        }
    }

    /// Audit the receipt at `receipt_path` as of `today`. Always APPROVED or
    /// DENIED: a receipt that cannot be read or audited is denied.
    pub async fn validate(&self, receipt_path: &Path, today: NaiveDate) -> &'static str {
        if !tokio::fs::try_exists(receipt_path).await.unwrap_or(false) {
            info!(path = %receipt_path.display(), "Receipt missing, denying claim");
            return DENIED;
        }

        let receipt_text = match self.extractor.extract_file(receipt_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %receipt_path.display(), error = %e, "Receipt extraction failed, denying claim");
                return DENIED;
            }
        };
        if receipt_text.trim().is_empty() {
            info!(path = %receipt_path.display(), "Receipt has no readable text, denying claim");
            return DENIED;
        }

        let receipt_date = self.receipt_date(&receipt_text).await;
        let prompt = audit_prompt(&self.policy, &receipt_text, today, receipt_date);
        let answer = match complete_text(self.model.as_ref(), None, &prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(path = %receipt_path.display(), error = %e, "Receipt audit failed, denying claim");
                return DENIED;
            }
        };

        let verdict = normalize_verdict(&answer);
        info!(path = %receipt_path.display(), verdict, "Receipt audited");
        verdict
    }

    async fn receipt_date(&self, receipt_text: &str) -> Option<NaiveDate> {
        let prompt = format!(
            "Extract only the receipt date from the following text.\n\
             Return the date in ISO format (YYYY-MM-DD) if possible.\n\
             If no date is found, reply with 'UNKNOWN'.\n\n\
             Receipt text:\n{}",
            receipt_text
        );

        match complete_text(self.model.as_ref(), None, &prompt).await {
            Ok(answer) => parse_receipt_date(&answer),
            Err(e) => {
                warn!(error = %e, "Receipt date extraction failed");
                None
            }
        }
    }
}

fn parse_receipt_date(answer: &str) -> Option<NaiveDate> {
    let trimmed = answer.trim().trim_matches(|c| c == '\'' || c == '"' || c == '`');
    if trimmed.eq_ignore_ascii_case("UNKNOWN") {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

fn audit_prompt(
    policy: &str,
    receipt_text: &str,
    today: NaiveDate,
    receipt_date: Option<NaiveDate>,
) -> String {
    let mut prompt = format!(
        "You are an expense auditor.\n\
         Date of analysis: {}\n\n\
         Here is the company policy document:\n{}\n\n\
         Here is the receipt with expenses:\n{}\n",
        today.format("%Y-%m-%d"),
        policy,
        receipt_text
    );

    if let Some(date) = receipt_date {
        prompt.push_str(&format!(
            "\nThe receipt is dated {}, which is {} days ago.\n",
            date.format("%Y-%m-%d"),
            (today - date).num_days()
        ));
    }

    prompt.push_str(
        "\nTask: Determine if the reimbursement for the item(s) in the receipt should be granted \
         based on the policy, including date constraints (e.g., must be within 30 days), eligible \
         items, price limits, and non-reimbursable items.\n\
         Output only 'APPROVED' or 'DENIED'. If any part violates the policy \
         (e.g., date too old, item not eligible, over $100), output 'DENIED'.",
    );
    prompt
}

/// Anything but a bare APPROVED is a denial.
fn normalize_verdict(answer: &str) -> &'static str {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '*' || c == '.' || c == '`')
        .to_ascii_uppercase();

    if cleaned == APPROVED {
        APPROVED
    } else {
        DENIED
    }
}

#[async_trait::async_trait]
impl Tool for ValidateReimbursementTool {
    fn name(&self) -> &'static str {
        "validate_reimbursement"
    }

    fn description(&self) -> &'static str {
        "Validate a reimbursement receipt against the company expense policy. Returns only APPROVED or DENIED."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        VALIDATE_PARAMS
    }

    async fn execute(&self, args: ToolArgs) -> Result<String> {
        let path = args.require_str("receipt_path")?;
        let verdict = self.validate(Path::new(path), Utc::now().date_naive()).await;
        Ok(verdict.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelReply, ScriptedModel};
    use std::io::Write;

    fn tool(model: Arc<ScriptedModel>) -> ValidateReimbursementTool {
        ValidateReimbursementTool::new(
            model.clone(),
            DocumentExtractor::new(model),
            load_policy(None),
        )
    }

    fn receipt(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_missing_receipt_is_denied_without_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let verdict = tool(model.clone())
            .validate(Path::new("/no/such/receipt.pdf"), day("2026-10-19"))
            .await;

        assert_eq!(verdict, DENIED);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_approved_receipt_includes_age_in_prompt() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Text("2026-10-09".to_string()),
            ModelReply::Text(" approved\n".to_string()),
        ]));
        let file = receipt("Cab Co 2026-10-09 Taxi $18.40");

        let verdict = tool(model.clone())
            .validate(file.path(), day("2026-10-19"))
            .await;
        assert_eq!(verdict, APPROVED);

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        let audit = format!("{:?}", requests[1].turns[0]);
        assert!(audit.contains("which is 10 days ago"));
        assert!(audit.contains("Date of analysis: 2026-10-19"));
    }

    #[tokio::test]
    async fn test_unclear_answer_is_denied() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::Text("UNKNOWN".to_string()),
            ModelReply::Text("It depends on the manager".to_string()),
        ]));
        let file = receipt("Lunch $12");

        let verdict = tool(model.clone())
            .validate(file.path(), day("2026-10-19"))
            .await;
        assert_eq!(verdict, DENIED);

        let audit = format!("{:?}", model.requests()[1].turns[0]);
        assert!(!audit.contains("days ago"));
    }

    #[tokio::test]
    async fn test_model_failure_is_denied() {
        let model = Arc::new(ScriptedModel::failing("quota exceeded"));
        let pdf = {
            let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
            file.write_all(b"%PDF-1.4").unwrap();
            file
        };
        let text = receipt("Taxi $18.40");

        let tool = tool(model.clone());
        assert_eq!(tool.validate(pdf.path(), day("2026-10-19")).await, DENIED);
        assert_eq!(tool.validate(text.path(), day("2026-10-19")).await, DENIED);

        let output = tool
            .execute(ToolArgs::validate(
                VALIDATE_PARAMS,
                &serde_json::json!({ "receipt_path": text.path().to_string_lossy() }),
            )
            .unwrap())
            .await
            .unwrap();
        assert_eq!(output, DENIED);
    }

    #[test]
    fn test_normalize_verdict() {
        assert_eq!(normalize_verdict("APPROVED"), APPROVED);
        assert_eq!(normalize_verdict("**Approved.**"), APPROVED);
        assert_eq!(normalize_verdict("DENIED"), DENIED);
        assert_eq!(normalize_verdict("APPROVED with notes"), DENIED);
        assert_eq!(normalize_verdict(""), DENIED);
    }

    #[test]
    fn test_parse_receipt_date() {
        assert_eq!(parse_receipt_date(" 2026-09-30\n"), Some(day("2026-09-30")));
        assert_eq!(parse_receipt_date("'UNKNOWN'"), None);
        assert_eq!(parse_receipt_date("Sept 30"), None);
    }

    #[test]
    fn test_load_policy_fallback() {
        let builtin = load_policy(None);
        assert!(builtin.contains("30 days"));
        assert_eq!(load_policy(Some(Path::new("/no/such/policy.txt"))), builtin);
    }
}
