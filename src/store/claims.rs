//! Claim workflow: store mutations paired with their event log entries.

use super::RequestStore;
use crate::audit::{EventLog, EVENT_TRANSACTION};
use crate::models::{NewReimbursement, ReimbursementRequest, RequestStatus};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub const MANAGER_ACTOR: &str = "manager";

#[derive(Clone)]
pub struct ClaimDesk {
    store: Arc<dyn RequestStore>,
    events: Arc<EventLog>,
}

impl ClaimDesk {
    pub fn new(store: Arc<dyn RequestStore>, events: Arc<EventLog>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &dyn RequestStore {
        self.store.as_ref()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Create the record, then log `submit_claim` by the uploader.
    pub async fn submit(&self, new: NewReimbursement) -> Result<ReimbursementRequest> {
        let record = self.store.create(new).await?;
        self.record_event(
            &record.uploaded_by,
            "submit_claim",
            json!({ "amount": record.emp_amount, "id": record.id }),
        )
        .await;
        Ok(record)
    }

    /// Apply a manager decision, then log `<status>_claim`.
    pub async fn decide(
        &self,
        id: &str,
        status: RequestStatus,
        reason: Option<String>,
    ) -> Result<ReimbursementRequest> {
        let record = self.store.update_status(id, status, reason).await?;

        let mut details = json!({ "id": record.id, "amount": record.emp_amount });
        if let Some(reason) = &record.decision_reason {
            details["reason"] = json!(reason);
        }

        self.record_event(MANAGER_ACTOR, &format!("{}_claim", status.as_str()), details)
            .await;
        Ok(record)
    }

    /// The store change has already landed; a lost event is logged, not
    /// returned.
    async fn record_event(&self, actor: &str, action: &str, details: Value) {
        if let Err(e) = self
            .events
            .append(EVENT_TRANSACTION, actor, action, details)
            .await
        {
            warn!(actor, action, error = %e, "Failed to record claim event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::store::{sample_submission, JsonFileRequestStore};

    fn desk() -> ClaimDesk {
        ClaimDesk::new(
            Arc::new(JsonFileRequestStore::in_memory()),
            Arc::new(EventLog::in_memory()),
        )
    }

    #[tokio::test]
    async fn test_submit_logs_one_transaction() {
        let desk = desk();
        let record = desk.submit(sample_submission("ada@example.com")).await.unwrap();

        let events = desk.events().read_all().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_TRANSACTION);
        assert_eq!(events[0].actor, "ada@example.com");
        assert_eq!(events[0].action, "submit_claim");
        assert_eq!(events[0].details["id"], record.id.as_str());
        assert_eq!(events[0].details["amount"], "18.40");
    }

    #[tokio::test]
    async fn test_decision_is_reflected_and_logged_once() {
        let desk = desk();
        let record = desk.submit(sample_submission("ada@example.com")).await.unwrap();

        desk.decide(&record.id, RequestStatus::Approved, Some("Within policy".to_string()))
            .await
            .unwrap();

        let fetched = desk.store().get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Approved);

        let events = desk.events().read_all().await.unwrap();
        let decisions: Vec<_> = events.iter().filter(|e| e.actor == MANAGER_ACTOR).collect();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, "approved_claim");
        assert_eq!(decisions[0].details["reason"], "Within policy");
    }

    #[tokio::test]
    async fn test_event_failure_still_returns_stored_claim() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let desk = ClaimDesk::new(
            Arc::new(JsonFileRequestStore::in_memory()),
            Arc::new(EventLog::open(dir.path())),
        );

        let record = desk.submit(sample_submission("ada@example.com")).await.unwrap();
        assert_eq!(desk.store().list().await.unwrap().len(), 1);

        let decided = desk
            .decide(&record.id, RequestStatus::Declined, None)
            .await
            .unwrap();
        assert_eq!(decided.status, RequestStatus::Declined);
    }

    #[tokio::test]
    async fn test_unknown_claim_logs_nothing() {
        let desk = desk();
        let result = desk.decide("1", RequestStatus::Declined, None).await;

        assert!(matches!(result, Err(OrchestrationError::NotFound(_))));
        assert!(desk.events().read_all().await.unwrap().is_empty());
    }
}
