//! Reimbursement request persistence
//!
//! Records live in memory behind a tokio `RwLock` and, when a path is
//! configured, the whole set is rewritten to a JSON file after every
//! mutation.

use crate::error::OrchestrationError;
use crate::models::{NewReimbursement, ReimbursementRequest, RequestStatus};
use crate::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod claims;

pub use claims::ClaimDesk;

/// Trait for reimbursement request persistence
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, new: NewReimbursement) -> Result<ReimbursementRequest>;
    async fn list(&self) -> Result<Vec<ReimbursementRequest>>;
    async fn get(&self, id: &str) -> Result<Option<ReimbursementRequest>>;
    async fn list_by_uploader(&self, email: &str) -> Result<Vec<ReimbursementRequest>>;
    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<ReimbursementRequest>>;
    /// Sets `status` and `decidedAt`. `NotFound` when `id` is unknown.
    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reason: Option<String>,
    ) -> Result<ReimbursementRequest>;
    /// Removes and returns the record. `NotFound` when `id` is unknown.
    async fn delete(&self, id: &str) -> Result<ReimbursementRequest>;
}

#[derive(Default)]
struct Records {
    items: Vec<ReimbursementRequest>,
    last_id: i64,
}

impl Records {
    /// Millisecond timestamp, bumped so ids never repeat within the process.
    fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last_id = now.max(self.last_id + 1);
        self.last_id.to_string()
    }
}

/// JSON-file store. `path: None` keeps everything in memory.
///
/// Mutations are applied to a copy, persisted, then swapped in, so a failed
/// write leaves the visible records untouched.
pub struct JsonFileRequestStore {
    path: Option<PathBuf>,
    records: RwLock<Records>,
}

impl JsonFileRequestStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Records::default()),
        }
    }

    /// Load the file at `path`. A missing or unreadable file starts an empty
    /// store.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = load_records(&path).await;
        let last_id = items
            .iter()
            .filter_map(|r| r.id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        info!(path = %path.display(), count = items.len(), "Reimbursement store loaded");

        Self {
            path: Some(path),
            records: RwLock::new(Records { items, last_id }),
        }
    }

    async fn persist(&self, items: &[ReimbursementRequest]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| OrchestrationError::StoreError(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), count = items.len(), "Reimbursement store persisted");
        Ok(())
    }
}

async fn load_records(path: &Path) -> Vec<ReimbursementRequest> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read reimbursement store, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Reimbursement store is not valid JSON, starting empty");
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl RequestStore for JsonFileRequestStore {
    async fn create(&self, new: NewReimbursement) -> Result<ReimbursementRequest> {
        let mut records = self.records.write().await;
        let id = records.next_id();
        let record = ReimbursementRequest::from_submission(id, new, Utc::now());

        let mut items = records.items.clone();
        items.push(record.clone());
        self.persist(&items).await?;
        records.items = items;

        info!(id = %record.id, uploaded_by = %record.uploaded_by, "Reimbursement request created");
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<ReimbursementRequest>> {
        Ok(self.records.read().await.items.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<ReimbursementRequest>> {
        let records = self.records.read().await;
        Ok(records.items.iter().find(|r| r.id == id).cloned())
    }

    async fn list_by_uploader(&self, email: &str) -> Result<Vec<ReimbursementRequest>> {
        let email = email.trim();
        let records = self.records.read().await;
        Ok(records
            .items
            .iter()
            .filter(|r| r.uploaded_by.eq_ignore_ascii_case(email))
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<ReimbursementRequest>> {
        let records = self.records.read().await;
        Ok(records
            .items
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reason: Option<String>,
    ) -> Result<ReimbursementRequest> {
        let mut records = self.records.write().await;
        let mut items = records.items.clone();
        let record = items
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| OrchestrationError::NotFound(format!("request {}", id)))?;

        record.status = status;
        record.decided_at = Some(Utc::now());
        record.decision_reason = reason.filter(|r| !r.trim().is_empty());
        let updated = record.clone();

        self.persist(&items).await?;
        records.items = items;

        info!(id, %status, "Reimbursement request status updated");
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<ReimbursementRequest> {
        let mut records = self.records.write().await;
        let idx = records
            .items
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| OrchestrationError::NotFound(format!("request {}", id)))?;

        let mut items = records.items.clone();
        let removed = items.remove(idx);
        self.persist(&items).await?;
        records.items = items;

        info!(id, "Reimbursement request deleted");
        Ok(removed)
    }
}

/// Hex SHA-256 of a receipt's bytes.
pub fn receipt_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
pub(crate) fn sample_submission(uploaded_by: &str) -> NewReimbursement {
    NewReimbursement {
        filename: "taxi.pdf".to_string(),
        file_path: "static/uploads/taxi.pdf".to_string(),
        size: 2048,
        receipt_sha256: receipt_digest(b"%PDF-1.4 taxi"),
        uploaded_by: uploaded_by.to_string(),
        emp_name: "Ada Lovelace".to_string(),
        emp_id: "E-1001".to_string(),
        emp_amount: "18.40".to_string(),
        emp_date: "2026-10-09".to_string(),
        emp_reason: "Client visit".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_get_returns_identical_record() {
        let store = JsonFileRequestStore::in_memory();
        let created = store.create(sample_submission("ada@example.com")).await.unwrap();

        assert_eq!(created.status, RequestStatus::Pending);
        assert!(created.id.parse::<i64>().is_ok());
        assert_eq!(store.get(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_ids_are_strictly_increasing() {
        let store = JsonFileRequestStore::in_memory();
        let mut previous = 0i64;
        for _ in 0..20 {
            let record = store.create(sample_submission("a@b.c")).await.unwrap();
            let id: i64 = record.id.parse().unwrap();
            assert!(id > previous);
            previous = id;
        }
    }

    #[tokio::test]
    async fn test_filters() {
        let store = JsonFileRequestStore::in_memory();
        let first = store.create(sample_submission("ada@example.com")).await.unwrap();
        store.create(sample_submission("bob@example.com")).await.unwrap();
        store
            .update_status(&first.id, RequestStatus::Approved, None)
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.list_by_uploader("ADA@example.com").await.unwrap().len(), 1);
        assert_eq!(
            store.list_by_status(RequestStatus::Approved).await.unwrap()[0].id,
            first.id
        );
        assert_eq!(store.list_by_status(RequestStatus::Pending).await.unwrap().len(), 1);
        assert!(store.list_by_status(RequestStatus::Declined).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_id() {
        let store = JsonFileRequestStore::in_memory();
        assert!(matches!(
            store.update_status("42", RequestStatus::Declined, None).await,
            Err(OrchestrationError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("42").await,
            Err(OrchestrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_records_decision() {
        let store = JsonFileRequestStore::in_memory();
        let created = store.create(sample_submission("ada@example.com")).await.unwrap();

        let updated = store
            .update_status(&created.id, RequestStatus::Declined, Some("Over limit".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Declined);
        assert!(updated.decided_at.is_some());
        assert_eq!(updated.decision_reason.as_deref(), Some("Over limit"));
        assert_eq!(store.get(&created.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("requests.json");

        let store = JsonFileRequestStore::open(&path).await;
        let kept = store.create(sample_submission("ada@example.com")).await.unwrap();
        let dropped = store.create(sample_submission("bob@example.com")).await.unwrap();
        store.delete(&dropped.id).await.unwrap();
        drop(store);

        let reopened = JsonFileRequestStore::open(&path).await;
        assert_eq!(reopened.list().await.unwrap(), vec![kept.clone()]);

        let next = reopened.create(sample_submission("cy@example.com")).await.unwrap();
        assert!(next.id.parse::<i64>().unwrap() > kept.id.parse::<i64>().unwrap());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_records_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let store = JsonFileRequestStore::open(blocker.join("requests.json")).await;
        assert!(store.create(sample_submission("ada@example.com")).await.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        let store = JsonFileRequestStore::open(&path).await;
        let created = store.create(sample_submission("ada@example.com")).await.unwrap();

        // A directory in place of the file makes the next write fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store
            .update_status(&created.id, RequestStatus::Approved, None)
            .await
            .is_err());
        assert!(store.delete(&created.id).await.is_err());
        assert_eq!(store.get(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        std::fs::write(&path, "{ definitely not an array").unwrap();

        let store = JsonFileRequestStore::open(&path).await;
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_receipt_digest() {
        assert_eq!(
            receipt_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
