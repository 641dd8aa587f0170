//! Recipient store: the persisted work queue of a dispatch session.
//!
//! Every session starts from a purged store, loads its recipients as `pending`,
//! and the send loop flips each one to a terminal status exactly once. Reading
//! pending records goes through [`PendingCursor`], which pages with a keyset
//! query instead of holding a database cursor open for the whole session.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use relay_common::error::AppError;
use relay_common::types::{RecipientRecord, RecipientStatus};

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertReport {
    /// Records created as `pending`.
    pub inserted: u64,
    /// Identifiers skipped because they already existed (in the store or
    /// earlier in the same call).
    pub duplicates: u64,
}

/// Persistence contract for recipient records.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Delete every record.
    async fn reset(&self) -> Result<(), AppError>;

    /// Insert one `pending` record per unique identifier. Duplicate keys are
    /// counted, never fatal.
    async fn bulk_insert(&self, identifiers: &[String]) -> Result<InsertReport, AppError>;

    async fn count_all(&self) -> Result<u64, AppError>;

    async fn count_pending(&self) -> Result<u64, AppError>;

    /// Up to `limit` pending records ordered by identifier, strictly after `after`.
    async fn pending_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RecipientRecord>, AppError>;

    /// Set the status of one record. Repeating the same update is a no-op.
    async fn update_status(
        &self,
        identifier: &str,
        status: RecipientStatus,
    ) -> Result<(), AppError>;
}

/// Lazy, single-pass sequence of pending recipients.
///
/// Pages are fetched on demand and keyed on the last identifier handed out, so
/// a record whose status update failed is not yielded twice in one pass.
/// Creating a new cursor starts over from whatever is still pending.
pub struct PendingCursor {
    store: Arc<dyn RecipientStore>,
    page_size: usize,
    buffer: VecDeque<RecipientRecord>,
    last_seen: Option<String>,
    exhausted: bool,
}

impl PendingCursor {
    pub fn new(store: Arc<dyn RecipientStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last_seen: None,
            exhausted: false,
        }
    }

    /// Next pending record, or `None` once the store has no more.
    pub async fn next_pending(&mut self) -> Result<Option<RecipientRecord>, AppError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .store
                .pending_page(self.last_seen.as_deref(), self.page_size)
                .await?;

            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.last_seen = Some(last.identifier.clone());
            }
            tracing::debug!(
                fetched = page.len(),
                exhausted = self.exhausted,
                "Fetched pending recipient page"
            );
            self.buffer.extend(page);
        }

        Ok(self.buffer.pop_front())
    }
}

/// Volatile store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryRecipientStore {
    records: RwLock<BTreeMap<String, RecipientRecord>>,
}

impl MemoryRecipientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a single record.
    pub async fn get(&self, identifier: &str) -> Option<RecipientRecord> {
        self.records.read().await.get(identifier).cloned()
    }

    /// Snapshot of every record, ordered by identifier.
    pub async fn all(&self) -> Vec<RecipientRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RecipientStore for MemoryRecipientStore {
    async fn reset(&self) -> Result<(), AppError> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn bulk_insert(&self, identifiers: &[String]) -> Result<InsertReport, AppError> {
        let mut records = self.records.write().await;
        let mut report = InsertReport::default();

        for identifier in identifiers {
            if records.contains_key(identifier) {
                report.duplicates += 1;
                continue;
            }
            records.insert(identifier.clone(), RecipientRecord::pending(identifier));
            report.inserted += 1;
        }

        Ok(report)
    }

    async fn count_all(&self) -> Result<u64, AppError> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn count_pending(&self) -> Result<u64, AppError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == RecipientStatus::Pending)
            .count() as u64)
    }

    async fn pending_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RecipientRecord>, AppError> {
        let records = self.records.read().await;
        let page = records
            .values()
            .filter(|r| after.is_none_or(|a| r.identifier.as_str() > a))
            .filter(|r| r.status == RecipientStatus::Pending)
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn update_status(
        &self,
        identifier: &str,
        status: RecipientStatus,
    ) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(identifier)
            .ok_or_else(|| AppError::NotFound(format!("Recipient {} not found", identifier)))?;

        if record.status != status {
            record.status = status;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Remove exact duplicates, keeping the first occurrence.
pub fn dedup_preserving_order(identifiers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(identifiers.len());
    identifiers
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
