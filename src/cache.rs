//! In-memory projection of the active collection.
//!
//! An explicit, owned snapshot object: the store passes it into the
//! uniqueness validator and answers search/filter queries from it, instead of
//! consulting ambient global state. Two refresh modes, chosen by the
//! adapter's capability flag:
//!
//! - push: a live snapshot feed (`BackendAdapter::subscribe`) keeps the cache
//!   current without polling;
//! - pull: `refresh` does a full reload via `list_all`.
//!
//! The cache is read-only display/validation state. It is never the source of
//! truth for a write decision made after a stale read; the store re-fetches
//! before every mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, watch};

use crate::backend::{BackendAdapter, Collection, with_retry};
use crate::error::StoreError;
use crate::record::{JobFileRecord, LifecycleStatus, RecordSummary};

#[derive(Default)]
pub struct RecordCache {
    records: RwLock<HashMap<String, JobFileRecord>>,
    /// Set once a live feed keeps this cache current; `refresh` becomes a
    /// no-op then.
    push_fed: AtomicBool,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the cache up to date from the adapter. Full reload on pull
    /// backends; a no-op when a live feed is attached.
    pub async fn refresh(&self, adapter: &dyn BackendAdapter) -> Result<(), StoreError> {
        if self.push_fed.load(Ordering::Acquire) {
            return Ok(());
        }
        let records = with_retry("list active records", || {
            adapter.list_all(Collection::Active)
        })
        .await?;
        self.replace(records).await;
        Ok(())
    }

    /// Wire a live snapshot feed into the cache. Spawns a task that applies
    /// every pushed snapshot until the feed closes.
    pub fn attach_feed(self: &Arc<Self>, mut rx: watch::Receiver<Vec<JobFileRecord>>) {
        self.replace_blocking(rx.borrow().clone());
        self.push_fed.store(true, Ordering::Release);

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                cache.replace(snapshot).await;
            }
            // Feed gone; fall back to explicit reloads.
            cache.push_fed.store(false, Ordering::Release);
            tracing::debug!("live cache feed closed, reverting to pull refresh");
        });
    }

    async fn replace(&self, records: Vec<JobFileRecord>) {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            map.insert(record.id.clone(), record);
        }
        *self.records.write().await = map;
    }

    fn replace_blocking(&self, records: Vec<JobFileRecord>) {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            map.insert(record.id.clone(), record);
        }
        if let Ok(mut guard) = self.records.try_write() {
            *guard = map;
        }
    }

    /// Keep the projection warm after a local write on a pull backend.
    pub async fn upsert(&self, record: JobFileRecord) {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record);
    }

    pub async fn remove(&self, id: &str) {
        self.records.write().await.remove(id);
    }

    /// Owned copy of every cached record, for the uniqueness validator.
    pub async fn snapshot(&self) -> Vec<JobFileRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Flattened rows for listings, optionally filtered by a case-insensitive
    /// substring over the business keys and the shipper/consignee display
    /// fields.
    pub async fn summaries(&self, filter: Option<&str>) -> Vec<RecordSummary> {
        let needle = filter.map(str::to_lowercase);
        let records = self.records.read().await;
        let mut rows: Vec<RecordSummary> = records
            .values()
            .map(RecordSummary::from)
            .filter(|summary| match needle.as_deref() {
                None => true,
                Some(needle) => summary_matches(summary, needle),
            })
            .collect();
        rows.sort_by(|a, b| a.job_file_number.cmp(&b.job_file_number));
        rows
    }

    /// Count of cached records per lifecycle status.
    pub async fn counts_by_status(&self) -> HashMap<LifecycleStatus, usize> {
        let records = self.records.read().await;
        let mut counts = HashMap::new();
        for record in records.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }
}

fn summary_matches(summary: &RecordSummary, needle: &str) -> bool {
    let mut haystacks = vec![
        summary.job_file_number.to_lowercase(),
        summary.invoice_number.to_lowercase(),
        summary.airway_bill_number.to_lowercase(),
    ];
    if let Some(shipper) = &summary.shipper {
        haystacks.push(shipper.to_lowercase());
    }
    if let Some(consignee) = &summary.consignee {
        haystacks.push(consignee.to_lowercase());
    }
    haystacks.iter().any(|hay| hay.contains(needle))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tokio::sync::watch;

    use super::RecordCache;
    use crate::record::{JobFileRecord, LifecycleStatus};

    fn record(number: &str, shipper: &str) -> JobFileRecord {
        let mut record = JobFileRecord::new(number);
        record.payload.insert(
            "shipper".to_string(),
            serde_json::Value::String(shipper.to_string()),
        );
        record
    }

    #[tokio::test]
    async fn summaries_filter_over_keys_and_display_fields() {
        let cache = RecordCache::new();
        cache.upsert(record("JF-1", "Acme Exports")).await;
        cache.upsert(record("JF-2", "Globex")).await;

        let all = cache.summaries(None).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].job_file_number, "JF-1");

        let hits = cache.summaries(Some("acme")).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].job_file_number, "JF-1");

        assert!(cache.summaries(Some("nothing")).await.is_empty());
    }

    #[tokio::test]
    async fn push_feed_replaces_the_projection() {
        let cache = Arc::new(RecordCache::new());
        let (tx, rx) = watch::channel(vec![record("JF-1", "Acme")]);
        cache.attach_feed(rx);
        assert_eq!(cache.snapshot().await.len(), 1);

        tx.send_replace(vec![record("JF-1", "Acme"), record("JF-2", "Globex")]);
        // Give the feed task a turn.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(cache.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn status_counts_aggregate_the_projection() {
        let cache = RecordCache::new();
        let mut checked = record("JF-1", "Acme");
        checked.status = LifecycleStatus::Checked;
        cache.upsert(checked).await;
        cache.upsert(record("JF-2", "Globex")).await;

        let counts = cache.counts_by_status().await;
        assert_eq!(counts.get(&LifecycleStatus::Checked), Some(&1));
        assert_eq!(counts.get(&LifecycleStatus::Pending), Some(&1));
    }
}
