//! The job-file record store.
//!
//! Public surface consumed by the UI collaborator: uniqueness-checked saves,
//! the approval transitions, soft-delete with recovery, listings, and
//! backup/restore — a thin facade that delegates persistence to an
//! `Arc<dyn BackendAdapter>` and keeps an owned `RecordCache` projection
//! beside it.
//!
//! Propagation policy: validation errors (`DuplicateKey`,
//! `InvalidTransition`, `EmptyReason`) are resolved here and never reach the
//! adapter layer; adapter errors (`NotFound`, `ConcurrencyConflict`,
//! `Unavailable`) pass through unchanged. A failed save never reports
//! success.

pub mod lifecycle;
pub mod validate;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::{BackendAdapter, Collection, with_retry};
use crate::cache::RecordCache;
use crate::error::StoreError;
use crate::record::{
    BackupSnapshot, BusinessKey, DeletionStamp, JobFileRecord, LifecycleStatus, RecordSummary,
    record_id,
};

/// Counts reported by `import_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub job_files: usize,
    pub users: usize,
}

pub struct JobFileStore {
    adapter: Arc<dyn BackendAdapter>,
    cache: Arc<RecordCache>,
}

impl JobFileStore {
    /// Wire the store to a backend. On push-capable backends the cache is fed
    /// by a live subscription; otherwise it starts from one full reload and
    /// is reloaded again before each write decision.
    pub async fn new(adapter: Arc<dyn BackendAdapter>) -> Result<Self, StoreError> {
        let cache = Arc::new(RecordCache::new());
        if adapter.supports_live_updates() {
            match adapter.subscribe(Collection::Active).await {
                Ok(rx) => cache.attach_feed(rx),
                Err(e) => {
                    tracing::warn!(
                        "{} backend subscription failed, falling back to pull refresh: {e}",
                        adapter.name()
                    );
                }
            }
        }
        cache.refresh(&*adapter).await?;
        Ok(Self { adapter, cache })
    }

    pub fn backend_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// The cache answers search/filter/aggregate queries without touching the
    /// backend. Display state only, never consulted for write decisions.
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Create or update a job file.
    ///
    /// Uniqueness is validated against a fresh snapshot before any write, and
    /// a save of a signed-off record reopens approval (see
    /// `lifecycle::reopen_on_edit`). Returns the stored record with backend
    /// bookkeeping (revision token, timestamps) filled in.
    pub async fn save(
        &self,
        mut candidate: JobFileRecord,
        actor: &str,
    ) -> Result<JobFileRecord, StoreError> {
        let number = candidate.job_file_number.trim().to_string();
        if number.is_empty() {
            return Err(StoreError::Serialization(
                "jobFileNumber is required".to_string(),
            ));
        }
        candidate.job_file_number = number;
        candidate.id = record_id(&candidate.job_file_number);
        candidate.deletion = None;

        self.cache.refresh(&*self.adapter).await?;
        let snapshot = self.cache.snapshot().await;
        if let Some((field, conflicting_id)) = validate::find_duplicate(&candidate, &snapshot) {
            return Err(StoreError::DuplicateKey {
                field,
                conflicting_id,
            });
        }

        // Fresh read, not the cache: the stored copy decides create vs.
        // update and supplies the revision token on token-bearing backends.
        let previous = match with_retry("load record", || {
            self.adapter.get(Collection::Active, &candidate.id)
        })
        .await
        {
            Ok(prev) => Some(prev),
            Err(StoreError::NotFound { .. }) => None,
            Err(other) => return Err(other),
        };

        let now = Utc::now();
        match &previous {
            Some(prev) => {
                // Distinct numbers can sanitize to the same storage id
                // (`JF/1` and `JF#1` both become `JF_1`). That is a
                // collision, not an update of the stored record.
                if prev.job_file_number != candidate.job_file_number {
                    return Err(StoreError::DuplicateKey {
                        field: BusinessKey::JobFileNumber,
                        conflicting_id: prev.id.clone(),
                    });
                }
                candidate.status = prev.status;
                candidate.actors.created_by = prev.actors.created_by.clone();
                candidate.actors.created_at = prev.actors.created_at;
                candidate.actors.checked_by = prev.actors.checked_by.clone();
                candidate.actors.checked_at = prev.actors.checked_at;
                candidate.actors.approved_by = prev.actors.approved_by.clone();
                candidate.actors.approved_at = prev.actors.approved_at;
                candidate.actors.rejected_by = prev.actors.rejected_by.clone();
                candidate.actors.rejected_at = prev.actors.rejected_at;
                candidate.actors.rejection_reason = prev.actors.rejection_reason.clone();
                if lifecycle::reopen_on_edit(&mut candidate) {
                    tracing::debug!(
                        "edit reopened approval for '{}' (was {})",
                        candidate.id,
                        prev.status
                    );
                }
            }
            None => {
                candidate.status = LifecycleStatus::Pending;
                candidate.actors.clear_signoff();
                candidate.actors.created_by = Some(actor.to_string());
                candidate.actors.created_at = Some(now);
            }
        }
        candidate.actors.last_updated_by = Some(actor.to_string());
        candidate.actors.updated_at = Some(now);

        let expected = previous.as_ref().and_then(|p| p.revision_token.clone());
        let token = with_retry("save record", || {
            self.adapter
                .put(Collection::Active, &candidate.id, &candidate, expected.as_deref())
        })
        .await?;
        candidate.revision_token = token;

        self.cache.upsert(candidate.clone()).await;
        Ok(candidate)
    }

    /// Fetch one active record.
    ///
    /// A crash between the two halves of `quarantine` can leave the record in
    /// both collections; the quarantined copy wins, and the active leftover is
    /// removed here to finish the interrupted delete.
    pub async fn load(&self, id: &str) -> Result<JobFileRecord, StoreError> {
        let record =
            with_retry("load record", || self.adapter.get(Collection::Active, id)).await?;
        match with_retry("probe quarantine", || {
            self.adapter.get(Collection::Quarantine, id)
        })
        .await
        {
            Ok(_) => {
                if let Err(e) = self.adapter.delete(Collection::Active, id).await {
                    tracing::warn!("could not remove active leftover of quarantined '{id}': {e}");
                }
                self.cache.remove(id).await;
                Err(StoreError::NotFound { id: id.to_string() })
            }
            Err(StoreError::NotFound { .. }) => Ok(record),
            Err(other) => Err(other),
        }
    }

    /// Summaries of every active record, refreshed from the backend.
    pub async fn list_active(&self) -> Result<Vec<RecordSummary>, StoreError> {
        self.cache.refresh(&*self.adapter).await?;
        let rows = self.cache.summaries(None).await;
        self.drop_quarantined(rows).await
    }

    /// Summaries matching a case-insensitive substring filter.
    pub async fn search(&self, query: &str) -> Result<Vec<RecordSummary>, StoreError> {
        self.cache.refresh(&*self.adapter).await?;
        let rows = self.cache.summaries(Some(query)).await;
        self.drop_quarantined(rows).await
    }

    /// Ids present in quarantine never show up in active listings, even when a
    /// stale active copy still exists.
    async fn drop_quarantined(
        &self,
        rows: Vec<RecordSummary>,
    ) -> Result<Vec<RecordSummary>, StoreError> {
        let quarantined = self.list_quarantined().await?;
        if quarantined.is_empty() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|row| quarantined.iter().all(|q| q.id != row.id))
            .collect())
    }

    pub async fn mark_checked(&self, id: &str, actor: &str) -> Result<JobFileRecord, StoreError> {
        self.transition(id, |record, now| lifecycle::mark_checked(record, actor, now))
            .await
    }

    pub async fn mark_unchecked(&self, id: &str, actor: &str) -> Result<JobFileRecord, StoreError> {
        self.transition(id, |record, _now| lifecycle::mark_unchecked(record, actor))
            .await
    }

    pub async fn mark_approved(&self, id: &str, actor: &str) -> Result<JobFileRecord, StoreError> {
        self.transition(id, |record, now| lifecycle::mark_approved(record, actor, now))
            .await
    }

    pub async fn mark_rejected(
        &self,
        id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<JobFileRecord, StoreError> {
        self.transition(id, |record, now| {
            lifecycle::mark_rejected(record, actor, reason, now)
        })
        .await
    }

    /// Apply one approval transition as a partial save of the stored record.
    async fn transition<F>(&self, id: &str, apply: F) -> Result<JobFileRecord, StoreError>
    where
        F: FnOnce(&mut JobFileRecord, DateTime<Utc>) -> Result<(), StoreError>,
    {
        let mut record =
            with_retry("load record", || self.adapter.get(Collection::Active, id)).await?;
        apply(&mut record, Utc::now())?;

        let expected = record.revision_token.clone();
        let token = with_retry("save record", || {
            self.adapter
                .put(Collection::Active, id, &record, expected.as_deref())
        })
        .await?;
        record.revision_token = token;

        self.cache.upsert(record.clone()).await;
        Ok(record)
    }

    /// Soft-delete: stamp the record and move it into quarantine.
    ///
    /// The copy into quarantine happens before the removal from the active
    /// collection, so a crash in between leaves the record recoverable in at
    /// least one place, never absent from both.
    pub async fn quarantine(&self, id: &str, actor: &str) -> Result<(), StoreError> {
        let mut record =
            with_retry("load record", || self.adapter.get(Collection::Active, id)).await?;
        record.deletion = Some(DeletionStamp {
            deleted_by: actor.to_string(),
            deleted_at: Utc::now(),
        });

        let expected = self.current_token(Collection::Quarantine, id).await?;
        with_retry("quarantine record", || {
            self.adapter
                .put(Collection::Quarantine, id, &record, expected.as_deref())
        })
        .await?;
        with_retry("remove active record", || {
            self.adapter.delete(Collection::Active, id)
        })
        .await?;

        self.cache.remove(id).await;
        tracing::info!("job file '{id}' quarantined by {actor}");
        Ok(())
    }

    /// Move a quarantined record back into the active collection, stripping
    /// the deletion stamp. Same ordering discipline as `quarantine`, and the
    /// uniqueness invariant is re-validated: if a business key was reused
    /// while the record sat in quarantine, the restore fails with
    /// `DuplicateKey` instead of violating it.
    pub async fn restore(&self, id: &str) -> Result<JobFileRecord, StoreError> {
        let mut record = with_retry("load quarantined record", || {
            self.adapter.get(Collection::Quarantine, id)
        })
        .await?;
        record.deletion = None;

        self.cache.refresh(&*self.adapter).await?;
        let snapshot = self.cache.snapshot().await;
        if let Some((field, conflicting_id)) = validate::find_duplicate(&record, &snapshot) {
            return Err(StoreError::DuplicateKey {
                field,
                conflicting_id,
            });
        }

        let expected = self.current_token(Collection::Active, id).await?;
        let token = with_retry("restore record", || {
            self.adapter
                .put(Collection::Active, id, &record, expected.as_deref())
        })
        .await?;
        with_retry("remove quarantined record", || {
            self.adapter.delete(Collection::Quarantine, id)
        })
        .await?;

        record.revision_token = token;
        self.cache.upsert(record.clone()).await;
        tracing::info!("job file '{id}' restored from quarantine");
        Ok(record)
    }

    /// Permanently delete from quarantine. Never touches the active
    /// collection.
    pub async fn purge(&self, id: &str) -> Result<(), StoreError> {
        with_retry("purge record", || {
            self.adapter.delete(Collection::Quarantine, id)
        })
        .await?;
        tracing::info!("job file '{id}' purged from quarantine");
        Ok(())
    }

    /// Every record currently in quarantine, with deletion stamps.
    pub async fn list_quarantined(&self) -> Result<Vec<JobFileRecord>, StoreError> {
        with_retry("list quarantined records", || {
            self.adapter.list_all(Collection::Quarantine)
        })
        .await
    }

    /// Full snapshot for backup, independent of which backend is active.
    /// Quarantined records are included, carrying their deletion stamps.
    pub async fn export_all(&self) -> Result<BackupSnapshot, StoreError> {
        let active = with_retry("list active records", || {
            self.adapter.list_all(Collection::Active)
        })
        .await?;
        let quarantined = self.list_quarantined().await?;
        // Quarantine wins for an id stranded in both collections, same as the
        // read paths.
        let mut job_files: Vec<JobFileRecord> = active
            .into_iter()
            .filter(|record| quarantined.iter().all(|q| q.id != record.id))
            .collect();
        job_files.extend(quarantined);
        let users = with_retry("list users", || self.adapter.list_users()).await?;
        Ok(BackupSnapshot {
            job_files,
            users,
            created_at: Utc::now(),
        })
    }

    /// Overwrite-by-id restore from a backup snapshot. Records not present in
    /// the snapshot are left untouched; this is deliberately not a
    /// full-replace restore. Each record lands in the collection its deletion
    /// stamp implies.
    pub async fn import_all(&self, snapshot: BackupSnapshot) -> Result<ImportReport, StoreError> {
        let mut report = ImportReport {
            job_files: 0,
            users: 0,
        };

        for mut record in snapshot.job_files {
            // Re-derive the id so a hand-edited snapshot cannot break the
            // id-is-a-function-of-the-number invariant.
            record.id = record_id(&record.job_file_number);
            if record.id.is_empty() {
                tracing::warn!("skipping snapshot record without a job file number");
                continue;
            }
            let coll = if record.deletion.is_some() {
                Collection::Quarantine
            } else {
                Collection::Active
            };
            let expected = self.current_token(coll, &record.id).await?;
            with_retry("import record", || {
                self.adapter.put(coll, &record.id, &record, expected.as_deref())
            })
            .await?;
            report.job_files += 1;
        }

        for user in &snapshot.users {
            with_retry("import user", || self.adapter.put_user(user)).await?;
            report.users += 1;
        }

        self.cache.refresh(&*self.adapter).await?;
        tracing::info!(
            "imported {} job files and {} users",
            report.job_files,
            report.users
        );
        Ok(report)
    }

    /// Current revision token of a stored blob, or None when it does not
    /// exist. Only meaningful on token-bearing backends; elsewhere this is
    /// one cheap existence probe.
    async fn current_token(
        &self,
        coll: Collection,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        if !self.adapter.supports_concurrency_token() {
            return Ok(None);
        }
        match with_retry("read revision token", || self.adapter.get(coll, id)).await {
            Ok(existing) => Ok(existing.revision_token),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }
}
