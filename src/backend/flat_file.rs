//! Flat-file backend.
//!
//! Stores each record as a pretty-printed JSON blob under
//! `<root>/jobfiles/<id>.json` (and `recyclebin/`, `users/`), the layout used
//! on a conventional web host. Existence and listings are directory scans.
//!
//! Known limitation: there is no cross-client concurrency control. Two
//! clients writing the same id can clobber each other; the adapter reports
//! `supports_concurrency_token() == false` so the store treats this backend
//! as last-writer-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::backend::{BackendAdapter, Collection, USERS_SEGMENT};
use crate::error::StoreError;
use crate::record::{JobFileRecord, UserRecord};

pub struct FlatFileAdapter {
    root: PathBuf,
}

fn io_error(context: &str, err: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        reason: format!("{context}: {err}"),
    }
}

/// Ids come out of `record_id()` and are already path-safe; anything else is
/// a caller bug we refuse rather than escape.
fn checked_file_name(id: &str) -> Result<String, StoreError> {
    let safe = !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_'))
        && !id.starts_with('.');
    if safe {
        Ok(format!("{id}.json"))
    } else {
        Err(StoreError::Serialization(format!(
            "id '{id}' is not a valid file name"
        )))
    }
}

impl FlatFileAdapter {
    /// Open (and create if needed) the storage directory tree.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for segment in [
            Collection::Active.segment(),
            Collection::Quarantine.segment(),
            USERS_SEGMENT,
        ] {
            fs::create_dir_all(root.join(segment))
                .await
                .map_err(|e| io_error("creating storage directories", e))?;
        }
        Ok(Self { root })
    }

    fn dir(&self, coll: Collection) -> PathBuf {
        self.root.join(coll.segment())
    }

    fn blob_path(&self, coll: Collection, id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir(coll).join(checked_file_name(id)?))
    }

    async fn read_blob(&self, path: &Path, id: &str) -> Result<JobFileRecord, StoreError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            Err(e) => return Err(io_error("reading record blob", e)),
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::MalformedRecord {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn write_json(&self, path: &Path, body: &[u8]) -> Result<(), StoreError> {
        // Write-then-rename keeps a crashed write from leaving a torn blob.
        // It is not a lock: concurrent writers still race.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .map_err(|e| io_error("writing record blob", e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("renaming record blob", e))
    }
}

#[async_trait]
impl BackendAdapter for FlatFileAdapter {
    fn name(&self) -> &'static str {
        "flat-file"
    }

    async fn get(&self, coll: Collection, id: &str) -> Result<JobFileRecord, StoreError> {
        let path = self.blob_path(coll, id)?;
        self.read_blob(&path, id).await
    }

    async fn put(
        &self,
        coll: Collection,
        id: &str,
        record: &JobFileRecord,
        _expected_token: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let path = self.blob_path(coll, id)?;
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_json(&path, &body).await?;
        Ok(None)
    }

    async fn delete(&self, coll: Collection, id: &str) -> Result<(), StoreError> {
        let path = self.blob_path(coll, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(io_error("deleting record blob", e)),
        }
    }

    async fn list_all(&self, coll: Collection) -> Result<Vec<JobFileRecord>, StoreError> {
        let dir = self.dir(coll);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("scanning storage directory", e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("scanning storage directory", e))?
        {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_blob(&path, stem).await {
                Ok(record) => records.push(record),
                // A broken blob must never abort the whole listing.
                Err(StoreError::MalformedRecord { id, reason }) => {
                    tracing::warn!("skipping malformed record '{id}' in {:?}: {reason}", dir);
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let dir = self.root.join(USERS_SEGMENT);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("scanning users directory", e))?;

        let mut users = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("scanning users directory", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("reading user blob", e)),
            };
            match serde_json::from_str::<UserRecord>(&raw) {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("skipping malformed user blob {:?}: {e}", path),
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let path = self
            .root
            .join(USERS_SEGMENT)
            .join(checked_file_name(&crate::record::record_id(&user.username))?);
        let body =
            serde_json::to_vec_pretty(user).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_json(&path, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::{FlatFileAdapter, checked_file_name};
    use crate::backend::{BackendAdapter, Collection};
    use crate::error::StoreError;
    use crate::record::JobFileRecord;

    #[test]
    fn file_names_reject_path_escapes() {
        assert!(checked_file_name("JF_2024_001").is_ok());
        assert!(checked_file_name("../evil").is_err());
        assert!(checked_file_name("a/b").is_err());
        assert!(checked_file_name("").is_err());
        assert!(checked_file_name(".hidden").is_err());
    }

    #[tokio::test]
    async fn listing_skips_malformed_blobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = FlatFileAdapter::open(dir.path()).await.expect("open");

        adapter
            .put(Collection::Active, "JF-1", &JobFileRecord::new("JF-1"), None)
            .await
            .expect("put");
        std::fs::write(
            dir.path().join("jobfiles").join("broken.json"),
            "{not json at all",
        )
        .expect("seed broken blob");

        let records = adapter.list_all(Collection::Active).await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "JF-1");
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = FlatFileAdapter::open(dir.path()).await.expect("open");
        let err = adapter
            .get(Collection::Active, "JF-404")
            .await
            .expect_err("missing blob");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
