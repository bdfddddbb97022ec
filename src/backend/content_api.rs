//! Content-API backend.
//!
//! Repurposes a version-controlled content-hosting API as a key/blob store.
//! Every blob carries a revision token (the content hash the host assigns);
//! writes and deletes must present the token of the version they are
//! replacing, obtained by a read immediately beforehand. A stale token means
//! another writer raced and the call fails with `ConcurrencyConflict` instead
//! of silently losing the other write.
//!
//! This is the only backend with true cross-client conflict detection, so it
//! is the only one reporting `supports_concurrency_token() == true`.
//!
//! Listing is not free here: the directory index is one request, then each
//! blob's content costs one more. Blobs that vanish between index and fetch,
//! or fail to decode, are skipped with a warning.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{BackendAdapter, Collection, USERS_SEGMENT};
use crate::error::StoreError;
use crate::record::{JobFileRecord, UserRecord};

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct ContentApiAdapter {
    client: reqwest::Client,
    base_url: Url,
    token: SecretString,
    branch: Option<String>,
}

/// One entry of a directory index response.
#[derive(Debug, Deserialize)]
struct DirEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// A blob read response: base64 content plus its revision token.
#[derive(Debug, Deserialize)]
struct BlobResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: String,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    content: Option<WrittenBlob>,
}

#[derive(Debug, Deserialize)]
struct WrittenBlob {
    sha: String,
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable {
        reason: err.to_string(),
    }
}

/// Decode a blob body (base64, possibly newline-wrapped) into a record.
fn decode_blob(id: &str, blob: &BlobResponse) -> Result<JobFileRecord, StoreError> {
    let packed: String = blob
        .content
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect();
    let bytes = BASE64.decode(packed).map_err(|e| StoreError::MalformedRecord {
        id: id.to_string(),
        reason: format!("invalid base64 content: {e}"),
    })?;
    let mut record: JobFileRecord =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::MalformedRecord {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    record.revision_token = Some(blob.sha.clone());
    Ok(record)
}

fn encode_record(record: &JobFileRecord) -> Result<String, StoreError> {
    let body = serde_json::to_vec_pretty(record)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(BASE64.encode(body))
}

/// Map a failed write status. The host answers 409 on ref races and 422 when
/// the supplied token does not match (or is missing for an existing blob);
/// both mean the caller's view of the blob is stale.
fn write_conflict(status: StatusCode, id: &str) -> Option<StoreError> {
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED | StatusCode::UNPROCESSABLE_ENTITY => {
            Some(StoreError::ConcurrencyConflict { id: id.to_string() })
        }
        _ => None,
    }
}

impl ContentApiAdapter {
    pub fn new(
        base_url: Url,
        token: SecretString,
        branch: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base_url,
            token,
            branch,
        })
    }

    fn entry_url(&self, segment: &str, file: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::Serialization("content API base URL cannot be a base".to_string()))?;
            path.pop_if_empty().push(segment);
            if let Some(file) = file {
                path.push(file);
            }
        }
        if let Some(branch) = self.branch.as_deref() {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn fetch_blob(&self, segment: &str, id: &str) -> Result<BlobResponse, StoreError> {
        let url = self.entry_url(segment, Some(&format!("{id}.json")))?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if status.is_success() => {
                resp.json::<BlobResponse>()
                    .await
                    .map_err(|e| StoreError::MalformedRecord {
                        id: id.to_string(),
                        reason: e.to_string(),
                    })
            }
            status => Err(StoreError::Unavailable {
                reason: format!("content API returned {status} reading '{id}'"),
            }),
        }
    }

    async fn write_blob(
        &self,
        segment: &str,
        id: &str,
        content: String,
        expected_token: Option<&str>,
        message: String,
    ) -> Result<Option<String>, StoreError> {
        let url = self.entry_url(segment, Some(&format!("{id}.json")))?;
        let request = WriteRequest {
            message,
            content,
            sha: expected_token,
            branch: self.branch.as_deref(),
        };
        let resp = self
            .authorized(self.client.put(url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if let Some(conflict) = write_conflict(status, id) {
            return Err(conflict);
        }
        if !status.is_success() {
            return Err(StoreError::Unavailable {
                reason: format!("content API returned {status} writing '{id}'"),
            });
        }
        let written: WriteResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(written.content.map(|c| c.sha))
    }

    async fn list_segment(&self, segment: &str) -> Result<Vec<DirEntry>, StoreError> {
        let url = self.entry_url(segment, None)?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            // A directory that was never written to does not exist yet.
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => resp
                .json::<Vec<DirEntry>>()
                .await
                .map_err(|e| StoreError::Serialization(e.to_string())),
            status => Err(StoreError::Unavailable {
                reason: format!("content API returned {status} listing '{segment}'"),
            }),
        }
    }
}

#[async_trait]
impl BackendAdapter for ContentApiAdapter {
    fn name(&self) -> &'static str {
        "content-api"
    }

    fn supports_concurrency_token(&self) -> bool {
        true
    }

    async fn get(&self, coll: Collection, id: &str) -> Result<JobFileRecord, StoreError> {
        let blob = self.fetch_blob(coll.segment(), id).await?;
        decode_blob(id, &blob)
    }

    async fn put(
        &self,
        coll: Collection,
        id: &str,
        record: &JobFileRecord,
        expected_token: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let content = encode_record(record)?;
        let message = format!("save job file {id}");
        self.write_blob(coll.segment(), id, content, expected_token, message)
            .await
    }

    async fn delete(&self, coll: Collection, id: &str) -> Result<(), StoreError> {
        // The host requires the current token for deletes too, so read first.
        let blob = self.fetch_blob(coll.segment(), id).await?;
        let url = self.entry_url(coll.segment(), Some(&format!("{id}.json")))?;
        let request = DeleteRequest {
            message: format!("delete job file {id}"),
            sha: &blob.sha,
            branch: self.branch.as_deref(),
        };
        let resp = self
            .authorized(self.client.delete(url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        if let Some(conflict) = write_conflict(status, id) {
            return Err(conflict);
        }
        if !status.is_success() {
            return Err(StoreError::Unavailable {
                reason: format!("content API returned {status} deleting '{id}'"),
            });
        }
        Ok(())
    }

    async fn list_all(&self, coll: Collection) -> Result<Vec<JobFileRecord>, StoreError> {
        let entries = self.list_segment(coll.segment()).await?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.kind != "file" {
                continue;
            }
            let Some(id) = entry.name.strip_suffix(".json") else {
                continue;
            };
            // One request per blob; tolerate entries that are gone or broken.
            match self.get(coll, id).await {
                Ok(record) => records.push(record),
                Err(StoreError::NotFound { .. }) => {}
                Err(StoreError::MalformedRecord { id, reason }) => {
                    tracing::warn!("skipping malformed blob '{id}': {reason}");
                }
                Err(other) => return Err(other),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let entries = self.list_segment(USERS_SEGMENT).await?;
        let mut users = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.kind != "file" {
                continue;
            }
            let Some(id) = entry.name.strip_suffix(".json") else {
                continue;
            };
            let blob = match self.fetch_blob(USERS_SEGMENT, id).await {
                Ok(blob) => blob,
                Err(StoreError::NotFound { .. }) => continue,
                Err(other) => return Err(other),
            };
            let packed: String = blob
                .content
                .as_deref()
                .unwrap_or_default()
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect();
            let parsed = BASE64
                .decode(packed)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<UserRecord>(&bytes).ok());
            match parsed {
                Some(user) => users.push(user),
                None => tracing::warn!("skipping malformed user blob '{id}'"),
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let id = crate::record::record_id(&user.username);
        let body = serde_json::to_vec_pretty(user)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let content = BASE64.encode(body);

        // Token dance applies to users too: fetch the current sha, then write.
        let expected = match self.fetch_blob(USERS_SEGMENT, &id).await {
            Ok(blob) => Some(blob.sha),
            Err(StoreError::NotFound { .. }) => None,
            Err(other) => return Err(other),
        };
        self.write_blob(
            USERS_SEGMENT,
            &id,
            content,
            expected.as_deref(),
            format!("save user {id}"),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use url::Url;

    use super::{BlobResponse, ContentApiAdapter, decode_blob, encode_record, write_conflict};
    use crate::error::StoreError;
    use crate::record::JobFileRecord;

    fn adapter() -> ContentApiAdapter {
        ContentApiAdapter::new(
            Url::parse("https://api.example.com/repos/acme/jobfiles/contents").expect("url"),
            SecretString::from("test-token"),
            Some("main".to_string()),
        )
        .expect("adapter")
    }

    #[test]
    fn entry_urls_nest_under_the_collection_segment() {
        let adapter = adapter();
        let url = adapter
            .entry_url("jobfiles", Some("JF_2024_001.json"))
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/repos/acme/jobfiles/contents/jobfiles/JF_2024_001.json?ref=main"
        );
    }

    #[test]
    fn blob_round_trip_restores_the_record_and_token() {
        let mut record = JobFileRecord::new("JF/2024/001");
        record.invoice_number = "INV-5".to_string();

        let content = encode_record(&record).expect("encode");
        // Hosts wrap base64 bodies in newlines; decoding must tolerate that.
        let wrapped: String = content
            .as_bytes()
            .chunks(60)
            .map(|chunk| format!("{}\n", String::from_utf8_lossy(chunk)))
            .collect();
        let blob = BlobResponse {
            sha: "abc123".to_string(),
            content: Some(wrapped),
        };

        let decoded = decode_blob("JF_2024_001", &blob).expect("decode");
        assert_eq!(decoded.job_file_number, "JF/2024/001");
        assert_eq!(decoded.invoice_number, "INV-5");
        assert_eq!(decoded.revision_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn stale_token_statuses_map_to_concurrency_conflict() {
        for status in [
            StatusCode::CONFLICT,
            StatusCode::PRECONDITION_FAILED,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert!(matches!(
                write_conflict(status, "JF-1"),
                Some(StoreError::ConcurrencyConflict { .. })
            ));
        }
        assert!(write_conflict(StatusCode::BAD_GATEWAY, "JF-1").is_none());
    }

    #[test]
    fn garbage_blob_is_malformed_not_fatal() {
        let blob = BlobResponse {
            sha: "abc".to_string(),
            content: Some("!!!not-base64!!!".to_string()),
        };
        assert!(matches!(
            decode_blob("JF-1", &blob),
            Err(StoreError::MalformedRecord { .. })
        ));
    }
}
