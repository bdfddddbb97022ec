//! Document-DB backend.
//!
//! Talks to a managed, multi-reader document database over REST. Writes need
//! no revision token: the service applies them in arrival order, so the last
//! writer wins and `supports_concurrency_token()` is false. What this backend
//! adds over the others is a live snapshot feed: `subscribe` returns a watch
//! channel that yields the full collection contents whenever any record
//! changes, which lets the cache stay current without the caller polling.
//!
//! The feed is driven by one listener task per collection that polls the
//! collection endpoint and publishes on change. Only the channel is part of
//! the contract; swapping the task for a true streaming listener would not
//! touch any caller.
//!
//! Timestamps come back as native `{seconds, nanos}` objects here; the record
//! model normalizes them to the same in-memory type the other backends
//! produce.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, watch};
use url::Url;

use crate::backend::{BackendAdapter, Collection, USERS_SEGMENT};
use crate::error::StoreError;
use crate::record::{JobFileRecord, UserRecord};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DocumentDbAdapter {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<SecretString>,
    poll_interval: Duration,
    feeds: Mutex<HashMap<Collection, watch::Receiver<Vec<JobFileRecord>>>>,
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable {
        reason: err.to_string(),
    }
}

impl DocumentDbAdapter {
    pub fn new(
        base_url: Url,
        auth_token: Option<SecretString>,
        poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base_url,
            auth_token,
            poll_interval,
            feeds: Mutex::new(HashMap::new()),
        })
    }

    fn document_url(&self, segment: &str, id: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                StoreError::Serialization("document DB base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty().push(segment);
            if let Some(id) = id {
                path.push(id);
            }
        }
        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn fetch_collection(&self, segment: &str) -> Result<Vec<JobFileRecord>, StoreError> {
        let url = self.document_url(segment, None)?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let raw: Vec<serde_json::Value> = resp
                    .json()
                    .await
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let mut records = Vec::with_capacity(raw.len());
                for value in raw {
                    match serde_json::from_value::<JobFileRecord>(value) {
                        Ok(record) => records.push(record),
                        Err(e) => tracing::warn!("skipping malformed document in '{segment}': {e}"),
                    }
                }
                records.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(records)
            }
            status => Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} listing '{segment}'"),
            }),
        }
    }

}

/// Listener loop behind `subscribe`: polls the collection endpoint and
/// publishes a fresh snapshot whenever the contents change, winding down once
/// every receiver is gone.
struct CollectionFeed {
    poller: DocumentDbAdapter,
    coll: Collection,
    tx: watch::Sender<Vec<JobFileRecord>>,
}

impl CollectionFeed {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.tx.closed() => break,
                _ = tokio::time::sleep(self.poller.poll_interval) => {}
            }
            match self.poller.fetch_collection(self.coll.segment()).await {
                Ok(snapshot) => {
                    self.tx.send_if_modified(|current| {
                        if *current == snapshot {
                            false
                        } else {
                            *current = snapshot;
                            true
                        }
                    });
                }
                // Transient poll failures keep the previous snapshot; the
                // next tick tries again.
                Err(e) => tracing::warn!("live feed poll failed for {:?}: {e}", self.coll),
            }
        }
        tracing::debug!("live feed for {:?} stopped", self.coll);
    }
}

#[async_trait]
impl BackendAdapter for DocumentDbAdapter {
    fn name(&self) -> &'static str {
        "document-db"
    }

    fn supports_live_updates(&self) -> bool {
        true
    }

    async fn get(&self, coll: Collection, id: &str) -> Result<JobFileRecord, StoreError> {
        let url = self.document_url(coll.segment(), Some(id))?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if status.is_success() => {
                resp.json::<JobFileRecord>()
                    .await
                    .map_err(|e| StoreError::MalformedRecord {
                        id: id.to_string(),
                        reason: e.to_string(),
                    })
            }
            status => Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} reading '{id}'"),
            }),
        }
    }

    async fn put(
        &self,
        coll: Collection,
        id: &str,
        record: &JobFileRecord,
        _expected_token: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let url = self.document_url(coll.segment(), Some(id))?;
        let resp = self
            .authorized(self.client.put(url))
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} writing '{id}'"),
            });
        }
        Ok(None)
    }

    async fn delete(&self, coll: Collection, id: &str) -> Result<(), StoreError> {
        let url = self.document_url(coll.segment(), Some(id))?;
        let resp = self
            .authorized(self.client.delete(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if status.is_success() => Ok(()),
            status => Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} deleting '{id}'"),
            }),
        }
    }

    async fn list_all(&self, coll: Collection) -> Result<Vec<JobFileRecord>, StoreError> {
        self.fetch_collection(coll.segment()).await
    }

    async fn subscribe(
        &self,
        coll: Collection,
    ) -> Result<watch::Receiver<Vec<JobFileRecord>>, StoreError> {
        let mut feeds = self.feeds.lock().await;
        if let Some(rx) = feeds.get(&coll) {
            return Ok(rx.clone());
        }

        let initial = self.fetch_collection(coll.segment()).await?;
        let (tx, rx) = watch::channel(initial);
        // The map keeps one receiver alive, so the feed runs for the
        // adapter's lifetime; `tx.closed()` fires once the adapter drops.
        feeds.insert(coll, rx.clone());
        drop(feeds);

        let feed = CollectionFeed {
            poller: Self {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                auth_token: self.auth_token.clone(),
                poll_interval: self.poll_interval,
                feeds: Mutex::new(HashMap::new()),
            },
            coll,
            tx,
        };
        tokio::spawn(feed.run());
        Ok(rx)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let url = self.document_url(USERS_SEGMENT, None)?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let raw: Vec<serde_json::Value> = resp
                    .json()
                    .await
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let mut users = Vec::with_capacity(raw.len());
                for value in raw {
                    match serde_json::from_value::<UserRecord>(value) {
                        Ok(user) => users.push(user),
                        Err(e) => tracing::warn!("skipping malformed user document: {e}"),
                    }
                }
                users.sort_by(|a, b| a.username.cmp(&b.username));
                Ok(users)
            }
            status => Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} listing users"),
            }),
        }
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let id = crate::record::record_id(&user.username);
        let url = self.document_url(USERS_SEGMENT, Some(&id))?;
        let resp = self
            .authorized(self.client.put(url))
            .json(user)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Unavailable {
                reason: format!("document DB returned {status} writing user '{id}'"),
            });
        }
        Ok(())
    }
}
