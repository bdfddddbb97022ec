//! Local activity log.
//!
//! Append-only, capped ring buffer of "actor opened job file X" events, kept
//! on the client side for the recently-viewed list. Not part of the backend
//! contract and never persisted through an adapter.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::ts;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub actor: String,
    pub record_id: String,
    #[serde(with = "ts")]
    pub opened_at: DateTime<Utc>,
}

pub struct ActivityLog {
    capacity: usize,
    events: Mutex<VecDeque<ActivityEvent>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an open event, evicting the oldest entry once full.
    pub fn record_open(&self, actor: &str, record_id: &str) {
        let event = ActivityEvent {
            actor: actor.to_string(),
            record_id: record_id.to_string(),
            opened_at: Utc::now(),
        };
        let Ok(mut events) = self.events.lock() else {
            return;
        };
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
