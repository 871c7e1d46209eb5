//! Completion overlay: which task ids the user has marked done.
//!
//! The upstream task list carries no durable completed flag and is replaced on
//! every fetch, so completion lives in a separate bounded log persisted in a
//! single host text field. Membership in that log is the only evidence of
//! "closed". The log is FIFO: once the encoded list would outgrow the field,
//! the oldest ids are evicted and those tasks quietly read as open again.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::command::ServiceCall;
use crate::error::OverlayError;
use crate::normalize::ProjectView;
use crate::snapshot::Snapshot;

/// Length of the empty encoding `[]`.
pub const MIN_CAPACITY: usize = 2;

/// Backing fields for one overlay instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    pub log_entity: String,
    pub event_entity: Option<String>,
    pub capacity: usize,
}

/// Ordered, capacity-bounded list of closed task ids, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedLog {
    ids: VecDeque<String>,
    capacity: usize,
}

impl BoundedLog {
    /// Capacities below the empty encoding `[]` are raised to it; such a log
    /// stays empty and rejects every id.
    pub fn new(capacity: usize) -> Self {
        if capacity < MIN_CAPACITY {
            warn!(capacity, min = MIN_CAPACITY, "field capacity too small for any log; raising");
        }
        Self {
            ids: VecDeque::new(),
            capacity: capacity.max(MIN_CAPACITY),
        }
    }

    /// Decode a persisted log. Absent, empty or malformed input reads as an
    /// empty log; a log persisted under a larger capacity is trimmed oldest-first.
    pub fn decode(raw: Option<&str>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return log;
        };

        let items = match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(items) => items,
            Err(err) => {
                debug!(error = %err, "completion log unreadable; treating as empty");
                return log;
            }
        };

        for item in items {
            let id = match item {
                Value::String(text) => text,
                Value::Number(n) => n.to_string(),
                other => {
                    debug!(?other, "skipping non-id completion log entry");
                    continue;
                }
            };
            if !id.is_empty() && !log.contains(&id) {
                log.ids.push_back(id);
            }
        }

        while log.serialized_len() > log.capacity {
            let Some(dropped) = log.ids.pop_front() else {
                break;
            };
            warn!(id = %dropped, capacity, "persisted log over capacity; dropping oldest");
        }

        log
    }

    /// Compact JSON list, e.g. `["123","456"]`.
    pub fn encode(&self) -> String {
        Value::Array(self.ids.iter().cloned().map(Value::String).collect()).to_string()
    }

    /// Length of `encode()` in characters.
    pub fn serialized_len(&self) -> usize {
        let items: usize = self.ids.iter().map(|id| encoded_item_len(id)).sum();
        2 + items + self.ids.len().saturating_sub(1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Append `id`, evicting from the front until the encoded log fits.
    /// Returns the evicted ids, oldest first. Appending an id that is already
    /// present changes nothing.
    pub fn push_evicting(&mut self, id: &str) -> Result<Vec<String>, OverlayError> {
        if id.is_empty() {
            return Err(OverlayError::EmptyId);
        }

        let item_len = encoded_item_len(id);
        if 2 + item_len > self.capacity {
            return Err(OverlayError::IdTooLong {
                id: id.to_string(),
                len: 2 + item_len,
                capacity: self.capacity,
            });
        }

        if self.contains(id) {
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        while self.len_with(item_len) > self.capacity {
            match self.ids.pop_front() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.ids.push_back(id.to_string());
        Ok(evicted)
    }

    fn len_with(&self, item_len: usize) -> usize {
        if self.ids.is_empty() {
            2 + item_len
        } else {
            self.serialized_len() + 1 + item_len
        }
    }
}

fn encoded_item_len(id: &str) -> usize {
    Value::String(id.to_string()).to_string().chars().count()
}

/// Who closed a task, as seen by the card at click time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseContext {
    pub sensor_id: String,
    pub project_id: Option<String>,
}

/// Structured notification written to the event field for automations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloseEvent {
    pub sensor_id: String,
    pub task_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Writes produced by one `mark_closed`.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseCommand {
    pub task_id: String,
    pub evicted: Vec<String>,
    pub calls: Vec<ServiceCall>,
}

#[derive(Debug, Clone)]
pub struct OverlayStore {
    config: OverlayConfig,
    log: BoundedLog,
}

impl OverlayStore {
    pub fn new(config: OverlayConfig) -> Self {
        let log = BoundedLog::new(config.capacity);
        Self { config, log }
    }

    /// Rebuild from the durable record in `snapshot`. Nothing survives from
    /// earlier snapshots except what the host persisted.
    #[instrument(skip_all, fields(log_entity = %config.log_entity))]
    pub fn from_snapshot(config: &OverlayConfig, snapshot: &Snapshot) -> Self {
        let raw = snapshot.field_state(&config.log_entity);
        if raw.is_none() {
            debug!("completion log field absent from snapshot");
        }
        let log = BoundedLog::decode(raw, config.capacity);
        debug!(closed = log.len(), "loaded completion log");
        Self {
            config: config.clone(),
            log,
        }
    }

    pub fn is_closed(&self, task_id: &str) -> bool {
        self.log.contains(task_id)
    }

    pub fn log(&self) -> &BoundedLog {
        &self.log
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Record `task_id` as closed and build the writes that persist it.
    /// Returns `Ok(None)` when the id is already closed.
    #[instrument(skip(self, context), fields(sensor_id = %context.sensor_id))]
    pub fn mark_closed(
        &mut self,
        task_id: &str,
        context: &CloseContext,
    ) -> Result<Option<CloseCommand>, OverlayError> {
        if self.is_closed(task_id) {
            debug!("task already closed; nothing to write");
            return Ok(None);
        }

        let evicted = self.log.push_evicting(task_id)?;
        for id in &evicted {
            info!(evicted = %id, "completion log full; evicted oldest id");
        }

        let encoded = self.log.encode();
        debug!(len = encoded.chars().count(), capacity = self.log.capacity(), "encoded completion log");
        let mut calls = vec![ServiceCall::set_value(&self.config.log_entity, &encoded)];

        if let Some(event_entity) = &self.config.event_entity {
            let event = CloseEvent {
                sensor_id: context.sensor_id.clone(),
                task_id: task_id.to_string(),
                project_id: context.project_id.clone(),
            };
            match serde_json::to_string(&event) {
                Ok(payload) if payload.chars().count() <= self.log.capacity() => {
                    calls.push(ServiceCall::set_value(event_entity, &payload));
                }
                Ok(payload) => {
                    warn!(
                        len = payload.chars().count(),
                        capacity = self.log.capacity(),
                        "close event does not fit its field; skipping event write"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "failed to encode close event; skipping event write");
                }
            }
        }

        Ok(Some(CloseCommand {
            task_id: task_id.to_string(),
            evicted,
            calls,
        }))
    }

    /// Set `closed` on every entry from log membership.
    pub fn annotate(&self, mut views: Vec<ProjectView>) -> Vec<ProjectView> {
        for view in &mut views {
            for entry in &mut view.entries {
                entry.closed = self.is_closed(&entry.id);
            }
        }
        views
    }
}
