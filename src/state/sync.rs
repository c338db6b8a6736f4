//! Sync dispatch: debounced persistence and broadcast.
//!
//! Encounter mutations arrive in bursts (a sort emits one event, a start
//! emits several). The dispatcher coalesces them into a single emission once
//! the debounce window has passed since the last change.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::player_view::PlayerViewEncounter;
use super::settings::DEFAULT_SYNC_DEBOUNCE_MS;
use super::snapshot::{EncounterSnapshot, SnapshotError};

/// Channel name for player view updates.
pub const BROADCAST_CHANNEL: &str = "update encounter";

/// Trailing-edge debounce over a single pending deadline.
#[derive(Debug, Clone)]
pub struct SyncDispatcher {
    window: Duration,
    pending: Option<Instant>,
    fired: u64,
}

impl Default for SyncDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS))
    }
}

impl SyncDispatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            fired: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    /// Cancel any pending emission and restart the window from `now`.
    pub fn schedule_at(&mut self, now: Instant) {
        self.cancel();
        self.pending = Some(now + self.window);
    }

    /// Drop the pending emission. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Consume the pending emission if its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if now >= deadline => self.fire(),
            _ => false,
        }
    }

    /// Consume the pending emission regardless of the window.
    pub fn take_pending(&mut self) -> bool {
        self.is_pending() && self.fire()
    }

    fn fire(&mut self) -> bool {
        self.pending = None;
        self.fired += 1;
        true
    }

    /// Number of emissions fired so far.
    pub fn fired_count(&self) -> u64 {
        self.fired
    }
}

/// Errors from a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for encounter snapshots, keyed by encounter id.
pub trait SnapshotStore {
    fn load(&self, encounter_id: &str) -> Result<Option<EncounterSnapshot>, StoreError>;

    fn save(&mut self, encounter_id: &str, snapshot: &EncounterSnapshot) -> Result<(), StoreError>;
}

/// In-memory store holding records as JSON text.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw JSON record (e.g. one written by an older version).
    pub fn insert_raw(&mut self, encounter_id: impl Into<String>, json: impl Into<String>) {
        self.records.insert(encounter_id.into(), json.into());
    }

    pub fn raw(&self, encounter_id: &str) -> Option<&str> {
        self.records.get(encounter_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, encounter_id: &str) -> Result<Option<EncounterSnapshot>, StoreError> {
        self.records
            .get(encounter_id)
            .map(|json| EncounterSnapshot::from_json(json))
            .transpose()
            .map_err(StoreError::from)
    }

    fn save(&mut self, encounter_id: &str, snapshot: &EncounterSnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json()?;
        self.records.insert(encounter_id.to_string(), json);
        Ok(())
    }
}

/// Errors from a broadcaster.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast channel closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbound player view updates.
pub trait Broadcaster {
    fn broadcast(
        &mut self,
        channel: &str,
        encounter_id: &str,
        payload: &PlayerViewEncounter,
    ) -> Result<(), BroadcastError>;
}

/// A broadcast as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub channel: String,
    pub encounter_id: String,
    pub payload: serde_json::Value,
}

impl Broadcaster for Sender<BroadcastMessage> {
    fn broadcast(
        &mut self,
        channel: &str,
        encounter_id: &str,
        payload: &PlayerViewEncounter,
    ) -> Result<(), BroadcastError> {
        let message = BroadcastMessage {
            channel: channel.to_string(),
            encounter_id: encounter_id.to_string(),
            payload: serde_json::to_value(payload)?,
        };
        self.send(message).map_err(|_| BroadcastError::Closed)
    }
}
