//! Encounter state management.
//!
//! - `combatant` - Statblock templates and roster entries
//! - `encounter` - Turn order state machine
//! - `snapshot` - Persisted form and legacy migration
//! - `player_view` - Filtered projection for the players' display
//! - `sync` - Debounced persistence and broadcast
//! - `settings` - User configuration
//! - `turn_timer` - Time spent on the current turn
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        EncounterSession                          │
//! │                                                                  │
//! │  ┌───────────────┐  event  ┌────────────────┐                    │
//! │  │   Encounter   │────────▶│ SyncDispatcher │                    │
//! │  │ roster, turn, │         │ (debounce)     │                    │
//! │  │ round counter │         └───────┬────────┘                    │
//! │  └───────┬───────┘                 │ tick / flush                │
//! │          │            ┌────────────┴─────────────┐               │
//! │          │            ▼                          ▼               │
//! │          │     Encounter::save            Encounter::player_view │
//! │          │            │                          │               │
//! │          │            ▼                          ▼               │
//! │          │      SnapshotStore               Broadcaster          │
//! │          │            │                                          │
//! │          └◀───────────┘ load_saved (on open)                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod combatant;
pub mod encounter;
pub mod player_view;
pub mod settings;
pub mod snapshot;
pub mod sync;
pub mod turn_timer;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, warn};

// Re-export commonly used types
pub use combatant::{Combatant, CombatantId, HealthLabel, StatBlock};
pub use encounter::{
    ConfirmPrompt, DiceRoller, Encounter, EncounterEvent, EncounterState, InitiativeRoller,
    RollPrompt, RollRequest, Telemetry, TracingTelemetry, CLEAR_ENCOUNTER_PROMPT,
    TURN_COMPLETED_EVENT,
};
pub use player_view::{PlayerViewCombatant, PlayerViewEncounter};
pub use settings::{HpVerbosity, Settings, SettingsError};
pub use snapshot::{
    EncounterSnapshot, SavedCombatant, SavedEncounter, SnapshotError, NO_ACTIVE_COMBATANT,
};
pub use sync::{
    BroadcastError, BroadcastMessage, Broadcaster, MemoryStore, SnapshotStore, StoreError,
    SyncDispatcher, BROADCAST_CHANNEL,
};
pub use turn_timer::TurnTimer;

/// An encounter wired to persistence and the player view.
///
/// Every encounter change schedules the dispatcher; `tick` performs the
/// coalesced save and broadcast once the debounce window has passed.
pub struct EncounterSession {
    encounter: Encounter,
    sync: Rc<RefCell<SyncDispatcher>>,
    store: Box<dyn SnapshotStore>,
    broadcaster: Box<dyn Broadcaster>,
}

impl fmt::Debug for EncounterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncounterSession")
            .field("encounter", &self.encounter)
            .field("sync", &self.sync.borrow())
            .finish_non_exhaustive()
    }
}

impl EncounterSession {
    /// Open the session for `encounter_id`, restoring its latest snapshot.
    ///
    /// An unreadable snapshot is logged and the session starts empty.
    pub fn open(
        encounter_id: impl Into<String>,
        settings: Settings,
        store: Box<dyn SnapshotStore>,
        broadcaster: Box<dyn Broadcaster>,
        prompt: &mut dyn RollPrompt,
    ) -> Self {
        let sync = Rc::new(RefCell::new(SyncDispatcher::new(settings.sync_debounce())));
        let mut encounter = Encounter::new(encounter_id).with_settings(settings);

        let handle = Rc::clone(&sync);
        encounter.subscribe(move |_| handle.borrow_mut().schedule());

        match store.load(&encounter.id) {
            Ok(Some(snapshot)) => {
                debug!(encounter = %encounter.id, creatures = snapshot.creatures.len(), "restoring snapshot");
                encounter.load_saved(snapshot, prompt);
            }
            Ok(None) => {}
            Err(e) => warn!(encounter = %encounter.id, error = %e, "failed to load snapshot"),
        }

        Self {
            encounter,
            sync,
            store,
            broadcaster,
        }
    }

    pub fn encounter(&self) -> &Encounter {
        &self.encounter
    }

    pub fn encounter_mut(&mut self) -> &mut Encounter {
        &mut self.encounter
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    pub fn is_sync_pending(&self) -> bool {
        self.sync.borrow().is_pending()
    }

    pub fn sync_count(&self) -> u64 {
        self.sync.borrow().fired_count()
    }

    /// Emit if the debounce window has elapsed. Returns true if it fired.
    pub fn tick(&mut self, now: Instant) -> bool {
        let due = self.sync.borrow_mut().take_due(now);
        if due {
            self.emit();
        }
        due
    }

    /// Emit any pending change immediately.
    pub fn flush(&mut self) -> bool {
        let pending = self.sync.borrow_mut().take_pending();
        if pending {
            self.emit();
        }
        pending
    }

    /// Persist and broadcast the current state. Failures are logged only.
    fn emit(&mut self) {
        let id = self.encounter.id.clone();

        let snapshot = self.encounter.save(None);
        if let Err(e) = self.store.save(&id, &snapshot) {
            warn!(encounter = %id, error = %e, "failed to persist encounter");
        }

        let view = self.encounter.player_view(None);
        if let Err(e) = self.broadcaster.broadcast(BROADCAST_CHANNEL, &id, &view) {
            warn!(encounter = %id, error = %e, "failed to broadcast encounter");
        }
    }
}
