//! Persisted encounter snapshots.
//!
//! The saved shape uses the PascalCase keys of the persistence record:
//!
//! ```text
//! { Name, ActiveCreatureId (-1 = none), RoundCounter?, DisplayTurnTimer?,
//!   Creatures: [{ Id, Statblock, MaxHP, CurrentHP, TemporaryHP, Initiative,
//!                 Alias, IndexLabel, Tags, Hidden }] }
//! ```
//!
//! Older records carry a positional `ActiveCreatureIndex` instead of
//! `ActiveCreatureId`; it is resolved against the live roster on load.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;

use super::combatant::{Combatant, CombatantId, StatBlock};
use super::encounter::{Encounter, EncounterEvent, EncounterState, RollPrompt};

/// Sentinel for "no active combatant".
pub const NO_ACTIVE_COMBATANT: i64 = -1;

fn no_active_combatant() -> i64 {
    NO_ACTIVE_COMBATANT
}

fn default_index_label() -> u32 {
    1
}

/// Decode an explicit `null` as the field's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_no_active<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(NO_ACTIVE_COMBATANT))
}

fn null_as_first_label<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or_else(default_index_label))
}

/// Errors decoding or encoding a persisted record.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persisted combatant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SavedCombatant {
    #[serde(default)]
    pub id: Option<u64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub statblock: StatBlock,

    #[serde(rename = "MaxHP", default, deserialize_with = "null_as_default")]
    pub max_hp: i32,

    #[serde(rename = "CurrentHP", default, deserialize_with = "null_as_default")]
    pub current_hp: i32,

    #[serde(rename = "TemporaryHP", default, deserialize_with = "null_as_default")]
    pub temporary_hp: i32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub initiative: i32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub alias: String,

    #[serde(default = "default_index_label", deserialize_with = "null_as_first_label")]
    pub index_label: u32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub hidden: bool,
}

impl From<&Combatant> for SavedCombatant {
    fn from(c: &Combatant) -> Self {
        Self {
            id: Some(c.id.0),
            statblock: (*c.statblock).clone(),
            max_hp: c.max_hp,
            current_hp: c.current_hp,
            temporary_hp: c.temporary_hp,
            initiative: c.initiative,
            alias: c.alias.clone(),
            index_label: c.index_label,
            tags: c.tags.clone(),
            hidden: c.hidden,
        }
    }
}

/// Encounter envelope shared by the persisted snapshot and the player view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SavedEncounter<C> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default = "no_active_combatant", deserialize_with = "null_as_no_active")]
    pub active_creature_id: i64,

    /// Legacy positional field, read but never written
    #[serde(default, skip_serializing)]
    pub active_creature_index: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_counter: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_turn_timer: Option<bool>,

    #[serde(
        default = "Vec::new",
        deserialize_with = "null_as_default",
        bound(deserialize = "C: Deserialize<'de>")
    )]
    pub creatures: Vec<C>,
}

/// The persisted form of an encounter.
pub type EncounterSnapshot = SavedEncounter<SavedCombatant>;

impl<C> SavedEncounter<C> {
    pub fn active_id(&self) -> Option<CombatantId> {
        u64::try_from(self.active_creature_id).ok().map(CombatantId)
    }
}

impl EncounterSnapshot {
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub(crate) fn active_id_or_sentinel(id: Option<CombatantId>) -> i64 {
    id.and_then(|id| i64::try_from(id.0).ok())
        .unwrap_or(NO_ACTIVE_COMBATANT)
}

impl Encounter {
    /// Encode the current state. `name` defaults to the encounter id.
    pub fn save(&self, name: Option<&str>) -> EncounterSnapshot {
        SavedEncounter {
            name: name.unwrap_or(&self.id).to_string(),
            active_creature_id: active_id_or_sentinel(self.active_combatant),
            active_creature_index: None,
            round_counter: Some(self.round_counter),
            display_turn_timer: None,
            creatures: self.roster.iter().map(SavedCombatant::from).collect(),
        }
    }

    /// Append a combatant restored from saved state.
    ///
    /// The saved id is kept unless it collides with a roster member.
    pub fn add_saved_combatant(&mut self, saved: SavedCombatant) -> CombatantId {
        let id = self.allocate_id(saved.id);
        let index_label = self.next_index_label(&saved.statblock.name);

        let mut combatant = Combatant::new(id, Arc::new(saved.statblock), index_label, saved.hidden);
        combatant.max_hp = saved.max_hp;
        combatant.current_hp = saved.current_hp;
        combatant.temporary_hp = saved.temporary_hp.max(0);
        combatant.initiative = saved.initiative;
        combatant.alias = saved.alias;
        combatant.tags = saved.tags;

        self.push_combatant(combatant)
    }

    /// Restore a snapshot into this encounter.
    ///
    /// Restored combatants are appended. If this encounter is already running
    /// they are rolled in and the roster re-sorted; otherwise the encounter
    /// resumes the saved turn when the snapshot had one.
    pub fn load_saved(&mut self, saved: EncounterSnapshot, prompt: &mut dyn RollPrompt) {
        let mut active_raw = saved.active_creature_id;
        if let Some(index) = saved.active_creature_index.filter(|&i| i != NO_ACTIVE_COMBATANT) {
            match usize::try_from(index).ok().and_then(|i| self.roster.get(i)) {
                Some(c) => active_raw = active_id_or_sentinel(Some(c.id)),
                None => debug!(index, "legacy active index does not match the roster"),
            }
        }

        let saved_is_active = active_raw != NO_ACTIVE_COMBATANT;
        let current_is_active = self.state.is_active();

        let mut restored_active = None;
        for creature in saved.creatures {
            let saved_id = creature.id.and_then(|id| i64::try_from(id).ok());
            let id = self.add_saved_combatant(creature);
            if saved_is_active && saved_id == Some(active_raw) {
                restored_active = Some(id);
            }
            if current_is_active {
                self.roll_for(id, prompt);
            }
        }

        if current_is_active {
            self.sort_by_initiative();
            return;
        }

        if saved_is_active {
            self.state = EncounterState::Active;
            self.active_combatant = restored_active.or_else(|| {
                self.roster
                    .iter()
                    .find(|c| i64::try_from(c.id.0).ok() == Some(active_raw))
                    .map(|c| c.id)
            });
            self.turn_timer.start();
        }
        self.round_counter = saved.round_counter.filter(|&r| r > 0).unwrap_or(1);

        debug!(
            encounter = %self.id,
            state = self.state.as_str(),
            round = self.round_counter,
            "snapshot restored"
        );
        self.emit(EncounterEvent::TurnChanged {
            active: self.active_combatant,
            round: self.round_counter,
        });
    }
}
