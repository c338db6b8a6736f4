//! Encounter state machine.
//!
//! Owns the roster, the active-turn pointer and the round counter. Every
//! mutation is reported to subscribed listeners as an [`EncounterEvent`];
//! the sync layer uses that to schedule persistence and broadcast.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────┐   start    ┌──────────┐
//! │ Inactive │───────────▶│  Active  │──┐ next_turn / previous_turn
//! └──────────┘            └────┬─────┘◀─┘
//!       ▲                      │
//!       └──────────────────────┘
//!            end / clear
//! ```
//!
//! Roster order is the authoritative turn order. It only matches strict
//! initiative order right after a sort; manual reordering may diverge.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use super::combatant::{Combatant, CombatantId, StatBlock};
use super::settings::Settings;
use super::turn_timer::TurnTimer;

/// Confirmation text shown before clearing an encounter.
pub const CLEAR_ENCOUNTER_PROMPT: &str = "Remove all creatures and end encounter?";

/// Telemetry event emitted on every completed turn.
pub const TURN_COMPLETED_EVENT: &str = "TurnCompleted";

/// Encounter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncounterState {
    #[default]
    Inactive,
    Active,
}

impl EncounterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Change notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncounterEvent {
    CombatantAdded(CombatantId),
    CombatantRemoved(CombatantId),
    CombatantUpdated(CombatantId),
    Reordered {
        id: CombatantId,
        index: usize,
        initiative: i32,
    },
    Sorted,
    Started,
    Ended,
    TurnChanged {
        active: Option<CombatantId>,
        round: u32,
    },
    Cleared,
    SettingsChanged,
}

/// Source of random initiative rolls.
pub trait InitiativeRoller {
    fn roll(&mut self, initiative_bonus: i32) -> i32;
}

/// d20 + bonus.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceRoller;

impl InitiativeRoller for DiceRoller {
    fn roll(&mut self, initiative_bonus: i32) -> i32 {
        rand::thread_rng().gen_range(1..=20) + initiative_bonus
    }
}

impl<F: FnMut(i32) -> i32> InitiativeRoller for F {
    fn roll(&mut self, initiative_bonus: i32) -> i32 {
        self(initiative_bonus)
    }
}

/// A request for a user-entered initiative roll.
///
/// The answer comes back through [`Encounter::apply_initiative_roll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollRequest {
    pub combatant_id: CombatantId,
    pub prompt: String,
    /// Pre-rolled value offered as the default answer
    pub suggested: i32,
}

/// Queue that collects roll requests for the user.
pub trait RollPrompt {
    fn submit(&mut self, request: RollRequest);
}

impl RollPrompt for Vec<RollRequest> {
    fn submit(&mut self, request: RollRequest) {
        self.push(request);
    }
}

/// Yes/no confirmation from the user.
pub trait ConfirmPrompt {
    fn confirm(&mut self, message: &str) -> bool;
}

impl ConfirmPrompt for bool {
    fn confirm(&mut self, _message: &str) -> bool {
        *self
    }
}

impl<F: FnMut(&str) -> bool> ConfirmPrompt for F {
    fn confirm(&mut self, message: &str) -> bool {
        self(message)
    }
}

/// Best-effort usage telemetry.
pub trait Telemetry {
    fn track_event(&mut self, name: &str);
}

/// Telemetry sink that records events as trace output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn track_event(&mut self, name: &str) {
        debug!(target: "telemetry", event = name);
    }
}

type Listener = Box<dyn FnMut(&EncounterEvent)>;

/// A single encounter: roster, turn pointer and round counter.
pub struct Encounter {
    /// Externally supplied encounter identifier
    pub id: String,

    pub(crate) state: EncounterState,

    pub(crate) round_counter: u32,

    pub(crate) active_combatant: Option<CombatantId>,

    /// Ordered roster; order is the turn order
    pub(crate) roster: Vec<Combatant>,

    next_id: u64,

    pub(crate) settings: Settings,

    pub turn_timer: TurnTimer,

    roller: Box<dyn InitiativeRoller>,

    telemetry: Box<dyn Telemetry>,

    listeners: Vec<Listener>,
}

impl fmt::Debug for Encounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encounter")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("round_counter", &self.round_counter)
            .field("active_combatant", &self.active_combatant)
            .field("roster", &self.roster)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Encounter {
    /// Create an empty, inactive encounter.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: EncounterState::Inactive,
            round_counter: 1,
            active_combatant: None,
            roster: Vec::new(),
            next_id: 1,
            settings: Settings::default(),
            turn_timer: TurnTimer::new(),
            roller: Box::new(DiceRoller),
            telemetry: Box::new(TracingTelemetry),
            listeners: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_roller(mut self, roller: impl InitiativeRoller + 'static) -> Self {
        self.roller = Box::new(roller);
        self
    }

    pub fn with_telemetry(mut self, telemetry: impl Telemetry + 'static) -> Self {
        self.telemetry = Box::new(telemetry);
        self
    }

    pub fn set_roller(&mut self, roller: Box<dyn InitiativeRoller>) {
        self.roller = roller;
    }

    pub fn set_telemetry(&mut self, telemetry: Box<dyn Telemetry>) {
        self.telemetry = telemetry;
    }

    /// Register a change listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&EncounterEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn emit(&mut self, event: EncounterEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    // Accessors

    pub fn state(&self) -> EncounterState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn round_counter(&self) -> u32 {
        self.round_counter
    }

    pub fn active_combatant_id(&self) -> Option<CombatantId> {
        self.active_combatant
    }

    pub fn active_combatant(&self) -> Option<&Combatant> {
        self.active_combatant.and_then(|id| self.get(id))
    }

    /// Roster in turn order.
    pub fn combatants(&self) -> &[Combatant] {
        &self.roster
    }

    pub fn get(&self, id: CombatantId) -> Option<&Combatant> {
        self.roster.iter().find(|c| c.id == id)
    }

    pub fn position(&self, id: CombatantId) -> Option<usize> {
        self.roster.iter().position(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.emit(EncounterEvent::SettingsChanged);
    }

    /// Name shown for a combatant: alias, else template name with the
    /// index label when the name is shared.
    pub fn display_name(&self, combatant: &Combatant) -> String {
        if !combatant.alias.is_empty() {
            return combatant.alias.clone();
        }
        let shared = self
            .roster
            .iter()
            .any(|c| c.id != combatant.id && c.name() == combatant.name());
        if shared {
            format!("{} {}", combatant.name(), combatant.index_label)
        } else {
            combatant.name().to_string()
        }
    }

    // Roster editing

    /// Add a combatant from a template. Held-alt adds it hidden.
    pub fn add_combatant(&mut self, statblock: Arc<StatBlock>, hidden: bool) -> CombatantId {
        let id = self.allocate_id(None);
        let index_label = self.next_index_label(&statblock.name);
        self.push_combatant(Combatant::new(id, statblock, index_label, hidden))
    }

    pub(crate) fn next_index_label(&self, name: &str) -> u32 {
        self.roster.iter().filter(|c| c.name() == name).count() as u32 + 1
    }

    /// Hand out an id, honoring `requested` when it is free.
    pub(crate) fn allocate_id(&mut self, requested: Option<u64>) -> CombatantId {
        if let Some(raw) = requested {
            if self.get(CombatantId(raw)).is_none() {
                self.next_id = self.next_id.max(raw.saturating_add(1));
                return CombatantId(raw);
            }
            debug!(requested = raw, "combatant id already in use, assigning a fresh one");
        }
        let mut candidate = self.next_id;
        while self.get(CombatantId(candidate)).is_some() {
            candidate = candidate.wrapping_add(1);
        }
        self.next_id = candidate.checked_add(1).unwrap_or(0);
        CombatantId(candidate)
    }

    pub(crate) fn push_combatant(&mut self, combatant: Combatant) -> CombatantId {
        let id = combatant.id;
        debug!(%id, combatant = combatant.name(), "adding combatant");
        self.roster.push(combatant);
        self.emit(EncounterEvent::CombatantAdded(id));
        id
    }

    /// Remove a combatant. An active turn passes to the next in line.
    pub fn remove_combatant(&mut self, id: CombatantId) -> Option<Combatant> {
        let index = self.position(id)?;
        let removed = self.roster.remove(index);

        if self.active_combatant == Some(id) {
            self.active_combatant = if self.roster.is_empty() {
                None
            } else {
                Some(self.roster[index % self.roster.len()].id)
            };
        }

        self.emit(EncounterEvent::CombatantRemoved(id));
        Some(removed)
    }

    fn update<R>(&mut self, id: CombatantId, f: impl FnOnce(&mut Combatant, &Settings) -> R) -> Option<R> {
        let combatant = self.roster.iter_mut().find(|c| c.id == id)?;
        let result = f(combatant, &self.settings);
        self.emit(EncounterEvent::CombatantUpdated(id));
        Some(result)
    }

    /// Returns the new current HP.
    pub fn apply_damage(&mut self, id: CombatantId, amount: i32) -> Option<i32> {
        self.update(id, |c, settings| {
            c.apply_damage(amount, settings.allow_negative_hp);
            c.current_hp
        })
    }

    pub fn apply_temporary_hp(&mut self, id: CombatantId, amount: i32) -> Option<i32> {
        self.update(id, |c, _| {
            c.apply_temporary_hp(amount);
            c.temporary_hp
        })
    }

    pub fn set_alias(&mut self, id: CombatantId, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        self.update(id, |c, _| c.alias = alias).is_some()
    }

    pub fn set_hidden(&mut self, id: CombatantId, hidden: bool) -> bool {
        self.update(id, |c, _| c.hidden = hidden).is_some()
    }

    pub fn add_tag(&mut self, id: CombatantId, tag: impl Into<String>) -> bool {
        self.update(id, |c, _| c.add_tag(tag)).unwrap_or(false)
    }

    pub fn remove_tag(&mut self, id: CombatantId, tag: &str) -> bool {
        self.update(id, |c, _| c.remove_tag(tag)).unwrap_or(false)
    }

    pub fn set_initiative(&mut self, id: CombatantId, initiative: i32) -> bool {
        self.update(id, |c, _| c.initiative = initiative).is_some()
    }

    /// Answer to a [`RollRequest`]. Silently ignored if the combatant is gone.
    pub fn apply_initiative_roll(&mut self, id: CombatantId, value: i32) -> bool {
        let applied = self.set_initiative(id, value);
        if !applied {
            debug!(%id, "roll answered for a combatant no longer in the roster");
        }
        applied
    }

    // Ordering

    /// Move a combatant to `target_index`, adjusting its initiative to the
    /// combatant it passed when the move crosses an initiative boundary.
    ///
    /// Returns the resulting initiative.
    pub fn reorder(&mut self, id: CombatantId, target_index: usize) -> Option<i32> {
        let current = self.position(id)?;
        let initiative = self.roster[current].initiative;
        let passed = self.roster.get(target_index).map(|c| c.initiative);

        let new_initiative = match passed {
            Some(p) if target_index > current && p < initiative => p,
            Some(p) if target_index < current && p > initiative => p,
            _ => initiative,
        };

        let mut combatant = self.roster.remove(current);
        combatant.initiative = new_initiative;
        let index = target_index.min(self.roster.len());
        self.roster.insert(index, combatant);

        self.emit(EncounterEvent::Reordered {
            id,
            index,
            initiative: new_initiative,
        });
        Some(new_initiative)
    }

    /// Stable sort, highest initiative first, ties by initiative bonus.
    pub fn sort_by_initiative(&mut self) {
        self.roster.sort_by(|l, r| {
            r.initiative
                .cmp(&l.initiative)
                .then_with(|| r.initiative_bonus.cmp(&l.initiative_bonus))
        });
        self.emit(EncounterEvent::Sorted);
    }

    /// Roll initiative for one combatant. Player characters also get a
    /// prompt so the player can report their own roll.
    pub(crate) fn roll_for(&mut self, id: CombatantId, prompt: &mut dyn RollPrompt) -> Option<i32> {
        let combatant = self.get(id)?;
        let bonus = combatant.initiative_bonus;
        let request_prompt = combatant
            .is_player_character
            .then(|| format!("Initiative Roll for {} ({:+})", self.display_name(combatant), bonus));

        let value = self.roller.roll(bonus);
        self.set_initiative(id, value);

        if let Some(prompt_text) = request_prompt {
            prompt.submit(RollRequest {
                combatant_id: id,
                prompt: prompt_text,
                suggested: value,
            });
        }
        Some(value)
    }

    /// Roll initiative for the whole roster.
    ///
    /// With `group_similar_creatures`, the first roll for a template name is
    /// shared by every combatant with that name. A later
    /// `apply_initiative_roll` answer only updates the combatant it names.
    pub fn roll_initiative(&mut self, prompt: &mut dyn RollPrompt) {
        let order: Vec<(CombatantId, String)> = self
            .roster
            .iter()
            .map(|c| (c.id, c.name().to_string()))
            .collect();

        if !self.settings.group_similar_creatures {
            for (id, _) in order {
                self.roll_for(id, prompt);
            }
            return;
        }

        let mut shared: HashMap<String, i32> = HashMap::new();
        for (id, name) in order {
            if let Some(&value) = shared.get(&name) {
                self.set_initiative(id, value);
                continue;
            }
            if let Some(value) = self.roll_for(id, prompt) {
                shared.insert(name, value);
            }
        }
    }

    // Turn flow

    pub fn start(&mut self) {
        self.sort_by_initiative();
        self.state = EncounterState::Active;
        self.round_counter = 1;
        self.active_combatant = self.roster.first().map(|c| c.id);
        self.turn_timer.start();
        info!(encounter = %self.id, combatants = self.roster.len(), "encounter started");
        self.emit(EncounterEvent::Started);
    }

    pub fn end(&mut self) {
        self.state = EncounterState::Inactive;
        self.active_combatant = None;
        self.turn_timer.stop();
        info!(encounter = %self.id, "encounter ended");
        self.emit(EncounterEvent::Ended);
    }

    fn active_index(&self) -> Option<usize> {
        self.active_combatant.and_then(|id| self.position(id))
    }

    fn can_take_turns(&self) -> bool {
        if !self.state.is_active() || self.roster.is_empty() {
            debug!(state = self.state.as_str(), len = self.roster.len(), "turn change ignored");
            return false;
        }
        true
    }

    /// Advance to the next combatant, starting a new round past the tail.
    pub fn next_turn(&mut self) {
        if !self.can_take_turns() {
            return;
        }

        let mut next = self.active_index().map_or(0, |i| i + 1);
        if next >= self.roster.len() {
            next = 0;
            self.round_counter += 1;
        }

        self.active_combatant = Some(self.roster[next].id);
        self.turn_timer.reset();
        self.telemetry.track_event(TURN_COMPLETED_EVENT);
        self.emit(EncounterEvent::TurnChanged {
            active: self.active_combatant,
            round: self.round_counter,
        });
    }

    /// Step back one combatant, returning to the previous round before the head.
    pub fn previous_turn(&mut self) {
        if !self.can_take_turns() {
            return;
        }

        let previous = match self.active_index() {
            Some(i) if i > 0 => i - 1,
            _ => {
                self.round_counter = self.round_counter.saturating_sub(1);
                self.roster.len() - 1
            }
        };

        self.active_combatant = Some(self.roster[previous].id);
        self.emit(EncounterEvent::TurnChanged {
            active: self.active_combatant,
            round: self.round_counter,
        });
    }

    /// Empty the roster and end the encounter, after confirmation.
    pub fn clear(&mut self, confirm: &mut dyn ConfirmPrompt) -> bool {
        if !confirm.confirm(CLEAR_ENCOUNTER_PROMPT) {
            debug!(encounter = %self.id, "clear declined");
            return false;
        }

        self.roster.clear();
        info!(encounter = %self.id, "encounter cleared");
        self.emit(EncounterEvent::Cleared);
        self.end();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn statblock(name: &str, bonus: i32) -> Arc<StatBlock> {
        Arc::new(StatBlock::new(name, 10).with_initiative_modifier(bonus))
    }

    fn add(encounter: &mut Encounter, name: &str, initiative: i32, bonus: i32) -> CombatantId {
        let id = encounter.add_combatant(statblock(name, bonus), false);
        encounter.set_initiative(id, initiative);
        id
    }

    fn names(encounter: &Encounter) -> Vec<String> {
        encounter
            .combatants()
            .iter()
            .map(|c| encounter.display_name(c))
            .collect()
    }

    fn initiatives(encounter: &Encounter) -> Vec<i32> {
        encounter.combatants().iter().map(|c| c.initiative).collect()
    }

    /// Roller that hands out values from a list, then repeats the last.
    fn sequence_roller(values: Vec<i32>) -> impl FnMut(i32) -> i32 {
        let mut index = 0;
        move |_| {
            let value = values[index.min(values.len() - 1)];
            index += 1;
            value
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTelemetry(Rc<RefCell<Vec<String>>>);

    impl Telemetry for RecordingTelemetry {
        fn track_event(&mut self, name: &str) {
            self.0.borrow_mut().push(name.to_string());
        }
    }

    #[test]
    fn test_new_encounter() {
        let encounter = Encounter::new("enc-1");
        assert_eq!(encounter.state(), EncounterState::Inactive);
        assert!(encounter.is_empty());
        assert!(encounter.active_combatant_id().is_none());
    }

    #[test]
    fn test_add_assigns_unique_ids_and_labels() {
        let mut encounter = Encounter::new("enc-1");
        let a = encounter.add_combatant(statblock("Goblin", 2), false);
        let b = encounter.add_combatant(statblock("Goblin", 2), true);
        let c = encounter.add_combatant(statblock("Orc", 1), false);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(encounter.get(a).unwrap().index_label, 1);
        assert_eq!(encounter.get(b).unwrap().index_label, 2);
        assert!(encounter.get(b).unwrap().hidden);
        assert_eq!(names(&encounter), vec!["Goblin 1", "Goblin 2", "Orc"]);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut encounter = Encounter::new("enc-1");
        let a = encounter.add_combatant(statblock("Goblin", 2), false);
        encounter.remove_combatant(a);
        let b = encounter.add_combatant(statblock("Goblin", 2), false);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sort_breaks_ties_by_bonus() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 10, 0);
        add(&mut encounter, "B", 10, 2);
        add(&mut encounter, "C", 5, 0);

        encounter.sort_by_initiative();
        assert_eq!(names(&encounter), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_sort_is_stable_and_idempotent() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 12, 1);
        add(&mut encounter, "B", 15, 0);
        add(&mut encounter, "C", 12, 1);
        add(&mut encounter, "D", 12, 3);

        encounter.sort_by_initiative();
        let once = names(&encounter);
        assert_eq!(once, vec!["B", "D", "A", "C"]);

        encounter.sort_by_initiative();
        assert_eq!(names(&encounter), once);
    }

    #[test]
    fn test_reorder_adjacent_keeps_initiative() {
        let mut encounter = Encounter::new("enc-1");
        let a = add(&mut encounter, "A", 10, 0);
        add(&mut encounter, "B", 10, 0);

        assert_eq!(encounter.reorder(a, 1), Some(10));
        assert_eq!(names(&encounter), vec!["B", "A"]);
    }

    #[test]
    fn test_reorder_later_adopts_lower_initiative() {
        let mut encounter = Encounter::new("enc-1");
        let a = add(&mut encounter, "A", 18, 0);
        add(&mut encounter, "B", 12, 0);
        add(&mut encounter, "C", 7, 0);

        assert_eq!(encounter.reorder(a, 2), Some(7));
        assert_eq!(names(&encounter), vec!["B", "C", "A"]);
        assert_eq!(initiatives(&encounter), vec![12, 7, 7]);
    }

    #[test]
    fn test_reorder_earlier_adopts_higher_initiative() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 18, 0);
        add(&mut encounter, "B", 12, 0);
        let c = add(&mut encounter, "C", 7, 0);

        assert_eq!(encounter.reorder(c, 0), Some(18));
        assert_eq!(names(&encounter), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_reorder_without_violation_keeps_initiative() {
        let mut encounter = Encounter::new("enc-1");
        let a = add(&mut encounter, "A", 5, 0);
        add(&mut encounter, "B", 12, 0);

        // Moving later past a higher initiative is not a violation
        assert_eq!(encounter.reorder(a, 1), Some(5));
        assert_eq!(names(&encounter), vec!["B", "A"]);
    }

    #[test]
    fn test_reorder_past_end_appends() {
        let mut encounter = Encounter::new("enc-1");
        let a = add(&mut encounter, "A", 18, 0);
        add(&mut encounter, "B", 12, 0);

        assert_eq!(encounter.reorder(a, 5), Some(18));
        assert_eq!(names(&encounter), vec!["B", "A"]);
        assert_eq!(encounter.reorder(CombatantId(99), 0), None);
    }

    #[test]
    fn test_start_sorts_and_sets_head() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 3, 0);
        let b = add(&mut encounter, "B", 17, 0);

        encounter.start();
        assert!(encounter.is_active());
        assert_eq!(encounter.round_counter(), 1);
        assert_eq!(encounter.active_combatant_id(), Some(b));
        assert!(encounter.turn_timer.is_running());
    }

    #[test]
    fn test_next_turn_wraps_and_counts_rounds() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        add(&mut encounter, "B", 15, 0);
        add(&mut encounter, "C", 10, 0);
        encounter.start();
        let head = encounter.active_combatant_id();

        for _ in 0..encounter.len() {
            encounter.next_turn();
        }

        assert_eq!(encounter.active_combatant_id(), head);
        assert_eq!(encounter.round_counter(), 2);
    }

    #[test]
    fn test_previous_turn_inverts_next_turn() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        add(&mut encounter, "B", 15, 0);
        encounter.start();

        for _ in 0..5 {
            let before = (encounter.active_combatant_id(), encounter.round_counter());
            encounter.next_turn();
            encounter.previous_turn();
            assert_eq!((encounter.active_combatant_id(), encounter.round_counter()), before);
            encounter.next_turn();
        }

        // And the other way around, across the round boundary
        let mut encounter = Encounter::new("enc-2");
        add(&mut encounter, "A", 20, 0);
        add(&mut encounter, "B", 15, 0);
        encounter.start();
        encounter.next_turn();
        encounter.next_turn();
        let before = (encounter.active_combatant_id(), encounter.round_counter());
        encounter.previous_turn();
        encounter.next_turn();
        assert_eq!((encounter.active_combatant_id(), encounter.round_counter()), before);
    }

    #[test]
    fn test_turns_ignored_when_inactive_or_empty() {
        let mut encounter = Encounter::new("enc-1");
        encounter.next_turn();
        encounter.previous_turn();
        assert!(encounter.active_combatant_id().is_none());

        encounter.start();
        encounter.next_turn();
        encounter.previous_turn();
        assert!(encounter.active_combatant_id().is_none());
        assert_eq!(encounter.round_counter(), 1);
    }

    #[test]
    fn test_next_turn_emits_telemetry() {
        let telemetry = RecordingTelemetry::default();
        let mut encounter = Encounter::new("enc-1").with_telemetry(telemetry.clone());
        add(&mut encounter, "A", 20, 0);
        encounter.start();

        encounter.next_turn();
        encounter.previous_turn();
        assert_eq!(*telemetry.0.borrow(), vec![TURN_COMPLETED_EVENT.to_string()]);
    }

    #[test]
    fn test_grouped_prompt_answer_updates_one_combatant() {
        let settings = Settings {
            group_similar_creatures: true,
            ..Settings::default()
        };
        let mut encounter = Encounter::new("enc-1")
            .with_settings(settings)
            .with_roller(|bonus: i32| 10 + bonus);
        let pc = Arc::new(StatBlock::new("Twin", 20).as_player());
        let first = encounter.add_combatant(Arc::clone(&pc), false);
        let second = encounter.add_combatant(pc, false);

        let mut requests: Vec<RollRequest> = Vec::new();
        encounter.roll_initiative(&mut requests);
        assert_eq!(requests.len(), 1);

        encounter.apply_initiative_roll(first, 18);
        assert_eq!(encounter.get(first).unwrap().initiative, 18);
        assert_eq!(encounter.get(second).unwrap().initiative, 10);
    }

    #[test]
    fn test_turn_timer_resets_on_next_turn_only() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        add(&mut encounter, "B", 10, 0);
        encounter.start();

        let earlier = Utc::now() - Duration::minutes(5);
        encounter.turn_timer.start_at(earlier);
        encounter.next_turn();
        assert!(encounter.turn_timer.elapsed(Utc::now()) < Duration::minutes(1));

        encounter.turn_timer.start_at(earlier);
        encounter.previous_turn();
        assert!(encounter.turn_timer.elapsed(Utc::now()) >= Duration::minutes(5));
    }

    #[test]
    fn test_end_clears_active() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        encounter.start();
        encounter.end();

        assert_eq!(encounter.state(), EncounterState::Inactive);
        assert!(encounter.active_combatant_id().is_none());
        assert!(!encounter.turn_timer.is_running());
    }

    #[test]
    fn test_clear_declined_leaves_roster() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);

        let mut asked = Vec::new();
        let cleared = encounter.clear(&mut |message: &str| {
            asked.push(message.to_string());
            false
        });

        assert!(!cleared);
        assert_eq!(asked, vec![CLEAR_ENCOUNTER_PROMPT.to_string()]);
        assert_eq!(encounter.len(), 1);
        assert_eq!(encounter.state(), EncounterState::Inactive);
    }

    #[test]
    fn test_clear_confirmed_empties_and_ends() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        encounter.start();

        assert!(encounter.clear(&mut true));
        assert!(encounter.is_empty());
        assert!(!encounter.is_active());
    }

    #[test]
    fn test_roll_initiative_independent() {
        let mut encounter = Encounter::new("enc-1").with_roller(sequence_roller(vec![4, 17]));
        add(&mut encounter, "Goblin", 0, 2);
        add(&mut encounter, "Goblin", 0, 2);

        let mut requests: Vec<RollRequest> = Vec::new();
        encounter.roll_initiative(&mut requests);

        assert_eq!(initiatives(&encounter), vec![4, 17]);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_roll_initiative_grouped() {
        let settings = Settings {
            group_similar_creatures: true,
            ..Settings::default()
        };
        let mut encounter = Encounter::new("enc-1")
            .with_settings(settings)
            .with_roller(sequence_roller(vec![4, 17, 9]));
        add(&mut encounter, "Goblin", 0, 2);
        add(&mut encounter, "Orc", 0, 1);
        add(&mut encounter, "Goblin", 0, 2);

        encounter.roll_initiative(&mut Vec::<RollRequest>::new());
        assert_eq!(initiatives(&encounter), vec![4, 17, 4]);
    }

    #[test]
    fn test_roll_prompts_player_characters() {
        let mut encounter = Encounter::new("enc-1").with_roller(|bonus: i32| 10 + bonus);
        let pc = encounter.add_combatant(
            Arc::new(StatBlock::new("Aria", 30).with_dex(16).as_player()),
            false,
        );
        add(&mut encounter, "Goblin", 0, 2);

        let mut requests: Vec<RollRequest> = Vec::new();
        encounter.roll_initiative(&mut requests);

        assert_eq!(
            requests,
            vec![RollRequest {
                combatant_id: pc,
                prompt: "Initiative Roll for Aria (+3)".to_string(),
                suggested: 13,
            }]
        );

        assert!(encounter.apply_initiative_roll(pc, 19));
        assert_eq!(encounter.get(pc).unwrap().initiative, 19);
    }

    #[test]
    fn test_late_roll_for_removed_combatant_is_ignored() {
        let mut encounter = Encounter::new("enc-1").with_roller(|_: i32| 11);
        let pc = encounter.add_combatant(Arc::new(StatBlock::new("Aria", 30).as_player()), false);

        let mut requests: Vec<RollRequest> = Vec::new();
        encounter.roll_initiative(&mut requests);
        encounter.remove_combatant(pc);

        assert!(!encounter.apply_initiative_roll(requests[0].combatant_id, 20));
        assert!(encounter.is_empty());
    }

    #[test]
    fn test_remove_active_passes_turn() {
        let mut encounter = Encounter::new("enc-1");
        add(&mut encounter, "A", 20, 0);
        let b = add(&mut encounter, "B", 15, 0);
        let c = add(&mut encounter, "C", 10, 0);
        encounter.start();
        encounter.next_turn();
        assert_eq!(encounter.active_combatant_id(), Some(b));

        encounter.remove_combatant(b);
        assert_eq!(encounter.active_combatant_id(), Some(c));

        encounter.remove_combatant(c);
        assert_eq!(encounter.active_combatant().map(|c| c.name()), Some("A"));
        assert_eq!(encounter.round_counter(), 1);
    }

    #[test]
    fn test_hp_operations_respect_settings() {
        let mut encounter = Encounter::new("enc-1");
        let a = add(&mut encounter, "A", 0, 0);
        assert_eq!(encounter.apply_damage(a, 25), Some(0));

        encounter.set_settings(Settings {
            allow_negative_hp: true,
            ..Settings::default()
        });
        assert_eq!(encounter.apply_damage(a, 5), Some(-5));
        assert_eq!(encounter.apply_temporary_hp(a, 4), Some(4));
        assert_eq!(encounter.apply_damage(CombatantId(404), 5), None);
    }

    #[test]
    fn test_listeners_see_every_mutation() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut encounter = Encounter::new("enc-1");
        let sink = Rc::clone(&events);
        encounter.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        let a = encounter.add_combatant(statblock("A", 0), false);
        encounter.add_tag(a, "Prone");
        encounter.start();

        assert_eq!(
            *events.borrow(),
            vec![
                EncounterEvent::CombatantAdded(a),
                EncounterEvent::CombatantUpdated(a),
                EncounterEvent::Sorted,
                EncounterEvent::Started,
            ]
        );
    }
}
