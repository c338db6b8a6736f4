//! Initiative State Library
//!
//! This crate provides turn order and combat state tracking for a tabletop
//! role-playing encounter.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Encounter State Machine** - An ordered roster of combatants, the active
//!   turn, and the round counter, with sorting, manual reordering and
//!   initiative rolls (optionally shared by creatures of the same kind).
//!
//! - **Combatants** - Hit point bookkeeping, tags, aliases and visibility on
//!   top of an immutable statblock template.
//!
//! - **Snapshots** - A versioned persisted form, including migration of older
//!   records that stored the active turn by position.
//!
//! - **Player View** - A reduced projection for the players' display that
//!   never leaks hidden combatants.
//!
//! - **Sync** - Debounced persistence and broadcast of every change.
//!
//! # Design Principles
//!
//! 1. **The roster order is the turn order** - It is not re-derived from
//!    initiative values except when explicitly sorted.
//!
//! 2. **In-memory state is the source of truth** - Persistence and broadcast
//!    are best-effort and never fail a mutation.
//!
//! 3. **No transport** - Storage, broadcast, prompts and telemetry are traits
//!    implemented by the host application.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use initiative_state::state::{Encounter, RollRequest, StatBlock};
//!
//! let mut encounter = Encounter::new("session-abc").with_roller(|bonus: i32| 10 + bonus);
//!
//! let goblin = Arc::new(StatBlock::new("Goblin", 7).with_dex(14));
//! let a = encounter.add_combatant(Arc::clone(&goblin), false);
//! let b = encounter.add_combatant(goblin, false);
//! let aria = encounter.add_combatant(Arc::new(StatBlock::new("Aria", 24).as_player()), false);
//!
//! // Player characters get a prompt; the answer overrides the suggested roll
//! let mut requests: Vec<RollRequest> = Vec::new();
//! encounter.roll_initiative(&mut requests);
//! encounter.apply_initiative_roll(aria, 18);
//!
//! encounter.start();
//! assert_eq!(encounter.active_combatant_id(), Some(aria));
//!
//! encounter.next_turn();
//! assert_eq!(encounter.active_combatant_id(), Some(a));
//! encounter.next_turn();
//! assert_eq!(encounter.active_combatant_id(), Some(b));
//! encounter.next_turn();
//! assert_eq!(encounter.round_counter(), 2);
//! ```

pub mod logging;
pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
