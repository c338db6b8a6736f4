//! Player view projection.
//!
//! The reduced, display-safe encounter sent to the players' screen. Hidden
//! combatants never appear; monsters can also be held back until the
//! encounter starts.

use serde::{Deserialize, Serialize};

use super::combatant::Combatant;
use super::encounter::Encounter;
use super::settings::{HpVerbosity, Settings};
use super::snapshot::{active_id_or_sentinel, SavedEncounter};

/// Display-safe view of one combatant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerViewCombatant {
    pub id: u64,
    pub name: String,
    #[serde(rename = "HPDisplay")]
    pub hp_display: String,
    #[serde(rename = "HPColor", default, skip_serializing_if = "Option::is_none")]
    pub hp_color: Option<String>,
    pub initiative: i32,
    pub tags: Vec<String>,
    pub is_player_character: bool,
}

/// The broadcast payload.
pub type PlayerViewEncounter = SavedEncounter<PlayerViewCombatant>;

fn actual_hp(c: &Combatant) -> String {
    if c.temporary_hp > 0 {
        format!("{}+{}/{}", c.current_hp, c.temporary_hp, c.max_hp)
    } else {
        format!("{}/{}", c.current_hp, c.max_hp)
    }
}

fn hp_display(c: &Combatant, verbosity: HpVerbosity) -> (String, Option<String>) {
    if c.is_player_character {
        return (actual_hp(c), None);
    }
    let label = c.health_label();
    match verbosity {
        HpVerbosity::ActualHp => (actual_hp(c), None),
        HpVerbosity::ColoredLabel => (label.as_str().to_string(), Some(label.color().to_string())),
        HpVerbosity::MonochromeLabel => (label.as_str().to_string(), None),
        HpVerbosity::HideAll => (String::new(), None),
    }
}

impl Encounter {
    /// Whether `c` may appear on the player view under `settings`.
    pub fn is_visible_to_players(&self, c: &Combatant, settings: &Settings) -> bool {
        if c.hidden {
            return false;
        }
        !(settings.hide_monsters_outside_encounter && !self.is_active() && !c.is_player_character)
    }

    /// Project using the encounter's own settings.
    pub fn player_view(&self, name: Option<&str>) -> PlayerViewEncounter {
        self.project(&self.settings, name)
    }

    pub fn project(&self, settings: &Settings, name: Option<&str>) -> PlayerViewEncounter {
        let creatures = self
            .roster
            .iter()
            .filter(|c| self.is_visible_to_players(c, settings))
            .map(|c| {
                let (hp_display, hp_color) = hp_display(c, settings.monster_hp_verbosity);
                PlayerViewCombatant {
                    id: c.id.0,
                    name: self.display_name(c),
                    hp_display,
                    hp_color,
                    initiative: c.initiative,
                    tags: c.tags.clone(),
                    is_player_character: c.is_player_character,
                }
            })
            .collect();

        SavedEncounter {
            name: name.unwrap_or(&self.id).to_string(),
            active_creature_id: active_id_or_sentinel(self.active_combatant),
            active_creature_index: None,
            round_counter: settings
                .player_view_display_round_counter
                .then_some(self.round_counter),
            display_turn_timer: Some(settings.player_view_display_turn_timer),
            creatures,
        }
    }
}
