//! User settings that shape encounter behavior and the player view.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default sync debounce window (10 milliseconds).
pub const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 10;

/// How monster hit points are shown on the player view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HpVerbosity {
    #[serde(rename = "Actual HP")]
    ActualHp,
    #[default]
    #[serde(rename = "Colored Label")]
    ColoredLabel,
    #[serde(rename = "Monochrome Label")]
    MonochromeLabel,
    #[serde(rename = "Hide All")]
    HideAll,
}

/// Errors loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tracker configuration. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// Creatures sharing a template name share one initiative roll
    pub group_similar_creatures: bool,

    #[serde(rename = "AllowNegativeHP")]
    pub allow_negative_hp: bool,

    pub hide_monsters_outside_encounter: bool,

    pub player_view_display_round_counter: bool,

    pub player_view_display_turn_timer: bool,

    #[serde(rename = "MonsterHPVerbosity")]
    pub monster_hp_verbosity: HpVerbosity,

    pub sync_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            group_similar_creatures: false,
            allow_negative_hp: false,
            hide_monsters_outside_encounter: false,
            player_view_display_round_counter: false,
            player_view_display_turn_timer: false,
            monster_hp_verbosity: HpVerbosity::default(),
            sync_debounce_ms: DEFAULT_SYNC_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }
}
