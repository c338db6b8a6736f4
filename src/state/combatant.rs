//! Combatant records.
//!
//! A combatant is one entry in an encounter's roster: a shared, immutable
//! statblock template plus the per-combatant state the tracker mutates
//! (hit points, initiative, tags, visibility).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::snapshot::null_as_default;

/// Hit point block of a statblock template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct HitPoints {
    #[serde(deserialize_with = "null_as_default")]
    pub value: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub notes: String,
}

/// Ability scores the tracker reads from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Abilities {
    pub dex: i32,
}

impl Default for Abilities {
    fn default() -> Self {
        Self { dex: 10 }
    }
}

/// Immutable creature template.
///
/// Only the fields the tracker needs are typed; everything else is kept in
/// `extra` so a template survives a save/load cycle untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct StatBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(rename = "HP", default, deserialize_with = "null_as_default")]
    pub hp: HitPoints,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative_modifier: Option<i32>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub abilities: Abilities,

    /// "player" marks a player character
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub player: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StatBlock {
    pub fn new(name: impl Into<String>, max_hp: i32) -> Self {
        Self {
            name: name.into(),
            hp: HitPoints {
                value: max_hp,
                notes: String::new(),
            },
            ..Self::default()
        }
    }

    pub fn with_initiative_modifier(mut self, modifier: i32) -> Self {
        self.initiative_modifier = Some(modifier);
        self
    }

    pub fn with_dex(mut self, dex: i32) -> Self {
        self.abilities.dex = dex;
        self
    }

    pub fn as_player(mut self) -> Self {
        self.player = "player".to_string();
        self
    }

    pub fn is_player(&self) -> bool {
        self.player.eq_ignore_ascii_case("player")
    }

    /// Initiative bonus: explicit modifier, else the Dex modifier.
    pub fn initiative_bonus(&self) -> i32 {
        self.initiative_modifier
            .unwrap_or_else(|| self.abilities.dex.saturating_sub(10).div_euclid(2))
    }
}

/// Stable combatant identifier, unique within an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(pub u64);

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Qualitative health bucket shown to the player view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLabel {
    Healthy,
    Hurt,
    Bloodied,
    Defeated,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Hurt => "Hurt",
            Self::Bloodied => "Bloodied",
            Self::Defeated => "Defeated",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Healthy => "green",
            Self::Hurt => "yellow",
            Self::Bloodied => "red",
            Self::Defeated => "gray",
        }
    }
}

/// A single roster entry.
#[derive(Debug, Clone)]
pub struct Combatant {
    pub id: CombatantId,

    /// Shared template, never mutated by the tracker
    pub statblock: Arc<StatBlock>,

    pub max_hp: i32,
    pub current_hp: i32,
    pub temporary_hp: i32,

    pub initiative: i32,

    /// Tie-breaker for equal initiative (higher wins)
    pub initiative_bonus: i32,

    pub alias: String,

    /// 1-based position among combatants sharing the template name
    pub index_label: u32,

    pub tags: Vec<String>,

    /// Excluded from the player view
    pub hidden: bool,

    pub is_player_character: bool,
}

impl Combatant {
    /// Create a fresh combatant from a template.
    pub fn new(id: CombatantId, statblock: Arc<StatBlock>, index_label: u32, hidden: bool) -> Self {
        let max_hp = statblock.hp.value;
        Self {
            id,
            max_hp,
            current_hp: max_hp,
            temporary_hp: 0,
            initiative: 0,
            initiative_bonus: statblock.initiative_bonus(),
            alias: String::new(),
            index_label,
            tags: Vec::new(),
            hidden,
            is_player_character: statblock.is_player(),
            statblock,
        }
    }

    pub fn name(&self) -> &str {
        &self.statblock.name
    }

    /// Apply damage; negative amounts heal up to max HP.
    ///
    /// Temporary HP absorbs damage first. Current HP stops at 0 unless
    /// `allow_negative` is set.
    pub fn apply_damage(&mut self, amount: i32, allow_negative: bool) {
        if amount < 0 {
            self.current_hp = self.current_hp.saturating_sub(amount).min(self.max_hp);
            return;
        }

        let absorbed = amount.min(self.temporary_hp.max(0));
        self.temporary_hp -= absorbed;
        self.current_hp = self.current_hp.saturating_sub(amount - absorbed);

        if !allow_negative && self.current_hp < 0 {
            self.current_hp = 0;
        }
    }

    /// Temporary HP replaces whatever the combatant already had.
    pub fn apply_temporary_hp(&mut self, amount: i32) {
        self.temporary_hp = amount.max(0);
    }

    /// Add a tag, ignoring duplicates. Returns true if added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if tag.is_empty() || self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    pub fn health_label(&self) -> HealthLabel {
        if self.current_hp <= 0 {
            HealthLabel::Defeated
        } else if i64::from(self.current_hp) * 2 < i64::from(self.max_hp) {
            HealthLabel::Bloodied
        } else if self.current_hp < self.max_hp {
            HealthLabel::Hurt
        } else {
            HealthLabel::Healthy
        }
    }
}
