//! Active effects and their changes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::ids::{EffectId, ItemUuid};

/// Change key carrying an overtime entry.
pub const OVERTIME_KEY: &str = "flags.combat.OverTime";

/// How a change value combines with the underlying document value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    Custom,
    Multiply,
    Add,
    Downgrade,
    Upgrade,
    #[default]
    Override,
}

/// One `key = value` change contributed by an effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectChange {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub mode: ChangeMode,
}

impl EffectChange {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: ChangeMode::Override,
        }
    }
}

bitflags! {
    /// Events that end an effect early.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SpecialDuration: u8 {
        const IS_DAMAGED  = 1 << 0;
        const IS_HEALED   = 1 << 1;
        const IS_ATTACKED = 1 << 2;
        const IS_HIT      = 1 << 3;
        const IS_SAVE     = 1 << 4;
    }
}

impl SpecialDuration {
    /// Maps a marker name (`isDamaged`, `isHit`, ...) to its flag.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "isDamaged" => Some(Self::IS_DAMAGED),
            "isHealed" => Some(Self::IS_HEALED),
            "isAttacked" => Some(Self::IS_ATTACKED),
            "isHit" => Some(Self::IS_HIT),
            "isSave" => Some(Self::IS_SAVE),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveEffect {
    pub id: EffectId,
    pub label: String,
    /// Item that created the effect.
    pub origin: Option<ItemUuid>,
    pub changes: Vec<EffectChange>,
    pub special_duration: SpecialDuration,
    pub disabled: bool,
}

impl ActiveEffect {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: EffectId::new(id),
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_change(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.push(EffectChange::new(key, value));
        self
    }

    pub fn with_origin(mut self, origin: ItemUuid) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn expires_on(&self, event: SpecialDuration) -> bool {
        self.special_duration.intersects(event)
    }

    /// Raw overtime entries carried by this effect.
    pub fn overtime_specs(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|change| change.key == OVERTIME_KEY)
            .map(|change| change.value.as_str())
    }
}
