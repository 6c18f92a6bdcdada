//! Damage type vocabulary.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// A damage type as declared on an item damage line or a flavor tag.
///
/// Unknown names are kept verbatim in [`DamageType::Other`] so homebrew
/// types still flow through resistance checks by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(into = "String", from = "String")]
pub enum DamageType {
    Acid,
    Bludgeoning,
    Cold,
    Fire,
    Force,
    Lightning,
    Necrotic,
    Piercing,
    Poison,
    Psychic,
    Radiant,
    Slashing,
    Thunder,
    Healing,
    #[strum(serialize = "temphp")]
    TempHp,
    /// Untyped damage; never resisted.
    None,
    #[strum(default)]
    Other(String),
}

impl DamageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Acid => "acid",
            Self::Bludgeoning => "bludgeoning",
            Self::Cold => "cold",
            Self::Fire => "fire",
            Self::Force => "force",
            Self::Lightning => "lightning",
            Self::Necrotic => "necrotic",
            Self::Piercing => "piercing",
            Self::Poison => "poison",
            Self::Psychic => "psychic",
            Self::Radiant => "radiant",
            Self::Slashing => "slashing",
            Self::Thunder => "thunder",
            Self::Healing => "healing",
            Self::TempHp => "temphp",
            Self::None => "none",
            Self::Other(name) => name,
        }
    }

    /// Bludgeoning, piercing and slashing.
    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Bludgeoning | Self::Piercing | Self::Slashing)
    }

    /// Healing and temp-HP lines restore rather than remove hit points.
    pub fn is_restorative(&self) -> bool {
        matches!(self, Self::Healing | Self::TempHp)
    }

    /// Parses a flavor tag, returning `None` when it names no damage type.
    ///
    /// Flavor text is free-form ("fire", "Fire Damage", "sneak attack");
    /// only exact known names count, so `Other` is never produced here.
    pub fn from_flavor(flavor: &str) -> Option<Self> {
        match Self::from_str(flavor.trim()) {
            Ok(Self::Other(_)) | Err(_) => None,
            Ok(known) => Some(known),
        }
    }
}

impl Default for DamageType {
    fn default() -> Self {
        Self::None
    }
}

impl core::fmt::Display for DamageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DamageType {
    fn from(value: String) -> Self {
        match Self::from_str(&value) {
            Ok(parsed) => parsed,
            Err(_) => Self::Other(value),
        }
    }
}

impl From<&str> for DamageType {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<DamageType> for String {
    fn from(value: DamageType) -> Self {
        value.as_str().to_owned()
    }
}
