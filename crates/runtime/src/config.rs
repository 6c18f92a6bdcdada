//! Runtime configuration.
//!
//! [`RuntimeConfig`] embeds the rules table from `combat-core` and adds the
//! orchestration knobs: per-role automation, dialog timeouts, delegation
//! timeouts and buffer sizes. Every field has a default, so a RON file only
//! needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use combat_core::RulesConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] ron::error::SpannedError),
}

/// Which side of the table a user sits on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gm,
    Player,
}

/// Automation applied to workflows started by one role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRoll {
    pub attack: bool,
    pub damage: bool,
    /// Skip the target confirmation step.
    pub confirm_targets: bool,
    /// Whether actors of this role are offered reactions.
    pub reactions: bool,
}

impl Default for AutoRoll {
    fn default() -> Self {
        Self {
            attack: false,
            damage: false,
            confirm_targets: true,
            reactions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub rules: RulesConfig,
    pub gm: AutoRoll,
    pub player: AutoRoll,
    /// Wait for the item card to be confirmed before rolling.
    pub confirm_item_card: bool,
    pub reaction_timeout_secs: u64,
    pub bonus_dialog_timeout_secs: u64,
    pub delegation_timeout_ms: u64,
    /// Added to a dialog timeout to get the caller's hard deadline.
    pub hard_timeout_grace_ms: u64,
    pub undo_capacity: usize,
    /// Replies the coordinator keeps for redelivered requests.
    pub reply_cache_size: usize,
    pub event_buffer_size: usize,
    pub command_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            gm: AutoRoll {
                attack: true,
                damage: true,
                ..AutoRoll::default()
            },
            player: AutoRoll::default(),
            confirm_item_card: false,
            reaction_timeout_secs: 30,
            bonus_dialog_timeout_secs: 20,
            delegation_timeout_ms: 10_000,
            hard_timeout_grace_ms: 2_000,
            undo_capacity: 20,
            reply_cache_size: 256,
            event_buffer_size: 100,
            command_buffer_size: 32,
        }
    }
}

impl RuntimeConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&source)
    }

    pub fn auto_roll(&self, role: Role) -> AutoRoll {
        match role {
            Role::Gm => self.gm,
            Role::Player => self.player,
        }
    }

    pub fn reaction_timeout(&self) -> Duration {
        Duration::from_secs(self.reaction_timeout_secs)
    }

    pub fn bonus_dialog_timeout(&self) -> Duration {
        Duration::from_secs(self.bonus_dialog_timeout_secs)
    }

    pub fn delegation_timeout(&self) -> Duration {
        Duration::from_millis(self.delegation_timeout_ms)
    }

    /// Deadline the reaction broker enforces regardless of the dialog.
    pub fn reaction_hard_timeout(&self) -> Duration {
        self.reaction_timeout() + Duration::from_millis(self.hard_timeout_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use combat_core::{CriticalDamage, DrStacking};

    use super::*;

    #[test]
    fn partial_ron_falls_back_to_defaults() {
        let config = RuntimeConfig::from_ron_str(
            r#"(
                reaction_timeout_secs: 5,
                rules: (critical_damage: max_critical_dice, dr_stacking: apportion_all),
                player: (attack: true),
            )"#,
        )
        .unwrap();

        assert_eq!(config.reaction_timeout(), Duration::from_secs(5));
        assert_eq!(config.rules.critical_damage, CriticalDamage::MaxCriticalDice);
        assert_eq!(config.rules.dr_stacking, DrStacking::ApportionAll);
        assert_eq!(config.rules.resistance_multiplier, 0.5);
        assert!(config.player.attack && !config.player.damage);
        assert!(config.player.reactions);
        assert_eq!(config.undo_capacity, 20);
    }

    #[test]
    fn malformed_ron_is_a_parse_error() {
        assert!(matches!(
            RuntimeConfig::from_ron_str("(undo_capacity: \"many\")"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn hard_timeout_adds_grace() {
        let config = RuntimeConfig {
            reaction_timeout_secs: 3,
            hard_timeout_grace_ms: 500,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.reaction_hard_timeout(), Duration::from_millis(3_500));
    }
}
