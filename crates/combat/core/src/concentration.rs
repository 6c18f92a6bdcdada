//! Concentration bookkeeping and the damage-triggered check DC.

use serde::{Deserialize, Serialize};

use crate::config::RulesConfig;
use crate::ids::{ActorUuid, EffectId, ItemUuid, TemplateUuid, TokenUuid};

/// A token/actor pair the concentrating actor maintains an effect on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcentrationTarget {
    pub token: TokenUuid,
    pub actor: ActorUuid,
}

/// A document removed when concentration breaks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DocumentRef {
    Effect { actor: ActorUuid, effect: EffectId },
    Template { template: TemplateUuid },
}

/// Per-actor concentration record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationData {
    /// Item whose effect is being concentrated on.
    pub item: ItemUuid,
    /// Always contains the concentrating actor's own token.
    pub targets: Vec<ConcentrationTarget>,
    pub templates: Vec<TemplateUuid>,
    pub remove_on_break: Vec<DocumentRef>,
}

impl ConcentrationData {
    /// Starts a record with the caster as its only target.
    pub fn new(item: ItemUuid, caster: ConcentrationTarget) -> Self {
        Self {
            item,
            targets: vec![caster],
            templates: Vec::new(),
            remove_on_break: Vec::new(),
        }
    }

    /// Adds a target once; duplicates are ignored.
    pub fn add_target(&mut self, target: ConcentrationTarget) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    pub fn add_template(&mut self, template: TemplateUuid) {
        if !self.templates.contains(&template) {
            self.templates.push(template);
        }
    }
}

/// DC of the concentration check after taking `damage`.
pub fn concentration_dc(damage: i32) -> i32 {
    RulesConfig::MIN_CONCENTRATION_DC.max(damage.max(0) / 2)
}
