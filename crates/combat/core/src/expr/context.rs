//! Versioned evaluation context.
//!
//! Expressions never see live documents. Each evaluation site builds a
//! [`ConditionContext`] from typed snapshots, and the context renders to a
//! fixed JSON shape:
//!
//! ```text
//! {
//!   "version": 1,
//!   "actor":    { uuid, name, hp, ac, incapacitated, flags, ...roll data },
//!   "target":   { same shape as actor },
//!   "item":     { uuid, name, actionType, activation, isMagical, ...roll data },
//!   "workflow": { id, targets, hitTargets, isCritical, isFumble, attackTotal, damageTotal, ... },
//!   "reaction": "isHit",
//!   "roll":     { ...item roll data }
//! }
//! ```

use serde_json::{Map, Value, json};

use crate::dice::RollData;
use crate::document::{ActorSnapshot, ItemSnapshot};

/// Schema version embedded in every rendered context.
pub const CONTEXT_VERSION: u32 = 1;

/// Workflow facts exposed to condition expressions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowView {
    pub id: u64,
    pub targets: usize,
    pub hit_targets: usize,
    pub is_critical: bool,
    pub is_fumble: bool,
    pub attack_total: Option<f64>,
    pub damage_total: Option<f64>,
    pub damage_types: Vec<String>,
    pub action_type: Option<String>,
}

/// Builder for the JSON context condition expressions evaluate against.
#[derive(Clone, Debug, Default)]
pub struct ConditionContext {
    actor: Option<Value>,
    target: Option<Value>,
    item: Option<Value>,
    workflow: Option<Value>,
    reaction: Option<String>,
    roll: RollData,
}

impl ConditionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: &ActorSnapshot) -> Self {
        self.actor = Some(actor_value(actor));
        self
    }

    pub fn target(mut self, target: &ActorSnapshot) -> Self {
        self.target = Some(actor_value(target));
        self
    }

    pub fn item(mut self, item: &ItemSnapshot) -> Self {
        self.roll.merge(&item.roll_data);
        let mut value = json!({
            "uuid": item.uuid.as_str(),
            "name": item.name,
            "actionType": item.action_type.as_ref(),
            "isMagical": item.is_magical(),
            "hasSave": item.save.is_some(),
            "concentration": item.concentration,
        });
        merge_paths(&mut value, &item.roll_data);
        self.item = Some(value);
        self
    }

    pub fn workflow(mut self, view: &WorkflowView) -> Self {
        self.workflow = Some(json!({
            "id": view.id,
            "targets": view.targets,
            "hitTargets": view.hit_targets,
            "isCritical": view.is_critical,
            "isFumble": view.is_fumble,
            "attackTotal": view.attack_total,
            "damageTotal": view.damage_total,
            "damageTypes": view.damage_types,
            "actionType": view.action_type,
        }));
        self
    }

    /// Trigger type the expression is being evaluated for (`isHit`, ...).
    pub fn reaction(mut self, trigger: impl Into<String>) -> Self {
        self.reaction = Some(trigger.into());
        self
    }

    pub fn roll_data(mut self, data: &RollData) -> Self {
        self.roll.merge(data);
        self
    }

    /// Renders the fixed-shape context.
    pub fn to_value(&self) -> Value {
        let mut roll = Value::Object(Map::new());
        merge_paths(&mut roll, &self.roll);
        json!({
            "version": CONTEXT_VERSION,
            "actor": self.actor.clone().unwrap_or(Value::Null),
            "target": self.target.clone().unwrap_or(Value::Null),
            "item": self.item.clone().unwrap_or(Value::Null),
            "workflow": self.workflow.clone().unwrap_or(Value::Null),
            "reaction": self.reaction,
            "roll": roll,
        })
    }
}

fn actor_value(actor: &ActorSnapshot) -> Value {
    let flags: Map<String, Value> = actor
        .flag_changes()
        .map(|(key, value)| {
            let key = key.strip_prefix("flags.combat.").unwrap_or(key);
            (key.to_owned(), Value::String(value.to_owned()))
        })
        .collect();
    let mut value = json!({
        "uuid": actor.uuid.as_str(),
        "name": actor.name,
        "hp": {
            "value": actor.hp.value,
            "max": actor.hp.max,
            "temp": actor.hp.temp,
            "tempmax": actor.hp.tempmax,
        },
        "ac": actor.ac,
        "incapacitated": actor.is_incapacitated(),
        "reactionUsed": actor.round_usage.reaction,
        "traits": {
            "di": actor.traits.di.value,
            "dr": actor.traits.dr.value,
            "dv": actor.traits.dv.value,
        },
        "effects": actor.effects.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(),
        "flags": flags,
    });
    merge_paths(&mut value, &actor.roll_data);
    value
}

/// Expands dotted roll-data keys (`abilities.str.mod`) into nested objects.
fn merge_paths(target: &mut Value, data: &RollData) {
    for (path, number) in data.iter() {
        let mut cursor = &mut *target;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Value::Object(map) = cursor else {
                break;
            };
            if segments.peek().is_none() {
                map.insert(segment.to_owned(), super::parser::number(number));
                break;
            }
            let entry = map
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            cursor = entry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ActionType, HitPoints};

    #[test]
    fn renders_versioned_shape_with_nested_roll_data() {
        let mut actor = ActorSnapshot::new("Actor.a", "Aria", HitPoints::new(7, 12), 15);
        actor.roll_data.insert("abilities.str.mod", 3.0);
        let mut item = ItemSnapshot::new("Item.s", "Shield", ActionType::Other);
        item.roll_data.insert("prof", 2.0);

        let value = ConditionContext::new()
            .actor(&actor)
            .item(&item)
            .reaction("isHit")
            .to_value();

        assert_eq!(value["version"], json!(CONTEXT_VERSION));
        assert_eq!(value["actor"]["abilities"]["str"]["mod"], json!(3.0));
        assert_eq!(value["actor"]["hp"]["value"], json!(7));
        assert_eq!(value["roll"]["prof"], json!(2.0));
        assert_eq!(value["reaction"], json!("isHit"));
        assert_eq!(value["target"], Value::Null);
    }

    #[test]
    fn flags_are_exposed_without_namespace_prefix() {
        let actor = ActorSnapshot::new("Actor.a", "A", HitPoints::new(1, 1), 10)
            .with_flag("flags.combat.sneak", "1");
        let value = ConditionContext::new().actor(&actor).to_value();
        assert_eq!(value["actor"]["flags"]["sneak"], json!("1"));
    }
}
