//! Resistance, immunity and vulnerability multipliers.

use super::DamageType;
use crate::config::RulesConfig;
use crate::document::{ActorSnapshot, Bypass, ItemProperties, ItemSnapshot, TraitSet};
use crate::flags::ActorFlags;

/// Multiplier the target's traits apply to one damage type.
///
/// Checked in order: an explicit `damageMultiplier.<type>` (or `.all`)
/// override, restorative types (always −1), then immunity, resistance and
/// vulnerability lists. Every matching list contributes its multiplier, so
/// resistance plus vulnerability nets out to 1 with the default table.
pub fn get_trait_mult(
    actor: &ActorSnapshot,
    flags: &ActorFlags,
    damage_type: &DamageType,
    item: Option<&ItemSnapshot>,
    config: &RulesConfig,
) -> f64 {
    if let Some(multiplier) = flags
        .damage_multiplier
        .get(damage_type.as_str())
        .or_else(|| flags.damage_multiplier.get("all"))
    {
        return *multiplier;
    }
    if damage_type.is_restorative() {
        return -1.0;
    }
    if *damage_type == DamageType::None {
        return 1.0;
    }

    let properties = item.map_or(ItemProperties::empty(), |item| item.properties);
    let traits = &actor.traits;
    let mut multiplier = 1.0;
    for (set, factor) in [
        (&traits.di, config.immunity_multiplier),
        (&traits.dr, config.resistance_multiplier),
        (&traits.dv, config.vulnerability_multiplier),
    ] {
        if set_matches(set, damage_type, properties) {
            multiplier *= factor;
        }
    }
    multiplier
}

fn set_matches(set: &TraitSet, damage_type: &DamageType, properties: ItemProperties) -> bool {
    if set.is_empty() {
        return false;
    }
    let physical = damage_type.is_physical();
    let bypassed = physical && is_bypassed(set.bypasses, properties);

    if set.contains(damage_type.as_str()) && !bypassed {
        return true;
    }
    if physical && set.contains("physical") && !bypassed {
        return true;
    }
    if physical && set.contains("nonmagic") && !properties.contains(ItemProperties::MAGICAL) {
        return true;
    }
    set.custom_entries()
        .any(|entry| entry.eq_ignore_ascii_case(damage_type.as_str()))
}

fn is_bypassed(bypasses: Bypass, properties: ItemProperties) -> bool {
    (bypasses.contains(Bypass::MAGICAL) && properties.contains(ItemProperties::MAGICAL))
        || (bypasses.contains(Bypass::SILVERED) && properties.contains(ItemProperties::SILVERED))
        || (bypasses.contains(Bypass::ADAMANTINE)
            && properties.contains(ItemProperties::ADAMANTINE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ActionType, HitPoints};

    fn actor(f: impl FnOnce(&mut ActorSnapshot)) -> ActorSnapshot {
        let mut actor = ActorSnapshot::new("Actor.t", "Target", HitPoints::new(20, 20), 12);
        f(&mut actor);
        actor
    }

    fn mult(actor: &ActorSnapshot, damage_type: DamageType, item: Option<&ItemSnapshot>) -> f64 {
        let flags = ActorFlags::from_actor(actor);
        get_trait_mult(actor, &flags, &damage_type, item, &RulesConfig::default())
    }

    #[test]
    fn resist_immune_and_vulnerable() {
        let target = actor(|a| {
            a.traits.dr = TraitSet::of(&["fire"]);
            a.traits.di = TraitSet::of(&["poison"]);
            a.traits.dv = TraitSet::of(&["radiant"]);
        });
        assert_eq!(mult(&target, DamageType::Fire, None), 0.5);
        assert_eq!(mult(&target, DamageType::Poison, None), 0.0);
        assert_eq!(mult(&target, DamageType::Radiant, None), 2.0);
        assert_eq!(mult(&target, DamageType::Cold, None), 1.0);
    }

    #[test]
    fn multiple_matches_multiply() {
        let target = actor(|a| {
            a.traits.dr = TraitSet::of(&["fire"]);
            a.traits.dv = TraitSet::of(&["fire"]);
        });
        assert_eq!(mult(&target, DamageType::Fire, None), 1.0);
    }

    #[test]
    fn restorative_types_are_negative_regardless_of_traits() {
        let target = actor(|a| a.traits.di = TraitSet::of(&["healing"]));
        assert_eq!(mult(&target, DamageType::Healing, None), -1.0);
        assert_eq!(mult(&target, DamageType::TempHp, None), -1.0);
    }

    #[test]
    fn material_bypass_defeats_physical_resistance() {
        let target = actor(|a| {
            a.traits.dr = TraitSet::of(&["physical"]);
            a.traits.dr.bypasses = Bypass::SILVERED;
        });
        let silver = ItemSnapshot::new("Item.s", "Silver Sword", ActionType::Mwak)
            .with_properties(ItemProperties::SILVERED);
        let plain = ItemSnapshot::new("Item.p", "Sword", ActionType::Mwak);

        assert_eq!(mult(&target, DamageType::Slashing, Some(&silver)), 1.0);
        assert_eq!(mult(&target, DamageType::Slashing, Some(&plain)), 0.5);
        assert_eq!(mult(&target, DamageType::Fire, Some(&plain)), 1.0);
    }

    #[test]
    fn nonmagic_bucket_ignores_magical_items() {
        let target = actor(|a| a.traits.di = TraitSet::of(&["nonmagic"]));
        let magic = ItemSnapshot::new("Item.m", "Mace +1", ActionType::Mwak)
            .with_properties(ItemProperties::MAGICAL);
        assert_eq!(mult(&target, DamageType::Bludgeoning, None), 0.0);
        assert_eq!(mult(&target, DamageType::Bludgeoning, Some(&magic)), 1.0);
    }

    #[test]
    fn custom_text_and_overrides() {
        let target = actor(|a| {
            a.traits.dr.custom = "Ectoplasm; Spirit".into();
            a.flags.insert("flags.combat.damageMultiplier.cold".into(), "0.25".into());
        });
        assert_eq!(mult(&target, DamageType::from("ectoplasm"), None), 0.5);
        assert_eq!(mult(&target, DamageType::Cold, None), 0.25);
    }
}
