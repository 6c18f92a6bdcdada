//! Typed snapshots of the host documents the engine reads.
//!
//! The host platform owns actors, items and effects. A workflow captures
//! these snapshots once per invocation and never reaches back into live
//! documents; mutations go through the coordinator.

mod actor;
mod effect;
mod item;

pub use actor::{
    ActorSnapshot, Bypass, DamageTraits, HitPoints, RoundUsage, TokenSnapshot, TraitSet,
};
pub use effect::{ActiveEffect, ChangeMode, EffectChange, OVERTIME_KEY, SpecialDuration};
pub use item::{
    Ability, ActionType, ActivationType, DamagePart, ItemProperties, ItemSnapshot, OnSave,
    OtherFormula, OtherSave, SaveSpec,
};
