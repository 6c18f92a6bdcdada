//! Deterministic combat rules shared by every client.
//!
//! `combat-core` holds the pure half of action resolution: the dice model,
//! damage classification and per-target damage math, advantage, hit and save
//! resolution, overtime effect parsing and the sandboxed condition language.
//! Nothing here performs I/O; the runtime crate gathers snapshots, calls into
//! these functions and owns every side effect.
pub mod advantage;
pub mod attack;
pub mod concentration;
pub mod config;
pub mod damage;
pub mod dice;
pub mod document;
pub mod error;
pub mod expr;
pub mod flags;
pub mod ids;
pub mod overtime;
pub mod save;

pub use advantage::{
    KeyModifiers, ModeSource, RollMode, RollModeResolution, resolve_attack_mode,
    resolve_save_mode,
};
pub use attack::{HitCheck, attack_auto_fails, check_hit, offerable_attack_bonuses, roll_attack};
pub use concentration::{ConcentrationData, ConcentrationTarget, DocumentRef, concentration_dc};
pub use config::{CriticalDamage, DrStacking, ReductionOrder, RulesConfig, ThresholdOrder};
pub use damage::{
    ApplyDamageDetail, DamageDetail, DamageLedgerEntry, DamageRollOptions, DamageTarget,
    DamageType, ReductionTable, build_damage_terms, compute_damage_many, create_damage_detail,
    get_trait_mult,
};
pub use dice::{DieRoller, RandomRoller, Roll, RollData, RollTerm, ScriptedRoller};
pub use document::{
    Ability, ActionType, ActivationType, ActiveEffect, ActorSnapshot, DamagePart, HitPoints,
    ItemSnapshot, OnSave, SaveSpec, SpecialDuration, TokenSnapshot, TraitSet,
};
pub use error::{ErrorContext, ErrorSeverity, GameError};
pub use expr::{ConditionContext, Expression, ExprError, WorkflowView, eval_condition, eval_number};
pub use flags::{ActorFlags, BonusValue, FlagCondition, OptionalBonus, OptionalKind};
pub use ids::{ActorUuid, ChatCardId, EffectId, ItemUuid, TemplateUuid, TokenUuid, UserId, WorkflowId};
pub use overtime::{OvertimeError, OvertimeSpec, SaveDamage, TurnPhase};
pub use save::{SaveOutcome, SaveResults, SaverTraits, check_save, roll_save, save_multiplier};
