//! Damage Resolution Engine.
//!
//! Classification of rolled damage into typed lines, per-target trait and
//! reduction math, and the ledger produced by an application call.

mod apply;
mod detail;
mod reduction;
mod traits;
mod types;

pub use apply::{
    ApplyDamageDetail, DamageLedgerEntry, DamageTarget, compute_damage_many,
    compute_target_damage,
};
pub use detail::{
    DamageDetail, DamageRollOptions, build_damage_terms, classify_damage, create_damage_detail,
    detail_total,
};
pub use reduction::{DrSource, ReductionTable, evaluate_dr_formula};
pub use traits::get_trait_mult;
pub use types::DamageType;
