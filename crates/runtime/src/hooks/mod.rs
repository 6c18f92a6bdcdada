//! Workflow extension points.
//!
//! Every workflow state has a paired `pre<State>` / `post<State>` point, and
//! a fixed set of named points fire inside the phases (`preAttackRoll`,
//! `isHit`, `isDamaged`, ...). Two kinds of listeners attach to them:
//!
//! - [`WorkflowHook`]s registered on the [`HookRegistry`] when the runtime is
//!   built. They are synchronous, sorted by priority and may veto.
//! - Item macros, named on the item and run through a [`MacroRunner`]. They
//!   fire after the hooks for the same point, in declaration order.
//!
//! The first veto short-circuits the remaining listeners and aborts the
//! workflow at that point.

mod macros;
mod registry;

pub use macros::{MacroRunner, MacroSpec, NoMacros};
pub use registry::{HookRegistry, HookVeto};

use std::str::FromStr;

use combat_core::{DamageLedgerEntry, SaveOutcome, TokenUuid};

use crate::workflow::{WorkflowState, WorkflowSummary};

/// Defines the criticality level of a hook for error handling.
///
/// - Critical hooks must succeed; an error vetoes the workflow
/// - Important hooks log errors but allow continuation
/// - Optional hooks can fail silently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookCriticality {
    Critical,
    Important,
    Optional,
}

/// A named interception point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    Pre(WorkflowState),
    Post(WorkflowState),
    PreTargeting,
    PreItemRoll,
    PreAttackRoll,
    PreDamageRoll,
    PreDamageApplication,
    PreTargetDamageApplication,
    IsAttacked,
    IsHit,
    IsDamaged,
    IsHealed,
    PreTargetSave,
    IsSaveSuccess,
    IsSaveFailure,
}

impl ExtensionPoint {
    const FIXED: [(&'static str, ExtensionPoint); 13] = [
        ("preTargeting", Self::PreTargeting),
        ("preItemRoll", Self::PreItemRoll),
        ("preAttackRoll", Self::PreAttackRoll),
        ("preDamageRoll", Self::PreDamageRoll),
        ("preDamageApplication", Self::PreDamageApplication),
        ("preTargetDamageApplication", Self::PreTargetDamageApplication),
        ("isAttacked", Self::IsAttacked),
        ("isHit", Self::IsHit),
        ("isDamaged", Self::IsDamaged),
        ("isHealed", Self::IsHealed),
        ("preTargetSave", Self::PreTargetSave),
        ("isSaveSuccess", Self::IsSaveSuccess),
        ("isSaveFailure", Self::IsSaveFailure),
    ];

    /// Channel name as item macros spell it (`preCheckHits`, `isHit`).
    pub fn name(&self) -> String {
        match self {
            Self::Pre(state) => format!("pre{state}"),
            Self::Post(state) => format!("post{state}"),
            fixed => Self::FIXED
                .iter()
                .find(|(_, point)| point == fixed)
                .map_or_else(String::new, |(name, _)| (*name).to_owned()),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some((_, point)) = Self::FIXED
            .iter()
            .find(|(fixed, _)| fixed.eq_ignore_ascii_case(name))
        {
            return Some(*point);
        }
        if let Some(state) = name.strip_prefix("pre") {
            return WorkflowState::from_str(state).ok().map(Self::Pre);
        }
        if let Some(state) = name.strip_prefix("post") {
            return WorkflowState::from_str(state).ok().map(Self::Post);
        }
        None
    }
}

impl std::fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Tri-state answer of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Veto(String),
    Error(String),
}

/// What a listener gets to look at.
#[derive(Debug, Clone, Copy)]
pub enum HookPayload<'a> {
    Workflow(&'a WorkflowSummary),
    Target {
        workflow: &'a WorkflowSummary,
        target: &'a TokenUuid,
    },
    Damage {
        workflow: &'a WorkflowSummary,
        entry: &'a DamageLedgerEntry,
    },
    Save {
        workflow: &'a WorkflowSummary,
        outcome: &'a SaveOutcome,
    },
}

impl<'a> HookPayload<'a> {
    pub fn workflow(&self) -> &'a WorkflowSummary {
        match *self {
            Self::Workflow(workflow)
            | Self::Target { workflow, .. }
            | Self::Damage { workflow, .. }
            | Self::Save { workflow, .. } => workflow,
        }
    }
}

/// Listener registered on the [`HookRegistry`].
///
/// # Execution Order
///
/// Hooks are sorted by priority (lower values execute first).
pub trait WorkflowHook: Send + Sync {
    /// Returns a human-readable name for this hook (used in logging and debugging).
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        0
    }

    fn criticality(&self) -> HookCriticality {
        HookCriticality::Important
    }

    /// Whether the hook listens on `point`.
    fn handles(&self, point: ExtensionPoint) -> bool;

    fn call(&self, point: ExtensionPoint, payload: &HookPayload<'_>) -> HookOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for point in [
            ExtensionPoint::Pre(WorkflowState::CheckHits),
            ExtensionPoint::Post(WorkflowState::ApplyDamage),
            ExtensionPoint::IsSaveFailure,
            ExtensionPoint::PreTargetDamageApplication,
        ] {
            assert_eq!(ExtensionPoint::parse(&point.name()), Some(point));
        }
        assert_eq!(
            ExtensionPoint::Pre(WorkflowState::WaitForAttackRoll).name(),
            "preWaitForAttackRoll"
        );
    }

    #[test]
    fn fixed_names_win_over_state_prefixes() {
        assert_eq!(
            ExtensionPoint::parse("preTargeting"),
            Some(ExtensionPoint::PreTargeting)
        );
        assert_eq!(ExtensionPoint::parse("preNowhere"), None);
    }
}
