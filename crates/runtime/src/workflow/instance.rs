//! Mutable state of one workflow.

use std::collections::BTreeMap;

use combat_core::{
    ActorSnapshot, DamageDetail, DamageLedgerEntry, HitCheck, ItemSnapshot, Roll,
    RollModeResolution, SaveOutcome, SaveResults, TemplateUuid, TokenSnapshot, TokenUuid, UserId,
    WorkflowId, WorkflowView,
};

use super::{
    Continuation, RollAttackOptions, RollDamageOptions, UseOptions, WorkflowEnd, WorkflowState,
    WorkflowSummary,
};
use crate::config::{AutoRoll, Role};
use crate::undo::UndoData;

/// A damage roll and its classified lines.
#[derive(Debug, Clone)]
pub(crate) struct RolledDamage {
    pub roll: Roll,
    pub detail: Vec<DamageDetail>,
    /// Save multiplier of the group on a successful save.
    pub save_multiplier: f64,
}

#[derive(Debug)]
pub(crate) struct Workflow {
    pub id: WorkflowId,
    pub state: WorkflowState,
    pub user: UserId,
    pub role: Role,
    pub auto: AutoRoll,
    pub actor: ActorSnapshot,
    pub token: TokenSnapshot,
    pub item: ItemSnapshot,
    pub ammo: Option<ItemSnapshot>,
    pub options: UseOptions,

    pub targets: Vec<TokenUuid>,
    pub hit_targets: Vec<TokenUuid>,
    pub hit_checks: BTreeMap<TokenUuid, HitCheck>,
    /// AC bonuses granted by reactions, per target.
    pub ac_bonus: BTreeMap<TokenUuid, i32>,
    pub template: Option<TemplateUuid>,

    pub attack_request: Option<RollAttackOptions>,
    pub attack_roll: Option<Roll>,
    pub attack_mode: RollModeResolution,
    pub is_critical: bool,
    pub is_fumble: bool,

    pub damage_request: Option<RollDamageOptions>,
    pub damage: Option<RolledDamage>,
    pub other_damage: Option<RolledDamage>,
    pub bonus_damage: Option<RolledDamage>,
    /// Damage rolls made since the last attack roll.
    pub damage_rolls: u32,

    pub save_outcomes: Vec<SaveOutcome>,
    pub saves: SaveResults,
    pub ledger: Vec<DamageLedgerEntry>,

    pub card_confirmed: bool,
    pub targets_confirmed: bool,
    pub suspended: Option<Continuation>,
    pub aborted: bool,
    pub cancelled: bool,
    pub abort_reason: Option<String>,
    pub cleaned_up: bool,
    /// State whose pre-hooks already fired.
    pub entered: Option<WorkflowState>,
    pub end: Option<WorkflowEnd>,
    pub undo: UndoData,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkflowId,
        user: UserId,
        role: Role,
        auto: AutoRoll,
        actor: ActorSnapshot,
        token: TokenSnapshot,
        item: ItemSnapshot,
        ammo: Option<ItemSnapshot>,
        targets: Vec<TokenUuid>,
        options: UseOptions,
    ) -> Self {
        let undo = UndoData::new(id, actor.uuid.clone(), item.uuid.clone(), user.clone());
        Self {
            id,
            state: WorkflowState::Start,
            user,
            role,
            auto,
            actor,
            token,
            item,
            ammo,
            options,
            targets,
            hit_targets: Vec::new(),
            hit_checks: BTreeMap::new(),
            ac_bonus: BTreeMap::new(),
            template: None,
            attack_request: None,
            attack_roll: None,
            attack_mode: RollModeResolution::default(),
            is_critical: false,
            is_fumble: false,
            damage_request: None,
            damage: None,
            other_damage: None,
            bonus_damage: None,
            damage_rolls: 0,
            save_outcomes: Vec::new(),
            saves: SaveResults::default(),
            ledger: Vec::new(),
            card_confirmed: false,
            targets_confirmed: false,
            suspended: None,
            aborted: false,
            cancelled: false,
            abort_reason: None,
            cleaned_up: false,
            entered: None,
            end: None,
            undo,
        }
    }

    pub fn fast_forward(&self) -> bool {
        self.options.fast_forward
    }

    /// Targets damage and effects land on: the hit targets of an attack,
    /// every target otherwise.
    pub fn affected_targets(&self) -> &[TokenUuid] {
        if self.item.action_type.is_attack() {
            &self.hit_targets
        } else {
            &self.targets
        }
    }

    pub fn has_damage(&self) -> bool {
        !self.item.damage_parts.is_empty()
            || self.ammo.as_ref().is_some_and(|ammo| !ammo.damage_parts.is_empty())
            || self
                .item
                .other
                .as_ref()
                .is_some_and(|other| !other.formula.trim().is_empty())
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = true;
        self.abort_reason.get_or_insert_with(|| reason.into());
        self.suspended = None;
        self.state = WorkflowState::Cleanup;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.suspended = None;
        self.state = WorkflowState::Cleanup;
    }

    /// Forgets the attack and everything derived from it, for a re-roll.
    pub fn reset_attack(&mut self) {
        self.attack_roll = None;
        self.attack_mode = RollModeResolution::default();
        self.is_critical = false;
        self.is_fumble = false;
        self.hit_targets.clear();
        self.hit_checks.clear();
        self.ac_bonus.clear();
        self.save_outcomes.clear();
        self.saves = SaveResults::default();
        self.reset_damage();
    }

    /// Clears damage rolled for a previous attack.
    pub fn reset_damage(&mut self) {
        self.damage = None;
        self.other_damage = None;
        self.bonus_damage = None;
        self.damage_rolls = 0;
        self.damage_request = None;
    }

    pub fn damage_total(&self) -> Option<f64> {
        let rolled = [&self.damage, &self.other_damage, &self.bonus_damage];
        rolled
            .iter()
            .any(|r| r.is_some())
            .then(|| rolled.into_iter().flatten().map(|r| r.roll.total).sum())
    }

    pub fn view(&self) -> WorkflowView {
        let mut damage_types: Vec<String> = [&self.damage, &self.other_damage, &self.bonus_damage]
            .into_iter()
            .flatten()
            .flat_map(|rolled| rolled.detail.iter())
            .map(|line| line.damage_type.as_str().to_owned())
            .collect();
        damage_types.sort_unstable();
        damage_types.dedup();
        WorkflowView {
            id: self.id.0,
            targets: self.targets.len(),
            hit_targets: self.hit_targets.len(),
            is_critical: self.is_critical,
            is_fumble: self.is_fumble,
            attack_total: self.attack_roll.as_ref().map(|roll| roll.total),
            damage_total: self.damage_total(),
            damage_types,
            action_type: Some(self.item.action_type.to_string()),
        }
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            actor: self.actor.uuid.clone(),
            item: self.item.uuid.clone(),
            item_name: self.item.name.clone(),
            state: self.state,
            end: self.end,
            targets: self.targets.clone(),
            hit_targets: self.hit_targets.clone(),
            is_critical: self.is_critical,
            is_fumble: self.is_fumble,
            attack_total: self.attack_roll.as_ref().map(Roll::total_floor),
            damage_total: self.damage_total().map(|total| total.floor() as i32),
            saves: self.saves.clone(),
            ledger: self.ledger.clone(),
            suspended: self.suspended,
            attributions: self.attack_mode.attributions(),
            abort_reason: self.abort_reason.clone(),
        }
    }
}
