//! Runtime orchestration for action resolution.
//!
//! This crate drives item uses through the workflow state machine, brokers
//! reactions from other actors, routes privileged mutations to the
//! coordinator and applies damage against the shared world. Consumers embed
//! [`Runtime`] and interact with it through [`CombatHandle`].
//!
//! Modules are organized by responsibility:
//! - [`runtime`] hosts the orchestrator and builder
//! - [`api`] exposes the types downstream clients interact with
//! - [`workflow`] holds the state machine, its registry and damage pipeline
//! - [`delegation`] carries requests to the coordinator and executes them
//! - [`reactions`] discovers and resolves reactions
//! - [`events`] provides topic-based event bus for flexible event routing
//! - [`hooks`] exposes the workflow extension points
//! - [`world`] is the authoritative document store
pub mod api;
pub mod concentration;
pub mod config;
pub mod delegation;
pub mod dialogs;
pub mod dice;
pub mod events;
pub mod hooks;
pub mod overtime;
pub mod reactions;
pub mod runtime;
pub mod undo;
pub mod workflow;
pub mod world;

pub use api::{CombatHandle, PreconditionError, Result, RuntimeError};
pub use config::{AutoRoll, ConfigError, Role, RuntimeConfig};
pub use delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply,
    DelegationStats,
};
pub use dialogs::{BonusRequest, ClientDirectory, DeclineAll, Dialogs};
pub use dice::SharedRoller;
pub use events::{DamageEvent, Event, EventBus, ReactionEvent, Topic, WorkflowEvent};
pub use hooks::{
    ExtensionPoint, HookCriticality, HookOutcome, HookPayload, HookRegistry, HookVeto,
    MacroRunner, NoMacros, WorkflowHook,
};
pub use overtime::{OvertimeOutcome, OvertimeReport};
pub use reactions::{ReactionChoice, ReactionOutcome, ReactionRequest, ReactionTrigger};
pub use runtime::{Runtime, RuntimeBuilder};
pub use undo::{UndoData, UndoReport};
pub use workflow::{
    ApplyDamageRequest, ConflictResolution, Continuation, DamageApplication, DamageTargetRef,
    ItemSource, ResumePayload, RollAttackOptions, RollDamageOptions, UseItemRequest, UseOptions,
    WorkflowEnd, WorkflowState, WorkflowSummary,
};
pub use world::{ChatCard, ChatCardKind, World, WorldStore};
