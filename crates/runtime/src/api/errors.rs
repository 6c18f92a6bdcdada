//! Unified error types surfaced by the runtime API.
//!
//! Wraps precondition failures, workflow state violations and worker
//! coordination failures so callers can bubble them up with consistent
//! context.
use thiserror::Error;

use combat_core::dice::FormulaError;
use combat_core::{
    ActorUuid, ErrorContext, ErrorSeverity, GameError, ItemUuid, TokenUuid, WorkflowId,
};

use crate::workflow::WorkflowState;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Conditions checked before a workflow is created. Nothing is mutated when
/// one of these is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("actor {0} not found")]
    UnknownActor(ActorUuid),

    #[error("item {item} not found on actor {actor}")]
    UnknownItem { actor: ActorUuid, item: ItemUuid },

    #[error("actor {0} has no token on the scene")]
    MissingToken(ActorUuid),

    #[error("item {0} requires at least one target")]
    NoTargets(ItemUuid),

    #[error("item {item} allows a single target, {count} selected")]
    TooManyTargets { item: ItemUuid, count: usize },

    #[error("target token {0} not found")]
    UnknownTarget(TokenUuid),

    #[error("item {item} already has live workflow {workflow}; choose complete, discard or undo")]
    WorkflowConflict { item: ItemUuid, workflow: WorkflowId },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("workflow {0} not found")]
    UnknownWorkflow(WorkflowId),

    #[error("{operation} is not valid in state {state} of workflow {workflow}")]
    InvalidState {
        workflow: WorkflowId,
        state: WorkflowState,
        operation: &'static str,
    },

    #[error("workflow {workflow} is not waiting for {payload}")]
    UnexpectedResume {
        workflow: WorkflowId,
        payload: &'static str,
    },

    #[error("formula failed ({context})")]
    Formula {
        context: ErrorContext,
        #[source]
        source: FormulaError,
    },

    #[error("delegation channel closed")]
    DelegationChannelClosed,

    #[error("coordinator worker join failed")]
    WorkerJoin(#[source] tokio::task::JoinError),

    #[error("runtime built without a world")]
    MissingWorld,
}

impl GameError for RuntimeError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Precondition(_) | Self::InvalidState { .. } | Self::UnexpectedResume { .. } => {
                ErrorSeverity::Validation
            }
            Self::UnknownWorkflow(_) => ErrorSeverity::Validation,
            Self::Formula { .. } => ErrorSeverity::Recoverable,
            Self::DelegationChannelClosed | Self::WorkerJoin(_) => ErrorSeverity::Internal,
            Self::MissingWorld => ErrorSeverity::Fatal,
        }
    }

    fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Formula { context, .. } => Some(context),
            _ => None,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Precondition(PreconditionError::UnknownActor(_)) => "PRECONDITION_UNKNOWN_ACTOR",
            Self::Precondition(PreconditionError::UnknownItem { .. }) => {
                "PRECONDITION_UNKNOWN_ITEM"
            }
            Self::Precondition(PreconditionError::MissingToken(_)) => "PRECONDITION_MISSING_TOKEN",
            Self::Precondition(PreconditionError::NoTargets(_)) => "PRECONDITION_NO_TARGETS",
            Self::Precondition(PreconditionError::TooManyTargets { .. }) => {
                "PRECONDITION_TOO_MANY_TARGETS"
            }
            Self::Precondition(PreconditionError::UnknownTarget(_)) => {
                "PRECONDITION_UNKNOWN_TARGET"
            }
            Self::Precondition(PreconditionError::WorkflowConflict { .. }) => {
                "PRECONDITION_WORKFLOW_CONFLICT"
            }
            Self::UnknownWorkflow(_) => "WORKFLOW_UNKNOWN",
            Self::InvalidState { .. } => "WORKFLOW_INVALID_STATE",
            Self::UnexpectedResume { .. } => "WORKFLOW_UNEXPECTED_RESUME",
            Self::Formula { .. } => "FORMULA_FAILED",
            Self::DelegationChannelClosed => "DELEGATION_CHANNEL_CLOSED",
            Self::WorkerJoin(_) => "WORKER_JOIN",
            Self::MissingWorld => "RUNTIME_MISSING_WORLD",
        }
    }
}
