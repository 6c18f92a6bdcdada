//! Privileged-delegation protocol.
//!
//! Only the coordinator (the GM client) mutates authoritative documents.
//! Every other caller describes the mutation as a [`DelegatedRequest`] and
//! sends it through a [`DelegationClient`]; the [`CoordinatorWorker`] routes
//! it to the registered [`DelegationHandler`] for its operation key.
//!
//! Two call shapes exist:
//! - timed: the caller awaits a typed reply, bounded by a timeout that maps
//!   to [`DelegationOutcome::TimedOut`] rather than an error
//! - untimed: the caller only waits for the coordinator to accept the request
//!
//! Delivery is at-least-once. Handlers are written to be idempotent and the
//! coordinator caches successful replies per [`RequestId`], so a redelivered
//! request is answered without executing again.

mod client;
mod coordinator;
mod handlers;
mod ops;

pub use client::{DelegationClient, DelegationOutcome};
pub use coordinator::{CoordinatorWorker, DelegationMetrics, DelegationStats};
pub use handlers::{
    DelegationHandler, EngineHandler, HandlerError, HandlerRegistry, HandlerResult,
    ReactionHandler, RollHandler, WorldHandler,
};
pub use ops::{DelegatedOp, DelegatedRequest, DelegationReply, EffectRef, RequestId};

