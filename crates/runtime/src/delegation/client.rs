//! Caller side of the delegation protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use combat_core::UserId;

use super::handlers::HandlerResult;
use super::ops::{DelegatedOp, DelegatedRequest, DelegationReply, RequestId};
use crate::api::{Result, RuntimeError};

/// One request on its way to the coordinator.
pub(crate) struct Delivery {
    pub(crate) id: RequestId,
    pub(crate) request: DelegatedRequest,
    pub(crate) reply: oneshot::Sender<HandlerResult>,
}

/// Result of a timed call.
///
/// A timeout or failure is a value, distinct from any legitimate empty reply,
/// so the caller can continue without the input instead of failing.
#[derive(Debug, Clone)]
pub enum DelegationOutcome<T> {
    Reply(T),
    TimedOut,
    Failed(String),
}

impl<T> DelegationOutcome<T> {
    pub fn reply(self) -> Option<T> {
        match self {
            Self::Reply(value) => Some(value),
            Self::TimedOut | Self::Failed(_) => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Reply(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DelegationOutcome<U> {
        match self {
            Self::Reply(value) => DelegationOutcome::Reply(f(value)),
            Self::TimedOut => DelegationOutcome::TimedOut,
            Self::Failed(reason) => DelegationOutcome::Failed(reason),
        }
    }
}

impl DelegationOutcome<DelegationReply> {
    /// Narrows the reply to the variant `f` accepts; anything else is a failure.
    pub fn expect_reply<U>(
        self,
        op: DelegatedOp,
        f: impl FnOnce(DelegationReply) -> Option<U>,
    ) -> DelegationOutcome<U> {
        match self {
            Self::Reply(reply) => {
                let kind = reply.kind();
                match f(reply) {
                    Some(value) => DelegationOutcome::Reply(value),
                    None => DelegationOutcome::Failed(format!("unexpected {kind} reply to {op}")),
                }
            }
            Self::TimedOut => DelegationOutcome::TimedOut,
            Self::Failed(reason) => DelegationOutcome::Failed(reason),
        }
    }
}

/// Sends [`DelegatedRequest`]s to the coordinator on behalf of one user.
///
/// Clones share the request sequence, so ids stay unique per user across
/// every task holding a client.
#[derive(Clone)]
pub struct DelegationClient {
    tx: mpsc::Sender<Delivery>,
    user: UserId,
    seq: Arc<AtomicU64>,
    timeout: Duration,
}

impl DelegationClient {
    pub(crate) fn new(tx: mpsc::Sender<Delivery>, user: UserId, timeout: Duration) -> Self {
        Self {
            tx,
            user,
            seq: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same channel, acting as `user`.
    pub fn for_user(&self, user: UserId) -> Self {
        Self {
            user,
            ..self.clone()
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId {
            user: self.user.clone(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Timed call with the configured timeout.
    pub async fn call(&self, request: DelegatedRequest) -> DelegationOutcome<DelegationReply> {
        self.call_with_timeout(request, self.timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        request: DelegatedRequest,
        timeout: Duration,
    ) -> DelegationOutcome<DelegationReply> {
        let id = self.next_id();
        self.call_with_id(id, request, timeout).await
    }

    /// Timed call under an explicit id. Re-sending the same id is how a
    /// caller retries without the operation running twice.
    pub async fn call_with_id(
        &self,
        id: RequestId,
        request: DelegatedRequest,
        timeout: Duration,
    ) -> DelegationOutcome<DelegationReply> {
        let op = request.op();
        let (reply_tx, reply_rx) = oneshot::channel();
        let delivery = Delivery {
            id: id.clone(),
            request,
            reply: reply_tx,
        };

        let exchange = async {
            self.tx
                .send(delivery)
                .await
                .map_err(|_| "coordinator channel closed".to_owned())?;
            reply_rx
                .await
                .map_err(|_| "coordinator dropped the reply".to_owned())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Ok(reply))) => {
                debug!(target: "runtime::delegation", %op, request = %id, "delegated call answered");
                DelegationOutcome::Reply(reply)
            }
            Ok(Ok(Err(error))) => {
                warn!(target: "runtime::delegation", %op, request = %id, %error, "delegated call failed");
                DelegationOutcome::Failed(error.to_string())
            }
            Ok(Err(reason)) => {
                warn!(target: "runtime::delegation", %op, request = %id, %reason, "delegated call failed");
                DelegationOutcome::Failed(reason)
            }
            Err(_) => {
                warn!(
                    target: "runtime::delegation",
                    %op,
                    request = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "delegated call timed out"
                );
                DelegationOutcome::TimedOut
            }
        }
    }

    /// Untimed call: returns once the coordinator has accepted the request.
    pub async fn send(&self, request: DelegatedRequest) -> Result<RequestId> {
        let id = self.next_id();
        let (reply_tx, _reply_rx) = oneshot::channel();
        debug!(target: "runtime::delegation", op = %request.op(), request = %id, "fire and continue");
        self.tx
            .send(Delivery {
                id: id.clone(),
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RuntimeError::DelegationChannelClosed)?;
        Ok(id)
    }
}
