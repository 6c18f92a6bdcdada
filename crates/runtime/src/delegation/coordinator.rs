//! Coordinator worker: the single writer of authoritative state.
//!
//! Receives [`Delivery`]s from every [`super::DelegationClient`], answers
//! redelivered request ids from the reply cache and runs everything else on
//! the handler registry. Each request runs on its own task so a long
//! handler (a reaction dialog, a delegated item use) never blocks the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use super::client::Delivery;
use super::handlers::{HandlerRegistry, HandlerResult};
use super::ops::{DelegatedOp, DelegationReply, RequestId};

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationStats {
    pub received: u64,
    pub executed: u64,
    pub cache_hits: u64,
    pub by_op: HashMap<DelegatedOp, u64>,
}

impl DelegationStats {
    pub fn received_for(&self, op: DelegatedOp) -> u64 {
        self.by_op.get(&op).copied().unwrap_or(0)
    }
}

/// Live counters shared between the worker and handles.
#[derive(Debug, Default)]
pub struct DelegationMetrics {
    inner: Mutex<DelegationStats>,
}

impl DelegationMetrics {
    pub fn snapshot(&self) -> DelegationStats {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DelegationStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_received(&self, op: DelegatedOp) {
        let mut stats = self.lock();
        stats.received += 1;
        *stats.by_op.entry(op).or_default() += 1;
    }

    fn record_executed(&self) {
        self.lock().executed += 1;
    }

    fn record_cache_hit(&self) {
        self.lock().cache_hits += 1;
    }
}

enum Slot {
    /// Executing; redeliveries wait for the first run's result.
    Pending(Vec<oneshot::Sender<HandlerResult>>),
    Done(DelegationReply),
}

enum Lookup {
    Hit(DelegationReply, oneshot::Sender<HandlerResult>),
    Joined,
    Miss(oneshot::Sender<HandlerResult>),
}

/// Bounded FIFO of replies by request id. Only successful replies are kept,
/// so a failed request may be retried under the same id.
struct ReplyCache {
    slots: HashMap<RequestId, Slot>,
    order: VecDeque<RequestId>,
    capacity: usize,
}

impl ReplyCache {
    fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn lookup(&mut self, id: &RequestId, reply: oneshot::Sender<HandlerResult>) -> Lookup {
        match self.slots.get_mut(id) {
            Some(Slot::Done(cached)) => Lookup::Hit(cached.clone(), reply),
            Some(Slot::Pending(waiters)) => {
                waiters.push(reply);
                Lookup::Joined
            }
            None => {
                self.slots.insert(id.clone(), Slot::Pending(Vec::new()));
                Lookup::Miss(reply)
            }
        }
    }

    fn finish(
        &mut self,
        id: &RequestId,
        result: &HandlerResult,
    ) -> Vec<oneshot::Sender<HandlerResult>> {
        let waiters = match self.slots.remove(id) {
            Some(Slot::Pending(waiters)) => waiters,
            _ => Vec::new(),
        };
        if let Ok(reply) = result {
            self.slots.insert(id.clone(), Slot::Done(reply.clone()));
            self.order.push_back(id.clone());
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.slots.remove(&evicted);
                }
            }
        }
        waiters
    }
}

/// Background task that executes delegated operations.
pub struct CoordinatorWorker {
    rx: mpsc::Receiver<Delivery>,
    handlers: Arc<HandlerRegistry>,
    cache: Arc<Mutex<ReplyCache>>,
    metrics: Arc<DelegationMetrics>,
    shutdown: oneshot::Receiver<()>,
}

impl CoordinatorWorker {
    pub(crate) fn new(
        rx: mpsc::Receiver<Delivery>,
        handlers: HandlerRegistry,
        cache_size: usize,
        metrics: Arc<DelegationMetrics>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            rx,
            handlers: Arc::new(handlers),
            cache: Arc::new(Mutex::new(ReplyCache::new(cache_size))),
            metrics,
            shutdown,
        }
    }

    /// Main worker loop.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    info!(target: "runtime::delegation", "coordinator shutting down");
                    break;
                }
                Some(delivery) = self.rx.recv() => {
                    self.dispatch(delivery);
                }
                else => break,
            }
        }
    }

    fn dispatch(&self, delivery: Delivery) {
        let Delivery { id, request, reply } = delivery;
        let op = request.op();
        self.metrics.record_received(op);

        let lookup = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(&id, reply);
        let reply = match lookup {
            Lookup::Hit(cached, reply) => {
                debug!(target: "runtime::delegation", %op, request = %id, "redelivery answered from cache");
                self.metrics.record_cache_hit();
                let _ = reply.send(Ok(cached));
                return;
            }
            Lookup::Joined => {
                trace!(target: "runtime::delegation", %op, request = %id, "joined in-flight request");
                self.metrics.record_cache_hit();
                return;
            }
            Lookup::Miss(reply) => reply,
        };

        let handlers = Arc::clone(&self.handlers);
        let cache = Arc::clone(&self.cache);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let result = handlers.execute(&id, request).await;
            metrics.record_executed();
            let waiters = cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finish(&id, &result);
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
            let _ = reply.send(result);
        });
    }
}
