//! Shared die roller handed to every task that rolls.

use std::sync::{Arc, Mutex, PoisonError};

use combat_core::{DieRoller, RandomRoller};

/// Clonable handle over one [`DieRoller`].
///
/// Rolls are short and never await, so a std mutex is enough; the lock is
/// never held across a suspension point.
#[derive(Clone)]
pub struct SharedRoller {
    inner: Arc<Mutex<Box<dyn DieRoller>>>,
}

impl SharedRoller {
    pub fn new(roller: impl DieRoller + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(roller))),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(RandomRoller::seeded(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(RandomRoller::from_entropy())
    }

    /// Runs `f` with exclusive access to the roller.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn DieRoller) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut())
    }
}

impl std::fmt::Debug for SharedRoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRoller").finish_non_exhaustive()
    }
}
