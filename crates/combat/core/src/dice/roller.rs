//! Die rollers: the single source of randomness for the engine.
//!
//! Everything that rolls takes `&mut dyn DieRoller`, so tests script exact
//! results and the runtime plugs in a seeded or entropy-backed generator.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces individual die results.
pub trait DieRoller: Send {
    /// Roll one die with `faces` sides (1..=faces inclusive).
    fn roll_die(&mut self, faces: u32) -> u32;
}

/// Entropy or seed backed roller.
#[derive(Debug)]
pub struct RandomRoller {
    rng: StdRng,
}

impl RandomRoller {
    /// Deterministic roller for replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl DieRoller for RandomRoller {
    fn roll_die(&mut self, faces: u32) -> u32 {
        if faces <= 1 {
            return faces.max(1);
        }
        self.rng.gen_range(1..=faces)
    }
}

/// Returns queued results in order.
///
/// Values are clamped to the die size. Once the queue is drained every roll
/// returns `fallback` (clamped), so a short script never panics mid-workflow.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    queue: VecDeque<u32>,
    fallback: u32,
}

impl ScriptedRoller {
    pub fn new(results: impl IntoIterator<Item = u32>) -> Self {
        Self {
            queue: results.into_iter().collect(),
            fallback: 1,
        }
    }

    /// Value returned after the script runs out.
    pub fn with_fallback(mut self, fallback: u32) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&mut self, result: u32) {
        self.queue.push_back(result);
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl DieRoller for ScriptedRoller {
    fn roll_die(&mut self, faces: u32) -> u32 {
        let value = self.queue.pop_front().unwrap_or(self.fallback);
        value.clamp(1, faces.max(1))
    }
}
