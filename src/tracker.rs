// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::Address;

/// How long a relative-level operation waits for the level query to come
/// back before it is abandoned.
pub const RAMP_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered INCREASE / DECREASE waiting on the group's current level.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingStep {
    step: i16,
    limit: u8,
    generation: u64,
}

/// The outcome of a pending step once the level arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub address: Address,
    pub target: u8,
}

/// Last-known level per group plus the single-slot relative-level
/// registrations.
///
/// Owned exclusively by the bridge orchestrator; no interior locking.
/// Entries are ephemeral and never persisted.
#[derive(Debug, Default)]
pub struct LevelTracker {
    levels: HashMap<Address, u8>,
    pending: HashMap<Address, PendingStep>,
    generation: u64,
}

impl LevelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a level observation. If a relative op is waiting on this
    /// address, it is extinguished and the resolved target returned.
    pub fn note_level(&mut self, address: &Address, level: u8) -> Option<ResolvedStep> {
        self.levels.insert(address.clone(), level);

        let pending = self.pending.remove(address)?;
        let target = (i16::from(level) + pending.step)
            .clamp(0, i16::from(pending.limit)) as u8;
        debug!("{address}: relative op resolved, {level} -> {target}");
        Some(ResolvedStep { address: address.clone(), target })
    }

    pub fn last_level(&self, address: &Address) -> Option<u8> {
        self.levels.get(address).copied()
    }

    /// Register a relative-level op. At most one may be pending per address;
    /// a duplicate is rejected and returns `None`. On success the generation
    /// token for [`expire`](Self::expire) is returned.
    pub fn register_step(&mut self, address: Address, step: i16) -> Option<u64> {
        if self.pending.contains_key(&address) {
            warn!("{address}: relative op already pending, ignoring duplicate");
            return None;
        }
        self.generation += 1;
        let generation = self.generation;
        self.pending.insert(address, PendingStep { step, limit: 255, generation });
        Some(generation)
    }

    /// Withdraw a pending op after its deadline. The generation token keeps
    /// a stale timeout from killing a newer registration for the same
    /// address. Returns true if an op was actually removed.
    pub fn expire(&mut self, address: &Address, generation: u64) -> bool {
        match self.pending.get(address) {
            Some(pending) if pending.generation == generation => {
                self.pending.remove(address);
                warn!("{address}: relative op timed out waiting for level");
                true
            }
            _ => false,
        }
    }

    /// Drop all pending relative ops (used at shutdown / not-ready).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
