//! Call counting for compilation decisions

use std::collections::{HashMap, HashSet};

use tessera_runtime::ProtoId;

/// Tracks calls per prototype and which prototypes are already compiled
#[derive(Debug, Default)]
pub struct HotspotTracker {
    threshold: u64,
    calls: HashMap<ProtoId, u64>,
    compiled: HashSet<ProtoId>,
}

impl HotspotTracker {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            calls: HashMap::new(),
            compiled: HashSet::new(),
        }
    }

    /// Count one call and return the new total
    pub fn record_call(&mut self, id: ProtoId) -> u64 {
        let count = self.calls.entry(id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Whether `id` has reached the threshold and is not compiled yet
    pub fn is_hot(&self, id: ProtoId) -> bool {
        !self.compiled.contains(&id) && self.call_count(id) >= self.threshold
    }

    pub fn mark_compiled(&mut self, id: ProtoId) {
        self.compiled.insert(id);
    }

    pub fn is_compiled(&self, id: ProtoId) -> bool {
        self.compiled.contains(&id)
    }

    pub fn call_count(&self, id: ProtoId) -> u64 {
        self.calls.get(&id).copied().unwrap_or(0)
    }

    /// Hot prototypes not yet compiled, hottest first
    pub fn pending_compilations(&self) -> Vec<(ProtoId, u64)> {
        let mut pending: Vec<(ProtoId, u64)> = self
            .calls
            .iter()
            .filter(|(id, _)| self.is_hot(**id))
            .map(|(id, count)| (*id, *count))
            .collect();
        pending.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        pending
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u64) {
        self.threshold = threshold;
    }

    pub fn tracked_count(&self) -> usize {
        self.calls.len()
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    pub fn reset(&mut self) {
        self.calls.clear();
        self.compiled.clear();
    }
}
