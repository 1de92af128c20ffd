//! Per-phase timings of a request.

use std::time::Instant;

use indexmap::IndexMap;

/// Records elapsed milliseconds per phase, in phase order.
#[derive(Debug, Clone)]
pub struct TimeTracker {
    /// Request start.
    start: Instant,
    /// End of the previous phase.
    last: Instant,
    /// Milliseconds per completed phase.
    phases: IndexMap<String, u64>,
}

impl Default for TimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeTracker {
    /// Starts timing.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            phases: IndexMap::new(),
        }
    }

    /// Ends the current phase under `name`. Repeated names accumulate.
    pub fn next(&mut self, name: &str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_millis() as u64;
        *self.phases.entry(name.to_string()).or_default() += elapsed;
        self.last = now;
    }

    /// Returns the phases followed by the `total`.
    pub fn finish(mut self) -> IndexMap<String, u64> {
        let total = self.start.elapsed().as_millis() as u64;
        self.phases.insert("total".to_string(), total);
        self.phases
    }
}
