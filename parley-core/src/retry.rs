// ABOUTME: Per-message attempt counting and permanent-failure classification.
// ABOUTME: Synchronous and engine-owned; no locking needed.

use std::collections::{HashMap, HashSet};

/// Tracks processing attempts per message id and the set of ids this
/// client has permanently given up on.
///
/// "Exceeded" is a query answered by [`record_attempt`](Self::record_attempt);
/// "permanently failed" is a classification the engine applies explicitly.
/// Keeping the two separate lets the engine decide when to make the
/// terminal determination, since the backlog and live paths have different
/// side effects at that point.
#[derive(Debug)]
pub struct RetryTracker {
    max_attempts: u32,
    attempts: HashMap<String, u32>,
    failed: HashSet<String>,
}

impl RetryTracker {
    /// `max_attempts` is the total number of attempts allowed per message
    /// (the first attempt plus any retries).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Increment the attempt counter for `id` (first call yields 1) and
    /// report whether the budget is now exceeded. Does not classify the
    /// message as permanently failed; that is the caller's decision.
    pub fn record_attempt(&mut self, id: &str) -> (u32, bool) {
        let count = self.attempts.entry(id.to_string()).or_insert(0);
        *count += 1;
        let exceeded = *count > self.max_attempts;
        (*count, exceeded)
    }

    pub fn is_permanently_failed(&self, id: &str) -> bool {
        self.failed.contains(id)
    }

    /// Terminal classification. Once an id is in the failed set it never
    /// re-enters a pending state.
    pub fn mark_permanently_failed(&mut self, id: &str) {
        if self.failed.insert(id.to_string()) {
            tracing::warn!(message_id = %id, "Message marked permanently failed");
        }
    }

    /// Clear the attempt counter after a successful delivery. Idempotent;
    /// a no-op for unknown ids. Does not remove `id` from the failed set.
    pub fn mark_success(&mut self, id: &str) {
        self.attempts.remove(id);
    }
}
