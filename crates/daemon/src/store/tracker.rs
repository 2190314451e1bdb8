// Mutation tracker: every local change to the graph bumps a revision and
// stamps the time it happened. The revision drives the autosave
// scheduler; the timestamp is informational.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationTracker {
    revision: u64,
    last_local_mutation_at: Option<DateTime<Utc>>,
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local mutation now. Returns the new revision.
    pub fn record(&mut self) -> u64 {
        self.record_at(Utc::now())
    }

    /// Like `record` but with an explicit wall-clock time. The stored
    /// timestamp never moves backwards even if the clock does.
    pub fn record_at(&mut self, at: DateTime<Utc>) -> u64 {
        self.revision += 1;
        self.last_local_mutation_at = Some(match self.last_local_mutation_at {
            Some(previous) if previous > at => previous,
            _ => at,
        });
        self.revision
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_local_mutation_at(&self) -> Option<DateTime<Utc>> {
        self.last_local_mutation_at
    }
}
