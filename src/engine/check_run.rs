//! Per-pass traversal state.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::candidate::{Candidate, ResultSet};

/// One pass over the candidate list: where we are, what was already
/// probed, and what has been confirmed so far. Dropped when the pass ends.
#[derive(Debug)]
pub struct CheckRun {
    pass: u32,
    cursor: usize,
    attempts: u32,
    attempted: HashSet<Candidate>,
    primary_confirmed: Vec<Candidate>,
    results: ResultSet,
    started_at: DateTime<Utc>,
}

impl CheckRun {
    pub fn new(pass: u32) -> Self {
        Self {
            pass,
            cursor: 0,
            attempts: 0,
            attempted: HashSet::new(),
            primary_confirmed: Vec::new(),
            results: ResultSet::new(),
            started_at: Utc::now(),
        }
    }

    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Position in the candidate list, including skipped entries.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Outbound probes issued this pass, both services.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Claim the primary probe for `candidate`. `false` if it was already
    /// probed this pass.
    pub fn claim_primary(&mut self, candidate: &Candidate) -> bool {
        if !self.attempted.insert(candidate.clone()) {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn record_secondary_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn confirm_primary(&mut self, candidate: Candidate) {
        self.primary_confirmed.push(candidate);
    }

    pub fn primary_confirmed(&self) -> &[Candidate] {
        &self.primary_confirmed
    }

    pub fn promote(&mut self, candidate: Candidate) -> bool {
        self.results.insert(candidate)
    }

    pub fn into_results(self) -> ResultSet {
        self.results
    }

    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
