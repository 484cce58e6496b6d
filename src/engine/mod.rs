//! Polling engine: drives candidates through both probes and keeps the
//! result file current.
//!
//! Each pass walks `Init → CheckingPrimary → CheckingSecondary →
//! Persisting`, then either finishes or loops back to `Init` while the
//! stored set is below target.
//!
//! Transient failures are never retried inside a pass: the candidate is
//! unknown for this pass and comes up again on the next one. Candidates
//! that were confirmed, reported taken, or produced a fatal error are
//! excluded for the rest of the run, so repeated passes only re-probe what
//! is still undecided and the run ends once nothing is left to ask about.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::candidate::{Candidate, ResultSet};
use crate::pacing::RateLimiter;
use crate::probe::{AvailabilityProbe, ProbeOutcome, Service};
use crate::store::{ResultStore, StoreError};

mod check_run;

pub use check_run::CheckRun;

// ── Policy & Signals ────────────────────────────────────────────────

/// How many passes a run makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPolicy {
    /// One pass over the full list.
    SinglePass,
    /// Repeat passes over the same list until the stored set holds
    /// `target` handles, the pass limit is hit, or no candidate is left
    /// undecided.
    UntilTarget {
        target: usize,
        max_passes: Option<u32>,
    },
}

/// Cooperative stop flag, checked before every candidate.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise on the first interrupt from `next_interrupt`, then wait for a
    /// second one. Returns `true` when that second interrupt arrives, so
    /// the caller can exit without sitting out a pause or cooldown.
    /// Returns `false` if listening for interrupts fails.
    pub async fn follow_interrupts<F, Fut>(&self, mut next_interrupt: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        if next_interrupt().await.is_err() {
            return false;
        }
        self.raise();
        warn!("Stop requested, finishing the current candidate and saving (interrupt again to exit now)");
        next_interrupt().await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Init,
    CheckingPrimary,
    CheckingSecondary,
    Persisting,
    Looping,
    Done,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassState::Init => "init",
            PassState::CheckingPrimary => "checking-primary",
            PassState::CheckingSecondary => "checking-secondary",
            PassState::Persisting => "persisting",
            PassState::Looping => "looping",
            PassState::Done => "done",
        };
        f.write_str(s)
    }
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    SinglePassComplete,
    TargetReached,
    PassLimit,
    SourceExhausted,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub available: u32,
    pub taken: u32,
    pub transient: u32,
    pub fatal: u32,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Available => self.available += 1,
            ProbeOutcome::Taken => self.taken += 1,
            ProbeOutcome::TransientError(_) => self.transient += 1,
            ProbeOutcome::FatalError(_) => self.fatal += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.available + self.taken + self.transient + self.fatal
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub passes: u32,
    pub reservation: OutcomeCounts,
    pub signup: OutcomeCounts,
    /// Handles newly written to the result file by this run.
    pub added: usize,
    pub stored_total: usize,
    pub termination: Termination,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot load stored results: {0}")]
    Load(#[source] StoreError),
    /// The pass finished but its results could not be written. They are
    /// handed back so the caller can still save or print them.
    #[error("failed to persist {} confirmed candidate(s): {source}", .unsaved.len())]
    Persist {
        #[source]
        source: StoreError,
        unsaved: Vec<Candidate>,
    },
}

// ── Engine ──────────────────────────────────────────────────────────

pub struct PollingEngine {
    primary: Arc<dyn AvailabilityProbe>,
    secondary: Option<Arc<dyn AvailabilityProbe>>,
    limiter: Arc<RateLimiter>,
    store: Arc<ResultStore>,
    policy: LoopPolicy,
    stop: StopSignal,
}

/// Mutable bookkeeping shared by all passes of one run.
struct RunState {
    /// Decided candidates: stored, taken, or fatally broken.
    excluded: HashSet<Candidate>,
    reservation: OutcomeCounts,
    signup: OutcomeCounts,
    added: usize,
    stored_total: usize,
}

enum PassEnd {
    Completed,
    Stopped,
}

impl PollingEngine {
    /// `secondary` is optional: without it, handles confirmed by the
    /// primary probe go straight to the result set.
    pub fn new(
        primary: Arc<dyn AvailabilityProbe>,
        secondary: Option<Arc<dyn AvailabilityProbe>>,
        limiter: Arc<RateLimiter>,
        store: Arc<ResultStore>,
        policy: LoopPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            limiter,
            store,
            policy,
            stop: StopSignal::new(),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run passes over `candidates` according to the loop policy.
    ///
    /// The same slice is re-scanned on every pass; refreshing the list
    /// between runs is the caller's business.
    pub async fn run(&self, candidates: &[Candidate]) -> Result<RunReport, EngineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.run_inner(run_id, candidates).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        candidates: &[Candidate],
    ) -> Result<RunReport, EngineError> {
        let stored = self.store.load().map_err(EngineError::Load)?;
        let mut state = RunState {
            excluded: stored.iter().cloned().collect(),
            reservation: OutcomeCounts::default(),
            signup: OutcomeCounts::default(),
            added: 0,
            stored_total: stored.len(),
        };

        info!(
            candidates = candidates.len(),
            already_stored = state.stored_total,
            policy = ?self.policy,
            "🚀 Starting availability run"
        );

        let mut passes = 0u32;
        let termination = loop {
            self.enter(PassState::Init, passes + 1);

            if let LoopPolicy::UntilTarget { target, max_passes } = self.policy {
                if state.stored_total >= target {
                    break Termination::TargetReached;
                }
                if max_passes.is_some_and(|max| passes >= max) {
                    break Termination::PassLimit;
                }
            }
            if self.stop.is_raised() {
                break Termination::Stopped;
            }
            if !candidates.iter().any(|c| !state.excluded.contains(c)) {
                break Termination::SourceExhausted;
            }

            passes += 1;
            let end = self.run_pass(passes, candidates, &mut state).await?;

            match (end, self.policy) {
                (PassEnd::Stopped, _) => break Termination::Stopped,
                (PassEnd::Completed, LoopPolicy::SinglePass) => break Termination::SinglePassComplete,
                (PassEnd::Completed, LoopPolicy::UntilTarget { target, .. }) => {
                    if state.stored_total >= target {
                        break Termination::TargetReached;
                    }
                    self.enter(PassState::Looping, passes);
                    info!(
                        pass = passes,
                        stored = state.stored_total,
                        target,
                        "Target not reached, starting another pass"
                    );
                }
            }
        };
        self.enter(PassState::Done, passes);

        let report = RunReport {
            run_id,
            passes,
            reservation: state.reservation,
            signup: state.signup,
            added: state.added,
            stored_total: state.stored_total,
            termination,
        };
        info!(
            passes = report.passes,
            reservation_probes = report.reservation.total(),
            signup_probes = report.signup.total(),
            added = report.added,
            stored = report.stored_total,
            termination = ?report.termination,
            "🏁 Availability run finished"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        pass: u32,
        candidates: &[Candidate],
        state: &mut RunState,
    ) -> Result<PassEnd, EngineError> {
        let mut run = CheckRun::new(pass);
        let mut stopped = false;

        // ── Primary ──
        self.enter(PassState::CheckingPrimary, pass);
        for (index, candidate) in candidates.iter().enumerate() {
            if self.stop.is_raised() {
                stopped = true;
                break;
            }
            run.advance();
            if state.excluded.contains(candidate) || !run.claim_primary(candidate) {
                continue;
            }

            info!(pass = run.pass(), index, candidate = %candidate, "Checking reservation status");
            let outcome = self.probe(self.primary.as_ref(), candidate).await;
            state.reservation.record(&outcome);

            match outcome {
                ProbeOutcome::Available => run.confirm_primary(candidate.clone()),
                ProbeOutcome::Taken => {
                    state.excluded.insert(candidate.clone());
                }
                ProbeOutcome::TransientError(reason) => {
                    info!(candidate = %candidate, %reason, "Unknown this pass");
                }
                ProbeOutcome::FatalError(reason) => {
                    warn!(candidate = %candidate, %reason, "Dropping candidate for the rest of the run");
                    state.excluded.insert(candidate.clone());
                }
            }
        }

        // ── Secondary ──
        if !stopped {
            self.enter(PassState::CheckingSecondary, pass);
            let confirmed = run.primary_confirmed().to_vec();
            for (index, candidate) in confirmed.into_iter().enumerate() {
                if self.stop.is_raised() {
                    stopped = true;
                    break;
                }
                let Some(secondary) = &self.secondary else {
                    state.excluded.insert(candidate.clone());
                    run.promote(candidate);
                    continue;
                };

                info!(pass = run.pass(), index, candidate = %candidate, "Checking signup availability");
                run.record_secondary_attempt();
                let outcome = self.probe(secondary.as_ref(), &candidate).await;
                state.signup.record(&outcome);

                match outcome {
                    ProbeOutcome::Available => {
                        info!(candidate = %candidate, "✅ Available on both services");
                        state.excluded.insert(candidate.clone());
                        run.promote(candidate);
                    }
                    ProbeOutcome::Taken => {
                        state.excluded.insert(candidate);
                    }
                    ProbeOutcome::TransientError(reason) => {
                        info!(candidate = %candidate, %reason, "Unknown this pass");
                    }
                    ProbeOutcome::FatalError(reason) => {
                        warn!(candidate = %candidate, %reason, "Dropping candidate for the rest of the run");
                        state.excluded.insert(candidate);
                    }
                }
            }
        }

        // ── Persist ──
        self.enter(PassState::Persisting, pass);
        let attempts = run.attempts();
        let cursor = run.cursor();
        let elapsed = run.elapsed_secs();
        let results: ResultSet = run.into_results();
        match self.store.merge(&results) {
            Ok(summary) => {
                state.added += summary.added;
                state.stored_total = summary.total;
                info!(
                    pass,
                    probes = attempts,
                    scanned = cursor,
                    confirmed = results.len(),
                    added = summary.added,
                    stored = summary.total,
                    duration_secs = elapsed,
                    file = %self.store.path().display(),
                    "💾 Pass persisted"
                );
            }
            Err(source) => {
                return Err(EngineError::Persist {
                    source,
                    unsaved: results.into_vec(),
                });
            }
        }

        Ok(if stopped { PassEnd::Stopped } else { PassEnd::Completed })
    }

    /// One paced probe: wait for the service, probe, report back.
    async fn probe(&self, probe: &dyn AvailabilityProbe, candidate: &Candidate) -> ProbeOutcome {
        let service: Service = probe.service();
        self.limiter.before_request(service).await;
        let outcome = probe.probe(candidate).await;
        self.limiter.on_outcome(service, &outcome).await;
        outcome
    }

    fn enter(&self, state: PassState, pass: u32) {
        debug!(pass, state = %state, "Engine state");
    }
}
