//! Per-service request pacing with cooldown after transient failures.
//!
//! Each upstream service has its own `PacingPolicy` and its own state.
//! `before_request` suspends the caller until the service may be hit
//! again; `on_outcome` pushes the next slot out by the cooldown when a probe
//! reported a transient failure. The limiter knows nothing about
//! candidates.
//!
//! Thread-safe: one async mutex per service, held across the wait, so
//! concurrent callers for the same service are issued strictly one at a
//! time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Settings;
use crate::probe::{ProbeOutcome, Service};
use crate::random::{jitter, RandomSource};

/// Spacing rules for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Minimum gap between consecutive requests.
    pub spacing: Duration,
    /// Every N-th request is followed by a longer pause. 0 disables.
    pub periodic_every: u32,
    pub periodic_pause_min: Duration,
    pub periodic_pause_max: Duration,
    /// Extra delay after a transient failure.
    pub cooldown: Duration,
}

impl PacingPolicy {
    /// The reservation API throttles hard: 1 s between requests plus a
    /// 10–12 s pause after every second one.
    pub fn reservation_default() -> Self {
        Self {
            spacing: Duration::from_secs(1),
            periodic_every: 2,
            periodic_pause_min: Duration::from_secs(10),
            periodic_pause_max: Duration::from_secs(12),
            cooldown: Duration::from_secs(15),
        }
    }

    pub fn signup_default() -> Self {
        Self {
            spacing: Duration::from_secs(1),
            periodic_every: 0,
            periodic_pause_min: Duration::ZERO,
            periodic_pause_max: Duration::ZERO,
            cooldown: Duration::from_secs(15),
        }
    }

    /// No waiting at all.
    pub fn unpaced() -> Self {
        Self {
            spacing: Duration::ZERO,
            periodic_every: 0,
            periodic_pause_min: Duration::ZERO,
            periodic_pause_max: Duration::ZERO,
            cooldown: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.periodic_pause_min > self.periodic_pause_max {
            return Err(format!(
                "periodic pause min ({:?}) exceeds max ({:?})",
                self.periodic_pause_min, self.periodic_pause_max
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    issued: u64,
    last_issued: Option<Instant>,
    /// Gap owed after `last_issued`, fixed when the request was issued.
    next_gap: Duration,
    cooldown_until: Option<Instant>,
}

struct ServiceSlot {
    policy: PacingPolicy,
    state: Mutex<ServiceState>,
}

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    slots: HashMap<Service, ServiceSlot>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, rng: Arc<dyn RandomSource>) -> Self {
        Self {
            clock,
            rng,
            slots: HashMap::new(),
        }
    }

    /// Limiter with both services paced as configured.
    pub fn from_settings(
        settings: &Settings,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self::new(clock, rng)
            .with_policy(Service::Reservation, settings.reservation_pacing.clone())
            .with_policy(Service::Signup, settings.signup_pacing.clone())
    }

    pub fn with_policy(mut self, service: Service, policy: PacingPolicy) -> Self {
        self.slots.insert(
            service,
            ServiceSlot {
                policy,
                state: Mutex::new(ServiceState::default()),
            },
        );
        self
    }

    /// Wait until `service` may receive the next request, then record the
    /// issuance. Returns how long the caller was held.
    pub async fn before_request(&self, service: Service) -> Duration {
        let Some(slot) = self.slots.get(&service) else {
            warn!(service = %service, "No pacing policy registered, request not paced");
            return Duration::ZERO;
        };

        let mut state = slot.state.lock().await;
        let now = self.clock.now();

        let mut ready_at = now;
        if let Some(last) = state.last_issued {
            ready_at = ready_at.max(last + state.next_gap);
        }
        if let Some(until) = state.cooldown_until {
            ready_at = ready_at.max(until);
        }

        let wait = ready_at.saturating_duration_since(now);
        if !wait.is_zero() {
            debug!(service = %service, wait_ms = wait.as_millis() as u64, "Pacing");
            self.clock.sleep(wait).await;
        }

        state.issued += 1;
        state.last_issued = Some(self.clock.now());
        state.cooldown_until = None;
        state.next_gap = self.gap_after(&slot.policy, state.issued);
        wait
    }

    /// Feed a probe outcome back. Transient failures start a cooldown.
    pub async fn on_outcome(&self, service: Service, outcome: &ProbeOutcome) {
        let ProbeOutcome::TransientError(reason) = outcome else {
            return;
        };
        let Some(slot) = self.slots.get(&service) else {
            return;
        };
        let mut state = slot.state.lock().await;
        let until = self.clock.now() + slot.policy.cooldown;
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |u| u.max(until)));
        warn!(
            service = %service,
            reason = %reason,
            cooldown_secs = slot.policy.cooldown.as_secs_f64(),
            "Transient failure, cooling down"
        );
    }

    fn gap_after(&self, policy: &PacingPolicy, issued: u64) -> Duration {
        let every = u64::from(policy.periodic_every);
        if every > 0 && issued % every == 0 {
            jitter(
                self.rng.as_ref(),
                policy.periodic_pause_min,
                policy.periodic_pause_max,
            )
            .max(policy.spacing)
        } else {
            policy.spacing
        }
    }
}
