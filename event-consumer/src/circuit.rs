use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::context::FailureKind;
use crate::metric_consts::BREAKER_TRANSITIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Dependency failures within the rolling window before tripping.
    pub failure_threshold: usize,
    /// How long to short-circuit before allowing a half-open probe.
    pub open_interval: Duration,
    /// Failures older than this are pruned and never count.
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_interval: Duration::from_secs(30),
            rolling_window: Duration::from_secs(10),
        }
    }
}

/// A three-state circuit breaker over a rolling failure window.
///
/// Each pipeline owns exactly one breaker instance - there is no global
/// state, and the owning consume loop is single threaded, so none of the
/// bookkeeping needs atomics. Only `DependencyDown` results are recorded;
/// every other classification passes through without touching the state.
///
/// The rolling window (rather than a plain counter) means a handful of
/// failures spread over hours never trips the breaker, and the half-open
/// state admits a single probe so a recovering dependency is not stampeded.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    opened_at: Option<Instant>,
    recent_failures: VecDeque<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            opened_at: None,
            recent_failures: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether the next request may proceed. An open breaker whose cooldown
    /// has elapsed transitions to half-open *before* answering, so exactly
    /// the current request becomes the probe.
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Record the classification of a request that was let through.
    /// Never call this for short-circuited requests.
    pub fn on_result(&mut self, outcome: FailureKind) {
        self.on_result_at(Instant::now(), outcome)
    }

    pub(crate) fn check_at(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.config.open_interval {
                    self.transition(BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub(crate) fn on_result_at(&mut self, now: Instant, outcome: FailureKind) {
        match outcome {
            FailureKind::DependencyDown => match self.state {
                BreakerState::Closed => {
                    self.recent_failures.push_back(now);
                    self.prune_at(now);
                    if self.recent_failures.len() >= self.config.failure_threshold {
                        self.trip(now);
                    }
                }
                BreakerState::HalfOpen => {
                    // Probe failed, go straight back to open with a fresh cooldown
                    self.trip(now);
                }
                BreakerState::Open => {}
            },
            FailureKind::None => {
                if self.state == BreakerState::HalfOpen {
                    self.recent_failures.clear();
                    self.opened_at = None;
                    self.transition(BreakerState::Closed);
                }
            }
            // Transient/Permanent/Fatal say nothing about the dependency
            _ => {}
        }
    }

    fn prune_at(&mut self, now: Instant) {
        while let Some(oldest) = self.recent_failures.front() {
            if now.duration_since(*oldest) > self.config.rolling_window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.opened_at = Some(now);
        self.transition(BreakerState::Open);
    }

    fn transition(&mut self, to: BreakerState) {
        let from = self.state;
        self.state = to;
        metrics::counter!(BREAKER_TRANSITIONS, "to" => to.as_str()).increment(1);
        match to {
            BreakerState::Open => warn!(
                "circuit breaker tripped ({} -> open) after {} dependency failures",
                from.as_str(),
                self.recent_failures.len()
            ),
            _ => info!(
                "circuit breaker {} -> {}",
                from.as_str(),
                to.as_str()
            ),
        }
    }
}
