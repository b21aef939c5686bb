// Circuit breaker guarding one upstream model provider
//
// One instance per provider, shared by every request and tenant. All state
// changes happen under a single mutex so each call outcome produces exactly
// one transition. Time comes from `tokio::time` so tests can pause the clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default consecutive failures before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default open-state cooldown before a probe is allowed.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// A single state change, as reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Callback invoked (outside the lock) after every transition.
pub type TransitionObserver = Arc<dyn Fn(&str, Transition) + Send + Sync>;

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    pub state: BreakerState,
    /// Time until a probe may be attempted
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    observer: Option<TransitionObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            observer: None,
        }
    }

    /// Attach a transition observer.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask to place one outbound call.
    ///
    /// Closed always admits. Open rejects until the cooldown elapses, then
    /// moves to half-open and admits a single probe. Half-open rejects while
    /// the probe is outstanding.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, BreakerRejection> {
        let now = Instant::now();
        let mut transition = None;

        let result = {
            let mut inner = self.lock();
            match inner.state {
                BreakerState::Closed => Ok(false),
                BreakerState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed >= self.config.cooldown {
                        transition = Some(Self::set_state(&mut inner, BreakerState::HalfOpen));
                        inner.probe_in_flight = true;
                        Ok(true)
                    } else {
                        Err(BreakerRejection {
                            state: BreakerState::Open,
                            retry_after: self.config.cooldown - elapsed,
                        })
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.probe_in_flight {
                        Err(BreakerRejection {
                            state: BreakerState::HalfOpen,
                            retry_after: Duration::from_secs(1),
                        })
                    } else {
                        inner.probe_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };

        self.notify(transition);
        result.map(|probe| CallPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn record_success(&self, probe: bool) {
        let transition = {
            let mut inner = self.lock();
            inner.consecutive_failures = 0;
            if probe {
                inner.probe_in_flight = false;
            }
            if inner.state == BreakerState::HalfOpen && probe {
                inner.opened_at = None;
                Some(Self::set_state(&mut inner, BreakerState::Closed))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    fn record_failure(&self, probe: bool) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            if probe {
                inner.probe_in_flight = false;
            }
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.opened_at = Some(now);
                        Some(Self::set_state(&mut inner, BreakerState::Open))
                    } else {
                        None
                    }
                }
                BreakerState::HalfOpen if probe => {
                    inner.consecutive_failures += 1;
                    inner.opened_at = Some(now);
                    Some(Self::set_state(&mut inner, BreakerState::Open))
                }
                // Late outcomes from calls admitted before the breaker opened.
                _ => None,
            }
        };
        self.notify(transition);
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }

    fn set_state(inner: &mut BreakerInner, to: BreakerState) -> Transition {
        let from = inner.state;
        inner.state = to;
        Transition { from, to }
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        match transition.to {
            BreakerState::Open => tracing::error!(
                provider = %self.provider,
                from = %transition.from,
                "Circuit breaker OPENED"
            ),
            _ => tracing::info!(
                provider = %self.provider,
                from = %transition.from,
                to = %transition.to,
                "Circuit breaker transition"
            ),
        }
        if let Some(observer) = &self.observer {
            observer(&self.provider, transition);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // The inner state is plain data; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission ticket for one call. Settle it with `succeed` or `fail`.
///
/// Dropping an unsettled probe permit frees the half-open slot without
/// counting an outcome, so an abandoned request cannot wedge the breaker.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
