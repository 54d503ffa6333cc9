//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: destination assumed down, requests fail fast
//! - Half-Open: one probe request is testing recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: break duration elapsed, first caller becomes the probe
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per destination, owned by [`BreakerRegistry`]
//! - State and open timestamp share one `AtomicU64`, so every transition is a
//!   single compare-and-swap and exactly one caller wins it
//! - A probe permit dropped without an outcome reopens the probe slot

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::observability::{TelemetryEvent, TelemetrySink};

const CLOSED: u64 = 0;
const OPEN: u64 = 1;
const HALF_OPEN: u64 = 2;
const STATE_MASK: u64 = 0b11;

fn pack(state: u64, opened_ms: u64) -> u64 {
    (opened_ms << 2) | state
}

fn unpack(word: u64) -> (u64, u64) {
    (word & STATE_MASK, word >> 2)
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_bits(bits: u64) -> Self {
        match bits {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for {destination}")]
pub struct CircuitOpen {
    pub destination: String,
    /// Time until a probe will be admitted; `None` while a probe is in flight.
    pub retry_in: Option<Duration>,
}

/// Point-in-time view of a breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub destination: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened, while not closed.
    pub opened_ms_ago: Option<u64>,
    pub probe_in_flight: bool,
}

/// Breaker for a single destination.
pub struct CircuitBreaker {
    destination: String,
    /// `opened_at_ms << 2 | state`.
    word: AtomicU64,
    consecutive_failures: AtomicU32,
    epoch: Instant,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CircuitBreaker {
    pub fn new(destination: impl Into<String>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            destination: destination.into(),
            word: AtomicU64::new(pack(CLOSED, 0)),
            consecutive_failures: AtomicU32::new(0),
            epoch: Instant::now(),
            telemetry,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_bits(unpack(self.word.load(Ordering::Acquire)).0)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX >> 2)
    }

    /// Ask to dispatch one call.
    ///
    /// Closed circuits always admit. An open circuit whose break duration has
    /// elapsed admits exactly one caller as the half-open probe; everyone else
    /// gets [`CircuitOpen`] without touching the network.
    pub fn try_acquire(
        self: &Arc<Self>,
        break_duration: Duration,
    ) -> Result<BreakerPermit, CircuitOpen> {
        let break_ms = u64::try_from(break_duration.as_millis()).unwrap_or(u64::MAX);
        loop {
            let word = self.word.load(Ordering::Acquire);
            let (state, opened_ms) = unpack(word);
            match state {
                CLOSED => return Ok(BreakerPermit::new(self.clone(), None)),
                OPEN => {
                    let elapsed = self.now_ms().saturating_sub(opened_ms);
                    if elapsed < break_ms {
                        return Err(self.open_error(Some(Duration::from_millis(break_ms - elapsed))));
                    }
                    let probe = pack(HALF_OPEN, opened_ms);
                    if self
                        .word
                        .compare_exchange(word, probe, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.transition(BreakerState::Open, BreakerState::HalfOpen);
                        return Ok(BreakerPermit::new(self.clone(), Some(probe)));
                    }
                    // Lost the race; re-read and most likely fail fast.
                }
                _ => return Err(self.open_error(None)),
            }
        }
    }

    fn open_error(&self, retry_in: Option<Duration>) -> CircuitOpen {
        CircuitOpen {
            destination: self.destination.clone(),
            retry_in,
        }
    }

    fn on_success(&self, probe: Option<u64>) {
        self.consecutive_failures.store(0, Ordering::Release);
        if let Some(probe) = probe {
            if self
                .word
                .compare_exchange(probe, pack(CLOSED, 0), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.transition(BreakerState::HalfOpen, BreakerState::Closed);
            }
        }
    }

    fn on_failure(&self, probe: Option<u64>, threshold: u32) {
        if let Some(probe) = probe {
            let reopened = pack(OPEN, self.now_ms());
            if self
                .word
                .compare_exchange(probe, reopened, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.transition(BreakerState::HalfOpen, BreakerState::Open);
            }
            return;
        }

        if unpack(self.word.load(Ordering::Acquire)).0 != CLOSED {
            // Late result from a call admitted before the circuit opened.
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= threshold.max(1) {
            let opened = pack(OPEN, self.now_ms());
            if self
                .word
                .compare_exchange(pack(CLOSED, 0), opened, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::debug!(
                    destination = %self.destination,
                    failures,
                    threshold,
                    "Failure threshold reached"
                );
                self.transition(BreakerState::Closed, BreakerState::Open);
            }
        }
    }

    fn abandon_probe(&self, probe: u64) {
        let (_, opened_ms) = unpack(probe);
        if self
            .word
            .compare_exchange(probe, pack(OPEN, opened_ms), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(destination = %self.destination, "Probe abandoned, slot reopened");
        }
    }

    fn transition(&self, from: BreakerState, to: BreakerState) {
        self.telemetry.emit(TelemetryEvent::CircuitTransition {
            destination: self.destination.clone(),
            from,
            to,
        });
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let (state, opened_ms) = unpack(self.word.load(Ordering::Acquire));
        CircuitSnapshot {
            destination: self.destination.clone(),
            state: BreakerState::from_bits(state),
            consecutive_failures: self.consecutive_failures(),
            opened_ms_ago: (state != CLOSED).then(|| self.now_ms().saturating_sub(opened_ms)),
            probe_in_flight: state == HALF_OPEN,
        }
    }
}

/// Admission ticket for one call. Report the outcome with
/// [`BreakerPermit::success`] or [`BreakerPermit::failure`].
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: Option<u64>,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self, threshold: u32) {
        self.settled = true;
        self.breaker.on_failure(self.probe, threshold);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            if let Some(probe) = self.probe {
                self.breaker.abandon_probe(probe);
            }
        }
    }
}

/// Exactly one breaker per destination, created on first use.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BreakerRegistry {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            breakers: DashMap::new(),
            telemetry,
        }
    }

    pub fn get(&self, destination: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(destination) {
            return breaker.clone();
        }
        self.breakers
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(destination, self.telemetry.clone())))
            .clone()
    }

    /// Snapshots of every known breaker, sorted by destination.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.destination.cmp(&b.destination));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::telemetry::RecordingTelemetry;
    use std::sync::Barrier;

    const BREAK: Duration = Duration::from_secs(30);

    fn breaker() -> (Arc<CircuitBreaker>, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        (Arc::new(CircuitBreaker::new("chat/new", telemetry.clone())), telemetry)
    }

    fn fail(breaker: &Arc<CircuitBreaker>, n: u32) {
        for _ in 0..n {
            breaker.try_acquire(BREAK).unwrap().failure(5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let (breaker, _) = breaker();
        fail(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 4);

        fail(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.try_acquire(BREAK).err().unwrap();
        assert_eq!(err.retry_in, Some(BREAK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let (breaker, _) = breaker();
        fail(&breaker, 4);
        breaker.try_acquire(BREAK).unwrap().success();
        fail(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let (breaker, telemetry) = breaker();
        fail(&breaker, 5);

        tokio::time::advance(BREAK).await;
        let probe = breaker.try_acquire(BREAK).unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire(BREAK).is_err(), "second caller must fail fast");

        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);

        let transitions: Vec<_> = telemetry
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::CircuitTransition { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            [BreakerState::Open, BreakerState::HalfOpen, BreakerState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_restarts_timer() {
        let (breaker, _) = breaker();
        fail(&breaker, 5);

        tokio::time::advance(BREAK).await;
        breaker.try_acquire(BREAK).unwrap().failure(5);
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(BREAK - Duration::from_secs(1)).await;
        assert!(breaker.try_acquire(BREAK).is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire(BREAK).unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_reopens_slot() {
        let (breaker, _) = breaker();
        fail(&breaker, 5);
        tokio::time::advance(BREAK).await;

        drop(breaker.try_acquire(BREAK).unwrap());
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire(BREAK).unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_open_is_ignored() {
        let (breaker, _) = breaker();
        let straggler = breaker.try_acquire(BREAK).unwrap();
        fail(&breaker, 5);
        straggler.failure(5);
        assert_eq!(breaker.consecutive_failures(), 5);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_exactly_one_concurrent_probe() {
        let (breaker, _) = breaker();
        let short = Duration::from_millis(20);
        for _ in 0..5 {
            breaker.try_acquire(short).unwrap().failure(5);
        }
        std::thread::sleep(Duration::from_millis(40));

        let callers = 32;
        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let breaker = breaker.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Keep the permit alive until the count is taken.
                    breaker.try_acquire(short).ok()
                })
            })
            .collect();
        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 1);
        assert!(permits[0].is_probe());
    }

    #[test]
    fn test_registry_returns_same_breaker() {
        let registry = BreakerRegistry::new(Arc::new(RecordingTelemetry::default()));
        let a = registry.get("chat/new");
        let b = registry.get("chat/new");
        let c = registry.get("chat/legacy");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.destination).collect();
        assert_eq!(names, ["chat/legacy", "chat/new"]);
    }
}
