//! Clock - monotonic time source with live, backtest and simulated modes,
//! plus a scheduler for delayed and recurring callbacks.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Add;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Dispatcher poll interval for scheduled events.
pub const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Opaque monotonic point in time produced by a [`Clock`].
///
/// Total order holds within one clock instance; comparing timestamps taken
/// from different clocks is meaningless. Serialized as ms since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    pub fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Duration since `earlier`; zero when `earlier` is in the future.
    pub fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos((self.0 - earlier.0).max(0) as u64)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, d: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(d.as_nanos() as i64))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Timestamp::from_millis)
    }
}

/// Clock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Real wall time
    Live,
    /// Virtual time advanced only by set_time/advance_time
    Backtest,
    /// Virtual time advanced by the dispatcher at a configurable rate
    Simulated,
}

type ScheduledCallback = Arc<dyn Fn() + Send + Sync>;

struct ScheduledEvent {
    at: Timestamp,
    interval: Option<Duration>,
    callback: ScheduledCallback,
}

struct ClockShared {
    mode: ClockMode,
    /// Virtual-time advance per wall second in SIMULATED mode.
    rate: f64,
    virtual_time: Mutex<Timestamp>,
    /// Monotonic floor for LIVE reads; wall clocks may step backwards.
    last_issued: AtomicI64,
    events: Mutex<Vec<ScheduledEvent>>,
    running: AtomicBool,
}

impl ClockShared {
    fn wall_now() -> Timestamp {
        Timestamp::from_nanos(Utc::now().timestamp_micros().saturating_mul(1_000))
    }

    fn now(&self) -> Timestamp {
        match self.mode {
            ClockMode::Live => {
                let ns = Self::wall_now().as_nanos();
                let floor = self.last_issued.fetch_max(ns, Ordering::AcqRel);
                Timestamp::from_nanos(ns.max(floor))
            }
            ClockMode::Backtest | ClockMode::Simulated => *self.virtual_time.lock(),
        }
    }

    /// Fire every due event. Callbacks run outside the event lock; a panic
    /// in one callback is caught and dropped, and a panicking recurring
    /// callback stays scheduled.
    fn run_due(&self) {
        let now = self.now();
        let mut fired: Vec<ScheduledCallback> = Vec::new();

        {
            let mut events = self.events.lock();
            let mut i = 0;
            while i < events.len() {
                if events[i].at <= now {
                    fired.push(events[i].callback.clone());
                    match events[i].interval {
                        Some(interval) => {
                            // Monotonic interval steps; missed deliveries
                            // are coalesced into a single firing.
                            let mut next = events[i].at + interval;
                            if next <= now {
                                next = now + interval;
                            }
                            events[i].at = next;
                            i += 1;
                        }
                        None => {
                            events.swap_remove(i);
                        }
                    }
                } else {
                    i += 1;
                }
            }
        }

        for callback in fired {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!("scheduled callback panicked; dropping");
            }
        }
    }
}

/// Time source and callback scheduler for the engine.
///
/// LIVE reads wall time; BACKTEST holds virtual time that moves only under
/// `set_time`/`advance_time`; SIMULATED virtual time is advanced by the
/// dispatcher thread at `rate` virtual seconds per wall second.
pub struct Clock {
    shared: Arc<ClockShared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Clock {
    pub fn new(mode: ClockMode) -> Self {
        Self::with_rate(mode, 1.0)
    }

    pub fn live() -> Self {
        Self::new(ClockMode::Live)
    }

    pub fn backtest() -> Self {
        Self::new(ClockMode::Backtest)
    }

    /// Simulated clock advancing `rate` virtual seconds per wall second.
    pub fn simulated(rate: f64) -> Self {
        Self::with_rate(ClockMode::Simulated, rate)
    }

    fn with_rate(mode: ClockMode, rate: f64) -> Self {
        let start = ClockShared::wall_now();
        Self {
            shared: Arc::new(ClockShared {
                mode,
                rate: if rate > 0.0 { rate } else { 1.0 },
                virtual_time: Mutex::new(start),
                last_issued: AtomicI64::new(start.as_nanos()),
                events: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.shared.mode
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn now(&self) -> Timestamp {
        self.shared.now()
    }

    pub fn now_ms(&self) -> i64 {
        self.now().as_millis()
    }

    pub fn now_ns(&self) -> i64 {
        self.now().as_nanos()
    }

    /// Deliver `callback` once, no earlier than now() + delay.
    pub fn schedule_once(&self, delay: Duration, callback: impl Fn() + Send + Sync + 'static) {
        let at = self.now() + delay;
        self.shared.events.lock().push(ScheduledEvent {
            at,
            interval: None,
            callback: Arc::new(callback),
        });
    }

    /// Deliver `callback` at now() + interval and then at monotonic interval
    /// steps. Missed steps are coalesced into at most one catch-up firing.
    pub fn schedule_recurring(
        &self,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        let at = self.now() + interval;
        self.shared.events.lock().push(ScheduledEvent {
            at,
            interval: Some(interval),
            callback: Arc::new(callback),
        });
    }

    /// Set virtual time. Silent no-op in LIVE mode. In BACKTEST mode due
    /// callbacks run synchronously on the calling thread, keeping backtests
    /// deterministic without a dispatcher.
    pub fn set_time(&self, time: Timestamp) {
        match self.shared.mode {
            ClockMode::Backtest => {
                *self.shared.virtual_time.lock() = time;
                self.shared.run_due();
            }
            ClockMode::Simulated => {
                *self.shared.virtual_time.lock() = time;
            }
            ClockMode::Live => {}
        }
    }

    /// Advance virtual time by `duration`. Silent no-op in LIVE mode.
    pub fn advance_time(&self, duration: Duration) {
        if self.shared.mode == ClockMode::Live {
            return;
        }
        let next = *self.shared.virtual_time.lock() + duration;
        self.set_time(next);
    }

    /// Start the dispatcher. Idempotent. LIVE and SIMULATED spawn a polling
    /// thread; BACKTEST fires callbacks from set_time/advance_time instead.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.shared.mode == ClockMode::Backtest {
            return;
        }

        let shared = self.shared.clone();
        let handle = std::thread::spawn(move || {
            let mut last_poll = Instant::now();
            while shared.running.load(Ordering::Acquire) {
                if shared.mode == ClockMode::Simulated {
                    let elapsed = last_poll.elapsed();
                    last_poll = Instant::now();
                    let step = elapsed.mul_f64(shared.rate);
                    let mut vt = shared.virtual_time.lock();
                    *vt = *vt + step;
                }
                shared.run_due();
                std::thread::sleep(POLL_INTERVAL);
            }
        });
        *self.dispatcher.lock() = Some(handle);
    }

    /// Stop the dispatcher and join it. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }

    /// Number of scheduled events still pending.
    pub fn pending_events(&self) -> usize {
        self.shared.events.lock().len()
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}

// Process-wide ambient clock. A convenience for call sites that have no
// engine handle (builders, demos); the engine itself always threads an
// explicit Arc<Clock>.
static AMBIENT: RwLock<Option<Arc<Clock>>> = RwLock::new(None);

/// Install a fresh ambient clock of the given mode and start it.
pub fn init_ambient(mode: ClockMode) -> Arc<Clock> {
    let clock = Arc::new(Clock::new(mode));
    clock.start();
    *AMBIENT.write() = Some(clock.clone());
    clock
}

/// The ambient clock, lazily defaulting to a LIVE clock (not started; LIVE
/// now() needs no dispatcher).
pub fn ambient() -> Arc<Clock> {
    if let Some(clock) = AMBIENT.read().as_ref() {
        return clock.clone();
    }
    let mut slot = AMBIENT.write();
    slot.get_or_insert_with(|| Arc::new(Clock::live())).clone()
}

/// Stop and remove the ambient clock.
pub fn clear_ambient() {
    if let Some(clock) = AMBIENT.write().take() {
        clock.stop();
    }
}
