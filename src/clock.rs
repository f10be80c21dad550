use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of capture timestamps.
///
/// `now_ns` orders packets and feeds durations; `now_iso` is for display only.
/// The two are read independently and may disagree slightly.
pub trait Clock {
    fn now_ns(&self) -> i64;
    fn now_iso(&self) -> String;
}

struct Anchor {
    instant: Instant,
    epoch_ns: i64,
}

// One anchor per process so every logger shares the same monotonic timeline.
static ANCHOR: LazyLock<Anchor> = LazyLock::new(|| Anchor {
    instant: Instant::now(),
    epoch_ns: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64,
});

/// Monotonic nanoseconds anchored to the wall clock at first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        ANCHOR.epoch_ns + ANCHOR.instant.elapsed().as_nanos() as i64
    }

    fn now_iso(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Deterministic clock: every reading advances by `step_ns`.
#[derive(Debug)]
pub struct ManualClock {
    next_ns: AtomicI64,
    last_ns: AtomicI64,
    step_ns: i64,
}

impl ManualClock {
    pub fn new(start_ns: i64, step_ns: i64) -> Self {
        Self {
            next_ns: AtomicI64::new(start_ns),
            last_ns: AtomicI64::new(start_ns),
            step_ns,
        }
    }

    /// Pin the next reading to `ns`.
    pub fn set(&self, ns: i64) {
        self.next_ns.store(ns, Ordering::SeqCst);
    }

    pub fn peek(&self) -> i64 {
        self.next_ns.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        let ns = self.next_ns.fetch_add(self.step_ns, Ordering::SeqCst);
        self.last_ns.store(ns, Ordering::SeqCst);
        ns
    }

    /// Renders the reading last returned by `now_ns`.
    fn now_iso(&self) -> String {
        iso_from_ns(self.last_ns.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ns(&self) -> i64 {
        (**self).now_ns()
    }

    fn now_iso(&self) -> String {
        (**self).now_iso()
    }
}

/// RFC 3339 UTC with millisecond precision, e.g. `2025-01-31T09:15:00.123Z`.
pub fn iso_from_ns(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(ns).to_rfc3339_opts(SecondsFormat::Millis, true)
}
