//! Coarse shared timer facility.
//!
//! Sessions never create timers of their own kind. Every cron tick, grace
//! period and write backpressure wait goes through one process-wide
//! [`TimerWheel`], passed to each session by reference.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tokio::time::Instant;

/// One-shot timer future returned by [`TimerWheel::after`].
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Schedule-once timer capability.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - A future returned by `after(d)` completes no earlier than `d` after the
///   call, and completes exactly once
pub trait TimerWheel: Send + Sync + 'static {
    /// Current time reference.
    fn now(&self) -> Instant;

    /// Future that fires once after `delay` has elapsed.
    fn after(&self, delay: Duration) -> Sleep;
}

/// Timer wheel with fixed tick granularity and bounded maximum span.
///
/// Delays are rounded up to a whole number of ticks (at least one) and
/// clamped to `tick * slots`. Built on the tokio timer, so a paused test
/// clock drives it like any other tokio sleep.
#[derive(Debug, Clone, Copy)]
pub struct TickWheel {
    tick: Duration,
    slots: u32,
}

impl TickWheel {
    /// Default tick granularity
    pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

    /// Default slot count (two minutes of span at the default tick)
    pub const DEFAULT_SLOTS: u32 = 1200;

    /// Create a wheel.
    ///
    /// # Panics
    ///
    /// Panics if `tick` is zero or `slots` is zero.
    pub fn new(tick: Duration, slots: u32) -> Self {
        assert!(!tick.is_zero(), "timer wheel tick must be positive");
        assert!(slots > 0, "timer wheel needs at least one slot");
        Self { tick, slots }
    }

    /// Process-wide wheel shared by every session that is not given one
    /// explicitly.
    pub fn shared() -> Arc<dyn TimerWheel> {
        static WHEEL: OnceLock<Arc<TickWheel>> = OnceLock::new();
        let wheel = WHEEL.get_or_init(|| Arc::new(TickWheel::default()));
        Arc::clone(wheel) as Arc<dyn TimerWheel>
    }

    /// Tick granularity.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Longest delay the wheel will schedule.
    pub fn span(&self) -> Duration {
        self.tick * self.slots
    }

    /// Effective delay for a requested one.
    pub fn round(&self, delay: Duration) -> Duration {
        let tick_nanos = self.tick.as_nanos();
        let ticks = delay.as_nanos().div_ceil(tick_nanos).clamp(1, u128::from(self.slots));
        self.tick * ticks as u32
    }
}

impl Default for TickWheel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TICK, Self::DEFAULT_SLOTS)
    }
}

impl TimerWheel for TickWheel {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&self, delay: Duration) -> Sleep {
        let deadline = Instant::now() + self.round(delay);
        Box::pin(async move { tokio::time::sleep_until(deadline).await })
    }
}
