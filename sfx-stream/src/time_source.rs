//! Tick sources
//!
//! Everything in the streaming pipeline measures time in integer ticks
//! (milliseconds). A [`TimeSource`] answers "what tick is it now" for
//! whatever clock a component is bound to: the wall clock, a device voice's
//! playback cursor, or a test-controlled manual clock.

use sfx_common::timing::TICKS_PER_SECOND;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic tick counter
pub trait TimeSource: Send + Sync {
    /// Current tick
    fn tick(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn tick(&self) -> u64 {
        (**self).tick()
    }
}

/// Wall clock measured from construction
#[derive(Debug, Clone)]
pub struct RealTimeSource {
    origin: Instant,
}

impl RealTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for RealTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for RealTimeSource {
    fn tick(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_secs() * TICKS_PER_SECOND + u64::from(elapsed.subsec_millis())
    }
}

/// Clock that only moves when told to
///
/// Share it as `Arc<ManualClock>` between the system under test and the test
/// body; both see the same tick.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(tick: u64) -> Self {
        Self {
            ticks: AtomicU64::new(tick),
        }
    }

    pub fn set(&self, tick: u64) {
        self.ticks.store(tick, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn tick(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// Stopwatch for sources playing without a device voice
///
/// Runs against an external clock. The elapsed value survives pause and
/// resume; `reset` returns it to zero.
#[derive(Debug, Clone, Default)]
pub struct PlayTimer {
    started_at: Option<u64>,
    accumulated: u64,
}

impl PlayTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start(&mut self, clock: &dyn TimeSource) {
        if self.started_at.is_none() {
            self.started_at = Some(clock.tick());
        }
    }

    pub fn pause(&mut self, clock: &dyn TimeSource) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated += clock.tick().saturating_sub(started_at);
        }
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.accumulated = 0;
    }

    /// Jump to `ticks`, keeping the running state
    pub fn set_position(&mut self, ticks: u64, clock: &dyn TimeSource) {
        self.accumulated = ticks;
        if self.started_at.is_some() {
            self.started_at = Some(clock.tick());
        }
    }

    /// Elapsed ticks
    pub fn position(&self, clock: &dyn TimeSource) -> u64 {
        let running = self
            .started_at
            .map(|started_at| clock.tick().saturating_sub(started_at))
            .unwrap_or(0);
        self.accumulated + running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::starting_at(5);
        clock.advance(10);
        assert_eq!(clock.tick(), 15);
        clock.set(3);
        assert_eq!(clock.tick(), 3);
    }

    #[test]
    fn test_arc_forwards() {
        let clock = Arc::new(ManualClock::starting_at(42));
        let shared: Arc<dyn TimeSource> = clock.clone();
        assert_eq!(shared.tick(), 42);
    }

    #[test]
    fn test_play_timer_pause_resume() {
        let clock = ManualClock::new();
        let mut timer = PlayTimer::new();

        timer.start(&clock);
        clock.advance(300);
        assert_eq!(timer.position(&clock), 300);

        timer.pause(&clock);
        clock.advance(1000);
        assert_eq!(timer.position(&clock), 300);
        assert!(!timer.is_running());

        timer.start(&clock);
        clock.advance(200);
        assert_eq!(timer.position(&clock), 500);

        timer.reset();
        assert_eq!(timer.position(&clock), 0);
    }

    #[test]
    fn test_play_timer_set_position_while_running() {
        let clock = ManualClock::starting_at(1000);
        let mut timer = PlayTimer::new();
        timer.start(&clock);
        clock.advance(50);

        timer.set_position(2000, &clock);
        assert_eq!(timer.position(&clock), 2000);
        clock.advance(10);
        assert_eq!(timer.position(&clock), 2010);
    }

    #[test]
    fn test_start_twice_keeps_origin() {
        let clock = ManualClock::new();
        let mut timer = PlayTimer::new();
        timer.start(&clock);
        clock.advance(100);
        timer.start(&clock);
        assert_eq!(timer.position(&clock), 100);
    }
}
