// Volume ramps and the clock they run on.
//
// A `Fade` is a timed record: start and end volume, the clock time it began,
// a step count and a per-step delay. Its values are a linear ramp that lands
// exactly on the target at the last step. `run_fade` plays a fade against an
// engine on the driver's `Clock`: each step is sent when it falls due, with
// the level the record gives for the current clock time, and the stop flag
// is checked before every step, so a cancelled performance never leaves a
// ramp half-serviced for longer than one step.
//
// `SystemClock` sleeps for real. `ManualClock` only advances a shared
// counter, which lets tests run a whole performance instantly and lets the
// command-log engine stamp commands with virtual time.

use crate::engine::AudioEngine;
use crate::error::{ConductorError, Result};
use crate::instrument::InstrumentId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared cancellation flag, set from a signal handler.
pub type StopFlag = Arc<AtomicBool>;

pub fn stop_requested(stop: &AtomicBool) -> bool {
    stop.load(Ordering::SeqCst)
}

/// Time source for the driver and anything that stamps engine commands.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time; `sleep` blocks the thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual time. Clones share the same counter, so the driver's clock and
/// the engine's clock stay in step.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// A linear volume ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    pub from: f64,
    pub to: f64,
    /// Clock time at which the ramp begins.
    pub started: Duration,
    pub steps: u32,
    pub step_delay: Duration,
}

impl Fade {
    pub fn new(from: f64, to: f64, started: Duration, steps: u32, step_delay: Duration) -> Self {
        Fade {
            from,
            to,
            started,
            steps: steps.max(1),
            step_delay,
        }
    }

    /// Volume after step `step` (0-based). The last step is exactly `to`.
    pub fn value_at(&self, step: u32) -> f64 {
        let step = step.min(self.steps - 1);
        if step + 1 == self.steps {
            return self.to;
        }
        self.from + (self.to - self.from) * f64::from(step + 1) / f64::from(self.steps)
    }

    /// Every value the ramp sends, in order.
    pub fn values(&self) -> Vec<f64> {
        (0..self.steps).map(|i| self.value_at(i)).collect()
    }

    /// Total time the ramp occupies.
    pub fn duration(&self) -> Duration {
        self.step_delay * self.steps
    }

    /// Clock time at which step `step` is due.
    pub fn step_due(&self, step: u32) -> Duration {
        self.started + self.step_delay * step
    }

    /// Clock time at which the ramp is complete.
    pub fn ends(&self) -> Duration {
        self.started + self.duration()
    }

    /// Volume the ramp has reached at clock time `now`: `from` before it
    /// starts, the value of the latest due step while it runs, `to` once it
    /// is complete. A ramp with no step delay completes instantly.
    pub fn level(&self, now: Duration) -> f64 {
        if now < self.started {
            return self.from;
        }
        if self.step_delay.is_zero() || now >= self.ends() {
            return self.to;
        }
        let done = (now - self.started).as_nanos() / self.step_delay.as_nanos();
        self.value_at(u32::try_from(done).unwrap_or(self.steps))
    }
}

/// Play `fade` on `id`: one volume command per step, each sent when the step
/// is due and carrying the level the ramp has reached by then, so a late
/// clock catches up instead of drifting. Returns once the ramp has ended, or
/// with `Cancelled` as soon as the stop flag is seen.
pub fn run_fade(
    engine: &mut impl AudioEngine,
    clock: &impl Clock,
    stop: &AtomicBool,
    id: InstrumentId,
    fade: &Fade,
) -> Result<()> {
    for step in 0..fade.steps {
        if stop_requested(stop) {
            return Err(ConductorError::Cancelled);
        }
        sleep_until(clock, fade.step_due(step));
        engine.set_volume(id, fade.level(clock.now()))?;
    }
    sleep_until(clock, fade.ends());
    Ok(())
}

fn sleep_until(clock: &impl Clock, at: Duration) {
    let now = clock.now();
    if now < at {
        clock.sleep(at - now);
    }
}
