//! Wall-clock-paced environment (spec §4.1, the "Realtime variant").
//!
//! The teacher and the rest of this crate step a simulation as fast as the
//! host can go; this wraps an [`Environment`] so `step`/`run` instead pace
//! themselves against the wall clock, sleeping between events the way a
//! live demo or a hardware-in-the-loop test needs. Grounded on
//! `examples/gretchenfrage-notminecraft`'s `TickMgr` (tracks an `Instant`
//! baseline and compares it to wall-clock elapsed time to decide whether a
//! tick is on schedule or running behind) and the pack's established
//! `thread::sleep(Duration::...)` idiom for pacing a loop.

use std::time::{Duration, Instant};

use crate::env::{EventKind, Priority, RunUntil};
use crate::error::{SimError, SimResult};
use crate::value::Value;
use crate::Environment;

/// Paces an `Environment`'s `step()`/`run()` against the wall clock: one
/// simulated time unit takes `1.0 / factor` wall-clock seconds. In `strict`
/// mode, a step that's already overdue by the time it's reached fails with
/// [`SimError::RealtimeOverrun`] instead of silently running behind.
pub struct RealtimeEnvironment {
    env: Environment,
    factor: f64,
    strict: bool,
    wall_start: Instant,
    sim_start: f64,
}

impl RealtimeEnvironment {
    /// Wrap `env`, pacing it at `factor` simulated-seconds per wall second,
    /// starting from `env`'s current simulated time and the current instant.
    pub fn new(env: Environment, factor: f64, strict: bool) -> Self {
        assert!(factor > 0.0, "realtime factor must be positive");
        let sim_start = env.now();
        RealtimeEnvironment {
            env,
            factor,
            strict,
            wall_start: Instant::now(),
            sim_start,
        }
    }

    /// The wrapped environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn due_at(&self, sim_time: f64) -> Instant {
        self.wall_start + Duration::from_secs_f64(((sim_time - self.sim_start) / self.factor).max(0.0))
    }

    /// Sleep, if necessary, until the wall clock has caught up to the next
    /// scheduled event's simulated time, then advance the simulation by one
    /// event firing the same way `Environment::step` does.
    pub fn step(&self) -> SimResult<()> {
        let next = self.env.peek();
        if next.is_finite() {
            let due = self.due_at(next);
            let now = Instant::now();
            if now < due {
                std::thread::sleep(due - now);
            } else if self.strict && now > due {
                return Err(SimError::RealtimeOverrun);
            }
        }
        self.env.step()
    }

    /// Run the simulation until `until` is satisfied, pacing every step
    /// against the wall clock the way `step` does.
    pub fn run(&self, until: RunUntil) -> SimResult<()> {
        match until {
            RunUntil::Forever => self.run_forever(),
            RunUntil::Time(t) => self.run_until_time(t),
            RunUntil::Event(ev) => self.run_until_event(ev),
        }
    }

    fn run_forever(&self) -> SimResult<()> {
        loop {
            match self.step() {
                Ok(()) => continue,
                Err(SimError::EmptyQueue) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn run_until_time(&self, t: f64) -> SimResult<()> {
        if t < self.env.now() {
            return Err(SimError::InvalidUntil);
        }
        let marker = self.env.alloc_event(EventKind::Plain);
        self.env.succeed_delayed_raw(marker, Priority::Urgent, Value::unit(), t - self.env.now());
        loop {
            if self.env.is_processed(marker) {
                return Ok(());
            }
            match self.step() {
                Ok(()) => continue,
                Err(SimError::EmptyQueue) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn run_until_event(&self, ev: crate::event::Event) -> SimResult<()> {
        loop {
            if self.env.is_processed(ev.id) {
                let (ok, value) = self.env.observe_result(ev.id);
                return if ok { Ok(()) } else { Err(SimError::UnhandledProcessFailure(value)) };
            }
            match self.step() {
                Ok(()) => continue,
                Err(SimError::EmptyQueue) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
