//! Error taxonomy for the simulation core.
//!
//! Mirrors the error table of the engine's design document: engine
//! programming errors (already-triggered events, malformed resource
//! requests, ...) are [`SimError`]; a process's own failure value is user
//! data and propagates as a [`Value`](crate::value::Value), never wrapped in
//! this enum, until it goes unhandled at the top of a run.

use thiserror::Error;

use crate::value::Value;

/// Errors raised by the simulation core itself, as opposed to failures
/// raised by user process code.
#[derive(Debug, Error)]
pub enum SimError {
    /// `Environment::step` was called with nothing left to schedule.
    #[error("the event queue is empty")]
    EmptyQueue,

    /// `succeed`/`fail`/`trigger` called on an event that already fired.
    #[error("event was already triggered")]
    EventAlreadyTriggered,

    /// `add_callback` (or an internal subscription) called on an event
    /// whose callbacks have already run.
    #[error("event has already been processed")]
    EventAlreadyProcessed,

    /// A process yielded something that isn't an event owned by this
    /// environment.
    #[error("process yielded a value that is not an event of this environment")]
    InvalidYield,

    /// A process failed and no parent or condition ever defused the
    /// failure; surfaced from `run`.
    #[error("unhandled process failure")]
    UnhandledProcessFailure(Value),

    /// `run(until = t)` was called with `t` before the current time.
    #[error("run(until) time is before the current simulation time")]
    InvalidUntil,

    /// A resource request was released a second time.
    #[error("resource request was already released")]
    DoubleRelease,

    /// An invalid priority/preempt combination was passed to a resource
    /// request.
    #[error("invalid resource request")]
    InvalidRequest,

    /// A strict realtime environment fell behind the wall clock.
    #[error("realtime simulation fell behind the wall clock")]
    RealtimeOverrun,

    /// `Process::interrupt` called on a process that has already
    /// terminated.
    #[error("cannot interrupt a process that has already terminated")]
    InterruptDone,

    /// `Event::trigger` called with a source event that has not fired yet.
    #[error("trigger source event has not been triggered")]
    SourceNotTriggered,
}

/// Convenience alias used throughout the crate for engine-level fallibility.
pub type SimResult<T> = Result<T, SimError>;
