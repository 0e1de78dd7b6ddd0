//! The `Event` handle and its `Future` impl.
//!
//! The teacher's `Effect<T>::Wait`/`Yield(ProcessId)` pushed a `(ProcessId,
//! ...)` pair straight onto the generator's resume channel. Stable Rust has
//! no generator resume channel to hijack, so here a process body is plain
//! `async fn(Environment) -> Result<Value, Value>` and every yield point is
//! just `.await`ing an `Event`. `Event::poll` is where the spec's "process
//! resume" behaviour (§4.4) actually lives: check for a pending interrupt
//! first, then check whether the awaited event has fired, and only then
//! register a wake-up.

use std::cell::Cell;
use std::future::Future;
use std::ops::{BitAnd, BitOr};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::condition::{self, Predicate};
use crate::env::{EventKind, Priority};
use crate::error::{SimError, SimResult};
use crate::value::Value;
use crate::Environment;

/// A handle to a node in the event graph. Cheap to clone; all state lives
/// in the owning `Environment`'s arena.
#[derive(Clone)]
pub struct Event {
    pub(crate) env: Environment,
    pub(crate) id: crate::ids::EventId,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("id", &self.id).finish()
    }
}

impl Event {
    /// Allocate a brand new, untriggered, plain event.
    pub fn new(env: &Environment) -> Event {
        let id = env.alloc_event(EventKind::Plain);
        Event { env: env.clone(), id }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// True once the event has a value (triggered), whether or not it has
    /// been processed yet.
    pub fn is_triggered(&self) -> bool {
        self.env.is_triggered(self.id)
    }

    /// True once the event's callbacks have run; the terminal state.
    pub fn is_processed(&self) -> bool {
        self.env.is_processed(self.id)
    }

    /// Schedule this event to succeed at the current time with `priority`.
    pub fn succeed(&self, value: Value) -> SimResult<()> {
        self.env.try_succeed(self.id, Priority::Normal, value)
    }

    /// Schedule this event to fail at the current time.
    pub fn fail(&self, value: Value) -> SimResult<()> {
        self.env.try_fail(self.id, Priority::Normal, value)
    }

    /// Copy another, already-triggered event's outcome onto this one.
    /// Errors with `SourceNotTriggered` if `source` hasn't fired yet.
    pub fn trigger(&self, source: &Event) -> SimResult<()> {
        let (ok, value) = {
            let events = source.env.0.events.borrow();
            let rec = &events[source.id];
            match rec.ok {
                Some(ok) => (ok, rec.value.clone().expect("triggered event without a value")),
                None => return Err(SimError::SourceNotTriggered),
            }
        };
        if ok {
            self.env.try_succeed(self.id, Priority::Normal, value)
        } else {
            self.env.try_fail(self.id, Priority::Normal, value)
        }
    }

    /// Register a callback to run when this event is processed. Errors if
    /// the event has already been processed.
    pub fn add_callback(&self, cb: impl FnOnce(&Environment, crate::ids::EventId) + 'static) -> SimResult<()> {
        self.env.try_add_callback(self.id, Box::new(cb))
    }

    /// An `AllOf` condition over `self` and `other` (spec §4.3). Chained
    /// combinators flatten: if either operand is itself an `AllOf`, its
    /// children are merged in directly rather than nested, so
    /// `(a & b) & c` produces one 3-way `AllOf` over `{a, b, c}`.
    pub fn and(&self, other: &Event) -> Event {
        let children = flatten_operands(&self.env, Predicate::All, &[self.clone(), other.clone()]);
        condition::build(&self.env, Predicate::All, children)
    }

    /// An `AnyOf` condition over `self` and `other` (spec §4.3). Flattens
    /// the same way `and` does, for the `Any` predicate.
    pub fn or(&self, other: &Event) -> Event {
        let children = flatten_operands(&self.env, Predicate::Any, &[self.clone(), other.clone()]);
        condition::build(&self.env, Predicate::Any, children)
    }
}

/// Expand any operand that is itself a same-predicate `Condition` into its
/// own children, one level at a time; since each `Condition`'s children are
/// already fully flattened at its own construction, this yields full
/// flattening transitively.
fn flatten_operands(env: &Environment, predicate: Predicate, operands: &[Event]) -> Vec<Event> {
    let mut out = Vec::with_capacity(operands.len());
    for op in operands {
        let merged = if env.kind_of(op.id) == EventKind::Condition {
            env.condition_children(op.id).filter(|(p, kids)| *p == predicate && !kids.is_empty())
        } else {
            None
        };
        match merged {
            Some((_, kids)) => out.extend(kids.into_iter().map(|id| Event { env: env.clone(), id })),
            None => out.push(op.clone()),
        }
    }
    out
}

impl BitAnd for Event {
    type Output = Event;
    fn bitand(self, rhs: Event) -> Event {
        self.and(&rhs)
    }
}

impl BitOr for Event {
    type Output = Event;
    fn bitor(self, rhs: Event) -> Event {
        self.or(&rhs)
    }
}

impl Future for Event {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let env = self.env.clone();
        let id = self.id;

        let pid = match env.active_process() {
            Some(pid) => pid,
            None => {
                // No process belonging to *this event's own* environment is
                // currently resuming. The only way to reach this poll is if
                // a process from a different `Environment` awaited an event
                // it doesn't own (spec §4.1 "Require e is an Event owned by
                // the same env").
                return Poll::Ready(Err(Value::new(SimError::InvalidYield)));
            }
        };

        if let Some(interrupt) = env.take_pending_interrupt(pid) {
            return Poll::Ready(Err(interrupt));
        }

        if env.is_processed(id) {
            let (ok, value) = env.observe_result(id);
            return if ok { Poll::Ready(Ok(value)) } else { Poll::Ready(Err(value)) };
        }

        let waker = cx.waker().clone();
        let cancel = Rc::new(Cell::new(false));
        env.set_awaiting(pid, cancel.clone());
        let registered = env.try_add_callback(
            id,
            Box::new(move |_env, _id| {
                if !cancel.get() {
                    waker.wake();
                }
            }),
        );
        match registered {
            Ok(()) => Poll::Pending,
            Err(_) => {
                // Processed between the check above and now (e.g. a
                // reentrant callback fired it); read the result instead.
                let (ok, value) = env.observe_result(id);
                if ok {
                    Poll::Ready(Ok(value))
                } else {
                    Poll::Ready(Err(value))
                }
            }
        }
    }
}

/// An event that is triggered now, but scheduled to fire (be processed)
/// `delay` simulated time units from now, carrying `value`.
pub fn timeout(env: &Environment, delay: f64, value: Value) -> Event {
    assert!(delay >= 0.0, "timeout delay must be non-negative");
    let id = env.alloc_event(EventKind::Timeout);
    env.succeed_delayed_raw(id, Priority::Normal, value, delay);
    Event { env: env.clone(), id }
}
