//! Processes: futures driven by the environment's own step loop.
//!
//! `std::task::Wake` requires `Arc<W: Send + Sync>`, which doesn't fit an
//! engine built entirely on `Rc`/`RefCell` by design (spec §5: single
//! simulated thread, no locking). This hand-rolls the `RawWaker` vtable
//! instead, the same way `dioxus`'s single-threaded scheduler does for its
//! own `Rc`-based tasks (see `packages/core/src/scheduler/task.rs`,
//! `LocalTask::waker`). Soundness here rests on the same premise dioxus
//! relies on: the `Waker` never crosses a thread boundary, because nothing
//! in this crate spawns one.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

use crate::env::BoxedProcessFuture;
use crate::error::{SimError, SimResult};
use crate::event::Event;
use crate::ids::EventId;
use crate::value::Value;
use crate::Environment;

struct ProcessWaker {
    env: Environment,
    pid: EventId,
}

unsafe fn clone_raw(data: *const ()) -> RawWaker {
    let rc = Rc::from_raw(data as *const ProcessWaker);
    let cloned = rc.clone();
    std::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
}

unsafe fn wake_raw(data: *const ()) {
    let rc = Rc::from_raw(data as *const ProcessWaker);
    rc.env.resume_process(rc.pid);
}

unsafe fn wake_by_ref_raw(data: *const ()) {
    let rc = Rc::from_raw(data as *const ProcessWaker);
    rc.env.resume_process(rc.pid);
    std::mem::forget(rc);
}

unsafe fn drop_raw(data: *const ()) {
    drop(Rc::from_raw(data as *const ProcessWaker));
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

pub(crate) fn waker_for(env: Environment, pid: EventId) -> Waker {
    let data = Rc::new(ProcessWaker { env, pid });
    let raw = RawWaker::new(Rc::into_raw(data) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

/// A handle to a running (or finished) process. Equivalent to the event
/// that fires when the process returns or fails (spec §4.4: "A process IS
/// an Event").
#[derive(Clone)]
pub struct Process {
    pub(crate) event: Event,
}

impl Process {
    /// The event that resolves when this process terminates.
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn is_alive(&self) -> bool {
        self.event.environment().is_process_alive(self.event.id)
    }

    /// Deliver an interrupt to this process, carrying `cause` as the
    /// [`Interrupt`]'s payload. Fails with [`SimError::InterruptDone`] if
    /// the process has already terminated.
    pub fn interrupt(&self, cause: Value) -> SimResult<()> {
        let env = self.event.environment().clone();
        let pid = self.event.id;
        if !env.is_process_alive(pid) {
            return Err(SimError::InterruptDone);
        }
        let marker = env.alloc_event(crate::env::EventKind::Plain);
        let interrupt_value = Value::new(Interrupt { cause });
        env.try_add_callback(
            marker,
            Box::new(move |env, _id| {
                if env.is_process_alive(pid) {
                    env.deliver_interrupt(pid, interrupt_value);
                }
            }),
        )
        .expect("freshly allocated event cannot be processed");
        env.succeed_raw(marker, crate::env::Priority::Urgent, Value::unit());
        Ok(())
    }
}

/// The failure value a process observes when [`Process::interrupt`] forces
/// it to resume out of whatever it was awaiting.
pub struct Interrupt {
    pub cause: Value,
}

impl Environment {
    /// Start a process from an async body. The body always begins running
    /// on the *next* step, never synchronously inside this call (spec
    /// §4.4).
    pub fn process<F>(&self, body: impl FnOnce(Environment) -> F) -> Process
    where
        F: Future<Output = Result<Value, Value>> + 'static,
    {
        let pid = self.alloc_event(crate::env::EventKind::Process);
        let event = Event { env: self.clone(), id: pid };
        let fut: BoxedProcessFuture = Box::pin(body(self.clone()));
        self.spawn_process(pid, fut);
        Process { event }
    }
}

/// Convenience so process bodies written as plain async blocks don't need
/// to name `BoxedProcessFuture` themselves.
pub type ProcessFuture = Pin<Box<dyn Future<Output = Result<Value, Value>>>>;
