//! The environment: simulated clock, event queue, step loop, run loop.
//!
//! The teacher kept its `Simulation<T>` state behind `Rc<Context<T>>` so that
//! process closures (which must mutate simulation state from inside a
//! generator) could share it without a borrow checker fight. This module
//! keeps that shape — `Environment` is a cheap `Rc` handle around
//! `EnvInner`, whose fields are `RefCell`/`Cell` because the single-threaded
//! step discipline (spec §5) makes interior mutability sound without any
//! locking.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap};

use crate::condition::Predicate;
use crate::container::ContainerRecord;
use crate::error::{SimError, SimResult};
use crate::ids::{ContainerId, EventId, ResourceId, StoreId};
use crate::resource::ResourceRecord;
use crate::store::{FilterStoreRecord, StoreRecord};
use crate::value::Value;

/// The three scheduling ranks an event can be queued under. Equal-time
/// events are ordered `Urgent` first, `Low` last; `Ord`'s derive gives us
/// exactly that because the variants are declared in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Interrupts.
    Urgent,
    /// Timeouts, user triggers, everything else.
    Normal,
    /// Reserved.
    Low,
}

/// Simulated time. A thin `f64` wrapper that panics on `NaN` the same way
/// the teacher's `Event::cmp` did, since a bare `f64` can't key a
/// `BinaryHeap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTime(pub f64);

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or_else(|| panic!("simulated time was not comparable (NaN?)"))
    }
}

pub(crate) struct QueueEntry {
    pub(crate) time: SimTime,
    pub(crate) priority: Priority,
    pub(crate) seq: u64,
    pub(crate) event: EventId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.priority, self.seq).cmp(&(other.time, other.priority, other.seq))
    }
}

/// Which of the four tagged variants an event is, for observability and
/// dispatch. See design note [9]: "model events as tagged variants...
/// dispatch by tag" rather than a deep inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Plain,
    Timeout,
    Process,
    Condition,
    ResourceRequest,
    ResourceRelease,
    ContainerPut,
    ContainerGet,
    StorePut,
    StoreGet,
}

pub(crate) type Callback = Box<dyn FnOnce(&Environment, EventId)>;

pub(crate) struct EventRecord {
    pub(crate) kind: EventKind,
    /// `None` until triggered; `Some(true)` for success, `Some(false)` for
    /// failure.
    pub(crate) ok: Option<bool>,
    pub(crate) value: Option<Value>,
    /// `None` once processed (the terminal state); `Some(_)` otherwise,
    /// whether or not the event has been triggered yet.
    pub(crate) callbacks: Option<Vec<Callback>>,
    pub(crate) defused: bool,
}

impl EventRecord {
    fn pending(kind: EventKind) -> Self {
        EventRecord {
            kind,
            ok: None,
            value: None,
            callbacks: Some(Vec::new()),
            defused: false,
        }
    }
}

pub(crate) type BoxedProcessFuture = Pin<Box<dyn Future<Output = Result<Value, Value>>>>;

/// What a process is currently suspended on: the child event's id and a
/// flag that, when set, makes a stale wake-up on that child a no-op. Used
/// to cancel a pending await when an interrupt forces a process to resume
/// somewhere else (spec §4.4): instead of physically removing the resume
/// closure from the child's callback list, the closure checks this flag
/// before waking, which has the same observable effect without requiring
/// indexed removal from a `Vec<Box<dyn FnOnce>>`.
pub(crate) struct Awaiting {
    pub(crate) cancel: Rc<Cell<bool>>,
}

pub(crate) struct EnvInner {
    pub(crate) now: Cell<f64>,
    counter: Cell<u64>,
    queue: RefCell<BinaryHeap<Reverse<QueueEntry>>>,
    pub(crate) events: RefCell<SlotMap<EventId, EventRecord>>,
    processes: RefCell<SecondaryMap<EventId, RefCell<Option<BoxedProcessFuture>>>>,
    awaiting: RefCell<SecondaryMap<EventId, Awaiting>>,
    pending_interrupts: RefCell<SecondaryMap<EventId, Vec<Value>>>,
    active_process: Cell<Option<EventId>>,
    trace_hook: RefCell<Option<Box<dyn FnMut(f64, EventId)>>>,
    resources: RefCell<SlotMap<ResourceId, ResourceRecord>>,
    containers: RefCell<SlotMap<ContainerId, ContainerRecord>>,
    stores: RefCell<SlotMap<StoreId, StoreRecord>>,
    filter_stores: RefCell<SlotMap<StoreId, FilterStoreRecord>>,
    /// Predicate and flattened child ids of every `Condition` ever built,
    /// so `Event::and`/`Event::or` can merge a same-predicate operand's
    /// children in directly instead of nesting (spec §4.2 "chained
    /// combinators flatten").
    conditions: RefCell<SecondaryMap<EventId, (Predicate, Vec<EventId>)>>,
}

/// Owns the simulated clock, the event queue and the event-id arena, and
/// drives the step/run loop. Cheap to clone — it's a handle, like the
/// teacher's `Rc<Context<T>>`.
#[derive(Clone)]
pub struct Environment(pub(crate) Rc<EnvInner>);

/// Which condition ends `Environment::run`. Mirrors the teacher's
/// `EndCondition`, minus `NSteps` (not part of this spec's run contract) and
/// plus the "stop when a given event fires" mode spec.md §4.1 requires.
pub enum RunUntil {
    /// Step until the queue empties.
    Forever,
    /// Step until simulated time reaches `t`.
    Time(f64),
    /// Step until the given event fires (propagating its failure, if any).
    Event(crate::event::Event),
}

impl Environment {
    /// Create a new environment starting at `initial_time`.
    pub fn new(initial_time: f64) -> Environment {
        Environment(Rc::new(EnvInner {
            now: Cell::new(initial_time),
            counter: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
            events: RefCell::new(SlotMap::with_key()),
            processes: RefCell::new(SecondaryMap::new()),
            awaiting: RefCell::new(SecondaryMap::new()),
            pending_interrupts: RefCell::new(SecondaryMap::new()),
            active_process: Cell::new(None),
            trace_hook: RefCell::new(None),
            resources: RefCell::new(SlotMap::with_key()),
            containers: RefCell::new(SlotMap::with_key()),
            stores: RefCell::new(SlotMap::with_key()),
            filter_stores: RefCell::new(SlotMap::with_key()),
            conditions: RefCell::new(SecondaryMap::new()),
        }))
    }

    /// Current simulated time.
    pub fn now(&self) -> f64 {
        self.0.now.get()
    }

    /// Register a hook invoked after every `step()` with `(time, event)`.
    pub fn trace(&self, hook: impl FnMut(f64, EventId) + 'static) {
        *self.0.trace_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// The scheduled time of the earliest queued event, or `+inf` if the
    /// queue is empty.
    pub fn peek(&self) -> f64 {
        self.0
            .queue
            .borrow()
            .peek()
            .map(|Reverse(e)| e.time.0)
            .unwrap_or(f64::INFINITY)
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let n = self.0.counter.get();
        self.0.counter.set(n + 1);
        n
    }

    pub(crate) fn alloc_event(&self, kind: EventKind) -> EventId {
        self.0.events.borrow_mut().insert(EventRecord::pending(kind))
    }

    pub(crate) fn schedule_raw(&self, event: EventId, priority: Priority, delay: f64) {
        assert!(delay >= 0.0, "schedule delay must be non-negative");
        let entry = QueueEntry {
            time: SimTime(self.now() + delay),
            priority,
            seq: self.next_seq(),
            event,
        };
        self.0.queue.borrow_mut().push(Reverse(entry));
    }

    pub(crate) fn schedule_at(&self, event: EventId, priority: Priority, at: f64) {
        assert!(at >= self.now(), "cannot schedule an event in the past");
        let entry = QueueEntry {
            time: SimTime(at),
            priority,
            seq: self.next_seq(),
            event,
        };
        self.0.queue.borrow_mut().push(Reverse(entry));
    }

    pub(crate) fn is_processed(&self, id: EventId) -> bool {
        self.0.events.borrow()[id].callbacks.is_none()
    }

    pub(crate) fn is_triggered(&self, id: EventId) -> bool {
        self.0.events.borrow()[id].ok.is_some()
    }

    /// Reads an already-processed event's `(ok, value)`, marking it defused
    /// if it failed (the caller is, by reading this, "observing" the
    /// failure).
    pub(crate) fn observe_result(&self, id: EventId) -> (bool, Value) {
        let mut events = self.0.events.borrow_mut();
        let rec = &mut events[id];
        let ok = rec.ok.expect("observe_result called before the event fired");
        if !ok {
            rec.defused = true;
        }
        (ok, rec.value.clone().expect("fired event without a value"))
    }

    pub(crate) fn kind_of(&self, id: EventId) -> EventKind {
        self.0.events.borrow()[id].kind
    }

    /// Record a `Condition`'s predicate and (already flattened) children so
    /// a later `and`/`or` can merge it as an operand instead of nesting it.
    pub(crate) fn record_condition(&self, id: EventId, predicate: Predicate, children: Vec<EventId>) {
        self.0.conditions.borrow_mut().insert(id, (predicate, children));
    }

    /// Look up a previously recorded `Condition`'s predicate and children.
    pub(crate) fn condition_children(&self, id: EventId) -> Option<(Predicate, Vec<EventId>)> {
        self.0.conditions.borrow().get(id).cloned()
    }

    /// Succeed an event and schedule it at `now` with the given priority.
    pub(crate) fn succeed_raw(&self, id: EventId, priority: Priority, value: Value) {
        {
            let mut events = self.0.events.borrow_mut();
            let rec = &mut events[id];
            assert!(rec.ok.is_none(), "event already triggered");
            rec.ok = Some(true);
            rec.value = Some(value);
        }
        self.schedule_raw(id, priority, 0.0);
    }

    /// Succeed an event immediately (its value is available right away) but
    /// queue its processing `delay` time units in the future. Used by
    /// `Timeout`, which is "triggered" at construction but only "processed"
    /// — and thus only observable by an `.await`er — once it actually fires.
    pub(crate) fn succeed_delayed_raw(&self, id: EventId, priority: Priority, value: Value, delay: f64) {
        {
            let mut events = self.0.events.borrow_mut();
            let rec = &mut events[id];
            assert!(rec.ok.is_none(), "event already triggered");
            rec.ok = Some(true);
            rec.value = Some(value);
        }
        self.schedule_raw(id, priority, delay);
    }

    /// Fail an event and schedule it at `now` with the given priority.
    pub(crate) fn fail_raw(&self, id: EventId, priority: Priority, value: Value) {
        {
            let mut events = self.0.events.borrow_mut();
            let rec = &mut events[id];
            assert!(rec.ok.is_none(), "event already triggered");
            rec.ok = Some(false);
            rec.value = Some(value);
        }
        self.schedule_raw(id, priority, 0.0);
    }

    pub(crate) fn try_succeed(&self, id: EventId, priority: Priority, value: Value) -> SimResult<()> {
        let mut events = self.0.events.borrow_mut();
        let rec = &mut events[id];
        if rec.ok.is_some() {
            return Err(SimError::EventAlreadyTriggered);
        }
        rec.ok = Some(true);
        rec.value = Some(value);
        drop(events);
        self.schedule_raw(id, priority, 0.0);
        Ok(())
    }

    pub(crate) fn try_fail(&self, id: EventId, priority: Priority, value: Value) -> SimResult<()> {
        let mut events = self.0.events.borrow_mut();
        let rec = &mut events[id];
        if rec.ok.is_some() {
            return Err(SimError::EventAlreadyTriggered);
        }
        rec.ok = Some(false);
        rec.value = Some(value);
        drop(events);
        self.schedule_raw(id, priority, 0.0);
        Ok(())
    }

    pub(crate) fn try_add_callback(&self, id: EventId, cb: Callback) -> SimResult<()> {
        let mut events = self.0.events.borrow_mut();
        let rec = &mut events[id];
        match rec.callbacks.as_mut() {
            Some(cbs) => {
                cbs.push(cb);
                Ok(())
            }
            None => Err(SimError::EventAlreadyProcessed),
        }
    }

    pub(crate) fn active_process(&self) -> Option<EventId> {
        self.0.active_process.get()
    }

    pub(crate) fn set_awaiting(&self, pid: EventId, cancel: Rc<Cell<bool>>) {
        self.0.awaiting.borrow_mut().insert(pid, Awaiting { cancel });
    }

    pub(crate) fn take_pending_interrupt(&self, pid: EventId) -> Option<Value> {
        let mut pending = self.0.pending_interrupts.borrow_mut();
        let queue = pending.get_mut(pid)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    /// Insert a freshly constructed process future under `pid` and kick off
    /// its first resume via a zero-delay `NORMAL` starter event, so the
    /// process body never runs synchronously inside `process()` itself
    /// (spec §4.4: "processes always start on the next step, never
    /// inline").
    pub(crate) fn spawn_process(&self, pid: EventId, future: BoxedProcessFuture) {
        self.0.processes.borrow_mut().insert(pid, RefCell::new(Some(future)));
        let starter = self.alloc_event(EventKind::Plain);
        self.try_add_callback(starter, Box::new(move |env, _id| env.resume_process(pid)))
            .expect("freshly allocated event cannot be processed");
        self.succeed_raw(starter, Priority::Normal, Value::unit());
    }

    /// Drive a process's future one step. Reentrant-safe: `active_process`
    /// is saved and restored rather than merely set, so a process that
    /// synchronously interrupts another process from inside its own resume
    /// (not via `.await`) doesn't corrupt the outer resume's notion of
    /// "who is running".
    pub(crate) fn resume_process(&self, pid: EventId) {
        use std::task::Context;

        let Some(future) = ({
            let processes = self.0.processes.borrow();
            processes.get(pid).and_then(|cell| cell.borrow_mut().take())
        }) else {
            // already completed, or being polled re-entrantly; nothing to do.
            return;
        };

        let previous_active = self.0.active_process.replace(Some(pid));
        let waker = crate::process::waker_for(self.clone(), pid);
        let mut cx = Context::from_waker(&waker);
        let mut future = future;
        let poll_result = future.as_mut().poll(&mut cx);
        self.0.active_process.set(previous_active);

        match poll_result {
            std::task::Poll::Pending => {
                let processes = self.0.processes.borrow();
                if let Some(cell) = processes.get(pid) {
                    *cell.borrow_mut() = Some(future);
                }
            }
            std::task::Poll::Ready(result) => {
                self.0.processes.borrow_mut().remove(pid);
                self.0.awaiting.borrow_mut().remove(pid);
                self.0.pending_interrupts.borrow_mut().remove(pid);
                match result {
                    Ok(v) => self.succeed_raw(pid, Priority::Normal, v),
                    Err(v) => self.fail_raw(pid, Priority::Normal, v),
                }
            }
        }
    }

    pub(crate) fn resources(&self) -> &RefCell<SlotMap<ResourceId, ResourceRecord>> {
        &self.0.resources
    }

    pub(crate) fn containers(&self) -> &RefCell<SlotMap<ContainerId, ContainerRecord>> {
        &self.0.containers
    }

    pub(crate) fn stores(&self) -> &RefCell<SlotMap<StoreId, StoreRecord>> {
        &self.0.stores
    }

    pub(crate) fn filter_stores(&self) -> &RefCell<SlotMap<StoreId, FilterStoreRecord>> {
        &self.0.filter_stores
    }

    pub(crate) fn is_process_alive(&self, pid: EventId) -> bool {
        self.0.processes.borrow().contains_key(pid)
    }

    pub(crate) fn deliver_interrupt(&self, pid: EventId, value: Value) {
        self.0
            .pending_interrupts
            .borrow_mut()
            .entry(pid)
            .expect("process id does not belong to this environment")
            .or_default()
            .push(value);
        if let Some(awaiting) = self.0.awaiting.borrow_mut().remove(pid) {
            awaiting.cancel.set(true);
        }
        self.resume_process(pid);
    }

    /// Advance the simulation by one event firing.
    pub fn step(&self) -> SimResult<()> {
        let Reverse(entry) = self.0.queue.borrow_mut().pop().ok_or(SimError::EmptyQueue)?;
        self.0.now.set(entry.time.0);
        let id = entry.event;

        tracing::trace!(time = entry.time.0, priority = ?entry.priority, event = ?id, "step");

        let callbacks = {
            let mut events = self.0.events.borrow_mut();
            events[id].callbacks.take()
        };
        if let Some(cbs) = callbacks {
            for cb in cbs {
                cb(self, id);
            }
        }

        if let Some(hook) = self.0.trace_hook.borrow_mut().as_mut() {
            hook(entry.time.0, id);
        }

        let events = self.0.events.borrow();
        let rec = &events[id];
        if rec.ok == Some(false) && !rec.defused {
            let value = rec.value.clone().expect("failed event without a value");
            drop(events);
            return Err(SimError::UnhandledProcessFailure(value));
        }
        Ok(())
    }

    /// Run the simulation until `until` is satisfied.
    pub fn run(&self, until: RunUntil) -> SimResult<()> {
        tracing::debug!("run starting");
        let result = match until {
            RunUntil::Forever => self.run_forever(),
            RunUntil::Time(t) => self.run_until_time(t),
            RunUntil::Event(ev) => self.run_until_event(ev),
        };
        tracing::debug!(now = self.now(), "run finished");
        result
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
        if t < self.now() {
            return Err(SimError::InvalidUntil);
        }
        let marker = self.alloc_event(EventKind::Plain);
        self.succeed_delayed_raw(marker, Priority::Urgent, Value::unit(), t - self.now());
        loop {
            if self.is_processed(marker) {
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
            if self.is_processed(ev.id) {
                let events = self.0.events.borrow();
                let rec = &events[ev.id];
                if rec.ok == Some(false) {
                    let v = rec.value.clone().unwrap();
                    drop(events);
                    self.observe_result(ev.id);
                    return Err(SimError::UnhandledProcessFailure(v));
                }
                return Ok(());
            }
            match self.step() {
                Ok(()) => continue,
                Err(SimError::EmptyQueue) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").field("now", &self.now()).finish()
    }
}
