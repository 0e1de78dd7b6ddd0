//! `Store`, `PriorityStore`, `FilterStore` (spec §4.7).
//!
//! Items are kept as type-erased [`Value`]s in the arena, the same way
//! everything else in this engine is; `T` only shows up as a `PhantomData`
//! marker so `put` is statically typed, with `get`'s caller downcasting the
//! resulting value the same way process results are downcast elsewhere in
//! this crate.

use std::marker::PhantomData;

use crate::env::{EventKind, Priority};
use crate::event::Event;
use crate::ids::{EventId, StoreId};
use crate::value::Value;
use crate::Environment;

#[derive(Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Fifo,
    Priority,
}

pub(crate) struct StoreRecord {
    mode: StoreMode,
    capacity: usize,
    items: Vec<(i64, Value)>,
    get_queue: Vec<EventId>,
    put_queue: Vec<(EventId, i64, Value)>,
}

fn admit(rec: &mut StoreRecord, priority: i64, value: Value) {
    match rec.mode {
        StoreMode::Fifo => rec.items.push((priority, value)),
        StoreMode::Priority => {
            let pos = rec.items.partition_point(|(p, _)| *p <= priority);
            rec.items.insert(pos, (priority, value));
        }
    }
}

fn drain(env: &Environment, id: StoreId) {
    loop {
        let progressed = {
            let mut stores = env.stores().borrow_mut();
            let rec = &mut stores[id];

            if !rec.get_queue.is_empty() && !rec.items.is_empty() {
                let getter = rec.get_queue.remove(0);
                let (_, value) = rec.items.remove(0);
                Some((getter, value))
            } else if !rec.put_queue.is_empty() && rec.items.len() < rec.capacity {
                let (putter, priority, value) = rec.put_queue.remove(0);
                admit(rec, priority, value);
                Some((putter, Value::unit()))
            } else {
                None
            }
        };
        match progressed {
            Some((req, value)) => {
                let _ = env.try_succeed(req, Priority::Normal, value);
            }
            None => break,
        }
    }
}

macro_rules! store_handle {
    ($name:ident, $mode:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name<T> {
            env: Environment,
            id: StoreId,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                $name { env: self.env.clone(), id: self.id, _marker: PhantomData }
            }
        }

        impl<T: 'static> $name<T> {
            pub fn new(env: &Environment, capacity: usize) -> Self {
                let id = env.stores().borrow_mut().insert(StoreRecord {
                    mode: $mode,
                    capacity,
                    items: Vec::new(),
                    get_queue: Vec::new(),
                    put_queue: Vec::new(),
                });
                $name { env: env.clone(), id, _marker: PhantomData }
            }

            pub fn len(&self) -> usize {
                self.env.stores().borrow()[self.id].items.len()
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn capacity(&self) -> usize {
                self.env.stores().borrow()[self.id].capacity
            }

            fn put_priority(&self, item: T, priority: i64) -> Event {
                let req_id = self.env.alloc_event(EventKind::StorePut);
                let value = Value::new(item);
                let immediate = {
                    let mut stores = self.env.stores().borrow_mut();
                    let rec = &mut stores[self.id];
                    if rec.put_queue.is_empty() && rec.items.len() < rec.capacity {
                        admit(rec, priority, value);
                        true
                    } else {
                        rec.put_queue.push((req_id, priority, value));
                        false
                    }
                };
                if immediate {
                    self.env.succeed_raw(req_id, Priority::Normal, Value::unit());
                }
                drain(&self.env, self.id);
                Event { env: self.env.clone(), id: req_id }
            }

            /// Request the next item (FIFO for `Store`, lowest-priority-first
            /// for `PriorityStore`). The event's success value is the item.
            pub fn get(&self) -> Event {
                let req_id = self.env.alloc_event(EventKind::StoreGet);
                let immediate = {
                    let mut stores = self.env.stores().borrow_mut();
                    let rec = &mut stores[self.id];
                    if rec.get_queue.is_empty() && !rec.items.is_empty() {
                        Some(rec.items.remove(0).1)
                    } else {
                        rec.get_queue.push(req_id);
                        None
                    }
                };
                if let Some(value) = immediate {
                    self.env.succeed_raw(req_id, Priority::Normal, value);
                }
                drain(&self.env, self.id);
                Event { env: self.env.clone(), id: req_id }
            }
        }
    };
}

store_handle!(Store, StoreMode::Fifo, "A FIFO bounded store of items of type `T`.");

impl<T: 'static> Store<T> {
    /// Put an item into the store. Resolves once capacity allows.
    pub fn put(&self, item: T) -> Event {
        self.put_priority(item, 0)
    }
}

store_handle!(
    PriorityStore,
    StoreMode::Priority,
    "A bounded store that hands out the lowest-priority-numbered item first, FIFO among equal priorities."
);

impl<T: 'static> PriorityStore<T> {
    /// Put an item into the store at the given priority (lower is drained
    /// first).
    pub fn put(&self, item: T, priority: i64) -> Event {
        self.put_priority(item, priority)
    }
}

enum Admit {
    GrantedToWaiter(EventId, Value),
    Stored,
    Full(Value),
}

struct Waiter {
    request: EventId,
    predicate: Box<dyn Fn(&Value) -> bool>,
}

struct PutWaiter {
    request: EventId,
    value: Value,
}

pub(crate) struct FilterStoreRecord {
    capacity: usize,
    items: Vec<Value>,
    waiters: Vec<Waiter>,
    put_queue: Vec<PutWaiter>,
}

fn put_now(rec: &mut FilterStoreRecord, value: Value) -> Admit {
    if let Some(pos) = rec.waiters.iter().position(|w| (w.predicate)(&value)) {
        let w = rec.waiters.remove(pos);
        return Admit::GrantedToWaiter(w.request, value);
    }
    if rec.items.len() < rec.capacity {
        rec.items.push(value.clone());
        return Admit::Stored;
    }
    Admit::Full(value)
}

fn drain_filter_queue(env: &Environment, id: StoreId) {
    loop {
        let next_value = {
            let stores = env.filter_stores().borrow();
            stores[id].put_queue.first().map(|pw| pw.value.clone())
        };
        let Some(value) = next_value else { break };
        let admit = {
            let mut stores = env.filter_stores().borrow_mut();
            put_now(&mut stores[id], value)
        };
        match admit {
            Admit::Full(_) => break,
            Admit::Stored => {
                let pw = {
                    let mut stores = env.filter_stores().borrow_mut();
                    stores[id].put_queue.remove(0)
                };
                let _ = env.try_succeed(pw.request, Priority::Normal, Value::unit());
            }
            Admit::GrantedToWaiter(waiter_req, v) => {
                let pw = {
                    let mut stores = env.filter_stores().borrow_mut();
                    stores[id].put_queue.remove(0)
                };
                let _ = env.try_succeed(waiter_req, Priority::Normal, v);
                let _ = env.try_succeed(pw.request, Priority::Normal, Value::unit());
            }
        }
    }
}

/// A bounded store whose `get` takes a predicate instead of draining
/// unconditionally. There is no fairness policy between waiters: each
/// arriving (or queue-admitted) item is offered to waiters in registration
/// order and goes to the first whose predicate accepts it, so a waiter whose
/// predicate nothing currently satisfies can be skipped indefinitely by
/// later, less picky waiters. See spec's open question on `FilterStore`
/// fairness — this mirrors SimPy's own `FilterStore`, which makes the same
/// choice.
pub struct FilterStore<T> {
    env: Environment,
    id: StoreId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for FilterStore<T> {
    fn clone(&self) -> Self {
        FilterStore { env: self.env.clone(), id: self.id, _marker: PhantomData }
    }
}

impl<T: 'static> FilterStore<T> {
    pub fn new(env: &Environment, capacity: usize) -> Self {
        let id = env.filter_stores().borrow_mut().insert(FilterStoreRecord {
            capacity,
            items: Vec::new(),
            waiters: Vec::new(),
            put_queue: Vec::new(),
        });
        FilterStore { env: env.clone(), id, _marker: PhantomData }
    }

    pub fn len(&self) -> usize {
        self.env.filter_stores().borrow()[self.id].items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put an item into the store, or hand it directly to a waiting `get`
    /// whose predicate accepts it.
    pub fn put(&self, item: T) -> Event {
        let req_id = self.env.alloc_event(EventKind::StorePut);
        let value = Value::new(item);
        let admit = {
            let mut stores = self.env.filter_stores().borrow_mut();
            put_now(&mut stores[self.id], value)
        };
        match admit {
            Admit::GrantedToWaiter(waiter_req, v) => {
                self.env.succeed_raw(waiter_req, Priority::Normal, v);
                self.env.succeed_raw(req_id, Priority::Normal, Value::unit());
            }
            Admit::Stored => {
                self.env.succeed_raw(req_id, Priority::Normal, Value::unit());
            }
            Admit::Full(v) => {
                self.env.filter_stores().borrow_mut()[self.id]
                    .put_queue
                    .push(PutWaiter { request: req_id, value: v });
            }
        }
        Event { env: self.env.clone(), id: req_id }
    }

    /// Request the first item (existing or future) matching `predicate`.
    pub fn get(&self, predicate: impl Fn(&T) -> bool + 'static) -> Event {
        let req_id = self.env.alloc_event(EventKind::StoreGet);
        let pred: Box<dyn Fn(&Value) -> bool> =
            Box::new(move |v: &Value| v.downcast::<T>().map(|rc| predicate(&rc)).unwrap_or(false));

        let matched = {
            let stores = self.env.filter_stores().borrow();
            stores[self.id].items.iter().position(|v| pred(v))
        };

        match matched {
            Some(idx) => {
                let value = {
                    let mut stores = self.env.filter_stores().borrow_mut();
                    stores[self.id].items.remove(idx)
                };
                self.env.succeed_raw(req_id, Priority::Normal, value);
                drain_filter_queue(&self.env, self.id);
            }
            None => {
                let mut stores = self.env.filter_stores().borrow_mut();
                stores[self.id].waiters.push(Waiter { request: req_id, predicate: pred });
            }
        }
        Event { env: self.env.clone(), id: req_id }
    }
}
