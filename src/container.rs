//! `Container`: a shared, real-valued level with `put`/`get` (spec §4.6).

use crate::env::{EventKind, Priority};
use crate::error::SimResult;
use crate::event::Event;
use crate::ids::{ContainerId, EventId};
use crate::value::Value;
use crate::Environment;

struct Waiter {
    request: EventId,
    amount: f64,
}

pub(crate) struct ContainerRecord {
    capacity: f64,
    level: f64,
    put_queue: Vec<Waiter>,
    get_queue: Vec<Waiter>,
}

fn drain(env: &Environment, id: ContainerId) {
    loop {
        let progressed = {
            let mut containers = env.containers().borrow_mut();
            let rec = &mut containers[id];

            if let Some(w) = rec.get_queue.first() {
                if w.amount <= rec.level {
                    let w = rec.get_queue.remove(0);
                    rec.level -= w.amount;
                    Some(w.request)
                } else {
                    None
                }
            } else {
                None
            }
            .or_else(|| {
                if let Some(w) = rec.put_queue.first() {
                    if rec.level + w.amount <= rec.capacity {
                        let w = rec.put_queue.remove(0);
                        rec.level += w.amount;
                        Some(w.request)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
        };
        match progressed {
            Some(req) => {
                let _ = env.try_succeed(req, Priority::Normal, Value::unit());
            }
            None => break,
        }
    }
}

/// A shared, real-valued level with a fixed capacity. `put` raises the
/// level, `get` lowers it; both block (via the returned event) until the
/// operation can be satisfied without crossing `0` or `capacity`.
#[derive(Clone)]
pub struct Container {
    env: Environment,
    id: ContainerId,
}

impl Container {
    pub fn new(env: &Environment, capacity: f64, initial_level: f64) -> Self {
        assert!(capacity > 0.0, "container capacity must be positive");
        assert!((0.0..=capacity).contains(&initial_level), "initial level out of bounds");
        let id = env.containers().borrow_mut().insert(ContainerRecord {
            capacity,
            level: initial_level,
            put_queue: Vec::new(),
            get_queue: Vec::new(),
        });
        Container { env: env.clone(), id }
    }

    pub fn level(&self) -> f64 {
        self.env.containers().borrow()[self.id].level
    }

    pub fn capacity(&self) -> f64 {
        self.env.containers().borrow()[self.id].capacity
    }

    /// Request that `amount` be added to the level. Resolves immediately if
    /// it fits and no other put is already waiting; otherwise queues FIFO
    /// behind other puts.
    pub fn put(&self, amount: f64) -> Event {
        assert!(amount > 0.0, "put amount must be positive");
        assert!(amount <= self.capacity(), "put amount exceeds container capacity");
        let req_id = self.env.alloc_event(EventKind::ContainerPut);
        let immediate = {
            let mut containers = self.env.containers().borrow_mut();
            let rec = &mut containers[self.id];
            if rec.put_queue.is_empty() && rec.level + amount <= rec.capacity {
                rec.level += amount;
                true
            } else {
                rec.put_queue.push(Waiter { request: req_id, amount });
                false
            }
        };
        if immediate {
            self.env.succeed_raw(req_id, Priority::Normal, Value::unit());
        }
        drain(&self.env, self.id);
        Event { env: self.env.clone(), id: req_id }
    }

    /// Request that `amount` be removed from the level. Resolves
    /// immediately if available and no other get is already waiting;
    /// otherwise queues FIFO behind other gets.
    pub fn get(&self, amount: f64) -> Event {
        assert!(amount > 0.0, "get amount must be positive");
        assert!(amount <= self.capacity(), "get amount exceeds container capacity");
        let req_id = self.env.alloc_event(EventKind::ContainerGet);
        let immediate = {
            let mut containers = self.env.containers().borrow_mut();
            let rec = &mut containers[self.id];
            if rec.get_queue.is_empty() && amount <= rec.level {
                rec.level -= amount;
                true
            } else {
                rec.get_queue.push(Waiter { request: req_id, amount });
                false
            }
        };
        if immediate {
            self.env.succeed_raw(req_id, Priority::Normal, Value::unit());
        }
        drain(&self.env, self.id);
        Event { env: self.env.clone(), id: req_id }
    }

    /// Withdraw a still-queued `put`/`get` request, e.g. after it lost a
    /// race against a `timeout` in a condition. A no-op if `request` has
    /// already been granted or wasn't queued here; granted requests never
    /// reserve level ahead of time (see `drain`), so there is nothing to
    /// release beyond removing the waiter itself.
    pub fn cancel(&self, request: &Event) -> SimResult<()> {
        let mut containers = self.env.containers().borrow_mut();
        let rec = &mut containers[self.id];
        rec.put_queue.retain(|w| w.request != request.id);
        rec.get_queue.retain(|w| w.request != request.id);
        Ok(())
    }
}
