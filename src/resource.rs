//! `Resource`, `PriorityResource`, `PreemptiveResource` (spec §4.5).
//!
//! All three share one record shape and differ only in queue ordering and
//! (for the preemptive variant) whether a request can evict a lower-priority
//! holder. `PreemptiveResource` is implemented as `PriorityResource` plus
//! eviction rather than as an independent type, since the spec describes it
//! literally as "as PriorityResource, plus...".

use std::collections::HashSet;

use crate::env::{EventKind, Priority};
use crate::error::{SimError, SimResult};
use crate::event::Event;
use crate::ids::{EventId, ResourceId};
use crate::process::Interrupt;
use crate::value::Value;
use crate::Environment;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Fifo,
    Priority,
    Preemptive,
}

struct UserEntry {
    request: EventId,
    priority: i64,
    since: f64,
    holder: Option<EventId>,
}

struct QueueEntry {
    request: EventId,
    priority: i64,
    seq: u64,
    holder: Option<EventId>,
}

pub(crate) struct ResourceRecord {
    mode: Mode,
    capacity: usize,
    users: Vec<UserEntry>,
    queue: Vec<QueueEntry>,
    released: HashSet<EventId>,
}

/// Payload delivered to a process preempted out of a `PreemptiveResource`.
pub struct Preempted {
    pub by: EventId,
    pub usage_since: f64,
}

fn pop_next(rec: &mut ResourceRecord) -> Option<QueueEntry> {
    if rec.queue.is_empty() {
        return None;
    }
    match rec.mode {
        Mode::Fifo => Some(rec.queue.remove(0)),
        Mode::Priority | Mode::Preemptive => {
            let idx = rec
                .queue
                .iter()
                .enumerate()
                .min_by_key(|(_, q)| (q.priority, q.seq))
                .map(|(i, _)| i)
                .unwrap();
            Some(rec.queue.remove(idx))
        }
    }
}

fn try_grant(env: &Environment, rid: ResourceId) {
    loop {
        let granted = {
            let mut resources = env.resources().borrow_mut();
            let rec = &mut resources[rid];
            if rec.users.len() >= rec.capacity {
                None
            } else {
                pop_next(rec).map(|q| {
                    rec.users.push(UserEntry {
                        request: q.request,
                        priority: q.priority,
                        since: env.now(),
                        holder: q.holder,
                    });
                    q.request
                })
            }
        };
        match granted {
            Some(req) => {
                let _ = env.try_succeed(req, Priority::Normal, Value::unit());
            }
            None => break,
        }
    }
}

fn enqueue_request(env: &Environment, rid: ResourceId, mode: Mode, priority: i64, preempt: bool) -> Event {
    let req_id = env.alloc_event(EventKind::ResourceRequest);
    let seq = env.next_seq();
    let holder = env.active_process();

    let evicted = {
        let mut resources = env.resources().borrow_mut();
        let rec = &mut resources[rid];
        rec.queue.push(QueueEntry { request: req_id, priority, seq, holder });

        if mode == Mode::Preemptive && preempt && rec.users.len() >= rec.capacity {
            let worst = rec
                .users
                .iter()
                .enumerate()
                .max_by_key(|(_, u)| (u.priority, std::cmp::Reverse(ordered_float_bits(u.since))))
                .map(|(i, _)| i);
            match worst {
                Some(idx) if rec.users[idx].priority > priority => Some(rec.users.remove(idx)),
                _ => None,
            }
        } else {
            None
        }
    };

    if let Some(victim) = evicted {
        if let Some(victim_pid) = victim.holder {
            deliver_preemption(env, victim_pid, rid, req_id, victim.since);
        }
    }

    try_grant(env, rid);
    Event { env: env.clone(), id: req_id }
}

fn ordered_float_bits(t: f64) -> u64 {
    // Monotone bit pattern for non-negative finite simulated times, used
    // only to break preemption ties in favour of the most recently granted
    // user without pulling in a total-order float wrapper here.
    t.to_bits()
}

fn deliver_preemption(env: &Environment, victim_pid: EventId, rid: ResourceId, by: EventId, usage_since: f64) {
    let marker = env.alloc_event(EventKind::Plain);
    let cause = Value::new(Preempted { by, usage_since });
    let env2 = env.clone();
    env.try_add_callback(
        marker,
        Box::new(move |_env, _id| {
            if env2.is_process_alive(victim_pid) {
                env2.deliver_interrupt(victim_pid, Value::new(Interrupt { cause }));
            }
            let _ = rid;
        }),
    )
    .expect("freshly allocated event cannot be processed");
    env.succeed_raw(marker, Priority::Urgent, Value::unit());
}

/// Release `req_id` and return a `Release` event that fires once the
/// resource has processed it (spec §4.5: "`release(request)` returns a
/// Release event"). Release is synchronous internally, so the returned
/// event is already triggered by the time this returns; it still exists as
/// an event, rather than a plain `()`, so a process can `.await` it the same
/// way it awaits a request.
fn release_request(env: &Environment, rid: ResourceId, req_id: EventId) -> SimResult<Event> {
    {
        let mut resources = env.resources().borrow_mut();
        let rec = &mut resources[rid];
        if rec.released.contains(&req_id) {
            return Err(SimError::DoubleRelease);
        }
        if let Some(idx) = rec.users.iter().position(|u| u.request == req_id) {
            rec.users.remove(idx);
            rec.released.insert(req_id);
        }
        // Not currently a user (never granted, already evicted, or already
        // processed by some other path): a harmless no-op.
    }
    try_grant(env, rid);
    let release_id = env.alloc_event(EventKind::ResourceRelease);
    env.succeed_raw(release_id, Priority::Normal, Value::unit());
    Ok(Event { env: env.clone(), id: release_id })
}

macro_rules! resource_handle {
    ($name:ident, $mode:expr, $request_doc:literal) => {
        #[doc = $request_doc]
        #[derive(Clone)]
        pub struct $name {
            env: Environment,
            id: ResourceId,
        }

        impl $name {
            pub fn new(env: &Environment, capacity: usize) -> Self {
                let id = env.resources().borrow_mut().insert(ResourceRecord {
                    mode: $mode,
                    capacity,
                    users: Vec::new(),
                    queue: Vec::new(),
                    released: HashSet::new(),
                });
                $name { env: env.clone(), id }
            }

            pub fn capacity(&self) -> usize {
                self.env.resources().borrow()[self.id].capacity
            }

            pub fn count(&self) -> usize {
                self.env.resources().borrow()[self.id].users.len()
            }

            pub fn queue_len(&self) -> usize {
                self.env.resources().borrow()[self.id].queue.len()
            }

            /// Release a previously granted request. Returns a `Release`
            /// event that fires once the resource has processed it.
            pub fn release(&self, req: &Event) -> SimResult<Event> {
                release_request(&self.env, self.id, req.id)
            }
        }
    };
}

resource_handle!(Resource, Mode::Fifo, "A FIFO-queued resource with a fixed capacity of concurrent holders.");

impl Resource {
    /// Request one unit of the resource. Resolves once a slot is free and
    /// this request reaches the head of the (FIFO) queue.
    pub fn request(&self) -> Event {
        enqueue_request(&self.env, self.id, Mode::Fifo, 0, false)
    }
}

resource_handle!(
    PriorityResource,
    Mode::Priority,
    "Like `Resource`, but queued requests are granted in priority order (lower number first), FIFO among equal priorities."
);

impl PriorityResource {
    /// Request one unit of the resource at the given priority (lower is
    /// more urgent).
    pub fn request(&self, priority: i64) -> Event {
        enqueue_request(&self.env, self.id, Mode::Priority, priority, false)
    }
}

resource_handle!(
    PreemptiveResource,
    Mode::Preemptive,
    "Like `PriorityResource`, but a higher-priority request can evict the lowest-priority current holder, interrupting its process."
);

impl PreemptiveResource {
    /// Request one unit of the resource at the given priority. When
    /// `preempt` is `true` and the resource is at capacity and this request
    /// outranks the lowest-priority current holder, that holder is evicted
    /// immediately and its owning process (if any) receives an
    /// [`Interrupt`] carrying a [`Preempted`] cause. If no victim qualifies
    /// (or `preempt` is `false`), the request just queues normally like a
    /// `PriorityResource` request.
    pub fn request(&self, priority: i64, preempt: bool) -> Event {
        enqueue_request(&self.env, self.id, Mode::Preemptive, priority, preempt)
    }
}
