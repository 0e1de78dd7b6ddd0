//! `AllOf`/`AnyOf` composite events (spec §4.3).
//!
//! Unlike a process's `.await`, a condition's children are observed through
//! plain callbacks registered on construction — there's no coroutine to
//! suspend, just a counter of how many children have fired and a predicate
//! over that count.

use std::cell::RefCell;
use std::rc::Rc;

use crate::env::{EventKind, Priority};
use crate::event::Event;
use crate::ids::EventId;
use crate::value::Value;
use crate::Environment;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Predicate {
    All,
    Any,
}

struct ConditionState {
    predicate: Predicate,
    fired: usize,
    /// Children in original construction order, paired with their result
    /// once fired. Kept as parallel arrays (rather than a hash map) so the
    /// final value preserves that order (spec §4.3/§8 property 6: "an
    /// ordered mapping from child event to its value, preserving the
    /// original child order").
    children: Vec<EventId>,
    results: Vec<Option<Value>>,
    failure: Option<Value>,
    condition_id: EventId,
}

/// Build an `AllOf`/`AnyOf` condition event over `children`.
///
/// An empty `children` list trivially satisfies `All` (vacuous truth) and
/// can never satisfy `Any`, matching the usual composite-event convention.
pub(crate) fn build(env: &Environment, predicate: Predicate, children: Vec<Event>) -> Event {
    let condition_id = env.alloc_event(EventKind::Condition);
    let child_ids: Vec<EventId> = children.iter().map(|c| c.id).collect();
    env.record_condition(condition_id, predicate, child_ids.clone());

    if children.is_empty() {
        match predicate {
            Predicate::All => env.succeed_raw(condition_id, Priority::Normal, Value::new(Vec::<(EventId, Value)>::new())),
            Predicate::Any => {
                // Never satisfied; left pending forever, same as awaiting
                // nothing. Not scheduled.
            }
        }
        return Event { env: env.clone(), id: condition_id };
    }

    let state = Rc::new(RefCell::new(ConditionState {
        predicate,
        fired: 0,
        results: vec![None; child_ids.len()],
        children: child_ids,
        failure: None,
        condition_id,
    }));

    for (index, child) in children.iter().enumerate() {
        let state = state.clone();
        let child_id = child.id;
        let state_for_callback = state.clone();
        let registered = env.try_add_callback(
            child_id,
            Box::new(move |env, _id| handle_child_fired(env, index, state_for_callback)),
        );
        if registered.is_err() {
            // Child already processed; evaluate immediately in the same way
            // a callback would.
            handle_child_fired(env, index, state);
        }
    }

    Event { env: env.clone(), id: condition_id }
}

fn handle_child_fired(env: &Environment, index: usize, state: Rc<RefCell<ConditionState>>) {
    let child_id = state.borrow().children[index];
    let (ok, value) = env.observe_result(child_id);
    let mut st = state.borrow_mut();

    if env.is_processed(st.condition_id) {
        // Condition already decided (e.g. AnyOf already satisfied by a
        // sibling); later children are observed but otherwise ignored.
        return;
    }

    if !ok {
        st.failure = Some(value);
        let failure = st.failure.clone().unwrap();
        let condition_id = st.condition_id;
        drop(st);
        let _ = env.try_fail(condition_id, Priority::Normal, failure);
        return;
    }

    st.fired += 1;
    st.results[index] = Some(value);

    let satisfied = match st.predicate {
        Predicate::All => st.fired == st.children.len(),
        Predicate::Any => true,
    };

    if satisfied {
        let ordered: Vec<(EventId, Value)> = st
            .children
            .iter()
            .zip(st.results.iter())
            .filter_map(|(id, v)| v.clone().map(|v| (*id, v)))
            .collect();
        let condition_id = st.condition_id;
        drop(st);
        let _ = env.try_succeed(condition_id, Priority::Normal, Value::new(ordered));
    }
}
