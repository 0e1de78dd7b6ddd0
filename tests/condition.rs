//! Integration tests for `AllOf`/`AnyOf` event composition (spec §4.3).

use std::cell::RefCell;
use std::rc::Rc;

use desim::{timeout, Environment, RunUntil, Value};

#[test]
fn all_of_fails_as_soon_as_one_child_fails() {
    let env = Environment::new(0.0);
    let ok_ev = timeout(&env, 5.0, Value::unit());
    let bad_ev = desim::Event::new(&env);
    bad_ev.fail(Value::new("broke".to_string())).unwrap();

    let result = Rc::new(RefCell::new(None));
    {
        let result = result.clone();
        let ok_ev = ok_ev.clone();
        env.process(move |env| async move {
            let outcome = (ok_ev & bad_ev).await;
            *result.borrow_mut() = Some((env.now(), outcome.is_err()));
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*result.borrow(), Some((0.0, true)));
}

#[test]
fn any_of_with_three_children_resolves_on_the_fastest() {
    let env = Environment::new(0.0);
    let a = timeout(&env, 3.0, Value::new(1i32));
    let b = timeout(&env, 1.0, Value::new(2i32));
    let c = timeout(&env, 2.0, Value::new(3i32));

    let result = Rc::new(RefCell::new(None));
    {
        let result = result.clone();
        env.process(move |env| async move {
            let winner = (a.or(&b)).or(&c).await.unwrap();
            let _ = winner;
            *result.borrow_mut() = Some(env.now());
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*result.borrow(), Some(1.0));
}

#[test]
fn mixed_predicate_conditions_nest_rather_than_flatten() {
    // AllOf/AnyOf are built pairwise via `&`/`|`; a differing-predicate
    // operand (here an AllOf nested inside an OR) composes like any other
    // event, since flattening only merges a *same*-predicate operand.
    let env = Environment::new(0.0);
    let a = timeout(&env, 1.0, Value::new(1i32));
    let b = timeout(&env, 2.0, Value::new(2i32));
    let c = timeout(&env, 1.0, Value::new(3i32));

    let done = Rc::new(RefCell::new(None));
    {
        let done = done.clone();
        env.process(move |env| async move {
            // (a AND c) OR b -- the AND side wins at t=2 (a finishes at 1,
            // c at 1, so the AND resolves at 1; the OR then resolves at 1).
            let and_ev = a & c;
            let outcome = and_ev.or(&b).await;
            *done.borrow_mut() = Some((env.now(), outcome.is_ok()));
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*done.borrow(), Some((1.0, true)));
}

#[test]
fn chained_all_of_flattens_into_one_condition_over_the_original_children() {
    // (a & b) & c must produce a single 3-way AllOf over {a, b, c}, not a
    // 2-way AllOf nesting a 2-way AllOf. A nested condition's result would
    // have only 2 entries (the sub-condition's id plus c's); a flattened
    // one has exactly the 3 original children.
    let env = Environment::new(0.0);
    let a = timeout(&env, 1.0, Value::new(1i32));
    let b = timeout(&env, 1.0, Value::new(2i32));
    let c = timeout(&env, 1.0, Value::new(3i32));

    let done = Rc::new(RefCell::new(None));
    {
        let done = done.clone();
        env.process(move |env| async move {
            let combined = (a & b) & c;
            let result = combined.await.unwrap();
            let pairs = result.downcast::<Vec<(desim::EventId, Value)>>().unwrap();
            *done.borrow_mut() = Some((env.now(), pairs.len()));
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*done.borrow(), Some((1.0, 3)));
}

#[test]
fn all_of_result_preserves_original_child_construction_order() {
    // Children fire out of construction order (b finishes before a), but
    // the condition's result must still list them in the order they were
    // passed to `&`, not firing order.
    let env = Environment::new(0.0);
    let a = timeout(&env, 2.0, Value::new(1i32));
    let b = timeout(&env, 1.0, Value::new(2i32));

    let done = Rc::new(RefCell::new(None));
    {
        let done = done.clone();
        env.process(move |_env| async move {
            let result = (a & b).await.unwrap();
            let pairs = result.downcast::<Vec<(desim::EventId, Value)>>().unwrap();
            let values: Vec<i32> = pairs.iter().map(|(_, v)| *v.downcast::<i32>().unwrap()).collect();
            *done.borrow_mut() = Some(values);
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*done.borrow(), Some(vec![1, 2]));
}

#[test]
fn an_unobserved_failure_inside_an_any_of_is_still_defused() {
    // A child that fails but loses the AnyOf race must not surface as an
    // unhandled top-level failure merely because it lost.
    let env = Environment::new(0.0);
    let winner = timeout(&env, 1.0, Value::unit());
    let loser = desim::Event::new(&env);
    let loser_for_fail = loser.clone();
    env.process(move |_env| async move {
        // Fails the loser slightly after the winner fires, so both are
        // live children of the AnyOf when it resolves, but the loser's
        // eventual failure must not escape as unhandled.
        timeout(&_env, 2.0, Value::unit()).await.unwrap();
        loser_for_fail.fail(Value::new("late".to_string())).ok();
        Ok(Value::unit())
    });

    let outcome = Rc::new(RefCell::new(None));
    {
        let outcome = outcome.clone();
        env.process(move |env| async move {
            let result = winner.or(&loser).await;
            *outcome.borrow_mut() = Some(result.is_ok());
            let _ = env;
            Ok(Value::unit())
        });
    }
    let result = env.run(RunUntil::Forever);
    assert!(result.is_ok());
    assert_eq!(*outcome.borrow(), Some(true));
}
