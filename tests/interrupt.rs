//! Integration tests for process interrupts and preemption (spec §4.4, §4.5).

use std::cell::RefCell;
use std::rc::Rc;

use desim::{timeout, Environment, Interrupt, Preempted, PreemptiveResource, RunUntil, SimError, Value};

#[test]
fn interrupt_carries_the_given_cause() {
    let env = Environment::new(0.0);
    let cause_seen = Rc::new(RefCell::new(None));
    let victim = {
        let cause_seen = cause_seen.clone();
        env.process(move |env| async move {
            let err = timeout(&env, 100.0, Value::unit()).await.unwrap_err();
            let interrupt = err.downcast::<Interrupt>().unwrap();
            let cause = interrupt.cause.downcast::<String>().unwrap();
            *cause_seen.borrow_mut() = Some((*cause).clone());
            Ok(Value::unit())
        })
    };
    {
        let victim = victim.clone();
        env.process(move |env| async move {
            timeout(&env, 5.0, Value::unit()).await.unwrap();
            victim.interrupt(Value::new("hurry up".to_string())).unwrap();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*cause_seen.borrow(), Some("hurry up".to_string()));
}

#[test]
fn interrupting_a_dead_process_reports_interrupt_done() {
    let env = Environment::new(0.0);
    let victim = env.process(|_env| async move { Ok(Value::unit()) });
    let outcome = Rc::new(RefCell::new(None));
    {
        let victim = victim.clone();
        let outcome = outcome.clone();
        env.process(move |env| async move {
            timeout(&env, 1.0, Value::unit()).await.unwrap();
            *outcome.borrow_mut() = Some(victim.interrupt(Value::unit()));
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert!(matches!(*outcome.borrow(), Some(Err(SimError::InterruptDone))));
}

#[test]
fn a_stale_wakeup_from_an_abandoned_await_does_not_fire() {
    // The process is interrupted while awaiting a long timeout; once it
    // recovers and finishes, the original timeout still fires (harmlessly)
    // but must not wake or otherwise affect the now-completed process.
    let env = Environment::new(0.0);
    let resumed_twice = Rc::new(RefCell::new(0u32));
    let victim = {
        let resumed_twice = resumed_twice.clone();
        env.process(move |env| async move {
            let result = timeout(&env, 50.0, Value::unit()).await;
            assert!(result.is_err());
            *resumed_twice.borrow_mut() += 1;
            Ok(Value::unit())
        })
    };
    {
        let victim = victim.clone();
        env.process(move |env| async move {
            timeout(&env, 1.0, Value::unit()).await.unwrap();
            victim.interrupt(Value::unit()).unwrap();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*resumed_twice.borrow(), 1);
}

#[test]
fn preemptive_resource_evicts_the_lowest_priority_holder() {
    let env = Environment::new(0.0);
    let res = PreemptiveResource::new(&env, 1);
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let res = res.clone();
        let log = log.clone();
        env.process(move |env| async move {
            let req = res.request(10, true);
            req.clone().await.unwrap();
            let result = timeout(&env, 100.0, Value::unit()).await;
            log.borrow_mut().push(("low-priority-holder-interrupted", env.now(), result.is_err()));
            if let Err(e) = result {
                let interrupt = e.downcast::<Interrupt>().unwrap();
                assert!(interrupt.cause.is::<Preempted>());
            }
            res.release(&req).ok();
            Ok(Value::unit())
        });
    }
    {
        let res = res.clone();
        let log = log.clone();
        env.process(move |env| async move {
            timeout(&env, 5.0, Value::unit()).await.unwrap();
            let req = res.request(0, true);
            req.clone().await.unwrap();
            log.borrow_mut().push(("high-priority-holder-granted", env.now(), false));
            res.release(&req).ok();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    let log = log.borrow();
    assert_eq!(log[0], ("low-priority-holder-interrupted", 5.0, true));
    assert_eq!(log[1], ("high-priority-holder-granted", 5.0, false));
}

#[test]
fn a_non_preempting_request_just_queues_behind_the_current_holder() {
    let env = Environment::new(0.0);
    let res = PreemptiveResource::new(&env, 1);
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let res = res.clone();
        let log = log.clone();
        env.process(move |env| async move {
            let req = res.request(10, true);
            req.clone().await.unwrap();
            let result = timeout(&env, 3.0, Value::unit()).await;
            log.borrow_mut().push(("low-priority-holder-finished", env.now(), result.is_err()));
            res.release(&req).ok();
            Ok(Value::unit())
        });
    }
    {
        let res = res.clone();
        let log = log.clone();
        env.process(move |env| async move {
            timeout(&env, 1.0, Value::unit()).await.unwrap();
            let req = res.request(0, false);
            req.clone().await.unwrap();
            log.borrow_mut().push(("high-priority-holder-granted", env.now(), false));
            res.release(&req).ok();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    let log = log.borrow();
    assert_eq!(log[0], ("low-priority-holder-finished", 3.0, false));
    assert_eq!(log[1], ("high-priority-holder-granted", 3.0, false));
}
