//! End-to-end scenario tests grounded in the classic SimPy examples found in
//! `examples/original_source/performance/examples/` (`bank_renege.py`,
//! `carwash.py`, `gas_station_refuel.py`, `latency.py`,
//! `process_communication.py`, `movie_renege.py`). These assert this
//! engine's own determinism and structural invariants, not numeric parity
//! with the Python originals (the RNG sequences differ crate-to-crate).

use std::cell::RefCell;
use std::rc::Rc;

use desim::{timeout, Container, Environment, Event, Resource, RunUntil, Store, Value};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Grounded on `bank_renege.py`: a customer requests a teller but reneges
/// (gives up) if it isn't granted within its patience window. Run twice with
/// the same seed and confirm the outcome is identical both times.
#[test]
fn bank_renege_is_deterministic_under_a_fixed_seed() {
    fn run_once(seed: u64) -> Vec<(String, bool, f64)> {
        let env = Environment::new(0.0);
        let counter = Resource::new(&env, 1);
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        for i in 0..5 {
            let name = format!("customer-{i}");
            let patience = rng.gen_range(1.0..3.0);
            let time_in_bank = rng.gen_range(5.0..15.0);
            let counter = counter.clone();
            let log = log.clone();
            env.process(move |env| async move {
                let arrive = env.now();
                let req = counter.request();
                let renege_timeout = timeout(&env, patience, Value::unit());
                (req.clone() | renege_timeout).await.ok();

                if req.is_triggered() {
                    timeout(&env, time_in_bank, Value::unit()).await.unwrap();
                    log.borrow_mut().push((name, true, env.now() - arrive));
                    counter.release(&req).ok();
                } else {
                    log.borrow_mut().push((name, false, env.now() - arrive));
                }
                Ok(Value::unit())
            });
        }
        env.run(RunUntil::Forever).unwrap();
        let mut log = log.borrow().clone();
        log.sort_by(|a, b| a.0.cmp(&b.0));
        log
    }

    let first = run_once(7);
    let second = run_once(7);
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

/// Grounded on `carwash.py`: a fixed number of wash bays serialize car
/// washes; no more cars are in service simultaneously than there are bays.
#[test]
fn carwash_never_runs_more_cars_than_it_has_bays() {
    let env = Environment::new(0.0);
    let bays = Resource::new(&env, 2);
    let in_service = Rc::new(RefCell::new(0usize));
    let max_in_service = Rc::new(RefCell::new(0usize));

    for _ in 0..6 {
        let bays = bays.clone();
        let in_service = in_service.clone();
        let max_in_service = max_in_service.clone();
        env.process(move |env| async move {
            let req = bays.request();
            req.clone().await.unwrap();
            *in_service.borrow_mut() += 1;
            {
                let cur = *in_service.borrow();
                let mut m = max_in_service.borrow_mut();
                *m = (*m).max(cur);
            }
            timeout(&env, 5.0, Value::unit()).await.unwrap();
            *in_service.borrow_mut() -= 1;
            bays.release(&req).ok();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert!(*max_in_service.borrow() <= 2);
    assert_eq!(*in_service.borrow(), 0);
}

/// Grounded on `gas_station_refuel.py`: cars draw fuel from a shared tank
/// (a `Container`); a tanker truck refills it once it runs low. The tank
/// level never goes negative and never exceeds its capacity.
#[test]
fn gas_station_tank_stays_within_bounds_while_cars_refuel() {
    let env = Environment::new(0.0);
    let tank = Container::new(&env, 200.0, 100.0);
    let breached = Rc::new(RefCell::new(false));

    for i in 0..8 {
        let tank = tank.clone();
        let breached = breached.clone();
        env.process(move |env| async move {
            timeout(&env, i as f64, Value::unit()).await.unwrap();
            tank.get(40.0).await.unwrap();
            if tank.level() < 0.0 || tank.level() > tank.capacity() {
                *breached.borrow_mut() = true;
            }
            Ok(Value::unit())
        });
    }
    {
        let tank = tank.clone();
        let breached = breached.clone();
        env.process(move |env| async move {
            loop {
                timeout(&env, 3.0, Value::unit()).await.unwrap();
                if tank.level() < tank.capacity() {
                    let room = tank.capacity() - tank.level();
                    tank.put(room.min(100.0)).await.unwrap();
                    if tank.level() < 0.0 || tank.level() > tank.capacity() {
                        *breached.borrow_mut() = true;
                    }
                }
                if env.now() > 30.0 {
                    break;
                }
            }
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Time(40.0)).unwrap();
    assert!(!*breached.borrow());
}

/// Grounded on `latency.py`: a producer pushes packets into a `Store`
/// representing a cable, and a consumer drains them — with a propagation
/// delay before each packet becomes visible — preserving arrival order.
#[test]
fn latency_cable_preserves_packet_order() {
    let env = Environment::new(0.0);
    let cable: Store<u32> = Store::new(&env, 100);
    let received = Rc::new(RefCell::new(Vec::new()));

    {
        let cable = cable.clone();
        env.process(move |env| async move {
            for seq in 0..5u32 {
                timeout(&env, 1.0, Value::unit()).await.unwrap();
                // Propagation delay: the packet is only visible downstream
                // after `latency` units from when it's sent.
                let latency = 2.0;
                let cable2 = cable.clone();
                env.process(move |env| async move {
                    timeout(&env, latency, Value::unit()).await.unwrap();
                    cable2.put(seq).await.unwrap();
                    Ok(Value::unit())
                });
            }
            Ok(Value::unit())
        });
    }
    {
        let cable = cable.clone();
        let received = received.clone();
        env.process(move |_env| async move {
            for _ in 0..5 {
                let v = cable.get().await.unwrap();
                received.borrow_mut().push(*v.downcast::<u32>().unwrap());
            }
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*received.borrow(), vec![0, 1, 2, 3, 4]);
}

/// Grounded on `process_communication.py`: a producer and a consumer
/// communicate purely through a `Store`, with no shared mutable state other
/// than the store itself.
#[test]
fn process_communication_via_store_delivers_every_message() {
    let env = Environment::new(0.0);
    let mailbox: Store<String> = Store::new(&env, 4);
    let received = Rc::new(RefCell::new(Vec::new()));

    {
        let mailbox = mailbox.clone();
        env.process(move |env| async move {
            for i in 0..10 {
                mailbox.put(format!("msg-{i}")).await.unwrap();
                timeout(&env, 0.5, Value::unit()).await.unwrap();
            }
            Ok(Value::unit())
        });
    }
    {
        let mailbox = mailbox.clone();
        let received = received.clone();
        env.process(move |_env| async move {
            for _ in 0..10 {
                let msg = mailbox.get().await.unwrap();
                received.borrow_mut().push((*msg.downcast::<String>().unwrap()).clone());
            }
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
    assert_eq!(*received.borrow(), expected);
}

/// Grounded on `movie_renege.py`: a single ticket counter sells tickets for
/// a movie; once it sells out, a shared `sold_out` event fires and every
/// moviegoer still waiting in line gives up instead of buying a ticket.
#[test]
fn movie_renege_reneges_everyone_still_queued_once_sold_out_fires() {
    let env = Environment::new(0.0);
    let counter = Resource::new(&env, 1);
    let sold_out = Event::new(&env);
    let bought = Rc::new(RefCell::new(0usize));
    let reneged = Rc::new(RefCell::new(0usize));

    // Five moviegoers queue up immediately for a one-window counter; each
    // purchase takes 1.0 time unit, so by the time the fourth reaches the
    // window the counter (grounded on the original's `available < 2`
    // check) has decided the movie is sold out and fires `sold_out`.
    for _ in 0..5 {
        let counter = counter.clone();
        let sold_out = sold_out.clone();
        let bought = bought.clone();
        let reneged = reneged.clone();
        env.process(move |env| async move {
            let my_turn = counter.request();
            let result = (my_turn.clone() | sold_out.clone()).await;
            if result.is_err() || !my_turn.is_triggered() {
                *reneged.borrow_mut() += 1;
                return Ok(Value::unit());
            }
            *bought.borrow_mut() += 1;
            if *bought.borrow() >= 3 {
                sold_out.succeed(Value::unit()).ok();
            }
            timeout(&env, 1.0, Value::unit()).await.unwrap();
            counter.release(&my_turn).ok();
            Ok(Value::unit())
        });
    }
    env.run(RunUntil::Forever).unwrap();
    assert_eq!(*bought.borrow(), 3);
    assert_eq!(*reneged.borrow(), 2);
}
