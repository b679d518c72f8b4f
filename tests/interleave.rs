//! Two coroutines taking turns on one shared stack.

use std::cell::RefCell;
use std::rc::Rc;

use corolla::{Schedule, Status};

#[test]
fn two_coroutines_interleave_deterministically() {
    let sched = Schedule::new();
    let output = Rc::new(RefCell::new(Vec::new()));

    let a = spawn_worker(&sched, "A", output.clone());
    let b = spawn_worker(&sched, "B", output.clone());

    for _ in 0..3 {
        sched.resume(a);
        sched.resume(b);
    }

    assert_eq!(*output.borrow(), ["A1", "B1", "A2", "B2", "A3", "B3"]);
    assert_eq!(sched.status(a), Status::Dead);
    assert_eq!(sched.status(b), Status::Dead);
    assert_eq!(sched.len(), 0);
}

#[test]
fn drive_to_completion_by_polling_status() {
    let sched = Schedule::new();
    let output = Rc::new(RefCell::new(Vec::new()));

    let a = spawn_worker(&sched, "A", output.clone());
    let b = spawn_worker(&sched, "B", output.clone());

    while sched.status(a) != Status::Dead || sched.status(b) != Status::Dead {
        // resuming an already-dead handle is a permitted no-op
        sched.resume(a);
        sched.resume(b);
    }

    assert_eq!(output.borrow().len(), 6);
    assert!(sched.is_empty());
}

fn spawn_worker(sched: &Schedule, name: &'static str, log: Rc<RefCell<Vec<String>>>) -> i32 {
    sched.spawn(move |co| {
        for round in 1..=3 {
            log.borrow_mut().push(format!("{name}{round}"));
            if round < 3 {
                co.yield_now();
            }
        }
    })
}
