//! The classic interleave driver: two counters taking turns.
//!
//! Run with `RUST_LOG=trace` to watch the switch-level events.

use corolla::{Co, Schedule, Status};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sched = Schedule::new();
    let a = sched.spawn(counter(0));
    let b = sched.spawn(counter(100));

    while sched.status(a) != Status::Dead || sched.status(b) != Status::Dead {
        sched.resume(a);
        sched.resume(b);
    }

    println!("main: all coroutines finished");
}

fn counter(base: i32) -> impl FnOnce(&Co) + 'static {
    move |co: &Co| {
        for n in 0..5 {
            println!("coroutine {} : {}", co.running(), base + n);
            co.yield_now();
        }
    }
}
