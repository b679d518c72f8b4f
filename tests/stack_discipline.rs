//! Save/restore correctness across deep call chains.
//!
//! A suspended coroutine's frames are restored to the exact addresses they
//! were captured at, so every local and every pointer between frames must
//! come back intact, however deep the chain that yielded.

use corolla::{Co, Schedule, Status};

const DEPTH: usize = 100;

#[test]
fn sentinels_survive_a_yield_from_the_innermost_frame() {
    let sched = Schedule::new();
    let id = sched.spawn(|co| descend(co, 0));

    sched.resume(id); // runs until the innermost frame yields
    assert_eq!(sched.status(id), Status::Suspend);

    sched.resume(id); // unwinds the chain, verifying every frame
    assert_eq!(sched.status(id), Status::Dead);
}

#[test]
fn deep_and_shallow_coroutines_share_the_stack() {
    let sched = Schedule::new();
    let deep = sched.spawn(|co| descend(co, 0));
    let shallow = sched.spawn(|co| {
        for _ in 0..3 {
            co.yield_now();
        }
    });

    // the shallow coroutine clobbers the stack region the deep one saved
    while sched.status(deep) != Status::Dead || sched.status(shallow) != Status::Dead {
        sched.resume(deep);
        sched.resume(shallow);
    }
}

#[test]
fn repeated_round_trips_reproduce_every_local() {
    let sched = Schedule::new();
    let id = sched.spawn(|co| {
        let baseline: Vec<u64> = (0..256).collect();
        let mirror = baseline.clone();
        for _ in 0..10 {
            co.yield_now();
            assert_eq!(mirror, baseline);
        }
    });

    while sched.status(id) != Status::Dead {
        sched.resume(id);
    }
}

fn descend(co: &Co, depth: usize) {
    let mut sentinels = [0usize; 16];
    for (i, slot) in sentinels.iter_mut().enumerate() {
        *slot = depth * 31 + i;
    }

    if depth == DEPTH {
        co.yield_now();
    } else {
        descend(co, depth + 1);
    }

    for (i, slot) in sentinels.iter().enumerate() {
        assert_eq!(*slot, depth * 31 + i, "frame at depth {depth} corrupted");
    }
}
