//! Shared-stack coroutines for a single thread.
//!
//! A [`Schedule`] owns one 1 MiB execution stack and a table of coroutines
//! that take turns running on it. When a coroutine yields, the live portion
//! of that stack is copied into a per-coroutine save buffer; resuming copies
//! it back. Switches cost a memcpy proportional to the coroutine's actual
//! stack depth, and in exchange a suspended coroutine occupies only that
//! many heap bytes instead of a full stack reservation.
//!
//! Scheduling is cooperative and asymmetric: the host drives coroutines by
//! handle with [`Schedule::resume`], and a running coroutine hands control
//! back with [`Co::yield_now`]. There is no preemption, no I/O integration,
//! and no cross-thread use; the scheduler is a building block for things
//! like actor loops and generators, not an event loop.
//!
//! ```
//! use corolla::{Schedule, Status};
//!
//! let sched = Schedule::new();
//!
//! let ping = sched.spawn(|co| {
//!     for n in 0..3 {
//!         println!("ping {n}");
//!         co.yield_now();
//!     }
//! });
//!
//! while sched.status(ping) != Status::Dead {
//!     sched.resume(ping);
//! }
//! ```

mod runtime;

pub use runtime::{Co, Schedule, Status};
