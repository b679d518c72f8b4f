//! The scheduler: coroutine table, shared execution stack, and the stack
//! save/restore discipline that lets every coroutine of a scheduler run on
//! that one stack.
//!
//! Control only ever moves between the main context and a single coroutine.
//! A resumed coroutine owns the shared stack until it yields or returns.
//! Yielding copies the live portion of the stack into the coroutine's save
//! buffer; the next resume copies it back to the exact addresses it was
//! captured at, so absolute pointers between frames survive the round trip.
//! Restoring anywhere else would corrupt frame pointers and spilled
//! references, which is the one invariant everything here is built around.

use std::any::Any;
use std::cell::RefCell;
use std::{panic, ptr};

use tracing::trace;

mod context_switch;
mod stack;

use context_switch::Context;
use stack::STACK_SIZE;

/// Handle value reported by [`Schedule::running`] while the main context is
/// active.
const MAIN: i32 = -1;

/// Coroutine table capacity before any growth.
const INITIAL_SLOTS: usize = 16;

/// Lifecycle stage of a coroutine slot.
///
/// The discriminants are stable and part of the public contract.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The slot is empty: the coroutine ran to completion, or the handle
    /// never named one.
    Dead = 0,
    /// Spawned but never resumed; no machine context or saved stack exists
    /// yet.
    Ready = 1,
    /// Currently executing on the shared stack.
    Running = 2,
    /// Yielded; the live stack is parked in the save buffer until the next
    /// resume.
    Suspend = 3,
}

type Body = Box<dyn FnOnce(&Co) + 'static>;

/// One coroutine record, owned by the scheduler through its table slot.
struct Coroutine {
    /// User entry point; consumed on first resume.
    body: Option<Body>,
    /// Where to continue from on the next resume.
    ctx: Context,
    /// Saved live portion of the shared stack. Empty until the first yield;
    /// reallocated to the exact live size whenever it is outgrown.
    saved: Vec<u8>,
    status: Status,
}

struct State {
    stack: stack::Stack,
    /// The caller's machine context while a coroutine runs.
    main: Context,
    table: slab::Slab<Coroutine>,
    /// Handle of the executing coroutine, or [`MAIN`].
    running: i32,
    /// Panic payload carried from a coroutine to the main context, re-raised
    /// at the resume call once the switch back has completed.
    poison: Option<Box<dyn Any + Send>>,
}

/// A single-threaded scheduler of shared-stack coroutines.
///
/// Every coroutine spawned on a `Schedule` executes on the scheduler's one
/// 1 MiB stack; a suspended coroutine holds only a heap copy of the stack
/// bytes it was actually using. Thousands of mostly-shallow coroutines
/// therefore cost kilobytes each instead of a per-coroutine stack
/// reservation.
///
/// Coroutines are cooperative and asymmetric: [`resume`](Schedule::resume)
/// is the only way in, [`Co::yield_now`] the only way out, and control
/// always returns to the resume call. The scheduler must stay on one OS
/// thread (it is neither `Send` nor `Sync`).
///
/// # Example
///
/// ```
/// use corolla::{Schedule, Status};
///
/// let sched = Schedule::new();
/// let id = sched.spawn(|co| {
///     co.yield_now();
/// });
///
/// sched.resume(id);
/// assert_eq!(sched.status(id), Status::Suspend);
///
/// sched.resume(id);
/// assert_eq!(sched.status(id), Status::Dead);
/// ```
pub struct Schedule {
    // boxed so the address handed to coroutines survives moves of the handle
    state: Box<RefCell<State>>,
}

impl Schedule {
    /// Creates a scheduler with an empty coroutine table and its own shared
    /// execution stack.
    ///
    /// # Panics
    ///
    /// If the stack region cannot be mapped. Allocation failure has no
    /// graceful degradation path anywhere in the runtime.
    pub fn new() -> Schedule {
        let stack = stack::Stack::new().expect("failed to map the shared execution stack");

        Schedule {
            state: Box::new(RefCell::new(State {
                stack,
                main: Context::empty(),
                table: slab::Slab::with_capacity(INITIAL_SLOTS),
                running: MAIN,
                poison: None,
            })),
        }
    }

    /// Adds a coroutine in status [`Ready`](Status::Ready) and returns its
    /// handle. No user code runs until the first [`resume`](Schedule::resume).
    ///
    /// Handles are table indices: stable for the coroutine's lifetime, and
    /// up for reuse by a later `spawn` once it dies.
    pub fn spawn(&self, body: impl FnOnce(&Co) + 'static) -> i32 {
        spawn_impl(&self.state, Box::new(body))
    }

    /// Transfers control to a coroutine until it yields or terminates.
    ///
    /// Resuming an empty slot within the table is a no-op, so a caller may
    /// blindly re-resume a coroutine that self-terminated between
    /// observations. If the coroutine body panics, the payload is re-raised
    /// from this call after teardown.
    ///
    /// # Panics
    ///
    /// If a coroutine is already running (yields are the only legal way
    /// back, so nested resumption is a bug in the caller), or if `id` is
    /// outside the table.
    pub fn resume(&self, id: i32) {
        resume_impl(&self.state, id)
    }

    /// Reports the status of a handle. Empty slots and negative handles
    /// report [`Dead`](Status::Dead); this is the polling interface for
    /// driving coroutines to completion.
    ///
    /// # Panics
    ///
    /// If `id` is at or beyond the table capacity.
    pub fn status(&self, id: i32) -> Status {
        status_impl(&self.state, id)
    }

    /// Handle of the coroutine currently executing, or `-1` from the main
    /// context.
    pub fn running(&self) -> i32 {
        self.state.borrow().running
    }

    /// Number of live (not yet terminated) coroutines.
    pub fn len(&self) -> usize {
        self.state.borrow().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current coroutine table capacity. Starts at 16 and doubles as needed;
    /// handles are always below it.
    pub fn capacity(&self) -> usize {
        self.state.borrow().table.capacity()
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::new()
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        // tearing down under a live coroutine would unmap the stack it runs on
        assert_eq!(
            self.state.borrow().running,
            MAIN,
            "schedule dropped while a coroutine is executing"
        );
        // the table drops with the scheduler: pending bodies run their
        // destructors, but a suspended coroutine's save buffer is raw stack
        // bytes and is released without unwinding the frames inside it
    }
}

/// In-coroutine view of the scheduler, lent to the body for the duration of
/// its run.
///
/// `Co` is the only source of [`yield_now`](Co::yield_now), and only the
/// runtime constructs one, so yielding from the main context is
/// unrepresentable rather than a runtime error.
pub struct Co {
    state: *const RefCell<State>,
}

impl Co {
    /// Suspends the calling coroutine and returns control to the
    /// [`resume`](Schedule::resume) call that entered it.
    ///
    /// The live portion of the shared stack is copied into the coroutine's
    /// save buffer first; the buffer is reallocated at the exact live size
    /// whenever it is too small. Returns when the coroutine is next resumed,
    /// with every local intact.
    pub fn yield_now(&self) {
        // safety: a Co only exists while its body runs, which is strictly
        // inside a resume call borrowing the schedule
        yield_impl(unsafe { &*self.state })
    }

    /// Same as [`Schedule::spawn`], usable while a coroutine runs.
    pub fn spawn(&self, body: impl FnOnce(&Co) + 'static) -> i32 {
        spawn_impl(unsafe { &*self.state }, Box::new(body))
    }

    /// Same as [`Schedule::status`].
    pub fn status(&self, id: i32) -> Status {
        status_impl(unsafe { &*self.state }, id)
    }

    /// Handle of the calling coroutine.
    pub fn running(&self) -> i32 {
        unsafe { &*self.state }.borrow().running
    }
}

fn spawn_impl(state: &RefCell<State>, body: Body) -> i32 {
    let mut s = state.borrow_mut();

    let index = s.table.insert(Coroutine {
        body: Some(body),
        ctx: Context::empty(),
        saved: Vec::new(),
        status: Status::Ready,
    });
    let id = i32::try_from(index).expect("coroutine table exhausted the handle space");

    trace!(id, "spawned");
    id
}

fn status_impl(state: &RefCell<State>, id: i32) -> Status {
    if id < 0 {
        return Status::Dead;
    }

    let s = state.borrow();
    assert!(
        (id as usize) < s.table.capacity(),
        "handle {id} is outside the coroutine table"
    );
    match s.table.get(id as usize) {
        Some(record) => record.status,
        None => Status::Dead,
    }
}

fn resume_impl(state: &RefCell<State>, id: i32) {
    // raw switch operands are collected under the borrow, which must be
    // released before the switch: the coroutine re-enters this state
    let (from, to) = {
        let mut s = state.borrow_mut();
        assert_eq!(s.running, MAIN, "resume requires the main context");
        assert!(
            id >= 0 && (id as usize) < s.table.capacity(),
            "handle {id} is outside the coroutine table"
        );

        let top = s.stack.top();
        let from = &mut s.main as *mut Context;
        let Some(record) = s.table.get_mut(id as usize) else {
            // self-terminated since last observed; resume stays callable
            return;
        };

        match record.status {
            Status::Ready => {
                trace!(id, "first resume");
                record.ctx = Context::first_activation(
                    top,
                    trampoline,
                    state as *const RefCell<State> as *mut (),
                );
            }
            Status::Suspend => {
                trace!(id, saved = record.saved.len(), "resume");
                // put the saved frames back at the addresses they were
                // captured at: the top of the shared stack
                let len = record.saved.len();
                unsafe { ptr::copy_nonoverlapping(record.saved.as_ptr(), top.sub(len), len) };
                record.saved.clear();
            }
            Status::Running | Status::Dead => {
                panic!("resume of a coroutine in status {:?}", record.status)
            }
        }

        record.status = Status::Running;
        let to = &record.ctx as *const Context;
        s.running = id;
        (from, to)
    };

    unsafe { context_switch::corolla_swap_context(from, to) };

    // back on the main context; a panic caught on the coroutine side
    // surfaces here, at the call that was driving it
    let poison = state.borrow_mut().poison.take();
    if let Some(payload) = poison {
        panic::resume_unwind(payload);
    }
}

/// Entry point of every coroutine; runs on the shared stack.
///
/// Runs the body, then tears the coroutine down: the slot is vacated (save
/// buffer and record released) and the main context is reinstated. The
/// final switch abandons this frame wholesale, which is fine because
/// everything it owned has been moved out or dropped by then.
extern "C" fn trampoline(arg: *mut ()) -> ! {
    let state = unsafe { &*(arg as *const RefCell<State>) };

    let (id, body) = {
        let mut s = state.borrow_mut();
        let id = s.running;
        let body = s.table[id as usize]
            .body
            .take()
            .expect("coroutine entered twice");
        (id, body)
    };

    // unwinding off a context-switched stack is undefined; park the payload
    // and re-raise it once the main context is restored
    let co = Co { state };
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| body(&co)));

    let to = {
        let mut s = state.borrow_mut();
        s.table.remove(id as usize);
        s.running = MAIN;
        if let Err(payload) = result {
            s.poison = Some(payload);
        }
        trace!(id, "terminated");
        &s.main as *const Context
    };

    let mut dummy = Context::empty();
    unsafe { context_switch::corolla_swap_context(&mut dummy, to) };
    unreachable!()
}

fn yield_impl(state: &RefCell<State>) {
    save_live_stack(state);

    let (from, to) = {
        let mut s = state.borrow_mut();
        let id = s.running;
        s.running = MAIN;
        let record = &mut s.table[id as usize];
        record.status = Status::Suspend;
        let from = &mut record.ctx as *mut Context;
        (from, &s.main as *const Context)
    };

    // control comes back through here on the next resume, after that resume
    // has re-copied the frames captured above onto the shared stack
    unsafe { context_switch::corolla_swap_context(from, to) };
}

/// Copies the live portion of the shared stack into the save buffer of the
/// running coroutine.
///
/// Never inlined: the address of `watermark` bounds the live region from
/// below, and taking it one call frame deeper than the switch keeps the
/// whole of the yielding frame inside the saved image.
#[inline(never)]
fn save_live_stack(state: &RefCell<State>) {
    let watermark = 0u8;
    let watermark = &watermark as *const u8;

    let mut s = state.borrow_mut();
    let id = s.running;
    assert_ne!(id, MAIN, "yield requires a running coroutine");

    let top = s.stack.top();
    let live = top as usize - watermark as usize;
    assert!(live <= STACK_SIZE, "shared stack overflow");
    trace!(id, live, "yield");

    let record = &mut s.table[id as usize];
    if record.saved.capacity() < live {
        // the old bytes are dead, so no point copying them over: replace
        // the buffer instead of growing it
        record.saved = Vec::with_capacity(live);
    }
    unsafe {
        ptr::copy_nonoverlapping(watermark, record.saved.as_mut_ptr(), live);
        record.saved.set_len(live);
    }
}
