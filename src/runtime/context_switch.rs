//! Abstraction over userspace context switching.
//!
//! A context switch saves the current machine context (instruction pointer,
//! stack pointer, callee-saved registers) into one [`Context`] image and
//! installs another. The images live in the scheduler and its coroutine
//! records, never on the shared execution stack, because the region of that
//! stack below the save watermark is clobbered whenever another coroutine
//! runs.

use std::arch::global_asm;

/// Saved machine context. Field order matches the offsets in the assembly,
/// which reads and writes the image directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Context {
    rip: u64,
    rsp: u64,
    rbx: u64,
    rbp: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// An all-zero image, filled in by the first swap out of it.
    pub(super) fn empty() -> Self {
        Self::default()
    }

    /// Builds the context of a coroutine that has never run: control enters
    /// `entry` with `arg` as its only argument, on the stack whose highest
    /// address is `stack_top`.
    ///
    /// The argument travels in a callee-saved register and is forwarded by
    /// the `corolla_begin_coroutine` shim, so a single pointer-sized value
    /// passes through the switch without touching the stack.
    pub(super) fn first_activation(
        stack_top: *mut u8,
        entry: extern "C" fn(*mut ()) -> !,
        arg: *mut (),
    ) -> Self {
        // Entered with a jump, so leave rsp where a call would have: eight
        // bytes below a 16-byte boundary.
        let rsp = ((stack_top as usize) & !0xf) - 8;

        Context {
            rip: corolla_begin_coroutine as usize as u64,
            rsp: rsp as u64,
            r12: arg as u64,
            r13: entry as usize as u64,
            ..Self::default()
        }
    }
}

extern "C" {
    /// Executes a context switch.
    ///
    /// Saves the running context into `save`, then activates `load`. Returns
    /// only when some later switch activates `save` again.
    pub(super) fn corolla_swap_context(save: *mut Context, load: *const Context);

    /// Entry shim; only its address is taken.
    fn corolla_begin_coroutine() -> !;
}

#[cfg(not(all(target_arch = "x86_64", not(windows))))]
compile_error!("corolla only supports x86_64 System V targets");

#[cfg(all(target_arch = "x86_64", not(windows)))]
global_asm!(include_str!("assembly/x86_64.s"));
