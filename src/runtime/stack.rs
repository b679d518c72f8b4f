//! The shared execution stack.

use std::{ffi, io, ptr};

/// Usable bytes of the execution stack every coroutine of a scheduler runs
/// on. Bounds the deepest call chain a single coroutine may build.
pub(super) const STACK_SIZE: usize = 1024 * 1024;

/// One mmap'd region: a guard page at the lowest addresses, then
/// [`STACK_SIZE`] usable bytes. Demand paging ensures physical memory is
/// committed only as frames are actually written. The stack grows downward
/// from [`top`](Stack::top) toward the guard page, so a gross overrun faults
/// instead of corrupting neighboring allocations.
#[derive(Debug)]
pub(super) struct Stack {
    pointer: *mut u8,
    length: usize,
}

impl Stack {
    pub(super) fn new() -> io::Result<Self> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        assert_eq!(STACK_SIZE % page_size, 0);
        let length = page_size + STACK_SIZE;

        // kernel hands out a zeroed block of virtual memory
        let pointer = unsafe {
            libc::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if pointer == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // if guarding memory goes wrong the mapping gets cleaned up in drop
        let stack = Stack {
            pointer: pointer as *mut u8,
            length,
        };

        // located at the lowest addresses since the stack grows downward
        let result = unsafe { libc::mprotect(pointer, page_size, libc::PROT_NONE) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(stack)
    }

    /// Highest address of the region; the initial stack pointer of a
    /// coroutine that has never run, and the base every saved stack image is
    /// measured from.
    pub(super) fn top(&self) -> *mut u8 {
        // safety: part of the same allocation, can't overflow
        unsafe { self.pointer.add(self.length) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.pointer as *mut ffi::c_void, self.length) };
        assert_eq!(result, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes() {
        let stack = Stack::new().unwrap();
        unsafe {
            let pointer = stack.top().sub(1);
            pointer.write(123);
            assert_eq!(pointer.read(), 123);
        }
    }

    #[test]
    fn usable_region_spans_stack_size() {
        let stack = Stack::new().unwrap();
        unsafe {
            let pointer = stack.top().sub(STACK_SIZE);
            pointer.write(45);
            assert_eq!(pointer.read(), 45);
        }
    }

    #[test]
    #[ignore = "aborts process"]
    fn overflow_hits_guard_page() {
        let stack = Stack::new().unwrap();
        unsafe {
            let pointer = stack.top().sub(STACK_SIZE + 1);
            pointer.write(123);
        }
    }
}
