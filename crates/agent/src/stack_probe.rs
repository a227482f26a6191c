//! Fault-guarded stack window capture.
//!
//! The detail payload may carry a bounded window of the callee's stack.
//! The stack pointer is attacker-controlled data as far as this code is
//! concerned: the window may run off the mapped stack, so the copy is
//! protected two ways - each page is checked for presence before it is
//! touched, and a temporary SIGSEGV handler is swapped in as the backstop
//! so a fault aborts the probe instead of the process. The first failure
//! stops the copy and the partial size is reported.
//!
//! Probes are serialized through a try-lock: the handler swap is
//! process-wide, and a contended probe simply skips capture (the hot path
//! never blocks).

#[cfg(unix)]
pub use imp::capture_stack_window;

#[cfg(not(unix))]
pub fn capture_stack_window(_stack_ptr: u64, _dest: &mut [u8]) -> usize {
    0
}

#[cfg(unix)]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    static PROBE_LOCK: Mutex<()> = Mutex::new(());
    static PROBE_FAULTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_probe_fault(_sig: libc::c_int) {
        PROBE_FAULTED.store(true, Ordering::SeqCst);
    }

    fn page_is_mapped(addr: usize) -> bool {
        // SAFETY: msync only inspects the mapping; ENOMEM means unmapped.
        let page = addr & !(page_size() - 1);
        unsafe { libc::msync(page as *mut libc::c_void, 1, libc::MS_ASYNC) == 0 }
    }

    fn page_size() -> usize {
        // SAFETY: plain sysconf query.
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    }

    /// Copies up to `dest.len()` bytes starting at `stack_ptr`, returning
    /// the bytes actually captured (0 on any immediate failure).
    pub fn capture_stack_window(stack_ptr: u64, dest: &mut [u8]) -> usize {
        if stack_ptr == 0 || dest.is_empty() {
            return 0;
        }
        // Contended probe: skip rather than block the hot path.
        let Ok(_guard) = PROBE_LOCK.try_lock() else {
            return 0;
        };

        PROBE_FAULTED.store(false, Ordering::SeqCst);

        // SAFETY: zeroed sigaction filled with our handler; the previous
        // disposition is saved and restored below.
        let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
        let mut new: libc::sigaction = unsafe { std::mem::zeroed() };
        new.sa_sigaction = on_probe_fault as usize;
        unsafe {
            libc::sigemptyset(&mut new.sa_mask);
            libc::sigaction(libc::SIGSEGV, &new, &mut old);
        }

        let src = stack_ptr as usize;
        let page = page_size();
        let mut copied = 0usize;

        const CHUNK: usize = 16;
        while copied < dest.len() && !PROBE_FAULTED.load(Ordering::SeqCst) {
            let at = src + copied;
            // Entering a page: make sure it is resident before touching it.
            if copied == 0 || (at & (page - 1)) < CHUNK {
                if !page_is_mapped(at) {
                    break;
                }
            }

            let n = CHUNK.min(dest.len() - copied);
            // SAFETY: the page was verified mapped; the volatile read plus
            // the installed handler bound the damage of a racing unmap.
            unsafe {
                let probe = std::ptr::read_volatile(at as *const u8);
                std::hint::black_box(probe);
                if PROBE_FAULTED.load(Ordering::SeqCst) {
                    break;
                }
                std::ptr::copy_nonoverlapping(at as *const u8, dest.as_mut_ptr().add(copied), n);
            }
            copied += n;
        }

        // SAFETY: restore the saved disposition.
        unsafe {
            libc::sigaction(libc::SIGSEGV, &old, std::ptr::null_mut());
        }

        copied
    }

}
