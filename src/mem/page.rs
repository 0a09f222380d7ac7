//! Page allocator: obtains and returns whole pages of anonymous memory
//! straight from the OS, bypassing the global allocator entirely.
//!
//! Grounded in `platform/Darwin/src/alloc/page.c`: zero-size requests
//! return null, out-of-memory is the only recoverable failure, and any
//! other failure aborts the process with a diagnostic — every caller above
//! this layer assumes a non-OOM mapping failure can never happen.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The platform's page size, queried once and cached.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let sz = sys::query_page_size();
    PAGE_SIZE.store(sz, Ordering::Relaxed);
    sz
}

/// Maps `size` bytes of zeroed, anonymous, read-write memory. Returns null
/// for a zero-size request. Aborts on any failure other than out-of-memory.
pub fn alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return ptr::null_mut();
    }
    sys::map(size)
}

/// Returns memory obtained from `alloc` back to the OS. `size` must match
/// the size originally requested. Aborts on failure.
///
/// # Safety
/// `ptr` must have been returned by `alloc(size)` and not already freed.
pub unsafe fn free(ptr: *mut u8, size: usize) {
    if ptr.is_null() || size == 0 {
        return;
    }
    sys::unmap(ptr, size);
}

#[cfg(unix)]
mod sys {
    use std::ptr;

    pub fn query_page_size() -> usize {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n <= 0 {
            abort_with("sysconf(_SC_PAGESIZE) failed");
        }
        n as usize
    }

    pub fn map(size: usize) -> *mut u8 {
        let p = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOMEM) {
                return ptr::null_mut();
            }
            abort_with(&format!("mmap failed: {err}"));
        }
        p as *mut u8
    }

    pub unsafe fn unmap(ptr: *mut u8, size: usize) {
        if libc::munmap(ptr as *mut libc::c_void, size) != 0 {
            abort_with(&format!("munmap failed: {}", std::io::Error::last_os_error()));
        }
    }

    fn abort_with(msg: &str) -> ! {
        eprintln!("arrowhead_core: fatal page allocator error: {msg}");
        std::process::abort();
    }
}

#[cfg(windows)]
mod sys {
    use std::ptr;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;
    use windows_sys::Win32::System::SystemInformation::SYSTEM_INFO;

    pub fn query_page_size() -> usize {
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    pub fn map(size: usize) -> *mut u8 {
        let p = unsafe {
            VirtualAlloc(
                ptr::null_mut(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if p.is_null() {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(8 /* ERROR_NOT_ENOUGH_MEMORY */)
                || err.raw_os_error() == Some(1455 /* ERROR_COMMITMENT_LIMIT */)
            {
                return ptr::null_mut();
            }
            abort_with(&format!("VirtualAlloc failed: {err}"));
        }
        p as *mut u8
    }

    pub unsafe fn unmap(ptr: *mut u8, _size: usize) {
        if VirtualFree(ptr as *mut _, 0, MEM_RELEASE) == 0 {
            abort_with(&format!("VirtualFree failed: {}", std::io::Error::last_os_error()));
        }
    }

    fn abort_with(msg: &str) -> ! {
        eprintln!("arrowhead_core: fatal page allocator error: {msg}");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_returns_null() {
        assert!(alloc(0).is_null());
    }

    #[test]
    fn page_size_is_plausible() {
        let sz = page_size();
        assert!(sz >= 4096);
        assert_eq!(sz & (sz - 1), 0, "page size must be a power of two");
    }

    #[test]
    fn round_trip() {
        let sz = page_size();
        let p = alloc(sz);
        assert!(!p.is_null());
        unsafe {
            ptr::write_bytes(p, 0xAB, sz);
            assert_eq!(*p, 0xAB);
            free(p, sz);
        }
    }
}
