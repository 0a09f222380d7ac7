//! Platform backends. Each target OS gets exactly one module here,
//! selected at compile time; nothing above this layer references `libc`,
//! `io_uring`, `windows_sys` or `socket2` directly — they all go through
//! the small set of free functions re-exported here plus the
//! [`crate::reactor::Backend`] implementations the default reactor picks
//! up as `DefaultBackend`.

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(target_os = "linux")]
pub use unix::uring::UringBackend as DefaultBackend;

#[cfg(all(unix, not(target_os = "linux")))]
pub use unix::kqueue::KqueueBackend as DefaultBackend;

#[cfg(windows)]
pub use windows::iocp::IocpBackend as DefaultBackend;

#[cfg(unix)]
pub use unix::{
    close, connect_nonblocking, into_raw_handle, last_os_error_kind_of, listen, local_addr,
    peer_addr, set_keepalive, set_nodelay, set_reuseaddr, shutdown,
};

#[cfg(windows)]
pub use windows::{
    close, connect_nonblocking, into_raw_handle, last_os_error_kind_of, listen, local_addr,
    peer_addr, set_keepalive, set_nodelay, set_reuseaddr, shutdown,
};
