pub mod err;
pub mod socket;

#[cfg(target_os = "linux")]
pub mod uring;

#[cfg(not(target_os = "linux"))]
pub mod kqueue;

pub use err::last_os_error_kind;
pub use socket::{
    close, connect_nonblocking, into_raw_handle, listen, local_addr, peer_addr, set_keepalive,
    set_nodelay, set_reuseaddr, shutdown,
};

/// Maps the `errno` carried by an already-observed `std::io::Error` (e.g.
/// one `socket2` returned from a `setsockopt`/`bind` call) into this
/// crate's closed error kind, instead of re-reading `errno` a second time.
pub fn last_os_error_kind_of(e: &std::io::Error) -> crate::error::ErrorKind {
    err::errno_to_kind(e.raw_os_error().unwrap_or(-1))
}
