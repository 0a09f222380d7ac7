//! Small synchronous socket operations that do not go through the
//! reactor: `listen`, `shutdown`, `close`, and the keepalive/nodelay/
//! reuseaddr option setters (§4.9's listener setters, §4.8's `shutdown`).
//! Everything here is a direct, blocking syscall — none of it submits a
//! completion.

use crate::error::{ErrorKind, Result};
use crate::net::addr::SockAddr;
use crate::reactor::RawHandle;
use crate::tcp::conn::ShutdownFlags;
use std::os::unix::io::{FromRawFd, IntoRawFd};

use super::err::last_os_error_kind;

pub fn into_raw_handle(socket: socket2::Socket) -> RawHandle {
    socket.into_raw_fd()
}

pub fn listen(fd: RawHandle, backlog: i32) -> Result<()> {
    let rc = unsafe { libc::listen(fd, backlog) };
    if rc != 0 {
        return Err(last_os_error_kind());
    }
    Ok(())
}

/// Connects `fd` (already non-blocking) to `remote`. A non-blocking
/// connect legitimately returns `EINPROGRESS`; that is not an error here —
/// the caller submits a write-readiness wait to the backend and learns
/// the real outcome from `SO_ERROR` once it fires.
pub fn connect_nonblocking(fd: RawHandle, remote: SockAddr) -> Result<()> {
    let std_addr: std::net::SocketAddr = remote.into();
    let sock_addr = socket2::SockAddr::from(std_addr);
    let rc = unsafe { libc::connect(fd, sock_addr.as_ptr() as *const libc::sockaddr, sock_addr.len()) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return Ok(());
    }
    Err(last_os_error_kind())
}

pub fn shutdown(fd: RawHandle, flags: ShutdownFlags) -> Result<()> {
    let how = match (flags.rd, flags.wr) {
        (true, true) => libc::SHUT_RDWR,
        (true, false) => libc::SHUT_RD,
        (false, true) => libc::SHUT_WR,
        (false, false) => return Ok(()),
    };
    let rc = unsafe { libc::shutdown(fd, how) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // The peer may already have closed its half; ENOTCONN here is
        // harmless since `shutdown` is documented as idempotent (§4.8).
        if err.raw_os_error() != Some(libc::ENOTCONN) {
            return Err(last_os_error_kind());
        }
    }
    Ok(())
}

pub fn close(fd: RawHandle) -> Result<()> {
    if fd < 0 {
        return Ok(());
    }
    // SAFETY: ownership of `fd` is transferred here to immediately close
    // it; the caller (ConnShared/ListenerShared) never touches it again.
    let socket = unsafe { socket2::Socket::from_raw_fd(fd) };
    drop(socket);
    Ok(())
}

pub fn set_keepalive(fd: RawHandle, on: bool) -> Result<()> {
    with_borrowed(fd, |s| s.set_keepalive(on))
}

pub fn set_nodelay(fd: RawHandle, on: bool) -> Result<()> {
    with_borrowed(fd, |s| s.set_tcp_nodelay(on))
}

pub fn set_reuseaddr(fd: RawHandle, on: bool) -> Result<()> {
    with_borrowed(fd, |s| s.set_reuse_address(on))
}

/// The remote address of an accepted connection, via `getpeername(2)`.
pub fn peer_addr(fd: RawHandle) -> Result<SockAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if rc != 0 {
        return Err(last_os_error_kind());
    }
    let sock_addr = unsafe { socket2::SockAddr::new(storage, len) };
    let std_addr = sock_addr.as_socket().ok_or(ErrorKind::Internal)?;
    Ok(std_addr.into())
}

/// The address a bound socket is listening or connected on, via
/// `getsockname(2)`.
pub fn local_addr(fd: RawHandle) -> Result<SockAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if rc != 0 {
        return Err(last_os_error_kind());
    }
    let sock_addr = unsafe { socket2::SockAddr::new(storage, len) };
    let std_addr = sock_addr.as_socket().ok_or(ErrorKind::Internal)?;
    Ok(std_addr.into())
}

/// Wraps `fd` in a `socket2::Socket` just long enough to call one option
/// setter, then forgets it without closing the descriptor — `socket2`'s
/// `Drop` would otherwise close a file descriptor this crate does not own
/// exclusively in this scope.
fn with_borrowed(fd: RawHandle, f: impl FnOnce(&socket2::Socket) -> std::io::Result<()>) -> Result<()> {
    let socket = unsafe { socket2::Socket::from_raw_fd(fd) };
    let result = f(&socket);
    std::mem::forget(socket);
    result.map_err(|e| last_os_error_kind_from(&e))
}

fn last_os_error_kind_from(e: &std::io::Error) -> ErrorKind {
    super::err::errno_to_kind(e.raw_os_error().unwrap_or(-1))
}
