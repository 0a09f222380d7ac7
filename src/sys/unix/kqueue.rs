//! The kqueue reactor backend (Darwin/BSD).
//!
//! Grounded in `tokio-rs/mio`'s `src/sys/unix/selector/kqueue.rs`: the
//! same `libc::kevent` change-list/event-list split, `EV_ONESHOT` so a
//! registration fires at most once before needing to be re-armed, and the
//! per-platform `Filter`/`Data`/`UData` type aliases BSD variants disagree
//! on the width of.
//!
//! kqueue is natively a *readiness* facility, not a completion one: a
//! `kevent` firing means "this fd is readable/writable now", not "this
//! read/write finished". This backend closes that gap itself — exactly
//! the "readiness-then-immediate-syscall" shape the original's own Darwin
//! backend uses — by performing the real `accept`/`connect`/`read`/`write`
//! syscall the instant the readiness event fires and synthesizing a
//! [`RawCompletion`] from its result, so everything above this module
//! never has to know kqueue isn't completion-based.

use crate::error::{ErrorKind, Result};
use crate::net::addr::SockAddr;
use crate::reactor::{Backend, RawCompletion, RawHandle, RawResult};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(not(target_os = "netbsd"))]
type Count = libc::c_int;
#[cfg(target_os = "netbsd")]
type Count = libc::size_t;

#[cfg(any(target_os = "freebsd", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Filter = i16;
#[cfg(target_os = "netbsd")]
type Filter = u32;

#[cfg(not(target_os = "netbsd"))]
type UData = *mut libc::c_void;
#[cfg(target_os = "netbsd")]
type UData = libc::intptr_t;

enum PendingOp {
    Accept,
    Connect,
    Read { ptr: *mut u8, len: usize },
    Write { ptr: *const u8, len: usize },
}

struct Pending {
    fd: RawFd,
    filter: Filter,
    op: PendingOp,
}

pub struct KqueueBackend {
    kq: RawFd,
    pending: HashMap<usize, Pending>,
}

impl KqueueBackend {
    pub fn new() -> Result<KqueueBackend> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(super::err::last_os_error_kind());
        }
        unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(KqueueBackend { kq, pending: HashMap::new() })
    }

    fn register(&mut self, fd: RawFd, filter: Filter, token: usize) -> Result<()> {
        let change = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags: libc::EV_ADD | libc::EV_ONESHOT | libc::EV_RECEIPT,
            fflags: 0,
            data: 0,
            udata: token as UData,
        };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                &change,
                1,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(super::err::last_os_error_kind());
        }
        Ok(())
    }

    fn rearm(&mut self, token: usize) -> Result<()> {
        let pending = self.pending.get(&token).expect("rearm of unknown token");
        self.register(pending.fd, pending.filter, token)
    }
}

impl Backend for KqueueBackend {
    fn register_listener(&mut self, _fd: RawHandle) -> Result<()> {
        // Registration happens per-submission (`EV_ONESHOT`); nothing to
        // do up front for kqueue.
        Ok(())
    }

    fn submit_accept(&mut self, listener_fd: RawHandle, token: usize) -> Result<()> {
        self.register(listener_fd, libc::EVFILT_READ, token)?;
        self.pending.insert(token, Pending { fd: listener_fd, filter: libc::EVFILT_READ, op: PendingOp::Accept });
        Ok(())
    }

    fn submit_connect(&mut self, fd: RawHandle, _addr: SockAddr, token: usize) -> Result<()> {
        // The actual `connect(2)` call already happened synchronously in
        // `sys::connect_nonblocking`; here we just wait for the socket to
        // become writable, which is how POSIX reports nonblocking connect
        // completion.
        self.register(fd, libc::EVFILT_WRITE, token)?;
        self.pending.insert(token, Pending { fd, filter: libc::EVFILT_WRITE, op: PendingOp::Connect });
        Ok(())
    }

    fn submit_read(&mut self, fd: RawHandle, buf: *mut u8, len: usize, token: usize) -> Result<()> {
        self.register(fd, libc::EVFILT_READ, token)?;
        self.pending.insert(token, Pending { fd, filter: libc::EVFILT_READ, op: PendingOp::Read { ptr: buf, len } });
        Ok(())
    }

    fn submit_write(&mut self, fd: RawHandle, buf: *const u8, len: usize, token: usize) -> Result<()> {
        self.register(fd, libc::EVFILT_WRITE, token)?;
        self.pending.insert(token, Pending { fd, filter: libc::EVFILT_WRITE, op: PendingOp::Write { ptr: buf, len } });
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<RawCompletion>> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map_or(std::ptr::null(), |t| t as *const _);

        let mut events: [libc::kevent; 64] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as Count,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            return Err(ErrorKind::Internal);
        }

        let mut out = Vec::with_capacity(n as usize);
        for ev in &events[..n as usize] {
            let token = ev.udata as usize;
            let Some(pending) = self.pending.remove(&token) else {
                continue; // cancelled or stale; drop silently
            };
            match self.complete(&pending, ev) {
                Completion::Done(result) => out.push(RawCompletion { token, result }),
                Completion::WouldBlock => {
                    // Spurious wakeup: put it back and re-arm.
                    let fd = pending.fd;
                    let filter = pending.filter;
                    self.pending.insert(token, pending);
                    if let Err(e) = self.register(fd, filter, token) {
                        self.pending.remove(&token);
                        out.push(RawCompletion { token, result: RawResult::Error(e) });
                    }
                }
            }
        }
        Ok(out)
    }
}

enum Completion {
    Done(RawResult),
    WouldBlock,
}

impl KqueueBackend {
    fn complete(&self, pending: &Pending, _ev: &libc::kevent) -> Completion {
        match &pending.op {
            PendingOp::Accept => {
                let client = unsafe {
                    libc::accept(pending.fd, std::ptr::null_mut(), std::ptr::null_mut())
                };
                if client < 0 {
                    return classify_would_block_or(|| RawResult::Error(super::err::last_os_error_kind()));
                }
                unsafe {
                    let flags = libc::fcntl(client, libc::F_GETFL, 0);
                    libc::fcntl(client, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
                Completion::Done(RawResult::Accepted(client))
            }
            PendingOp::Connect => {
                let mut err: libc::c_int = 0;
                let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
                let rc = unsafe {
                    libc::getsockopt(
                        pending.fd,
                        libc::SOL_SOCKET,
                        libc::SO_ERROR,
                        &mut err as *mut _ as *mut libc::c_void,
                        &mut len,
                    )
                };
                if rc != 0 || err != 0 {
                    let kind = super::err::errno_to_kind(if rc != 0 { -1 } else { err });
                    Completion::Done(RawResult::Error(kind))
                } else {
                    Completion::Done(RawResult::Bytes(0))
                }
            }
            PendingOp::Read { ptr, len } => {
                let n = unsafe { libc::read(pending.fd, *ptr as *mut libc::c_void, *len) };
                if n < 0 {
                    return classify_would_block_or(|| RawResult::Error(super::err::last_os_error_kind()));
                }
                Completion::Done(RawResult::Bytes(n as usize))
            }
            PendingOp::Write { ptr, len } => {
                let n = unsafe { libc::write(pending.fd, *ptr as *const libc::c_void, *len) };
                if n < 0 {
                    return classify_would_block_or(|| RawResult::Error(super::err::last_os_error_kind()));
                }
                Completion::Done(RawResult::Bytes(n as usize))
            }
        }
    }
}

fn classify_would_block_or(on_real_error: impl FnOnce() -> RawResult) -> Completion {
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EAGAIN) || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Completion::WouldBlock
    } else {
        Completion::Done(on_real_error())
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
