//! The event loop: a single-threaded completion reactor owning a
//! completion-record slab, a cached monotonic clock, and a lifecycle
//! state machine.
//!
//! An `EventLoop` is cheap to clone (it is an `Rc` handle) and that `Rc`
//! is exactly what makes every handle in this crate `!Send`/`!Sync` for
//! free — there is no atomic refcount to race on, so the compiler itself
//! refuses to let a loop or anything bound to it cross a thread boundary.

pub mod completion;

use crate::error::ErrorKind;
use crate::mem::SlabAllocator;
use crate::time::Time;
pub use completion::CompletionOutcome;
use completion::{CompletionKind, CompletionRecord};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawSocket;

/// What a platform backend reports for one drained completion.
pub enum RawResult {
    Bytes(usize),
    Accepted(RawHandle),
    Error(ErrorKind),
}

pub struct RawCompletion {
    pub token: usize,
    pub result: RawResult,
}

/// The per-platform completion engine. Implementors own the raw kernel
/// handle (kqueue fd, io_uring ring, IOCP handle) and translate this
/// crate's submit/wait vocabulary into the platform's own calls.
///
/// `token` is always the address of a `CompletionRecord` slot, cast to
/// `usize` — backends pass it through as `user_data`/`udata`/the
/// `OVERLAPPED` pointer without interpreting it.
pub trait Backend {
    fn register_listener(&mut self, fd: RawHandle) -> crate::error::Result<()>;
    fn submit_accept(&mut self, listener_fd: RawHandle, token: usize) -> crate::error::Result<()>;
    fn submit_connect(
        &mut self,
        fd: RawHandle,
        addr: crate::net::addr::SockAddr,
        token: usize,
    ) -> crate::error::Result<()>;
    fn submit_read(
        &mut self,
        fd: RawHandle,
        buf: *mut u8,
        len: usize,
        token: usize,
    ) -> crate::error::Result<()>;
    fn submit_write(
        &mut self,
        fd: RawHandle,
        buf: *const u8,
        len: usize,
        token: usize,
    ) -> crate::error::Result<()>;
    /// Blocks until at least one completion is ready, or `timeout`
    /// elapses (`None` blocks indefinitely).
    fn wait(&mut self, timeout: Option<Duration>) -> crate::error::Result<Vec<RawCompletion>>;
}

/// A backend that performs no real I/O and refuses every submission.
/// Backs [`EventLoop::inert`] only.
struct NullBackend;

impl Backend for NullBackend {
    fn register_listener(&mut self, _fd: RawHandle) -> crate::error::Result<()> {
        Err(ErrorKind::State)
    }
    fn submit_accept(&mut self, _listener_fd: RawHandle, _token: usize) -> crate::error::Result<()> {
        Err(ErrorKind::State)
    }
    fn submit_connect(
        &mut self,
        _fd: RawHandle,
        _addr: crate::net::addr::SockAddr,
        _token: usize,
    ) -> crate::error::Result<()> {
        Err(ErrorKind::State)
    }
    fn submit_read(&mut self, _fd: RawHandle, _buf: *mut u8, _len: usize, _token: usize) -> crate::error::Result<()> {
        Err(ErrorKind::State)
    }
    fn submit_write(&mut self, _fd: RawHandle, _buf: *const u8, _len: usize, _token: usize) -> crate::error::Result<()> {
        Err(ErrorKind::State)
    }
    fn wait(&mut self, _timeout: Option<Duration>) -> crate::error::Result<Vec<RawCompletion>> {
        Err(ErrorKind::State)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initial,
    Running,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
}

impl LoopState {
    pub fn is_running(self) -> bool {
        self == LoopState::Running
    }

    pub fn is_term(self) -> bool {
        matches!(self, LoopState::Terminating | LoopState::Terminated)
    }
}

struct EventLoopInner {
    backend: Box<dyn Backend>,
    completions: SlabAllocator<CompletionRecord>,
    cached_now: Time,
    state: LoopState,
    in_run_until: bool,
}

/// A handle to a shared event loop. Cloning shares the same underlying
/// reactor; every clone observes the same lifecycle state.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<EventLoopInner>>,
}

impl EventLoop {
    pub fn new() -> crate::error::Result<EventLoop> {
        let backend: Box<dyn Backend> = Box::new(crate::sys::DefaultBackend::new()?);
        Ok(EventLoop {
            inner: Rc::new(RefCell::new(EventLoopInner {
                backend,
                completions: SlabAllocator::new(),
                cached_now: Time::now(),
                state: LoopState::Initial,
                in_run_until: false,
            })),
        })
    }

    /// An inert loop backed by [`NullBackend`], which performs no real
    /// kernel calls and errors on every submission. Used only to give
    /// [`crate::tcp::conn::ConnShared::placeholder`] and its listener
    /// counterpart a cheap `EventLoop` to embed; never run via `run_until`.
    pub(crate) fn inert() -> EventLoop {
        EventLoop {
            inner: Rc::new(RefCell::new(EventLoopInner {
                backend: Box::new(NullBackend),
                completions: SlabAllocator::new(),
                cached_now: Time::ZERO,
                state: LoopState::Terminated,
                in_run_until: false,
            })),
        }
    }

    pub fn now(&self) -> Time {
        self.inner.borrow().cached_now
    }

    pub fn state(&self) -> LoopState {
        self.inner.borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_term(&self) -> bool {
        self.state().is_term()
    }

    /// Allocates a completion record for `kind` and submits the matching
    /// kernel operation, using the record's own address as the token.
    /// On submission failure the record is freed immediately and the
    /// error is returned synchronously, per the read/write/connect/accept
    /// contracts in `tcp::conn`/`tcp::listener`.
    pub(crate) fn submit_read(
        &self,
        fd: RawHandle,
        buf: *mut u8,
        len: usize,
        subject: Rc<RefCell<crate::tcp::conn::ConnShared>>,
    ) -> crate::error::Result<()> {
        self.submit(CompletionKind::TcpConnRead(subject), |backend, token| {
            backend.submit_read(fd, buf, len, token)
        })
    }

    pub(crate) fn submit_write(
        &self,
        fd: RawHandle,
        buf: *const u8,
        len: usize,
        subject: Rc<RefCell<crate::tcp::conn::ConnShared>>,
    ) -> crate::error::Result<()> {
        self.submit(CompletionKind::TcpConnWrite(subject), |backend, token| {
            backend.submit_write(fd, buf, len, token)
        })
    }

    pub(crate) fn submit_connect(
        &self,
        fd: RawHandle,
        addr: crate::net::addr::SockAddr,
        subject: Rc<RefCell<crate::tcp::conn::ConnShared>>,
    ) -> crate::error::Result<()> {
        self.submit(CompletionKind::TcpConnConnect(subject), |backend, token| {
            backend.submit_connect(fd, addr, token)
        })
    }

    pub(crate) fn submit_accept(
        &self,
        listener_fd: RawHandle,
        subject: Rc<RefCell<crate::tcp::listener::ListenerShared>>,
    ) -> crate::error::Result<()> {
        self.submit(CompletionKind::TcpListenerAccept(subject), |backend, token| {
            backend.submit_accept(listener_fd, token)
        })
    }

    pub(crate) fn register_listener(&self, fd: RawHandle) -> crate::error::Result<()> {
        self.inner.borrow_mut().backend.register_listener(fd)
    }

    fn submit(
        &self,
        kind: CompletionKind,
        op: impl FnOnce(&mut dyn Backend, usize) -> crate::error::Result<()>,
    ) -> crate::error::Result<()> {
        let mut inner = self.inner.borrow_mut();
        let record_ptr: NonNull<CompletionRecord> = inner.completions.alloc(CompletionRecord::new(kind));
        let token = record_ptr.as_ptr() as usize;
        let result = op(&mut *inner.backend, token);
        if let Err(e) = result {
            let completions = inner.completions.clone();
            drop(inner);
            unsafe { completions.free(record_ptr) };
            return Err(e);
        }
        Ok(())
    }

    /// Runs the reactor until `deadline` (if given) passes or `stop`/`term`
    /// is called. Preconditions: state must be `Initial` or `Stopped`; not
    /// already inside a `run_until` call on this loop (no nested reactor).
    pub fn run_until(&self, deadline: Option<Time>) -> crate::error::Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.in_run_until {
                return Err(ErrorKind::State);
            }
            if !matches!(inner.state, LoopState::Initial | LoopState::Stopped) {
                return Err(ErrorKind::State);
            }
            inner.state = LoopState::Running;
            inner.in_run_until = true;
        }
        debug!(target: "arrowhead_core::reactor", "loop entering run_until");

        loop {
            {
                let mut inner = self.inner.borrow_mut();
                inner.cached_now = Time::now();
            }

            let state = self.inner.borrow().state;
            if state != LoopState::Running {
                break;
            }

            let timeout = match deadline {
                None => None,
                Some(d) => {
                    let now = self.now();
                    match d.diff(now) {
                        Ok(remaining) if d.is_after(now) => Some(remaining),
                        _ => {
                            // Deadline has passed (or is not comparable,
                            // e.g. Time::ZERO): exit without blocking.
                            Some(Duration::ZERO)
                        }
                    }
                }
            };

            if timeout == Some(Duration::ZERO) && deadline.is_some() {
                break;
            }

            let drained = {
                let mut inner = self.inner.borrow_mut();
                inner.backend.wait(timeout)?
            };

            for raw in drained {
                self.dispatch(raw);
                if !self.inner.borrow().state.is_running() {
                    break;
                }
            }
        }

        let final_state = self.inner.borrow().state;
        if final_state == LoopState::Terminating {
            self.run_termination();
        } else {
            let mut inner = self.inner.borrow_mut();
            inner.state = LoopState::Stopped;
        }
        self.inner.borrow_mut().in_run_until = false;
        Ok(())
    }

    fn dispatch(&self, raw: RawCompletion) {
        let ptr = raw.token as *mut CompletionRecord;
        let record = unsafe {
            let nn = NonNull::new_unchecked(ptr);
            let completions = self.inner.borrow().completions.clone();
            let record = std::ptr::read(nn.as_ptr());
            // Reclaim the slot's raw storage without re-dropping `record`
            // (we've already moved it out); `free` expects a live value to
            // drop, so give it a transparent no-op replacement instead.
            std::ptr::write(nn.as_ptr(), CompletionRecord::new_placeholder());
            completions.free(nn);
            record
        };
        trace!(target: "arrowhead_core::reactor", kind = record.label(), "dispatching completion");
        let outcome = match raw.result {
            RawResult::Bytes(n) => CompletionOutcome::Bytes(n),
            RawResult::Accepted(fd) => CompletionOutcome::Accepted(fd),
            RawResult::Error(e) => CompletionOutcome::Error(e),
        };
        record.deliver(outcome);
    }

    /// Legal only from `Running`. Schedules a stop; the reactor exits its
    /// drain loop at the next iteration and transitions to `Stopped`.
    pub fn stop(&self) -> crate::error::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != LoopState::Running {
            return Err(ErrorKind::State);
        }
        inner.state = LoopState::Stopping;
        Ok(())
    }

    /// From `Initial`/`Stopped`, terminates inline. From `Running`,
    /// schedules termination to complete before `run_until` returns. All
    /// completions still outstanding are delivered `Cancelled` first.
    pub fn term(&self) -> crate::error::Result<()> {
        let state = self.inner.borrow().state;
        match state {
            LoopState::Initial | LoopState::Stopped => {
                self.inner.borrow_mut().state = LoopState::Terminating;
                self.run_termination();
                Ok(())
            }
            LoopState::Running => {
                self.inner.borrow_mut().state = LoopState::Terminating;
                Ok(())
            }
            _ => Err(ErrorKind::State),
        }
    }

    fn run_termination(&self) {
        warn!(target: "arrowhead_core::reactor", "terminating loop, cancelling outstanding completions");
        let completions = self.inner.borrow().completions.clone();
        let mut cancelled = Vec::new();
        // SAFETY: the visitor only reads `CompletionRecord`s the slab still
        // considers allocated; we move each one out before invoking it so
        // `deliver` runs after the slab's own bookkeeping for this pass is
        // done (avoids re-entrant mutation of the slab mid-walk).
        {
            let mut collect = |rec: &mut CompletionRecord| {
                let taken = std::mem::replace(rec, CompletionRecord::new_placeholder());
                cancelled.push(taken);
            };
            completions.term(Some(&mut collect));
        }
        for record in cancelled {
            record.deliver(CompletionOutcome::Cancelled);
        }
        self.inner.borrow_mut().state = LoopState::Terminated;
    }
}

impl completion::CompletionRecord {
    /// An inert placeholder used only to satisfy the slab's requirement
    /// that every slot hold a live, droppable value while we move the
    /// real record out for dispatch.
    fn new_placeholder() -> CompletionRecord {
        CompletionRecord {
            kind: CompletionKind::TcpConnRead(Rc::new(RefCell::new(
                crate::tcp::conn::ConnShared::placeholder(),
            ))),
        }
    }
}
