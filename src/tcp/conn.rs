//! The TCP connection state machine.
//!
//! Grounded in `include/ah/tcp.h` / `src/tcp/conn.c`'s `ah_tcp_conn_t`:
//! the same state set, the same "at most one read and one write in
//! flight" discipline, and the same half-duplex shutdown flags. Where the
//! original stores a raw back-pointer from an accepted connection to its
//! owning listener slab, this crate stores an `Rc`-counted
//! [`crate::mem::SlabAllocator`] handle plus the slot pointer (see
//! `DESIGN.md`, "intrusive state in accepted connections").

use crate::error::{ErrorKind, Result};
use crate::net::addr::SockAddr;
use crate::reactor::{CompletionOutcome, EventLoop, RawHandle};
use crate::tcp::buffer::{TcpInputBuffer, TcpOutbound};
use crate::tcp::transport::TcpTransport;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{trace, warn};

#[cfg(unix)]
const INVALID_HANDLE: RawHandle = -1;
#[cfg(windows)]
const INVALID_HANDLE: RawHandle = RawHandle::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Terminated,
    Initialized,
    Closing,
    Closed,
    Open,
    Connecting,
    Connected,
    Reading,
}

/// The half-duplex shutdown bits. `rd` and `wr` may be set independently;
/// both set is the original's "shutdown-flags = rdwr".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownFlags {
    pub rd: bool,
    pub wr: bool,
}

impl ShutdownFlags {
    pub const NONE: ShutdownFlags = ShutdownFlags { rd: false, wr: false };
    pub const RD: ShutdownFlags = ShutdownFlags { rd: true, wr: false };
    pub const WR: ShutdownFlags = ShutdownFlags { rd: false, wr: true };
    pub const RDWR: ShutdownFlags = ShutdownFlags { rd: true, wr: true };

    fn union(self, other: ShutdownFlags) -> ShutdownFlags {
        ShutdownFlags { rd: self.rd || other.rd, wr: self.wr || other.wr }
    }
}

/// Callbacks delivered for one connection. All calls happen synchronously
/// on the thread running the owning loop's `run_until` (§5) — an
/// implementation may freely call back into this or any other object
/// bound to the same loop.
pub trait ConnObserver {
    fn on_open(&mut self, _conn: &TcpConnection, _err: ErrorKind) {}
    fn on_connect(&mut self, _conn: &TcpConnection, _err: ErrorKind) {}
    /// `buf` is `None` only when the read failed before a buffer could be
    /// associated (e.g. `NoMem` on detach-replacement). Otherwise the
    /// observer may consume bytes from it, [`TcpInputBuffer::compact`] it,
    /// or take ownership via [`TcpConnection::detach_input`].
    fn on_read(&mut self, _conn: &TcpConnection, _buf: Option<&mut TcpInputBuffer>, _err: ErrorKind) {}
    fn on_write(&mut self, _conn: &TcpConnection, _out: TcpOutbound, _err: ErrorKind) {}
    fn on_close(&mut self, _conn: &TcpConnection, _err: ErrorKind) {}
}

pub struct ConnShared {
    loop_: EventLoop,
    transport: Rc<dyn TcpTransport>,
    observer: Option<Box<dyn ConnObserver>>,
    fd: RawHandle,
    is_v6: bool,
    state: ConnState,
    shutdown: ShutdownFlags,
    input: Option<TcpInputBuffer>,
    write_queue: VecDeque<TcpOutbound>,
    write_in_flight: bool,
    pending_ops: usize,
    close_pending: bool,
    owning_slab: Option<crate::mem::SlabAllocator<Rc<RefCell<ConnShared>>>>,
    slab_slot: Option<NonNull<Rc<RefCell<ConnShared>>>>,
}

impl ConnShared {
    /// An inert value used only as a transient placeholder while the
    /// reactor moves a real `CompletionRecord` out of its slab slot (see
    /// `reactor::EventLoop::dispatch`). Never observed by user code.
    pub(crate) fn placeholder() -> ConnShared {
        ConnShared {
            loop_: EventLoop::inert(),
            transport: crate::tcp::transport::DefaultTransport::new(),
            observer: None,
            fd: INVALID_HANDLE,
            is_v6: false,
            state: ConnState::Terminated,
            shutdown: ShutdownFlags::NONE,
            input: None,
            write_queue: VecDeque::new(),
            write_in_flight: false,
            pending_ops: 0,
            close_pending: false,
            owning_slab: None,
            slab_slot: None,
        }
    }
}

/// A handle to one TCP connection. Cheap to clone (shares the underlying
/// `Rc<RefCell<ConnShared>>`); cloning does not allocate a new connection.
#[derive(Clone)]
pub struct TcpConnection {
    shared: Rc<RefCell<ConnShared>>,
}

impl TcpConnection {
    /// `Terminated -> Initialized`.
    pub fn init(loop_: &EventLoop, transport: Rc<dyn TcpTransport>, observer: Box<dyn ConnObserver>) -> TcpConnection {
        let shared = Rc::new(RefCell::new(ConnShared {
            loop_: loop_.clone(),
            transport,
            observer: Some(observer),
            fd: INVALID_HANDLE,
            is_v6: false,
            state: ConnState::Initialized,
            shutdown: ShutdownFlags::NONE,
            input: None,
            write_queue: VecDeque::new(),
            write_in_flight: false,
            pending_ops: 0,
            close_pending: false,
            owning_slab: None,
            slab_slot: None,
        }));
        TcpConnection { shared }
    }

    /// Builds an accepted connection directly into `Connected`, owned by
    /// `owning_slab`'s slot at `slot`. Used only by `tcp::listener`.
    pub(crate) fn from_accept(
        loop_: &EventLoop,
        transport: Rc<dyn TcpTransport>,
        fd: RawHandle,
        is_v6: bool,
        owning_slab: crate::mem::SlabAllocator<Rc<RefCell<ConnShared>>>,
    ) -> TcpConnection {
        let shared = Rc::new(RefCell::new(ConnShared {
            loop_: loop_.clone(),
            transport,
            observer: None,
            fd,
            is_v6,
            state: ConnState::Connected,
            shutdown: ShutdownFlags::NONE,
            input: None,
            write_queue: VecDeque::new(),
            write_in_flight: false,
            pending_ops: 0,
            close_pending: false,
            owning_slab: Some(owning_slab),
            slab_slot: None,
        }));
        TcpConnection { shared }
    }

    pub(crate) fn set_observer(&self, observer: Box<dyn ConnObserver>) {
        self.shared.borrow_mut().observer = Some(observer);
    }

    pub(crate) fn set_slab_slot(&self, slot: NonNull<Rc<RefCell<ConnShared>>>) {
        self.shared.borrow_mut().slab_slot = Some(slot);
    }

    pub fn state(&self) -> ConnState {
        self.shared.borrow().state
    }

    pub fn shutdown_flags(&self) -> ShutdownFlags {
        self.shared.borrow().shutdown
    }

    pub fn is_v6(&self) -> bool {
        self.shared.borrow().is_v6
    }

    pub(crate) fn set_is_v6(&self, v6: bool) {
        self.shared.borrow_mut().is_v6 = v6;
    }

    pub(crate) fn raw_fd(&self) -> RawHandle {
        self.shared.borrow().fd
    }

    pub(crate) fn set_fd(&self, fd: RawHandle) {
        self.shared.borrow_mut().fd = fd;
    }

    pub(crate) fn event_loop(&self) -> EventLoop {
        self.shared.borrow().loop_.clone()
    }

    pub(crate) fn shared_rc(&self) -> Rc<RefCell<ConnShared>> {
        self.shared.clone()
    }

    fn transport(&self) -> Rc<dyn TcpTransport> {
        self.shared.borrow().transport.clone()
    }

    /// Valid from `Initialized`. Binds the underlying socket to `local`.
    /// Bind is a synchronous syscall (unlike connect/read/write, which the
    /// platform completion facility is involved in), so `on_open` fires
    /// before this call returns rather than from a later `run_until` drain
    /// — the observer callback exists for interface symmetry with
    /// `connect`/`read_start`, not because binding is actually async here.
    pub fn open(&self, local: SockAddr) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ConnState::Initialized {
                return Err(ErrorKind::State);
            }
        }
        let result = self.transport().open(self, local);
        let err = result.err().unwrap_or(ErrorKind::Ok);
        if err.is_ok() {
            self.shared.borrow_mut().state = ConnState::Open;
        }
        self.notify_open(err);
        if err.is_ok() { Ok(()) } else { Err(err) }
    }

    fn notify_open(&self, err: ErrorKind) {
        let mut observer = self.shared.borrow_mut().observer.take();
        if let Some(obs) = observer.as_mut() {
            obs.on_open(self, err);
        }
        self.shared.borrow_mut().observer = observer;
    }

    /// Valid from `Open`. Receiving is *not* automatically enabled on
    /// success — the caller must still call `read_start`.
    pub fn connect(&self, remote: SockAddr) -> Result<()> {
        {
            let mut s = self.shared.borrow_mut();
            if s.state != ConnState::Open {
                return Err(ErrorKind::State);
            }
            s.state = ConnState::Connecting;
        }
        let result = self.transport().connect(self, remote);
        match result {
            Ok(()) => {
                self.shared.borrow_mut().pending_ops += 1;
                Ok(())
            }
            Err(e) => {
                self.shared.borrow_mut().state = ConnState::Open;
                Err(e)
            }
        }
    }

    /// Valid from `Connected` with `rd` unshut. Ensures a fresh input
    /// buffer and submits the first read.
    pub fn read_start(&self) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ConnState::Connected || s.shutdown.rd {
                return Err(ErrorKind::State);
            }
        }
        self.shared.borrow_mut().state = ConnState::Reading;
        self.submit_next_read()
    }

    fn submit_next_read(&self) -> Result<()> {
        {
            let mut s = self.shared.borrow_mut();
            if s.input.is_none() {
                match TcpInputBuffer::alloc() {
                    Some(buf) => s.input = Some(buf),
                    None => {
                        drop(s);
                        self.deliver_read_error(ErrorKind::NoMem);
                        return Err(ErrorKind::NoMem);
                    }
                }
            }
        }
        let (ptr, len) = {
            let mut s = self.shared.borrow_mut();
            let input = s.input.as_mut().unwrap();
            if input.writable_len() == 0 {
                drop(s);
                self.deliver_read_error(ErrorKind::Overflow);
                return Err(ErrorKind::Overflow);
            }
            (input.writable_ptr(), input.writable_len())
        };
        let result = self.transport().submit_read(self, ptr, len);
        if result.is_ok() {
            self.shared.borrow_mut().pending_ops += 1;
        }
        result
    }

    fn deliver_read_error(&self, err: ErrorKind) {
        invoke_on_read(self, err);
    }

    /// Valid from `Reading`; returns to `Connected`. No-op if already
    /// `Connected`. Does not cancel a read already in flight — its
    /// completion, if the kernel still delivers one, is silently dropped
    /// by `deliver_read` once the state is no longer `Reading`.
    pub fn read_stop(&self) -> Result<()> {
        let mut s = self.shared.borrow_mut();
        if s.state == ConnState::Connected {
            return Ok(());
        }
        if s.state != ConnState::Reading {
            return Err(ErrorKind::State);
        }
        s.state = ConnState::Connected;
        drop(s);
        self.transport().read_stop(self)
    }

    /// Takes ownership of the connection's current input buffer, if any,
    /// installing a fresh one in its place. Matches §4.10's "detach
    /// atomically replaces it with a fresh page" — if the replacement
    /// allocation fails, the *old* buffer is still handed back to the
    /// caller, and the next read delivers `NoMem` instead of data.
    pub fn detach_input(&self) -> Option<TcpInputBuffer> {
        let mut s = self.shared.borrow_mut();
        let old = s.input.take();
        s.input = TcpInputBuffer::alloc();
        old
    }

    /// Valid when `state` is `Connected` or `Reading` and `wr` is unshut.
    /// Appends `out` to the write queue; at most one write is ever in
    /// flight (§4.10).
    pub fn write(&self, out: TcpOutbound) -> Result<()> {
        {
            let s = self.shared.borrow();
            let writable = matches!(s.state, ConnState::Connected | ConnState::Reading) && !s.shutdown.wr;
            if !writable {
                return Err(ErrorKind::State);
            }
        }
        let should_submit = {
            let mut s = self.shared.borrow_mut();
            s.write_queue.push_back(out);
            !s.write_in_flight
        };
        if should_submit {
            self.submit_next_write()
        } else {
            Ok(())
        }
    }

    fn submit_next_write(&self) -> Result<()> {
        let (ptr, len) = {
            let s = self.shared.borrow();
            match s.write_queue.front() {
                Some(out) => (out.remaining_ptr(), out.remaining_len()),
                None => return Ok(()),
            }
        };
        self.shared.borrow_mut().write_in_flight = true;
        let result = self.transport().submit_write(self, ptr, len);
        match &result {
            Ok(()) => self.shared.borrow_mut().pending_ops += 1,
            Err(_) => self.shared.borrow_mut().write_in_flight = false,
        }
        result
    }

    /// Sets the shutdown bit(s) and asks the OS to half-close. Idempotent.
    pub fn shutdown(&self, flags: ShutdownFlags) -> Result<()> {
        {
            let mut s = self.shared.borrow_mut();
            s.shutdown = s.shutdown.union(flags);
        }
        self.transport().shutdown(self, flags)
    }

    /// Valid from any non-`Closed` state. Idempotent: a second call
    /// returns `State` and does not re-emit `on_close`.
    pub fn close(&self) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state == ConnState::Closed || s.state == ConnState::Closing {
                return Err(ErrorKind::State);
            }
        }
        self.shared.borrow_mut().state = ConnState::Closing;
        let _ = self.transport().close(self);
        let pending = self.shared.borrow().pending_ops;
        if pending == 0 {
            self.finish_close(ErrorKind::Ok);
        } else {
            self.shared.borrow_mut().close_pending = true;
        }
        Ok(())
    }

    fn finish_close(&self, err: ErrorKind) {
        self.shared.borrow_mut().state = ConnState::Closed;
        self.shared.borrow_mut().close_pending = false;
        let mut observer = self.shared.borrow_mut().observer.take();
        if let Some(obs) = observer.as_mut() {
            obs.on_close(self, err);
        }
        self.shared.borrow_mut().observer = observer;
    }

    /// Valid from `Closed`. Frees the accepted-connection slab slot, if
    /// any, and releases this handle's share of that slab's reference
    /// count.
    pub fn term(&self) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ConnState::Closed {
                return Err(ErrorKind::State);
            }
        }
        self.shared.borrow_mut().state = ConnState::Terminated;
        let (slot, slab) = {
            let mut s = self.shared.borrow_mut();
            (s.slab_slot.take(), s.owning_slab.take())
        };
        if let (Some(slot), Some(slab)) = (slot, &slab) {
            // SAFETY: `slot` was allocated from `slab` by the listener
            // that accepted this connection and has not been freed since.
            unsafe { slab.free(slot) };
        }
        if let Some(slab) = slab {
            slab.term(None);
        }
        Ok(())
    }

    pub fn set_keepalive(&self, on: bool) -> Result<()> {
        self.transport().set_keepalive(self, on)
    }

    pub fn set_nodelay(&self, on: bool) -> Result<()> {
        self.transport().set_nodelay(self, on)
    }

    /// Valid once the underlying socket exists (`Open` onward). The local
    /// address actually bound, useful when `open` was called with port 0.
    pub fn local_addr(&self) -> Result<SockAddr> {
        crate::sys::local_addr(self.raw_fd())
    }

    /// Valid once connected. The remote peer's address.
    pub fn peer_addr(&self) -> Result<SockAddr> {
        crate::sys::peer_addr(self.raw_fd())
    }
}

/// Dispatched by `reactor::completion::CompletionRecord::deliver` for a
/// `TcpConnConnect` completion.
pub(crate) fn deliver_connect(shared: &Rc<RefCell<ConnShared>>, outcome: CompletionOutcome) {
    let conn = TcpConnection { shared: shared.clone() };
    conn.shared.borrow_mut().pending_ops -= 1;
    if !matches!(conn.state(), ConnState::Connecting) {
        maybe_finish_pending_close(&conn);
        return;
    }
    let err = match outcome {
        CompletionOutcome::Bytes(_) => {
            conn.shared.borrow_mut().state = ConnState::Connected;
            ErrorKind::Ok
        }
        CompletionOutcome::Error(e) => {
            conn.shared.borrow_mut().state = ConnState::Open;
            e
        }
        CompletionOutcome::Cancelled => {
            conn.shared.borrow_mut().state = ConnState::Open;
            ErrorKind::Cancelled
        }
        CompletionOutcome::Accepted(_) => unreachable!("connect completion never carries an accepted handle"),
    };
    let mut observer = conn.shared.borrow_mut().observer.take();
    if let Some(obs) = observer.as_mut() {
        obs.on_connect(&conn, err);
    }
    conn.shared.borrow_mut().observer = observer;
    maybe_finish_pending_close(&conn);
}

pub(crate) fn deliver_read(shared: &Rc<RefCell<ConnShared>>, outcome: CompletionOutcome) {
    let conn = TcpConnection { shared: shared.clone() };
    conn.shared.borrow_mut().pending_ops -= 1;
    if conn.state() != ConnState::Reading {
        maybe_finish_pending_close(&conn);
        return; // read_stop or close already moved us on; drop silently
    }
    match outcome {
        CompletionOutcome::Bytes(0) => {
            conn.shared.borrow_mut().shutdown.rd = true;
            invoke_on_read(&conn, ErrorKind::Eof);
        }
        CompletionOutcome::Bytes(n) => {
            conn.shared.borrow_mut().input.as_mut().expect("reading without a buffer").commit(n);
            invoke_on_read(&conn, ErrorKind::Ok);
            if conn.state() == ConnState::Reading && !conn.shared.borrow().shutdown.rd {
                let _ = conn.submit_next_read();
            }
        }
        CompletionOutcome::Error(e) => invoke_on_read(&conn, e),
        CompletionOutcome::Cancelled => invoke_on_read(&conn, ErrorKind::Cancelled),
        CompletionOutcome::Accepted(_) => unreachable!("read completion never carries an accepted handle"),
    }
    maybe_finish_pending_close(&conn);
}

fn invoke_on_read(conn: &TcpConnection, err: ErrorKind) {
    let mut observer = conn.shared.borrow_mut().observer.take();
    if let Some(obs) = observer.as_mut() {
        let mut s = conn.shared.borrow_mut();
        let input_ptr = s.input.as_mut().map(|b| b as *mut TcpInputBuffer);
        drop(s);
        let input_ref = input_ptr.map(|p| unsafe { &mut *p });
        obs.on_read(conn, input_ref, err);
    }
    conn.shared.borrow_mut().observer = observer;
}

pub(crate) fn deliver_write(shared: &Rc<RefCell<ConnShared>>, outcome: CompletionOutcome) {
    let conn = TcpConnection { shared: shared.clone() };
    conn.shared.borrow_mut().pending_ops -= 1;
    conn.shared.borrow_mut().write_in_flight = false;

    let err = match outcome {
        CompletionOutcome::Bytes(0) => Some(ErrorKind::NoBufs),
        CompletionOutcome::Bytes(n) => {
            let done = {
                let mut s = conn.shared.borrow_mut();
                let out = s.write_queue.front_mut().expect("write completion with empty queue");
                out.advance(n);
                out.is_complete()
            };
            if done { Some(ErrorKind::Ok) } else { None }
        }
        CompletionOutcome::Error(e) => Some(e),
        CompletionOutcome::Cancelled => Some(ErrorKind::Cancelled),
        CompletionOutcome::Accepted(_) => unreachable!("write completion never carries an accepted handle"),
    };

    match err {
        None => {
            // Partial write: resubmit immediately for the remaining tail.
            conn.shared.borrow_mut().write_in_flight = true;
            if let Err(e) = conn.submit_next_write() {
                warn!(target: "arrowhead_core::tcp::conn", err = %e, "failed to resubmit partial write");
            }
        }
        Some(err) => {
            let popped = conn.shared.borrow_mut().write_queue.pop_front();
            if let Some(out) = popped {
                let mut observer = conn.shared.borrow_mut().observer.take();
                if let Some(obs) = observer.as_mut() {
                    obs.on_write(&conn, out, err);
                }
                conn.shared.borrow_mut().observer = observer;
            }
            let has_more = !conn.shared.borrow().write_queue.is_empty();
            if has_more {
                if let Err(e) = conn.submit_next_write() {
                    trace!(target: "arrowhead_core::tcp::conn", err = %e, "failed to submit next queued write");
                }
            }
        }
    }
    maybe_finish_pending_close(&conn);
}

/// If `close()` deferred `on_close` waiting for in-flight completions to
/// drain (§9, "Open question — cancellation latency"), and the last one
/// just did, finish the close now.
fn maybe_finish_pending_close(conn: &TcpConnection) {
    let (pending_done, close_pending) = {
        let s = conn.shared.borrow();
        (s.pending_ops == 0, s.close_pending)
    };
    if pending_done && close_pending {
        conn.finish_close(ErrorKind::Ok);
    }
}
