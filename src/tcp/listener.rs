//! The TCP listener state machine.
//!
//! Grounded in `include/ah/tcp.h` / `src/tcp/listener.c`'s `ah_tcp_listener_t`:
//! the same state set and the "accept one connection, immediately resubmit
//! another accept" discipline. Where the original threads accepted
//! connections onto an intrusive list hung off the listener, this crate
//! gives each listener its own [`crate::mem::SlabAllocator`] of accepted
//! connections (see `DESIGN.md`, "intrusive state in accepted connections").

use crate::error::{ErrorKind, Result};
use crate::net::addr::SockAddr;
use crate::reactor::{CompletionOutcome, EventLoop, RawHandle};
use crate::tcp::conn::{ConnShared, TcpConnection};
use crate::tcp::transport::TcpTransport;
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{trace, warn};

#[cfg(unix)]
const INVALID_HANDLE: RawHandle = -1;
#[cfg(windows)]
const INVALID_HANDLE: RawHandle = RawHandle::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Terminated,
    Initialized,
    Closing,
    Closed,
    Open,
    Listening,
}

/// Callbacks delivered for one listener, synchronously from the owning
/// loop's `run_until`.
pub trait ListenerObserver {
    fn on_open(&mut self, _ln: &TcpListener, _err: ErrorKind) {}
    fn on_listen(&mut self, _ln: &TcpListener, _err: ErrorKind) {}
    /// Fired once per accepted connection. `observer_slot` starts `None`;
    /// leaving it `None` after this call returns tells the listener the
    /// connection was refused, and it is closed immediately (§9, "listener
    /// re-reports state on a refused accept").
    fn on_accept(
        &mut self,
        _ln: &TcpListener,
        _conn: TcpConnection,
        _remote: SockAddr,
        _observer_slot: &mut Option<Box<dyn crate::tcp::conn::ConnObserver>>,
    ) {
    }
    fn on_close(&mut self, _ln: &TcpListener, _err: ErrorKind) {}
}

pub struct ListenerShared {
    loop_: EventLoop,
    transport: Rc<dyn TcpTransport>,
    observer: Option<Box<dyn ListenerObserver>>,
    fd: RawHandle,
    is_v6: bool,
    state: ListenerState,
    connections: crate::mem::SlabAllocator<Rc<RefCell<ConnShared>>>,
    accept_pending: bool,
}

impl ListenerShared {
    pub(crate) fn placeholder() -> ListenerShared {
        ListenerShared {
            loop_: EventLoop::inert(),
            transport: crate::tcp::transport::DefaultTransport::new(),
            observer: None,
            fd: INVALID_HANDLE,
            is_v6: false,
            state: ListenerState::Terminated,
            connections: crate::mem::SlabAllocator::new(),
            accept_pending: false,
        }
    }
}

/// A handle to one TCP listener. Cheap to clone.
#[derive(Clone)]
pub struct TcpListener {
    shared: Rc<RefCell<ListenerShared>>,
}

impl TcpListener {
    pub fn init(loop_: &EventLoop, transport: Rc<dyn TcpTransport>, observer: Box<dyn ListenerObserver>) -> TcpListener {
        TcpListener {
            shared: Rc::new(RefCell::new(ListenerShared {
                loop_: loop_.clone(),
                transport,
                observer: Some(observer),
                fd: INVALID_HANDLE,
                is_v6: false,
                state: ListenerState::Initialized,
                connections: crate::mem::SlabAllocator::new(),
                accept_pending: false,
            })),
        }
    }

    pub(crate) fn set_fd(&self, fd: RawHandle) {
        self.shared.borrow_mut().fd = fd;
    }

    pub(crate) fn raw_fd(&self) -> RawHandle {
        self.shared.borrow().fd
    }

    pub(crate) fn set_is_v6(&self, v6: bool) {
        self.shared.borrow_mut().is_v6 = v6;
    }

    pub fn is_v6(&self) -> bool {
        self.shared.borrow().is_v6
    }

    pub(crate) fn event_loop(&self) -> EventLoop {
        self.shared.borrow().loop_.clone()
    }

    pub(crate) fn shared_rc(&self) -> Rc<RefCell<ListenerShared>> {
        self.shared.clone()
    }

    pub fn state(&self) -> ListenerState {
        self.shared.borrow().state
    }

    fn transport(&self) -> Rc<dyn TcpTransport> {
        self.shared.borrow().transport.clone()
    }

    /// Valid from `Initialized`. Binds synchronously, like `TcpConnection::open`.
    pub fn open(&self, local: SockAddr) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ListenerState::Initialized {
                return Err(ErrorKind::State);
            }
        }
        let result = self.transport().listener_open(self, local);
        let err = result.err().unwrap_or(ErrorKind::Ok);
        if err.is_ok() {
            self.shared.borrow_mut().state = ListenerState::Open;
        }
        self.notify(err, Notify::Open);
        if err.is_ok() { Ok(()) } else { Err(err) }
    }

    /// Valid from `Open`. Calls `listen(2)` and submits the first accept.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ListenerState::Open {
                return Err(ErrorKind::State);
            }
        }
        let result = self.transport().listener_listen(self, backlog);
        let err = result.err().unwrap_or(ErrorKind::Ok);
        if err.is_ok() {
            self.shared.borrow_mut().state = ListenerState::Listening;
        }
        self.notify(err, Notify::Listen);
        if !err.is_ok() {
            return Err(err);
        }
        self.submit_accept()
    }

    fn submit_accept(&self) -> Result<()> {
        if self.shared.borrow().accept_pending {
            return Ok(());
        }
        let result = self.transport().listener_submit_accept(self);
        if result.is_ok() {
            self.shared.borrow_mut().accept_pending = true;
        }
        result
    }

    fn notify(&self, err: ErrorKind, which: Notify) {
        let mut observer = self.shared.borrow_mut().observer.take();
        if let Some(obs) = observer.as_mut() {
            match which {
                Notify::Open => obs.on_open(self, err),
                Notify::Listen => obs.on_listen(self, err),
                Notify::Close => obs.on_close(self, err),
            }
        }
        self.shared.borrow_mut().observer = observer;
    }

    /// Valid from any non-`Closed` state. Idempotent.
    pub fn close(&self) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state == ListenerState::Closed || s.state == ListenerState::Closing {
                return Err(ErrorKind::State);
            }
        }
        self.shared.borrow_mut().state = ListenerState::Closing;
        let _ = self.transport().listener_close(self);
        self.shared.borrow_mut().state = ListenerState::Closed;
        self.notify(ErrorKind::Ok, Notify::Close);
        Ok(())
    }

    /// Valid from `Closed`. Terminates every still-accepted connection's
    /// slab slot by releasing this listener's share of the arena; any
    /// connection a caller is still holding a handle to stays alive until
    /// it also terms.
    pub fn term(&self) -> Result<()> {
        {
            let s = self.shared.borrow();
            if s.state != ListenerState::Closed {
                return Err(ErrorKind::State);
            }
        }
        self.shared.borrow_mut().state = ListenerState::Terminated;
        let slab = self.shared.borrow().connections.clone();
        slab.term(None);
        Ok(())
    }

    pub fn set_reuseaddr(&self, on: bool) -> Result<()> {
        self.transport().listener_set_reuseaddr(self, on)
    }

    /// Valid from `Open` or `Listening`. The address actually bound,
    /// useful when `open` was called with port 0 and the OS picked one.
    pub fn local_addr(&self) -> Result<SockAddr> {
        crate::sys::local_addr(self.raw_fd())
    }
}

enum Notify {
    Open,
    Listen,
    Close,
}

/// Dispatched by `reactor::completion::CompletionRecord::deliver` for a
/// `TcpListenerAccept` completion.
pub(crate) fn deliver_accept(shared: &Rc<RefCell<ListenerShared>>, outcome: CompletionOutcome) {
    let ln = TcpListener { shared: shared.clone() };
    ln.shared.borrow_mut().accept_pending = false;

    if ln.state() != ListenerState::Listening {
        return; // closed before this accept landed; drop silently
    }

    match outcome {
        CompletionOutcome::Accepted(fd) => handle_accepted(&ln, fd),
        CompletionOutcome::Error(e) => {
            warn!(target: "arrowhead_core::tcp::listener", err = %e, "accept failed");
        }
        CompletionOutcome::Cancelled => {
            trace!(target: "arrowhead_core::tcp::listener", "accept cancelled");
            return;
        }
        CompletionOutcome::Bytes(_) => unreachable!("accept completion never carries a byte count"),
    }

    if ln.state() == ListenerState::Listening {
        let _ = ln.submit_accept();
    }
}

fn handle_accepted(ln: &TcpListener, fd: RawHandle) {
    let transport = match ln.transport().prepare_for_accept(ln) {
        Ok(t) => t,
        Err(e) => {
            warn!(target: "arrowhead_core::tcp::listener", err = %e, "prepare_for_accept failed, dropping connection");
            let _ = crate::sys::close(fd);
            return;
        }
    };

    let is_v6 = ln.is_v6();
    let loop_ = ln.event_loop();
    let slab = ln.shared.borrow().connections.share();

    let conn = TcpConnection::from_accept(&loop_, transport, fd, is_v6, slab.clone());
    let slot: NonNull<Rc<RefCell<ConnShared>>> = slab.alloc(conn.shared_rc());
    conn.set_slab_slot(slot);

    let remote = match crate::sys::peer_addr(fd) {
        Ok(addr) => addr,
        Err(_) => if is_v6 { SockAddr::v6_wildcard(0) } else { SockAddr::v4_wildcard(0) },
    };

    let mut observer_slot: Option<Box<dyn crate::tcp::conn::ConnObserver>> = None;
    let mut listener_observer = ln.shared.borrow_mut().observer.take();
    if let Some(obs) = listener_observer.as_mut() {
        obs.on_accept(ln, conn.clone(), remote, &mut observer_slot);
    }
    ln.shared.borrow_mut().observer = listener_observer;

    match observer_slot {
        Some(observer) => conn.set_observer(observer),
        None => {
            trace!(target: "arrowhead_core::tcp::listener", "accepted connection refused by observer, closing");
            let _ = conn.close();
        }
    }
}
