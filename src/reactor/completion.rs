//! Completion records: the reactor's realization of the "opaque
//! function-pointer + subject pointer" the original passes through the
//! kernel's completion facility.
//!
//! Rust has sum types, so a completion is a tagged `CompletionKind`
//! carrying the originating subsystem's shared, reference-counted state
//! directly — no function pointer and no `void*` downcast. The reactor
//! matches on the tag and calls straight into the matching delivery
//! function; there is no virtual dispatch at all on this path.

use crate::tcp::conn::ConnShared;
use crate::tcp::listener::ListenerShared;
use std::cell::RefCell;
use std::rc::Rc;

/// What a completed kernel operation reported.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Bytes transferred (read/write) or unused (0) for operations with no
    /// byte count of their own.
    Bytes(usize),
    /// An accepted connection's raw platform handle.
    Accepted(crate::reactor::RawHandle),
    Error(crate::error::ErrorKind),
    /// Delivered to every record still outstanding when the loop
    /// terminates.
    Cancelled,
}

/// One in-flight operation's subject and kind, stored in the loop's
/// completion slab and addressed by its own slot pointer (cast to `usize`)
/// as the platform's `user_data`/`udata`/`OVERLAPPED*` token.
///
/// Each variant's payload is an `Rc`. The reactor moves a record's kind out
/// of its slab slot with `ptr::read` on delivery and writes a placeholder
/// back in its place, so the slab always finds a live value to drop.
pub enum CompletionKind {
    TcpConnConnect(Rc<RefCell<ConnShared>>),
    TcpConnRead(Rc<RefCell<ConnShared>>),
    TcpConnWrite(Rc<RefCell<ConnShared>>),
    TcpListenerAccept(Rc<RefCell<ListenerShared>>),
}

pub struct CompletionRecord {
    pub kind: CompletionKind,
}

impl CompletionRecord {
    pub fn new(kind: CompletionKind) -> CompletionRecord {
        CompletionRecord { kind }
    }

    pub fn label(&self) -> &'static str {
        match &self.kind {
            CompletionKind::TcpConnConnect(_) => "tcp.conn.connect",
            CompletionKind::TcpConnRead(_) => "tcp.conn.read",
            CompletionKind::TcpConnWrite(_) => "tcp.conn.write",
            CompletionKind::TcpListenerAccept(_) => "tcp.listener.accept",
        }
    }

    /// Dispatches the outcome to the owning subsystem. Consumes the
    /// record; the caller has already removed it from the slab.
    pub fn deliver(self, outcome: CompletionOutcome) {
        match self.kind {
            CompletionKind::TcpConnConnect(shared) => {
                crate::tcp::conn::deliver_connect(&shared, outcome)
            }
            CompletionKind::TcpConnRead(shared) => {
                crate::tcp::conn::deliver_read(&shared, outcome)
            }
            CompletionKind::TcpConnWrite(shared) => {
                crate::tcp::conn::deliver_write(&shared, outcome)
            }
            CompletionKind::TcpListenerAccept(shared) => {
                crate::tcp::listener::deliver_accept(&shared, outcome)
            }
        }
    }
}
