//! The transport vtable: the indirection point every connection and
//! listener operation passes through, letting a stackable intermediary
//! (plain sockets here; TLS or logging above this core) intercept any of
//! them.
//!
//! Grounded in `include/ah/tcp.h`'s `ah_tcp_trans_t` (a vtable struct of
//! function pointers plus an opaque `ctx`). A target language with trait
//! objects replaces the function-pointer struct with a trait and the
//! `void *ctx` with whatever state the `impl` closes over — `DefaultTransport`
//! here closes over nothing because it needs no state beyond the raw
//! socket operations it performs against the connection/listener handed
//! to it.

use crate::error::{ErrorKind, Result};
use crate::net::addr::SockAddr;
use crate::tcp::conn::{ShutdownFlags, TcpConnection};
use crate::tcp::listener::TcpListener;
use std::rc::Rc;

/// One implementation per stackable layer. Every method receives the
/// public handle it acts on rather than a raw context pointer — the
/// handle already carries this connection's/listener's shared state, and
/// `Rc<RefCell<..>>` aliasing is how this crate realizes the original's
/// `void *ctx` indirection.
///
/// A wrapping transport stores an inner `Rc<dyn TcpTransport>` and
/// delegates to it, intercepting whichever operations it cares about —
/// exactly the pattern TLS or request logging would use above this core.
pub trait TcpTransport {
    fn open(&self, conn: &TcpConnection, local: SockAddr) -> Result<()>;
    fn connect(&self, conn: &TcpConnection, remote: SockAddr) -> Result<()>;
    /// Submits one raw read attempt into `[ptr, ptr+len)`. Queueing and
    /// re-arming across completions is the connection's own job (§4.10);
    /// the transport only performs the mechanics of one submission.
    fn submit_read(&self, conn: &TcpConnection, ptr: *mut u8, len: usize) -> Result<()>;
    /// Submits one raw write attempt of `[ptr, ptr+len)`.
    fn submit_write(&self, conn: &TcpConnection, ptr: *const u8, len: usize) -> Result<()>;
    fn read_stop(&self, conn: &TcpConnection) -> Result<()>;
    fn shutdown(&self, conn: &TcpConnection, flags: ShutdownFlags) -> Result<()>;
    fn close(&self, conn: &TcpConnection) -> Result<()>;
    fn set_keepalive(&self, conn: &TcpConnection, on: bool) -> Result<()>;
    fn set_nodelay(&self, conn: &TcpConnection, on: bool) -> Result<()>;

    fn listener_open(&self, ln: &TcpListener, local: SockAddr) -> Result<()>;
    fn listener_listen(&self, ln: &TcpListener, backlog: i32) -> Result<()>;
    fn listener_submit_accept(&self, ln: &TcpListener) -> Result<()>;
    fn listener_close(&self, ln: &TcpListener) -> Result<()>;
    fn listener_set_reuseaddr(&self, ln: &TcpListener, on: bool) -> Result<()>;

    /// Invoked by the default listener before it reports an accepted
    /// connection upward, letting a wrapping transport allocate and
    /// initialize per-connection wrapper state (e.g. a TLS handshake
    /// context) for each accepted connection before it surfaces to the
    /// layer above. The returned transport is the one the new connection
    /// is initialized with.
    fn prepare_for_accept(&self, ln: &TcpListener) -> Result<Rc<dyn TcpTransport>>;
}

/// The base of every transport stack: talks to the OS socket directly via
/// `socket2`/`libc` and the event loop's backend, with no interception.
pub struct DefaultTransport;

impl DefaultTransport {
    pub fn new() -> Rc<DefaultTransport> {
        Rc::new(DefaultTransport)
    }

    fn new_socket(v6: bool) -> Result<socket2::Socket> {
        let domain = if v6 { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
            .map_err(|e| os_err(&e))?;
        socket.set_nonblocking(true).map_err(|e| os_err(&e))?;
        Ok(socket)
    }
}

fn os_err(e: &std::io::Error) -> ErrorKind {
    crate::sys::last_os_error_kind_of(e)
}

impl TcpTransport for DefaultTransport {
    fn open(&self, conn: &TcpConnection, local: SockAddr) -> Result<()> {
        let socket = Self::new_socket(local.is_v6())?;
        let std_addr: std::net::SocketAddr = local.into();
        socket.bind(&std_addr.into()).map_err(|e| os_err(&e))?;
        conn.set_fd(crate::sys::into_raw_handle(socket));
        conn.set_is_v6(local.is_v6());
        Ok(())
    }

    fn connect(&self, conn: &TcpConnection, remote: SockAddr) -> Result<()> {
        let fd = conn.raw_fd();
        crate::sys::connect_nonblocking(fd, remote)?;
        conn.event_loop().submit_connect(fd, remote, conn.shared_rc())
    }

    fn submit_read(&self, conn: &TcpConnection, ptr: *mut u8, len: usize) -> Result<()> {
        conn.event_loop().submit_read(conn.raw_fd(), ptr, len, conn.shared_rc())
    }

    fn submit_write(&self, conn: &TcpConnection, ptr: *const u8, len: usize) -> Result<()> {
        conn.event_loop().submit_write(conn.raw_fd(), ptr, len, conn.shared_rc())
    }

    fn read_stop(&self, _conn: &TcpConnection) -> Result<()> {
        // Best-effort only: at most one read is ever in flight (§4.10), so
        // there is nothing to cancel at the kernel level. An in-flight
        // read's completion is simply not redelivered once the connection
        // is no longer `Reading` (see `tcp::conn::deliver_read`).
        Ok(())
    }

    fn shutdown(&self, conn: &TcpConnection, flags: ShutdownFlags) -> Result<()> {
        crate::sys::shutdown(conn.raw_fd(), flags)
    }

    fn close(&self, conn: &TcpConnection) -> Result<()> {
        crate::sys::close(conn.raw_fd())
    }

    fn set_keepalive(&self, conn: &TcpConnection, on: bool) -> Result<()> {
        crate::sys::set_keepalive(conn.raw_fd(), on)
    }

    fn set_nodelay(&self, conn: &TcpConnection, on: bool) -> Result<()> {
        crate::sys::set_nodelay(conn.raw_fd(), on)
    }

    fn listener_open(&self, ln: &TcpListener, local: SockAddr) -> Result<()> {
        let socket = Self::new_socket(local.is_v6())?;
        socket.set_reuse_address(true).map_err(|e| os_err(&e))?;
        let std_addr: std::net::SocketAddr = local.into();
        socket.bind(&std_addr.into()).map_err(|e| os_err(&e))?;
        ln.set_fd(crate::sys::into_raw_handle(socket));
        ln.set_is_v6(local.is_v6());
        ln.event_loop().register_listener(ln.raw_fd())?;
        Ok(())
    }

    fn listener_listen(&self, ln: &TcpListener, backlog: i32) -> Result<()> {
        crate::sys::listen(ln.raw_fd(), backlog)
    }

    fn listener_submit_accept(&self, ln: &TcpListener) -> Result<()> {
        ln.event_loop().submit_accept(ln.raw_fd(), ln.shared_rc())
    }

    fn listener_close(&self, ln: &TcpListener) -> Result<()> {
        crate::sys::close(ln.raw_fd())
    }

    fn listener_set_reuseaddr(&self, ln: &TcpListener, on: bool) -> Result<()> {
        crate::sys::set_reuseaddr(ln.raw_fd(), on)
    }

    fn prepare_for_accept(&self, _ln: &TcpListener) -> Result<Rc<dyn TcpTransport>> {
        Ok(DefaultTransport::new())
    }
}
