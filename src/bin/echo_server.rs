//! A loopback TCP echo server demonstrating `arrowhead_core`'s reactor and
//! TCP transport layer end to end: a listener accepts connections, each
//! accepted connection is put into `Reading`, and every chunk of bytes it
//! receives is written straight back to the same connection.
//!
//! Run with `--workers N` to start `N` independent event loops, each on its
//! own OS thread with its own listener — exactly the "one loop per thread"
//! model §5 of the core's contract requires, since loops and the handles
//! bound to them are `!Send`/`!Sync` and cannot be shared across threads.

use arrowhead_core::config::Config;
use arrowhead_core::{
    ConnObserver, ErrorKind, EventLoop, ListenerObserver, SockAddr, TcpConnection, TcpListener,
};
use std::net::SocketAddr as StdSocketAddr;
use std::str::FromStr;
use tracing::{error, info, warn};

struct EchoConnObserver {
    worker: usize,
}

impl ConnObserver for EchoConnObserver {
    fn on_read(
        &mut self,
        conn: &TcpConnection,
        buf: Option<&mut arrowhead_core::tcp::buffer::TcpInputBuffer>,
        err: ErrorKind,
    ) {
        match err {
            ErrorKind::Ok => {
                let Some(buf) = buf else { return };
                let n = buf.readable_len();
                if n == 0 {
                    return;
                }
                let echoed = buf.readable().to_vec();
                buf.consume(n);
                if let Err(e) = conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(echoed)) {
                    warn!(worker = self.worker, err = %e, "failed to queue echo write");
                    let _ = conn.close();
                }
            }
            ErrorKind::Eof => {
                info!(worker = self.worker, "peer closed its write side, closing connection");
                let _ = conn.close();
            }
            other => {
                warn!(worker = self.worker, err = %other, "read error, closing connection");
                let _ = conn.close();
            }
        }
    }

    fn on_write(&mut self, conn: &TcpConnection, _out: arrowhead_core::tcp::buffer::TcpOutbound, err: ErrorKind) {
        if !err.is_ok() {
            warn!(worker = self.worker, err = %err, "write failed, closing connection");
            let _ = conn.close();
        }
    }

    fn on_close(&mut self, _conn: &TcpConnection, err: ErrorKind) {
        info!(worker = self.worker, err = %err, "connection closed");
    }
}

struct EchoListenerObserver {
    worker: usize,
}

impl ListenerObserver for EchoListenerObserver {
    fn on_accept(
        &mut self,
        _ln: &TcpListener,
        conn: TcpConnection,
        remote: SockAddr,
        observer_slot: &mut Option<Box<dyn ConnObserver>>,
    ) {
        info!(worker = self.worker, remote = %remote, "accepted connection");
        *observer_slot = Some(Box::new(EchoConnObserver { worker: self.worker }));
        if let Err(e) = conn.read_start() {
            error!(worker = self.worker, err = %e, "failed to start reading on accepted connection");
        }
    }

    fn on_close(&mut self, _ln: &TcpListener, err: ErrorKind) {
        info!(worker = self.worker, err = %err, "listener closed");
    }
}

/// Runs one event loop to completion on the calling thread, bound to
/// `addr`. Each worker gets a distinct port (`base_port + worker`, unless
/// `base_port` is 0, in which case the OS picks one per worker) since this
/// crate's transport does not implement `SO_REUSEPORT` fan-out.
fn run_worker(worker: usize, addr: StdSocketAddr) -> arrowhead_core::Result<()> {
    let loop_ = EventLoop::new()?;
    let transport = arrowhead_core::tcp::transport::DefaultTransport::new();
    let ln = TcpListener::init(&loop_, transport, Box::new(EchoListenerObserver { worker }));

    let sock_addr: SockAddr = addr.into();
    ln.open(sock_addr)?;
    ln.listen(128)?;
    info!(worker, addr = %addr, "echo server worker listening");

    loop_.run_until(None)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!(listen = %config.listen, workers = config.workers, "starting echo server");

    let base_addr = StdSocketAddr::from_str(&config.listen)
        .map_err(|e| format!("invalid --listen address '{}': {e}", config.listen))?;

    if config.workers <= 1 {
        run_worker(0, base_addr)?;
        return Ok(());
    }

    let mut handles = Vec::new();
    for worker in 0..config.workers {
        let mut addr = base_addr;
        if addr.port() != 0 {
            addr.set_port(addr.port() + worker as u16);
        }
        handles.push(std::thread::spawn(move || run_worker(worker, addr)));
    }
    for handle in handles {
        if let Err(e) = handle.join().unwrap() {
            error!(err = %e, "worker exited with error");
        }
    }
    Ok(())
}
