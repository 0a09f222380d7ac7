//! A listener and a connecting connection trading one round trip over a
//! real loopback socket, driven by one reactor. This needs two state
//! machines and a live kernel socket pair, so it does not fit inside a
//! single module's unit tests the way the rest of this crate's tests do.

use arrowhead_core::tcp::buffer::TcpInputBuffer;
use arrowhead_core::tcp::transport::DefaultTransport;
use arrowhead_core::{
    ConnObserver, ErrorKind, EventLoop, ListenerObserver, SockAddr, TcpConnection, TcpListener,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const PAYLOAD: &[u8] = b"Hello, Arrowhead!\0";

#[derive(Default)]
struct Outcome {
    echoed_closes: usize,
    initiator_closes: usize,
    initiator_read: Vec<u8>,
}

struct EchoingConn {
    outcome: Rc<RefCell<Outcome>>,
    loop_: EventLoop,
}

impl ConnObserver for EchoingConn {
    fn on_read(&mut self, conn: &TcpConnection, buf: Option<&mut TcpInputBuffer>, err: ErrorKind) {
        match err {
            ErrorKind::Ok => {
                let Some(buf) = buf else { return };
                let n = buf.readable_len();
                if n == 0 {
                    return;
                }
                let bytes = buf.readable().to_vec();
                buf.consume(n);
                let _ = conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(bytes));
            }
            _ => {
                let _ = conn.close();
            }
        }
    }

    fn on_close(&mut self, _conn: &TcpConnection, _err: ErrorKind) {
        let mut o = self.outcome.borrow_mut();
        o.echoed_closes += 1;
        if o.initiator_closes > 0 {
            drop(o);
            let _ = self.loop_.stop();
        }
    }
}

struct AcceptOnce {
    outcome: Rc<RefCell<Outcome>>,
    loop_: EventLoop,
}

impl ListenerObserver for AcceptOnce {
    fn on_accept(
        &mut self,
        _ln: &TcpListener,
        conn: TcpConnection,
        _remote: SockAddr,
        observer_slot: &mut Option<Box<dyn ConnObserver>>,
    ) {
        *observer_slot = Some(Box::new(EchoingConn {
            outcome: self.outcome.clone(),
            loop_: self.loop_.clone(),
        }));
        conn.read_start().expect("read_start on freshly accepted connection");
    }
}

struct Initiator {
    outcome: Rc<RefCell<Outcome>>,
    loop_: EventLoop,
}

impl ConnObserver for Initiator {
    fn on_connect(&mut self, conn: &TcpConnection, err: ErrorKind) {
        assert!(err.is_ok(), "connect failed: {err}");
        conn.read_start().expect("read_start after connect");
        conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(PAYLOAD.to_vec()))
            .expect("queue initial payload");
    }

    fn on_read(&mut self, conn: &TcpConnection, buf: Option<&mut TcpInputBuffer>, err: ErrorKind) {
        match err {
            ErrorKind::Ok => {
                let Some(buf) = buf else { return };
                let n = buf.readable_len();
                self.outcome.borrow_mut().initiator_read.extend_from_slice(buf.readable());
                buf.consume(n);
                if self.outcome.borrow().initiator_read.len() >= PAYLOAD.len() {
                    let _ = conn.close();
                }
            }
            _ => {
                let _ = conn.close();
            }
        }
    }

    fn on_close(&mut self, _conn: &TcpConnection, _err: ErrorKind) {
        let mut o = self.outcome.borrow_mut();
        o.initiator_closes += 1;
        if o.echoed_closes > 0 {
            drop(o);
            let _ = self.loop_.stop();
        }
    }
}

#[test]
fn loopback_echo_round_trip() {
    let loop_ = EventLoop::new().expect("construct event loop");
    let outcome = Rc::new(RefCell::new(Outcome::default()));

    let listener = TcpListener::init(
        &loop_,
        DefaultTransport::new(),
        Box::new(AcceptOnce { outcome: outcome.clone(), loop_: loop_.clone() }),
    );
    listener.open(SockAddr::v4_wildcard(0)).expect("bind listener to an ephemeral port");
    let local = listener.local_addr().expect("retrieve bound address");
    assert!(!local.is_port_zero(), "OS must have assigned a concrete port");
    listener.listen(128).expect("listen");

    let initiator = TcpConnection::init(
        &loop_,
        DefaultTransport::new(),
        Box::new(Initiator { outcome: outcome.clone(), loop_: loop_.clone() }),
    );
    initiator.open(SockAddr::v4_wildcard(0)).expect("bind initiator");
    initiator.connect(local).expect("submit connect");

    let deadline = loop_.now().add(Duration::from_secs(5)).expect("deadline within range");
    loop_.run_until(Some(deadline)).expect("drain to completion");

    let outcome = outcome.borrow();
    assert_eq!(outcome.initiator_read, PAYLOAD);
    assert_eq!(outcome.initiator_closes, 1);
    assert_eq!(outcome.echoed_closes, 1);
}
