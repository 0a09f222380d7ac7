//! §8 scenario 6: three writes of distinct small payloads queued before the
//! first completes must be delivered to the peer in order and in full, and
//! the three `on_write` callbacks must fire in submission order.

use arrowhead_core::tcp::buffer::TcpInputBuffer;
use arrowhead_core::tcp::transport::DefaultTransport;
use arrowhead_core::{
    ConnObserver, ErrorKind, EventLoop, ListenerObserver, SockAddr, TcpConnection, TcpListener,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Outcome {
    peer_read: Vec<u8>,
    peer_closed: bool,
    write_completions: Vec<String>,
    writer_closed: bool,
}

struct PeerEcho {
    outcome: Rc<RefCell<Outcome>>,
    loop_: EventLoop,
}

impl ConnObserver for PeerEcho {
    fn on_read(&mut self, conn: &TcpConnection, buf: Option<&mut TcpInputBuffer>, err: ErrorKind) {
        match err {
            ErrorKind::Ok => {
                let Some(buf) = buf else { return };
                let n = buf.readable_len();
                self.outcome.borrow_mut().peer_read.extend_from_slice(buf.readable());
                buf.consume(n);
            }
            ErrorKind::Eof => {
                let _ = conn.close();
            }
            _ => {
                let _ = conn.close();
            }
        }
    }

    fn on_close(&mut self, _conn: &TcpConnection, _err: ErrorKind) {
        let mut o = self.outcome.borrow_mut();
        o.peer_closed = true;
        if o.writer_closed {
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
        *observer_slot = Some(Box::new(PeerEcho {
            outcome: self.outcome.clone(),
            loop_: self.loop_.clone(),
        }));
        conn.read_start().expect("read_start on accepted connection");
    }
}

struct Writer {
    outcome: Rc<RefCell<Outcome>>,
    loop_: EventLoop,
}

impl ConnObserver for Writer {
    fn on_connect(&mut self, conn: &TcpConnection, err: ErrorKind) {
        assert!(err.is_ok(), "connect failed: {err}");
        // Queue all three before any of them can complete: write() is
        // synchronous at the entry point, so nothing yields back to the
        // reactor between these three calls.
        conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(b"A".to_vec()))
            .expect("queue A");
        conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(b"BB".to_vec()))
            .expect("queue BB");
        conn.write(arrowhead_core::tcp::buffer::TcpOutbound::new(b"CCC".to_vec()))
            .expect("queue CCC");
    }

    fn on_write(&mut self, conn: &TcpConnection, out: arrowhead_core::tcp::buffer::TcpOutbound, err: ErrorKind) {
        assert!(err.is_ok(), "write failed: {err}");
        // Each queued payload has a distinct length ("A"=1, "BB"=2, "CCC"=3),
        // so the length alone identifies which completed without needing a
        // byte-level accessor on an already-sent `TcpOutbound`.
        let label = match out.len() {
            1 => "A",
            2 => "BB",
            3 => "CCC",
            n => panic!("unexpected write length {n}"),
        };
        let mut o = self.outcome.borrow_mut();
        o.write_completions.push(label.to_string());
        if o.write_completions.len() == 3 {
            drop(o);
            let _ = conn.close();
        }
    }

    fn on_close(&mut self, _conn: &TcpConnection, _err: ErrorKind) {
        let mut o = self.outcome.borrow_mut();
        o.writer_closed = true;
        if o.peer_closed {
            drop(o);
            let _ = self.loop_.stop();
        }
    }
}

#[test]
fn writes_complete_in_submission_order() {
    let loop_ = EventLoop::new().expect("construct event loop");
    let outcome = Rc::new(RefCell::new(Outcome::default()));

    let listener = TcpListener::init(
        &loop_,
        DefaultTransport::new(),
        Box::new(AcceptOnce { outcome: outcome.clone(), loop_: loop_.clone() }),
    );
    listener.open(SockAddr::v4_wildcard(0)).expect("bind listener");
    let local = listener.local_addr().expect("local addr");
    listener.listen(128).expect("listen");

    let writer = TcpConnection::init(
        &loop_,
        DefaultTransport::new(),
        Box::new(Writer { outcome: outcome.clone(), loop_: loop_.clone() }),
    );
    writer.open(SockAddr::v4_wildcard(0)).expect("bind writer");
    writer.connect(local).expect("submit connect");

    let deadline = loop_.now().add(Duration::from_secs(5)).expect("deadline");
    loop_.run_until(Some(deadline)).expect("drain to completion");

    let outcome = outcome.borrow();
    assert_eq!(outcome.write_completions, vec!["A", "BB", "CCC"]);
    assert_eq!(outcome.peer_read, b"ABBCCC");
    assert!(outcome.writer_closed);
    assert!(outcome.peer_closed);
}
