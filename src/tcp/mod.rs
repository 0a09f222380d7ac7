//! The TCP transport layer: connection and listener state machines built
//! over the reactor, plus the stackable [`transport::TcpTransport`] vtable
//! every socket operation passes through.

pub mod buffer;
pub mod conn;
pub mod listener;
pub mod transport;

pub use buffer::{TcpInputBuffer, TcpOutbound};
pub use conn::{ConnObserver, ConnState, ShutdownFlags, TcpConnection};
pub use listener::{ListenerObserver, ListenerState, TcpListener};
pub use transport::{DefaultTransport, TcpTransport};
