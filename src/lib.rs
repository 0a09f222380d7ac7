//! arrowhead_core: a single-threaded, completion-based event loop, the
//! page/bump/slab memory substrate it is built from, and a stackable TCP
//! transport layer over it.
//!
//! Every handle in this crate (`EventLoop`, `TcpConnection`, `TcpListener`,
//! `SlabAllocator<T>`) is an `Rc` clone of shared state, which makes the
//! whole crate `!Send`/`!Sync` without any marker types: an `Rc` cannot
//! cross a thread boundary, so nothing built on top of one can either.
//! Running more than one event loop means running one per OS thread, each
//! with its own independent handles.

pub mod buf;
pub mod config;
pub mod error;
pub mod mem;
pub mod net;
pub mod reactor;
pub mod sys;
pub mod tcp;
pub mod time;

pub use error::{ErrorKind, Result};
pub use net::SockAddr;
pub use reactor::EventLoop;
pub use tcp::{ConnObserver, ListenerObserver, TcpConnection, TcpListener};
