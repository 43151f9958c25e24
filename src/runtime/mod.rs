//! Connection runtime.
//!
//! - `listener`: binds the listening socket
//! - `acceptor`: accept loop feeding a bounded queue, and the worker pool
//!   draining it
//! - `session`: drives one connection through its handler
//! - `connection`: the buffered, deadline-aware [`Conn`] handlers talk to
//! - `shutdown`: quit broadcast and live-session accounting
//! - `handler`: the handler shapes and the factory trait

pub(crate) mod acceptor;
mod connection;
pub mod handler;
pub mod listener;
mod session;
mod shutdown;

pub use connection::{Conn, MAX_LINE_LENGTH};
pub use handler::{Event, EventHandler, Handler, HandlerFactory, OnceHandler, StepHandler};
pub use shutdown::{SessionGuard, Shutdown};
