//! tcp-acceptor: a TCP connection acceptance and lifecycle framework.
//!
//! The server listens on an address, fans accepted connections out over a
//! bounded pool of acceptor workers, runs one session task per connection,
//! and supports a coordinated stop followed by a waitable drain. What the
//! bytes on a connection mean is up to a caller-supplied handler in one of
//! three shapes (see [`runtime::handler`]).

pub mod error;
pub mod protocols;
pub mod runtime;
pub mod server;

pub use error::{HandlerError, ServerError, SessionError};
pub use runtime::{Conn, Event, EventHandler, Handler, HandlerFactory, OnceHandler, StepHandler};
pub use runtime::{SessionGuard, Shutdown};
pub use server::{Server, ServerConfig, DEFAULT_IDLE_TIMEOUT};
