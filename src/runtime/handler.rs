//! Pluggable per-connection handlers.
//!
//! A [`HandlerFactory`] produces one [`Handler`] per accepted connection. The
//! handler comes in one of three shapes; the session lifecycle (deadlines,
//! quit checks, teardown) is the same for all of them.
//!
//! - [`EventHandler`]: the session reads lines and calls back with events.
//! - [`StepHandler`]: `proceed` is called until it returns an error.
//! - [`OnceHandler`]: `handle` is called exactly once.

use crate::error::{HandlerError, SessionError};
use crate::runtime::Conn;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Session events delivered to an [`EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Synthetic event carrying a handler fault.
    None,
    /// Emitted once when the session starts.
    Connected,
    /// Emitted once at teardown.
    Closed,
    /// A line was read; the payload includes the terminator.
    Received,
    /// A reply was written (or failed to be written).
    Sent,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::None => "none",
            Event::Connected => "connected",
            Event::Closed => "closed",
            Event::Received => "received",
            Event::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// Callback-style handler.
///
/// The returned bytes are written back to the client. An empty or
/// whitespace-only reply means there is nothing (more) to send. Returning
/// [`HandlerError::Close`] force-closes the connection.
#[async_trait]
pub trait EventHandler: Send {
    async fn on_event(
        &mut self,
        event: Event,
        payload: &[u8],
        error: Option<&SessionError>,
    ) -> Result<Bytes, HandlerError>;
}

/// Iterate-until-error handler. Each `proceed` call typically reads one
/// request from `conn` and writes the response. Return
/// [`HandlerError::Stop`] to end the session deliberately.
#[async_trait]
pub trait StepHandler: Send {
    async fn proceed(&mut self, conn: &mut Conn) -> Result<(), HandlerError>;
}

/// Single-shot handler: owns the whole conversation in one call.
#[async_trait]
pub trait OnceHandler: Send {
    async fn handle(&mut self, conn: &mut Conn) -> Result<(), HandlerError>;
}

/// A per-connection handler in one of the supported shapes.
pub enum Handler {
    Event(Box<dyn EventHandler>),
    Step(Box<dyn StepHandler>),
    Once(Box<dyn OnceHandler>),
}

impl Handler {
    pub fn event(handler: impl EventHandler + 'static) -> Self {
        Handler::Event(Box::new(handler))
    }

    pub fn step(handler: impl StepHandler + 'static) -> Self {
        Handler::Step(Box::new(handler))
    }

    pub fn once(handler: impl OnceHandler + 'static) -> Self {
        Handler::Once(Box::new(handler))
    }

    pub(crate) fn shape(&self) -> &'static str {
        match self {
            Handler::Event(_) => "event",
            Handler::Step(_) => "step",
            Handler::Once(_) => "once",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Creates a handler for each accepted connection.
///
/// The connection is passed so the factory can inspect addresses; all I/O
/// happens later through the session.
pub trait HandlerFactory: Send + Sync + 'static {
    fn create(&self, conn: &Conn) -> Handler;
}

impl<F> HandlerFactory for F
where
    F: Fn(&Conn) -> Handler + Send + Sync + 'static,
{
    fn create(&self, conn: &Conn) -> Handler {
        self(conn)
    }
}

/// Returns `true` if a reply has nothing to send.
pub(crate) fn is_blank(payload: &[u8]) -> bool {
    payload.iter().all(|b| b.is_ascii_whitespace())
}
