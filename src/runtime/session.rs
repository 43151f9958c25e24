//! Connection session: drives one accepted connection to completion.
//!
//! Whatever the handler shape, a session:
//! 1. asks the factory for a handler,
//! 2. re-arms the idle deadline before every read cycle and checks the quit
//!    signal before reading,
//! 3. runs handler code under `catch_unwind` so a panic only ends this
//!    session,
//! 4. closes the connection on every exit path and only then releases its
//!    slot in the live-session counter.
//!
//! For event handlers only [`HandlerError::Close`] ends the session; any other
//! handler error is logged and the reply for that event is dropped.

use crate::error::{HandlerError, SessionError};
use crate::runtime::handler::{is_blank, Event, EventHandler, Handler, HandlerFactory};
use crate::runtime::handler::{OnceHandler, StepHandler};
use crate::runtime::shutdown::SessionGuard;
use crate::runtime::Conn;
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Initial capacity of the per-session line buffer.
const LINE_CAPACITY: usize = 1024;

/// Run a session to completion. The guard is released after the connection
/// has been closed.
pub(crate) async fn run(conn: Conn, factory: Arc<dyn HandlerFactory>, guard: SessionGuard) {
    let peer = conn.peer_addr();
    trace!(peer = %peer, "Session started");

    let ending = drive(conn, factory.as_ref()).await;

    match &ending {
        Ok(()) => debug!(peer = %peer, "Session closed"),
        Err(SessionError::Fault(fault)) => {
            error!(peer = %peer, fault = %fault, "Handler fault, session closed")
        }
        Err(e) if e.is_graceful() => debug!(peer = %peer, reason = %e, "Session closed"),
        Err(e) => debug!(peer = %peer, error = %e, "Session ended with error"),
    }

    drop(guard);
}

async fn drive(mut conn: Conn, factory: &dyn HandlerFactory) -> Result<(), SessionError> {
    let handler = match std::panic::catch_unwind(AssertUnwindSafe(|| factory.create(&conn))) {
        Ok(handler) => handler,
        Err(panic) => {
            conn.close().await;
            return Err(SessionError::Fault(panic_message(panic.as_ref())));
        }
    };
    trace!(peer = %conn.peer_addr(), shape = handler.shape(), "Handler created");

    match handler {
        Handler::Event(mut handler) => {
            let ending = flatten(guarded(drive_events(&mut conn, handler.as_mut())).await);

            if let Err(fault @ SessionError::Fault(_)) = &ending {
                let report = handler.on_event(Event::None, &[], Some(fault));
                if let Err(panic) = guarded(report).await {
                    error!(peer = %conn.peer_addr(), fault = %panic, "Handler panicked on fault report");
                }
            }

            let peer = conn.peer_addr();
            conn.close().await;

            let cause = ending.as_ref().err().filter(|e| !e.is_graceful());
            if let Err(panic) = guarded(handler.on_event(Event::Closed, &[], cause)).await {
                error!(peer = %peer, fault = %panic, "Handler panicked on close");
            }
            ending
        }
        Handler::Step(mut handler) => {
            let ending = flatten(guarded(drive_steps(&mut conn, handler.as_mut())).await);
            conn.close().await;
            ending
        }
        Handler::Once(mut handler) => {
            let ending = flatten(guarded(drive_once(&mut conn, handler.as_mut())).await);
            conn.close().await;
            ending
        }
    }
}

async fn drive_events(conn: &mut Conn, handler: &mut dyn EventHandler) -> Result<(), SessionError> {
    let peer = conn.peer_addr();
    conn.arm_deadline();
    let greeting = handler.on_event(Event::Connected, &[], None).await;
    let greeting = reply_or_close(peer, Event::Connected, greeting)?;
    send_replies(conn, handler, greeting).await?;

    let mut line = Vec::with_capacity(LINE_CAPACITY);
    loop {
        if conn.is_quitting() {
            return Err(SessionError::Quit);
        }

        conn.arm_deadline();
        line.clear();
        conn.read_line(&mut line).await?;

        let reply = handler.on_event(Event::Received, &line, None).await;
        let reply = reply_or_close(peer, Event::Received, reply)?;
        if conn.is_quitting() {
            return Err(SessionError::Quit);
        }
        send_replies(conn, handler, reply).await?;
    }
}

/// Write replies until the handler returns a blank one. Each write is
/// followed by a `Sent` callback whose result is the next reply.
async fn send_replies(
    conn: &mut Conn,
    handler: &mut dyn EventHandler,
    mut reply: Bytes,
) -> Result<(), SessionError> {
    while !is_blank(&reply) {
        if let Err(err) = conn.send(&reply).await {
            // The session ends with the write error whatever the handler says.
            let _ = handler.on_event(Event::Sent, &reply, Some(&err)).await;
            return Err(err);
        }
        let next = handler.on_event(Event::Sent, &reply, None).await;
        reply = reply_or_close(conn.peer_addr(), Event::Sent, next)?;
    }
    Ok(())
}

fn reply_or_close(
    peer: SocketAddr,
    event: Event,
    res: Result<Bytes, HandlerError>,
) -> Result<Bytes, SessionError> {
    match res {
        Ok(reply) => Ok(reply),
        Err(HandlerError::Close) => Err(SessionError::Handler(HandlerError::Close)),
        Err(e) => {
            debug!(peer = %peer, event = %event, error = %e, "Handler error, reply dropped");
            Ok(Bytes::new())
        }
    }
}

async fn drive_steps(conn: &mut Conn, handler: &mut dyn StepHandler) -> Result<(), SessionError> {
    loop {
        if conn.is_quitting() {
            return Err(SessionError::Quit);
        }
        conn.arm_deadline();
        handler.proceed(conn).await?;
    }
}

async fn drive_once(conn: &mut Conn, handler: &mut dyn OnceHandler) -> Result<(), SessionError> {
    if conn.is_quitting() {
        return Err(SessionError::Quit);
    }
    conn.arm_deadline();
    handler.handle(conn).await?;
    Ok(())
}

/// Poll `fut`, turning a panic into `Err(message)`.
async fn guarded<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn flatten(res: Result<Result<(), SessionError>, String>) -> Result<(), SessionError> {
    res.unwrap_or_else(|panic| Err(SessionError::Fault(panic)))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
