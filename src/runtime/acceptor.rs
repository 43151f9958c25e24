//! Accept loop and acceptor worker pool.
//!
//! The accept loop is the only producer on a bounded FIFO queue of pending
//! connections; a fixed number of workers consume it and spawn one session
//! task per connection. A full queue blocks the accept loop, which throttles
//! accepting to the rate the workers can dispatch.

use crate::runtime::handler::HandlerFactory;
use crate::runtime::session;
use crate::runtime::shutdown::Shutdown;
use crate::runtime::Conn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A raw accepted connection waiting for a worker.
pub(crate) type PendingConnection = (TcpStream, SocketAddr);

/// Accept connections and queue them for the workers until quit is signaled.
///
/// The listener and the queue sender are dropped when this returns, which
/// releases the socket and lets the workers drain and exit.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    queue: mpsc::Sender<PendingConnection>,
    quit: CancellationToken,
) {
    let mut backoff = Backoff::default();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            res = listener.accept() => res,
        };

        let (stream, peer) = match accepted {
            Ok(pending) => {
                backoff.reset();
                pending
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                tokio::task::yield_now().await;
                if let Some(delay) = backoff.next_delay() {
                    tokio::select! {
                        biased;
                        _ = quit.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                continue;
            }
        };
        trace!(peer = %peer, "Accepted connection");

        tokio::select! {
            biased;
            _ = quit.cancelled() => {
                debug!(peer = %peer, "Dropping connection accepted during shutdown");
                break;
            }
            permit = queue.reserve() => match permit {
                Ok(permit) => permit.send((stream, peer)),
                // Every worker is gone; nothing left to dispatch to.
                Err(_) => break,
            },
        }
    }

    info!("Accept loop stopped");
}

/// Shared state handed to each acceptor worker.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub factory: Arc<dyn HandlerFactory>,
    pub shutdown: Shutdown,
    pub idle_timeout: Option<Duration>,
}

/// Spawn `count` workers consuming `queue`.
pub(crate) fn spawn_pool(
    count: usize,
    queue: mpsc::Receiver<PendingConnection>,
    dispatch: Dispatch,
) -> Vec<JoinHandle<()>> {
    let queue = Arc::new(Mutex::new(queue));

    (0..count)
        .map(|worker_id| tokio::spawn(worker(worker_id, Arc::clone(&queue), dispatch.clone())))
        .collect()
}

async fn worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<PendingConnection>>>,
    dispatch: Dispatch,
) {
    trace!(worker = worker_id, "Acceptor worker started");

    loop {
        let next = queue.lock().await.recv().await;
        let Some((stream, peer)) = next else {
            break;
        };

        // Counted before the session task exists so a drain never misses it.
        let guard = dispatch.shutdown.enter();
        let conn = Conn::new(stream, peer, dispatch.idle_timeout, dispatch.shutdown.token());
        trace!(worker = worker_id, peer = %peer, "Dispatching session");
        tokio::spawn(session::run(conn, Arc::clone(&dispatch.factory), guard));
    }

    debug!(worker = worker_id, "Acceptor worker stopped");
}

/// Retry policy for failed accepts: the first few retries only yield, later
/// ones sleep with exponential backoff.
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
}

impl Backoff {
    const YIELD_ONLY: u32 = 3;
    const BASE: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures <= Self::YIELD_ONLY {
            return None;
        }
        let exp = (self.failures - Self::YIELD_ONLY - 1).min(16);
        Some((Self::BASE * 2u32.pow(exp)).min(Self::MAX))
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}
