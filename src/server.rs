//! TCP server façade: configuration, construction and the control surface.
//!
//! ```no_run
//! use tcp_acceptor::protocols::echo::Echo;
//! use tcp_acceptor::{Handler, Server, ServerConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), tcp_acceptor::ServerError> {
//! let config = ServerConfig::new("127.0.0.1:7070")
//!     .acceptors(4)
//!     .idle_timeout(Duration::from_secs(30))
//!     .handler(|_: &tcp_acceptor::Conn| Handler::event(Echo::new()));
//!
//! let mut server = Server::bind(config).await?;
//! server.start()?;
//! // ...
//! server.stop()?;
//! server.wait(Some(Duration::from_secs(5))).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::ServerError;
use crate::runtime::acceptor::{self, Dispatch};
use crate::runtime::{listener, HandlerFactory, Shutdown};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default idle timeout for connections.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Server configuration. Fixed once the server is bound.
#[derive(Clone)]
pub struct ServerConfig {
    address: String,
    acceptors: usize,
    idle_timeout: Duration,
    factory: Option<Arc<dyn HandlerFactory>>,
}

impl ServerConfig {
    /// Configuration for `address` (`host:port`) with default settings and no
    /// handler.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            acceptors: 0,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            factory: None,
        }
    }

    /// Number of acceptor workers. Zero selects the host parallelism.
    pub fn acceptors(mut self, count: usize) -> Self {
        self.acceptors = count;
        self
    }

    /// Idle timeout per connection. `Duration::ZERO` disables it.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Factory producing one handler per accepted connection. Required.
    pub fn handler(mut self, factory: impl HandlerFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Same as [`handler`](Self::handler) for an already shared factory.
    pub fn shared_handler(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Resolved acceptor count, at least 1.
    pub fn acceptor_count(&self) -> usize {
        if self.acceptors == 0 {
            num_cpus()
        } else {
            self.acceptors
        }
    }

    /// Resolved idle timeout; `None` when disabled.
    pub fn effective_idle_timeout(&self) -> Option<Duration> {
        (!self.idle_timeout.is_zero()).then_some(self.idle_timeout)
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("acceptors", &self.acceptor_count())
            .field("idle_timeout", &self.idle_timeout)
            .field("handler", &self.factory.is_some())
            .finish()
    }
}

/// A bound TCP server.
///
/// Lifecycle: [`bind`](Self::bind) → [`start`](Self::start) →
/// [`stop`](Self::stop) → [`wait`](Self::wait). Dropping a started server
/// that was never stopped requests the stop, so its tasks and listener wind
/// down on their own.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    acceptors: usize,
    dispatch: Dispatch,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Validate `config` and bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let factory = config.factory.clone().ok_or(ServerError::NoHandler)?;
        let listener = listener::bind(&config.address).await?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            address: config.address.clone(),
            source: e,
        })?;

        info!(
            address = %local_addr,
            acceptors = config.acceptor_count(),
            idle_timeout = ?config.effective_idle_timeout(),
            "Server listening"
        );

        Ok(Self {
            listener: Some(listener),
            local_addr,
            acceptors: config.acceptor_count(),
            dispatch: Dispatch {
                factory,
                shutdown: Shutdown::new(),
                idle_timeout: config.effective_idle_timeout(),
            },
            tasks: Vec::new(),
        })
    }

    /// Spawn the accept loop and the acceptor workers, then return.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyStarted)?;

        let (tx, rx) = mpsc::channel(self.acceptors);
        self.tasks = acceptor::spawn_pool(self.acceptors, rx, self.dispatch.clone());
        self.tasks.push(tokio::spawn(acceptor::accept_loop(
            listener,
            tx,
            self.dispatch.shutdown.token(),
        )));

        info!(address = %self.local_addr, workers = self.acceptors, "Server started");
        Ok(())
    }

    /// Stop accepting and signal every session to wind down. Does not block.
    /// A second call fails with [`ServerError::AlreadyStopped`].
    pub fn stop(&self) -> Result<(), ServerError> {
        self.dispatch.shutdown.request_stop()
    }

    /// Wait until every session has exited, or `timeout` elapses.
    ///
    /// After a stop this also waits for the accept loop and the workers, so
    /// connections still queued at stop time are accounted for. Handlers that
    /// ignore the quit signal can keep this from returning; pass a timeout to
    /// bound the wait.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        let shutdown = self.dispatch.shutdown.clone();
        let tasks = if shutdown.is_stopping() {
            std::mem::take(&mut self.tasks)
        } else {
            Vec::new()
        };

        let drain = async move {
            for task in tasks {
                if let Err(e) = task.await {
                    debug!(error = %e, "Dispatch task ended abnormally");
                }
            }
            shutdown.drained().await;
        };

        match timeout {
            None => drain.await,
            Some(limit) => tokio::time::timeout(limit, drain)
                .await
                .map_err(|_| ServerError::DrainTimeout {
                    live: self.live_sessions(),
                })?,
        }

        info!(address = %self.local_addr, "Server drained");
        Ok(())
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of sessions currently open.
    pub fn live_sessions(&self) -> usize {
        self.dispatch.shutdown.live()
    }

    /// Cloneable handle for stopping the server or waiting on it from
    /// another task.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.dispatch.shutdown.clone()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("acceptors", &self.acceptors)
            .field("started", &self.listener.is_none())
            .field("shutdown", &self.dispatch.shutdown)
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let shutdown = &self.dispatch.shutdown;
        if !self.tasks.is_empty() && !shutdown.is_stopping() {
            debug!(address = %self.local_addr, "Server dropped while running, stopping");
            let _ = shutdown.request_stop();
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::echo::Echo;
    use crate::runtime::{Conn, Handler};
    use tokio_test::{assert_err, assert_ok};

    fn echo_config(address: &str) -> ServerConfig {
        ServerConfig::new(address).handler(|_: &Conn| Handler::event(Echo::new()))
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::new("127.0.0.1:0");
        assert!(config.acceptor_count() >= 1);
        assert_eq!(config.effective_idle_timeout(), Some(DEFAULT_IDLE_TIMEOUT));

        let config = config.acceptors(3).idle_timeout(Duration::ZERO);
        assert_eq!(config.acceptor_count(), 3);
        assert_eq!(config.effective_idle_timeout(), None);
    }

    #[tokio::test]
    async fn test_missing_handler_is_rejected() {
        let err = assert_err!(Server::bind(ServerConfig::new("127.0.0.1:0")).await);
        assert!(matches!(err, ServerError::NoHandler));
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let err = assert_err!(Server::bind(echo_config("nowhere")).await);
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let mut server = Server::bind(echo_config("127.0.0.1:0")).await.unwrap();
        assert_ok!(server.start());
        let err = assert_err!(server.start());
        assert!(matches!(err, ServerError::AlreadyStarted));

        server.stop().unwrap();
        server.wait(Some(Duration::from_secs(1))).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_fails_fast() {
        let mut server = Server::bind(echo_config("127.0.0.1:0")).await.unwrap();
        server.start().unwrap();

        assert_ok!(server.stop());
        let err = assert_err!(server.stop());
        assert!(matches!(err, ServerError::AlreadyStopped));

        assert_ok!(server.wait(Some(Duration::from_secs(1))).await);
    }

    #[tokio::test]
    async fn test_drop_without_stop_shuts_down() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpStream;

        let mut server = Server::bind(echo_config("127.0.0.1:0")).await.unwrap();
        server.start().unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();

        let mut client = TcpStream::connect(addr).await.unwrap();
        while handle.live() == 0 {
            tokio::task::yield_now().await;
        }

        drop(server);
        assert!(handle.is_stopping());
        assert_ok!(handle.drain(Some(Duration::from_secs(2))).await);

        // The open session was told to quit and closed its side.
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);

        // The listener is released once the accept loop notices.
        let refused = async {
            while TcpStream::connect(addr).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), refused).await);
    }

    #[tokio::test]
    async fn test_stop_and_wait_without_start() {
        let mut server = Server::bind(echo_config("127.0.0.1:0")).await.unwrap();
        server.stop().unwrap();
        assert_ok!(server.wait(None).await);
        assert_eq!(server.live_sessions(), 0);
    }
}
