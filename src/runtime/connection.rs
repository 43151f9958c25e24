//! Per-session connection state.
//!
//! A [`Conn`] owns both halves of an accepted stream, wrapped in a buffered
//! reader and writer. Every read, write and flush is bounded by the current
//! idle deadline, and line reads also return early when the quit signal fires.
//! A line longer than [`MAX_LINE_LENGTH`] ends the read with
//! [`SessionError::LineTooLong`].

use crate::error::SessionError;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest line, terminator included, that `read_line` accepts.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Buffered, deadline-aware connection handed to handlers.
pub struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    local: Option<SocketAddr>,
    /// `None` disables the idle timeout.
    idle_timeout: Option<Duration>,
    deadline: Option<Instant>,
    quit: CancellationToken,
}

impl Conn {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        idle_timeout: Option<Duration>,
        quit: CancellationToken,
    ) -> Self {
        let local = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();

        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
            local,
            idle_timeout,
            deadline: None,
            quit,
        }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address the connection was accepted on, if the socket could
    /// report it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Non-blocking check of the server's quit signal.
    pub fn is_quitting(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Re-arm the I/O deadline to `now + idle_timeout`.
    pub fn arm_deadline(&mut self) {
        self.deadline = self.idle_timeout.map(|t| Instant::now() + t);
    }

    /// Current I/O deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Read one `\n`-terminated line into `buf` (appending, terminator
    /// included). Returns the number of bytes read.
    ///
    /// A stream that ends before a terminator yields [`SessionError::Eof`];
    /// the partial line is left in `buf`. At most [`MAX_LINE_LENGTH`] bytes
    /// are consumed per call.
    pub async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize, SessionError> {
        let deadline = self.deadline;
        let quit = self.quit.clone();
        let read = with_deadline(deadline, async {
            let mut limited = (&mut self.reader).take(MAX_LINE_LENGTH as u64);
            limited.read_until(b'\n', buf).await.map_err(SessionError::from)
        });

        let n = tokio::select! {
            biased;
            _ = quit.cancelled() => return Err(SessionError::Quit),
            res = read => res?,
        };

        if n == 0 {
            return Err(SessionError::Eof);
        }
        if buf.last() != Some(&b'\n') {
            if n == MAX_LINE_LENGTH {
                return Err(SessionError::LineTooLong {
                    limit: MAX_LINE_LENGTH,
                });
            }
            return Err(SessionError::Eof);
        }
        Ok(n)
    }

    /// Queue bytes in the write buffer. Call [`flush`](Self::flush) to send.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let deadline = self.deadline;
        with_deadline(deadline, async {
            self.writer.write_all(data).await.map_err(SessionError::from)
        })
        .await
    }

    /// Flush buffered output to the socket.
    pub async fn flush(&mut self) -> Result<(), SessionError> {
        let deadline = self.deadline;
        with_deadline(deadline, async {
            self.writer.flush().await.map_err(SessionError::from)
        })
        .await
    }

    /// Write and flush.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.write(data).await?;
        self.flush().await
    }

    /// Flush what is pending and shut the write side down, then drop both
    /// halves. Errors are ignored: the peer may already be gone.
    pub(crate) async fn close(mut self) {
        let deadline = self.deadline;
        let _ = with_deadline(deadline, async {
            self.writer.shutdown().await.map_err(SessionError::from)
        })
        .await;
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| SessionError::Timeout)?,
        None => fut.await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A connected (server-side `Conn`, client stream) pair over loopback.
    pub(crate) async fn pair(
        idle_timeout: Option<Duration>,
        quit: CancellationToken,
    ) -> (Conn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Conn::new(server, peer, idle_timeout, quit), client)
    }

    #[tokio::test]
    async fn test_read_line_and_send() {
        let (mut conn, mut client) = pair(None, CancellationToken::new()).await;
        assert_eq!(conn.local_addr(), Some(client.peer_addr().unwrap()));

        client.write_all(b"hello\nworld\n").await.unwrap();

        let mut line = Vec::new();
        assert_eq!(conn.read_line(&mut line).await.unwrap(), 6);
        assert_eq!(line, b"hello\n");

        line.clear();
        conn.read_line(&mut line).await.unwrap();
        assert_eq!(line, b"world\n");

        conn.send(b"pong\n").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong\n");
    }

    #[tokio::test]
    async fn test_unterminated_line_is_eof() {
        let (mut conn, mut client) = pair(None, CancellationToken::new()).await;
        client.write_all(b"partial").await.unwrap();
        client.shutdown().await.unwrap();

        let mut line = Vec::new();
        let err = conn.read_line(&mut line).await.unwrap_err();
        assert!(matches!(err, SessionError::Eof));
        assert_eq!(line, b"partial");
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let (mut conn, mut client) = pair(None, CancellationToken::new()).await;
        let mut payload = vec![b'x'; MAX_LINE_LENGTH - 1];
        payload.push(b'\n');

        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client
        });

        let mut line = Vec::new();
        assert_eq!(conn.read_line(&mut line).await.unwrap(), MAX_LINE_LENGTH);
        assert_eq!(line.last(), Some(&b'\n'));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let (mut conn, mut client) = pair(None, CancellationToken::new()).await;

        // The server stops reading at the limit, so the tail may never drain.
        tokio::spawn(async move {
            let _ = client.write_all(&vec![b'a'; MAX_LINE_LENGTH + 16]).await;
            let _ = client.write_all(b"\n").await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut line = Vec::new();
        let err = conn.read_line(&mut line).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::LineTooLong {
                limit: MAX_LINE_LENGTH
            }
        ));
        assert_eq!(line.len(), MAX_LINE_LENGTH);
        assert!(!err.is_graceful());
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let (mut conn, _client) =
            pair(Some(Duration::from_millis(50)), CancellationToken::new()).await;
        conn.arm_deadline();
        assert!(conn.deadline().is_some());

        let mut line = Vec::new();
        let err = conn.read_line(&mut line).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout));
    }

    #[tokio::test]
    async fn test_no_deadline_without_idle_timeout() {
        let (mut conn, _client) = pair(None, CancellationToken::new()).await;
        conn.arm_deadline();
        assert!(conn.deadline().is_none());
    }

    #[tokio::test]
    async fn test_quit_interrupts_read() {
        let quit = CancellationToken::new();
        let (mut conn, _client) = pair(None, quit.clone()).await;

        let reader = tokio::spawn(async move {
            let mut line = Vec::new();
            conn.read_line(&mut line).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        quit.cancel();

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Quit));
    }

    #[tokio::test]
    async fn test_close_sends_eof() {
        let (conn, mut client) = pair(None, CancellationToken::new()).await;
        conn.close().await;

        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
