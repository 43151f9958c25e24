//! Echo protocol handler (event-driven shape).

use crate::error::{HandlerError, SessionError};
use crate::runtime::{Event, EventHandler};
use async_trait::async_trait;
use bytes::Bytes;

/// Echoes every received line back unchanged.
#[derive(Debug, Default)]
pub struct Echo;

impl Echo {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for Echo {
    async fn on_event(
        &mut self,
        event: Event,
        payload: &[u8],
        _error: Option<&SessionError>,
    ) -> Result<Bytes, HandlerError> {
        match event {
            Event::Received => Ok(Bytes::copy_from_slice(payload)),
            _ => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_exact_bytes() {
        let mut echo = Echo::new();
        let reply = echo.on_event(Event::Received, b"5\n", None).await.unwrap();
        assert_eq!(&reply[..], b"5\n");

        let reply = echo.on_event(Event::Received, b" spaced \n", None).await.unwrap();
        assert_eq!(&reply[..], b" spaced \n");
    }

    #[tokio::test]
    async fn test_nothing_to_send_after_reply() {
        let mut echo = Echo::new();
        let reply = echo.on_event(Event::Sent, b"5\n", None).await.unwrap();
        assert!(reply.is_empty());

        let reply = echo.on_event(Event::Connected, b"", None).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_quit_is_plain_data() {
        let mut echo = Echo::new();
        let reply = echo.on_event(Event::Received, b"QUIT\n", None).await.unwrap();
        assert_eq!(&reply[..], b"QUIT\n");

        let reply = echo.on_event(Event::Received, b"quit\r\n", None).await.unwrap();
        assert_eq!(&reply[..], b"quit\r\n");

        // Session keeps going after the echo.
        let reply = echo.on_event(Event::Sent, b"quit\r\n", None).await.unwrap();
        assert!(reply.is_empty());
    }
}
