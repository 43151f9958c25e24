//! Counter protocol handler (iterate-until-error shape).

use super::parser::{self, Command};
use crate::error::HandlerError;
use crate::runtime::{Conn, StepHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Initial capacity of the line buffer; `Conn` enforces the real limit.
const LINE_CAPACITY: usize = 64;

/// Last value produced by any counter session, shared for observation.
#[derive(Debug, Clone, Default)]
pub struct CounterState {
    last: Arc<AtomicI64>,
}

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value sent by a counter session.
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }

    fn record(&self, n: i64) {
        self.last.store(n, Ordering::Release);
    }
}

/// Replies to each decimal line with the value plus one.
#[derive(Debug)]
pub struct Counter {
    state: CounterState,
    line: Vec<u8>,
}

impl Counter {
    pub fn new(state: CounterState) -> Self {
        Self {
            state,
            line: Vec::with_capacity(LINE_CAPACITY),
        }
    }
}

#[async_trait]
impl StepHandler for Counter {
    async fn proceed(&mut self, conn: &mut Conn) -> Result<(), HandlerError> {
        self.line.clear();
        conn.read_line(&mut self.line).await?;

        let response = match parser::parse(&self.line) {
            Ok(Command::Value(n)) => match n.checked_add(1) {
                Some(next) => {
                    self.state.record(next);
                    parser::response_value(next)
                }
                None => parser::response_error("number out of range"),
            },
            Ok(Command::Quit) => {
                conn.send(b"OK\n").await?;
                return Err(HandlerError::Stop);
            }
            Err(_) => parser::response_error("invalid number"),
        };

        conn.send(response.as_bytes()).await?;
        Ok(())
    }
}
