//! Counter protocol implementation.
//!
//! A stateful line protocol: the client sends a decimal integer, the server
//! replies with that integer plus one.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  0\n
//! Response: 1\n
//!
//! Request:  abc\n
//! Response: ERROR invalid number\n
//! ```
//!
//! Special commands:
//! - `QUIT\n` - server replies `OK\n` and closes the connection

pub mod handler;
pub mod parser;

pub use handler::{Counter, CounterState};
