//! Echo protocol implementation.
//!
//! A line echo service, useful for exercising the connection lifecycle
//! without any protocol state:
//! - Client sends: `<line>\n`
//! - Server echoes: `<line>\n`, byte for byte
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  5\n
//! Response: 5\n
//!
//! Request:  hello world\n
//! Response: hello world\n
//! ```
//!
//! There are no commands: `QUIT\n` is echoed like any other line. The client
//! ends the session by closing its side.

pub mod handler;

pub use handler::Echo;
