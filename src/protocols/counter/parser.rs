//! Counter protocol parser.

/// Parsed counter command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A decimal value to increment.
    Value(i64),
    /// Quit command.
    Quit,
}

/// Parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is not a decimal integer.
    InvalidNumber,
}

/// Parse one line (terminator optional) into a command.
pub fn parse(line: &[u8]) -> Result<Command, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidNumber)?;
    let text = text.trim();

    if text.eq_ignore_ascii_case("QUIT") {
        return Ok(Command::Quit);
    }

    text.parse::<i64>()
        .map(Command::Value)
        .map_err(|_| ParseError::InvalidNumber)
}

/// Format a value response.
pub fn response_value(n: i64) -> String {
    format!("{n}\n")
}

/// Format an error response.
pub fn response_error(msg: &str) -> String {
    format!("ERROR {msg}\n")
}
