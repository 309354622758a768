//! Error taxonomy for the reader, compiler, and driver.
//!
//! `Display` renders the bare message; the REPL driver adds the `ERROR: `
//! prefix when reporting to the error stream. `Fatal` is never caught by the
//! driver loop and terminates the process with a diagnostic.

use std::fmt;
use std::io;

/// Unified error type for one REPL iteration.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed input: bad number, unterminated list, misplaced dot,
    /// trailing junk. The driver drains the rest of the line and re-prompts.
    Reader(String),
    /// Special-form shape violation, unresolved symbol, arity mismatch, or a
    /// non-callable callee. Partial IR for the failing thunk is abandoned.
    Compile(String),
    /// A value returned from compiled code was not a known form.
    Type(String),
    /// JIT engine creation, verifier rejection, or an I/O failure on the
    /// driver's streams.
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Reader(msg)
            | Error::Compile(msg)
            | Error::Type(msg)
            | Error::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Fatal(format!("I/O error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message() {
        let err = Error::Compile("def must bind to a symbol".to_string());
        assert_eq!(format!("{}", err), "def must bind to a symbol");
    }

    #[test]
    fn io_errors_are_fatal() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Fatal(_)));
    }
}
