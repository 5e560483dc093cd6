//! Stage errors

use std::time::Duration;

use thiserror::Error;

use crate::protocol::telegram::Telegram;

/// Errors that can occur while talking to a stage controller
#[derive(Error, Debug)]
pub enum StageError {
    /// A frame violated the wire format.
    #[error("Malformed frame: {0}")]
    Protocol(String),

    /// No acknowledgement can be derived for this telegram shape.
    #[error("Telegram shape not recognized, cannot derive expected handshake")]
    UnrecognizedTelegram,

    /// The drive acknowledged a command with the wrong echo.
    #[error("Handshake mismatch: expected {expected}, got {actual}")]
    HandshakeMismatch {
        /// Echo the drive should have sent.
        expected: Telegram,
        /// Frame actually received.
        actual: Telegram,
    },

    /// The transport failed or the device went away.
    #[error("Communication failure: {0}")]
    Communication(String),

    /// Status polling gave up before the expected state appeared.
    #[error("Polling exceeded timeout of {elapsed:?} without the expected result; {diagnostic}")]
    PollTimeout {
        /// Time spent polling.
        elapsed: Duration,
        /// Last status telegram received, when the poll was for telegrams.
        last: Option<Telegram>,
        /// Human readable summary of the last reply.
        diagnostic: String,
    },

    /// The controller is in a state that forbids the operation.
    #[error("Invalid device state: {0}")]
    InvalidState(String),

    /// A demanded position is outside the travel range.
    #[error("Demanded position {value} is not between zero and {max}")]
    OutOfRange {
        /// Demanded position in millimeters.
        value: f64,
        /// Travel limit in millimeters.
        max: f64,
    },

    /// A configured drive parameter does not fit its register.
    #[error("Value {value} for {name} exceeds limit of {limit}")]
    ParameterRange {
        /// Name of the parameter.
        name: &'static str,
        /// Scaled value that was demanded.
        value: f64,
        /// Largest value the register can hold.
        limit: f64,
    },

    /// No connection is open.
    #[error("Not connected and not trying to connect")]
    NotConnected,

    /// A connection is already open.
    #[error("Already connected")]
    AlreadyConnected,

    /// The device refused a command.
    #[error("Command rejected by device: {0}")]
    Rejected(String),

    /// The controller has no way to perform the operation.
    #[error("Operation not supported by this stage: {0}")]
    Unsupported(&'static str),

    /// Transport level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_not_empty() {
        let err = StageError::NotConnected;
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn poll_timeout_display_carries_diagnostic() {
        let err = StageError::PollTimeout {
            elapsed: Duration::from_secs(2),
            last: None,
            diagnostic: "no known pattern".to_string(),
        };
        assert!(err.to_string().contains("no known pattern"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: StageError = io.into();
        assert!(matches!(err, StageError::Io(_)));
    }
}
