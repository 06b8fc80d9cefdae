//! Error types for hexapod controller operations
//!
//! The taxonomy follows the hardware boundary: [`ConnectError`] is fatal to the
//! session, [`CommandError`] and [`QueryError`] are recoverable per call, and
//! [`MotionError`] wraps whichever of the two ended a move's lifecycle.

use std::time::Duration;
use thiserror::Error;

/// Transport or handshake failure. Fatal to the session; the caller must
/// reconnect before issuing further operations.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("failed to reach controller at {address}:{port}")]
    Transport {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("controller handshake failed: {0}")]
    Handshake(String),

    #[error("no active controller session")]
    NotConnected,
}

/// The controller rejected a move or a set-operation. Recoverable; the caller
/// may retry with a new command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("transport failure while sending command")]
    Transport(#[from] std::io::Error),

    /// Non-zero controller error register after a command. Common codes:
    /// 5 = servo off, 7 = target out of travel range.
    #[error("controller rejected command (error code {code})")]
    Rejected { code: i32 },

    #[error("could not confirm command: {0}")]
    Confirm(#[source] QueryError),
}

/// A read from the controller failed. Recoverable for ad-hoc queries; during
/// completion polling it is terminal for that move.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("transport failure while reading reply")]
    Transport(#[from] std::io::Error),

    #[error("malformed controller reply: {0}")]
    Malformed(String),
}

/// Failure during a move's lifecycle, from submission through completion.
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("move command failed: {0}")]
    Command(#[from] CommandError),

    #[error("status query failed while waiting for completion: {0}")]
    Query(#[from] QueryError),

    #[error("move did not complete within {0:?}")]
    Timeout(Duration),

    #[error("completion wait abandoned by caller")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_errors_surface_through_wrappers() {
        let cmd: CommandError = ConnectError::NotConnected.into();
        assert_eq!(cmd.to_string(), "no active controller session");

        let query: QueryError = ConnectError::NotConnected.into();
        assert_eq!(query.to_string(), "no active controller session");
    }

    #[test]
    fn motion_error_preserves_cause_detail() {
        let motion: MotionError = CommandError::Rejected { code: 7 }.into();
        assert!(motion.to_string().contains("error code 7"));

        let motion = MotionError::Timeout(Duration::from_secs(60));
        assert!(motion.to_string().contains("60s"));
    }
}
