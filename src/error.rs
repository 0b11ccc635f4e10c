//! Error types for the gatttool-client crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The external tool could not be found when spawning it.
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// The program that was being spawned.
        tool: String,
    },

    /// The external tool could not be executed due to missing permissions.
    #[error("Permission denied running {tool}")]
    PermissionDenied {
        /// The program that was being spawned.
        tool: String,
    },

    /// The device did not acknowledge the connection in time.
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// The control process reported a failure while connecting.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection was closed while an operation was pending.
    #[error("Connection lost")]
    ConnectionLost,

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// The characteristic was not reported by the device during enumeration.
    #[error("Unknown characteristic: {uuid}")]
    UnknownCharacteristic {
        /// The normalized UUID that was looked up.
        uuid: String,
    },

    /// A characteristic read or write did not complete in time.
    #[error("Operation timed out")]
    OperationTimeout,

    /// Another operation is still pending on this session.
    #[error("Another operation is already in progress")]
    OperationInProgress,

    /// The control process printed an error line.
    #[error("Control process error: {message}")]
    ControlProcessError {
        /// The raw error line.
        message: String,
    },

    /// The control process exited without being asked to.
    #[error("Control process exited unexpectedly (code {code:?})")]
    ProcessExitedUnexpectedly {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// The control process finished with a non-success status.
    #[error("Control process exited with non-zero status (code {code:?})")]
    NonZeroExit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// A hardware address could not be parsed.
    #[error("Invalid device address: {value}")]
    InvalidAddress {
        /// The text that was rejected.
        value: String,
    },

    /// A UUID could not be parsed.
    #[error("Invalid UUID: {value}")]
    InvalidUuid {
        /// The text that was rejected.
        value: String,
    },

    /// Invalid data was received from the device.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Discovery finished without finding a matching device.
    #[error("No device found")]
    DeviceNotFound,

    /// Discovery found more than one device where exactly one was expected.
    #[error("Multiple devices found: {}", addresses.join(" "))]
    MultipleDevices {
        /// The addresses that were found.
        addresses: Vec<String>,
    },

    /// I/O error talking to the control process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout | Self::OperationTimeout)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
