//! Error types for SCSP client operations.

use std::fmt;

use crate::category::ErrorCategory;

/// The primary error type for all SCSP client operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed connection string or conflicting options (raised before any I/O)
    Config(ConfigError),
    /// Connect, read, write failures, timeouts and premature EOF
    Connection(ConnectionError),
    /// Malformed frame or a decoder/server mismatch
    Protocol(ProtocolError),
    /// A well-formed error frame sent by the server
    Server(ServerError),
    /// Operation attempted on a connection that is already closed
    Closed,
    /// I/O errors outside of the transport (certificate files, etc.)
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused
    Refused,
    /// DNS resolution failed
    DnsResolution,
    /// Connection lost during operation (EOF, reset, failed write)
    Disconnected,
    /// Socket timeout elapsed during connect, read or write
    Timeout,
    /// TLS negotiation failed
    Ssl,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Frame bytes do not follow the wire grammar
    Malformed,
    /// Row set announced a protocol version other than 1 or 2
    UnsupportedVersion,
    /// Compressed payload could not be inflated to its declared size
    Compression,
    /// Server-driven re-dispatch nested deeper than allowed
    RecursionLimit,
    /// Frame is valid but not acceptable in the current context
    Unexpected,
}

/// An error frame returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Primary error code
    pub code: u32,
    /// Extended error code (0 if absent)
    pub extended_code: u32,
    /// Error message as sent by the server
    pub message: String,
}

impl ServerError {
    pub fn new(code: u32, extended_code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            extended_code,
            message: message.into(),
        }
    }

    /// Map the codes into the error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_codes(self.code, self.extended_code)
    }
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_data: None,
            source: None,
        }
    }
}

impl Error {
    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a malformed-frame protocol error from a message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError::new(ProtocolErrorKind::Malformed, message))
    }

    /// Is this a network error that leaves the connection dead?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Is this an error frame sent by the server?
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Taxonomy category of a server error, if this is one.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Error::Server(e) => Some(e.category()),
            _ => None,
        }
    }

    /// Primary and extended server error codes, if this is a server error.
    pub fn codes(&self) -> Option<(u32, u32)> {
        match self {
            Error::Server(e) => Some((e.code, e.extended_code)),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(f, "{}: {}", e.category(), e),
            Error::Closed => write!(f, "Connection is closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended_code != 0 {
            write!(
                f,
                "{} (code {}, extended {})",
                self.message, self.code, self.extended_code
            )
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

/// Result type alias for SCSP operations.
pub type Result<T> = std::result::Result<T, Error>;
