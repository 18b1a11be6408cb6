//! Core types for the SCSP client driver.
//!
//! This crate provides the protocol-independent pieces shared by the driver
//! and anything layered on top of it:
//!
//! - `Value` for bound parameters and decoded cells
//! - `Error` taxonomy (configuration, network, protocol, server, closed)
//! - `ErrorCategory` mapping of server error codes

pub mod category;
pub mod error;
pub mod value;

pub use category::ErrorCategory;
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, ProtocolErrorKind,
    Result, ServerError,
};
pub use value::Value;
