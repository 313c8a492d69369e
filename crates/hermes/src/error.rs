// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by hermes receiver and transmitter operations.
//!
//! Only resource acquisition and lifecycle misuse surface as errors.
//! Per-message anomalies (duplicates, gaps, ring overruns) are absorbed by
//! the delivery path and show up in [`ReceiverStats`](crate::ReceiverStats)
//! instead.

/// Errors returned by hermes operations.
///
/// # Example
///
/// ```rust,no_run
/// use hermes::{Error, IntraReceiver, RoleAttributes};
///
/// let receiver = IntraReceiver::new(RoleAttributes::local("chatter"), |_, _| {})?;
/// match receiver.enable() {
///     Err(Error::TransportUnavailable(why)) => println!("retry later: {}", why),
///     Err(e) => println!("other error: {}", e),
///     Ok(()) => println!("receiving"),
/// }
/// # Ok::<(), hermes::Error>(())
/// ```
#[derive(Debug)]
pub enum Error {
    /// A backend could not acquire the resources it needs to deliver
    /// (missing or invalid shared-memory segment, socket bind failure).
    ///
    /// Recoverable: calling `enable()` again later may succeed.
    TransportUnavailable(String),
    /// Operation invoked in an illegal lifecycle state (e.g. changing the
    /// history depth of an enabled receiver).
    InvalidState(String),
    /// Endpoint or QoS configuration is invalid (empty channel name, zero depth).
    InvalidConfig(String),
    /// Payload does not fit the transport's frame or slot.
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest payload the transport accepts.
        capacity: usize,
    },
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TransportUnavailable(msg) => write!(f, "Transport unavailable: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::PayloadTooLarge { size, capacity } => write!(
                f,
                "Payload too large: {} bytes exceeds capacity {}",
                size, capacity
            ),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_messages() {
        let e = Error::TransportUnavailable("segment missing".into());
        assert_eq!(e.to_string(), "Transport unavailable: segment missing");

        let e = Error::PayloadTooLarge {
            size: 5000,
            capacity: 4096,
        };
        assert_eq!(
            e.to_string(),
            "Payload too large: 5000 bytes exceeds capacity 4096"
        );
    }

    #[test]
    fn test_io_error_source() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy").into();
        assert!(e.source().is_some());
        assert!(Error::InvalidState("x".into()).source().is_none());
    }
}
