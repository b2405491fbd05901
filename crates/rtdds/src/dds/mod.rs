// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type and QoS policies.
//!
//! The user-facing DDS entity API (publishers, subscribers, typed topics)
//! lives outside this crate; what discovery needs from the DDS layer is the
//! error vocabulary and the QoS policies it matches on.

/// QoS policy definitions and compatibility helpers.
pub mod qos;

pub use qos::{
    Deadline, Durability, EndpointQos, History, Liveliness, LivelinessKind, Ownership, Partition,
    Reliability,
};

/// Errors returned by RTDDS operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Generic configuration error (prefer specific variants below).
    Config,
    /// Domain ID out of range (0-232).
    InvalidDomainId(u32),
    /// QoS policy is invalid (e.g., zero announcement period with finite lease).
    InvalidQos(String),

    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// A required built-in endpoint could not be created.
    ///
    /// Creation is all-or-nothing per subsystem: siblings already allocated
    /// are destroyed and participant initialization aborts.
    EndpointCreation(String),
    /// Invalid state for the requested operation.
    InvalidState(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Failed to dispatch a metatraffic message.
    SendFailed(String),
    /// I/O error with underlying cause (persistence, sockets).
    IoError(std::io::Error),

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// ParameterList encoding failed.
    SerializationError,
    /// Payload exceeds the built-in history payload cap.
    BufferTooSmall,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Resource limit exceeded (history caches, proxy tables).
    ResourceLimitExceeded(String),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Requested participant not found in the proxy store.
    ParticipantNotFound,
    /// Security plugin declined a discovered endpoint.
    SecurityRejection(String),
    /// Requested feature or operation is not supported.
    Unsupported,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::Config => write!(f, "Configuration error"),
            Error::InvalidDomainId(id) => write!(f, "Invalid domain_id: {} (must be 0-232)", id),
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            // Initialization
            Error::EndpointCreation(msg) => write!(f, "Built-in endpoint creation failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            // Transport
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            // Data
            Error::SerializationError => write!(f, "ParameterList serialization failed"),
            Error::BufferTooSmall => write!(f, "Buffer too small for encoding"),
            // Resource
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            // Other
            Error::ParticipantNotFound => write!(f, "Participant not found"),
            Error::SecurityRejection(msg) => write!(f, "Security rejection: {}", msg),
            Error::Unsupported => write!(f, "Unsupported operation"),
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

/// Result alias used throughout RTDDS.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_variants() {
        assert_eq!(
            format!("{}", Error::InvalidDomainId(999)),
            "Invalid domain_id: 999 (must be 0-232)"
        );
        assert_eq!(
            format!("{}", Error::EndpointCreation("WLP writer".into())),
            "Built-in endpoint creation failed: WLP writer"
        );
        assert_eq!(
            format!("{}", Error::SecurityRejection("no permissions".into())),
            "Security rejection: no permissions"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
