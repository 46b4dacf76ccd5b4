// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every nlbus component.

use thiserror::Error;

/// Errors produced by the messaging core.
///
/// I/O errors are flattened to their message so the enum stays `Clone` and
/// comparable in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NlError {
    /// The transport could not be created or registered at startup.
    #[error("transport creation failed: {0}")]
    TransportCreation(String),

    /// An outbound frame buffer could not be obtained.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Payload exceeds the configured maximum.
    #[error("frame too large: {len} bytes payload (max {max})")]
    FrameTooLarge {
        /// Payload length that was requested.
        len: usize,
        /// Configured maximum payload length.
        max: usize,
    },

    /// Declared frame length is inconsistent with the buffer.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An attribute record has an inconsistent length or offset.
    #[error("malformed attributes at offset {offset}: {reason}")]
    MalformedAttributes {
        /// Offset of the offending record inside the container.
        offset: usize,
        /// Human readable reason.
        reason: String,
    },

    /// Multicast group id outside the supported range.
    #[error("invalid group id: {0} (must be < 32)")]
    InvalidGroup(u32),

    /// Unicast destination is not a live endpoint.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(u32),

    /// Transport-level I/O error (message only).
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),
}

impl NlError {
    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }

    pub(crate) fn attrs(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedAttributes {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether a caller may drop the current message and carry on.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::Allocation(_)
                | Self::FrameTooLarge { .. }
                | Self::MalformedFrame(_)
                | Self::MalformedAttributes { .. }
                | Self::UnknownEndpoint(_)
        )
    }
}

impl From<std::io::Error> for NlError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for NlError {
    fn from(e: std::collections::TryReserveError) -> Self {
        Self::Allocation(e.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NlError>;
