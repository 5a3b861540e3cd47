// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for ReedMap operations.
//!
//! Provides structured error handling with detailed context for debugging.
//! Timeouts on point operations are *not* errors: they are normal results
//! (`TimedOut` variants of the result enums). Errors cover invalid arguments,
//! structural capacity limits, scan timeouts, and invariant violations found
//! by the debug verification harness.

use std::fmt;

/// Standard Result type for all ReedMap operations.
pub type ReedResult<T> = Result<T, ReedError>;

/// Error types for ReedMap operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReedError {
    /// Invalid tree fanout.
    InvalidFanout { fanout: usize, min: usize },

    /// Invalid timeout argument (negative values other than -1).
    InvalidTimeout { timeout_ms: i64 },

    /// A scan could not latch its next subtree within its timeout budget.
    LockTimeout { timeout_ms: i64 },

    /// Tree depth would exceed the supported maximum.
    CapacityExceeded { depth: usize, max: usize },

    /// Structural invariant violated (bug-class, raised by the debug harness).
    InvariantViolation { reason: String },
}

impl fmt::Display for ReedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFanout { fanout, min } => {
                write!(f, "Tree fanout must be >= {}, got {}", min, fanout)
            }
            Self::InvalidTimeout { timeout_ms } => {
                write!(
                    f,
                    "Timeout must be -1 (infinite), 0 (non-blocking) or positive, got {}",
                    timeout_ms
                )
            }
            Self::LockTimeout { timeout_ms } => {
                write!(f, "Scan timed out after {} ms waiting for a subtree", timeout_ms)
            }
            Self::CapacityExceeded { depth, max } => {
                write!(f, "Tree depth {} exceeds supported maximum of {}", depth, max)
            }
            Self::InvariantViolation { reason } => {
                write!(f, "Tree invariant violated: {}", reason)
            }
        }
    }
}

impl std::error::Error for ReedError {}
