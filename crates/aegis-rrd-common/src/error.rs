//! Aegis RRD Error - Unified Error Types
//!
//! Error handling for round-robin database operations. Separates failures
//! that happen while validating a layer chain from failures that happen
//! while loading or persisting a snapshot, so callers can decide which are
//! fatal to the hosting process.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all round-robin database operations.
#[derive(Error, Debug)]
pub enum RrdError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    #[error("layer {index} precision {precision}s is not a multiple of {previous}s")]
    MisalignedLayers {
        index: usize,
        precision: u64,
        previous: u64,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    // Snapshot errors
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("flush failed: {0}")]
    FlushFailed(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for round-robin database operations.
pub type Result<T> = std::result::Result<T, RrdError>;

// =============================================================================
// Error Classification
// =============================================================================

impl RrdError {
    /// Returns true if the error was raised while validating configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RrdError::Configuration(_)
                | RrdError::InvalidLayer(_)
                | RrdError::MisalignedLayers { .. }
                | RrdError::BufferSize { .. }
        )
    }

    /// Returns true if the error came from loading or writing a snapshot.
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            RrdError::Corruption(_)
                | RrdError::Snapshot(_)
                | RrdError::Io(_)
                | RrdError::FlushFailed(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = RrdError::MisalignedLayers {
            index: 1,
            precision: 45,
            previous: 30,
        };
        assert!(err.is_configuration_error());
        assert!(!err.is_persistence_error());

        let err = RrdError::Corruption("bad checksum".to_string());
        assert!(err.is_persistence_error());
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RrdError = io.into();
        assert!(matches!(err, RrdError::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }

    #[test]
    fn test_misaligned_message() {
        let err = RrdError::MisalignedLayers {
            index: 2,
            precision: 90,
            previous: 60,
        };
        assert_eq!(
            err.to_string(),
            "layer 2 precision 90s is not a multiple of 60s"
        );
    }
}
