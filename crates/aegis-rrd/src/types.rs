//! Aegis RRD Types
//!
//! Core data types exchanged between the store and its host.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp in whole seconds.
pub type Timestamp = u64;

// =============================================================================
// Point
// =============================================================================

/// One bucket returned by a range read.
///
/// `value` is `None` when the bucket holds no data: nothing was written, the
/// clock skipped over it, or it has already been overwritten by a newer
/// bucket that maps to the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: Timestamp,
    pub value: Option<f64>,
}

impl Point {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }

    /// A bucket with no data.
    pub fn gap(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            value: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.value.is_none()
    }

    /// Bucket start as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.timestamp).ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

impl From<(Timestamp, f64)> for Point {
    fn from((timestamp, value): (Timestamp, f64)) -> Self {
        Self::new(timestamp, value)
    }
}

// =============================================================================
// Tests
// =============================================================================
