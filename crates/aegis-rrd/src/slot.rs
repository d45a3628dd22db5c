//! Aegis RRD Slot Encoding
//!
//! Fixed-width cell layout for one bucket inside a layer's region of the
//! backing buffer.
//!
//! Layout (little-endian, 16 bytes):
//! - stamp: 8 bytes (u64), bucket number + 1; 0 means never written
//! - value: 8 bytes (f64), NaN marks a bucket with no data
//!
//! A zero-filled buffer decodes as all-empty slots.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use bytes::{Buf, BufMut};

pub const SLOT_WIDTH: usize = 16;

// =============================================================================
// Slot
// =============================================================================

/// Decoded contents of one slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    stamp: u64,
    value: f64,
}

impl Slot {
    pub const EMPTY: Slot = Slot {
        stamp: 0,
        value: 0.0,
    };

    /// Slot holding `value` for `bucket`. `None` writes the no-data marker.
    pub fn new(bucket: u64, value: Option<f64>) -> Self {
        Self {
            stamp: bucket.saturating_add(1),
            value: value.unwrap_or(f64::NAN),
        }
    }

    /// Decode the slot at `index` within a layer region.
    pub fn read(region: &[u8], index: usize) -> Self {
        let offset = index * SLOT_WIDTH;
        let mut buf = &region[offset..offset + SLOT_WIDTH];
        Self {
            stamp: buf.get_u64_le(),
            value: buf.get_f64_le(),
        }
    }

    /// Encode this slot at `index` within a layer region.
    pub fn write(&self, region: &mut [u8], index: usize) {
        let offset = index * SLOT_WIDTH;
        let mut buf = &mut region[offset..offset + SLOT_WIDTH];
        buf.put_u64_le(self.stamp);
        buf.put_f64_le(self.value);
    }

    pub fn is_empty(&self) -> bool {
        self.stamp == 0
    }

    /// The bucket this slot was last written for.
    pub fn bucket(&self) -> Option<u64> {
        self.stamp.checked_sub(1)
    }

    /// Value stored for `bucket`, if the slot still belongs to it and holds data.
    pub fn value_for(&self, bucket: u64) -> Option<f64> {
        if self.bucket() == Some(bucket) && !self.value.is_nan() {
            Some(self.value)
        } else {
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
