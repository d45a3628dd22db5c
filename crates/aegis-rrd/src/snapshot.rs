//! Aegis RRD Snapshot - Durable Store Image
//!
//! Flat binary image of every layer in a store. A snapshot is always written
//! whole and read whole; any defect in the image rejects the entire snapshot.
//!
//! Binary format (little-endian):
//! - header: magic "RRDB" (4) | version u16 | layer_count u32 | created_at millis i64
//! - per layer: precision u64 | capacity u64 | data_len u64 | data | crc32 u32
//!
//! The CRC covers the layer record from `precision` through the end of `data`.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::config::{validate_layers, LayerSpec};
use crate::slot::SLOT_WIDTH;
use aegis_rrd_common::{Result, RrdError};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::path::Path;

// =============================================================================
// Constants
// =============================================================================

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"RRDB";
pub const SNAPSHOT_VERSION: u16 = 1;
/// magic(4) + version(2) + layer_count(4) + created_at(8) = 18
pub const SNAPSHOT_HEADER_SIZE: usize = 18;
/// precision(8) + capacity(8) + data_len(8) = 24
const LAYER_HEADER_SIZE: usize = 24;

// =============================================================================
// Layer Snapshot
// =============================================================================

/// Persisted form of one layer: its shape plus its raw slot bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSnapshot {
    pub precision: u64,
    pub capacity: u64,
    pub data: Vec<u8>,
}

impl LayerSnapshot {
    pub fn spec(&self) -> Result<LayerSpec> {
        let capacity = usize::try_from(self.capacity).map_err(|_| {
            RrdError::Corruption(format!("layer capacity {} too large", self.capacity))
        })?;
        Ok(LayerSpec::new(self.precision, capacity))
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u64_le(self.precision);
        buf.put_u64_le(self.capacity);
        buf.put_u64_le(self.data.len() as u64);
        buf.put_slice(&self.data);

        let checksum = crc32fast::hash(&buf[start..]);
        buf.put_u32_le(checksum);
    }
}

// =============================================================================
// Store Snapshot
// =============================================================================

/// Ordered per-layer records, finest layer first.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub created_at: DateTime<Utc>,
    pub layers: Vec<LayerSnapshot>,
}

impl StoreSnapshot {
    pub fn new(layers: Vec<LayerSnapshot>) -> Self {
        Self {
            created_at: Utc::now(),
            layers,
        }
    }

    /// Layer shapes recorded in this snapshot.
    pub fn specs(&self) -> Result<Vec<LayerSpec>> {
        self.layers.iter().map(LayerSnapshot::spec).collect()
    }

    /// Total bytes of slot data across all layers.
    pub fn data_size(&self) -> usize {
        self.layers.iter().map(|l| l.data.len()).sum()
    }

    /// Serialize to the binary snapshot format.
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self
            .layers
            .iter()
            .map(|l| LAYER_HEADER_SIZE + l.data.len() + 4)
            .sum();
        let mut buf = BytesMut::with_capacity(SNAPSHOT_HEADER_SIZE + body);

        buf.put_slice(SNAPSHOT_MAGIC);
        buf.put_u16_le(SNAPSHOT_VERSION);
        buf.put_u32_le(self.layers.len() as u32);
        buf.put_i64_le(self.created_at.timestamp_millis());

        for layer in &self.layers {
            layer.encode_into(&mut buf);
        }

        buf.to_vec()
    }

    /// Parse and fully validate a binary snapshot.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SNAPSHOT_HEADER_SIZE {
            return Err(RrdError::Corruption("snapshot header truncated".to_string()));
        }

        let mut buf = data;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != SNAPSHOT_MAGIC {
            return Err(RrdError::Corruption("bad snapshot magic".to_string()));
        }

        let version = buf.get_u16_le();
        if version != SNAPSHOT_VERSION {
            return Err(RrdError::Snapshot(format!(
                "unsupported snapshot version {}",
                version
            )));
        }

        let layer_count = buf.get_u32_le() as usize;
        let created_millis = buf.get_i64_le();
        let created_at = DateTime::from_timestamp_millis(created_millis).ok_or_else(|| {
            RrdError::Corruption(format!("invalid snapshot timestamp {}", created_millis))
        })?;

        if layer_count == 0 {
            return Err(RrdError::Snapshot("snapshot has no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(layer_count.min(64));
        for index in 0..layer_count {
            let record_start = data.len() - buf.remaining();

            if buf.remaining() < LAYER_HEADER_SIZE {
                return Err(RrdError::Corruption(format!(
                    "layer {} header truncated",
                    index
                )));
            }

            let precision = buf.get_u64_le();
            let capacity = buf.get_u64_le();
            let data_len = usize::try_from(buf.get_u64_le()).map_err(|_| {
                RrdError::Corruption(format!("layer {} data length too large", index))
            })?;

            if buf.remaining() < data_len.saturating_add(4) {
                return Err(RrdError::Corruption(format!(
                    "layer {} data truncated",
                    index
                )));
            }

            let expected_len = capacity.checked_mul(SLOT_WIDTH as u64);
            if expected_len != Some(data_len as u64) {
                return Err(RrdError::Corruption(format!(
                    "layer {} holds {} bytes for {} slots",
                    index, data_len, capacity
                )));
            }

            let layer_data = buf[..data_len].to_vec();
            buf.advance(data_len);

            let record_end = data.len() - buf.remaining();
            let stored_checksum = buf.get_u32_le();
            if crc32fast::hash(&data[record_start..record_end]) != stored_checksum {
                return Err(RrdError::Corruption(format!(
                    "layer {} checksum mismatch",
                    index
                )));
            }

            layers.push(LayerSnapshot {
                precision,
                capacity,
                data: layer_data,
            });
        }

        if buf.has_remaining() {
            return Err(RrdError::Corruption(format!(
                "{} trailing bytes after last layer",
                buf.remaining()
            )));
        }

        let snapshot = Self { created_at, layers };
        validate_layers(&snapshot.specs()?)?;
        Ok(snapshot)
    }

    /// Read and decode a snapshot file.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::decode(&data)
    }

    /// Encode and write a snapshot file, returning the bytes written. The
    /// write is not atomic.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<usize> {
        let data = self.encode();
        std::fs::write(path.as_ref(), &data)?;
        Ok(data.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
