//! Aegis RRD Time Layer
//!
//! One precision tier of the round-robin database. A layer owns the bucket
//! arithmetic for its precision, the running mean of the bucket currently
//! open, and the read path over its circular array of slots. The slots
//! themselves live in the store's backing buffer; the layer only records
//! which byte range it was assigned and is handed that region on every call.
//!
//! Key Features:
//! - Deterministic bucket addressing: `floor(t / precision) mod capacity`
//! - Incremental mean that never revisits past samples
//! - Gap marking when the clock skips whole buckets
//! - Wraparound-safe range reads that report overwritten buckets as gaps
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::config::LayerSpec;
use crate::slot::{Slot, SLOT_WIDTH};
use crate::snapshot::LayerSnapshot;
use crate::types::{Point, Timestamp};
use aegis_rrd_common::utils::format_duration;
use aegis_rrd_common::{Result, RrdError};
use std::ops::Range;

// =============================================================================
// Open Bucket
// =============================================================================

/// Accumulator for the one mutable bucket of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenBucket {
    bucket: u64,
    mean: f64,
    count: u64,
}

impl OpenBucket {
    fn new(bucket: u64) -> Self {
        Self {
            bucket,
            mean: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, value: f64) {
        self.mean += (value - self.mean) / (self.count + 1) as f64;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

// =============================================================================
// Write Outcome
// =============================================================================

/// A bucket that closed during a write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sealed {
    /// Start of the sealed bucket, `bucket * precision`.
    pub timestamp: Timestamp,
    /// Final mean, NaN if no sample contributed.
    pub value: f64,
}

/// What a single write did to a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteOutcome {
    /// The sample landed in the open bucket.
    Accumulated,
    /// The sample opened a new bucket and the previous one was sealed.
    Sealed(Sealed),
    /// The sample was older than the open bucket and was discarded.
    Dropped,
}

// =============================================================================
// Time Layer
// =============================================================================

/// A single precision tier backed by a fixed region of the store buffer.
#[derive(Debug, Clone)]
pub struct TimeLayer {
    precision: u64,
    capacity: usize,
    region: Range<usize>,
    open: Option<OpenBucket>,
    /// Oldest bucket a restored layer accepts before its first write.
    floor: Option<u64>,
}

impl TimeLayer {
    /// Create a layer with no region assigned yet.
    pub fn new(precision_secs: u64, capacity: usize) -> Result<Self> {
        if precision_secs == 0 {
            return Err(RrdError::InvalidLayer(
                "precision must be at least one second".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(RrdError::InvalidLayer(
                "capacity must be at least one bucket".to_string(),
            ));
        }
        if capacity.checked_mul(SLOT_WIDTH).is_none() {
            return Err(RrdError::InvalidLayer(format!(
                "capacity {} overflows the buffer size",
                capacity
            )));
        }

        Ok(Self {
            precision: precision_secs,
            capacity,
            region: 0..0,
            open: None,
            floor: None,
        })
    }

    pub fn from_spec(spec: &LayerSpec) -> Result<Self> {
        Self::new(spec.precision_secs, spec.capacity)
    }

    /// Rebuild a layer's shape from a snapshot record.
    pub fn from_snapshot(snapshot: &LayerSnapshot) -> Result<Self> {
        let capacity = usize::try_from(snapshot.capacity).map_err(|_| {
            RrdError::Corruption(format!(
                "layer capacity {} does not fit in memory",
                snapshot.capacity
            ))
        })?;
        let layer = Self::new(snapshot.precision, capacity)?;

        if snapshot.data.len() != layer.byte_size() {
            return Err(RrdError::BufferSize {
                expected: layer.byte_size(),
                actual: snapshot.data.len(),
            });
        }

        Ok(layer)
    }

    // -------------------------------------------------------------------------
    // Shape
    // -------------------------------------------------------------------------

    pub fn precision(&self) -> u64 {
        self.precision
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total retained duration, `precision * capacity`.
    pub fn span(&self) -> u64 {
        self.precision.saturating_mul(self.capacity as u64)
    }

    /// Bytes this layer occupies in the backing buffer.
    pub fn byte_size(&self) -> usize {
        self.capacity * SLOT_WIDTH
    }

    /// Byte range of the backing buffer assigned to this layer.
    pub fn region(&self) -> Range<usize> {
        self.region.clone()
    }

    pub(crate) fn assign_region(&mut self, offset: usize) -> usize {
        let end = offset + self.byte_size();
        self.region = offset..end;
        end
    }

    /// Whether this layer retains enough history to answer a range of
    /// `distance` seconds.
    pub fn covered(&self, distance: u64) -> bool {
        self.span() >= distance
    }

    /// Bucket number containing `timestamp`.
    pub fn bucket_of(&self, timestamp: Timestamp) -> u64 {
        timestamp / self.precision
    }

    /// Slot index for a bucket number.
    pub fn index_of(&self, bucket: u64) -> usize {
        (bucket % self.capacity as u64) as usize
    }

    pub fn open_bucket_start(&self) -> Option<u64> {
        self.open.map(|open| open.bucket)
    }

    pub fn open_bucket_index(&self) -> Option<usize> {
        self.open.map(|open| self.index_of(open.bucket))
    }

    /// Bucket restored from a snapshot below which writes are dropped.
    pub fn write_floor(&self) -> Option<u64> {
        self.floor
    }

    /// Running mean and sample count of the open bucket.
    pub fn open_accumulator(&self) -> Option<(f64, u64)> {
        self.open.map(|open| (open.mean, open.count))
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    /// Accumulate one sample into the layer.
    ///
    /// A NaN `value` carries no data but still moves the open bucket forward,
    /// which is how gaps propagate from a finer layer. The open bucket's mean
    /// is written through to its slot on every sample, so a sealed bucket's
    /// final value is already in place when it closes.
    pub fn write(&mut self, region: &mut [u8], timestamp: Timestamp, value: f64) -> WriteOutcome {
        debug_assert_eq!(region.len(), self.byte_size());

        let bucket = self.bucket_of(timestamp);
        let mut outcome = WriteOutcome::Accumulated;

        let newest = self.open.map(|open| open.bucket).or(self.floor);
        if let Some(newest) = newest.filter(|newest| bucket < *newest) {
            tracing::trace!(
                "Dropping sample at {} older than bucket {} of {} layer",
                timestamp,
                newest,
                format_duration(self.precision)
            );
            return WriteOutcome::Dropped;
        }

        match self.open {
            Some(open) if bucket > open.bucket => {
                self.store(region, open.bucket, open.value());
                self.mark_skipped(region, open.bucket, bucket);
                self.open_new(region, bucket);
                outcome = WriteOutcome::Sealed(Sealed {
                    timestamp: open.bucket * self.precision,
                    value: open.value().unwrap_or(f64::NAN),
                });
            }
            Some(_) => {}
            None => self.open_new(region, bucket),
        }

        if !value.is_nan() {
            let current = {
                let open = self.open.get_or_insert_with(|| OpenBucket::new(bucket));
                open.add(value);
                open.value()
            };
            self.store(region, bucket, current);
        }

        outcome
    }

    fn open_new(&mut self, region: &mut [u8], bucket: u64) {
        self.open = Some(OpenBucket::new(bucket));
        self.store(region, bucket, None);
    }

    /// Mark buckets strictly between `from` and `to` as missing. Only the
    /// most recent `capacity - 1` of them can still be addressed.
    fn mark_skipped(&self, region: &mut [u8], from: u64, to: u64) {
        let reachable = (self.capacity as u64).saturating_sub(1);
        let first = (from + 1).max(to.saturating_sub(reachable));
        for bucket in first..to {
            self.store(region, bucket, None);
        }
    }

    fn store(&self, region: &mut [u8], bucket: u64, value: Option<f64>) {
        Slot::new(bucket, value).write(region, self.index_of(bucket));
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Lazily iterate the buckets overlapping `[start, end)`.
    ///
    /// At most `capacity` buckets are produced; if the range is wider the
    /// oldest buckets are skipped since their slots have been reused.
    pub fn range_iter<'a>(
        &self,
        region: &'a [u8],
        start: Timestamp,
        end: Timestamp,
    ) -> RangeIter<'a> {
        debug_assert_eq!(region.len(), self.byte_size());

        let first = self.bucket_of(start);
        let last = end / self.precision + u64::from(end % self.precision != 0);
        let first = first.max(last.saturating_sub(self.capacity as u64));

        RangeIter {
            region,
            precision: self.precision,
            capacity: self.capacity,
            next: first,
            end: last.max(first),
        }
    }

    /// Materialize the buckets overlapping `[start, end)`.
    pub fn read_range(&self, region: &[u8], start: Timestamp, end: Timestamp) -> Vec<Point> {
        self.range_iter(region, start, end).collect()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn to_snapshot(&self, region: &[u8]) -> LayerSnapshot {
        LayerSnapshot {
            precision: self.precision,
            capacity: self.capacity as u64,
            data: region.to_vec(),
        }
    }

    /// Copy a snapshot's slots into this layer's region. The open bucket is
    /// not part of a snapshot, so the next write starts a fresh accumulator;
    /// writes older than the newest restored bucket are dropped.
    pub fn restore(&mut self, region: &mut [u8], snapshot: &LayerSnapshot) -> Result<()> {
        if snapshot.precision != self.precision || snapshot.capacity != self.capacity as u64 {
            return Err(RrdError::Snapshot(format!(
                "snapshot layer {}x{} does not match {}x{}",
                snapshot.precision, snapshot.capacity, self.precision, self.capacity
            )));
        }
        if snapshot.data.len() != region.len() {
            return Err(RrdError::BufferSize {
                expected: region.len(),
                actual: snapshot.data.len(),
            });
        }

        region.copy_from_slice(&snapshot.data);
        self.open = None;
        self.floor = (0..self.capacity)
            .filter_map(|index| Slot::read(region, index).bucket())
            .max();
        Ok(())
    }
}

// =============================================================================
// Range Iterator
// =============================================================================

/// Iterator over a contiguous run of buckets in one layer.
#[derive(Debug, Clone)]
pub struct RangeIter<'a> {
    region: &'a [u8],
    precision: u64,
    capacity: usize,
    next: u64,
    end: u64,
}

impl Iterator for RangeIter<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.next >= self.end {
            return None;
        }

        let bucket = self.next;
        self.next += 1;

        let index = (bucket % self.capacity as u64) as usize;
        let slot = Slot::read(self.region, index);
        Some(Point {
            timestamp: bucket * self.precision,
            value: slot.value_for(bucket),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RangeIter<'_> {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(precision: u64, capacity: usize) -> (TimeLayer, Vec<u8>) {
        let mut layer = TimeLayer::new(precision, capacity).expect("valid layer");
        layer.assign_region(0);
        let region = vec![0u8; layer.byte_size()];
        (layer, region)
    }

    fn values(points: &[Point]) -> Vec<Option<f64>> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn test_new_layer() {
        let (layer, region) = layer(15, 4);
        assert_eq!(layer.span(), 60);
        assert_eq!(layer.byte_size(), 4 * SLOT_WIDTH);
        assert_eq!(region.len(), layer.byte_size());
        assert_eq!(layer.open_bucket_start(), None);

        assert!(TimeLayer::new(0, 4).is_err());
        assert!(TimeLayer::new(15, 0).is_err());
    }

    #[test]
    fn test_same_bucket_accumulates() {
        let (mut layer, mut region) = layer(15, 4);

        assert_eq!(layer.write(&mut region, 16, 10.0), WriteOutcome::Accumulated);
        assert_eq!(layer.write(&mut region, 29, 20.0), WriteOutcome::Accumulated);
        assert_eq!(layer.write(&mut region, 20, 60.0), WriteOutcome::Accumulated);

        assert_eq!(layer.open_bucket_start(), Some(1));
        assert_eq!(layer.open_bucket_index(), Some(1));
        let (mean, count) = layer.open_accumulator().expect("open bucket");
        assert!((mean - 30.0).abs() < 1e-9);
        assert_eq!(count, 3);

        let points = layer.read_range(&region, 15, 30);
        assert_eq!(points, vec![Point::new(15, 30.0)]);
    }

    #[test]
    fn test_seal_reports_previous_bucket() {
        let (mut layer, mut region) = layer(15, 4);

        layer.write(&mut region, 0, 10.0);
        layer.write(&mut region, 5, 20.0);
        let outcome = layer.write(&mut region, 15, 1.0);

        assert_eq!(
            outcome,
            WriteOutcome::Sealed(Sealed {
                timestamp: 0,
                value: 15.0
            })
        );
    }

    #[test]
    fn test_wraparound_overwrites_oldest() {
        let (mut layer, mut region) = layer(15, 4);

        for (i, value) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
            layer.write(&mut region, i as u64 * 15, *value);
        }
        assert_eq!(
            layer.read_range(&region, 0, 60),
            vec![
                Point::new(0, 10.0),
                Point::new(15, 20.0),
                Point::new(30, 30.0),
                Point::new(45, 40.0),
            ]
        );

        layer.write(&mut region, 60, 50.0);
        assert_eq!(layer.open_bucket_index(), Some(0));
        assert_eq!(
            layer.read_range(&region, 15, 75),
            vec![
                Point::new(15, 20.0),
                Point::new(30, 30.0),
                Point::new(45, 40.0),
                Point::new(60, 50.0),
            ]
        );

        // bucket 0 now lives under bucket 4's stamp
        assert_eq!(layer.read_range(&region, 0, 15), vec![Point::gap(0)]);
    }

    #[test]
    fn test_skipped_buckets_are_gaps() {
        let (mut layer, mut region) = layer(10, 16);

        layer.write(&mut region, 100, 1.0);
        layer.write(&mut region, 200, 2.0);

        let points = layer.read_range(&region, 100, 210);
        assert_eq!(points.len(), 11);
        assert_eq!(points[0], Point::new(100, 1.0));
        assert!(points[1..10].iter().all(Point::is_gap));
        assert_eq!(points[10], Point::new(200, 2.0));
    }

    #[test]
    fn test_skipped_buckets_clear_stale_values() {
        let (mut layer, mut region) = layer(10, 4);

        for t in (0..40).step_by(10) {
            layer.write(&mut region, t, 7.0);
        }
        // jump far ahead; every slot either gets the gap marker or the new value
        layer.write(&mut region, 1_000, 9.0);

        for index in 0..4 {
            let slot = Slot::read(&region, index);
            assert!(slot.bucket().expect("slot stamped") >= 97);
        }
        assert_eq!(
            values(&layer.read_range(&region, 970, 1_010)),
            vec![None, None, None, Some(9.0)]
        );
    }

    #[test]
    fn test_late_sample_dropped() {
        let (mut layer, mut region) = layer(10, 4);

        layer.write(&mut region, 30, 3.0);
        assert_eq!(layer.write(&mut region, 5, 100.0), WriteOutcome::Dropped);
        assert_eq!(layer.read_range(&region, 0, 40)[0], Point::gap(0));
        assert_eq!(layer.read_range(&region, 30, 40), vec![Point::new(30, 3.0)]);
    }

    #[test]
    fn test_nan_sample_advances_without_data() {
        let (mut layer, mut region) = layer(60, 4);

        layer.write(&mut region, 0, 4.0);
        let outcome = layer.write(&mut region, 60, f64::NAN);
        assert!(matches!(outcome, WriteOutcome::Sealed(s) if s.value == 4.0));
        assert_eq!(layer.open_bucket_start(), Some(1));

        // a bucket with only NaN input seals as NaN
        match layer.write(&mut region, 120, 1.0) {
            WriteOutcome::Sealed(sealed) => {
                assert_eq!(sealed.timestamp, 60);
                assert!(sealed.value.is_nan());
            }
            other => panic!("expected seal, got {:?}", other),
        }
        assert_eq!(
            values(&layer.read_range(&region, 0, 180)),
            vec![Some(4.0), None, Some(1.0)]
        );
    }

    #[test]
    fn test_range_wraps_array_end() {
        let (mut layer, mut region) = layer(1, 5);

        for t in 0..8 {
            layer.write(&mut region, t, t as f64);
        }
        // buckets 4..8 map to indices 4,0,1,2
        let points = layer.read_range(&region, 4, 8);
        assert_eq!(values(&points), vec![Some(4.0), Some(5.0), Some(6.0), Some(7.0)]);
    }

    #[test]
    fn test_range_bounded_by_capacity() {
        let (mut layer, mut region) = layer(10, 3);

        for t in (0..100).step_by(10) {
            layer.write(&mut region, t, t as f64);
        }

        let iter = layer.range_iter(&region, 0, 100);
        assert_eq!(iter.len(), 3);
        let restarted: Vec<Point> = iter.clone().collect();
        assert_eq!(restarted, iter.collect::<Vec<_>>());
        assert_eq!(
            restarted.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![70, 80, 90]
        );
    }

    #[test]
    fn test_empty_and_inverted_ranges() {
        let (layer, region) = layer(10, 3);
        assert!(layer.read_range(&region, 50, 50).is_empty());
        assert!(layer.read_range(&region, 50, 10).is_empty());
        assert_eq!(
            layer.read_range(&region, 0, 30),
            vec![Point::gap(0), Point::gap(10), Point::gap(20)]
        );
    }

    #[test]
    fn test_covered() {
        let (layer, _) = layer(60, 60);
        assert!(layer.covered(3_600));
        assert!(layer.covered(10));
        assert!(!layer.covered(3_601));
    }

    #[test]
    fn test_snapshot_restore() {
        let (mut layer, mut region) = layer(15, 4);
        layer.write(&mut region, 0, 1.0);
        layer.write(&mut region, 15, 2.0);

        let snapshot = layer.to_snapshot(&region);
        assert_eq!(snapshot.precision, 15);
        assert_eq!(snapshot.capacity, 4);

        let mut restored = TimeLayer::from_snapshot(&snapshot).expect("valid snapshot");
        restored.assign_region(0);
        let mut restored_region = vec![0u8; restored.byte_size()];
        restored
            .restore(&mut restored_region, &snapshot)
            .expect("restore should succeed");

        assert_eq!(restored_region, region);
        assert_eq!(restored.open_bucket_start(), None);
        assert_eq!(
            restored.read_range(&restored_region, 0, 30),
            layer.read_range(&region, 0, 30)
        );
    }

    #[test]
    fn test_restored_layer_drops_older_buckets() {
        let (mut layer, mut region) = layer(15, 4);
        for bucket in 0..6u64 {
            layer.write(&mut region, bucket * 15, bucket as f64);
        }
        let snapshot = layer.to_snapshot(&region);

        let (mut restored, mut restored_region) = self::layer(15, 4);
        restored
            .restore(&mut restored_region, &snapshot)
            .expect("restore should succeed");
        assert_eq!(restored.write_floor(), Some(5));

        // bucket 1 shares slot 1 with bucket 5
        assert_eq!(restored.write(&mut restored_region, 15, 99.0), WriteOutcome::Dropped);
        assert_eq!(
            restored.read_range(&restored_region, 30, 90),
            vec![
                Point::new(30, 2.0),
                Point::new(45, 3.0),
                Point::new(60, 4.0),
                Point::new(75, 5.0),
            ]
        );

        assert_eq!(
            restored.write(&mut restored_region, 80, 7.0),
            WriteOutcome::Accumulated
        );
        assert_eq!(restored.read_range(&restored_region, 75, 90), vec![Point::new(75, 7.0)]);
        assert!(matches!(
            restored.write(&mut restored_region, 90, 1.0),
            WriteOutcome::Sealed(Sealed { timestamp: 75, .. })
        ));
    }

    #[test]
    fn test_restore_empty_snapshot_has_no_floor() {
        let (layer, region) = layer(15, 4);
        let snapshot = layer.to_snapshot(&region);

        let (mut restored, mut restored_region) = self::layer(15, 4);
        restored
            .restore(&mut restored_region, &snapshot)
            .expect("restore should succeed");
        assert_eq!(restored.write_floor(), None);
        assert_eq!(
            restored.write(&mut restored_region, 0, 1.0),
            WriteOutcome::Accumulated
        );
    }

    #[test]
    fn test_restore_rejects_shape_mismatch() {
        let (layer, region) = layer(15, 4);
        let snapshot = layer.to_snapshot(&region);

        let (mut other, mut other_region) = self::layer(30, 4);
        assert!(other.restore(&mut other_region, &snapshot).is_err());
    }
}
