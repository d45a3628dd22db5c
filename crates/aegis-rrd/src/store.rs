//! Aegis RRD Layered Store
//!
//! Coordinates a chain of time layers that share one contiguous backing
//! buffer. Writes enter the finest layer and cascade sealed buckets into
//! coarser ones; reads are answered by the coarsest layer whose retained
//! span still covers the requested range.
//!
//! Key Features:
//! - Fixed memory: buffer size is decided at construction and never grows
//! - Iterative cascade, one pass over the layer chain per write
//! - Snapshot reload with silent fallback to the configured layers
//! - Debounced flush state owned by the store
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::config::{LayerSpec, StoreConfig};
use crate::layer::{TimeLayer, WriteOutcome};
use crate::scheduler::FlushScheduler;
use crate::snapshot::StoreSnapshot;
use crate::types::{Point, Timestamp};
use aegis_rrd_common::utils::format_size;
use aegis_rrd_common::{Result, RrdError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// =============================================================================
// Store Statistics
// =============================================================================

/// Counters for a single store.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub samples_written: u64,
    pub late_samples_dropped: u64,
    pub buckets_sealed: u64,
    pub flushes: u64,
    pub bytes_flushed: u64,
    pub last_flush: Option<DateTime<Utc>>,
}

// =============================================================================
// Flush Job
// =============================================================================

/// An encoded snapshot bound for the configured destination.
#[derive(Debug)]
pub struct FlushJob {
    path: PathBuf,
    data: Vec<u8>,
}

impl FlushJob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, returning the number of bytes written.
    pub fn execute(self) -> Result<usize> {
        std::fs::write(&self.path, &self.data).map_err(|e| {
            RrdError::FlushFailed(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(self.data.len())
    }
}

// =============================================================================
// Layered Store
// =============================================================================

/// Multi-resolution round-robin store.
pub struct LayeredStore {
    layers: Vec<TimeLayer>,
    buffer: Vec<u8>,
    xff: f64,
    persist_path: Option<PathBuf>,
    scheduler: FlushScheduler,
    stats: StoreStats,
}

impl LayeredStore {
    /// Create a store with the default three-tier layout and no persistence.
    pub fn new() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    /// Create a store from configuration.
    ///
    /// If `persist_path` names a readable, valid snapshot, the layers are
    /// rebuilt from it and the configured layers are ignored. Any failure to
    /// load the snapshot falls back to the configured layers without
    /// surfacing the error. An invalid configuration is always an error.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(path) = config.persist_path.clone() {
            match StoreSnapshot::read_from(&path) {
                Ok(snapshot) => return Self::from_snapshot(snapshot, config),
                Err(RrdError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!(
                        "No snapshot at {}, starting with configured layers",
                        path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Discarding unreadable snapshot at {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        let specs = config.resolved_layers();
        let mut layers = Self::compose(&specs)?;
        let size = Self::assign_regions(&mut layers);
        let buffer = match config.initial_buffer {
            Some(buffer) => buffer,
            None => vec![0u8; size],
        };

        tracing::info!(
            "Opened round-robin store with {} layers ({})",
            layers.len(),
            format_size(size as u64)
        );

        Ok(Self {
            layers,
            buffer,
            xff: config.xff,
            scheduler: FlushScheduler::new(config.flush_delay),
            persist_path: config.persist_path,
            stats: StoreStats::default(),
        })
    }

    /// Rebuild a store entirely from a snapshot. Layer shapes come from the
    /// snapshot; the remaining options come from `config`.
    pub fn from_snapshot(snapshot: StoreSnapshot, config: StoreConfig) -> Result<Self> {
        let specs = snapshot.specs()?;
        let mut layers = Self::compose(&specs)?;
        let size = Self::assign_regions(&mut layers);
        let mut buffer = vec![0u8; size];

        for (layer, record) in layers.iter_mut().zip(&snapshot.layers) {
            let region = layer.region();
            layer.restore(&mut buffer[region], record)?;
        }

        tracing::info!(
            "Restored round-robin store from snapshot taken {} ({} layers, {})",
            snapshot.created_at,
            layers.len(),
            format_size(size as u64)
        );

        Ok(Self {
            layers,
            buffer,
            xff: config.xff,
            scheduler: FlushScheduler::new(config.flush_delay),
            persist_path: config.persist_path,
            stats: StoreStats::default(),
        })
    }

    fn compose(specs: &[LayerSpec]) -> Result<Vec<TimeLayer>> {
        crate::config::validate_layers(specs)?;
        specs.iter().map(TimeLayer::from_spec).collect()
    }

    /// Hand out contiguous, non-overlapping regions in layer order.
    fn assign_regions(layers: &mut [TimeLayer]) -> usize {
        layers
            .iter_mut()
            .fold(0, |offset, layer| layer.assign_region(offset))
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Total bytes of the backing buffer, the sum of every layer's size.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn layers(&self) -> &[TimeLayer] {
        &self.layers
    }

    /// Raw backing buffer, read-only.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Configured X-Files Factor. Reserved: no aggregation consults it.
    pub fn xff(&self) -> f64 {
        self.xff
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    pub fn flush_delay(&self) -> Duration {
        self.scheduler.delay()
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.clone()
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    /// Write one sample. Sealed buckets cascade into coarser layers before
    /// this returns; a debounced flush is armed when persistence is enabled.
    pub fn write(&mut self, timestamp: Timestamp, value: f64) {
        self.write_and_schedule(timestamp, value, Instant::now());
    }

    /// Write one sample and report whether a new flush was armed.
    pub(crate) fn write_and_schedule(
        &mut self,
        timestamp: Timestamp,
        value: f64,
        now: Instant,
    ) -> bool {
        self.cascade(timestamp, value);
        self.schedule_flush(now)
    }

    fn cascade(&mut self, timestamp: Timestamp, value: f64) {
        self.stats.samples_written += 1;

        let (mut timestamp, mut value) = (timestamp, value);
        for (depth, layer) in self.layers.iter_mut().enumerate() {
            let region = &mut self.buffer[layer.region()];
            match layer.write(region, timestamp, value) {
                WriteOutcome::Sealed(sealed) => {
                    self.stats.buckets_sealed += 1;
                    timestamp = sealed.timestamp;
                    value = sealed.value;
                }
                WriteOutcome::Accumulated => break,
                WriteOutcome::Dropped => {
                    if depth == 0 {
                        self.stats.late_samples_dropped += 1;
                    }
                    break;
                }
            }
        }
    }

    /// Arm the debounced flush. No-op without a snapshot destination or while
    /// a flush is already armed or in flight.
    pub fn schedule_flush(&mut self, now: Instant) -> bool {
        if self.persist_path.is_none() {
            return false;
        }
        self.scheduler.arm(now)
    }

    /// Drop a flush armed outside of any driver. Returns whether one was armed.
    pub(crate) fn disarm_flush(&mut self) -> bool {
        let pending = self.scheduler.is_pending();
        self.scheduler.complete();
        pending
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// The finest layer whose span covers `distance` seconds.
    pub fn layer_for(&self, distance: u64) -> Option<&TimeLayer> {
        self.layers.iter().find(|layer| layer.covered(distance))
    }

    /// Read `[start, end)` from the finest layer that covers the range.
    ///
    /// Returns an empty vector when no layer retains enough history.
    pub fn read(&self, start: Timestamp, end: Timestamp) -> Vec<Point> {
        let distance = end.saturating_sub(start);
        match self.layer_for(distance) {
            Some(layer) => layer.read_range(&self.buffer[layer.region()], start, end),
            None => {
                tracing::debug!(
                    "No layer covers a {}s range, returning no data",
                    distance
                );
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Capture every layer as it stands now.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(
            self.layers
                .iter()
                .map(|layer| layer.to_snapshot(&self.buffer[layer.region()]))
                .collect(),
        )
    }

    /// Encode the current state for the configured destination.
    pub fn flush_job(&self) -> Option<FlushJob> {
        let path = self.persist_path.clone()?;
        Some(FlushJob {
            path,
            data: self.snapshot().encode(),
        })
    }

    /// Write a full snapshot now. No-op without a destination. Independent of
    /// the debounce state.
    pub fn flush(&mut self) -> Result<()> {
        let Some(job) = self.flush_job() else {
            return Ok(());
        };
        let written = job.execute()?;
        self.record_flush(written);
        Ok(())
    }

    pub(crate) fn record_flush(&mut self, written: usize) {
        self.stats.flushes += 1;
        self.stats.bytes_flushed += written as u64;
        self.stats.last_flush = Some(Utc::now());
        tracing::debug!("Flushed snapshot ({})", format_size(written as u64));
    }

    /// Start the armed flush: move to `Firing` and encode the state current
    /// at this moment.
    pub(crate) fn begin_scheduled_flush(&mut self) -> Option<FlushJob> {
        if !self.scheduler.begin_fire() {
            return None;
        }
        self.flush_job()
    }

    /// Finish a scheduled flush and disarm the scheduler.
    pub(crate) fn finish_scheduled_flush(&mut self, result: &Result<usize>) {
        self.scheduler.complete();
        if let Ok(written) = result {
            self.record_flush(*written);
        }
    }

    /// Drive the debounce from a synchronous event loop: run the armed flush
    /// if its deadline has passed. Returns whether a flush ran.
    pub fn poll_flush(&mut self, now: Instant) -> Result<bool> {
        if !self.scheduler.due(now) {
            return Ok(false);
        }

        let result = match self.begin_scheduled_flush() {
            Some(job) => job.execute(),
            None => Ok(0),
        };
        self.finish_scheduled_flush(&result);
        result.map(|_| true)
    }
}

impl std::fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredStore")
            .field("layers", &self.layers)
            .field("size", &self.buffer.len())
            .field("xff", &self.xff)
            .field("persist_path", &self.persist_path)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FlushState;
    use crate::slot::SLOT_WIDTH;

    fn two_layer_config() -> StoreConfig {
        StoreConfig::new().with_layers(vec![LayerSpec::new(15, 8), LayerSpec::new(60, 8)])
    }

    #[test]
    fn test_default_store() {
        let store = LayeredStore::new().expect("default store should open");
        assert_eq!(store.layers().len(), 3);
        assert_eq!(store.size(), (40_320 + 30_240 + 43_800) * SLOT_WIDTH);
        assert_eq!(store.xff(), 0.5);
        assert!(store.persist_path().is_none());
    }

    #[test]
    fn test_regions_are_contiguous() {
        let store = LayeredStore::open(two_layer_config()).expect("store should open");
        let regions: Vec<_> = store.layers().iter().map(TimeLayer::region).collect();

        assert_eq!(regions[0], 0..8 * SLOT_WIDTH);
        assert_eq!(regions[1], 8 * SLOT_WIDTH..16 * SLOT_WIDTH);
        assert_eq!(store.size(), 16 * SLOT_WIDTH);
    }

    #[test]
    fn test_misaligned_config_rejected() {
        let config =
            StoreConfig::new().with_layers(vec![LayerSpec::new(15, 8), LayerSpec::new(50, 8)]);
        let err = LayeredStore::open(config).expect_err("misaligned chain must fail");
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_cascade_mean() {
        let mut store = LayeredStore::open(two_layer_config()).expect("store should open");

        for (i, value) in [1.0, 2.0, 3.0, 6.0].iter().enumerate() {
            store.write(i as u64 * 15, *value);
        }
        // seals the last fine bucket of coarse bucket 0
        store.write(60, 100.0);
        // seals fine bucket 4, which opens coarse bucket 1 and seals coarse bucket 0
        store.write(75, 100.0);

        let coarse = &store.layers()[1];
        let points = coarse.read_range(&store.as_bytes()[coarse.region()], 0, 60);
        assert_eq!(points.len(), 1);
        let mean = points[0].value.expect("coarse bucket should hold a mean");
        assert!((mean - 3.0).abs() < 1e-9);

        let stats = store.stats();
        assert_eq!(stats.samples_written, 6);
        assert_eq!(stats.buckets_sealed, 6);
    }

    #[test]
    fn test_read_selects_covering_layer() {
        let mut store = LayeredStore::open(two_layer_config()).expect("store should open");
        for t in (0..120).step_by(15) {
            store.write(t, 1.0);
        }

        assert_eq!(store.layer_for(120).map(TimeLayer::precision), Some(15));
        assert_eq!(store.layer_for(121).map(TimeLayer::precision), Some(60));
        assert!(store.layer_for(481).is_none());

        assert_eq!(store.read(0, 120).len(), 8);
        assert_eq!(store.read(0, 240).len(), 4);
        assert!(store.read(0, 10_000).is_empty());
    }

    #[test]
    fn test_late_sample_counted() {
        let mut store = LayeredStore::open(two_layer_config()).expect("store should open");
        store.write(100, 1.0);
        store.write(10, 1.0);
        assert_eq!(store.stats().late_samples_dropped, 1);
    }

    #[test]
    fn test_no_schedule_without_path() {
        let mut store = LayeredStore::open(two_layer_config()).expect("store should open");
        store.write(0, 1.0);
        assert_eq!(store.scheduler().state(), FlushState::Disarmed);
        assert!(store.flush().is_ok());
        assert_eq!(store.stats().flushes, 0);
    }

    #[test]
    fn test_initial_buffer_adopted() {
        let mut source = LayeredStore::open(two_layer_config()).expect("store should open");
        source.write(0, 42.0);
        let buffer = source.as_bytes().to_vec();

        let store = LayeredStore::open(two_layer_config().with_initial_buffer(buffer))
            .expect("store should adopt buffer");
        assert_eq!(store.read(0, 15), vec![Point::new(0, 42.0)]);
    }

    #[test]
    fn test_poll_flush_debounces() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let path = temp_dir.path().join("store.rrd");
        let mut store = LayeredStore::open(two_layer_config().with_persist_path(&path))
            .expect("store should open");

        let start = Instant::now();
        assert!(store.write_and_schedule(0, 1.0, start));
        assert!(!store.write_and_schedule(15, 2.0, start + Duration::from_millis(50)));

        assert!(!store.poll_flush(start + Duration::from_millis(100)).expect("poll"));
        assert!(!path.exists());

        assert!(store.poll_flush(start + Duration::from_millis(200)).expect("poll"));
        assert!(path.exists());
        assert_eq!(store.stats().flushes, 1);
        assert_eq!(store.scheduler().state(), FlushState::Disarmed);

        assert!(!store.poll_flush(start + Duration::from_millis(400)).expect("poll"));
        assert_eq!(store.stats().flushes, 1);
    }

    #[test]
    fn test_disarm_flush() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let path = temp_dir.path().join("store.rrd");
        let mut store = LayeredStore::open(two_layer_config().with_persist_path(&path))
            .expect("store should open");

        assert!(!store.disarm_flush());
        store.write(0, 1.0);
        assert!(store.disarm_flush());
        assert_eq!(store.scheduler().state(), FlushState::Disarmed);
        assert!(store.write_and_schedule(15, 2.0, Instant::now()));
    }

    #[test]
    fn test_flush_failure_surfaces() {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let path = temp_dir.path().join("missing-dir").join("store.rrd");
        let mut store = LayeredStore::open(two_layer_config().with_persist_path(&path))
            .expect("store should open");

        store.write(0, 1.0);
        let err = store.flush().expect_err("flush into a missing directory fails");
        assert!(matches!(err, RrdError::FlushFailed(_)));
        assert!(err.is_persistence_error());
    }
}
