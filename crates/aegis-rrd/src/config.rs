//! Aegis RRD Configuration
//!
//! Configuration for a layered round-robin store. Every recognized option is
//! an explicit field; validation either accepts the whole configuration or
//! rejects it, so a store is never built from a half-checked layer chain.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::slot::SLOT_WIDTH;
use aegis_rrd_common::utils::{format_duration, parse_duration};
use aegis_rrd_common::{Result, RrdError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default X-Files Factor.
pub const DEFAULT_XFF: f64 = 0.5;

/// Coalescing window for debounced snapshot flushes.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(200);

// =============================================================================
// Layer Specification
// =============================================================================

/// Shape of one precision tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub precision_secs: u64,
    pub capacity: usize,
}

impl LayerSpec {
    pub fn new(precision_secs: u64, capacity: usize) -> Self {
        Self {
            precision_secs,
            capacity,
        }
    }

    /// Build a layer from duration shorthand, e.g. `LayerSpec::parse("15s", "1w")`.
    ///
    /// The retention must be a whole number of precision intervals.
    pub fn parse(precision: &str, retention: &str) -> Result<Self> {
        let precision_secs = parse_duration(precision).ok_or_else(|| {
            RrdError::InvalidLayer(format!("unrecognized precision '{}'", precision))
        })?;
        let retention_secs = parse_duration(retention).ok_or_else(|| {
            RrdError::InvalidLayer(format!("unrecognized retention '{}'", retention))
        })?;

        if precision_secs == 0 {
            return Err(RrdError::InvalidLayer(
                "precision must be at least one second".to_string(),
            ));
        }
        if retention_secs % precision_secs != 0 {
            return Err(RrdError::InvalidLayer(format!(
                "retention {} is not a multiple of precision {}",
                retention, precision
            )));
        }

        let capacity = usize::try_from(retention_secs / precision_secs).map_err(|_| {
            RrdError::InvalidLayer(format!("retention {} holds too many buckets", retention))
        })?;

        Ok(Self::new(precision_secs, capacity))
    }

    /// Total retained duration in seconds.
    pub fn span_secs(&self) -> u64 {
        self.precision_secs.saturating_mul(self.capacity as u64)
    }

    pub fn byte_size(&self) -> usize {
        self.capacity.saturating_mul(SLOT_WIDTH)
    }
}

impl std::fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            format_duration(self.precision_secs),
            format_duration(self.span_secs())
        )
    }
}

/// Check that a layer chain is well formed: non-empty, every tier positive,
/// each precision an exact multiple of the previous one, spans strictly
/// increasing.
pub fn validate_layers(layers: &[LayerSpec]) -> Result<()> {
    if layers.is_empty() {
        return Err(RrdError::Configuration(
            "at least one layer is required".to_string(),
        ));
    }

    let mut total: usize = 0;
    for (index, layer) in layers.iter().enumerate() {
        if layer.precision_secs == 0 {
            return Err(RrdError::InvalidLayer(format!(
                "layer {} has zero precision",
                index
            )));
        }
        if layer.capacity == 0 {
            return Err(RrdError::InvalidLayer(format!(
                "layer {} has zero capacity",
                index
            )));
        }

        total = layer
            .capacity
            .checked_mul(SLOT_WIDTH)
            .and_then(|size| total.checked_add(size))
            .ok_or_else(|| {
                RrdError::InvalidLayer(format!("layer {} overflows the buffer size", index))
            })?;

        if index == 0 {
            continue;
        }

        let previous = &layers[index - 1];
        if layer.precision_secs % previous.precision_secs != 0 {
            return Err(RrdError::MisalignedLayers {
                index,
                precision: layer.precision_secs,
                previous: previous.precision_secs,
            });
        }
        if layer.span_secs() <= previous.span_secs() {
            return Err(RrdError::InvalidLayer(format!(
                "layer {} span {} does not exceed the previous span {}",
                index,
                format_duration(layer.span_secs()),
                format_duration(previous.span_secs())
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for a [`LayeredStore`](crate::store::LayeredStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Explicit tiers, finest first. `None` uses [`StoreConfig::default_layers`].
    pub layers: Option<Vec<LayerSpec>>,
    /// X-Files Factor. Validated and retained, not consulted by aggregation.
    pub xff: f64,
    /// Snapshot location. `None` disables persistence.
    pub persist_path: Option<PathBuf>,
    pub flush_delay: Duration,
    /// Pre-existing backing buffer to adopt instead of zero-filling.
    #[serde(skip)]
    pub initial_buffer: Option<Vec<u8>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            layers: None,
            xff: DEFAULT_XFF,
            persist_path: None,
            flush_delay: DEFAULT_FLUSH_DELAY,
            initial_buffer: None,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 15s for one week, 1m for three weeks, 1h for five years.
    pub fn default_layers() -> Vec<LayerSpec> {
        vec![
            LayerSpec::new(15, 40_320),
            LayerSpec::new(60, 30_240),
            LayerSpec::new(3_600, 43_800),
        ]
    }

    pub fn with_layers(mut self, layers: Vec<LayerSpec>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_xff(mut self, xff: f64) -> Self {
        self.xff = xff;
        self
    }

    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn with_initial_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.initial_buffer = Some(buffer);
        self
    }

    /// The explicit layers, or the defaults when none were given.
    pub fn resolved_layers(&self) -> Vec<LayerSpec> {
        self.layers.clone().unwrap_or_else(Self::default_layers)
    }

    /// Bytes needed to back the resolved layers.
    pub fn total_bytes(&self) -> usize {
        self.resolved_layers().iter().map(LayerSpec::byte_size).sum()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.xff.is_finite() || !(0.0..=1.0).contains(&self.xff) {
            return Err(RrdError::Configuration(format!(
                "xff must be within [0, 1], got {}",
                self.xff
            )));
        }

        let layers = self.resolved_layers();
        validate_layers(&layers)?;

        if let Some(ref buffer) = self.initial_buffer {
            let expected: usize = layers.iter().map(LayerSpec::byte_size).sum();
            if buffer.len() != expected {
                return Err(RrdError::BufferSize {
                    expected,
                    actual: buffer.len(),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
