//! Aegis RRD - Multi-Resolution Round-Robin Store
//!
//! Fixed-memory time series storage. Samples enter a fine-grained layer and
//! are averaged into progressively coarser layers as buckets close, so recent
//! history is kept at high precision and older history at low precision
//! without the footprint ever growing.
//!
//! Key Features:
//! - Chain of precision layers sharing one preallocated buffer
//! - Running-mean consolidation cascading from fine to coarse layers
//! - Range reads served by the finest layer that still covers the span
//! - Checksummed binary snapshots with debounced background flushing
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod handle;
pub mod layer;
pub mod scheduler;
pub mod slot;
pub mod snapshot;
pub mod store;
pub mod types;

pub use aegis_rrd_common::{Result, RrdError};
pub use config::{LayerSpec, StoreConfig, DEFAULT_FLUSH_DELAY, DEFAULT_XFF};
pub use handle::StoreHandle;
pub use layer::{RangeIter, Sealed, TimeLayer, WriteOutcome};
pub use scheduler::{FlushScheduler, FlushState};
pub use slot::{Slot, SLOT_WIDTH};
pub use snapshot::{LayerSnapshot, StoreSnapshot};
pub use store::{FlushJob, LayeredStore, StoreStats};
pub use types::{Point, Timestamp};
