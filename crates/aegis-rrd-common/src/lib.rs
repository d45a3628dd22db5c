//! Aegis RRD Common - Shared Types and Utilities
//!
//! Foundational error handling and helper functions used by the Aegis
//! round-robin database. Keeps the engine crate focused on bucket arithmetic
//! and persistence while the plumbing lives here.
//!
//! Key Features:
//! - Unified error type with configuration/persistence classification
//! - Duration shorthand parsing ("15s", "1w", "5y") for layer definitions
//! - Human-readable size formatting
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod error;
pub mod utils;

pub use error::{Result, RrdError};
