//! Core library: taxonomy loading, batching, gating, consolidation, the tag
//! store, and sidecar/CSV export.

pub mod batch;
pub mod config;
pub mod consolidator;
pub mod csv_export;
pub mod error;
pub mod gate;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod sidecar;
pub mod tag_store;
pub mod taxonomy;

pub use error::{Result, TaggerError};
