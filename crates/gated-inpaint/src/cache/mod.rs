//! # Download Cache
//!
//! The single fetch routine used for every remote artifact (checkpoints, and
//! anything else a pipeline stage needs on local disk).
//!
//! * [`disk`] - cache directory policy and download-if-missing.
//! * [`weights`] - checkpoint descriptors and cache keys.
pub mod disk;
pub mod weights;

pub use weights::fetch_model_weights;
