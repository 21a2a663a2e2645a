//! Miscellaneous blocks.
pub mod gated_conv;
