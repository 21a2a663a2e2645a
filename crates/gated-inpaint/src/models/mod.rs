//! Complete model families.
pub mod gated_unet;
