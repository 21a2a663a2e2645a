#![warn(missing_docs)]
//!# gated-inpaint - Gated-Convolution Inpainting
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::gated_conv`] - ``feature_conv(x) * sigmoid(gate_conv(x))`` block.
//! * [`models`] - complete models.
//!   * [`models::gated_unet`] - the gated U-Net inpainting baseline.
//!     * [`models::gated_unet::params`] - named parameters and map-based loading.
//!     * [`models::gated_unet::pytorch`] - ``torch`` checkpoint loading.
//! * [`data`] - image folder scanning and image / mask tensor conversion.
//! * [`cache`] - download-if-missing cache for checkpoints.
//! * [`compat`] - convolution shape arithmetic.
//! * [`error`] - the [`InpaintError`] type.

pub mod cache;
pub mod compat;
pub mod data;
pub mod error;
pub mod layers;
pub mod models;

pub use error::InpaintError;
