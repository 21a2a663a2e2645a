//! # Gated-Convolution U-Net
//!
//! The baseline inpainting network: a three stage gated encoder, a gated
//! bottleneck, and a two stage decoder with concatenated skip connections.
//!
//! * [`unet_model`] - [`GatedUNet`] and [`GatedUNetConfig`].
//! * [`params`] - named parameter layout, export, and map-based loading.
//! * [`pytorch`] - ``torch`` checkpoint loading.

pub mod params;
pub mod pytorch;
pub mod unet_model;

pub use params::{ParameterLayout, ParameterMap};
pub use unet_model::{GatedUNet, GatedUNetConfig};
