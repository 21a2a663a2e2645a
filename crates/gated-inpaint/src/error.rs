//! # Inpainting Errors
//!
//! [`InpaintError`] is the single error type surfaced by model construction,
//! the forward pass, parameter loading and the dataset provider.

use std::fmt;

/// Errors raised by the inpainting pipeline.
///
/// None of these are transient; they indicate an integration bug
/// and are propagated to the caller unmodified.
#[derive(Debug)]
pub enum InpaintError {
    /// Invalid channel counts, or a kernel/stride/padding combination
    /// which cannot preserve the stage shape contracts.
    Config(String),

    /// A runtime tensor shape violated a shape contract.
    Shape(String),

    /// Missing or mis-shaped parameters when initializing from external weights.
    ParameterLoad(String),

    /// Filesystem failure in the dataset provider.
    Io(std::io::Error),

    /// An image failed to decode or encode.
    Image(image::ImageError),
}

impl InpaintError {
    /// Build a [`InpaintError::Shape`] comparing two shapes.
    pub(crate) fn shape_mismatch(
        context: &str,
        expected: impl fmt::Debug,
        actual: impl fmt::Debug,
    ) -> Self {
        Self::Shape(format!("{context}: expected {expected:?}, got {actual:?}"))
    }
}

impl fmt::Display for InpaintError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Shape(msg) => write!(f, "shape mismatch: {msg}"),
            Self::ParameterLoad(msg) => write!(f, "parameter load failed: {msg}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Image(err) => write!(f, "image error: {err}"),
        }
    }
}

impl std::error::Error for InpaintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Image(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InpaintError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for InpaintError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err)
    }
}

/// Unwrap a result, panicking with the error's display message.
pub(crate) fn expect_ok<T>(result: Result<T, InpaintError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("{}", e),
    }
}
