//! # Compat
//!
//! Shape helpers not (yet) provided by ``burn``.
pub mod conv_shape;
