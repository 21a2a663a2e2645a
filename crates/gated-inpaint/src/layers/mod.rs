//! Reusable neural network modules.
pub mod blocks;
