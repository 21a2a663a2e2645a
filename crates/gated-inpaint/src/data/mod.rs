//! # Dataset Provider
//!
//! Reads images and hole masks from local disk into model-ready tensors.
//! Fetching and unpacking public datasets happens elsewhere; this module
//! only needs a directory of decodable image files.
//!
//! * [`image_folder`] - image file discovery.
//! * [`tensors`] - image / mask <-> tensor conversion.
pub mod image_folder;
pub mod tensors;

pub use image_folder::ImageFolder;
