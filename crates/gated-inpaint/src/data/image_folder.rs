//! # Image Folder Scanning

use crate::data::tensors::load_image_tensor;
use crate::error::InpaintError;
use burn::prelude::{Backend, Tensor};
use globwalk::{FileType, GlobWalkerBuilder};
use std::io;
use std::path::{Path, PathBuf};

/// File patterns treated as decodable images; matched case-insensitively.
pub const IMAGE_PATTERNS: &[&str] = &["**/*.{jpg,jpeg,png}"];

/// A directory of image files, in sorted path order.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl ImageFolder {
    /// Recursively scan `root` for image files.
    ///
    /// # Returns
    ///
    /// The folder; an empty folder is not an error. Fails with
    /// [`InpaintError::Io`] if `root` is not a directory.
    #[tracing::instrument(skip_all)]
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, InpaintError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(InpaintError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("image folder not found: {}", root.display()),
            )));
        }

        let walker = GlobWalkerBuilder::from_patterns(root, IMAGE_PATTERNS)
            .case_insensitive(true)
            .file_type(FileType::FILE)
            .build()
            .map_err(|e| InpaintError::Io(io::Error::other(e.to_string())))?;

        let mut paths = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| InpaintError::Io(e.into()))?;
            paths.push(entry.into_path());
        }
        paths.sort();

        tracing::debug!("found {} images", paths.len());
        Ok(Self {
            root: root.to_path_buf(),
            paths,
        })
    }

    /// The scanned directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The image paths, sorted.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the folder holds no images.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load image `index` as a ``[3, height, width]`` tensor in ``[0, 1]``.
    pub fn load<B: Backend>(
        &self,
        index: usize,
        resolution: [usize; 2],
        device: &B::Device,
    ) -> Result<Tensor<B, 3>, InpaintError> {
        let path = self.paths.get(index).ok_or_else(|| {
            InpaintError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("image index {index} out of range for {} images", self.len()),
            ))
        })?;
        load_image_tensor(path, resolution, device)
    }

    /// Load a contiguous run of images as a ``[batch, 3, height, width]`` tensor.
    pub fn load_batch<B: Backend>(
        &self,
        indices: impl IntoIterator<Item = usize>,
        resolution: [usize; 2],
        device: &B::Device,
    ) -> Result<Tensor<B, 4>, InpaintError> {
        let items = indices
            .into_iter()
            .map(|index| self.load(index, resolution, device))
            .collect::<Result<Vec<_>, _>>()?;
        if items.is_empty() {
            return Err(InpaintError::Shape("empty image batch".to_string()));
        }
        Ok(Tensor::stack(items, 0))
    }
}
