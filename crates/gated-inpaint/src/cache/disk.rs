//! # Cache Policy

use crate::cache::disk;
use anyhow::{anyhow, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, create_dir_all, remove_file};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Cache Policy
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Key for the root cache directory.
    #[config(default = "\"gated-inpaint\".to_string()")]
    pub root_cache_key: String,

    /// Explicit cache root; overrides ``~/.cache/{root_cache_key}``.
    #[config(default = "None")]
    pub cache_root: Option<PathBuf>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, does not create it.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow!("no home directory"))?;
        Ok(home.join(".cache").join(&self.root_cache_key))
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(path, |acc, s| acc.join(s)))
    }

    /// Fetch a Resource to the Cache.
    ///
    /// # Returns
    ///
    /// The cache path.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        if resource_key.is_empty() {
            bail!("empty resource key for {url}");
        }
        let cache_file_path = self.resource_to_path(resource_key)?;
        disk::try_cache_download_to_path(url, cache_file_path)
    }
}

/// Download a URL resource to a given path.
///
/// If the path already exists, does nothing; missing parent
/// directories are created.
///
/// # Returns
///
/// The target path.
#[tracing::instrument]
pub fn try_cache_download_to_path(
    url: &str,
    target_path: PathBuf,
) -> anyhow::Result<PathBuf> {
    if target_path.exists() {
        tracing::info!("found cached {}", target_path.display());
        return Ok(target_path);
    }

    ensure_parent_dir(&target_path)?;

    let file_name = target_path
        .file_name()
        .ok_or_else(|| anyhow!("target path has no file name: {}", target_path.display()))?
        .to_string_lossy()
        .to_string();

    tracing::info!("downloading {url}");
    // TODO: download-to-file instead of download-to-memory.
    let bytes = downloader::download_file_as_bytes(url, &file_name);

    let mut output_file = File::create(&target_path)?;
    let bytes_written = output_file.write(&bytes)?;

    if bytes_written != bytes.len() {
        remove_file(&target_path)?;
        bail!(
            "short write for {}: {bytes_written} of {} bytes",
            target_path.display(),
            bytes.len()
        );
    }
    tracing::info!("saved {} bytes to {}", bytes.len(), target_path.display());

    Ok(target_path)
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_to_path() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCacheConfig::new().with_cache_root(Some(root.path().to_path_buf()));

        let path = cache
            .resource_to_path(&["weights".to_string(), "model.pt".to_string()])
            .unwrap();
        assert_eq!(path, root.path().join("weights").join("model.pt"));
    }

    #[test]
    fn test_default_cache_dir_uses_root_key() {
        let cache = DiskCacheConfig::default();
        assert_eq!(cache.root_cache_key, "gated-inpaint");
        if let Ok(dir) = cache.base_cache_dir() {
            assert!(dir.ends_with(".cache/gated-inpaint"));
        }
    }

    #[test]
    fn test_existing_file_is_not_downloaded() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("nested").join("weights.pt");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"cached").unwrap();

        // An unroutable URL; the cache hit must short-circuit before any request.
        let path = try_cache_download_to_path("http://invalid.invalid/weights.pt", target.clone())
            .unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"cached");
    }

    #[test]
    fn test_empty_resource_key() {
        let cache = DiskCacheConfig::default();
        assert!(cache.fetch_resource("http://invalid.invalid/x", &[]).is_err());
    }
}
