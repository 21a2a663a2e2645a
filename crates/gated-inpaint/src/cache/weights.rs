//! # Checkpoint Weights Cache

use crate::cache::disk::DiskCacheConfig;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Returns a local path to a checkpoint file.
///
/// If the file does not exist, it will be downloaded from the given URL.
pub fn fetch_model_weights<S: AsRef<str>>(url: S) -> anyhow::Result<PathBuf> {
    let cache_key = url_to_cache_key(Some("model"), url.as_ref())?;
    let resource = pretrained_weights_resource_key(&cache_key);

    DiskCacheConfig::default().fetch_resource(url.as_ref(), &resource)
}

/// Build a cache key (bare cache file name) from a name and URL.
///
/// The key is ``{name}-{url crc hash}-{url basename}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> anyhow::Result<String> {
    let hash = X25.checksum(url.as_bytes()).to_string();
    let base_name = match url.rsplit_once('/') {
        Some((_, base)) if !base.is_empty() => base,
        _ => return Err(anyhow!("url has no file name: {url}")),
    };
    Ok(match name {
        Some(n) => format!("{}-{}-{}", n, hash, base_name),
        None => format!("{}-{}", hash, base_name),
    })
}

/// Get the cache resource key for a checkpoint file.
pub fn pretrained_weights_resource_key(cache_key: &str) -> Vec<String> {
    vec!["weights".to_string(), cache_key.to_string()]
}

/// A descriptor for a checkpoint source.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Name of the checkpoint.
    pub name: String,

    /// Description of the checkpoint.
    pub description: String,

    /// License.
    pub license: Option<String>,

    /// Source URL.
    pub origin: Option<String>,

    /// URLs to download the weights from; the first is used.
    pub urls: Vec<String>,
}

impl PretrainedWeightsDescriptor {
    /// A descriptor for a single weights URL.
    pub fn from_url(
        name: &str,
        url: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            license: None,
            origin: None,
            urls: vec![url.to_string()],
        }
    }

    fn primary_url(&self) -> anyhow::Result<&str> {
        self.urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| anyhow!("descriptor `{}` has no urls", self.name))
    }

    /// Cache Key
    ///
    /// The key is ``{name}-{url crc hash}-{url basename}``.
    pub fn cache_key(&self) -> anyhow::Result<String> {
        url_to_cache_key(Some(&self.name), self.primary_url()?)
    }

    /// Read-Through Cache the Checkpoint.
    ///
    /// # Returns
    ///
    /// The disk location of the cached weights.
    pub fn fetch_weights_to_disk_cache(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        let url = self.primary_url()?;
        let resource = pretrained_weights_resource_key(&self.cache_key()?);

        disk_cache.fetch_resource(url, &resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_to_cache_key() {
        let url = "https://example.com/ckpt/unet_gated.pt";
        let hash = X25.checksum(url.as_bytes());

        assert_eq!(
            url_to_cache_key(Some("baseline"), url).unwrap(),
            format!("baseline-{hash}-unet_gated.pt")
        );
        assert_eq!(
            url_to_cache_key(None, url).unwrap(),
            format!("{hash}-unet_gated.pt")
        );
        assert!(url_to_cache_key(None, "https://example.com/").is_err());
    }

    #[test]
    fn test_descriptor_cache_hit() {
        let root = tempfile::tempdir().unwrap();
        let cache = DiskCacheConfig::new().with_cache_root(Some(root.path().to_path_buf()));

        let desc = PretrainedWeightsDescriptor::from_url(
            "baseline",
            "http://invalid.invalid/unet_gated.pt",
        );
        let key = desc.cache_key().unwrap();

        let cached = root.path().join("weights").join(&key);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"weights").unwrap();

        assert_eq!(desc.fetch_weights_to_disk_cache(&cache).unwrap(), cached);
    }

    #[test]
    fn test_descriptor_without_urls() {
        let desc = PretrainedWeightsDescriptor {
            urls: vec![],
            ..PretrainedWeightsDescriptor::from_url("empty", "x/y")
        };
        assert!(desc.cache_key().is_err());
    }
}
