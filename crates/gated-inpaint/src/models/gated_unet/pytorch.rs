//! # ``torch`` Checkpoint Loading
//!
//! A checkpoint is a single PyTorch state-dict file (``.pt`` / ``.pth``) on local disk,
//! keyed like the upstream ``BaselineUNet``; archives are not unpacked here.
//!
//! Upstream names the output projection ``final``, which is a reserved word
//! in Rust; those keys are remapped onto ``output_conv``.
//!
//! The checkpoint's key set is checked against the model before any tensor
//! is read: missing, mis-shaped, and unknown parameters are all rejected,
//! as they are for [`GatedUNetConfig::try_init_from_parameters`].
//!
//! [`GatedUNetConfig::try_init_from_parameters`]: crate::models::gated_unet::GatedUNetConfig::try_init_from_parameters

use crate::error::InpaintError;
use crate::models::gated_unet::params::{ParameterLayout, check_parameter_shapes};
use crate::models::gated_unet::unet_model::{GatedUNet, GatedUNetRecord};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::{Path, PathBuf};

/// Options for reading a ``torch`` checkpoint.
#[derive(Config, Debug)]
pub struct PyTorchLoadConfig {
    /// Descend into this key first; e.g. ``"state_dict"`` for training checkpoints.
    #[config(default = "None")]
    pub top_level_key: Option<String>,

    /// Strip a leading ``module.`` left by data-parallel wrappers.
    #[config(default = true)]
    pub strip_data_parallel_prefix: bool,
}

impl Default for PyTorchLoadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PyTorchLoadConfig {
    /// Remap rules apply in order; the ``module.`` strip must run before the
    /// ``final`` rename.
    fn load_args(
        &self,
        path: PathBuf,
    ) -> LoadArgs {
        let mut args = LoadArgs::new(path);
        if self.strip_data_parallel_prefix {
            args = args.with_key_remap(r"^module\.(.+)", "$1");
        }
        args = args.with_key_remap(r"^final\.(.+)", "output_conv.$1");
        if let Some(key) = &self.top_level_key {
            args = args.with_top_level_key(key);
        }
        args
    }
}

/// Rewrite a checkpoint key the way the recorder will.
fn remap_key(
    args: &LoadArgs,
    key: &str,
) -> String {
    let mut key = key.to_string();
    for (pattern, replacement) in &args.key_remap {
        if pattern.is_match(&key) {
            key = pattern.replace_all(&key, replacement.as_str()).to_string();
        }
    }
    key
}

/// Read the remapped parameter identifiers and shapes of a ``torch`` checkpoint.
///
/// Only the pickled metadata is read; tensor data is not loaded.
pub fn read_pytorch_parameter_shapes(
    path: &Path,
    options: &PyTorchLoadConfig,
) -> Result<ParameterLayout, InpaintError> {
    let args = options.load_args(path.to_path_buf());
    let infos = candle_core::pickle::read_pth_tensor_info(
        path,
        false,
        options.top_level_key.as_deref(),
    )
    .map_err(|e| InpaintError::ParameterLoad(format!("{}: {e}", path.display())))?;

    Ok(infos
        .into_iter()
        .map(|info| (remap_key(&args, &info.name), info.layout.dims().to_vec()))
        .collect())
}

/// Load a [`GatedUNetRecord`] from a ``torch`` weights path.
///
/// The record is not checked against any layout; see
/// [`GatedUNet::load_pytorch_weights_with`].
#[tracing::instrument(skip(device))]
pub fn load_pytorch_record<B: Backend>(
    path: PathBuf,
    options: &PyTorchLoadConfig,
    device: &B::Device,
) -> Result<GatedUNetRecord<B>, InpaintError> {
    let source = path.display().to_string();
    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new()
        .load(options.load_args(path), device)
        .map_err(|e| InpaintError::ParameterLoad(format!("{source}: {e}")))?;

    tracing::debug!("loaded torch record from {source}");
    Ok(record)
}

impl<B: Backend> GatedUNet<B> {
    /// Load ``torch`` weights onto this model.
    ///
    /// The checkpoint must hold exactly this model's parameters, with matching shapes.
    pub fn load_pytorch_weights(
        self,
        path: PathBuf,
    ) -> Result<Self, InpaintError> {
        self.load_pytorch_weights_with(path, &PyTorchLoadConfig::default())
    }

    /// Load ``torch`` weights onto this model, with explicit options.
    pub fn load_pytorch_weights_with(
        self,
        path: PathBuf,
        options: &PyTorchLoadConfig,
    ) -> Result<Self, InpaintError> {
        let layout = self.parameter_shapes();
        let device = self.devices()[0].clone();

        let shapes = read_pytorch_parameter_shapes(&path, options)?;
        if let Err(err) = check_parameter_shapes(&layout, &shapes) {
            tracing::warn!("rejected torch checkpoint {}: {err}", path.display());
            return Err(err);
        }

        let record = load_pytorch_record::<B>(path, options, &device)?;
        let model = self.load_record(record);
        model.try_verify_parameters(&layout)?;

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gated_unet::unet_model::GatedUNetConfig;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    fn tiny_model() -> GatedUNet<B> {
        GatedUNetConfig::new()
            .with_widths([2, 4, 8])
            .init(&Default::default())
    }

    fn assert_fixture_values(model: &GatedUNet<B>) {
        let params = model.to_parameters();
        assert_eq!(
            params["output_conv.bias"].to_vec::<f32>().unwrap(),
            vec![0.125, 0.25, 0.375]
        );
        let weight = params["enc1.gate_conv.weight"].to_vec::<f32>().unwrap();
        assert_eq!(weight.len(), 2 * 4 * 3 * 3);
        assert_eq!(&weight[..6], &[-0.5, -0.25, 0.0, 0.25, 0.5, -0.5]);
    }

    #[test]
    fn test_missing_checkpoint_is_parameter_load_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = tiny_model()
            .load_pytorch_weights(dir.path().join("missing.pt"))
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
        assert!(err.to_string().contains("missing.pt"));
    }

    #[test]
    fn test_load_config_defaults() {
        let options = PyTorchLoadConfig::default();
        assert_eq!(options.top_level_key, None);
        assert!(options.strip_data_parallel_prefix);

        let options = options.with_top_level_key(Some("state_dict".to_string()));
        assert_eq!(options.top_level_key.as_deref(), Some("state_dict"));
    }

    #[test]
    fn test_key_remap() {
        let args = PyTorchLoadConfig::default().load_args(PathBuf::from("unused.pt"));
        let remap = |key: &str| remap_key(&args, key);

        assert_eq!(remap("final.weight"), "output_conv.weight");
        assert_eq!(remap("final.bias"), "output_conv.bias");
        assert_eq!(
            remap("module.enc1.feature_conv.bias"),
            "enc1.feature_conv.bias"
        );
        assert_eq!(remap("module.final.weight"), "output_conv.weight");
        assert_eq!(remap("enc1.gate_conv.weight"), "enc1.gate_conv.weight");
        assert_eq!(remap("dec1.final.weight"), "dec1.final.weight");
    }

    #[test]
    fn test_key_remap_keeps_data_parallel_prefix() {
        let args = PyTorchLoadConfig::new()
            .with_strip_data_parallel_prefix(false)
            .load_args(PathBuf::from("unused.pt"));

        assert_eq!(
            remap_key(&args, "module.enc1.feature_conv.bias"),
            "module.enc1.feature_conv.bias"
        );
        assert_eq!(remap_key(&args, "final.bias"), "output_conv.bias");
    }

    #[test]
    fn test_read_parameter_shapes_matches_layout() {
        let shapes =
            read_pytorch_parameter_shapes(&fixture("tiny_unet.pt"), &Default::default()).unwrap();
        let layout = GatedUNetConfig::new()
            .with_widths([2, 4, 8])
            .parameter_layout();
        assert_eq!(shapes, layout);
    }

    #[test]
    fn test_load_checkpoint() {
        let model = tiny_model()
            .load_pytorch_weights(fixture("tiny_unet.pt"))
            .unwrap();
        assert_fixture_values(&model);
    }

    #[test]
    fn test_load_data_parallel_checkpoint() {
        let model = tiny_model()
            .load_pytorch_weights(fixture("tiny_unet_data_parallel.pt"))
            .unwrap();
        assert_fixture_values(&model);

        let err = tiny_model()
            .load_pytorch_weights_with(
                fixture("tiny_unet_data_parallel.pt"),
                &PyTorchLoadConfig::new().with_strip_data_parallel_prefix(false),
            )
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
    }

    #[test]
    fn test_load_nested_checkpoint() {
        let options = PyTorchLoadConfig::new().with_top_level_key(Some("state_dict".to_string()));
        let model = tiny_model()
            .load_pytorch_weights_with(fixture("tiny_unet_nested.pt"), &options)
            .unwrap();
        assert_fixture_values(&model);
    }

    #[test]
    fn test_checkpoint_missing_parameter_is_rejected() {
        let err = tiny_model()
            .load_pytorch_weights(fixture("tiny_unet_missing_bias.pt"))
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
        assert!(
            err.to_string()
                .contains("missing parameter `output_conv.bias`")
        );
    }

    #[test]
    fn test_checkpoint_unknown_parameter_is_rejected() {
        let err = tiny_model()
            .load_pytorch_weights(fixture("tiny_unet_extra_key.pt"))
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
        assert!(err.to_string().contains("unknown parameter `aux_head.weight`"));
    }

    #[test]
    fn test_checkpoint_for_other_widths_is_rejected() {
        let model: GatedUNet<B> = GatedUNetConfig::new()
            .with_widths([4, 8, 16])
            .init(&Default::default());

        let err = model
            .load_pytorch_weights(fixture("tiny_unet.pt"))
            .unwrap_err();
        assert!(err.to_string().contains("expected"));
    }
}
