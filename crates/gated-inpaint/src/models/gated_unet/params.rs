//! # Named Parameters
//!
//! Every parameter of a [`GatedUNet`] has a stable identifier,
//! ``<layer>[.<path>].<weight|bias>``; for example
//! ``bottleneck.feature_conv.weight`` or ``up1.bias``.
//!
//! - [`GatedUNetConfig::parameter_layout`] enumerates the identifiers and shapes
//!   a config requires.
//! - [`GatedUNetConfig::try_init_from_parameters`] builds a model from a
//!   [`ParameterMap`], rejecting missing, mis-shaped, or unknown entries.
//! - [`GatedUNet::to_parameters`] exports a model's parameters.

use crate::error::InpaintError;
use crate::layers::blocks::gated_conv::{GatedConv2d, GatedConv2dConfig};
use crate::models::gated_unet::unet_model::{GatedUNet, GatedUNetConfig};
use burn::module::Param;
use burn::nn::conv::{Conv2d, ConvTranspose2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use std::collections::BTreeMap;

/// Parameter tensors, keyed by layer identifier.
pub type ParameterMap = BTreeMap<String, TensorData>;

/// Parameter shapes, keyed by layer identifier.
pub type ParameterLayout = BTreeMap<String, Vec<usize>>;

const GATED_PATHS: [&str; 2] = ["feature_conv", "gate_conv"];

impl GatedUNetConfig {
    /// The identifiers and shapes of every parameter this config declares.
    ///
    /// Iteration order is deterministic.
    pub fn parameter_layout(&self) -> ParameterLayout {
        let mut layout = ParameterLayout::new();

        for (name, stage) in self.gated_stages() {
            gated_layout(&mut layout, name, &stage);
        }

        for (name, up) in [("up1", self.up1()), ("up2", self.up2())] {
            let [in_channels, out_channels] = up.channels;
            let [kh, kw] = up.kernel_size;
            layout.insert(
                format!("{name}.weight"),
                vec![in_channels, out_channels / up.groups, kh, kw],
            );
            if up.bias {
                layout.insert(format!("{name}.bias"), vec![out_channels]);
            }
        }

        let output = self.output_conv();
        let [in_channels, out_channels] = output.channels;
        let [kh, kw] = output.kernel_size;
        layout.insert(
            "output_conv.weight".to_string(),
            vec![out_channels, in_channels / output.groups, kh, kw],
        );
        if output.bias {
            layout.insert("output_conv.bias".to_string(), vec![out_channels]);
        }

        layout
    }

    /// Initialize a [`GatedUNet`] from externally supplied parameters.
    ///
    /// # Arguments
    ///
    /// - `params`: one entry per identifier of [`GatedUNetConfig::parameter_layout`].
    /// - `device`: the device to place the parameters on.
    ///
    /// # Returns
    ///
    /// The model; or [`InpaintError::ParameterLoad`] naming the first missing,
    /// mis-shaped, or unknown identifier. No partial model is produced.
    #[tracing::instrument(skip_all)]
    pub fn try_init_from_parameters<B: Backend>(
        &self,
        params: &ParameterMap,
        device: &B::Device,
    ) -> Result<GatedUNet<B>, InpaintError> {
        let layout = self.parameter_layout();

        let shapes: ParameterLayout = params
            .iter()
            .map(|(key, data)| (key.clone(), data.shape.clone()))
            .collect();
        if let Err(err) = check_parameter_shapes(&layout, &shapes) {
            tracing::warn!("rejected parameter set: {err}");
            return Err(err);
        }

        let source = ParameterSource { params, device };
        let model = self.try_init(device)?;

        Ok(GatedUNet {
            enc1: source.gated("enc1", model.enc1)?,
            enc2: source.gated("enc2", model.enc2)?,
            enc3: source.gated("enc3", model.enc3)?,
            bottleneck: source.gated("bottleneck", model.bottleneck)?,
            up1: source.conv_transpose2d("up1", model.up1)?,
            dec1: source.gated("dec1", model.dec1)?,
            up2: source.conv_transpose2d("up2", model.up2)?,
            dec2: source.gated("dec2", model.dec2)?,
            output_conv: source.conv2d("output_conv", model.output_conv)?,
        })
    }
}

fn gated_layout(
    layout: &mut ParameterLayout,
    name: &str,
    stage: &GatedConv2dConfig,
) {
    let k = stage.kernel_size;
    for path in GATED_PATHS {
        layout.insert(
            format!("{name}.{path}.weight"),
            vec![stage.out_channels, stage.in_channels, k, k],
        );
        if stage.bias {
            layout.insert(format!("{name}.{path}.bias"), vec![stage.out_channels]);
        }
    }
}

/// Compare a parameter set's shapes against a required layout.
///
/// Identifiers are checked in layout order, then unknown identifiers.
pub fn check_parameter_shapes(
    layout: &ParameterLayout,
    shapes: &ParameterLayout,
) -> Result<(), InpaintError> {
    for (key, expected) in layout {
        match shapes.get(key) {
            None => {
                return Err(InpaintError::ParameterLoad(format!(
                    "missing parameter `{key}`"
                )));
            }
            Some(actual) if actual != expected => {
                return Err(InpaintError::ParameterLoad(format!(
                    "parameter `{key}` has shape {actual:?}, expected {expected:?}"
                )));
            }
            Some(_) => {}
        }
    }

    if let Some(key) = shapes.keys().find(|key| !layout.contains_key(*key)) {
        return Err(InpaintError::ParameterLoad(format!(
            "unknown parameter `{key}`"
        )));
    }

    Ok(())
}

struct ParameterSource<'a, B: Backend> {
    params: &'a ParameterMap,
    device: &'a B::Device,
}

impl<B: Backend> ParameterSource<'_, B> {
    fn tensor<const D: usize>(
        &self,
        key: &str,
    ) -> Result<Param<Tensor<B, D>>, InpaintError> {
        let data = self
            .params
            .get(key)
            .ok_or_else(|| InpaintError::ParameterLoad(format!("missing parameter `{key}`")))?;
        if data.shape.len() != D {
            return Err(InpaintError::ParameterLoad(format!(
                "parameter `{key}` has rank {}, expected {D}",
                data.shape.len()
            )));
        }
        Ok(Param::from_tensor(Tensor::from_data(
            data.clone(),
            self.device,
        )))
    }

    fn conv2d(
        &self,
        prefix: &str,
        mut conv: Conv2d<B>,
    ) -> Result<Conv2d<B>, InpaintError> {
        conv.weight = self.tensor(&format!("{prefix}.weight"))?;
        if conv.bias.is_some() {
            conv.bias = Some(self.tensor(&format!("{prefix}.bias"))?);
        }
        Ok(conv)
    }

    fn conv_transpose2d(
        &self,
        prefix: &str,
        mut conv: ConvTranspose2d<B>,
    ) -> Result<ConvTranspose2d<B>, InpaintError> {
        conv.weight = self.tensor(&format!("{prefix}.weight"))?;
        if conv.bias.is_some() {
            conv.bias = Some(self.tensor(&format!("{prefix}.bias"))?);
        }
        Ok(conv)
    }

    fn gated(
        &self,
        prefix: &str,
        layer: GatedConv2d<B>,
    ) -> Result<GatedConv2d<B>, InpaintError> {
        Ok(GatedConv2d {
            feature_conv: self.conv2d(&format!("{prefix}.feature_conv"), layer.feature_conv)?,
            gate_conv: self.conv2d(&format!("{prefix}.gate_conv"), layer.gate_conv)?,
        })
    }
}

/// Walks every named parameter of a [`GatedUNet`].
trait ParameterVisitor<B: Backend> {
    fn visit<const D: usize>(
        &mut self,
        key: String,
        param: &Param<Tensor<B, D>>,
    );
}

struct ShapeCollector(ParameterLayout);

impl<B: Backend> ParameterVisitor<B> for ShapeCollector {
    fn visit<const D: usize>(
        &mut self,
        key: String,
        param: &Param<Tensor<B, D>>,
    ) {
        self.0.insert(key, param.dims().to_vec());
    }
}

struct DataCollector(ParameterMap);

impl<B: Backend> ParameterVisitor<B> for DataCollector {
    fn visit<const D: usize>(
        &mut self,
        key: String,
        param: &Param<Tensor<B, D>>,
    ) {
        self.0.insert(key, param.val().to_data());
    }
}

fn visit_conv2d<B: Backend, V: ParameterVisitor<B>>(
    visitor: &mut V,
    prefix: &str,
    conv: &Conv2d<B>,
) {
    visitor.visit(format!("{prefix}.weight"), &conv.weight);
    if let Some(bias) = &conv.bias {
        visitor.visit(format!("{prefix}.bias"), bias);
    }
}

fn visit_conv_transpose2d<B: Backend, V: ParameterVisitor<B>>(
    visitor: &mut V,
    prefix: &str,
    conv: &ConvTranspose2d<B>,
) {
    visitor.visit(format!("{prefix}.weight"), &conv.weight);
    if let Some(bias) = &conv.bias {
        visitor.visit(format!("{prefix}.bias"), bias);
    }
}

fn visit_gated<B: Backend, V: ParameterVisitor<B>>(
    visitor: &mut V,
    prefix: &str,
    layer: &GatedConv2d<B>,
) {
    visit_conv2d(visitor, &format!("{prefix}.feature_conv"), &layer.feature_conv);
    visit_conv2d(visitor, &format!("{prefix}.gate_conv"), &layer.gate_conv);
}

impl<B: Backend> GatedUNet<B> {
    fn visit_parameters<V: ParameterVisitor<B>>(
        &self,
        visitor: &mut V,
    ) {
        visit_gated(visitor, "enc1", &self.enc1);
        visit_gated(visitor, "enc2", &self.enc2);
        visit_gated(visitor, "enc3", &self.enc3);
        visit_gated(visitor, "bottleneck", &self.bottleneck);
        visit_conv_transpose2d(visitor, "up1", &self.up1);
        visit_gated(visitor, "dec1", &self.dec1);
        visit_conv_transpose2d(visitor, "up2", &self.up2);
        visit_gated(visitor, "dec2", &self.dec2);
        visit_conv2d(visitor, "output_conv", &self.output_conv);
    }

    /// The identifiers and live shapes of every parameter.
    pub fn parameter_shapes(&self) -> ParameterLayout {
        let mut collector = ShapeCollector(ParameterLayout::new());
        self.visit_parameters(&mut collector);
        collector.0
    }

    /// Export every parameter, keyed by identifier.
    ///
    /// Feeding the result to [`GatedUNetConfig::try_init_from_parameters`]
    /// reproduces this model exactly.
    pub fn to_parameters(&self) -> ParameterMap {
        let mut collector = DataCollector(ParameterMap::new());
        self.visit_parameters(&mut collector);
        collector.0
    }

    /// Check the live parameter shapes against a required layout.
    pub fn try_verify_parameters(
        &self,
        layout: &ParameterLayout,
    ) -> Result<(), InpaintError> {
        check_parameter_shapes(layout, &self.parameter_shapes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    fn tiny_config() -> GatedUNetConfig {
        GatedUNetConfig::new().with_widths([4, 8, 16])
    }

    #[test]
    fn test_default_parameter_layout() {
        let layout = GatedUNetConfig::new().parameter_layout();

        // 6 gated stages * 2 paths * (weight, bias) + 2 upsamples * 2 + output * 2.
        assert_eq!(layout.len(), 6 * 2 * 2 + 2 * 2 + 2);

        let get = |key: &str| layout.get(key).cloned().unwrap();
        assert_eq!(get("enc1.feature_conv.weight"), vec![64, 4, 3, 3]);
        assert_eq!(get("enc1.gate_conv.bias"), vec![64]);
        assert_eq!(get("enc3.gate_conv.weight"), vec![256, 128, 3, 3]);
        assert_eq!(get("bottleneck.feature_conv.weight"), vec![256, 256, 3, 3]);
        assert_eq!(get("up1.weight"), vec![256, 128, 4, 4]);
        assert_eq!(get("up1.bias"), vec![128]);
        assert_eq!(get("dec1.feature_conv.weight"), vec![128, 256, 3, 3]);
        assert_eq!(get("up2.weight"), vec![128, 64, 4, 4]);
        assert_eq!(get("dec2.gate_conv.weight"), vec![64, 128, 3, 3]);
        assert_eq!(get("output_conv.weight"), vec![3, 64, 3, 3]);
        assert_eq!(get("output_conv.bias"), vec![3]);
    }

    #[test]
    fn test_layout_matches_initialized_model() {
        let config = tiny_config();
        let model: GatedUNet<B> = config.init(&Default::default());

        assert_eq!(model.parameter_shapes(), config.parameter_layout());
        assert!(model.try_verify_parameters(&config.parameter_layout()).is_ok());
    }

    #[test]
    fn test_init_from_parameters_reproduces_model() {
        let device = Default::default();
        let config = tiny_config();
        let source: GatedUNet<B> = config.init(&device);
        let params = source.to_parameters();

        let a: GatedUNet<B> = config.try_init_from_parameters(&params, &device).unwrap();
        let b: GatedUNet<B> = config.try_init_from_parameters(&params, &device).unwrap();

        let image = Tensor::random([1, 3, 8, 8], Distribution::Default, &device);
        let mask = Tensor::ones([1, 1, 8, 8], &device);

        let expected = source.forward(image.clone(), mask.clone()).to_data();
        a.forward(image.clone(), mask.clone())
            .to_data()
            .assert_eq(&expected, true);
        b.forward(image, mask).to_data().assert_eq(&expected, true);
    }

    #[test]
    fn test_missing_parameter_is_named() {
        let device = Default::default();
        let config = tiny_config();
        let mut params = config.init::<B>(&device).to_parameters();
        params.remove("bottleneck.feature_conv.weight");

        let err = config
            .try_init_from_parameters::<B>(&params, &device)
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
        assert!(err.to_string().contains("bottleneck.feature_conv.weight"));
    }

    #[test]
    fn test_misshaped_parameter() {
        let device = Default::default();
        let config = tiny_config();
        let mut params = config.init::<B>(&device).to_parameters();
        params.insert(
            "dec1.gate_conv.weight".to_string(),
            TensorData::new(vec![0.0f32; 8 * 8 * 9], [8, 8, 3, 3]),
        );

        let err = config
            .try_init_from_parameters::<B>(&params, &device)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dec1.gate_conv.weight"), "{msg}");
        assert!(msg.contains("[8, 16, 3, 3]"), "{msg}");
    }

    #[test]
    fn test_unknown_parameter() {
        let device = Default::default();
        let config = tiny_config();
        let mut params = config.init::<B>(&device).to_parameters();
        params.insert(
            "enc4.feature_conv.weight".to_string(),
            TensorData::new(vec![0.0f32; 4], [4]),
        );

        let err = config
            .try_init_from_parameters::<B>(&params, &device)
            .unwrap_err();
        assert!(err.to_string().contains("unknown parameter `enc4.feature_conv.weight`"));
    }

    #[test]
    fn test_parameters_for_other_widths_are_rejected() {
        let device = Default::default();
        let params = tiny_config().init::<B>(&device).to_parameters();

        let err = GatedUNetConfig::new()
            .try_init_from_parameters::<B>(&params, &device)
            .unwrap_err();
        assert!(matches!(err, InpaintError::ParameterLoad(_)));
    }
}
