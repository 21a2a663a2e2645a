//! # `GatedConv2d` Module
//!
//! A [`GatedConv2d`] runs two parallel [`Conv2d`] layers over the same input:
//! a feature path, and a gate path squashed through a sigmoid.
//!
//! ```text
//! out = feature_conv(x) * sigmoid(gate_conv(x))
//! ```
//!
//! The learned gate decides, per pixel and channel, how much of the
//! feature response to pass; which lets masked (meaningless) input
//! regions be suppressed without hand-coded masking logic.
//!
//! [`GatedConv2dConfig`] implements [`Config`], and provides
//! [`GatedConv2dConfig::try_init`] to initialize a [`GatedConv2d`].

use crate::compat::conv_shape::maybe_conv_output_shape;
use crate::error::{InpaintError, expect_ok};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::sigmoid;

/// [`GatedConv2d`] Meta.
pub trait GatedConv2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Square kernel size.
    fn kernel_size(&self) -> usize;

    /// Stride, applied to both spatial axes.
    fn stride(&self) -> usize;

    /// Zero padding, applied to all four sides.
    fn padding(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``; or `None` if the kernel does not fit.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        maybe_conv_output_shape(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
            1,
        )
    }
}

/// [`GatedConv2d`] Config.
///
/// Implements [`GatedConv2dMeta`].
#[derive(Config, Debug)]
pub struct GatedConv2dConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Square kernel size.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Stride of both convolutions.
    #[config(default = 1)]
    pub stride: usize,

    /// Zero padding of both convolutions.
    ///
    /// Must satisfy ``2 * padding + 1 == kernel_size``.
    #[config(default = 1)]
    pub padding: usize,

    /// Whether the convolutions carry a bias.
    #[config(default = true)]
    pub bias: bool,
}

impl GatedConv2dMeta for GatedConv2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> usize {
        self.padding
    }
}

impl GatedConv2dConfig {
    /// Check that the config preserves the gated block shape contract.
    ///
    /// Stride-1 blocks must preserve ``[H, W]`` exactly, so the padding
    /// must be "same" padding for the kernel; stride-`s` blocks then map
    /// ``H`` to ``ceil(H / s)``.
    pub fn try_validate(&self) -> Result<(), InpaintError> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(InpaintError::Config(format!(
                "gated conv channels must be > 0: [{}, {}]",
                self.in_channels, self.out_channels
            )));
        }
        if self.kernel_size == 0 || self.stride == 0 {
            return Err(InpaintError::Config(format!(
                "gated conv kernel_size({}) and stride({}) must be > 0",
                self.kernel_size, self.stride
            )));
        }
        if 2 * self.padding + 1 != self.kernel_size {
            return Err(InpaintError::Config(format!(
                "gated conv padding({}) does not preserve resolution for kernel_size({})",
                self.padding, self.kernel_size
            )));
        }
        Ok(())
    }

    /// The [`Conv2dConfig`] shared by the feature and gate paths.
    pub fn conv_config(&self) -> Conv2dConfig {
        Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_bias(self.bias)
    }

    /// Initialize a [`GatedConv2d`].
    ///
    /// The feature and gate paths are initialized independently.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<GatedConv2d<B>, InpaintError> {
        self.try_validate()?;

        let conv = self.conv_config();
        Ok(GatedConv2d {
            feature_conv: conv.init(device),
            gate_conv: conv.init(device),
        })
    }

    /// Initialize a [`GatedConv2d`].
    ///
    /// This is the ``panic``-ing variant of [`GatedConv2dConfig::try_init`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GatedConv2d<B> {
        expect_ok(self.try_init(device))
    }
}

/// Gated convolution layer.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, out_channels, out_height, out_width]``.
///
/// Implements [`GatedConv2dMeta`].
#[derive(Module, Debug)]
pub struct GatedConv2d<B: Backend> {
    /// Feature path.
    pub feature_conv: Conv2d<B>,

    /// Gate path; same shape as the feature path, separately parameterized.
    pub gate_conv: Conv2d<B>,
}

impl<B: Backend> GatedConv2dMeta for GatedConv2d<B> {
    fn in_channels(&self) -> usize {
        self.feature_conv.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.feature_conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> usize {
        self.feature_conv.kernel_size[0]
    }

    fn stride(&self) -> usize {
        self.feature_conv.stride[0]
    }

    fn padding(&self) -> usize {
        match &self.feature_conv.padding.0 {
            PaddingConfig2d::Explicit(height, _) => *height,
            PaddingConfig2d::Valid => 0,
            PaddingConfig2d::Same => self.kernel_size() / 2,
        }
    }
}

impl<B: Backend> GatedConv2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    ///
    /// # Panics
    ///
    /// On any shape mismatch; see [`GatedConv2d::try_forward`].
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        expect_ok(self.try_forward(input))
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``; or an
    /// [`InpaintError::Shape`] if the input channels do not match.
    pub fn try_forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, InpaintError> {
        self.try_forward_with_gate(input).map(|(output, _)| output)
    }

    /// Forward Pass, also returning the gate.
    ///
    /// ```rust,ignore
    /// let feature = self.feature_conv.forward(input);
    /// let gate = sigmoid(self.gate_conv.forward(input));
    /// return (feature * gate, gate)
    /// ```
    ///
    /// # Returns
    ///
    /// ``(output, gate)``, both ``[batch, out_channels, out_height, out_width]``.
    pub fn try_forward_with_gate(
        &self,
        input: Tensor<B, 4>,
    ) -> Result<(Tensor<B, 4>, Tensor<B, 4>), InpaintError> {
        let [batch, in_channels, in_height, in_width] = input.dims();
        if in_channels != self.in_channels() {
            return Err(InpaintError::shape_mismatch(
                "gated conv input channels",
                self.in_channels(),
                in_channels,
            ));
        }
        let [out_height, out_width] = self
            .output_resolution([in_height, in_width])
            .ok_or_else(|| {
                InpaintError::Shape(format!(
                    "gated conv: no legal output resolution for input [{in_height}, {in_width}]"
                ))
            })?;

        let feature = self.feature_conv.forward(input.clone());
        let gate = sigmoid(self.gate_conv.forward(input));
        let output = feature * gate.clone();

        run_every_nth!({
            static CONTRACT: ShapeContract =
                shape_contract!["batch", "out_channels", "out_height", "out_width"];
            CONTRACT.assert_shape(
                &output,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_height", out_height),
                    ("out_width", out_width),
                ],
            );
        });

        Ok((output, gate))
    }
}
