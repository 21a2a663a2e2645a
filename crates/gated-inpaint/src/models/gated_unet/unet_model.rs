//! # Gated U-Net Core Model
//!
//! [`GatedUNet`] maps a partial image and a hole mask to a reconstructed image.
//!
//! ```text
//! x  = cat([image, mask])                      [B, 4, H, W]
//! e1 = enc1(x)                                 [B, w0, H, W]
//! e2 = enc2(e1)           /2                   [B, w1, H/2, W/2]
//! e3 = enc3(e2)           /2                   [B, w2, H/4, W/4]
//! b  = bottleneck(e3)                          [B, w2, H/4, W/4]
//! d1 = dec1(cat([up1(b), e2]))                 [B, w1, H/2, W/2]
//! d2 = dec2(cat([up2(d1), e1]))                [B, w0, H, W]
//! y  = sigmoid(output_conv(d2))                [B, 3, H, W]
//! ```
//!
//! ``H`` and ``W`` must be divisible by 4; nothing is padded or resized.

use crate::compat::conv_shape::maybe_conv_transpose1d_output_size;
use crate::error::{InpaintError, expect_ok};
use crate::layers::blocks::gated_conv::{GatedConv2d, GatedConv2dConfig, GatedConv2dMeta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::sigmoid;

/// Spatial divisor every input resolution must honor.
pub const RESOLUTION_DIVISOR: usize = 4;

/// [`GatedUNet`] Config.
///
/// The defaults are the baseline architecture; the parameter layout
/// of [`GatedUNetConfig::parameter_layout`] is derived from these.
#[derive(Config, Debug)]
pub struct GatedUNetConfig {
    /// Channels of the image input, and of the reconstruction.
    #[config(default = 3)]
    pub image_channels: usize,

    /// Channels of the hole mask.
    #[config(default = 1)]
    pub mask_channels: usize,

    /// Encoder stage widths, ``[enc1, enc2, enc3]``.
    ///
    /// The bottleneck keeps ``enc3``'s width; decoders mirror ``enc2`` and ``enc1``.
    #[config(default = "[64, 128, 256]")]
    pub widths: [usize; 3],

    /// Kernel size of the learned stride-2 upsampling.
    ///
    /// Must be even; padding is ``(kernel - 2) / 2`` so the output is exactly doubled.
    #[config(default = 4)]
    pub upsample_kernel_size: usize,
}

impl GatedUNetConfig {
    /// Channels of the concatenated ``[image, mask]`` input.
    pub fn input_channels(&self) -> usize {
        self.image_channels + self.mask_channels
    }

    /// Check that the config builds a consistent network.
    pub fn try_validate(&self) -> Result<(), InpaintError> {
        if self.image_channels == 0 || self.mask_channels == 0 {
            return Err(InpaintError::Config(format!(
                "image_channels({}) and mask_channels({}) must be > 0",
                self.image_channels, self.mask_channels
            )));
        }
        if self.widths.contains(&0) {
            return Err(InpaintError::Config(format!(
                "stage widths must be > 0: {:?}",
                self.widths
            )));
        }
        if self.upsample_kernel_size < 2 || self.upsample_kernel_size % 2 != 0 {
            return Err(InpaintError::Config(format!(
                "upsample_kernel_size({}) must be even and >= 2",
                self.upsample_kernel_size
            )));
        }
        for (_, stage) in self.gated_stages() {
            stage.try_validate()?;
        }
        Ok(())
    }

    /// Encoder stage 1; stride 1.
    pub fn enc1(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(self.input_channels(), self.widths[0])
    }

    /// Encoder stage 2; stride 2.
    pub fn enc2(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(self.widths[0], self.widths[1]).with_stride(2)
    }

    /// Encoder stage 3; stride 2.
    pub fn enc3(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(self.widths[1], self.widths[2]).with_stride(2)
    }

    /// Bottleneck; stride 1.
    pub fn bottleneck(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(self.widths[2], self.widths[2])
    }

    /// Decoder stage 1; input is ``cat([up1(b), e2])``.
    pub fn dec1(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(2 * self.widths[1], self.widths[1])
    }

    /// Decoder stage 2; input is ``cat([up2(d1), e1])``.
    pub fn dec2(&self) -> GatedConv2dConfig {
        GatedConv2dConfig::new(2 * self.widths[0], self.widths[0])
    }

    /// All gated stages, in forward order, keyed by layer identifier.
    pub fn gated_stages(&self) -> [(&'static str, GatedConv2dConfig); 6] {
        [
            ("enc1", self.enc1()),
            ("enc2", self.enc2()),
            ("enc3", self.enc3()),
            ("bottleneck", self.bottleneck()),
            ("dec1", self.dec1()),
            ("dec2", self.dec2()),
        ]
    }

    fn upsample(
        &self,
        in_channels: usize,
        out_channels: usize,
    ) -> ConvTranspose2dConfig {
        let kernel = self.upsample_kernel_size;
        let padding = kernel.saturating_sub(2) / 2;
        ConvTranspose2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([2, 2])
            .with_padding([padding, padding])
    }

    /// Decoder upsample 1; ``w2 -> w1``, doubles the resolution.
    pub fn up1(&self) -> ConvTranspose2dConfig {
        self.upsample(self.widths[2], self.widths[1])
    }

    /// Decoder upsample 2; ``w1 -> w0``, doubles the resolution.
    pub fn up2(&self) -> ConvTranspose2dConfig {
        self.upsample(self.widths[1], self.widths[0])
    }

    /// Output projection; plain 3x3 conv, ``w0 -> image_channels``.
    pub fn output_conv(&self) -> Conv2dConfig {
        Conv2dConfig::new([self.widths[0], self.image_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
    }

    /// Initialize a [`GatedUNet`] with fresh random parameters.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<GatedUNet<B>, InpaintError> {
        self.try_validate()?;
        tracing::debug!(widths = ?self.widths, "initializing gated unet");

        Ok(GatedUNet {
            enc1: self.enc1().try_init(device)?,
            enc2: self.enc2().try_init(device)?,
            enc3: self.enc3().try_init(device)?,
            bottleneck: self.bottleneck().try_init(device)?,
            up1: self.up1().init(device),
            dec1: self.dec1().try_init(device)?,
            up2: self.up2().init(device),
            dec2: self.dec2().try_init(device)?,
            output_conv: self.output_conv().init(device),
        })
    }

    /// Initialize a [`GatedUNet`] with fresh random parameters.
    ///
    /// This is the ``panic``-ing variant of [`GatedUNetConfig::try_init`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GatedUNet<B> {
        expect_ok(self.try_init(device))
    }
}

/// Gated-convolution U-Net for image inpainting.
///
/// Holds no state besides its parameters; every forward call is independent.
#[derive(Module, Debug)]
pub struct GatedUNet<B: Backend> {
    /// Encoder stage 1.
    pub enc1: GatedConv2d<B>,
    /// Encoder stage 2.
    pub enc2: GatedConv2d<B>,
    /// Encoder stage 3.
    pub enc3: GatedConv2d<B>,

    /// Bottleneck.
    pub bottleneck: GatedConv2d<B>,

    /// Decoder upsample 1.
    pub up1: ConvTranspose2d<B>,
    /// Decoder stage 1.
    pub dec1: GatedConv2d<B>,
    /// Decoder upsample 2.
    pub up2: ConvTranspose2d<B>,
    /// Decoder stage 2.
    pub dec2: GatedConv2d<B>,

    /// Output projection.
    pub output_conv: Conv2d<B>,
}

impl<B: Backend> GatedUNet<B> {
    /// Channels of the image input, and of the reconstruction.
    pub fn image_channels(&self) -> usize {
        self.output_conv.weight.shape().dims[0]
    }

    /// Channels of the hole mask.
    pub fn mask_channels(&self) -> usize {
        self.enc1.in_channels() - self.image_channels()
    }

    /// Forward Pass.
    ///
    /// # Panics
    ///
    /// On any shape mismatch; see [`GatedUNet::try_forward`].
    pub fn forward(
        &self,
        image: Tensor<B, 4>,
        mask: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        expect_ok(self.try_forward(image, mask))
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `image`: ``[batch, image_channels, height, width]``.
    /// - `mask`: ``[batch, mask_channels, height, width]``.
    ///
    /// ``height`` and ``width`` must be divisible by [`RESOLUTION_DIVISOR`];
    /// other sizes fail at the first skip concatenation.
    ///
    /// # Returns
    ///
    /// ``[batch, image_channels, height, width]``, every value in ``(0, 1)``.
    pub fn try_forward(
        &self,
        image: Tensor<B, 4>,
        mask: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, InpaintError> {
        let [batch, image_channels, height, width] = image.dims();
        if image_channels != self.image_channels() {
            return Err(InpaintError::shape_mismatch(
                "image channels",
                self.image_channels(),
                image_channels,
            ));
        }
        let expected_mask = [batch, self.mask_channels(), height, width];
        if mask.dims() != expected_mask {
            return Err(InpaintError::shape_mismatch(
                "mask shape",
                expected_mask,
                mask.dims(),
            ));
        }

        let x = Tensor::cat(vec![image, mask], 1);

        let e1 = self.enc1.try_forward(x)?;
        let e2 = self.enc2.try_forward(e1.clone())?;
        let e3 = self.enc3.try_forward(e2.clone())?;

        let b = self.bottleneck.try_forward(e3)?;

        let d1 = try_skip_concat("dec1", self.up1.forward(b), e2)?;
        let d1 = self.dec1.try_forward(d1)?;

        let d2 = try_skip_concat("dec2", self.up2.forward(d1), e1)?;
        let d2 = self.dec2.try_forward(d2)?;

        let out = sigmoid(self.output_conv.forward(d2));

        run_every_nth!({
            static CONTRACT: ShapeContract =
                shape_contract!["batch", "channels", "height", "width"];
            CONTRACT.assert_shape(
                &out,
                &[
                    ("batch", batch),
                    ("channels", self.image_channels()),
                    ("height", height),
                    ("width", width),
                ],
            );
        });

        Ok(out)
    }
}

/// Concatenate a decoder's upsampled tensor with its encoder skip tensor.
///
/// The upsampled tensor comes first on the channel axis.
///
/// # Returns
///
/// ``[batch, up_channels + skip_channels, height, width]``; or an
/// [`InpaintError::Shape`] if batch or resolution differ.
fn try_skip_concat<B: Backend>(
    stage: &str,
    upsampled: Tensor<B, 4>,
    skip: Tensor<B, 4>,
) -> Result<Tensor<B, 4>, InpaintError> {
    let [up_batch, _, up_height, up_width] = upsampled.dims();
    let [skip_batch, _, skip_height, skip_width] = skip.dims();

    if [up_batch, up_height, up_width] != [skip_batch, skip_height, skip_width] {
        return Err(InpaintError::Shape(format!(
            "{stage} skip connection: upsampled {:?} does not match encoder {:?}; \
             input height and width must be divisible by {RESOLUTION_DIVISOR}",
            upsampled.dims(),
            skip.dims(),
        )));
    }

    Ok(Tensor::cat(vec![upsampled, skip], 1))
}

/// Check whether an input resolution survives both skip concatenations.
///
/// Mirrors the stage arithmetic of [`GatedUNet::try_forward`] without running it.
pub fn is_supported_resolution(
    config: &GatedUNetConfig,
    resolution: [usize; 2],
) -> bool {
    let kernel = config.upsample_kernel_size;
    let padding = kernel.saturating_sub(2) / 2;
    let up = |x: usize| maybe_conv_transpose1d_output_size(x, kernel, 2, padding, 0, 1);

    resolution.iter().all(|&size| {
        let Some(e1) = config.enc1().output_resolution([size, size]) else {
            return false;
        };
        let Some(e2) = config.enc2().output_resolution(e1) else {
            return false;
        };
        let Some(e3) = config.enc3().output_resolution(e2) else {
            return false;
        };
        up(e3[0]) == Some(e2[0]) && up(e2[0]) == Some(e1[0])
    })
}
