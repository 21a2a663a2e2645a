#![recursion_limit = "256"]

use anyhow::{anyhow, bail};
use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::Tensor;
use clap::Parser;
use gated_inpaint::cache;
use gated_inpaint::data::tensors::{
    full_mask, load_image_tensor, load_mask_tensor, tensor_to_rgb_image,
};
use gated_inpaint::models::gated_unet::pytorch::PyTorchLoadConfig;
use gated_inpaint::models::gated_unet::unet_model::RESOLUTION_DIVISOR;
use gated_inpaint::models::gated_unet::{GatedUNet, GatedUNetConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// $ --image=flower.jpg --mask=holes.png --weights=models/weights/unet_gated.pt
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image to inpaint.
    #[arg(long)]
    image: PathBuf,

    /// Hole mask; non-zero pixels are filled. Omit to fill the whole image.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Where to write the reconstruction.
    #[arg(long, default_value = "output.png")]
    output: PathBuf,

    /// Local ``torch`` checkpoint.
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Checkpoint URL, fetched through the disk cache.
    #[arg(long, conflicts_with = "weights")]
    weights_url: Option<String>,

    /// Checkpoint key holding the state dict, e.g. ``state_dict``.
    #[arg(long)]
    top_level_key: Option<String>,

    /// Square working resolution; must be divisible by 4.
    #[arg(long, default_value = "256")]
    resolution: usize,

    /// JSON model config; defaults to the baseline architecture.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    if args.resolution == 0 || args.resolution % RESOLUTION_DIVISOR != 0 {
        bail!(
            "--resolution={} must be a positive multiple of {RESOLUTION_DIVISOR}",
            args.resolution
        );
    }
    let resolution = [args.resolution, args.resolution];

    let config = match &args.config {
        Some(path) => GatedUNetConfig::load(path)
            .map_err(|e| anyhow!("failed to load {}: {e:?}", path.display()))?,
        None => GatedUNetConfig::new(),
    };

    let weights = match (&args.weights, &args.weights_url) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(url)) => Some(cache::fetch_model_weights(url)?),
        (None, None) => None,
    };

    let model: GatedUNet<B> = config.try_init(&device)?;
    let model = match weights {
        Some(path) => {
            tracing::info!("loading weights from {}", path.display());
            let options = PyTorchLoadConfig::new().with_top_level_key(args.top_level_key.clone());
            model.load_pytorch_weights_with(path, &options)?
        }
        None => {
            tracing::warn!("no checkpoint given; running with random parameters");
            model
        }
    };

    let image: Tensor<B, 4> = load_image_tensor(&args.image, resolution, &device)?.unsqueeze();
    let mask: Tensor<B, 4> = match &args.mask {
        Some(path) => load_mask_tensor(path, resolution, &device)?.unsqueeze(),
        None => full_mask(1, resolution, &device),
    };

    let output = model.try_forward(image, mask)?;
    let output = tensor_to_rgb_image(output.squeeze::<3>(0))?;

    output.save(&args.output)?;
    tracing::info!("saved reconstruction to {}", args.output.display());

    Ok(())
}
