//! # Image / Tensor Conversion
//!
//! Images are ``[3, height, width]`` RGB tensors scaled to ``[0, 1]``.
//! Masks are ``[1, height, width]`` tensors where ``1.0`` marks a hole.

use crate::error::InpaintError;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// Convert an image to a ``[3, height, width]`` tensor in ``[0, 1]``.
///
/// The image is resized to `resolution` (``[height, width]``) when it differs.
pub fn image_to_tensor<B: Backend>(
    image: &DynamicImage,
    resolution: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 3> {
    let [height, width] = resolution;
    let rgb = resize(image, resolution, FilterType::CatmullRom).to_rgb8();

    let values: Vec<f32> = rgb
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    Tensor::<B, 3>::from_data(TensorData::new(values, [height, width, 3]), device)
        .permute([2, 0, 1])
}

/// Convert a mask image to a ``[1, height, width]`` hole mask.
///
/// Any non-zero luma pixel is a hole (``1.0``); the rest are ``0.0``.
/// Resizing uses nearest-neighbour sampling so the mask stays binary.
pub fn mask_to_tensor<B: Backend>(
    mask: &DynamicImage,
    resolution: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 3> {
    let [height, width] = resolution;
    let luma = resize(mask, resolution, FilterType::Nearest).to_luma8();

    let values: Vec<f32> = luma
        .into_raw()
        .into_iter()
        .map(|v| if v > 0 { 1.0 } else { 0.0 })
        .collect();

    Tensor::from_data(TensorData::new(values, [1, height, width]), device)
}

fn resize(
    image: &DynamicImage,
    [height, width]: [usize; 2],
    filter: FilterType,
) -> DynamicImage {
    if image.width() as usize == width && image.height() as usize == height {
        image.clone()
    } else {
        image.resize_exact(width as u32, height as u32, filter)
    }
}

/// Decode an image file into a ``[3, height, width]`` tensor.
pub fn load_image_tensor<B: Backend>(
    path: impl AsRef<Path>,
    resolution: [usize; 2],
    device: &B::Device,
) -> Result<Tensor<B, 3>, InpaintError> {
    let image = image::open(path)?;
    Ok(image_to_tensor(&image, resolution, device))
}

/// Decode a mask file into a ``[1, height, width]`` hole mask.
pub fn load_mask_tensor<B: Backend>(
    path: impl AsRef<Path>,
    resolution: [usize; 2],
    device: &B::Device,
) -> Result<Tensor<B, 3>, InpaintError> {
    let mask = image::open(path)?;
    Ok(mask_to_tensor(&mask, resolution, device))
}

/// A ``[batch, 1, height, width]`` mask marking every pixel as a hole.
pub fn full_mask<B: Backend>(
    batch: usize,
    resolution: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 4> {
    let [height, width] = resolution;
    Tensor::ones([batch, 1, height, width], device)
}

/// Convert a ``[3, height, width]`` tensor back to an RGB image.
///
/// Values are clamped to ``[0, 1]`` before quantization.
pub fn tensor_to_rgb_image<B: Backend>(tensor: Tensor<B, 3>) -> Result<RgbImage, InpaintError> {
    let [channels, height, width] = tensor.dims();
    if channels != 3 {
        return Err(InpaintError::shape_mismatch("rgb image channels", 3, channels));
    }

    let data = tensor
        .clamp(0.0, 1.0)
        .permute([1, 2, 0])
        .to_data()
        .convert::<f32>();
    let values = data
        .to_vec::<f32>()
        .map_err(|e| InpaintError::Shape(format!("rgb image data: {e:?}")))?;

    let bytes: Vec<u8> = values
        .into_iter()
        .map(|v| (v * 255.0).round() as u8)
        .collect();

    RgbImage::from_raw(width as u32, height as u32, bytes)
        .ok_or_else(|| InpaintError::Shape(format!("rgb image buffer for [{height}, {width}]")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{GrayImage, Luma, Rgb};

    type B = NdArray<f32>;

    #[test]
    fn test_image_to_tensor_layout() {
        let device = Default::default();
        let mut rgb = RgbImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        rgb.put_pixel(2, 1, Rgb([255, 51, 0]));

        let tensor: Tensor<B, 3> =
            image_to_tensor(&DynamicImage::ImageRgb8(rgb), [2, 3], &device);
        assert_eq!(tensor.dims(), [3, 2, 3]);

        let values = tensor.to_data().to_vec::<f32>().unwrap();
        let at = |c: usize, y: usize, x: usize| values[c * 6 + y * 3 + x];
        assert_eq!(at(0, 1, 2), 1.0);
        assert!((at(1, 1, 2) - 0.2).abs() < 1e-6);
        assert_eq!(at(2, 1, 2), 0.0);
        assert_eq!(at(0, 0, 0), 0.0);
        assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_image_to_tensor_resizes() {
        let device = Default::default();
        let rgb = RgbImage::from_pixel(10, 7, Rgb([128, 128, 128]));

        let tensor: Tensor<B, 3> =
            image_to_tensor(&DynamicImage::ImageRgb8(rgb), [8, 4], &device);
        assert_eq!(tensor.dims(), [3, 8, 4]);
    }

    #[test]
    fn test_mask_is_binary() {
        let device = Default::default();
        let mut gray = GrayImage::from_pixel(4, 4, Luma([0]));
        gray.put_pixel(1, 1, Luma([3]));
        gray.put_pixel(2, 3, Luma([255]));

        let mask: Tensor<B, 3> = mask_to_tensor(&DynamicImage::ImageLuma8(gray), [4, 4], &device);
        assert_eq!(mask.dims(), [1, 4, 4]);

        let values = mask.to_data().to_vec::<f32>().unwrap();
        assert_eq!(values.iter().filter(|&&v| v == 1.0).count(), 2);
        assert_eq!(values[4 + 1], 1.0);
        assert_eq!(values[3 * 4 + 2], 1.0);
        assert!(values.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_image_round_trip_through_tensor() {
        let device = Default::default();
        let mut rgb = RgbImage::new(5, 4);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 50) as u8, (y * 60) as u8, 7]);
        }

        let tensor: Tensor<B, 3> =
            image_to_tensor(&DynamicImage::ImageRgb8(rgb.clone()), [4, 5], &device);
        let restored = tensor_to_rgb_image(tensor).unwrap();
        assert_eq!(restored, rgb);
    }

    #[test]
    fn test_tensor_to_rgb_image_rejects_channels() {
        let device = Default::default();
        let err = tensor_to_rgb_image::<B>(Tensor::zeros([1, 4, 4], &device)).unwrap_err();
        assert!(matches!(err, InpaintError::Shape(_)));
    }

    #[test]
    fn test_load_files() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();

        let image_path = dir.path().join("image.png");
        RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]))
            .save(&image_path)
            .unwrap();
        let mask_path = dir.path().join("mask.png");
        GrayImage::from_pixel(8, 8, Luma([255]))
            .save(&mask_path)
            .unwrap();

        let image: Tensor<B, 3> = load_image_tensor(&image_path, [8, 8], &device).unwrap();
        assert_eq!(image.dims(), [3, 8, 8]);

        let mask: Tensor<B, 3> = load_mask_tensor(&mask_path, [4, 4], &device).unwrap();
        mask.to_data()
            .assert_eq(&Tensor::<B, 3>::ones([1, 4, 4], &device).to_data(), true);

        let err = load_image_tensor::<B>(dir.path().join("absent.png"), [8, 8], &device)
            .unwrap_err();
        assert!(matches!(err, InpaintError::Image(_)));

        assert_eq!(full_mask::<B>(2, [4, 6], &device).dims(), [2, 1, 4, 6]);
    }
}
