//! Loading and preprocessing of input images for the DINOv2 models.
//! The conversion mirrors the DINOv2 image processor: shortest edge to 256,
//! center crop to 224, rescale to 0-1, then ImageNet normalization.

use std::path::Path;
use image::error::{LimitError, LimitErrorKind};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageError, ImageReader};
use ndarray::{Array, Dim};

use crate::error::Error;

pub const RESIZE_SHORTEST_EDGE: u32 = 256;
pub const IMAGE_INPUT_SIZE: usize = 224;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Opens the image at `path`, guessing its format from its contents, and converts it to RGB.
pub fn load_image(path: &Path) -> Result<DynamicImage, Error>
{
	decode(path)
		.map(|img| DynamicImage::ImageRgb8(img.into_rgb8()))
		.map_err(|source| Error::ImageOpen { path: path.to_path_buf(), source })
}

fn decode(path: &Path) -> Result<DynamicImage, ImageError>
{
	let img = ImageReader::open(path)?
		.with_guessed_format()?
		.decode()?;

	if img.width() == 0 || img.height() == 0
	{
		return Err(ImageError::Limits(LimitError::from_kind(LimitErrorKind::DimensionError)));
	}
	Ok(img)
}

/// Longest edge we are willing to resize to. Anything longer comes from an extreme
/// aspect ratio (e.g. a 1 px wide strip) and would need hundreds of megabytes.
pub const MAX_RESIZED_EDGE: u32 = 16_384;

/// The size of an image after scaling its shortest edge to `RESIZE_SHORTEST_EDGE`.
/// The long edge is truncated, as the reference processor does.
/// Returns `None` when the long edge would exceed `MAX_RESIZED_EDGE`.
pub fn resize_dimensions(width: u32, height: u32) -> Option<(u32, u32)>
{
	let (short, long) = if width <= height { (width, height) } else { (height, width) };
	if short == 0
	{
		return None;
	}

	let scaled_long = RESIZE_SHORTEST_EDGE as u64 * long as u64 / short as u64;
	if scaled_long > MAX_RESIZED_EDGE as u64
	{
		return None;
	}
	let scaled_long = scaled_long as u32;

	if width <= height
	{
		Some((RESIZE_SHORTEST_EDGE, scaled_long))
	}
	else
	{
		Some((scaled_long, RESIZE_SHORTEST_EDGE))
	}
}

/// Resizes and center-crops the image to the model's square input size.
pub fn resize_and_crop(img: &DynamicImage) -> anyhow::Result<DynamicImage>
{
	let (width, height) = resize_dimensions(img.width(), img.height())
		.ok_or_else(|| anyhow::anyhow!("cannot resize a {}x{} image: aspect ratio too extreme", img.width(), img.height()))?;
	let resized = img.resize_exact(width, height, FilterType::CatmullRom);

	// Both edges are at least RESIZE_SHORTEST_EDGE, which is larger than the crop.
	let crop = IMAGE_INPUT_SIZE as u32;
	let left = (width - crop) / 2;
	let top = (height - crop) / 2;
	Ok(resized.crop_imm(left, top, crop, crop))
}

// Convert the image to the normalized NCHW array expected by DINOv2, with a batch of one.
pub fn image_to_model_input(img: &DynamicImage) -> anyhow::Result<Array<f32, Dim<[usize; 4]>>>
{
	let img = resize_and_crop(img)?;

	let mut image_input = Array::zeros((1, 3, IMAGE_INPUT_SIZE, IMAGE_INPUT_SIZE));
	for pixel in img.pixels() {
		let x = pixel.0 as usize;
		let y = pixel.1 as usize;
		let [r, g, b, _] = pixel.2.0;
		for (channel, value) in [r, g, b].into_iter().enumerate()
		{
			image_input[[0, channel, y, x]] = ((value as f32) / 255. - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
		}
	}

	Ok(image_input)
}
