use crate::error::{DetectorError, Result};
use crate::models::image_types::{EncodedImage, TensorPayload};
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;

pub const INPUT_SIZE: u32 = 224;

/// Largest canvas side accepted; keeps `3 * size * size` well inside `usize`.
pub const MAX_INPUT_SIZE: u32 = 4096;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes the bytes behind an encoded image into a raster.
pub fn decode_raster(image: &EncodedImage) -> Result<DynamicImage> {
    let bytes = image.decode_bytes()?;
    image::load_from_memory(&bytes).map_err(|e| {
        DetectorError::decode(format!("Image loading/decoding failed ({}): {}", image.mime_type, e))
    })
}

/// Stretches the raster onto a `size`x`size` canvas and returns a normalized
/// NCHW tensor of shape (1, 3, size, size). Alpha is discarded.
pub fn preprocess(img: &DynamicImage, size: u32) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || size == 0 || size > MAX_INPUT_SIZE {
        return Err(DetectorError::decode(format!(
            "Cannot draw a {}x{} image onto a {}x{} canvas",
            w, h, size, size
        )));
    }

    let canvas = img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgba8();

    // Planar layout: every red value, then every green, then every blue.
    let hw = size as usize * size as usize;
    let mut data = vec![0f32; 3 * hw];
    for (p, pixel) in canvas.as_raw().chunks_exact(4).enumerate() {
        data[p] = (pixel[0] as f32 / 255.0 - MEAN[0]) / STD[0];
        data[hw + p] = (pixel[1] as f32 / 255.0 - MEAN[1]) / STD[1];
        data[2 * hw + p] = (pixel[2] as f32 / 255.0 - MEAN[2]) / STD[2];
    }

    Array4::from_shape_vec((1, 3, size as usize, size as usize), data)
        .map_err(|e| DetectorError::decode(format!("Failed to create tensor: {}", e)))
}

/// Flattens a tensor for the trip to the page context.
pub fn to_payload(tensor: &Array4<f32>) -> TensorPayload {
    TensorPayload {
        data: tensor.iter().copied().collect(),
        width: tensor.shape()[3] as u32,
    }
}

/// Rebuilds the (1, 3, w, w) tensor on the receiving side.
pub fn from_payload(payload: TensorPayload) -> Result<Array4<f32>> {
    let w = payload.width as usize;
    Array4::from_shape_vec((1, 3, w, w), payload.data).map_err(|e| {
        DetectorError::inference(format!("Tensor payload does not match shape (1, 3, {w}, {w}): {e}"))
    })
}
