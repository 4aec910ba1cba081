//! Fixed preprocessing pipeline.
//!
//! decode -> single-channel grayscale -> 28x28 bicubic resize -> divide by 255
//! -> tensor of shape (1, 28, 28, 1). Grayscale uses the ITU-R 601-2 luma
//! weights the training data was produced with.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

use crate::error::{OcrError, Result};
use crate::model::Tensor4;

/// Side of the square model input
pub const IMAGE_SIZE: usize = 28;

pub const fn input_shape() -> [usize; 4] {
    [1, IMAGE_SIZE, IMAGE_SIZE, 1]
}

/// Decode uploaded bytes
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(OcrError::DecodeError("empty upload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| OcrError::DecodeError(e.to_string()))
}

/// ITU-R 601-2 luma: L = R * 299/1000 + G * 587/1000 + B * 114/1000
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(_) => img.to_luma8(),
        _ => {
            let rgb = img.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
                Luma([l.min(255) as u8])
            })
        }
    }
}

/// Run the fixed pipeline on a decoded image
pub fn preprocess(img: &DynamicImage) -> Result<Tensor4> {
    let gray = to_grayscale(img);
    let resized = imageops::resize(&gray, IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::CatmullRom);
    let data: Vec<f32> = resized.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
    Tensor4::new(input_shape(), data)
        .ok_or_else(|| OcrError::DecodeError("resize produced an unexpected size".to_string()))
}

/// Decode and preprocess uploaded bytes
pub fn preprocess_bytes(bytes: &[u8]) -> Result<Tensor4> {
    preprocess(&decode(bytes)?)
}
