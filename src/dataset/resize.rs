use std::fmt;

use image::{imageops, ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FilterType {
    #[default]
    Triangle,
    Nearest,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filter_str = match self {
            FilterType::Triangle => "triangle",
            FilterType::Nearest => "nearest",
            FilterType::CatmullRom => "catmull-rom",
            FilterType::Gaussian => "gaussian",
            FilterType::Lanczos3 => "lanczos3",
        };
        write!(f, "{filter_str}")
    }
}

impl From<FilterType> for imageops::FilterType {
    fn from(filter: FilterType) -> Self {
        match filter {
            FilterType::Nearest => imageops::FilterType::Nearest,
            FilterType::Triangle => imageops::FilterType::Triangle,
            FilterType::CatmullRom => imageops::FilterType::CatmullRom,
            FilterType::Gaussian => imageops::FilterType::Gaussian,
            FilterType::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Resample a windowed slice with values in [0, 1] to `(rows, columns)`.
/// Returns `None` for an empty input or target.
pub fn resize_image(
    image: ArrayView2<f32>,
    (rows, columns): (u32, u32),
    filter: FilterType,
) -> Option<Array2<f32>> {
    let (height, width) = image.dim();
    if height == 0 || width == 0 || rows == 0 || columns == 0 {
        return None;
    }
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(width as u32, height as u32, image.iter().copied().collect())?;
    let resized = imageops::resize(&buffer, columns, rows, filter.into());
    Array2::from_shape_vec((rows as usize, columns as usize), resized.into_raw()).ok()
}

/// Resample a binary mask slice to `(rows, columns)` with nearest neighbour, so it stays binary.
pub fn resize_mask(mask: ArrayView2<u8>, (rows, columns): (u32, u32)) -> Option<Array2<u8>> {
    let (height, width) = mask.dim();
    if height == 0 || width == 0 || rows == 0 || columns == 0 {
        return None;
    }
    let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width as u32, height as u32, mask.iter().copied().collect())?;
    let resized = imageops::resize(&buffer, columns, rows, imageops::FilterType::Nearest);
    Array2::from_shape_vec((rows as usize, columns as usize), resized.into_raw()).ok()
}
