use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

/// Pixels trimmed from each edge of the client area before OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropMargin {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for CropMargin {
    fn default() -> Self {
        Self {
            left: 4,
            top: 0,
            right: 4,
            bottom: 4,
        }
    }
}

/// Crop the margin, convert to grayscale and upsample by `scale`.
pub fn prepare_for_ocr(image: &DynamicImage, margin: CropMargin, scale: u32) -> Result<GrayImage> {
    let width = image
        .width()
        .saturating_sub(margin.left.saturating_add(margin.right));
    let height = image
        .height()
        .saturating_sub(margin.top.saturating_add(margin.bottom));

    if width == 0 || height == 0 {
        bail!(
            "capture of {}x{} is smaller than the crop margin",
            image.width(),
            image.height()
        );
    }

    let cropped = image.crop_imm(margin.left, margin.top, width, height);
    let gray = cropped.to_luma8();

    let scale = scale.max(1);
    if scale == 1 {
        return Ok(gray);
    }

    Ok(image::imageops::resize(
        &gray,
        width * scale,
        height * scale,
        FilterType::CatmullRom,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn crops_then_doubles_dimensions() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(108, 54, Rgba([200, 10, 10, 255])));
        let prepared = prepare_for_ocr(&source, CropMargin::default(), 2).unwrap();

        assert_eq!(prepared.width(), (108 - 8) * 2);
        assert_eq!(prepared.height(), (54 - 4) * 2);
    }

    #[test]
    fn output_is_single_channel() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255])));
        let prepared = prepare_for_ocr(&source, CropMargin::default(), 1).unwrap();
        assert!(prepared.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn rejects_images_smaller_than_margin() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(6, 3));
        assert!(prepare_for_ocr(&source, CropMargin::default(), 2).is_err());
    }
}
