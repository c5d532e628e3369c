//! Tensor helpers shared by the ONNX backends

use crate::error::{PerceptionError, Result};
use image::{imageops, RgbImage};

/// Resize to `target_width x target_height` and lay out as `[3, H, W]`
/// floats scaled to `[0, 1]`
pub fn rgb_to_chw_tensor(image: &RgbImage, target_width: u32, target_height: u32) -> Result<Vec<f32>> {
    if target_width == 0 || target_height == 0 {
        return Err(PerceptionError::Model("target dimensions cannot be zero".to_string()));
    }
    let plane = (target_width as usize)
        .checked_mul(target_height as usize)
        .filter(|p| *p <= 100_000_000 / 3)
        .ok_or_else(|| PerceptionError::Model("target dimensions too large".to_string()))?;

    let resized = imageops::resize(image, target_width, target_height, imageops::FilterType::Triangle);
    let mut chw = vec![0.0f32; plane * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            chw[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(chw)
}

/// ImageNet mean/std normalization over a CHW buffer. Non-finite values
/// become 0.
pub fn apply_imagenet_normalization(data: &mut [f32]) {
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    let plane = data.len() / 3;
    if plane == 0 {
        return;
    }
    for (c, channel) in data.chunks_mut(plane).take(3).enumerate() {
        for v in channel.iter_mut() {
            let normalized = (*v - MEAN[c]) / STD[c];
            *v = if normalized.is_finite() { normalized } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_chw_layout() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
        let tensor = rgb_to_chw_tensor(&image, 4, 2).unwrap();
        assert_eq!(tensor.len(), 24);
        assert!(tensor[..8].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(tensor[8..16].iter().all(|v| *v == 0.0));
        assert!(tensor[16..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_zero_target_rejected() {
        assert!(rgb_to_chw_tensor(&RgbImage::new(2, 2), 0, 4).is_err());
    }

    #[test]
    fn test_normalization_handles_non_finite() {
        let mut data = vec![0.5, f32::NAN, 0.5, f32::INFINITY, 0.5, 0.5];
        apply_imagenet_normalization(&mut data);
        assert!(data.iter().all(|v| v.is_finite()));
        assert_eq!(data[1], 0.0);
    }

    #[test]
    fn test_normalization_empty() {
        let mut data: Vec<f32> = vec![];
        apply_imagenet_normalization(&mut data);
        assert!(data.is_empty());
    }
}
