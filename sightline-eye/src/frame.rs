//! Frame decoding
//!
//! Clients send compressed images (JPEG, PNG, ...) as base64 text. Decoding
//! produces an RGB8 pixel buffer that every stage reads from.

use crate::error::{PerceptionError, Result};
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use tracing::debug;

/// Channel order of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
}

/// Rectangular region in frame pixel coordinates (`x2`/`y2` exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Interleaved RGB bytes, row-major
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Copy out a region, clamped to the frame. Returns `None` when the
    /// clamped region is empty.
    pub fn crop(&self, region: Region) -> Option<RgbImage> {
        let x1 = region.x1.min(self.width());
        let y1 = region.y1.min(self.height());
        let x2 = region.x2.min(self.width());
        let y2 = region.y2.min(self.height());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(image::imageops::crop_imm(&self.image, x1, y1, x2 - x1, y2 - y1).to_image())
    }
}

/// Decode a base64 payload (optionally a `data:` URI) into a frame.
pub fn decode_frame(payload: &str) -> Result<Frame> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(uri) => uri
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| PerceptionError::Decode("malformed data URI".to_string()))?,
        None => payload,
    };

    if encoded.is_empty() {
        return Err(PerceptionError::Decode("empty payload".to_string()));
    }

    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| PerceptionError::Decode(format!("invalid base64: {}", e)))?;

    decode_image_bytes(&bytes)
}

/// Decode raw compressed image bytes into a frame.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame> {
    if bytes.is_empty() {
        return Err(PerceptionError::Decode("empty payload".to_string()));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| PerceptionError::Decode(format!("undecodable image: {}", e)))?;

    let frame = Frame::from_rgb(image.to_rgb8());
    if frame.width() == 0 || frame.height() == 0 {
        return Err(PerceptionError::Decode("image has no pixels".to_string()));
    }

    debug!("Decoded {}x{} frame", frame.width(), frame.height());
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 3) as u8, 90]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_dimensions_match() {
        let payload = general_purpose::STANDARD.encode(encode_png(37, 21));
        let frame = decode_frame(&payload).unwrap();
        assert_eq!(frame.width(), 37);
        assert_eq!(frame.height(), 21);
        assert_eq!(frame.channel_order(), ChannelOrder::Rgb);
        assert_eq!(frame.pixels().len(), 37 * 21 * 3);
    }

    #[test]
    fn test_decode_data_uri() {
        let payload = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(encode_png(8, 8))
        );
        let frame = decode_frame(&payload).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 8));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode_frame(""), Err(PerceptionError::Decode(_))));
        assert!(matches!(decode_frame("   "), Err(PerceptionError::Decode(_))));
        assert!(matches!(decode_image_bytes(&[]), Err(PerceptionError::Decode(_))));
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(matches!(decode_frame("***not base64***"), Err(PerceptionError::Decode(_))));
    }

    #[test]
    fn test_decode_not_an_image() {
        let payload = general_purpose::STANDARD.encode(b"hello world, definitely not a jpeg");
        assert!(matches!(decode_frame(&payload), Err(PerceptionError::Decode(_))));
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = Frame::from_rgb(RgbImage::new(10, 10));
        let crop = frame
            .crop(Region { x1: 5, y1: 5, x2: 50, y2: 50 })
            .unwrap();
        assert_eq!(crop.dimensions(), (5, 5));
        assert!(frame.crop(Region { x1: 10, y1: 0, x2: 12, y2: 4 }).is_none());
    }
}
