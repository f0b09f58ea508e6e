//! Input decoding: encoded capture bytes to an owned grayscale raster.

use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("empty image payload")]
    Empty,
    #[error("unreadable image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode an encoded capture (JPEG, PNG, ...) into 8-bit grayscale.
///
/// Color inputs are converted with the `image` crate's luma weights; inputs
/// that are already grayscale pass through unchanged. Any size is accepted;
/// whether a face fits is the detector's call.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.into_luma8())
}

/// Encode a grayscale raster as PNG. Used by clients and tests to build payloads.
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, ImageError> {
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(decode_grayscale(&[]), Err(ImageError::Empty)));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = decode_grayscale(b"definitely not an image");
        assert!(matches!(result, Err(ImageError::Decode(_))));
    }

    #[test]
    fn test_grayscale_png_passthrough() {
        let img = GrayImage::from_fn(32, 24, |x, y| Luma([(x + y) as u8]));
        let decoded = decode_grayscale(&encode_png(&img).unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_color_converted_to_gray() {
        let rgb = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        rgb.write_to(&mut out, image::ImageFormat::Png).unwrap();

        let gray = decode_grayscale(out.get_ref()).unwrap();
        assert_eq!(gray.dimensions(), (20, 20));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_tiny_image_decodes() {
        let img = GrayImage::from_pixel(3, 2, Luma([9]));
        let decoded = decode_grayscale(&encode_png(&img).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
    }
}
