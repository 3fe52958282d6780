//! Image encoding: `DynamicImage` → base64 payload wrapped in `ImageData`.
//!
//! Two encodings, one per use:
//!
//! - **PNG** for classification. One or two pages, lossless, so the
//!   letterhead and form titles the label depends on stay crisp.
//! - **Greyscale JPEG** for extraction. A batch puts several pages into a
//!   single request; dropping colour and using lossy compression keeps the
//!   payload small while handwriting and print remain legible.
//!
//! Both set `detail: "high"` so GPT-4-class models tile the full image
//! instead of reading a single 512 px overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page as a base64 PNG.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded PNG → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode a page as a base64 greyscale JPEG at `quality` (1–100).
pub fn encode_greyscale_jpeg(img: &DynamicImage, quality: u8) -> Result<ImageData, image::ImageError> {
    // to_luma8 drops any alpha channel, which the JPEG encoder rejects.
    let grey = DynamicImage::ImageLuma8(img.to_luma8());

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(&grey)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded JPEG q{} → {} bytes base64", quality, b64.len());

    Ok(ImageData::new(b64, "image/jpeg").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_png_small_image() {
        let data = encode_png(&red_square()).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG"));
    }

    #[test]
    fn encode_jpeg_drops_colour_and_alpha() {
        let data = encode_greyscale_jpeg(&red_square(), 60).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        let back = image::load_from_memory(&decoded).expect("decodable jpeg");
        assert_eq!(back.color(), image::ColorType::L8);
    }
}
