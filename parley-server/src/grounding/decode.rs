//! Image format detection and decoding.

use crate::error::ChatError;
use image::ImageFormat;

/// Image bytes that decoded successfully.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Decode `bytes`, detecting the format from content.
///
/// `mime_hint` is advisory only; the bytes decide.
pub fn decode_image(bytes: Vec<u8>, mime_hint: Option<&str>) -> Result<DecodedImage, ChatError> {
    if bytes.is_empty() {
        return Err(ChatError::ImageDecode("image is empty".into()));
    }

    let format = image::guess_format(&bytes)
        .map_err(|_| ChatError::ImageDecode("unrecognized image format".into()))?;

    if let Some(hint) = mime_hint {
        if ImageFormat::from_mime_type(hint) != Some(format) {
            tracing::debug!(
                hint,
                detected = format.to_mime_type(),
                "Image MIME hint does not match content"
            );
        }
    }

    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| ChatError::ImageDecode(e.to_string()))?;

    Ok(DecodedImage {
        width: decoded.width(),
        height: decoded.height(),
        format,
        bytes,
    })
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
