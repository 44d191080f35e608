use crate::error::DetectHumanError;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{codecs::jpeg::JpegEncoder, ImageReader, RgbImage};
use std::io::Cursor;

const JPEG_QUALITY: u8 = 95;

/// Decodes any supported container into a 3 channel RGB grid.
pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, DetectHumanError> {
    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectHumanError::DecodeFailed(image::ImageError::IoError(e)))?;

    let image = image_reader
        .decode()
        .map_err(DetectHumanError::DecodeFailed)?;

    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, DetectHumanError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder
        .encode_image(image)
        .map_err(DetectHumanError::EncodeFailed)?;
    Ok(buf)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
