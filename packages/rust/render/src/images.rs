//! Image size lookup (layout) and PDF image encoding (serialization).

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use miniz_oxide::deflate::compress_to_vec_zlib;

const DEFLATE_LEVEL: u8 = 6;

/// Pixel dimensions of an encoded image, read from its header only.
pub fn pixel_size(bytes: &[u8]) -> Result<(u32, u32), String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    if reader.format().is_none() {
        return Err("unrecognized image format".into());
    }
    let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err(format!("image has zero size ({width}x{height})"));
    }
    Ok((width, height))
}

/// Conventional file extension for the encoded image format, if recognized.
pub fn extension(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Rgb,
    Gray,
}

/// Image data ready to be written as a PDF image XObject.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub color: ColorSpace,
    /// `true`: `data` is a JPEG stream (DCTDecode). Otherwise zlib samples.
    pub dct: bool,
    pub data: Vec<u8>,
    /// Deflated 8-bit alpha channel, when any pixel is not opaque.
    pub alpha: Option<Vec<u8>>,
}

/// Sample precision and component count from the first SOF segment of a
/// JPEG stream.
pub(crate) fn jpeg_components(bytes: &[u8]) -> Option<(u8, u8)> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut i = 2;
    while i + 1 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            // Fill byte before a marker.
            0xFF => {
                i += 1;
                continue;
            }
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let precision = *bytes.get(i + 4)?;
                let components = *bytes.get(i + 9)?;
                return Some((precision, components));
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([*bytes.get(i + 2)?, *bytes.get(i + 3)?]) as usize;
        i += 2 + len;
    }
    None
}

/// Decode `bytes` into something a PDF can embed.
///
/// 8-bit RGB and grayscale JPEGs pass through untouched; everything else,
/// CMYK JPEGs included, is decoded to RGB samples plus an optional soft mask.
pub fn encode(bytes: &[u8]) -> Result<EncodedImage, String> {
    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;
    let decoded =
        image::load_from_memory_with_format(bytes, format).map_err(|e| e.to_string())?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(format!("image has zero size ({width}x{height})"));
    }

    if format == ImageFormat::Jpeg {
        // The decoder reports CMYK input as RGB, so the header decides.
        let color = match jpeg_components(bytes) {
            Some((8, 3)) => Some(ColorSpace::Rgb),
            Some((8, 1)) => Some(ColorSpace::Gray),
            _ => None,
        };
        if let Some(color) = color {
            return Ok(EncodedImage {
                width,
                height,
                color,
                dct: true,
                data: bytes.to_vec(),
                alpha: None,
            });
        }
    }

    let rgba = decoded.to_rgba8();
    let rgb: Vec<u8> = rgba
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    let alpha = rgba.pixels().any(|p| p.0[3] < 255).then(|| {
        let samples: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
        compress_to_vec_zlib(&samples, DEFLATE_LEVEL)
    });

    Ok(EncodedImage {
        width,
        height,
        color: ColorSpace::Rgb,
        dct: false,
        data: compress_to_vec_zlib(&rgb, DEFLATE_LEVEL),
        alpha,
    })
}
