//! Original-size metadata embedded in optimized images.
//!
//! The first optimization of a file records its original dimensions and byte
//! size inside the file itself: a `tEXt` chunk for PNG, a `COM` segment for
//! JPEG. Later runs size against the recorded original rather than the
//! already-shrunk pixels, which keeps optimization idempotent.

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::OptimizeError;

/// Keyword of the PNG text chunk and prefix of the JPEG comment
pub const METADATA_KEYWORD: &str = "design-archiver:original";

const JPEG_MARKER: u8 = 0xFF;
const JPEG_SOI: u8 = 0xD8;
const JPEG_EOI: u8 = 0xD9;
const JPEG_SOS: u8 = 0xDA;
const JPEG_COM: u8 = 0xFE;

/// Dimensions and size of an image before it was first optimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationMetadata {
    /// Original width in pixels
    pub original_width: u32,
    /// Original height in pixels
    pub original_height: u32,
    /// Original file size in bytes
    pub original_byte_size: u64,
}

impl OptimizationMetadata {
    fn encode(&self) -> Result<String, OptimizeError> {
        serde_json::to_string(self).map_err(|e| OptimizeError::EncodeError(e.to_string()))
    }

    fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

/// Read embedded metadata from an encoded image
pub fn read_metadata(bytes: &[u8], format: ImageFormat) -> Option<OptimizationMetadata> {
    match format {
        ImageFormat::Png => read_png_metadata(bytes),
        ImageFormat::Jpeg => read_jpeg_metadata(bytes),
        _ => None,
    }
}

/// Read the metadata text chunk of a PNG
pub fn read_png_metadata(bytes: &[u8]) -> Option<OptimizationMetadata> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = decoder.read_info().ok()?;
    let info = reader.info();
    info.uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == METADATA_KEYWORD)
        .and_then(|chunk| OptimizationMetadata::decode(&chunk.text))
}

/// Read the metadata comment of a JPEG
pub fn read_jpeg_metadata(bytes: &[u8]) -> Option<OptimizationMetadata> {
    let prefix = format!("{METADATA_KEYWORD}=");
    let mut pos = 0;

    while pos + 4 <= bytes.len() {
        if bytes[pos] != JPEG_MARKER {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == JPEG_SOI || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        if marker == JPEG_SOS || marker == JPEG_EOI {
            return None;
        }

        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > bytes.len() {
            return None;
        }

        if marker == JPEG_COM {
            let payload = &bytes[pos + 4..end];
            if let Some(text) = std::str::from_utf8(payload)
                .ok()
                .and_then(|s| s.strip_prefix(&prefix))
            {
                return OptimizationMetadata::decode(text);
            }
        }
        pos = end;
    }
    None
}

/// Insert a metadata comment into an encoded JPEG after its APPn headers
pub fn embed_jpeg_metadata(
    jpeg: &[u8],
    metadata: &OptimizationMetadata,
) -> Result<Vec<u8>, OptimizeError> {
    if jpeg.len() < 2 || jpeg[0] != JPEG_MARKER || jpeg[1] != JPEG_SOI {
        return Err(OptimizeError::EncodeError("not a JPEG stream".to_string()));
    }

    let payload = format!("{METADATA_KEYWORD}={}", metadata.encode()?);
    let segment_len = u16::try_from(payload.len() + 2)
        .map_err(|_| OptimizeError::EncodeError("metadata comment too long".to_string()))?;

    // Keep APP0/APP1 immediately after SOI so JFIF/EXIF readers stay happy
    let mut insert_at = 2;
    while insert_at + 4 <= jpeg.len()
        && jpeg[insert_at] == JPEG_MARKER
        && (0xE0..=0xEF).contains(&jpeg[insert_at + 1])
    {
        let len = u16::from_be_bytes([jpeg[insert_at + 2], jpeg[insert_at + 3]]) as usize;
        insert_at += 2 + len;
    }
    let insert_at = insert_at.min(jpeg.len());

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[JPEG_MARKER, JPEG_COM]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

/// Text chunk `(keyword, text)` to embed in a PNG
pub fn png_text_chunk(metadata: &OptimizationMetadata) -> Result<(String, String), OptimizeError> {
    Ok((METADATA_KEYWORD.to_string(), metadata.encode()?))
}
