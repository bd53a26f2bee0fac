use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ImageDecoder as _;
use image::{DynamicImage, ExtendedColorType, ImageReader};

use crate::error::DecodeError;

/// ISO-BMFF brands identifying HEIF still images.
const HEIF_BRANDS: [&[u8; 4]; 6] = [b"heic", b"heix", b"heim", b"heis", b"mif1", b"msf1"];

/// Decodes raw file bytes to upright pixels.
pub trait ImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError>;
}

/// Check the ISO-BMFF `ftyp` box for a HEIF brand.
pub fn is_heif(data: &[u8]) -> bool {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return false;
    }
    let box_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let end = box_len.clamp(12, data.len());
    // major brand, then minor version, then compatible brands
    std::iter::once(&data[8..12])
        .chain(data.get(16..end).unwrap_or(&[]).chunks_exact(4))
        .any(|brand| HEIF_BRANDS.iter().any(|b| brand == &b[..]))
}

fn check_dimensions(image: DynamicImage) -> Result<DynamicImage, DecodeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::InvalidDimensions(image.width(), image.height()));
    }
    Ok(image)
}

/// Formats supported by the `image` crate, detected from content. The EXIF
/// orientation of the source is applied to the pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.into()))?;
        if reader.format().is_none() {
            return Err(DecodeError::Unrecognized);
        }
        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        image.apply_orientation(orientation);
        check_dimensions(image)
    }
}

/// HEIF decoding through libheif. Image transformations (rotation, mirroring,
/// cropping) are applied, so the pixels come out upright.
#[cfg(feature = "heif")]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeifDecoder;

#[cfg(feature = "heif")]
impl ImageDecoder for HeifDecoder {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError> {
        use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

        let heif_err = |e: libheif_rs::HeifError| DecodeError::Heif(e.to_string());
        let lib_heif = LibHeif::new();
        let ctx = HeifContext::read_from_bytes(data).map_err(heif_err)?;
        let handle = ctx.primary_image_handle().map_err(heif_err)?;
        let decoded = lib_heif
            .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
            .map_err(heif_err)?;

        let planes = decoded.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| DecodeError::Heif("no interleaved RGB plane".to_string()))?;
        let (width, height) = (plane.width, plane.height);
        let row_len = width as usize * 3;
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in plane.data.chunks(plane.stride).take(height as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }

        let rgb = image::RgbImage::from_raw(width, height, pixels)
            .ok_or(DecodeError::InvalidDimensions(width, height))?;
        check_dimensions(DynamicImage::ImageRgb8(rgb))
    }
}

/// Sends HEIF data to libheif (when compiled in) and everything else to the
/// `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecoder;

impl ImageDecoder for AutoDecoder {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError> {
        if is_heif(data) {
            #[cfg(feature = "heif")]
            return HeifDecoder.decode(data);
            #[cfg(not(feature = "heif"))]
            return Err(DecodeError::HeifUnsupported);
        }
        ImageCrateDecoder.decode(data)
    }
}

/// Encode to baseline JPEG. `quality` must already be within 1..=100.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Insert an APP1 `Exif` segment into a JPEG stream, after SOI and any JFIF
/// APP0 segment. The caller keeps `exif` within a single segment.
pub fn embed_exif(jpeg: &[u8], exif: &[u8]) -> Vec<u8> {
    if jpeg.len() < 2 || jpeg[0..2] != [0xFF, 0xD8] {
        tracing::warn!("Encoder output has no SOI marker, EXIF not embedded");
        return jpeg.to_vec();
    }

    let mut insert_at = 2;
    if jpeg.len() >= 6 && jpeg[2..4] == [0xFF, 0xE0] {
        let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        insert_at = (4 + app0_len).min(jpeg.len());
    }

    let segment_len = (exif.len() + 2 + 6) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + exif.len() + 10);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(exif);
    out.extend_from_slice(&jpeg[insert_at..]);
    out
}
