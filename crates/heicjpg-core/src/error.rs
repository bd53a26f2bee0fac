use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Reason code attached to every failed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source missing, not a regular file, or without the source extension.
    InvalidSource,
    /// Target already exists and overwriting is disabled.
    SkippedExists,
    /// Source bytes could not be decoded as an image.
    DecodeFailure,
    /// Anything else: directory creation, encoding, writing.
    ConversionFailure,
}

/// Error raised by the pixel decoders.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unrecognized image data")]
    Unrecognized,

    #[error("HEIF support not compiled in (enable the `heif` feature)")]
    HeifUnsupported,

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to decode HEIF image: {0}")]
    Heif(String),

    #[error("invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(u32, u32),
}

/// Error raised while loading the source's EXIF container. Always recovered.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("no EXIF container in source")]
    Missing,

    #[error("failed to parse EXIF container: {0}")]
    Parse(#[from] exif::Error),
}

/// Why a single conversion did not produce a target file.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("invalid source: {}", .0.display())]
    InvalidSource(PathBuf),

    #[error("skipped: {} exists", .0.display())]
    TargetExists(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decode failure for {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to serialize metadata: {0}")]
    Metadata(#[source] exif::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ConvertError::InvalidSource(_) => FailureKind::InvalidSource,
            ConvertError::TargetExists(_) => FailureKind::SkippedExists,
            ConvertError::Decode { .. } => FailureKind::DecodeFailure,
            ConvertError::Read { .. }
            | ConvertError::CreateDir { .. }
            | ConvertError::Encode(_)
            | ConvertError::Metadata(_)
            | ConvertError::Write { .. } => FailureKind::ConversionFailure,
        }
    }
}
