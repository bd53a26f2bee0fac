use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::codec::{self, AutoDecoder, ImageDecoder};
use crate::discover::has_extension;
use crate::error::ConvertError;
use crate::metadata;
use crate::{ConvertOptions, Notifier};

/// Clamp any requested quality into the encoder's 1..=100 range.
pub fn clamp_quality(quality: i32) -> u8 {
    quality.clamp(1, 100) as u8
}

/// One source → target conversion attempt.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub overwrite: bool,
    pub remove_source: bool,
    /// Always within 1..=100
    quality: u8,
    pub generate_unique: bool,
    pub verbose: bool,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, options: &ConvertOptions) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            overwrite: options.overwrite,
            remove_source: options.remove_source,
            quality: clamp_quality(options.quality),
            generate_unique: options.generate_unique,
            verbose: options.verbose,
        }
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = clamp_quality(quality);
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

/// Details of a successful conversion.
#[derive(Debug, Clone)]
pub struct Converted {
    /// Timestamp embedded in the target
    pub capture_time: NaiveDateTime,
    /// False when no timestamp was found and the wall clock was used
    pub capture_time_from_source: bool,
    /// Whether the requested source deletion happened
    pub source_removed: bool,
}

/// Result of one conversion attempt.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub source: PathBuf,
    pub target: PathBuf,
    pub result: Result<Converted, ConvertError>,
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Bare file name of the written target, on success.
    pub fn target_name(&self) -> Option<String> {
        self.result.as_ref().ok()?;
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn message(&self) -> String {
        match &self.result {
            Ok(_) => format!(
                "Converted {} -> {}",
                self.source.display(),
                self.target.display()
            ),
            Err(err) => format!("Failed {}: {}", self.source.display(), err),
        }
    }
}

/// Converts single files with a pluggable decoder.
#[derive(Debug, Clone)]
pub struct Converter<D: ImageDecoder = AutoDecoder> {
    decoder: D,
    options: ConvertOptions,
}

impl Converter<AutoDecoder> {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            decoder: AutoDecoder,
            options,
        }
    }
}

impl<D: ImageDecoder> Converter<D> {
    pub fn with_decoder(decoder: D, options: ConvertOptions) -> Self {
        Self { decoder, options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Build a request from this converter's options.
    pub fn request(&self, source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> ConversionRequest {
        ConversionRequest::new(source, target, &self.options)
    }

    /// Convert exactly one file. Every failure is returned in the outcome.
    pub fn convert_file(&self, request: &ConversionRequest, notifier: &dyn Notifier) -> ConversionOutcome {
        if request.verbose {
            notifier.notify(&format!(
                "Converting {} -> {}",
                request.source.display(),
                request.target.display()
            ));
        }

        let result = self.run(request);
        let outcome = ConversionOutcome {
            source: request.source.clone(),
            target: request.target.clone(),
            result,
        };

        match &outcome.result {
            Ok(converted) => {
                tracing::info!(
                    "Converted {} -> {} ({})",
                    outcome.source.display(),
                    outcome.target.display(),
                    metadata::date::format_exif_datetime(&converted.capture_time)
                );
                if request.remove_source && !converted.source_removed {
                    notifier.notify(&format!("Unable to remove {}", outcome.source.display()));
                }
            }
            Err(ConvertError::TargetExists(target)) => {
                tracing::info!("File {} already exists, skip", target.display());
            }
            Err(err) => {
                tracing::warn!("Unable to convert {}: {}", outcome.source.display(), err);
            }
        }
        notifier.notify(&outcome.message());
        outcome
    }

    fn run(&self, request: &ConversionRequest) -> Result<Converted, ConvertError> {
        let source = &request.source;
        let target = &request.target;

        let valid_source = source.is_file()
            && source
                .file_name()
                .is_some_and(|n| has_extension(&n.to_string_lossy(), &self.options.source_extension));
        if !valid_source {
            return Err(ConvertError::InvalidSource(source.clone()));
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                fs::create_dir_all(parent).map_err(|e| ConvertError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
                tracing::debug!("Created directory {}", parent.display());
            }
        }

        if target.exists() && !request.overwrite {
            return Err(ConvertError::TargetExists(target.clone()));
        }

        let data = fs::read(source).map_err(|e| ConvertError::Read {
            path: source.clone(),
            source: e,
        })?;
        let image = self.decoder.decode(&data).map_err(|e| ConvertError::Decode {
            path: source.clone(),
            source: e,
        })?;

        let meta = metadata::normalize(&data);
        tracing::debug!(
            "{}: capture time {} ({}), {} primary / {} exif / {} gps / {} thumbnail field(s)",
            source.display(),
            meta.capture_time,
            if meta.capture_time_from_source { "source" } else { "now" },
            meta.groups.primary.len(),
            meta.groups.exif.len(),
            meta.groups.gps.len(),
            meta.groups.thumbnail.len()
        );
        let exif = meta.to_exif_bytes_or_minimal().map_err(ConvertError::Metadata)?;

        let jpeg = codec::encode_jpeg(&image, request.quality)?;
        write_replacing(target, &codec::embed_exif(&jpeg, &exif))?;

        if self.options.set_file_time {
            set_mtime(target, &meta.capture_time);
        }

        let source_removed = request.remove_source && remove_source(source);

        Ok(Converted {
            capture_time: meta.capture_time,
            capture_time_from_source: meta.capture_time_from_source,
            source_removed,
        })
    }
}

/// Write to a temporary sibling first, then rename over the target.
fn write_replacing(target: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target.with_file_name(format!(".{}.tmp", file_name));

    let result = fs::write(&temp_path, bytes).and_then(|_| fs::rename(&temp_path, target));
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(ConvertError::Write {
            path: target.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

fn set_mtime(target: &Path, capture_time: &NaiveDateTime) {
    if let Some(local) = capture_time.and_local_timezone(chrono::Local).single() {
        let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
        if let Err(e) = filetime::set_file_mtime(target, ft) {
            tracing::warn!("Unable to set file time on {}: {}", target.display(), e);
        }
    }
}

/// Delete a converted source. Failure is reported but keeps the conversion.
fn remove_source(source: &Path) -> bool {
    match fs::remove_file(source) {
        Ok(()) => {
            tracing::debug!("Removed {}", source.display());
            true
        }
        Err(e) => {
            tracing::warn!("Converted but unable to remove {}: {}", source.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, FailureKind};
    use crate::NoopNotifier;
    use image::{DynamicImage, RgbImage};
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Decoder that ignores the bytes and returns a tiny image.
    struct SolidDecoder;

    impl ImageDecoder for SolidDecoder {
        fn decode(&self, _data: &[u8]) -> Result<DynamicImage, DecodeError> {
            Ok(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
        }
    }

    struct FailingDecoder;

    impl ImageDecoder for FailingDecoder {
        fn decode(&self, _data: &[u8]) -> Result<DynamicImage, DecodeError> {
            Err(DecodeError::Unrecognized)
        }
    }

    #[test]
    fn test_clamp_quality() {
        assert_eq!(clamp_quality(150), 100);
        assert_eq!(clamp_quality(0), 1);
        assert_eq!(clamp_quality(57), 57);
        assert_eq!(clamp_quality(i32::MIN), 1);
        assert_eq!(clamp_quality(i32::MAX), 100);
        for q in -300..300 {
            assert!((1..=100).contains(&clamp_quality(q)));
        }
    }

    #[test]
    fn test_request_clamps_quality() {
        let options = ConvertOptions {
            quality: 0,
            ..Default::default()
        };
        let request = ConversionRequest::new("a.heic", "a.jpg", &options);
        assert_eq!(request.quality(), 1);
        assert_eq!(request.with_quality(500).quality(), 100);
    }

    #[test]
    fn test_invalid_source() {
        let dir = tempdir().unwrap();
        let converter = Converter::with_decoder(SolidDecoder, ConvertOptions::default());

        let missing = converter.request(dir.path().join("missing.heic"), dir.path().join("out/a.jpg"));
        let outcome = converter.convert_file(&missing, &NoopNotifier);
        assert_eq!(outcome.result.unwrap_err().kind(), FailureKind::InvalidSource);
        assert!(!dir.path().join("out").exists());

        let txt = dir.path().join("invalid.txt");
        fs::write(&txt, b"Not a HEIC file").unwrap();
        let outcome = converter.convert_file(&converter.request(&txt, dir.path().join("a.jpg")), &NoopNotifier);
        assert_eq!(outcome.result.unwrap_err().kind(), FailureKind::InvalidSource);
    }

    #[test]
    fn test_creates_parent_and_converts() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_1.HEIC");
        fs::write(&source, b"bytes").unwrap();
        let target = dir.path().join("a").join("b").join("IMG_1.jpg");

        let lines = RefCell::new(Vec::new());
        let notifier = |msg: &str| lines.borrow_mut().push(msg.to_string());
        let options = ConvertOptions {
            verbose: true,
            ..Default::default()
        };
        let converter = Converter::with_decoder(SolidDecoder, options);
        let outcome = converter.convert_file(&converter.request(&source, &target), &notifier);

        assert!(outcome.is_success(), "{}", outcome.message());
        assert_eq!(outcome.target_name().as_deref(), Some("IMG_1.jpg"));
        assert!(target.is_file());
        assert!(source.exists());
        assert!(!dir.path().join("a").join("b").join(".IMG_1.jpg.tmp").exists());
        let lines = lines.into_inner();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Converting"));
        assert!(lines[1].starts_with("Converted"));
    }

    #[test]
    fn test_skip_existing_target() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.heic");
        let target = dir.path().join("a.jpg");
        fs::write(&source, b"bytes").unwrap();
        fs::write(&target, b"old").unwrap();

        let options = ConvertOptions {
            remove_source: true,
            ..Default::default()
        };
        let converter = Converter::with_decoder(SolidDecoder, options);
        let outcome = converter.convert_file(&converter.request(&source, &target), &NoopNotifier);

        assert_eq!(outcome.result.as_ref().unwrap_err().kind(), FailureKind::SkippedExists);
        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert!(source.exists());
        assert_eq!(outcome.target_name(), None);
    }

    #[test]
    fn test_overwrite_replaces_target() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.heic");
        let target = dir.path().join("a.jpg");
        fs::write(&source, b"bytes").unwrap();
        fs::write(&target, b"old").unwrap();

        let options = ConvertOptions {
            overwrite: true,
            remove_source: true,
            ..Default::default()
        };
        let converter = Converter::with_decoder(SolidDecoder, options);
        let outcome = converter.convert_file(&converter.request(&source, &target), &NoopNotifier);

        let converted = outcome.result.unwrap();
        assert!(converted.source_removed);
        assert!(!source.exists());
        assert_eq!(&fs::read(&target).unwrap()[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_decode_failure_is_contained() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("broken.heic");
        fs::write(&source, b"bytes").unwrap();
        let target = dir.path().join("broken.jpg");

        let lines = RefCell::new(Vec::new());
        let notifier = |msg: &str| lines.borrow_mut().push(msg.to_string());
        let options = ConvertOptions {
            remove_source: true,
            ..Default::default()
        };
        let converter = Converter::with_decoder(FailingDecoder, options);
        let outcome = converter.convert_file(&converter.request(&source, &target), &notifier);

        assert_eq!(outcome.result.as_ref().unwrap_err().kind(), FailureKind::DecodeFailure);
        assert!(!target.exists());
        assert!(source.exists());
        assert_eq!(lines.into_inner().len(), 1);
    }

    #[test]
    fn test_file_time_follows_capture_time() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.heic");
        fs::write(&source, b"bytes").unwrap();
        let target = dir.path().join("a.jpg");

        let converter = Converter::with_decoder(SolidDecoder, ConvertOptions::default());
        let converted = converter
            .convert_file(&converter.request(&source, &target), &NoopNotifier)
            .result
            .unwrap();

        let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&target).unwrap());
        let expected = converted
            .capture_time
            .and_local_timezone(chrono::Local)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(mtime.unix_seconds(), expected);
    }
}
