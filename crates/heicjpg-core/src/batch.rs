use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::ImageDecoder;
use crate::control::BatchControl;
use crate::convert::{ConversionOutcome, Converter};
use crate::discover::{find_sources, has_extension};
use crate::error::FailureKind;
use crate::naming::{target_file_name, unique_path};
use crate::{ConvertOptions, Notifier};

/// An explicit-list input that was never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedInput {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a batch did, in processing order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One outcome per attempted entry
    pub outcomes: Vec<ConversionOutcome>,
    /// List-mode inputs excluded before any attempt
    pub rejected: Vec<RejectedInput>,
    /// The batch stopped early on a cancellation request
    pub cancelled: bool,
}

/// Serializable digest of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub converted: usize,
    pub failed: usize,
    #[serde(default)]
    pub skipped_existing: usize,
    #[serde(default)]
    pub rejected: Vec<RejectedInput>,
    #[serde(default)]
    pub cancelled: bool,
    pub converted_names: Vec<String>,
}

impl BatchReport {
    /// Bare file names of the targets that were written, in processing order.
    pub fn converted_names(&self) -> Vec<String> {
        self.outcomes.iter().filter_map(ConversionOutcome::target_name).collect()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ConversionOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ConversionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn summary(&self) -> BatchSummary {
        let skipped_existing = self
            .failed()
            .filter(|o| {
                o.result
                    .as_ref()
                    .is_err_and(|e| e.kind() == FailureKind::SkippedExists)
            })
            .count();
        BatchSummary {
            attempted: self.outcomes.len(),
            converted: self.succeeded().count(),
            failed: self.failed().count(),
            skipped_existing,
            rejected: self.rejected.clone(),
            cancelled: self.cancelled,
            converted_names: self.converted_names(),
        }
    }
}

/// Target for a source in `directory`, before collision handling.
fn natural_target(directory: &Path, file_name: &OsStr, options: &ConvertOptions) -> PathBuf {
    directory.join(target_file_name(file_name, &options.target_extension))
}

/// Overwrite wins over unique naming: a fresh name is only picked when the
/// existing target would otherwise be skipped.
fn resolve_target(target: PathBuf, options: &ConvertOptions) -> PathBuf {
    if options.generate_unique && !options.overwrite {
        unique_path(&target)
    } else {
        target
    }
}

fn check_cancelled(control: &BatchControl, report: &mut BatchReport, notifier: &dyn Notifier) -> bool {
    if control.is_cancelled() {
        tracing::info!("Batch cancelled after {} file(s)", report.outcomes.len());
        notifier.notify("Conversion cancelled");
        report.cancelled = true;
    }
    report.cancelled
}

fn finish(report: &BatchReport, notifier: &dyn Notifier) {
    let converted = report.succeeded().count();
    tracing::info!(
        "Successfully converted {}/{} file(s)",
        converted,
        report.outcomes.len()
    );
    notifier.notify(&format!(
        "Successfully converted {} of {} files",
        converted,
        report.outcomes.len()
    ));
}

/// Convert every source file found under `root`.
///
/// Targets go next to each source unless `target_dir` is set, in which case
/// they are flattened into it (or mirror the source tree with
/// `preserve_structure`).
pub fn convert_directory<D: ImageDecoder>(
    converter: &Converter<D>,
    root: &Path,
    control: &BatchControl,
    notifier: &dyn Notifier,
) -> BatchReport {
    let options = converter.options();
    let mut report = BatchReport::default();

    if !root.is_dir() {
        notifier.notify(&format!("{} is not a directory", root.display()));
    }
    let entries = find_sources(root, options.recursive, &options.source_extension);
    tracing::info!("Found {} files to convert in folder {}", entries.len(), root.display());
    notifier.notify(&format!(
        "Found {} files to convert in folder {}",
        entries.len(),
        root.display()
    ));

    for entry in &entries {
        if check_cancelled(control, &mut report, notifier) {
            break;
        }

        let target_dir = match &options.target_dir {
            None => entry.directory.clone(),
            Some(dir) if options.preserve_structure => {
                let relative = pathdiff::diff_paths(&entry.directory, root).unwrap_or_default();
                dir.join(relative)
            }
            Some(dir) => dir.clone(),
        };
        let target = resolve_target(natural_target(&target_dir, &entry.file_name, options), options);
        let request = converter.request(entry.path(), target);
        report.outcomes.push(converter.convert_file(&request, notifier));
    }

    finish(&report, notifier);
    report
}

/// Convert a caller-supplied list of files.
///
/// Inputs that do not exist or lack the source extension are rejected up
/// front and appear in neither the success nor the failure counts.
pub fn convert_files<D: ImageDecoder, P: AsRef<Path>>(
    converter: &Converter<D>,
    paths: &[P],
    control: &BatchControl,
    notifier: &dyn Notifier,
) -> BatchReport {
    let options = converter.options();
    let mut report = BatchReport::default();

    for path in paths {
        if check_cancelled(control, &mut report, notifier) {
            break;
        }

        let source = path.as_ref();
        let file_name = source.file_name();
        let reason = match file_name {
            _ if !source.is_file() => Some("not an existing file"),
            Some(name) if has_extension(&name.to_string_lossy(), &options.source_extension) => None,
            _ => Some("wrong file extension"),
        };
        if let Some(reason) = reason {
            tracing::warn!("Skipping {}: {}", source.display(), reason);
            notifier.notify(&format!("Skipping {}: {}", source.display(), reason));
            report.rejected.push(RejectedInput {
                path: source.to_path_buf(),
                reason: reason.to_string(),
            });
            continue;
        }
        let Some(file_name) = file_name else {
            continue;
        };

        let target_dir = match &options.target_dir {
            Some(dir) => dir.clone(),
            None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let target = resolve_target(natural_target(&target_dir, file_name, options), options);
        let request = converter.request(source, target);
        report.outcomes.push(converter.convert_file(&request, notifier));
    }

    finish(&report, notifier);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::{CancellationToken, NoopNotifier};
    use image::{DynamicImage, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    /// Treats files whose content starts with "bad" as corrupt.
    struct MarkerDecoder;

    impl ImageDecoder for MarkerDecoder {
        fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError> {
            if data.starts_with(b"bad") {
                return Err(DecodeError::Unrecognized);
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::new(2, 2)))
        }
    }

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn converter(options: ConvertOptions) -> Converter<MarkerDecoder> {
        Converter::with_decoder(MarkerDecoder, options)
    }

    #[test]
    fn test_resolve_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.jpg");
        fs::write(&target, b"x").unwrap();

        let unique = ConvertOptions {
            generate_unique: true,
            ..Default::default()
        };
        assert_eq!(resolve_target(target.clone(), &unique), dir.path().join("a(1).jpg"));

        let both = ConvertOptions {
            generate_unique: true,
            overwrite: true,
            ..Default::default()
        };
        assert_eq!(resolve_target(target.clone(), &both), target);
    }

    #[test]
    fn test_flatten_and_preserve_structure() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        write(&src.path().join("one.heic"), b"ok");
        write(&src.path().join("sub").join("two.heic"), b"ok");

        let flat = ConvertOptions {
            target_dir: Some(out.path().join("flat")),
            ..Default::default()
        };
        let report = convert_directory(&converter(flat), src.path(), &BatchControl::new(), &NoopNotifier);
        assert_eq!(report.converted_names(), vec!["one.jpg", "two.jpg"]);
        assert!(out.path().join("flat").join("two.jpg").is_file());

        let mirrored = ConvertOptions {
            target_dir: Some(out.path().join("tree")),
            preserve_structure: true,
            ..Default::default()
        };
        let report = convert_directory(&converter(mirrored), src.path(), &BatchControl::new(), &NoopNotifier);
        assert_eq!(report.summary().converted, 2);
        assert!(out.path().join("tree").join("one.jpg").is_file());
        assert!(out.path().join("tree").join("sub").join("two.jpg").is_file());
    }

    #[test]
    fn test_flatten_collision_with_unique_names() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        write(&src.path().join("a").join("img.heic"), b"ok");
        write(&src.path().join("b").join("img.heic"), b"ok");

        let options = ConvertOptions {
            target_dir: Some(out.path().to_path_buf()),
            generate_unique: true,
            ..Default::default()
        };
        let report = convert_directory(&converter(options), src.path(), &BatchControl::new(), &NoopNotifier);
        assert_eq!(report.converted_names(), vec!["img.jpg", "img(1).jpg"]);
    }

    #[test]
    fn test_list_mode_rejects_bad_inputs() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.HEIC");
        let text = dir.path().join("notes.txt");
        write(&good, b"ok");
        write(&text, b"ok");
        let missing = dir.path().join("missing.heic");

        let report = convert_files(
            &converter(ConvertOptions::default()),
            &[&missing, &good, &text],
            &BatchControl::new(),
            &NoopNotifier,
        );
        assert_eq!(report.converted_names(), vec!["good.jpg"]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].path, missing);
        assert_eq!(report.rejected[1].reason, "wrong file extension");
        assert!(dir.path().join("good.jpg").is_file());
    }

    #[test]
    fn test_cancel_between_entries() {
        let dir = tempdir().unwrap();
        let files: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("{i}.heic"))).collect();
        for f in &files {
            write(f, b"ok");
        }

        let token = CancellationToken::new();
        let control = BatchControl::new().with_cancel_token(token.clone());
        let notifier = |msg: &str| {
            if msg.starts_with("Converted") {
                token.cancel();
            }
        };
        let report = convert_files(&converter(ConvertOptions::default()), &files, &control, &notifier);
        assert!(report.cancelled);
        assert_eq!(report.converted_names(), vec!["0.jpg"]);
        assert!(report.summary().cancelled);
    }

    #[test]
    fn test_summary_counts() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a.heic"), b"ok");
        write(&dir.path().join("b.heic"), b"bad");
        write(&dir.path().join("c.heic"), b"ok");
        write(&dir.path().join("c.jpg"), b"existing");

        let report = convert_directory(
            &converter(ConvertOptions::default()),
            dir.path(),
            &BatchControl::new(),
            &NoopNotifier,
        );
        let summary = report.summary();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.converted_names, vec!["a.jpg"]);

        let json = serde_json::to_string(&summary).unwrap();
        let back: BatchSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
