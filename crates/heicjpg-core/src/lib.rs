pub mod batch;
pub mod codec;
pub mod control;
pub mod convert;
pub mod discover;
pub mod error;
pub mod metadata;
pub mod naming;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use batch::{BatchReport, BatchSummary, RejectedInput};
pub use codec::{AutoDecoder, ImageCrateDecoder, ImageDecoder};
pub use control::{BatchControl, CancellationToken, CancelledError};
pub use convert::{clamp_quality, ConversionOutcome, ConversionRequest, Converted, Converter};
pub use discover::{find_sources, FileEntry};
pub use error::{ConvertError, DecodeError, FailureKind, MetadataError};
pub use naming::unique_path;

fn default_quality() -> i32 {
    95
}

fn default_true() -> bool {
    true
}

fn default_source_extension() -> String {
    "heic".to_string()
}

fn default_target_extension() -> String {
    "jpg".to_string()
}

/// Conversion settings shared by every entry of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Replace existing targets. Takes precedence over `generate_unique`.
    #[serde(default)]
    pub overwrite: bool,
    /// Delete each source after a successful conversion.
    #[serde(default)]
    pub remove_source: bool,
    /// JPEG quality; clamped to 1..=100 when a request is built.
    #[serde(default = "default_quality")]
    pub quality: i32,
    /// Pick `name(n).jpg` instead of skipping when the target exists.
    #[serde(default)]
    pub generate_unique: bool,
    /// Also notify when each conversion starts.
    #[serde(default)]
    pub verbose: bool,
    /// Descend into subdirectories in directory mode.
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Output directory. `None` writes each target next to its source.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    /// Mirror source subdirectories under `target_dir` instead of flattening.
    #[serde(default)]
    pub preserve_structure: bool,
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    #[serde(default = "default_target_extension")]
    pub target_extension: String,
    /// Set the target's modification time to the capture time.
    #[serde(default = "default_true")]
    pub set_file_time: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            remove_source: false,
            quality: default_quality(),
            generate_unique: false,
            verbose: false,
            recursive: true,
            target_dir: None,
            preserve_structure: false,
            source_extension: default_source_extension(),
            target_extension: default_target_extension(),
            set_file_time: true,
        }
    }
}

impl ConvertOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let options = serde_json::from_reader(BufReader::new(file))?;
        Ok(options)
    }
}

/// Receives human-readable progress lines, inline on the converting thread.
pub trait Notifier {
    fn notify(&self, message: &str);
}

impl<F> Notifier for F
where
    F: Fn(&str),
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

/// Notifier that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str) {}
}

/// Convert every source file under `root` with the default decoder.
pub fn convert_directory(
    root: &Path,
    options: &ConvertOptions,
    notifier: &dyn Notifier,
) -> BatchReport {
    let converter = Converter::new(options.clone());
    batch::convert_directory(&converter, root, &BatchControl::default(), notifier)
}

/// Convert an explicit list of source files with the default decoder.
pub fn convert_files<P: AsRef<Path>>(
    paths: &[P],
    options: &ConvertOptions,
    notifier: &dyn Notifier,
) -> BatchReport {
    let converter = Converter::new(options.clone());
    batch::convert_files(&converter, paths, &BatchControl::default(), notifier)
}
