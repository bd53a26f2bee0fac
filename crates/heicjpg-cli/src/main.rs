mod logger;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use heicjpg_core::{batch, BatchControl, BatchReport, CancellationToken, ConvertOptions, Converter};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "heicjpg", version, about = "Convert HEIC images to JPEG, keeping capture timestamps")]
struct Cli {
    /// HEIC files and/or directories to convert
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Output directory (default: next to each source)
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Remove converted HEIC files
    #[arg(short, long)]
    remove: bool,

    /// Overwrite existing JPEG files
    #[arg(short, long)]
    overwrite: bool,

    /// Do not search subdirectories
    #[arg(long)]
    not_recursive: bool,

    /// JPEG quality, clamped to 1-100
    #[arg(short, long, allow_negative_numbers = true)]
    quality: Option<i32>,

    /// Write name(1).jpg, name(2).jpg, ... instead of skipping existing files
    #[arg(short, long)]
    unique: bool,

    /// Mirror source subdirectories under --target
    #[arg(long)]
    preserve_structure: bool,

    /// Leave the JPEG modification time alone
    #[arg(long)]
    no_file_time: bool,

    /// Report each file as it starts
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,

    /// JSON file with conversion options; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a JSON summary on stdout
    #[arg(long)]
    json: bool,
}

fn build_options(cli: &Cli) -> anyhow::Result<ConvertOptions> {
    let mut options = match &cli.config {
        Some(path) => ConvertOptions::load(path)?,
        None => ConvertOptions::default(),
    };
    options.overwrite |= cli.overwrite;
    options.remove_source |= cli.remove;
    options.generate_unique |= cli.unique;
    options.verbose |= cli.verbose;
    options.preserve_structure |= cli.preserve_structure;
    if cli.not_recursive {
        options.recursive = false;
    }
    if cli.no_file_time {
        options.set_file_time = false;
    }
    if let Some(quality) = cli.quality {
        options.quality = quality;
    }
    if let Some(target) = &cli.target {
        options.target_dir = Some(target.clone());
    }
    Ok(options)
}

fn merge(into: &mut BatchReport, from: BatchReport) {
    into.outcomes.extend(from.outcomes);
    into.rejected.extend(from.rejected);
    into.cancelled |= from.cancelled;
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    logger::init(level);

    let options = build_options(&cli)?;
    tracing::debug!("Options: {:?}", options);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || token.cancel())?;
    }
    let control = BatchControl::new().with_cancel_token(token);
    let converter = Converter::new(options);

    let pb = if cli.quiet || cli.json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };
    let notifier = |message: &str| {
        pb.println(message);
        pb.set_message(message.to_string());
    };

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) = cli.paths.iter().cloned().partition(|p| p.is_dir());

    let mut report = BatchReport::default();
    for dir in &dirs {
        merge(&mut report, batch::convert_directory(&converter, dir, &control, &notifier));
        if report.cancelled {
            break;
        }
    }
    if !files.is_empty() && !report.cancelled {
        merge(&mut report, batch::convert_files(&converter, &files, &control, &notifier));
    }
    pb.finish_and_clear();

    let summary = report.summary();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !cli.quiet {
        eprintln!(
            "Done! {} converted, {} failed, {} skipped (existing), {} rejected{} ({:.2}s)",
            summary.converted,
            summary.failed - summary.skipped_existing,
            summary.skipped_existing,
            summary.rejected.len(),
            if summary.cancelled { ", cancelled" } else { "" },
            t_total.elapsed().as_secs_f64()
        );
    }

    if summary.failed > summary.skipped_existing {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
