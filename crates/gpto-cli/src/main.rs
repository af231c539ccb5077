use std::path::PathBuf;

use clap::Parser;
use gpto_core::{DuplicatePolicy, ProcessOptions, RelocationMode, TitlePolicy};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "gpto", version, about = "Google Photos Takeout organizer - sort an export into year/month folders")]
struct Cli {
    /// Takeout directory (archives and/or extracted folders)
    source: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name files after their capture date instead of keeping the original name
    #[arg(long)]
    name_from_date: bool,

    /// strftime pattern for --name-from-date
    #[arg(long)]
    date_format: Option<String>,

    /// Move files instead of copying them
    #[arg(long = "move")]
    move_files: bool,

    /// Always keep both files on a name clash, even when sizes match
    #[arg(long)]
    allow_duplicates: bool,

    /// Do not unpack .zip/.tgz archives found in the source
    #[arg(long)]
    no_expand: bool,

    /// Re-encode still images as JPEG
    #[arg(long)]
    compress: bool,

    /// JPEG quality for --compress (1-100)
    #[arg(long)]
    quality: Option<u8>,

    /// Maximum width for --compress
    #[arg(long)]
    max_width: Option<u32>,

    /// Maximum height for --compress
    #[arg(long)]
    max_height: Option<u32>,

    /// Set each file's modification time to its capture date
    #[arg(long)]
    set_mtime: bool,

    /// Log every record (debug level)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn into_options(self) -> anyhow::Result<ProcessOptions> {
        let mut options = match &self.config {
            Some(path) => ProcessOptions::from_json_file(path)?,
            None => ProcessOptions::default(),
        };

        if let Some(source) = self.source {
            options.source = source;
        }
        if let Some(output) = self.output {
            options.output = output;
        }
        if self.name_from_date {
            options.title_policy = TitlePolicy::FromDate;
        }
        if let Some(format) = self.date_format {
            options.date_format = format;
        }
        if self.move_files {
            options.mode = RelocationMode::Move;
        }
        if self.allow_duplicates {
            options.duplicates = DuplicatePolicy::Allow;
        }
        if self.no_expand {
            options.expand_archives = false;
        }
        if self.compress {
            options.compress.enabled = true;
        }
        if let Some(quality) = self.quality {
            options.compress.quality = quality;
        }
        if self.max_width.is_some() {
            options.compress.max_width = self.max_width;
        }
        if self.max_height.is_some() {
            options.compress.max_height = self.max_height;
        }
        if self.set_mtime {
            options.set_mtime = true;
        }
        Ok(options)
    }
}

fn init_logger(verbose: bool, quiet: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);
    let t_total = std::time::Instant::now();

    let options = cli.into_options()?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let pb = bar.clone();
    let result = gpto_core::process(&options, &move |stage, current, total, message| {
        pb.set_length(total);
        pb.set_position((current + 1).min(total));
        pb.set_message(format!("[{}] {}", stage, message));
    });
    bar.finish_and_clear();
    let result = result?;

    eprintln!(
        "Done! {} records, {} placed ({} renamed), {} already present, {} trashed, {} missing, {} without date, {} failed ({:.2}s)",
        result.records_found,
        result.placed,
        result.renamed,
        result.already_present,
        result.trashed,
        result.missing_asset,
        result.missing_date,
        result.failed,
        t_total.elapsed().as_secs_f64()
    );
    if options.compress.enabled {
        eprintln!(
            "Re-encoded {} images, {} left unchanged after errors",
            result.transcoded, result.transcode_failed
        );
    }

    Ok(())
}
