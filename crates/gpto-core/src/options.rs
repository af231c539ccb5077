use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H-%M-%S";
pub const DEFAULT_QUALITY: u8 = 85;

/// How the destination file name is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitlePolicy {
    /// Reuse the asset's existing file name.
    #[default]
    KeepOriginal,
    /// Format the capture instant with `date_format` and keep the extension.
    FromDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelocationMode {
    #[default]
    Copy,
    Move,
}

/// What an existing file at the destination means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Any existing file is a conflict; the new asset gets a ` (n)` suffix.
    Allow,
    /// An existing file with the same byte size is the same asset, already placed.
    #[default]
    CompareBySize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressOptions {
    pub enabled: bool,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: DEFAULT_QUALITY,
            max_width: None,
            max_height: None,
        }
    }
}

impl CompressOptions {
    /// Bounding box for downscaling; an unset side is unbounded.
    pub fn max_dimensions(&self) -> Option<(u32, u32)> {
        match (self.max_width, self.max_height) {
            (None, None) => None,
            (w, h) => Some((w.unwrap_or(u32::MAX), h.unwrap_or(u32::MAX))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Root of the exported takeout (archives and/or expanded folders).
    pub source: PathBuf,
    /// Root of the organized tree.
    pub output: PathBuf,
    pub title_policy: TitlePolicy,
    pub date_format: String,
    pub mode: RelocationMode,
    pub duplicates: DuplicatePolicy,
    pub expand_archives: bool,
    pub compress: CompressOptions,
    /// Stamp each placed file's mtime with its capture instant.
    pub set_mtime: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            output: PathBuf::new(),
            title_policy: TitlePolicy::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            mode: RelocationMode::default(),
            duplicates: DuplicatePolicy::default(),
            expand_archives: true,
            compress: CompressOptions::default(),
            set_mtime: false,
        }
    }
}

impl ProcessOptions {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Load options from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        let options = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(options)
    }

    /// Reject configurations that would fail or misbehave mid-run.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.as_os_str().is_empty() {
            bail!("no source directory given");
        }
        if self.output.as_os_str().is_empty() {
            bail!("no output directory given");
        }
        std::fs::read_dir(&self.source)
            .with_context(|| format!("source directory {} is not readable", self.source.display()))?;

        let source = std::path::absolute(&self.source)?;
        let output = std::path::absolute(&self.output)?;
        if output.starts_with(&source) {
            bail!(
                "output directory {} must not be inside the source directory {}",
                output.display(),
                source.display()
            );
        }
        if output.is_file() {
            bail!("output path {} is a file", output.display());
        }

        if self.title_policy == TitlePolicy::FromDate {
            validate_date_format(&self.date_format)?;
        }

        if self.compress.enabled {
            if !(1..=100).contains(&self.compress.quality) {
                bail!("compression quality must be between 1 and 100, got {}", self.compress.quality);
            }
            if self.compress.max_width == Some(0) || self.compress.max_height == Some(0) {
                bail!("maximum dimensions must be greater than zero");
            }
        }
        Ok(())
    }
}

/// A usable format parses cleanly and yields a single, non-empty path component.
fn validate_date_format(format: &str) -> anyhow::Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        bail!("invalid date format {:?}", format);
    }
    let sample = NaiveDate::from_ymd_opt(2000, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .context("sample date out of range")?;
    let mut rendered = String::new();
    if write!(rendered, "{}", sample.format(format)).is_err() {
        bail!("date format {:?} cannot be rendered", format);
    }
    if rendered.trim().is_empty() || rendered.contains(['/', '\\']) {
        bail!("date format {:?} must produce a plain file name", format);
    }
    Ok(())
}
