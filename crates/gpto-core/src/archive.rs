use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use encoding_rs::SHIFT_JIS;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::ThrottledProgress;

/// Unpacks one container into a root directory.
pub trait Extractor {
    /// Write every member under `root` and return the written paths.
    fn expand(&self, container: &Path, root: &Path) -> anyhow::Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    TarGz,
}

impl ContainerKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    pub fn extractor(self) -> &'static dyn Extractor {
        match self {
            Self::Zip => &ZipExtractor,
            Self::TarGz => &TarGzExtractor,
        }
    }
}

/// Normalize a member name into a path relative to the extraction root.
///
/// Handles `\` separators, NFD names from macOS and directory names ending
/// in spaces or dots (`Album /x.jpg`), which Windows cannot create. The file
/// name itself is kept as is so it still matches its sidecar. Returns `None`
/// for names that would escape the root or are empty.
pub fn normalize_member_path(name: &str) -> Option<PathBuf> {
    let name: String = name.nfc().collect();
    let parts: Vec<&str> = name.split(['/', '\\']).collect();
    let last = parts.len() - 1;
    let mut out = PathBuf::new();
    for (i, raw) in parts.into_iter().enumerate() {
        if raw == ".." {
            return None;
        }
        if raw == "." {
            continue;
        }
        let component = if i < last { raw.trim_end_matches([' ', '.']) } else { raw };
        if component.is_empty() {
            continue;
        }
        // Reject drive prefixes and anything else that is not a plain name.
        match Path::new(component).components().next() {
            Some(Component::Normal(_)) => out.push(component),
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Decode a zip member name, trying UTF-8 first, then Shift_JIS
fn decode_zip_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    // Japanese-locale Windows writes Shift_JIS names without the UTF-8 flag
    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

fn member_path(container: &Path, root: &Path, name: &str) -> anyhow::Result<PathBuf> {
    normalize_member_path(name)
        .map(|rel| root.join(rel))
        .ok_or_else(|| anyhow!("malformed member {:?} in {}", name, container.display()))
}

fn write_member(reader: &mut impl io::Read, dest: &Path) -> anyhow::Result<()> {
    if dest.exists() {
        warn!("{} already exists, overwriting with archive member", dest.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?);
    io::copy(reader, &mut out).with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(())
}

pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn expand(&self, container: &Path, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let file = File::open(container)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut written = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = decode_zip_name(entry.name_raw());
            let dest = member_path(container, root, &name)?;

            if entry.is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }
            write_member(&mut entry, &dest)?;
            written.push(dest);
        }
        Ok(written)
    }
}

pub struct TarGzExtractor;

impl Extractor for TarGzExtractor {
    fn expand(&self, container: &Path, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let file = File::open(container)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut written = Vec::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                fs::create_dir_all(member_path(container, root, &name)?)?;
                continue;
            }
            if !kind.is_file() {
                debug!("skipping {:?} ({:?}) in {}", name, kind, container.display());
                continue;
            }
            let dest = member_path(container, root, &name)?;
            write_member(&mut entry, &dest)?;
            written.push(dest);
        }
        Ok(written)
    }
}

/// Every container under `root`, in path order.
pub fn find_containers(root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && ContainerKind::from_path(e.path()).is_some())
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandSummary {
    pub containers: u64,
    pub members: u64,
}

/// Expand every container under `root` in place and delete it afterwards.
///
/// Containers found inside containers are expanded on the next pass. A
/// failing container aborts the whole run; members written before the
/// failure stay on disk.
pub fn expand_archives(root: &Path, progress: &ThrottledProgress) -> anyhow::Result<ExpandSummary> {
    let mut summary = ExpandSummary::default();

    loop {
        let containers = find_containers(root);
        if containers.is_empty() {
            break;
        }
        let total = containers.len() as u64;

        for (i, container) in containers.iter().enumerate() {
            let name = container
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.report("expand", i as u64, total, &format!("Expanding {}", name));

            let Some(kind) = ContainerKind::from_path(container) else {
                bail!("{} is not a supported container", container.display());
            };
            let written = kind
                .extractor()
                .expand(container, root)
                .with_context(|| format!("failed to expand {}", container.display()))?;
            fs::remove_file(container)
                .with_context(|| format!("failed to remove {}", container.display()))?;

            info!("Expanded {} ({} files)", container.display(), written.len());
            summary.containers += 1;
            summary.members += written.len() as u64;
        }
    }

    Ok(summary)
}
