use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use log::warn;

use crate::options::CompressOptions;
use crate::plan::{free_path, LiveDisk};

/// Still-image extensions the codec can decode reliably.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

pub const OUTPUT_EXTENSION: &str = "jpg";

#[derive(Debug)]
pub enum KeepReason {
    /// Not a still image this transcoder handles.
    Unsupported,
    /// Decoding or encoding failed; the original is untouched.
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub enum TranscodeOutcome {
    Reencoded(PathBuf),
    Unchanged(KeepReason),
}

/// Post-processing applied to a placed file. Must leave the file as it was
/// whenever it cannot finish.
pub trait Transcoder {
    /// Name a placed `file_name` ends up with, or `None` if it is left alone.
    fn output_name(&self, file_name: &str) -> Option<String>;

    /// Size of the file `reencode` would produce from `source`.
    fn output_len(&self, source: &Path) -> Option<u64>;

    fn reencode(&self, path: &Path) -> TranscodeOutcome;
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

/// Re-encode still images as JPEG, downscaling to fit a bounding box.
///
/// Output is deterministic for a given source and settings, which is what
/// lets a re-run recognize files it re-encoded before.
#[derive(Debug, Clone)]
pub struct JpegTranscoder {
    quality: u8,
    max_dimensions: Option<(u32, u32)>,
}

impl JpegTranscoder {
    pub fn new(options: &CompressOptions) -> Self {
        Self {
            quality: options.quality.clamp(1, 100),
            max_dimensions: options.max_dimensions(),
        }
    }

    fn fit(&self, image: DynamicImage) -> DynamicImage {
        match self.max_dimensions {
            Some((w, h)) if image.width() > w || image.height() > h => image.resize(w, h, FilterType::Lanczos3),
            _ => image,
        }
    }

    /// Decode upright, fit and encode into memory.
    fn render(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let mut decoder = ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()
            .with_context(|| format!("failed to decode {}", path.display()))?;
        let orientation = decoder.orientation()?;
        let mut image =
            DynamicImage::from_decoder(decoder).with_context(|| format!("failed to decode {}", path.display()))?;
        image.apply_orientation(orientation);
        let image = self.fit(image);

        let mut bytes = Vec::new();
        image
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.quality))
            .with_context(|| format!("failed to encode {}", path.display()))?;
        Ok(bytes)
    }

    fn try_reencode(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let bytes = self.render(path)?;

        let dir = path.parent().ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.gpto-tmp", file_name));

        if let Err(e) = fs::write(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(anyhow::Error::from(e).context(format!("failed to write {}", tmp.display())));
        }

        let target = path.with_extension(OUTPUT_EXTENSION);
        let target = if target == path || !target.exists() {
            target
        } else {
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            free_path(dir, &name, &LiveDisk).0
        };

        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(anyhow::Error::from(e).context(format!("failed to write {}", target.display())));
        }
        if target != path {
            discard_original(path);
        }
        Ok(target)
    }
}

/// The re-encoded file is already in place, so a leftover original is only
/// reported.
fn discard_original(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("{}: re-encoded copy written but original not removed: {}", path.display(), e);
    }
}

impl Transcoder for JpegTranscoder {
    fn output_name(&self, file_name: &str) -> Option<String> {
        let path = Path::new(file_name);
        if !is_supported(path) {
            return None;
        }
        Some(path.with_extension(OUTPUT_EXTENSION).to_string_lossy().into_owned())
    }

    fn output_len(&self, source: &Path) -> Option<u64> {
        if !is_supported(source) {
            return None;
        }
        self.render(source).ok().map(|bytes| bytes.len() as u64)
    }

    fn reencode(&self, path: &Path) -> TranscodeOutcome {
        if !is_supported(path) {
            return TranscodeOutcome::Unchanged(KeepReason::Unsupported);
        }
        match self.try_reencode(path) {
            Ok(new_path) => TranscodeOutcome::Reencoded(new_path),
            Err(e) => TranscodeOutcome::Unchanged(KeepReason::Failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use tempfile::tempdir;

    fn transcoder(max: Option<(u32, u32)>) -> JpegTranscoder {
        JpegTranscoder::new(&CompressOptions {
            enabled: true,
            quality: 80,
            max_width: max.map(|m| m.0),
            max_height: max.map(|m| m.1),
        })
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, image::Rgb([200, 30, 30]))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn test_png_downscaled_to_jpeg() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("shot.png");
        write_png(&png, 400, 200);

        let TranscodeOutcome::Reencoded(out) = transcoder(Some((100, 100))).reencode(&png) else {
            panic!("expected re-encode");
        };
        assert_eq!(out, dir.path().join("shot.jpg"));
        assert!(!png.exists());
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_never_upscales() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("small.png");
        write_png(&png, 40, 30);

        let TranscodeOutcome::Reencoded(out) = transcoder(Some((1000, 1000))).reencode(&png) else {
            panic!("expected re-encode");
        };
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_existing_jpeg_name_is_not_clobbered() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("shot.png");
        write_png(&png, 10, 10);
        fs::write(dir.path().join("shot.jpg"), b"someone else").unwrap();

        let TranscodeOutcome::Reencoded(out) = transcoder(None).reencode(&png) else {
            panic!("expected re-encode");
        };
        assert_eq!(out, dir.path().join("shot (1).jpg"));
        assert_eq!(fs::read(dir.path().join("shot.jpg")).unwrap(), b"someone else");
    }

    #[test]
    fn test_corrupt_image_left_untouched() {
        let dir = tempdir().unwrap();
        let jpg = dir.path().join("broken.jpg");
        fs::write(&jpg, b"definitely not a jpeg").unwrap();

        let outcome = transcoder(None).reencode(&jpg);
        assert!(matches!(outcome, TranscodeOutcome::Unchanged(KeepReason::Failed(_))));
        assert_eq!(fs::read(&jpg).unwrap(), b"definitely not a jpeg");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_output_len_matches_reencoded_file() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("shot.png");
        write_png(&png, 64, 48);
        let t = transcoder(Some((32, 32)));

        let predicted = t.output_len(&png).unwrap();
        let TranscodeOutcome::Reencoded(out) = t.reencode(&png) else {
            panic!("expected re-encode");
        };
        assert_eq!(fs::metadata(&out).unwrap().len(), predicted);
    }

    #[test]
    fn test_output_name() {
        let t = transcoder(None);
        assert_eq!(t.output_name("shot.PNG").as_deref(), Some("shot.jpg"));
        assert_eq!(t.output_name("photo (2).jpeg").as_deref(), Some("photo (2).jpg"));
        assert_eq!(t.output_name("clip.mp4"), None);
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let dir = tempdir().unwrap();
        let jpg = dir.path().join("portrait.jpg");
        let mut bytes = Vec::new();
        RgbImage::from_pixel(40, 20, image::Rgb([10, 120, 10]))
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
            .unwrap();
        // APP1 Exif segment with a single Orientation = 6 (rotate 90 CW) entry.
        let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
        app1.extend_from_slice(b"Exif\0\0MM\0\x2A\0\0\0\x08");
        app1.extend_from_slice(&[0x00, 0x01, 0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x06, 0x00, 0x00]);
        app1.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        bytes.splice(2..2, app1);
        fs::write(&jpg, &bytes).unwrap();

        let TranscodeOutcome::Reencoded(out) = transcoder(None).reencode(&jpg) else {
            panic!("expected re-encode");
        };
        assert_eq!(out, jpg);
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 40));
    }

    #[test]
    fn test_missing_original_after_rename_is_only_logged() {
        let dir = tempdir().unwrap();
        discard_original(&dir.path().join("already-gone.png"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_videos_are_unsupported() {
        let dir = tempdir().unwrap();
        let mp4 = dir.path().join("clip.mp4");
        fs::write(&mp4, b"video").unwrap();
        assert!(matches!(
            transcoder(None).reencode(&mp4),
            TranscodeOutcome::Unchanged(KeepReason::Unsupported)
        ));
    }
}
