//! Media assets referenced by a composition job

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file by its magic bytes, falling back to the extension.
    ///
    /// Anything that is not recognisably an image is treated as video; the
    /// prober will reject it later if it is not decodable at all.
    pub fn detect(path: &Path) -> std::io::Result<MediaKind> {
        if let Some(kind) = infer::get_from_path(path)? {
            match kind.matcher_type() {
                infer::MatcherType::Image => return Ok(MediaKind::Image),
                infer::MatcherType::Video | infer::MatcherType::Audio => {
                    return Ok(MediaKind::Video)
                }
                _ => {}
            }
        }
        Ok(Self::from_extension(path))
    }

    pub fn from_extension(path: &Path) -> MediaKind {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff" | "avif" => {
                MediaKind::Image
            }
            _ => MediaKind::Video,
        }
    }
}

/// Facts the prober establishes about an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub kind: MediaKind,
    /// Natural duration. Always `None` for still images.
    pub duration_seconds: Option<f64>,
    pub has_audio: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A file a job reads from.
///
/// Probe results are filled in once, on first need, and never change after.
#[derive(Debug)]
pub struct MediaAsset {
    path: PathBuf,
    borrowed: bool,
    info: OnceLock<ProbeInfo>,
}

impl MediaAsset {
    /// An asset the job does not own (an upload). Never deleted by the job.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            borrowed: true,
            info: OnceLock::new(),
        }
    }

    /// An artifact produced inside the job's scratch directory.
    pub fn intermediate(path: impl Into<PathBuf>, info: ProbeInfo) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(info);
        Self {
            path: path.into(),
            borrowed: false,
            info: cell,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    pub fn info(&self) -> Option<&ProbeInfo> {
        self.info.get()
    }

    /// Record probe results. The first value wins.
    pub(crate) fn fill(&self, info: ProbeInfo) -> &ProbeInfo {
        self.info.get_or_init(|| info)
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.info().map(|i| i.kind)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.info().and_then(|i| i.duration_seconds)
    }

    pub fn has_audio(&self) -> Option<bool> {
        self.info().map(|i| i.has_audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_info() -> ProbeInfo {
        ProbeInfo {
            kind: MediaKind::Video,
            duration_seconds: Some(3.0),
            has_audio: true,
            width: Some(640),
            height: Some(360),
        }
    }

    #[test]
    fn extension_fallback() {
        assert_eq!(MediaKind::from_extension(Path::new("a/b.PNG")), MediaKind::Image);
        assert_eq!(MediaKind::from_extension(Path::new("a/b.jpeg")), MediaKind::Image);
        assert_eq!(MediaKind::from_extension(Path::new("a/b.mp4")), MediaKind::Video);
        assert_eq!(MediaKind::from_extension(Path::new("noext")), MediaKind::Video);
    }

    #[test]
    fn detect_uses_magic_bytes_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        // PNG signature behind a misleading extension.
        let path = dir.path().join("upload.mp4");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
        assert_eq!(MediaKind::detect(&path).unwrap(), MediaKind::Image);
    }

    #[test]
    fn detect_missing_file_is_io_error() {
        let err = MediaKind::detect(Path::new("/nonexistent/upload.png")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn probe_info_is_write_once() {
        let asset = MediaAsset::borrowed("/uploads/overlay.mp4");
        assert!(asset.info().is_none());

        asset.fill(video_info());
        let mut other = video_info();
        other.has_audio = false;
        asset.fill(other);

        assert_eq!(asset.has_audio(), Some(true));
        assert_eq!(asset.duration_seconds(), Some(3.0));
        assert!(asset.is_borrowed());
    }

    #[test]
    fn intermediates_are_owned_and_prefilled() {
        let asset = MediaAsset::intermediate("/work/job/stage-1.mp4", video_info());
        assert!(!asset.is_borrowed());
        assert_eq!(asset.kind(), Some(MediaKind::Video));
    }
}
