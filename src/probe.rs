//! Asset prober
//!
//! Wraps the engine's probe capability with per-job caching and maps failures
//! onto [`ComposeError::Probe`].

use crate::asset::{MediaAsset, MediaKind, ProbeInfo};
use crate::engine::EncodingEngine;
use crate::error::{ComposeError, ProbeFailure, Result};
use crate::ffmpeg::FfmpegError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Probes assets for a single job. Results are cached by path.
pub struct AssetProber<'e> {
    engine: &'e dyn EncodingEngine,
    cache: HashMap<PathBuf, ProbeInfo>,
}

impl<'e> AssetProber<'e> {
    pub fn new(engine: &'e dyn EncodingEngine) -> Self {
        Self {
            engine,
            cache: HashMap::new(),
        }
    }

    pub async fn probe(&mut self, path: &Path) -> Result<ProbeInfo> {
        if let Some(info) = self.cache.get(path) {
            return Ok(info.clone());
        }

        let kind = MediaKind::detect(path).map_err(|e| probe_error(path, io_failure(e)))?;

        let report = self.engine.probe(path).await.map_err(|e| {
            let reason = match e {
                FfmpegError::Io(io) => io_failure(io),
                FfmpegError::ProbeFailed(msg) | FfmpegError::InvalidOutput(msg) => {
                    ProbeFailure::Undecodable(msg)
                }
                other => ProbeFailure::Unreadable(other.to_string()),
            };
            probe_error(path, reason)
        })?;

        let (width, height) = report.dimensions().unzip();
        let info = ProbeInfo {
            kind,
            duration_seconds: match kind {
                MediaKind::Image => None,
                MediaKind::Video => report.duration_seconds.filter(|d| d.is_finite() && *d > 0.0),
            },
            has_audio: report.has_audio(),
            width,
            height,
        };

        debug!(
            "probed {}: {:?} duration={:?} audio={}",
            path.display(),
            info.kind,
            info.duration_seconds,
            info.has_audio
        );

        self.cache.insert(path.to_path_buf(), info.clone());
        Ok(info)
    }

    /// Probe an asset unless it already carries its facts.
    pub async fn ensure<'a>(&mut self, asset: &'a MediaAsset) -> Result<&'a ProbeInfo> {
        if let Some(info) = asset.info() {
            return Ok(info);
        }
        let info = self.probe(asset.path()).await?;
        Ok(asset.fill(info))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn io_failure(e: std::io::Error) -> ProbeFailure {
    match e.kind() {
        std::io::ErrorKind::NotFound => ProbeFailure::NotFound,
        _ => ProbeFailure::Unreadable(e.to_string()),
    }
}

fn probe_error(path: &Path, reason: ProbeFailure) -> ComposeError {
    ComposeError::Probe {
        path: path.to_path_buf(),
        reason,
    }
}
