//! Encoding engine contract
//!
//! The composition core never builds engine command lines itself. It hands an
//! [`EncodeInvocation`] to an [`EncodingEngine`] and waits for the outcome.

use crate::ffmpeg::FfmpegError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One input file plus the demuxer options that precede it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub options: Vec<String>,
    pub path: PathBuf,
}

/// Everything the engine needs for a single encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeInvocation {
    pub inputs: Vec<InputSpec>,
    pub filter_graph: String,
    pub output_options: Vec<String>,
    pub output_path: PathBuf,
}

impl EncodeInvocation {
    /// True when the output options request an audio stream.
    pub fn maps_audio(&self) -> bool {
        self.output_options
            .windows(2)
            .any(|w| w[0] == "-map" && (w[1].starts_with("[a") || w[1].contains(":a")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOutcome {
    pub success: bool,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Raw metadata returned by the engine's probe capability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeReport {
    pub duration_seconds: Option<f64>,
    pub streams: Vec<StreamInfo>,
}

impl ProbeReport {
    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(|s| s.kind == StreamKind::Audio)
    }

    /// Dimensions of the first video stream.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.streams
            .iter()
            .filter(|s| s.kind == StreamKind::Video)
            .find_map(|s| Some((s.width?, s.height?)))
    }
}

/// External encoder seam. `FfmpegEngine` is the production implementation.
#[async_trait]
pub trait EncodingEngine: Send + Sync {
    /// Run one encode to completion. A non-zero exit is reported through
    /// `EncodeOutcome::success`, not as an `Err`.
    async fn invoke(&self, invocation: &EncodeInvocation) -> Result<EncodeOutcome, FfmpegError>;

    async fn probe(&self, path: &Path) -> Result<ProbeReport, FfmpegError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_audio_detects_audio_label() {
        let mut inv = EncodeInvocation {
            inputs: vec![],
            filter_graph: String::new(),
            output_options: vec!["-map".into(), "[vout]".into(), "-an".into()],
            output_path: PathBuf::from("out.mp4"),
        };
        assert!(!inv.maps_audio());

        inv.output_options = vec![
            "-map".into(),
            "[vout]".into(),
            "-map".into(),
            "[aout]".into(),
        ];
        assert!(inv.maps_audio());
    }

    #[test]
    fn report_dimensions_skip_audio_streams() {
        let report = ProbeReport {
            duration_seconds: Some(3.0),
            streams: vec![
                StreamInfo {
                    kind: StreamKind::Audio,
                    codec: Some("aac".into()),
                    width: None,
                    height: None,
                },
                StreamInfo {
                    kind: StreamKind::Video,
                    codec: Some("h264".into()),
                    width: Some(640),
                    height: Some(360),
                },
            ],
        };
        assert!(report.has_audio());
        assert_eq!(report.dimensions(), Some((640, 360)));
    }
}
