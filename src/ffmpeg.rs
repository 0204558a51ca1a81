//! FFmpeg command wrapper and the production [`EncodingEngine`]
//!
//! All operations shell out to the system `ffmpeg`/`ffprobe` binaries
//! (LGPL-safe, no linking).

use crate::engine::{
    EncodeInvocation, EncodeOutcome, EncodingEngine, ProbeReport, StreamInfo, StreamKind,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("{0} not found in system PATH")]
    NotInstalled(String),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("FFprobe failed: {0}")]
    ProbeFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args.extend(args.iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Run to completion and hand back the raw output, whatever the exit status.
    ///
    /// The child is not killed if this future is dropped: an encode that has
    /// started always finishes.
    pub async fn run(self) -> Result<Output, FfmpegError> {
        debug!("exec: {} {}", self.program.display(), self.args.join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FfmpegError::NotInstalled(self.program.display().to_string())
                }
                _ => FfmpegError::ExecutionFailed(e.to_string()),
            })?;

        Ok(output)
    }

    /// Run and fail on a non-zero exit.
    pub async fn execute(self) -> Result<Output, FfmpegError> {
        let output = self.run().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ExecutionFailed(stderr.trim().to_string()));
        }

        Ok(output)
    }
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoding engine backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check both binaries respond to `-version`.
    pub async fn verify(&self) -> Result<(), FfmpegError> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            FfmpegCommand::with_program(program)
                .args(&["-version"])
                .execute()
                .await
                .map_err(|_| FfmpegError::NotInstalled(program.display().to_string()))?;
        }
        Ok(())
    }

    /// Build the full ffmpeg argument list for an invocation.
    pub fn command_for(&self, invocation: &EncodeInvocation) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::with_program(&self.ffmpeg).args(&[
            "-hide_banner",
            "-nostdin",
            "-y",
            "-loglevel",
            "error",
        ]);

        for input in &invocation.inputs {
            cmd = cmd.args(&input.options).input(&input.path);
        }

        if !invocation.filter_graph.is_empty() {
            cmd = cmd.args(&["-filter_complex", invocation.filter_graph.as_str()]);
        }

        cmd.args(&invocation.output_options)
            .output(&invocation.output_path)
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn invoke(&self, invocation: &EncodeInvocation) -> Result<EncodeOutcome, FfmpegError> {
        let output = self.command_for(invocation).run().await?;

        Ok(EncodeOutcome {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport, FfmpegError> {
        let output = FfmpegCommand::with_program(&self.ffprobe)
            .args(&[
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .output(path)
            .run()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ProbeFailed(stderr.trim().to_string()));
        }

        parse_probe_json(&output.stdout)
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_json(stdout: &[u8]) -> Result<ProbeReport, FfmpegError> {
    let parsed: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| FfmpegError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let format = parsed.get("format").and_then(|f| f.as_object());

    let mut duration = format
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok());

    let streams: Vec<StreamInfo> = parsed
        .get("streams")
        .and_then(|s| s.as_array())
        .map(|streams| {
            streams
                .iter()
                .map(|st| StreamInfo {
                    kind: match st.get("codec_type").and_then(|t| t.as_str()) {
                        Some("video") => StreamKind::Video,
                        Some("audio") => StreamKind::Audio,
                        _ => StreamKind::Other,
                    },
                    codec: st
                        .get("codec_name")
                        .and_then(|c| c.as_str())
                        .map(|s| s.to_string()),
                    width: st.get("width").and_then(|x| x.as_u64()).map(|x| x as u32),
                    height: st.get("height").and_then(|x| x.as_u64()).map(|x| x as u32),
                })
                .collect()
        })
        .unwrap_or_default();

    // Some containers only report duration per stream.
    if duration.is_none() {
        duration = parsed
            .get("streams")
            .and_then(|s| s.as_array())
            .and_then(|s| {
                s.iter()
                    .filter_map(|st| st.get("duration").and_then(|d| d.as_str()))
                    .filter_map(|d| d.parse::<f64>().ok())
                    .reduce(f64::max)
            });
    }

    if streams.is_empty() {
        return Err(FfmpegError::InvalidOutput(
            "ffprobe reported no streams".to_string(),
        ));
    }

    Ok(ProbeReport {
        duration_seconds: duration,
        streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InputSpec;

    fn is_ffmpeg_installed() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn parses_video_with_audio() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
                {"codec_type": "audio", "codec_name": "aac", "duration": "5.000000"}
            ],
            "format": {"duration": "5.021000", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"}
        }"#;

        let report = parse_probe_json(json).unwrap();
        assert_eq!(report.duration_seconds, Some(5.021));
        assert!(report.has_audio());
        assert_eq!(report.dimensions(), Some((1280, 720)));
    }

    #[test]
    fn still_image_has_no_duration_or_audio() {
        let json = br#"{
            "streams": [{"codec_type": "video", "codec_name": "png", "width": 701, "height": 393}],
            "format": {"format_name": "png_pipe"}
        }"#;

        let report = parse_probe_json(json).unwrap();
        assert_eq!(report.duration_seconds, None);
        assert!(!report.has_audio());
        assert_eq!(report.dimensions(), Some((701, 393)));
    }

    #[test]
    fn falls_back_to_stream_duration() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 2, "height": 2, "duration": "2.5"},
                {"codec_type": "audio", "duration": "3.0"}
            ],
            "format": {}
        }"#;

        let report = parse_probe_json(json).unwrap();
        assert_eq!(report.duration_seconds, Some(3.0));
    }

    #[test]
    fn garbage_is_invalid_output() {
        assert!(matches!(
            parse_probe_json(b"not json"),
            Err(FfmpegError::InvalidOutput(_))
        ));
        assert!(matches!(
            parse_probe_json(br#"{"streams": [], "format": {}}"#),
            Err(FfmpegError::InvalidOutput(_))
        ));
    }

    #[test]
    fn command_places_input_options_before_each_input() {
        let engine = FfmpegEngine::default();
        let invocation = EncodeInvocation {
            inputs: vec![
                InputSpec {
                    options: vec!["-loop".into(), "1".into(), "-t".into(), "5".into()],
                    path: PathBuf::from("/uploads/base.png"),
                },
                InputSpec {
                    options: vec![],
                    path: PathBuf::from("/uploads/clip.mp4"),
                },
            ],
            filter_graph: "[0:v]null[vout]".into(),
            output_options: vec!["-map".into(), "[vout]".into(), "-an".into()],
            output_path: PathBuf::from("/work/job/stage-1.mp4"),
        };

        let args = engine.command_for(&invocation).arg_list().to_vec();
        let loop_pos = args.iter().position(|a| a == "-loop").unwrap();
        let first_input = args.iter().position(|a| a == "/uploads/base.png").unwrap();
        let second_input = args.iter().position(|a| a == "/uploads/clip.mp4").unwrap();
        let graph = args.iter().position(|a| a == "-filter_complex").unwrap();

        assert!(loop_pos < first_input);
        assert!(first_input < second_input);
        assert!(second_input < graph);
        assert_eq!(args.last().unwrap(), "/work/job/stage-1.mp4");
        assert!(args.contains(&"-y".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_reports_not_installed() {
        let result = FfmpegCommand::with_program("/nonexistent/ffmpeg-binary")
            .args(&["-version"])
            .run()
            .await;
        assert!(matches!(result, Err(FfmpegError::NotInstalled(_))));
    }

    #[tokio::test]
    async fn probe_rejects_non_media_file() {
        if !is_ffmpeg_installed() {
            eprintln!("skipping: ffmpeg not on PATH");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain text, not media").unwrap();

        let result = FfmpegEngine::default().probe(&path).await;
        assert!(result.is_err());
    }
}
