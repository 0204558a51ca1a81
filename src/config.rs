//! Composer configuration

use crate::dimensions::Dimensions;
use crate::error::{ComposeError, Result};
use crate::stage::EncodeParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings shared by every job a composer runs.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Parent of the per-job scratch directories.
    pub work_root: PathBuf,
    /// Where finished videos are written.
    pub output_dir: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub fps: u32,
    pub video_codec: String,
    pub pixel_format: String,
    pub crf: u8,
    pub preset: String,
    pub audio_codec: String,
    pub default_duration_secs: f64,
    /// Frame size for image and sequence clips.
    pub still_dimensions: Dimensions,
    /// Frame size for overlay compositions.
    pub composition_dimensions: Dimensions,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            work_root: tmp.join("soma_compose").join("work"),
            output_dir: tmp.join("soma_compose").join("output"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            fps: 25,
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 23,
            preset: "veryfast".to_string(),
            audio_codec: "aac".to_string(),
            default_duration_secs: 5.0,
            still_dimensions: Dimensions::STILL,
            composition_dimensions: Dimensions::COMPOSITION,
        }
    }
}

impl ComposerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ComposeError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(ComposeError::config("fps must be positive"));
        }
        if !(self.default_duration_secs.is_finite() && self.default_duration_secs > 0.0) {
            return Err(ComposeError::config("default_duration_secs must be positive"));
        }
        if self.crf > 51 {
            return Err(ComposeError::config("crf must be between 0 and 51"));
        }
        if self.work_root == self.output_dir {
            return Err(ComposeError::config(
                "work_root and output_dir must be different directories",
            ));
        }
        Ok(())
    }

    /// Encoder settings for a stage rendering at `frame`.
    pub fn encode_params(&self, frame: Dimensions, duration: Option<f64>) -> EncodeParams {
        EncodeParams {
            frame: frame.normalized(),
            fps: self.fps,
            video_codec: self.video_codec.clone(),
            pixel_format: self.pixel_format.clone(),
            crf: self.crf,
            preset: self.preset.clone(),
            audio_codec: self.audio_codec.clone(),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ComposerConfig::default();
        assert_eq!(config.fps, 25);
        assert_eq!(config.crf, 23);
        assert_eq!(config.default_duration_secs, 5.0);
        assert_eq!(config.still_dimensions, Dimensions::new(700, 394));
        assert_eq!(config.composition_dimensions, Dimensions::new(1280, 720));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = ComposerConfig::from_json(
            r#"{"fps": 30, "work_root": "/var/lib/compose/work", "still_dimensions": {"width": 641, "height": 481}}"#,
        )
        .unwrap();
        assert_eq!(config.fps, 30);
        assert_eq!(config.work_root, PathBuf::from("/var/lib/compose/work"));
        assert_eq!(config.video_codec, "libx264");

        let params = config.encode_params(config.still_dimensions, Some(5.0));
        assert_eq!(params.frame, Dimensions::new(642, 482));
        assert_eq!(params.fps, 30);
    }

    #[test]
    fn rejects_unusable_values() {
        assert!(ComposerConfig::from_json(r#"{"fps": 0}"#).is_err());
        assert!(ComposerConfig::from_json(r#"{"crf": 60}"#).is_err());
        assert!(ComposerConfig::from_json(r#"{"work_root": "/a", "output_dir": "/a"}"#).is_err());
        assert!(matches!(
            ComposerConfig::from_json("not json"),
            Err(ComposeError::Config(_))
        ));
    }
}
