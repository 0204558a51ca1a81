//! Pipeline stages
//!
//! A stage is one engine invocation producing exactly one file. Stages are
//! built once and consumed by value when they run.

use crate::asset::MediaAsset;
use crate::audio::AudioPlan;
use crate::dimensions::Dimensions;
use crate::engine::{EncodeInvocation, InputSpec};
use crate::error::{ComposeError, Result};
use crate::filter::{self, FilterGraph, StageLayout, AUDIO_OUT, VIDEO_OUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Succeeded | StageState::Failed)
    }

    /// Validate and apply a transition.
    pub fn advance(self, to: StageState, stage: &str) -> Result<StageState> {
        let legal = matches!(
            (self, to),
            (StageState::Pending, StageState::Running)
                | (StageState::Running, StageState::Succeeded)
                | (StageState::Running, StageState::Failed)
        );
        if legal {
            Ok(to)
        } else {
            Err(ComposeError::InvalidTransition {
                stage: stage.to_string(),
                from: self,
                to,
            })
        }
    }
}

/// How an input file is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InputMode {
    /// Read as-is.
    Media,
    /// A still image repeated as a video stream, for `duration` seconds or
    /// without end.
    LoopedImage { duration: Option<f64>, fps: u32 },
    /// A numbered frame pattern such as `frame_%05d.png`.
    ImageSequence { fps: u32, start_number: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    pub path: PathBuf,
    pub mode: InputMode,
    /// The job does not own this file.
    pub borrowed: bool,
}

impl StageInput {
    pub fn borrowed(path: impl Into<PathBuf>, mode: InputMode) -> Self {
        Self {
            path: path.into(),
            mode,
            borrowed: true,
        }
    }

    /// A file the job wrote into its own workspace.
    pub fn intermediate(path: impl Into<PathBuf>, mode: InputMode) -> Self {
        Self {
            path: path.into(),
            mode,
            borrowed: false,
        }
    }

    /// Input reading `asset`, borrowed exactly when the asset is.
    pub fn for_asset(asset: &MediaAsset, mode: InputMode) -> Self {
        Self {
            path: asset.path().to_path_buf(),
            mode,
            borrowed: asset.is_borrowed(),
        }
    }

    fn to_spec(&self) -> InputSpec {
        let options = match &self.mode {
            InputMode::Media => Vec::new(),
            InputMode::LoopedImage { duration, fps } => {
                let mut opts = vec![
                    "-loop".to_string(),
                    "1".to_string(),
                    "-framerate".to_string(),
                    fps.to_string(),
                ];
                if let Some(d) = duration {
                    opts.push("-t".to_string());
                    opts.push(filter::secs(*d));
                }
                opts
            }
            InputMode::ImageSequence { fps, start_number } => vec![
                "-framerate".to_string(),
                fps.to_string(),
                "-start_number".to_string(),
                start_number.to_string(),
            ],
        };
        InputSpec {
            options,
            path: self.path.clone(),
        }
    }
}

/// Encoder settings for one stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub frame: Dimensions,
    pub fps: u32,
    pub video_codec: String,
    pub pixel_format: String,
    pub crf: u8,
    pub preset: String,
    pub audio_codec: String,
    /// Hard cap on output length.
    pub duration: Option<f64>,
}

impl EncodeParams {
    fn output_options(&self, audio: &AudioPlan) -> Vec<String> {
        let mut opts = vec!["-map".to_string(), format!("[{}]", VIDEO_OUT)];

        if audio.produces_audio() {
            opts.extend(["-map".to_string(), format!("[{}]", AUDIO_OUT)]);
        }

        opts.extend([
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-r".to_string(),
            self.fps.to_string(),
        ]);

        if audio.produces_audio() {
            opts.extend(["-c:a".to_string(), self.audio_codec.clone()]);
        } else {
            opts.push("-an".to_string());
        }

        if let Some(d) = self.duration {
            opts.extend(["-t".to_string(), filter::secs(d)]);
        }

        opts.extend(["-movflags".to_string(), "+faststart".to_string()]);
        opts
    }
}

/// One encode step of a job.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    name: String,
    inputs: Vec<StageInput>,
    filter_graph: FilterGraph,
    audio_plan: AudioPlan,
    output_path: PathBuf,
    params: EncodeParams,
}

impl PipelineStage {
    /// Build a stage, compiling its filter graph from `layout`.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<StageInput>,
        layout: &StageLayout,
        output_path: impl Into<PathBuf>,
        params: EncodeParams,
    ) -> Result<Self> {
        let name = name.into();
        let audio_plan = match layout {
            StageLayout::Still { .. } => AudioPlan::None,
            StageLayout::Composite { audio, .. } => *audio,
        };
        let filter_graph = filter::compile(layout);

        let output_path = output_path.into();
        if let Some(input) = inputs.iter().find(|i| i.borrowed && i.path == output_path) {
            return Err(ComposeError::config(format!(
                "stage '{}' would overwrite borrowed input {}",
                name,
                input.path.display()
            )));
        }

        let needed = filter_graph.video_layers();
        if inputs.len() < needed || inputs.len() > 2 {
            return Err(ComposeError::config(format!(
                "stage '{}' has {} inputs for a {}-layer graph",
                name,
                inputs.len(),
                needed
            )));
        }

        Ok(Self {
            name,
            inputs,
            filter_graph,
            audio_plan,
            output_path,
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[StageInput] {
        &self.inputs
    }

    pub fn filter_graph(&self) -> &FilterGraph {
        &self.filter_graph
    }

    pub fn audio_plan(&self) -> &AudioPlan {
        &self.audio_plan
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn params(&self) -> &EncodeParams {
        &self.params
    }

    pub fn invocation(&self) -> EncodeInvocation {
        EncodeInvocation {
            inputs: self.inputs.iter().map(StageInput::to_spec).collect(),
            filter_graph: self.filter_graph.to_string(),
            output_options: self.params.output_options(&self.audio_plan),
            output_path: self.output_path.clone(),
        }
    }
}
