//! soma_compose - FFmpeg-based media composition for the SOMA platform
//!
//! Turns images, image sequences and timed overlays into a single video by
//! running an ordered list of encode stages. All encoding shells out to the
//! system `ffmpeg` binary (LGPL-safe, no linking) through the
//! [`EncodingEngine`] trait.

pub mod asset;
pub mod audio;
pub mod compose;
pub mod config;
pub mod dimensions;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod filter;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod organ;
pub mod probe;
pub mod request;
pub mod sequence;
pub mod stage;
pub mod validation;

pub use asset::{MediaAsset, MediaKind, ProbeInfo};
pub use audio::{AudioPlan, OverlayAudio};
pub use compose::Composer;
pub use config::ComposerConfig;
pub use dimensions::{normalize, Dimensions};
pub use engine::{EncodeInvocation, EncodeOutcome, EncodingEngine, InputSpec, ProbeReport, StreamInfo, StreamKind};
pub use error::{ComposeError, MediaError, ProbeFailure, Result};
pub use ffmpeg::{FfmpegCommand, FfmpegEngine, FfmpegError};
pub use filter::{FilterGraph, PlacedOverlay, StageLayout, TimeWindow};
pub use job::{CompositionJob, JobId, JobWorkspace};
pub use orchestrator::{CancelHandle, JobReport, StageOrchestrator, StageReport};
pub use request::{ImageToVideoRequest, LayerRequest, LayersRequest, SequenceToVideoRequest};
pub use stage::{EncodeParams, InputMode, PipelineStage, StageInput, StageState};
