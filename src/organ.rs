//! UMA Organ Interface for soma_compose
//!
//! Exposes the composition pipeline through the stimulus/response pattern so
//! orchestrators can discover and invoke it.
//!
//! ## Available Operations
//!
//! 1. `compose.image_to_video` - Still image to fixed-length clip
//! 2. `compose.sequence_to_video` - Ordered images to clip
//! 3. `compose.overlay` - One timed overlay on a base
//! 4. `compose.layers` - Stacked overlays, one stage per layer
//! 5. `media.probe` - Duration, audio presence, dimensions
//! 6. `media.capabilities` - Capability card query
//! 7. `metrics` - Request counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use soma_compose::organ::{ComposeOrgan, Organ, Stimulus};
//! use soma_compose::{Composer, ComposerConfig};
//! use serde_json::json;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let composer = Composer::with_ffmpeg(ComposerConfig::default());
//! let organ = ComposeOrgan::new(Arc::new(composer));
//!
//! let response = organ.stimulate(Stimulus {
//!     op: "compose.overlay".to_string(),
//!     input: json!({
//!         "base_path": "/uploads/base.mp4",
//!         "overlay_path": "/uploads/logo.png",
//!         "x": 20, "y": 20, "startTime": 1, "endTime": 4
//!     }),
//!     context: HashMap::new(),
//! }).await?;
//! println!("{}", response.output["output_path"]);
//! # Ok(())
//! # }
//! ```

use crate::compose::Composer;
use crate::error::{ComposeError, MediaError};
use crate::metrics::{Metrics, Timer};
use crate::orchestrator::CancelHandle;
use crate::request::{ImageToVideoRequest, LayersRequest, SequenceToVideoRequest};
use crate::validation::validate_input;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// UMA Stimulus - input to organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// UMA Response - output from organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
    pub cost: Option<f64>,
}

/// Organ trait - all SOMA organs implement this
#[async_trait]
pub trait Organ: Send + Sync {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError> {
        self.stimulate_with_cancel(stimulus, &CancelHandle::new()).await
    }

    /// Like [`Organ::stimulate`], but long-running work stops at the next
    /// safe point once `cancel` fires.
    async fn stimulate_with_cancel(
        &self,
        stimulus: Stimulus,
        cancel: &CancelHandle,
    ) -> Result<Response, OrganError>;

    fn describe(&self) -> OrganCard;
}

/// Organ-level errors
#[derive(Debug, Error)]
pub enum OrganError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<MediaError> for OrganError {
    fn from(e: MediaError) -> Self {
        OrganError::InvalidInput(e.to_string())
    }
}

impl OrganError {
    pub fn status_code(&self) -> u16 {
        match self {
            OrganError::UnsupportedOperation(_) | OrganError::InvalidInput(_) => 400,
            OrganError::Compose(e) => e.status_code(),
            OrganError::SerializationError(_) => 500,
        }
    }

    /// Error body returned to the caller.
    pub fn to_output(&self) -> Value {
        let mut output = json!({
            "error": self.to_string(),
            "status": self.status_code(),
        });
        if let OrganError::Compose(e) = self {
            if let Some(diagnostic) = e.diagnostic() {
                output["diagnostic"] = json!(diagnostic);
            }
        }
        output
    }
}

/// Organ capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub division: String,
    pub subsystem: String,
    pub tags: Vec<String>,
    pub execution_modes: Vec<String>,
    pub functions: Vec<FunctionCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl OrganCard {
    pub fn function(&self, name: &str) -> Option<&FunctionCard> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

pub const OPERATIONS: &[&str] = &[
    "compose.image_to_video",
    "compose.sequence_to_video",
    "compose.overlay",
    "compose.layers",
    "media.probe",
    "media.capabilities",
    "metrics",
];

/// Media composition organ
pub struct ComposeOrgan {
    composer: Arc<Composer>,
    metrics: Arc<Metrics>,
    card: OrganCard,
}

impl ComposeOrgan {
    pub fn new(composer: Arc<Composer>) -> Self {
        Self::with_metrics(composer, Metrics::new())
    }

    pub fn with_metrics(composer: Arc<Composer>, metrics: Arc<Metrics>) -> Self {
        Self {
            composer,
            metrics,
            card: capability_card(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    fn validate(&self, op: &str, input: &Value) -> Result<(), OrganError> {
        if let Some(schema) = self.card.function(op).and_then(|f| f.input_schema.as_ref()) {
            validate_input(input, schema)?;
        }
        Ok(())
    }

    async fn dispatch(&self, stimulus: Stimulus, cancel: &CancelHandle) -> Result<Value, OrganError> {
        self.validate(&stimulus.op, &stimulus.input)?;
        let input = &stimulus.input;

        let report = match stimulus.op.as_str() {
            "compose.image_to_video" => {
                let req = ImageToVideoRequest::from_json(input)?;
                self.composer.image_to_video(&req, cancel).await?
            }
            "compose.sequence_to_video" => {
                let req = SequenceToVideoRequest::from_json(input)?;
                self.composer.sequence_to_video(&req, cancel).await?
            }
            "compose.overlay" => {
                let req = LayersRequest::overlay_from_json(input)?;
                self.composer.layers(&req, cancel).await?
            }
            "compose.layers" => {
                let req = LayersRequest::from_json(input)?;
                self.composer.layers(&req, cancel).await?
            }
            "media.probe" => {
                let path = input["path"]
                    .as_str()
                    .map(PathBuf::from)
                    .ok_or_else(|| OrganError::InvalidInput("Missing path".to_string()))?;
                let info = self.composer.probe(&path).await?;
                let mut output = serde_json::to_value(&info)?;
                output["path"] = json!(path);
                return Ok(output);
            }
            "media.capabilities" => return Ok(serde_json::to_value(&self.card)?),
            "metrics" => return Ok(serde_json::to_value(self.metrics.snapshot())?),
            other => return Err(OrganError::UnsupportedOperation(other.to_string())),
        };

        Ok(serde_json::to_value(&report)?)
    }
}

#[async_trait]
impl Organ for ComposeOrgan {
    async fn stimulate_with_cancel(
        &self,
        stimulus: Stimulus,
        cancel: &CancelHandle,
    ) -> Result<Response, OrganError> {
        let timer = Timer::new();
        let op = stimulus.op.clone();
        debug!("stimulus op={}", op);

        match self.dispatch(stimulus, cancel).await {
            Ok(output) => {
                let latency = timer.elapsed_ms();
                self.metrics.record_request(&op, true, latency);
                Ok(Response {
                    ok: true,
                    output,
                    latency_ms: latency,
                    cost: None,
                })
            }
            Err(e) => {
                let latency = timer.elapsed_ms();
                self.metrics.record_request(&op, false, latency);
                if matches!(e, OrganError::Compose(ComposeError::Cancelled(_))) {
                    self.metrics.record_cancelled();
                }
                warn!("{} failed: {}", op, e);

                let mut output = e.to_output();
                if let OrganError::UnsupportedOperation(_) = e {
                    output["available_operations"] = json!(OPERATIONS);
                }
                Ok(Response {
                    ok: false,
                    output,
                    latency_ms: latency,
                    cost: None,
                })
            }
        }
    }

    fn describe(&self) -> OrganCard {
        self.card.clone()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn job_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "job_id": { "type": "string" },
            "kind": { "type": "string" },
            "output_path": { "type": "string" },
            "stages": { "type": "array" },
            "started_at": { "type": "string" },
            "finished_at": { "type": "string" },
            "elapsed_ms": { "type": "integer" }
        }
    })
}

fn layer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "Overlay video or image" },
            "x": { "type": "integer", "description": "Left offset in pixels (default: 0)" },
            "y": { "type": "integer", "description": "Top offset in pixels (default: 0)" },
            "startTime": { "type": "number", "description": "Seconds before the layer appears (default: 0)" },
            "endTime": { "type": "number", "description": "Seconds at which the layer disappears (default: start + layer duration)" },
            "width": { "type": "integer", "description": "Scale the layer to this width" },
            "height": { "type": "integer", "description": "Scale the layer to this height" }
        },
        "required": ["path"]
    })
}

fn capability_card() -> OrganCard {
    OrganCard {
        name: "soma_compose".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "FFmpeg-backed media composition organ: image-to-video, image sequences and timed multi-layer overlays with audio mixing".to_string(),
        division: "media".to_string(),
        subsystem: "composition".to_string(),
        tags: strings(&["media", "video", "audio", "ffmpeg", "composition", "overlay", "slideshow"]),
        execution_modes: strings(&["embedded", "sidecar", "server"]),
        author: Some("SOMA Media Team".to_string()),
        repository: None,
        functions: vec![
            FunctionCard {
                name: "compose.image_to_video".to_string(),
                description: "Render a still image as a fixed-length video clip at even output dimensions".to_string(),
                tags: strings(&["image", "video", "still"]),
                examples: strings(&[
                    "Turn a poster into a 5 second clip",
                    "Make a 701x393 image into a 702x394 video",
                ]),
                idempotent: false,
                side_effects: strings(&["writes video file", "invokes ffmpeg"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "image_path": { "type": "string", "description": "Path to the uploaded image" },
                        "duration": { "type": "number", "description": "Clip length in seconds (default: 5)" },
                        "width": { "type": "integer", "description": "Output width (default: 700)" },
                        "height": { "type": "integer", "description": "Output height (default: 394)" }
                    },
                    "required": ["image_path"]
                })),
                output_schema: job_output_schema(),
            },
            FunctionCard {
                name: "compose.sequence_to_video".to_string(),
                description: "Encode uploaded images, in upload order, as consecutive video frames".to_string(),
                tags: strings(&["image", "sequence", "slideshow", "video"]),
                examples: strings(&["Build a stop-motion clip from numbered photos"]),
                idempotent: false,
                side_effects: strings(&["writes video file", "invokes ffmpeg", "links frames into scratch"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "image_paths": { "type": "array", "items": { "type": "string" }, "description": "Images in upload order, one extension" },
                        "fps": { "type": "integer", "description": "Frame rate (default: 25)" },
                        "width": { "type": "integer", "description": "Output width (default: 700)" },
                        "height": { "type": "integer", "description": "Output height (default: 394)" }
                    },
                    "required": ["image_paths"]
                })),
                output_schema: job_output_schema(),
            },
            FunctionCard {
                name: "compose.overlay".to_string(),
                description: "Overlay a video or image on a base during a time window, mixing audio when both sources have it".to_string(),
                tags: strings(&["overlay", "video", "audio", "mix"]),
                examples: strings(&[
                    "Show a 3 second clip over a base video starting at 1s",
                    "Put a logo in the corner for the whole video",
                ]),
                idempotent: false,
                side_effects: strings(&["writes video file", "invokes ffmpeg"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "base_path": { "type": "string", "description": "Base video or image" },
                        "overlay_path": { "type": "string", "description": "Overlay video or image" },
                        "x": { "type": "integer" },
                        "y": { "type": "integer" },
                        "startTime": { "type": "number" },
                        "endTime": { "type": "number" },
                        "overlayStartTime": { "type": "number", "description": "Takes precedence over startTime" },
                        "width": { "type": "integer", "description": "Output width (default: 1280)" },
                        "height": { "type": "integer", "description": "Output height (default: 720)" },
                        "overlay_width": { "type": "integer" },
                        "overlay_height": { "type": "integer" },
                        "duration": { "type": "number", "description": "Output length cap; length of an image base (default: 5)" }
                    },
                    "required": ["base_path", "overlay_path"]
                })),
                output_schema: job_output_schema(),
            },
            FunctionCard {
                name: "compose.layers".to_string(),
                description: "Stack several timed overlays on a base; each layer is rendered as its own stage".to_string(),
                tags: strings(&["overlay", "layers", "video", "audio"]),
                examples: strings(&["Picture-in-picture plus a watermark over a talk recording"]),
                idempotent: false,
                side_effects: strings(&["writes video file", "invokes ffmpeg"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "base_path": { "type": "string" },
                        "layers": { "type": "array", "items": layer_schema() },
                        "duration": { "type": "number" },
                        "width": { "type": "integer" },
                        "height": { "type": "integer" }
                    },
                    "required": ["base_path", "layers"]
                })),
                output_schema: job_output_schema(),
            },
            FunctionCard {
                name: "media.probe".to_string(),
                description: "Report kind, duration, audio presence and dimensions of a media file".to_string(),
                tags: strings(&["metadata", "ffprobe"]),
                examples: strings(&["Check whether an upload has an audio track"]),
                idempotent: true,
                side_effects: strings(&["invokes ffprobe"]),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Path to the media file" }
                    },
                    "required": ["path"]
                })),
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "kind": { "type": "string" },
                        "duration_seconds": { "type": "number" },
                        "has_audio": { "type": "boolean" },
                        "width": { "type": "integer" },
                        "height": { "type": "integer" }
                    }
                }),
            },
            FunctionCard {
                name: "media.capabilities".to_string(),
                description: "Return organ capability card with all available functions and metadata".to_string(),
                tags: strings(&["metadata", "discovery", "mcp"]),
                examples: strings(&["Query organ capabilities for orchestration"]),
                idempotent: true,
                side_effects: vec![],
                input_schema: None,
                output_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "version": { "type": "string" },
                        "functions": { "type": "array" }
                    }
                }),
            },
            FunctionCard {
                name: "metrics".to_string(),
                description: "Request counters since startup".to_string(),
                tags: strings(&["metrics", "observability"]),
                examples: vec![],
                idempotent: true,
                side_effects: vec![],
                input_schema: None,
                output_schema: json!({ "type": "object" }),
            },
        ],
    }
}
