//! Composition entry points
//!
//! [`Composer`] turns typed requests into jobs: probe the inputs, create a
//! workspace, plan the stages, and hand the job to the orchestrator.

use crate::asset::{MediaAsset, MediaKind, ProbeInfo};
use crate::audio::AudioPlan;
use crate::config::ComposerConfig;
use crate::dimensions::Dimensions;
use crate::engine::EncodingEngine;
use crate::error::{ComposeError, Result};
use crate::ffmpeg::FfmpegEngine;
use crate::filter::{PlacedOverlay, StageLayout, TimeWindow};
use crate::job::{output_path_for, CompositionJob, JobId, JobWorkspace};
use crate::orchestrator::{CancelHandle, JobReport, StageOrchestrator};
use crate::probe::AssetProber;
use crate::request::{ImageToVideoRequest, LayerRequest, LayersRequest, SequenceToVideoRequest};
use crate::sequence;
use crate::stage::{EncodeParams, InputMode, PipelineStage, StageInput};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Composer {
    engine: Arc<dyn EncodingEngine>,
    config: ComposerConfig,
}

impl Composer {
    pub fn new(engine: Arc<dyn EncodingEngine>, config: ComposerConfig) -> Self {
        Self { engine, config }
    }

    /// Composer backed by the ffmpeg/ffprobe binaries named in `config`.
    pub fn with_ffmpeg(config: ComposerConfig) -> Self {
        let engine = FfmpegEngine::new(&config.ffmpeg_bin, &config.ffprobe_bin);
        Self::new(Arc::new(engine), config)
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn EncodingEngine {
        self.engine.as_ref()
    }

    pub async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        AssetProber::new(self.engine()).probe(path).await
    }

    /// Render one image as a clip of `duration` seconds.
    pub async fn image_to_video(
        &self,
        req: &ImageToVideoRequest,
        cancel: &CancelHandle,
    ) -> Result<JobReport> {
        let mut prober = AssetProber::new(self.engine());
        let image = MediaAsset::borrowed(&req.image_path);
        let kind = prober.ensure(&image).await?.kind;

        let duration = req.duration.unwrap_or(self.config.default_duration_secs);
        let frame = Dimensions::resolve(req.width, req.height, self.config.still_dimensions);
        let mode = match kind {
            MediaKind::Image => InputMode::LoopedImage {
                duration: Some(duration),
                fps: self.config.fps,
            },
            MediaKind::Video => InputMode::Media,
        };

        let id = JobId::new();
        let workspace = JobWorkspace::create(&self.config.work_root, id).await?;
        let stage = PipelineStage::new(
            "still",
            vec![StageInput::for_asset(&image, mode)],
            &StageLayout::Still { frame },
            workspace.artifact("still.mp4"),
            self.config.encode_params(frame, Some(duration)),
        );

        self.launch(id, "image_to_video", workspace, stage.map(|s| vec![s]), stem_of(image.path()), cancel)
            .await
    }

    /// Encode uploaded images, in order, as consecutive frames.
    pub async fn sequence_to_video(
        &self,
        req: &SequenceToVideoRequest,
        cancel: &CancelHandle,
    ) -> Result<JobReport> {
        let frame = Dimensions::resolve(req.width, req.height, self.config.still_dimensions);
        let mut params = self.config.encode_params(frame, None);
        if let Some(fps) = req.fps {
            params.fps = fps;
        }

        let id = JobId::new();
        let workspace = JobWorkspace::create(&self.config.work_root, id).await?;
        let stages = plan_sequence(&req.image_paths, &workspace, params).await;

        self.launch(id, "sequence_to_video", workspace, stages, "sequence", cancel)
            .await
    }

    /// Composite each layer over the base, one stage per layer.
    pub async fn layers(&self, req: &LayersRequest, cancel: &CancelHandle) -> Result<JobReport> {
        if req.layers.is_empty() {
            return Err(ComposeError::config("composition needs at least one layer"));
        }

        let mut prober = AssetProber::new(self.engine());
        let base = MediaAsset::borrowed(&req.base_path);
        prober.ensure(&base).await?;
        let layers: Vec<MediaAsset> = req.layers.iter().map(|l| MediaAsset::borrowed(&l.path)).collect();
        for layer in &layers {
            prober.ensure(layer).await?;
        }

        let kind = if req.layers.len() == 1 { "overlay" } else { "layers" };
        let id = JobId::new();
        let workspace = JobWorkspace::create(&self.config.work_root, id).await?;
        let stages = self.plan_layers(req, &base, &layers, &workspace);

        self.launch(id, kind, workspace, stages, stem_of(base.path()), cancel)
            .await
    }

    fn plan_layers(
        &self,
        req: &LayersRequest,
        base: &MediaAsset,
        layers: &[MediaAsset],
        workspace: &JobWorkspace,
    ) -> Result<Vec<PipelineStage>> {
        let frame = Dimensions::resolve(req.width, req.height, self.config.composition_dimensions);
        let fps = self.config.fps;
        let params = self.config.encode_params(frame, req.duration);

        let base_mode = match base.kind() {
            Some(MediaKind::Image) => InputMode::LoopedImage {
                duration: Some(req.duration.unwrap_or(self.config.default_duration_secs)),
                fps,
            },
            _ => InputMode::Media,
        };
        let mut current_input = StageInput::for_asset(base, base_mode);
        let mut current_audio = base.has_audio().unwrap_or(false);
        let mut stages = Vec::with_capacity(layers.len());

        for (index, (layer_req, layer)) in req.layers.iter().zip(layers).enumerate() {
            let number = index + 1;
            let looped = layer.kind() == Some(MediaKind::Image);
            let window = overlay_window(layer_req, layer.duration_seconds());
            let audio = AudioPlan::resolve(
                current_audio,
                layer.has_audio().unwrap_or(false),
                window.length().or(layer.duration_seconds()),
                window.start,
            );

            let overlay = PlacedOverlay {
                x: layer_req.x,
                y: layer_req.y,
                window,
                scale: overlay_scale(layer_req, layer, frame),
                looped,
            };
            let overlay_input = StageInput::for_asset(
                layer,
                if looped {
                    InputMode::LoopedImage { duration: None, fps }
                } else {
                    InputMode::Media
                },
            );

            let output = workspace.artifact(&format!("layer-{}.mp4", number));
            let stage = PipelineStage::new(
                format!("overlay-{}", number),
                vec![current_input, overlay_input],
                &StageLayout::Composite {
                    frame,
                    overlay,
                    audio,
                },
                &output,
                params.clone(),
            )?;
            info!(
                "stage {}: {} at ({}, {}) audio={}",
                stage.name(),
                layer.path().display(),
                overlay.x,
                overlay.y,
                audio.name()
            );
            stages.push(stage);

            // The rendered file is the next stage's base.
            let rendered = MediaAsset::intermediate(
                &output,
                ProbeInfo {
                    kind: MediaKind::Video,
                    duration_seconds: None,
                    has_audio: audio.produces_audio(),
                    width: Some(frame.width),
                    height: Some(frame.height),
                },
            );
            current_audio = rendered.has_audio().unwrap_or(false);
            current_input = StageInput::for_asset(&rendered, InputMode::Media);
        }

        Ok(stages)
    }

    async fn launch(
        &self,
        id: JobId,
        kind: &str,
        mut workspace: JobWorkspace,
        stages: Result<Vec<PipelineStage>>,
        stem: &str,
        cancel: &CancelHandle,
    ) -> Result<JobReport> {
        let stages = match stages {
            Ok(stages) => stages,
            Err(e) => {
                if let Err(cleanup) = workspace.cleanup().await {
                    warn!("job {}: workspace cleanup failed: {}", id, cleanup);
                }
                return Err(e);
            }
        };

        let final_output = output_path_for(&self.config.output_dir, id, stem);
        let job = CompositionJob::new(id, kind, workspace, stages, final_output)?;
        StageOrchestrator::new(self.engine()).run(job, cancel).await
    }
}

async fn plan_sequence(
    images: &[std::path::PathBuf],
    workspace: &JobWorkspace,
    params: EncodeParams,
) -> Result<Vec<PipelineStage>> {
    let frames = sequence::place_frames(images, workspace).await?;
    let stage = sequence::sequence_stage(&frames, workspace, params).await?;
    Ok(vec![stage])
}

/// Visible window for a layer.
///
/// A negative start becomes 0. An explicit end before the start is clamped to
/// the start. Without an explicit end the window lasts the layer's natural
/// duration, or stays open for a still image.
fn overlay_window(layer: &LayerRequest, natural_duration: Option<f64>) -> TimeWindow {
    let start = if layer.start_time < 0.0 {
        warn!(
            "{}: startTime {} is negative, using 0",
            layer.path.display(),
            layer.start_time
        );
        0.0
    } else {
        layer.start_time
    };

    let end = match layer.end_time {
        Some(end) if end < start => {
            warn!(
                "{}: endTime {} is before startTime {}, clamping",
                layer.path.display(),
                end,
                start
            );
            Some(start)
        }
        Some(end) => Some(end),
        None => natural_duration.map(|d| start + d),
    };

    TimeWindow { start, end }
}

/// Explicit overlay size, with missing sides taken from the layer itself.
fn overlay_scale(req: &LayerRequest, layer: &MediaAsset, frame: Dimensions) -> Option<Dimensions> {
    if req.width.is_none() && req.height.is_none() {
        return None;
    }
    let natural = layer
        .info()
        .and_then(|i| Some(Dimensions::new(i.width?, i.height?)))
        .unwrap_or(frame);
    Some(Dimensions::resolve(req.width, req.height, natural))
}

fn stem_of(path: &Path) -> &str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn layer(start: f64, end: Option<f64>) -> LayerRequest {
        LayerRequest {
            path: PathBuf::from("/uploads/over.mp4"),
            x: 0,
            y: 0,
            start_time: start,
            end_time: end,
            width: None,
            height: None,
        }
    }

    #[test]
    fn window_defaults_to_natural_length() {
        let w = overlay_window(&layer(1.0, None), Some(3.0));
        assert_eq!(w, TimeWindow { start: 1.0, end: Some(4.0) });
        assert_eq!(w.length(), Some(3.0));
    }

    #[test]
    fn still_overlay_without_end_stays_open() {
        let w = overlay_window(&layer(2.0, None), None);
        assert_eq!(w.end, None);
    }

    #[test]
    fn inverted_window_is_clamped() {
        let w = overlay_window(&layer(5.0, Some(2.0)), Some(3.0));
        assert_eq!(w, TimeWindow { start: 5.0, end: Some(5.0) });
        let w = overlay_window(&layer(-1.0, Some(2.0)), None);
        assert_eq!(w.start, 0.0);
    }

    #[test]
    fn scale_fills_missing_side_from_layer() {
        let asset = MediaAsset::intermediate(
            "/work/over.mp4",
            ProbeInfo {
                kind: MediaKind::Video,
                duration_seconds: Some(3.0),
                has_audio: false,
                width: Some(640),
                height: Some(360),
            },
        );
        let mut req = layer(0.0, None);
        assert_eq!(overlay_scale(&req, &asset, Dimensions::COMPOSITION), None);

        req.width = Some(321);
        assert_eq!(
            overlay_scale(&req, &asset, Dimensions::COMPOSITION),
            Some(Dimensions::new(322, 360))
        );
    }

    #[test]
    fn stems_fall_back() {
        assert_eq!(stem_of(Path::new("/uploads/cat.png")), "cat");
        assert_eq!(stem_of(Path::new("/")), "output");
    }
}
