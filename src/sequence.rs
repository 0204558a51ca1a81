//! Image-sequence assembly
//!
//! Uploaded images are placed into the job workspace as a numbered frame
//! sequence (`frames/frame_00001.png`, ...) in upload order, then encoded by a
//! single still stage. Uploads are hard-linked when possible and copied
//! otherwise; the originals are never moved.

use crate::error::{ComposeError, Result};
use crate::filter::StageLayout;
use crate::job::JobWorkspace;
use crate::stage::{EncodeParams, InputMode, PipelineStage, StageInput};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FRAMES_DIR: &str = "frames";
const FIRST_FRAME: usize = 1;

/// Frames placed in a workspace, ready to encode.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<PathBuf>,
    pattern: PathBuf,
}

impl FrameSequence {
    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    /// `printf`-style input pattern, e.g. `.../frames/frame_%05d.png`.
    pub fn pattern(&self) -> &Path {
        &self.pattern
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Shared lowercase extension of every image, or a config error.
fn common_extension(images: &[PathBuf]) -> Result<String> {
    let mut ext: Option<String> = None;
    for image in images {
        let this = image
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| {
                ComposeError::config(format!("{} has no file extension", image.display()))
            })?;
        match &ext {
            None => ext = Some(this),
            Some(seen) if *seen == this => {}
            Some(seen) => {
                return Err(ComposeError::config(format!(
                    "image sequence mixes .{} and .{} files",
                    seen, this
                )))
            }
        }
    }
    ext.ok_or_else(|| ComposeError::config("image sequence is empty"))
}

async fn link_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::hard_link(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(_) => tokio::fs::copy(from, to).await.map(|_| ()),
    }
}

/// Place `images` into `<workspace>/frames` with 1-based frame numbers.
pub async fn place_frames(images: &[PathBuf], workspace: &JobWorkspace) -> Result<FrameSequence> {
    let ext = common_extension(images)?;
    let dir = workspace.subdir(FRAMES_DIR).await?;

    let mut frames = Vec::with_capacity(images.len());
    for (offset, image) in images.iter().enumerate() {
        let index = FIRST_FRAME + offset;
        let frame = dir.join(format!("frame_{:05}.{}", index, ext));

        match link_or_copy(image, &frame).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ComposeError::AssetMissing {
                    index,
                    path: image.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        debug!("frame {} <- {}", index, image.display());
        frames.push(frame);
    }

    Ok(FrameSequence {
        frames,
        pattern: dir.join(format!("frame_%05d.{}", ext)),
    })
}

/// Build the single encode stage for a placed sequence.
///
/// Every frame must still be present; a gap would make the demuxer stop
/// early and silently drop the rest.
pub async fn sequence_stage(
    sequence: &FrameSequence,
    workspace: &JobWorkspace,
    mut params: EncodeParams,
) -> Result<PipelineStage> {
    for (offset, frame) in sequence.frames().iter().enumerate() {
        if !tokio::fs::try_exists(frame).await.unwrap_or(false) {
            return Err(ComposeError::AssetMissing {
                index: FIRST_FRAME + offset,
                path: frame.clone(),
            });
        }
    }

    params.frame = params.frame.normalized();
    // Length follows from frame count and rate.
    params.duration = None;

    let input = StageInput::intermediate(
        sequence.pattern(),
        InputMode::ImageSequence {
            fps: params.fps,
            start_number: FIRST_FRAME,
        },
    );
    let layout = StageLayout::Still {
        frame: params.frame,
    };

    info!(
        "sequence of {} frame(s) at {} fps -> {}",
        sequence.len(),
        params.fps,
        params.frame
    );
    PipelineStage::new(
        "sequence",
        vec![input],
        &layout,
        workspace.artifact("sequence.mp4"),
        params,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::Dimensions;
    use crate::job::JobId;

    fn params() -> EncodeParams {
        EncodeParams {
            frame: Dimensions::new(701, 393),
            fps: 25,
            video_codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            crf: 23,
            preset: "veryfast".into(),
            audio_codec: "aac".into(),
            duration: Some(5.0),
        }
    }

    async fn uploads(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for name in names {
            let path = dir.join(name);
            tokio::fs::write(&path, name.as_bytes()).await.unwrap();
            paths.push(path);
        }
        paths
    }

    #[tokio::test]
    async fn frames_follow_upload_order() {
        let tmp = tempfile::tempdir().unwrap();
        let images = uploads(tmp.path(), &["zeta.png", "alpha.PNG", "mid.png"]).await;
        let ws = JobWorkspace::create(&tmp.path().join("work"), JobId::new())
            .await
            .unwrap();

        let seq = place_frames(&images, &ws).await.unwrap();

        assert_eq!(seq.len(), 3);
        assert!(seq.frames()[0].ends_with("frames/frame_00001.png"));
        assert!(seq.frames()[2].ends_with("frames/frame_00003.png"));
        assert_eq!(std::fs::read(&seq.frames()[0]).unwrap(), b"zeta.png");
        assert_eq!(std::fs::read(&seq.frames()[1]).unwrap(), b"alpha.PNG");
        assert!(seq.pattern().ends_with("frames/frame_%05d.png"));
        // Uploads stay where they were.
        for image in &images {
            assert!(image.exists());
        }
    }

    #[tokio::test]
    async fn empty_and_mixed_sequences_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(tmp.path(), JobId::new()).await.unwrap();

        let empty = place_frames(&[], &ws).await;
        assert!(matches!(empty, Err(ComposeError::Config(_))));

        let images = uploads(tmp.path(), &["a.png", "b.jpg"]).await;
        let mixed = place_frames(&images, &ws).await;
        assert!(matches!(mixed, Err(ComposeError::Config(_))));
    }

    #[tokio::test]
    async fn missing_upload_reports_its_index() {
        let tmp = tempfile::tempdir().unwrap();
        let mut images = uploads(tmp.path(), &["a.png"]).await;
        images.push(tmp.path().join("gone.png"));
        let ws = JobWorkspace::create(&tmp.path().join("work"), JobId::new())
            .await
            .unwrap();

        match place_frames(&images, &ws).await {
            Err(ComposeError::AssetMissing { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected AssetMissing, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stage_normalizes_and_detects_removed_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let images = uploads(tmp.path(), &["a.jpg", "b.jpg"]).await;
        let ws = JobWorkspace::create(&tmp.path().join("work"), JobId::new())
            .await
            .unwrap();
        let seq = place_frames(&images, &ws).await.unwrap();

        let stage = sequence_stage(&seq, &ws, params()).await.unwrap();
        assert_eq!(stage.params().frame, Dimensions::new(702, 394));
        assert_eq!(stage.params().duration, None);
        let inv = stage.invocation();
        assert_eq!(inv.inputs[0].options, vec!["-framerate", "25", "-start_number", "1"]);
        assert!(ws.contains(stage.output_path()));

        std::fs::remove_file(&seq.frames()[1]).unwrap();
        match sequence_stage(&seq, &ws, params()).await {
            Err(ComposeError::AssetMissing { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected AssetMissing, got {:?}", other),
        }
    }
}
