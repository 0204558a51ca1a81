//! Stage orchestrator
//!
//! Runs a job's stages strictly in order. Each stage moves
//! `Pending -> Running -> {Succeeded, Failed}`; a stage only starts once the
//! previous one has succeeded. The first failure aborts the job. Whatever the
//! outcome, the job's workspace is removed before `run` returns.
//!
//! ```text
//! Pending ──invoke──▶ Running ──exit 0 + output present──▶ Succeeded ──▶ next stage / deliver
//!                        └──── non-zero exit / no output ──▶ Failed ──▶ cleanup, surface stderr
//! ```

use crate::engine::EncodingEngine;
use crate::error::{ComposeError, Result};
use crate::job::{CompositionJob, JobId};
use crate::stage::{PipelineStage, StageState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Handle for cancelling a job from outside.
///
/// An encode already in flight is never interrupted; the job stops at the
/// next stage boundary and cleans up as if it had failed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub audio_plan: String,
    pub elapsed_ms: u64,
}

/// Summary of a successful job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub kind: String,
    pub output_path: PathBuf,
    pub stages: Vec<StageReport>,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
}

pub struct StageOrchestrator<'e> {
    engine: &'e dyn EncodingEngine,
}

impl<'e> StageOrchestrator<'e> {
    pub fn new(engine: &'e dyn EncodingEngine) -> Self {
        Self { engine }
    }

    /// Run every stage of `job`, deliver the last output, and remove the
    /// workspace.
    pub async fn run(&self, job: CompositionJob, cancel: &CancelHandle) -> Result<JobReport> {
        let started = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();
        let (id, kind, mut workspace, stages, final_output) = job.into_parts();

        info!(
            "job {} ({}): {} stage(s) -> {}",
            id,
            kind,
            stages.len(),
            final_output.display()
        );

        let mut reports = Vec::with_capacity(stages.len());
        let outcome = self
            .drive(id, stages, &final_output, cancel, &mut reports)
            .await;

        if let Err(e) = workspace.cleanup().await {
            warn!("job {}: workspace cleanup failed: {}", id, e);
        }

        match outcome {
            Ok(()) => {
                info!("job {} finished in {}ms", id, started.elapsed().as_millis());
                Ok(JobReport {
                    job_id: id.to_string(),
                    kind,
                    output_path: final_output,
                    stages: reports,
                    started_at,
                    finished_at: chrono::Utc::now().to_rfc3339(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                error!("job {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        id: JobId,
        stages: Vec<PipelineStage>,
        final_output: &Path,
        cancel: &CancelHandle,
        reports: &mut Vec<StageReport>,
    ) -> Result<()> {
        let mut last_output: Option<PathBuf> = None;

        for stage in stages {
            if cancel.is_cancelled() {
                warn!("job {} cancelled before stage '{}'", id, stage.name());
                return Err(ComposeError::Cancelled(id.to_string()));
            }

            let stage_start = Instant::now();
            let mut state = StageState::Pending.advance(StageState::Running, stage.name())?;
            info!("job {}: stage '{}' running (audio: {})", id, stage.name(), stage.audio_plan().name());

            let result = self.execute(&stage).await;
            let next = if result.is_ok() {
                StageState::Succeeded
            } else {
                StageState::Failed
            };
            state = state.advance(next, stage.name())?;

            reports.push(StageReport {
                name: stage.name().to_string(),
                state,
                audio_plan: stage.audio_plan().name().to_string(),
                elapsed_ms: stage_start.elapsed().as_millis() as u64,
            });
            result?;

            debug!("job {}: stage '{}' succeeded", id, stage.name());
            last_output = Some(stage.output_path().to_path_buf());

            if cancel.is_cancelled() {
                warn!("job {} cancelled after stage '{}'", id, stage.name());
                return Err(ComposeError::Cancelled(id.to_string()));
            }
        }

        match last_output {
            Some(output) => deliver(&output, final_output).await,
            None => Err(ComposeError::config("job has no stages")),
        }
    }

    /// The single suspension point: one engine invocation.
    async fn execute(&self, stage: &PipelineStage) -> Result<()> {
        let outcome = self.engine.invoke(&stage.invocation()).await?;

        if !outcome.success {
            return Err(ComposeError::Encode {
                stage: stage.name().to_string(),
                message: "encoding engine exited with an error".to_string(),
                stderr: outcome.stderr,
            });
        }

        let produced = tokio::fs::metadata(stage.output_path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !produced {
            return Err(ComposeError::Encode {
                stage: stage.name().to_string(),
                message: format!(
                    "engine reported success but {} was not written",
                    stage.output_path().display()
                ),
                stderr: outcome.stderr,
            });
        }

        Ok(())
    }
}

/// Move the last stage's output to its final location, copying when a rename
/// is not possible (different filesystems).
async fn deliver(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e.into());
    }
    Ok(())
}
