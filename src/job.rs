//! Composition jobs and their scratch workspaces

use crate::error::{ComposeError, Result};
use crate::stage::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Job-private scratch directory, `<work_root>/job-<id>`.
///
/// Removed by [`JobWorkspace::cleanup`]; dropping an uncleaned workspace
/// removes it synchronously.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    cleaned: bool,
}

impl JobWorkspace {
    /// Create the directory. Fails if it already exists.
    pub async fn create(work_root: &Path, id: JobId) -> Result<Self> {
        tokio::fs::create_dir_all(work_root).await?;
        let root = work_root.join(format!("job-{}", id));
        tokio::fs::create_dir(&root).await?;
        debug!("created workspace {}", root.display());
        Ok(Self {
            root,
            cleaned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path for an intermediate file inside the workspace.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    pub async fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove the workspace and everything in it.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.cleaned {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.cleaned = true;
        debug!("removed workspace {}", self.root.display());
        Ok(())
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {}", self.root.display(), e);
            }
        }
    }
}

/// An ordered list of stages plus the workspace they write into.
#[derive(Debug)]
pub struct CompositionJob {
    id: JobId,
    kind: String,
    workspace: JobWorkspace,
    stages: Vec<PipelineStage>,
    final_output: PathBuf,
}

impl CompositionJob {
    /// Assemble a job. Every stage must write inside the workspace and the
    /// final output must be outside it.
    pub fn new(
        id: JobId,
        kind: impl Into<String>,
        workspace: JobWorkspace,
        stages: Vec<PipelineStage>,
        final_output: impl Into<PathBuf>,
    ) -> Result<Self> {
        let final_output = final_output.into();

        if stages.is_empty() {
            return Err(ComposeError::config("a job needs at least one stage"));
        }
        if let Some(stage) = stages
            .iter()
            .find(|s| !workspace.contains(s.output_path()))
        {
            return Err(ComposeError::config(format!(
                "stage '{}' writes outside the job workspace",
                stage.name()
            )));
        }
        if workspace.contains(&final_output) {
            return Err(ComposeError::config(
                "final output must not live in the job workspace",
            ));
        }

        Ok(Self {
            id,
            kind: kind.into(),
            workspace,
            stages,
            final_output,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn workspace(&self) -> &JobWorkspace {
        &self.workspace
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn final_output(&self) -> &Path {
        &self.final_output
    }

    pub(crate) fn into_parts(self) -> (JobId, String, JobWorkspace, Vec<PipelineStage>, PathBuf) {
        (self.id, self.kind, self.workspace, self.stages, self.final_output)
    }
}

/// Unique final output path: `<output_dir>/<stem>-<job id>.mp4`.
pub fn output_path_for(output_dir: &Path, id: JobId, stem: &str) -> PathBuf {
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "output".to_string() } else { stem };
    output_dir.join(format!("{}-{}.mp4", stem, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[tokio::test]
    async fn workspace_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = JobWorkspace::create(root.path(), JobId::new()).await.unwrap();
        let frames = ws.subdir("frames").await.unwrap();
        tokio::fs::write(frames.join("frame_00001.png"), b"x").await.unwrap();
        tokio::fs::write(ws.artifact("stage-1.mp4"), b"x").await.unwrap();
        let path = ws.path().to_path_buf();

        assert!(ws.contains(&ws.artifact("stage-1.mp4")));
        ws.cleanup().await.unwrap();
        assert!(!path.exists());
        // Idempotent.
        ws.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_removes_workspace() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = JobWorkspace::create(root.path(), JobId::new()).await.unwrap();
            tokio::fs::write(ws.artifact("partial.mp4"), b"x").await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn same_id_cannot_share_a_workspace() {
        let root = tempfile::tempdir().unwrap();
        let id = JobId::new();
        let _first = JobWorkspace::create(root.path(), id).await.unwrap();
        assert!(JobWorkspace::create(root.path(), id).await.is_err());
    }

    #[test]
    fn output_names_are_sanitised_and_unique() {
        let dir = Path::new("/srv/videos");
        let a = output_path_for(dir, JobId::new(), "my clip/../x");
        let b = output_path_for(dir, JobId::new(), "my clip/../x");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(dir));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("my_clip____x-"));
        assert!(name.ends_with(".mp4"));
    }
}
