use async_trait::async_trait;
use std::path::Path;
use strings_worker_core::{CapturedOutput, ExecutionError, InputFile, ResultArtifact, StringsEncoding};
use tracing::debug;
use uuid::Uuid;

/// Extracted strings of one input/encoding pair, ready to be stored
#[derive(Debug, Clone, Copy)]
pub struct NewArtifact<'a> {
    pub output_dir: &'a Path,
    pub input: &'a InputFile,
    pub encoding: StringsEncoding,
    pub contents: &'a CapturedOutput,
}

impl NewArtifact<'_> {
    pub fn display_name(&self) -> String {
        format!("{}.{}_strings", self.input.display_name, self.encoding.name())
    }

    pub fn data_type(&self) -> String {
        format!("worker:strings:{}", self.encoding.name())
    }
}

/// Where result artifacts end up
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, artifact: NewArtifact<'_>) -> Result<ResultArtifact, ExecutionError>;

    /// Remove an artifact of a task that failed after storing it
    async fn discard(&self, artifact: &ResultArtifact) -> std::io::Result<()>;
}

/// Writes artifacts as files named by UUID into the output directory.
///
/// Files are written under a temporary name and renamed, so a reader never
/// sees a partial artifact.
#[derive(Debug, Default, Clone)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        FsArtifactStore
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, artifact: NewArtifact<'_>) -> Result<ResultArtifact, ExecutionError> {
        let uuid = Uuid::new_v4();
        let file_name = uuid.simple().to_string();
        let path = artifact.output_dir.join(&file_name);
        let partial = artifact.output_dir.join(format!(".{}.partial", file_name));

        tokio::fs::create_dir_all(artifact.output_dir)
            .await
            .map_err(|e| ExecutionError::artifact_write(artifact.output_dir, e))?;

        if let Err(e) = tokio::fs::write(&partial, &artifact.contents.bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ExecutionError::artifact_write(&path, e));
        }
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| ExecutionError::artifact_write(&path, e))?;

        debug!(path = %path.display(), bytes = artifact.contents.bytes.len(), "Stored artifact");

        Ok(ResultArtifact {
            uuid,
            display_name: artifact.display_name(),
            path,
            data_type: artifact.data_type(),
            source_file: artifact.input.uuid.clone(),
            string_count: artifact.contents.line_count(),
            size_bytes: artifact.contents.bytes.len() as u64,
            truncated: artifact.contents.truncated,
        })
    }

    async fn discard(&self, artifact: &ResultArtifact) -> std::io::Result<()> {
        match tokio::fs::remove_file(&artifact.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => {
                debug!(path = %artifact.path.display(), "Discarded artifact");
                Ok(())
            }
        }
    }
}
