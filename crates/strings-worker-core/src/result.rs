use crate::{CapturedOutput, InputFile, StringsEncoding, TaskError, TaskId, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a single `strings` invocation
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub input: InputFile,
    pub encoding: StringsEncoding,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed: Duration,
}

impl ToolRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Extracted strings stored on the shared volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub uuid: Uuid,
    pub display_name: String,
    pub path: PathBuf,
    pub data_type: String,
    /// UUID of the input file the strings came from
    pub source_file: Option<String>,
    pub string_count: u64,
    pub size_bytes: u64,
    pub truncated: bool,
}

/// Everything one task execution produced
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub workflow_id: Option<String>,
    pub runs: Vec<ToolRun>,
    pub artifacts: Vec<ResultArtifact>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn string_count(&self) -> u64 {
        self.artifacts.iter().map(|a| a.string_count).sum()
    }

    pub fn to_payload(&self) -> TaskResultPayload {
        let mut payload = TaskResultPayload::new(self.artifacts.clone(), self.workflow_id.clone());
        payload.command = Some("strings -a -t d".to_string());
        payload
    }
}

/// Result handed to the next pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    pub output_files: Vec<ResultArtifact>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl TaskResultPayload {
    pub fn new(output_files: Vec<ResultArtifact>, workflow_id: Option<String>) -> Self {
        TaskResultPayload {
            output_files,
            workflow_id,
            command: None,
            meta: serde_json::Map::new(),
        }
    }

    /// JSON, then standard base64
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| TaskError::InvalidPayload(format!("pipe_result: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| TaskError::InvalidPayload(format!("pipe_result: {}", e)))
    }
}
