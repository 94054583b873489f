use crate::{StringsEncoding, Task, TaskError, TaskId, Result, TASK_TYPE};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Payload as the pipeline sends it: loosely typed JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskPayload {
    /// Base64 result of the previous pipeline step; its output files
    /// replace `input_files` when present
    #[serde(default)]
    pub pipe_result: Option<String>,
    #[serde(default)]
    pub input_files: Vec<RawInputFile>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    /// Encoding name -> checkbox value
    #[serde(default)]
    pub task_config: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub min_length: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInputFile {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub path: Option<PathBuf>,
}

impl RawInputFile {
    fn into_input_file(self) -> Result<InputFile> {
        let path = self
            .path
            .ok_or_else(|| TaskError::InvalidPayload("input file without a path".to_string()))?;
        let display_name = self
            .display_name
            .unwrap_or_else(|| default_display_name(&path));
        Ok(InputFile {
            uuid: self.uuid,
            display_name,
            path,
        })
    }
}

/// The part of a previous step's result this worker consumes. Steps differ
/// in what else they attach to each file record.
#[derive(Debug, Deserialize)]
struct PipedResult {
    #[serde(default)]
    output_files: Vec<RawInputFile>,
}

fn decode_pipe_result(encoded: &str) -> Result<Vec<RawInputFile>> {
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| TaskError::InvalidPayload(format!("pipe_result: {}", e)))?;
    let piped: PipedResult = serde_json::from_slice(&json)
        .map_err(|e| TaskError::InvalidPayload(format!("pipe_result: {}", e)))?;
    Ok(piped.output_files)
}

/// Input file referenced by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub uuid: Option<String>,
    pub display_name: String,
    pub path: PathBuf,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = default_display_name(&path);
        InputFile {
            uuid: None,
            display_name,
            path,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

fn default_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Options handed to the `strings` tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// `-n`: minimum run length; the tool's default (4) when unset
    pub min_length: Option<u32>,
    /// One tool run per encoding, in this order
    pub encodings: Vec<StringsEncoding>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            min_length: None,
            encodings: vec![StringsEncoding::Ascii],
        }
    }
}

impl ExtractOptions {
    /// Build options from the pipeline's checkbox map.
    ///
    /// Unknown keys are rejected. Disabled checkboxes are skipped; if nothing
    /// is enabled ASCII extraction runs.
    pub fn from_config(
        config: Option<&serde_json::Map<String, serde_json::Value>>,
        min_length: Option<u32>,
    ) -> Result<Self> {
        if min_length == Some(0) {
            return Err(TaskError::InvalidPayload(
                "min_length must be at least 1".to_string(),
            ));
        }

        let mut encodings = Vec::new();
        for (name, value) in config.into_iter().flatten() {
            let encoding = StringsEncoding::from_name(name)
                .ok_or_else(|| TaskError::UnknownEncoding(name.clone()))?;

            let enabled = match value {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Null => false,
                other => {
                    return Err(TaskError::InvalidPayload(format!(
                        "task_config.{} must be a boolean, got {}",
                        name, other
                    )))
                }
            };

            if enabled && !encodings.contains(&encoding) {
                encodings.push(encoding);
            }
        }

        if encodings.is_empty() {
            encodings.push(StringsEncoding::default());
        }

        Ok(ExtractOptions {
            min_length,
            encodings,
        })
    }
}

/// Validated, immutable description of one extraction task
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    task_id: TaskId,
    inputs: Vec<InputFile>,
    options: ExtractOptions,
    output_dir: Option<PathBuf>,
    workflow_id: Option<String>,
    timeout: Option<Duration>,
}

impl TaskDescriptor {
    pub fn new(task_id: TaskId, inputs: Vec<InputFile>, options: ExtractOptions) -> Result<Self> {
        if inputs.is_empty() {
            return Err(TaskError::NoInputFiles);
        }
        if options.encodings.is_empty() {
            return Err(TaskError::InvalidPayload("no encoding selected".to_string()));
        }

        Ok(TaskDescriptor {
            task_id,
            inputs,
            options,
            output_dir: None,
            workflow_id: None,
            timeout: None,
        })
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Map a broker envelope to a descriptor
    pub fn from_task(task: &Task) -> Result<Self> {
        if task.task_type != TASK_TYPE {
            return Err(TaskError::UnsupportedTaskType(task.task_type.clone()));
        }

        let mut descriptor = Self::from_payload(task.id, &task.payload)?;
        if task.timeout_seconds > 0 {
            descriptor.timeout = Some(Duration::from_secs(task.timeout_seconds as u64));
        }
        Ok(descriptor)
    }

    pub fn from_payload(task_id: TaskId, payload: &[u8]) -> Result<Self> {
        let raw: RawTaskPayload = serde_json::from_slice(payload)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;

        let files = match raw.pipe_result.as_deref() {
            Some(encoded) if !encoded.is_empty() => decode_pipe_result(encoded)?,
            _ => raw.input_files,
        };
        let inputs = files
            .into_iter()
            .map(RawInputFile::into_input_file)
            .collect::<Result<Vec<_>>>()?;

        let options = ExtractOptions::from_config(raw.task_config.as_ref(), raw.min_length)?;

        let mut descriptor = Self::new(task_id, inputs, options)?;
        descriptor.output_dir = raw.output_path;
        descriptor.workflow_id = raw.workflow_id;
        Ok(descriptor)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn inputs(&self) -> &[InputFile] {
        &self.inputs
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.workflow_id.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
