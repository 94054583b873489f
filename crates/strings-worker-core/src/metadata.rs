use crate::{StringsEncoding, TASK_TYPE};
use serde::{Deserialize, Serialize};

/// Description of a task type, announced to the broker on registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_type: String,
    pub display_name: String,
    pub description: String,
    pub task_config: Vec<TaskConfigOption>,
}

/// A user-facing option of a task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfigOption {
    pub name: String,
    pub label: String,
    pub description: String,
    /// UI widget type, e.g. "checkbox"
    pub option_type: String,
}

impl TaskMetadata {
    /// Metadata for the strings extraction task
    pub fn strings() -> Self {
        TaskMetadata {
            task_type: TASK_TYPE.to_string(),
            display_name: "Strings".to_string(),
            description: "Extract strings from files".to_string(),
            task_config: StringsEncoding::ALL
                .iter()
                .map(|encoding| TaskConfigOption {
                    name: encoding.name().to_string(),
                    label: encoding.label().to_string(),
                    description: encoding.description().to_string(),
                    option_type: "checkbox".to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_metadata_lists_encodings() {
        let metadata = TaskMetadata::strings();
        assert_eq!(metadata.task_type, TASK_TYPE);

        let names: Vec<_> = metadata.task_config.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["UTF16LE", "ASCII"]);
        assert!(metadata.task_config.iter().all(|o| o.option_type == "checkbox"));
    }
}
