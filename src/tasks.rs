// consentry/src/tasks.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus { Pending, InProgress, Completed, Failed }

impl TaskStatus {
    pub fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Failed => "[!]",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub description: String,
    pub status: TaskStatus,
}

/// The model's current plan, as last reported.
#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn from_value(v: &Value) -> Result<Self, String> {
        let tasks: Vec<Task> = serde_json::from_value(v.clone()).map_err(|e| format!("invalid tasks: {e}"))?;
        Ok(Self { tasks })
    }

    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn lines(&self) -> Vec<String> {
        self.tasks.iter().map(|t| format!("{} {}", t.status.marker(), t.description)).collect()
    }

    pub fn summary(&self) -> String {
        format!("{}/{} completed", self.count(TaskStatus::Completed), self.tasks.len())
    }

    pub fn schema() -> Value {
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "description": { "type": "string" },
                    "status": { "enum": ["pending", "in_progress", "completed", "failed"] }
                },
                "required": ["description", "status"],
                "additionalProperties": false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() {
        let l = TaskList::from_value(&json!([
            {"description": "read code", "status": "completed"},
            {"description": "fix bug", "status": "in_progress"}
        ]))
        .unwrap();
        assert_eq!(l.lines(), vec!["[x] read code", "[~] fix bug"]);
        assert_eq!(l.summary(), "1/2 completed");
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(TaskList::from_value(&json!([{"description": "x", "status": "done"}])).is_err());
    }
}
