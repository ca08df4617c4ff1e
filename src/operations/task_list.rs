use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::show_comment;
use crate::{
    operation::{FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
    tasks::TaskList,
};

/// Informational: reports the plan, touches nothing.
pub struct TaskListOp;

impl TaskListOp {
    fn list(req: &OperationRequest) -> TaskList {
        req.field("tasks").and_then(|v| TaskList::from_value(v).ok()).unwrap_or_default()
    }
}

#[async_trait]
impl OperationType for TaskListOp {
    fn tag(&self) -> &str { "task_list" }

    fn description(&self) -> &str { "Report the current task plan and each task's status." }

    fn fields(&self) -> FieldsSchema { FieldsSchema::new().required("tasks", TaskList::schema()) }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        TaskList::from_value(fields.get("tasks").unwrap_or(&Value::Null)).map(|_| ())
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let list = Self::list(req);
        let body = if list.is_empty() { "(no tasks)".to_string() } else { list.lines().join("\n") };
        ctx.ui.display_block(&body, &format!("Tasks ({})", list.summary()));
    }

    async fn consent(&self, _req: &OperationRequest, _ctx: &OperationContext<'_>) -> bool { true }

    async fn execute(&self, req: &Arc<OperationRequest>, _ctx: &OperationContext<'_>) -> OperationResult {
        self.base_result(req).accepted(true).with_field("summary", Self::list(req).summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, Harness};
    use serde_json::json;

    #[tokio::test]
    async fn always_accepted() {
        let h = Harness::new();
        let rq = req("task_list", &[("tasks", json!([{"description": "a", "status": "completed"}]))]);
        assert!(TaskListOp.consent(&rq, &h.ctx()).await);
        let r = TaskListOp.execute(&rq, &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(r.field("summary").unwrap(), "1/1 completed");
    }
}
