// consentry/src/operation.rs

//! Request/result data model shared by every operation type, and the
//! [`OperationType`] trait the executor drives.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{path::{Path, PathBuf}, sync::Arc};

use crate::{
    config::{ApprovalRules, Config},
    error::ContractError,
    fs_util::expand_path,
    presenter::Presenter,
    registry::CapabilityRegistry,
    shell::Shell,
};

/// One typed action requested by the model. Immutable once parsed.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OperationRequest {
    #[serde(rename = "title")]
    tag: String,
    comment: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl OperationRequest {
    /// Unvalidated constructor; [`OperationRequest::parse`] is the normal route.
    pub fn new(tag: impl Into<String>, comment: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self { tag: tag.into(), comment: comment.into().trim().to_string(), fields }
    }

    /// Build a request from one element of the model's `operations` array.
    /// The tag must name an active type; the type normalizes and checks its fields.
    pub fn parse(registry: &CapabilityRegistry, value: &Value) -> Result<Arc<Self>, ContractError> {
        let Some(obj) = value.as_object() else {
            return Err(ContractError::InvalidResponse(vec!["operation is not an object".into()]));
        };
        let tag = obj
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| ContractError::InvalidResponse(vec!["operation has no title".into()]))?;
        let kind = registry.get(tag).ok_or_else(|| ContractError::InactiveType(tag.to_string()))?;
        let comment = obj.get("comment").and_then(Value::as_str).unwrap_or_default();
        let mut fields: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "title" && k.as_str() != "comment")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        kind.validate(&mut fields)
            .map_err(|message| ContractError::InvalidOperation { tag: tag.to_string(), message })?;
        Ok(Arc::new(Self::new(tag, comment, fields)))
    }

    pub fn tag(&self) -> &str { &self.tag }
    pub fn comment(&self) -> &str { &self.comment }
    pub fn fields(&self) -> &Map<String, Value> { &self.fields }

    pub fn field(&self, name: &str) -> Option<&Value> { self.fields.get(name) }
    pub fn str_field(&self, name: &str) -> Option<&str> { self.fields.get(name).and_then(Value::as_str) }
    pub fn bool_field(&self, name: &str) -> bool { self.fields.get(name).and_then(Value::as_bool).unwrap_or(false) }
    pub fn f64_field(&self, name: &str) -> Option<f64> { self.fields.get(name).and_then(Value::as_f64) }

    /// A path field, `~`-expanded and made absolute against the process cwd.
    pub fn path_field(&self, name: &str) -> Option<PathBuf> { self.str_field(name).map(expand_path) }
}

/// Outcome of one operation, folded back into the conversation.
#[derive(Clone, Debug, Serialize)]
pub struct OperationResult {
    #[serde(rename = "title")]
    pub tag: String,
    pub accepted: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(skip)]
    pub request: Arc<OperationRequest>,
}

impl OperationResult {
    /// Not accepted, no error, no fields.
    pub fn for_request(request: &Arc<OperationRequest>) -> Self {
        Self {
            tag: request.tag.clone(),
            accepted: false,
            error: None,
            fields: Map::new(),
            request: request.clone(),
        }
    }

    /// Like [`for_request`](Self::for_request) but echoes the named request fields.
    pub fn echoing(request: &Arc<OperationRequest>, names: &[&str]) -> Self {
        let mut r = Self::for_request(request);
        for n in names {
            if let Some(v) = request.field(n) { r.fields.insert((*n).to_string(), v.clone()); }
        }
        r
    }

    pub fn accepted(mut self, accepted: bool) -> Self { self.accepted = accepted; self }
    pub fn with_error(mut self, msg: impl Into<String>) -> Self { self.error = Some(msg.into()); self }
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
    pub fn with_path(self, name: &str, path: &Path) -> Self {
        self.with_field(name, path.to_string_lossy().into_owned())
    }

    pub fn field(&self, name: &str) -> Option<&Value> { self.fields.get(name) }
    pub fn to_json(&self) -> Value { serde_json::to_value(self).unwrap_or(Value::Null) }
}

/// Everything an operation may touch while running.
pub struct OperationContext<'a> {
    pub config: &'a Config,
    pub approvals: &'a ApprovalRules,
    pub ui: &'a dyn Presenter,
    pub shell: &'a dyn Shell,
    /// Root for workspace-local artifacts (audit log, config layer).
    pub workspace: &'a Path,
}

/// Field list of one operation type, turned into a JSON Schema object.
#[derive(Clone, Debug, Default)]
pub struct FieldsSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl FieldsSchema {
    pub fn new() -> Self { Self::default() }

    pub fn required(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.into(), schema);
        self.required.push(name.into());
        self
    }

    pub fn optional(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Object schema for one branch of the response union. `title` carries the
    /// discriminator as a constant; `comment` is always present.
    pub fn object_schema(&self, tag: &str, description: &str) -> Value {
        let mut properties = Map::new();
        properties.insert("title".into(), json!({ "const": tag }));
        properties.insert("comment".into(), json!({ "type": "string" }));
        properties.extend(self.properties.clone());
        let mut required = vec!["title".to_string(), "comment".to_string()];
        required.extend(self.required.iter().cloned());
        json!({
            "type": "object",
            "title": tag,
            "description": description,
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Trim a string field in place and reject it when empty or missing.
pub fn normalize_str(fields: &mut Map<String, Value>, name: &str, empty_msg: &str) -> Result<(), String> {
    let trimmed = fields.get(name).and_then(Value::as_str).map(str::trim).unwrap_or_default().to_string();
    if trimmed.is_empty() { return Err(empty_msg.to_string()); }
    fields.insert(name.to_string(), Value::String(trimmed));
    Ok(())
}

#[async_trait]
pub trait OperationType: Send + Sync {
    fn tag(&self) -> &str;
    fn description(&self) -> &str;
    fn fields(&self) -> FieldsSchema;

    /// Normalize and check fields before the request is built.
    fn validate(&self, _fields: &mut Map<String, Value>) -> Result<(), String> { Ok(()) }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>);

    /// The consent gate. Returning false ends the operation with no side effect.
    async fn consent(&self, _req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
        ctx.ui.ask_yes_no(&format!("Allow {}?", self.tag())).await
    }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult;

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        OperationResult::for_request(req)
    }

    fn build_error_result(&self, req: &Arc<OperationRequest>, msg: &str, accepted: bool) -> OperationResult {
        self.base_result(req).accepted(accepted).with_error(msg)
    }

    fn schema(&self) -> Value { self.fields().object_schema(self.tag(), self.description()) }
}
