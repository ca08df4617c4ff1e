// consentry/src/contract.rs

//! The response contract: a JSON Schema discriminated union over the active
//! operation types, cached per configuration hash.

use serde_json::{json, Value};
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::info;

use crate::{
    config::Config,
    error::{ContractError, EngineError},
    message::AssistantResponse,
    operation::OperationRequest,
    registry::CapabilityRegistry,
    tasks::TaskList,
};

pub struct ResponseContract {
    schema: Value,
    tags: BTreeSet<String>,
    config_hash: String,
    validator: jsonschema::Validator,
    descriptions: Vec<(String, String)>,
}

impl fmt::Debug for ResponseContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContract")
            .field("tags", &self.tags)
            .field("config_hash", &self.config_hash)
            .finish_non_exhaustive()
    }
}

impl ResponseContract {
    fn build(registry: &CapabilityRegistry, config_hash: String) -> Result<Self, EngineError> {
        let branches: Vec<Value> = registry.active().iter().map(|d| d.kind.schema()).collect();
        let schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "AssistantResponse",
            "type": "object",
            "properties": {
                "comment": { "type": "string" },
                "tasks": { "anyOf": [TaskList::schema(), { "type": "null" }] },
                "operations": {
                    "anyOf": [
                        { "type": "array", "items": { "oneOf": branches } },
                        { "type": "null" }
                    ]
                }
            },
            "required": ["comment"],
            "additionalProperties": false
        });
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| EngineError::Config(format!("response schema does not compile: {e}")))?;
        let descriptions = registry
            .active()
            .iter()
            .map(|d| (d.tag().to_string(), d.kind.description().to_string()))
            .collect();
        Ok(Self { schema, tags: registry.active_tags(), config_hash, validator, descriptions })
    }

    pub fn schema(&self) -> &Value { &self.schema }
    pub fn tags(&self) -> &BTreeSet<String> { &self.tags }
    pub fn config_hash(&self) -> &str { &self.config_hash }

    /// Every violation of the schema, as `path: message` lines.
    pub fn validate(&self, value: &Value) -> Result<(), ContractError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() { e.to_string() } else { format!("{path}: {e}") }
            })
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(ContractError::InvalidResponse(errors)) }
    }

    /// Validate a raw model response and build its typed form.
    pub fn parse_response(&self, value: &Value, registry: &CapabilityRegistry) -> Result<AssistantResponse, ContractError> {
        self.validate(value)?;
        let comment = value.get("comment").and_then(Value::as_str).unwrap_or_default().trim().to_string();
        let tasks = match value.get("tasks") {
            Some(v) if !v.is_null() => Some(TaskList::from_value(v).map_err(|e| ContractError::InvalidResponse(vec![e]))?),
            _ => None,
        };
        let mut operations = Vec::new();
        let mut errors = Vec::new();
        for (i, op) in value.get("operations").and_then(Value::as_array).into_iter().flatten().enumerate() {
            let tag = op.get("title").and_then(Value::as_str).unwrap_or_default();
            if !self.tags.contains(tag) {
                errors.push(format!("/operations/{i}: {}", ContractError::InactiveType(tag.into())));
                continue;
            }
            match OperationRequest::parse(registry, op) {
                Ok(req) => operations.push(req),
                Err(e) => errors.push(format!("/operations/{i}: {e}")),
            }
        }
        if !errors.is_empty() { return Err(ContractError::InvalidResponse(errors)); }
        Ok(AssistantResponse { comment, tasks, operations })
    }

    /// One line per active type, for prompt templating.
    pub fn describe(&self) -> String {
        self.descriptions.iter().map(|(t, d)| format!("- {t}: {d}")).collect::<Vec<_>>().join("\n")
    }
}

/// Hands out the contract for a configuration, rebuilding only when the
/// configuration hash changes.
#[derive(Default)]
pub struct SchemaNegotiator {
    cached: Option<Arc<ResponseContract>>,
}

impl SchemaNegotiator {
    pub fn new() -> Self { Self::default() }

    pub fn get_contract(&mut self, registry: &mut CapabilityRegistry, config: &Config) -> Result<Arc<ResponseContract>, EngineError> {
        let hash = config.hash();
        if let Some(c) = &self.cached {
            if c.config_hash == hash { return Ok(c.clone()); }
        }
        registry.activate_for(config);
        if registry.is_empty() {
            self.cached = None;
            return Err(EngineError::EmptyCapabilitySet);
        }
        let contract = Arc::new(ResponseContract::build(registry, hash)?);
        info!(tags = ?contract.tags, hash = %&contract.config_hash[..12], "response contract rebuilt");
        self.cached = Some(contract.clone());
        Ok(contract)
    }

    pub fn current(&self) -> Option<&Arc<ResponseContract>> { self.cached.as_ref() }
    pub fn invalidate(&mut self) { self.cached = None; }
}
