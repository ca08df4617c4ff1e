// consentry/src/transport.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{collections::VecDeque, fs, path::Path};

use crate::{config::ModelConfig, contract::ResponseContract, error::TransportError, message::WireMessage};

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ModelParams {
    pub model: Option<String>,
    pub temperature: f32,
}

impl From<&ModelConfig> for ModelParams {
    fn from(m: &ModelConfig) -> Self { Self { model: m.name.clone(), temperature: m.temperature } }
}

/// The model side of the conversation. Returns the raw JSON response object.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn complete(&self, messages: &[WireMessage], contract: &ResponseContract, params: &ModelParams) -> Result<Value, TransportError>;
}

/// What a scripted transport does on one call.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Respond(Value),
    Fail(String),
}

/// Replays canned responses in order, then reports [`TransportError::Exhausted`].
#[derive(Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<Vec<WireMessage>>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()), calls: Mutex::new(vec![]) }
    }

    pub fn responses(values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(values.into_iter().map(ScriptStep::Respond))
    }

    /// A JSON array of response objects, or JSON lines.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let values: Vec<Value> = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => items,
            Ok(single) => vec![single],
            Err(_) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()
                .with_context(|| format!("parse {}", path.display()))?,
        };
        Ok(Self::responses(values))
    }

    /// Messages sent on every call so far.
    pub fn calls(&self) -> Vec<Vec<WireMessage>> { self.calls.lock().clone() }
    pub fn remaining(&self) -> usize { self.steps.lock().len() }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn complete(&self, messages: &[WireMessage], _contract: &ResponseContract, _params: &ModelParams) -> Result<Value, TransportError> {
        self.calls.lock().push(messages.to_vec());
        match self.steps.lock().pop_front() {
            Some(ScriptStep::Respond(Value::Null)) => Err(TransportError::Empty),
            Some(ScriptStep::Respond(v)) => Ok(v),
            Some(ScriptStep::Fail(msg)) => Err(TransportError::Request(msg)),
            None => Err(TransportError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_arrays_and_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        fs::write(&a, r#"[{"comment": "one"}, {"comment": "two"}]"#).unwrap();
        assert_eq!(ScriptedTransport::from_file(&a).unwrap().remaining(), 2);
        let b = dir.path().join("b.jsonl");
        fs::write(&b, "{\"comment\": \"one\"}\n\n{\"comment\": \"two\"}\n{\"comment\": \"three\"}\n").unwrap();
        assert_eq!(ScriptedTransport::from_file(&b).unwrap().remaining(), 3);
    }

    #[test]
    fn params_follow_model_config() {
        let p = ModelParams::from(&ModelConfig { name: Some("m".into()), url: None, temperature: 0.5 });
        assert_eq!(p, ModelParams { model: Some("m".into()), temperature: 0.5 });
        let _ = json!(p);
    }
}
