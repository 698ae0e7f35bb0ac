//! Command-channel wire format and the fixed operation registry.
//!
//! Inbound:  `{"function": "add", "args": [2, 3], "id": 7}`
//! Outbound: `{"result": 5.0, "id": 7}` or `{"error": "...", "id": 7}`

use pilink_camera::CameraError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn result(value: Value, id: Option<Value>) -> Self {
        Self { outcome: Outcome::Result(value), id }
    }

    pub fn error(message: impl Into<String>, id: Option<Value>) -> Self {
        Self { outcome: Outcome::Error(message.into()), id }
    }

    pub fn to_json(&self) -> String {
        // Value/String/Option fields cannot fail to serialise
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#))
    }
}

/// Failures that become an `{"error": ...}` response.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Function '{0}' not found")]
    NotFound(String),
    #[error("{name}() takes {expected} positional arguments but {given} were given")]
    Arity {
        name: &'static str,
        expected: usize,
        given: usize,
    },
    #[error("{name}(): {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Temperature sensor unavailable: {0}")]
    Sensor(String),
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Every operation the command server may call. Names are protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetTemperature,
    Echo,
    Add,
    GetCameraChoices,
    SetCameraSetting,
    CapturePhoto,
    StartLiveView,
    StopLiveView,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::GetTemperature,
        Operation::Echo,
        Operation::Add,
        Operation::GetCameraChoices,
        Operation::SetCameraSetting,
        Operation::CapturePhoto,
        Operation::StartLiveView,
        Operation::StopLiveView,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::GetTemperature => "get_temperature",
            Operation::Echo => "echo",
            Operation::Add => "add",
            Operation::GetCameraChoices => "getCameraChoices",
            Operation::SetCameraSetting => "setCameraSetting",
            Operation::CapturePhoto => "capturePhoto",
            Operation::StartLiveView => "startLiveView",
            Operation::StopLiveView => "stopLiveView",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Operation::GetTemperature
            | Operation::GetCameraChoices
            | Operation::StartLiveView
            | Operation::StopLiveView => 0,
            Operation::Echo | Operation::CapturePhoto => 1,
            Operation::Add | Operation::SetCameraSetting => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn check_arity(self, args: &[Value]) -> Result<(), RpcError> {
        if args.len() != self.arity() {
            return Err(RpcError::Arity {
                name: self.name(),
                expected: self.arity(),
                given: args.len(),
            });
        }
        Ok(())
    }
}

/// Render an argument the way it reads in a message: strings bare, the rest as JSON.
pub fn display_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric argument; numeric strings are accepted too.
pub fn float_arg(op: Operation, value: &Value) -> Result<f64, RpcError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.ok_or_else(|| RpcError::InvalidArgument {
        name: op.name(),
        reason: format!("could not convert {value} to float"),
    })
}
