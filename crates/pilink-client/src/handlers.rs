//! Operation handlers behind the command channel.

use crate::rpc::{display_arg, float_arg, Operation, RpcError, RpcRequest, RpcResponse};
use crate::RuntimeContext;
use log::{error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Turns one request into exactly one response. Never fails.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<RuntimeContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    /// Decode a text frame and answer it; malformed input becomes an error response.
    pub async fn handle_text(&self, text: &str) -> RpcResponse {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return RpcResponse::error(RpcError::InvalidRequest(e.to_string()).to_string(), None),
        };
        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => RpcResponse::error(RpcError::InvalidRequest(e.to_string()).to_string(), id),
        }
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        match self.call(&request.function, &request.args).await {
            Ok(value) => RpcResponse::result(value, request.id),
            Err(e) => {
                warn!("[rpc] {}: {e}", request.function);
                RpcResponse::error(e.to_string(), request.id)
            }
        }
    }

    pub async fn call(&self, function: &str, args: &[Value]) -> Result<Value, RpcError> {
        let op = Operation::from_name(function)
            .ok_or_else(|| RpcError::NotFound(function.to_string()))?;
        op.check_arity(args)?;

        match op {
            Operation::GetTemperature => self.temperature().await.map(|t| json!(t)),
            Operation::Echo => Ok(json!(format!("Echo: {}", display_arg(&args[0])))),
            Operation::Add => {
                let sum = float_arg(op, &args[0])? + float_arg(op, &args[1])?;
                if !sum.is_finite() {
                    return Err(RpcError::InvalidArgument {
                        name: op.name(),
                        reason: format!("result {sum} is not a finite number"),
                    });
                }
                Ok(json!(sum))
            }
            Operation::GetCameraChoices => {
                let choices = self.ctx.hardware.setting_choices().await?;
                Ok(json!(choices))
            }
            Operation::SetCameraSetting => {
                let label = display_arg(&args[0]);
                let value = display_arg(&args[1]);
                self.ctx.hardware.apply_setting(&label, &value).await?;
                Ok(json!(format!("Set {label} to {value}")))
            }
            Operation::CapturePhoto => self.capture_photo(&args[0]).await,
            Operation::StartLiveView => {
                self.ctx.gate.set(true);
                info!("[liveview] Live view started.");
                Ok(json!("Live view started"))
            }
            Operation::StopLiveView => {
                self.ctx.gate.set(false);
                info!("[liveview] Live view stopped.");
                Ok(json!("Live view stopped"))
            }
        }
    }

    /// SoC temperature in °C from the sysfs thermal zone (millidegrees).
    async fn temperature(&self) -> Result<f64, RpcError> {
        let path = &self.ctx.config.thermal_zone;
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RpcError::Sensor(format!("{path:?}: {e}")))?;
        let millidegrees: f64 = raw
            .trim()
            .parse()
            .map_err(|_| RpcError::Sensor(format!("{path:?}: unexpected reading {:?}", raw.trim())))?;
        Ok(millidegrees / 1000.0)
    }

    /// Capture, verify, upload. Only the capture itself can fail the call;
    /// missing files and upload problems are logged and yield `null`.
    async fn capture_photo(&self, id: &Value) -> Result<Value, RpcError> {
        let capture_id = display_arg(id);
        let folder = self.ctx.config.photo_folder();
        let files = self
            .ctx
            .hardware
            .capture(folder, file_tag(&capture_id))
            .await?;
        info!("[capture] {capture_id}: {files:?}");

        if files.len() < 2 {
            error!("[capture] expected raw and processed files, utility reported {files:?}");
            return Ok(Value::Null);
        }

        let mut missing = Vec::new();
        for file in &files {
            if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                missing.push(file);
            }
        }
        if !missing.is_empty() {
            error!("[capture] The following files are missing: {missing:?}");
            return Ok(Value::Null);
        }

        match self.ctx.uploader.upload(&capture_id, &files).await {
            Ok(body) => info!("[upload] {} answered: {body}", self.ctx.uploader.url()),
            Err(e) => error!("[upload] Failed to upload files: {e:#}"),
        }
        Ok(Value::Null)
    }
}

/// Filename-safe form of a capture id.
fn file_tag(id: &str) -> Option<String> {
    let tag: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect();
    (!tag.is_empty()).then_some(tag)
}
