use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::process_manager::ProcessManager;
use crate::server::ChannelHealth;

pub const PROTOCOL_VERSION: u32 = 1;

pub fn parse_frame_text(text: &str) -> Result<Value> {
    serde_json::from_str(text).context("frame is not valid JSON")
}

#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    pub params: Value,
}

pub fn parse_request(frame: &Value) -> Option<RequestFrame> {
    if frame.get("type").and_then(Value::as_str) != Some("req") {
        return None;
    }
    let id = frame.get("id")?.as_str()?.to_owned();
    let method = frame.get("method")?.as_str()?.trim().to_owned();
    if method.is_empty() {
        return None;
    }
    let params = frame.get("params").cloned().unwrap_or_else(|| json!({}));
    Some(RequestFrame { id, method, params })
}

pub fn success_frame(id: &str, result: Value) -> Value {
    json!({
        "type": "resp",
        "id": id,
        "ok": true,
        "result": result,
    })
}

pub fn error_frame(id: &str, code: u16, message: &str) -> Value {
    json!({
        "type": "resp",
        "id": id,
        "ok": false,
        "error": { "code": code, "message": message },
    })
}

pub enum DispatchOutcome {
    Handled(Value),
    Error { code: u16, message: String },
    NotHandled,
}

impl DispatchOutcome {
    fn invalid_params(err: impl std::fmt::Display) -> Self {
        Self::Error {
            code: 400,
            message: format!("invalid params: {err}"),
        }
    }

    fn failure(err: impl std::fmt::Display) -> Self {
        Self::Error {
            code: 500,
            message: err.to_string(),
        }
    }
}

/// Decodes requests arriving on one channel and turns them into calls on
/// the components behind the bridge.
#[async_trait]
pub trait ChannelProtocol: Send + Sync {
    fn channel_name(&self) -> &'static str;
    async fn handle_request(&self, request: &RequestFrame) -> DispatchOutcome;
}

/// Non-privileged liveness and diagnostics. A page probes this channel
/// before trusting the TLS endpoint, so it must answer even when the
/// command channel failed to come up.
pub struct StatusProtocol {
    health: Arc<ChannelHealth>,
}

impl StatusProtocol {
    pub fn new(health: Arc<ChannelHealth>) -> Self {
        Self { health }
    }
}

#[async_trait]
impl ChannelProtocol for StatusProtocol {
    fn channel_name(&self) -> &'static str {
        "status"
    }

    async fn handle_request(&self, request: &RequestFrame) -> DispatchOutcome {
        match request.method.as_str() {
            "ping" => DispatchOutcome::Handled(json!({
                "status": "alive",
                "protocol_version": PROTOCOL_VERSION,
                "server": env!("CARGO_PKG_VERSION"),
            })),
            "status" => DispatchOutcome::Handled(json!({
                "status": "alive",
                "protocol_version": PROTOCOL_VERSION,
                "server": env!("CARGO_PKG_VERSION"),
                "command_channel": self.health.snapshot().await,
            })),
            _ => DispatchOutcome::NotHandled,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteToolkitParams {
    pipeline_config_path: PathBuf,
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PickerParams {
    #[serde(default)]
    multi: bool,
}

#[derive(Debug, Deserialize)]
struct OpenParams {
    filepath: PathBuf,
}

/// Privileged command traffic: toolkit execution, the native chooser and
/// the platform opener. Only reachable over the TLS channel.
pub struct CommandProtocol {
    manager: Arc<dyn ProcessManager>,
}

impl CommandProtocol {
    pub fn new(manager: Arc<dyn ProcessManager>) -> Self {
        Self { manager }
    }

    async fn execute_toolkit_command(&self, params: Value) -> DispatchOutcome {
        let params: ExecuteToolkitParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return DispatchOutcome::invalid_params(err),
        };

        let (tx, rx) = oneshot::channel();
        let result = self
            .manager
            .execute_toolkit_command(
                &params.pipeline_config_path,
                &params.command,
                &params.args,
                Box::new(move |stdout, stderr, exit_code| {
                    let _ = tx.send((stdout, stderr, exit_code));
                }),
            )
            .await;

        match result {
            Ok(()) => match rx.await {
                Ok((stdout, stderr, exit_code)) => DispatchOutcome::Handled(json!({
                    "stdout": String::from_utf8_lossy(&stdout),
                    "stderr": String::from_utf8_lossy(&stderr),
                    "exitCode": exit_code,
                })),
                Err(_) => DispatchOutcome::failure(
                    "toolkit command completed without reporting output",
                ),
            },
            Err(err) => DispatchOutcome::failure(err),
        }
    }

    async fn pick(&self, params: Value, force_multi: bool) -> DispatchOutcome {
        let params: PickerParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return DispatchOutcome::invalid_params(err),
        };
        match self
            .manager
            .pick_file_or_directory(force_multi || params.multi)
            .await
        {
            Ok(paths) => DispatchOutcome::Handled(json!({ "paths": paths })),
            Err(err) => DispatchOutcome::failure(err),
        }
    }

    async fn open(&self, params: Value) -> DispatchOutcome {
        let params: OpenParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return DispatchOutcome::invalid_params(err),
        };
        match self.manager.open(&params.filepath).await {
            Ok(()) => DispatchOutcome::Handled(json!({})),
            Err(err) => DispatchOutcome::failure(err),
        }
    }
}

#[async_trait]
impl ChannelProtocol for CommandProtocol {
    fn channel_name(&self) -> &'static str {
        "command"
    }

    async fn handle_request(&self, request: &RequestFrame) -> DispatchOutcome {
        let params = request.params.clone();
        match request.method.as_str() {
            "execute_toolkit_command" => self.execute_toolkit_command(params).await,
            "pick_file_or_directory" => self.pick(params, false).await,
            "pick_files_or_directories" => self.pick(params, true).await,
            "open" => self.open(params).await,
            _ => DispatchOutcome::NotHandled,
        }
    }
}
