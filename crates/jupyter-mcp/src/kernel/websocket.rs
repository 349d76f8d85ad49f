//! Kernel execution over the Jupyter kernel channels WebSocket.
//!
//! Speaks messaging protocol v5 using the single-socket JSON framing
//! (`/api/kernels/{id}/channels`), where every frame carries a `channel`
//! field. One connection is opened per execution.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use super::{ExecutionResult, KernelError, KernelExecutor, KernelTarget};

const PROTOCOL_VERSION: &str = "5.3";
const USERNAME: &str = "mcp-jupyter";

/// Executes code by talking to the kernel's channels endpoint directly.
pub struct WebSocketKernel {
    token: String,
    timeout: Duration,
}

impl WebSocketKernel {
    /// Create a client authenticating with `token`. Executions are bounded by `timeout`.
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            token: token.into(),
            timeout,
        }
    }

    fn channels_url(&self, target: &KernelTarget, session_id: &str) -> String {
        let base = target.server_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/api/kernels/{}/channels?session_id={}",
            ws_base,
            urlencoding::encode(&target.kernel_id),
            session_id
        )
    }

    async fn run(&self, target: &KernelTarget, code: &str) -> Result<ExecutionResult, KernelError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = self.channels_url(target, &session_id);
        let connect_error = |message: String| KernelError::Connect {
            url: url.clone(),
            message,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("token {}", self.token))
            .map_err(|e| connect_error(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("Connected to kernel {}", target.kernel_id);
        let (mut write, mut read) = ws_stream.split();

        let request = execute_request(&session_id, code);
        let msg_id = request["header"]["msg_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        write
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| KernelError::Channel(format!("Failed to send execute_request: {}", e)))?;

        let mut collector = OutputCollector::new(msg_id);
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let message: Value = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Ignoring malformed kernel message: {}", e);
                            continue;
                        }
                    };
                    if collector.handle(&message) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(KernelError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Err(KernelError::Closed);
                }
                Some(Err(e)) => return Err(KernelError::Channel(e.to_string())),
            }
        }

        let _ = write.send(Message::Close(None)).await;
        Ok(collector.finish())
    }
}

#[async_trait::async_trait]
impl KernelExecutor for WebSocketKernel {
    async fn execute(
        &self,
        target: &KernelTarget,
        code: &str,
    ) -> Result<ExecutionResult, KernelError> {
        tokio::time::timeout(self.timeout, self.run(target, code))
            .await
            .map_err(|_| KernelError::Timeout(self.timeout))?
    }
}

/// Build an `execute_request` for the shell channel.
fn execute_request(session_id: &str, code: &str) -> Value {
    json!({
        "header": {
            "msg_id": uuid::Uuid::new_v4().to_string(),
            "msg_type": "execute_request",
            "username": USERNAME,
            "session": session_id,
            "date": chrono::Utc::now().to_rfc3339(),
            "version": PROTOCOL_VERSION,
        },
        "parent_header": {},
        "metadata": {},
        "content": {
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        },
        "channel": "shell",
        "buffers": [],
    })
}

/// Turns the kernel's replies to one request into nbformat outputs.
///
/// Execution is finished once both the shell `execute_reply` and the iopub
/// `idle` status for the request have arrived; they may come in either order.
struct OutputCollector {
    msg_id: String,
    outputs: Vec<Value>,
    execution_count: Option<i64>,
    status: Option<String>,
    idle: bool,
    /// `clear_output(wait=True)` defers clearing until the next output arrives
    clear_pending: bool,
}

impl OutputCollector {
    fn new(msg_id: String) -> Self {
        Self {
            msg_id,
            outputs: Vec::new(),
            execution_count: None,
            status: None,
            idle: false,
            clear_pending: false,
        }
    }

    /// Feed one message. Returns true once execution has finished.
    fn handle(&mut self, message: &Value) -> bool {
        let parent = message
            .pointer("/parent_header/msg_id")
            .and_then(Value::as_str);
        if parent != Some(self.msg_id.as_str()) {
            return self.is_done();
        }

        let msg_type = message
            .pointer("/header/msg_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let content = message.get("content").cloned().unwrap_or(Value::Null);

        match msg_type {
            "execute_reply" => {
                self.status = Some(
                    content
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("ok")
                        .to_string(),
                );
                if let Some(count) = content.get("execution_count").and_then(Value::as_i64) {
                    self.execution_count = Some(count);
                }
            }
            "execute_input" => {
                if let Some(count) = content.get("execution_count").and_then(Value::as_i64) {
                    self.execution_count = Some(count);
                }
            }
            "status" => {
                if content.get("execution_state").and_then(Value::as_str) == Some("idle") {
                    self.idle = true;
                }
            }
            "clear_output" => {
                if content.get("wait").and_then(Value::as_bool).unwrap_or(false) {
                    self.clear_pending = true;
                } else {
                    self.outputs.clear();
                }
            }
            "stream" => {
                let name = content.get("name").cloned().unwrap_or(json!("stdout"));
                let text = content
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.push_stream(name, text);
            }
            "execute_result" => self.push(json!({
                "output_type": "execute_result",
                "execution_count": content.get("execution_count").cloned().unwrap_or(Value::Null),
                "data": content.get("data").cloned().unwrap_or(json!({})),
                "metadata": content.get("metadata").cloned().unwrap_or(json!({})),
            })),
            "display_data" => self.push(json!({
                "output_type": "display_data",
                "data": content.get("data").cloned().unwrap_or(json!({})),
                "metadata": content.get("metadata").cloned().unwrap_or(json!({})),
            })),
            "error" => self.push(json!({
                "output_type": "error",
                "ename": content.get("ename").cloned().unwrap_or(json!("")),
                "evalue": content.get("evalue").cloned().unwrap_or(json!("")),
                "traceback": content.get("traceback").cloned().unwrap_or(json!([])),
            })),
            other => debug!("Ignoring kernel message {}", other),
        }

        self.is_done()
    }

    fn push(&mut self, output: Value) {
        if self.clear_pending {
            self.outputs.clear();
            self.clear_pending = false;
        }
        self.outputs.push(output);
    }

    /// Consecutive writes to the same stream form one output.
    fn push_stream(&mut self, name: Value, text: String) {
        if !self.clear_pending {
            if let Some(last) = self.outputs.last_mut() {
                if last["output_type"] == "stream" && last["name"] == name {
                    let mut joined = last["text"].as_str().unwrap_or_default().to_string();
                    joined.push_str(&text);
                    last["text"] = Value::String(joined);
                    return;
                }
            }
        }
        self.push(json!({ "output_type": "stream", "name": name, "text": text }));
    }

    fn is_done(&self) -> bool {
        self.idle && self.status.is_some()
    }

    fn finish(self) -> ExecutionResult {
        ExecutionResult {
            execution_count: self.execution_count,
            outputs: self.outputs,
            status: self.status.unwrap_or_else(|| "ok".to_string()),
        }
    }
}
