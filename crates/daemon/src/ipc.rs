//! IPC server for JSON-RPC communication

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{DaemonError, Result};

/// IPC server configuration
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            socket_path: PathBuf::from(runtime).join("chopshop.sock"),
        }
    }
}

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Handler for IPC requests
#[async_trait]
pub trait IpcHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, String>;
}

/// Map a handler error onto a JSON-RPC error code.
fn error_code(message: &str) -> i32 {
    if message.starts_with("Method not found") {
        -32601
    } else if message.starts_with("Invalid params") {
        -32602
    } else {
        -32000
    }
}

/// Process one request line into a response.
pub async fn dispatch<H: IpcHandler + ?Sized>(handler: &H, line: &str) -> JsonRpcResponse {
    match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => {
            if request.jsonrpc != "2.0" {
                JsonRpcResponse::error(
                    request.id,
                    -32600,
                    "Invalid Request: jsonrpc must be '2.0'".to_string(),
                )
            } else {
                match handler.handle(&request.method, request.params).await {
                    Ok(result) => JsonRpcResponse::success(request.id, result),
                    Err(msg) => JsonRpcResponse::error(request.id, error_code(&msg), msg),
                }
            }
        }
        Err(e) => JsonRpcResponse::error(
            serde_json::Value::Null,
            -32700,
            format!("Parse error: {}", e),
        ),
    }
}

/// IPC server
pub struct IpcServer {
    config: IpcConfig,
    event_tx: Option<broadcast::Sender<String>>,
}

impl IpcServer {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            event_tx: None,
        }
    }

    /// Stream rollover results to every connected client.
    pub fn set_event_sender(&mut self, tx: broadcast::Sender<String>) {
        self.event_tx = Some(tx);
    }

    /// Bind the socket and serve until the future is dropped.
    pub async fn start<H: IpcHandler + 'static>(&self, handler: H) -> Result<()> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| DaemonError::IpcError(format!("Failed to bind: {}", e)))?;

        info!("IPC server listening on {:?}", self.config.socket_path);

        let handler = Arc::new(handler);
        let event_tx = self.event_tx.clone();

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = handler.clone();
                    let event_rx = event_tx.as_ref().map(|tx| tx.subscribe());
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, handler, event_rx).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection<H: IpcHandler + 'static>(
        stream: UnixStream,
        handler: Arc<H>,
        event_rx: Option<broadcast::Receiver<String>>,
    ) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let reader = BufReader::new(reader);
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        let request_writer = writer.clone();

        let request_task = tokio::spawn(async move {
            let mut reader = reader;
            let mut line = String::new();

            loop {
                line.clear();
                let bytes_read = match reader.read_line(&mut line).await {
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read error: {}", e);
                        break;
                    }
                };

                if bytes_read == 0 {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }

                debug!("Received: {}", line.trim());
                let response = dispatch(handler.as_ref(), &line).await;

                let response_str = match serde_json::to_string(&response) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Serialize error: {}", e);
                        break;
                    }
                };

                debug!("Sending: {}", response_str);
                let mut w = request_writer.lock().await;
                if w.write_all(response_str.as_bytes()).await.is_err()
                    || w.write_all(b"\n").await.is_err()
                    || w.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let event_task = if let Some(mut rx) = event_rx {
            let event_writer = writer.clone();
            Some(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let mut w = event_writer.lock().await;
                            if w.write_all(event.as_bytes()).await.is_err()
                                || w.write_all(b"\n").await.is_err()
                                || w.flush().await.is_err()
                            {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event stream lagged, missed {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
            }))
        } else {
            None
        };

        let _ = request_task.await;

        if let Some(task) = event_task {
            task.abort();
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.config.socket_path
    }
}
