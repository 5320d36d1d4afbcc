//! TabGuard RPC server: JSON over stdin/stdout for the browser-side shim.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"tab.mark_private", "params":{...}, "sender":{...}}
//! Response: {"id":1, "result":{"success":true, ...}}
//! Pushed:   {"event":"command", "data":{"command":"showLockOverlay","tabId":7}}
//!           {"event":"status", "data":{"tabId":7,"status":"private-locked"}}
//! Logs go to stderr.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tabguard::adapters::ChannelBridge;
use tabguard::app::App;
use tabguard::config::AppConfig;
use tabguard::types::message::MessageSender;

/// Simple rate limiter: max requests per one-second window.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            request_count: 0,
            max_per_second,
        }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    sender: MessageSender,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    info!(data_dir = %config.data_dir.display(), extension_id = %config.extension_id, "starting tabguard-rpc");

    let (bridge, mut commands) = ChannelBridge::new();
    let app = App::new(config, bridge)?;

    // Single writer keeps stdout lines whole.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            let mut bytes = line.to_string().into_bytes();
            bytes.push(b'\n');
            if stdout.write_all(&bytes).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let command_tx = out_tx.clone();
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if command_tx.send(json!({"event": "command", "data": command})).is_err() {
                break;
            }
        }
    });

    let mut status_rx = app.engine.subscribe();
    let status_tx = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    if status_tx.send(json!({"event": "status", "data": event})).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = app.startup().await {
        error!(error = %e, "startup failed, continuing with empty state");
    }

    let _ = out_tx.send(json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));

    let mut rate_limiter = RateLimiter::new(200);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let _ = out_tx.send(json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        if !rate_limiter.check() {
            warn!(method = %request.method, "rate limit exceeded");
            let _ = out_tx.send(json!({"id": request.id, "error": "rate limit exceeded"}));
            continue;
        }

        let result = app
            .router
            .dispatch(&request.sender, &request.method, request.params)
            .await;
        let _ = out_tx.send(json!({"id": request.id, "result": result}));
    }

    app.shutdown();
    drop(out_tx);
    // Forwarding tasks still hold senders; give the writer a moment to drain.
    let _ = tokio::time::timeout(Duration::from_millis(500), writer).await;
    Ok(())
}
