//! Enforcement daemon serving page agents over a Unix socket.
//!
//! Agents connect and speak newline-delimited JSON: each request line
//! gets exactly one response line. Enforcement pushes (`blockVideo`,
//! `unblockVideo`) are fanned out to every connection as unsolicited
//! lines; agents filter by `tabId`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, broadcast};

use wt_core::{
    AgentCommand, AgentPush, AgentTransport, DeliveryError, Engine, Request, SystemClock, TabId,
};
use wt_store::SqliteStore;

use crate::config::Config;

/// Fans engine pushes out to every connected agent.
///
/// A push with no connected receivers is a delivery failure; the engine
/// logs it and moves on, and the agent's next `checkMyStatus` poll
/// catches it up.
pub struct BroadcastTransport {
    sender: broadcast::Sender<AgentPush>,
}

impl BroadcastTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentPush> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentTransport for BroadcastTransport {
    async fn send(&self, tab: TabId, command: AgentCommand) -> Result<(), DeliveryError> {
        let push = AgentPush {
            tab_id: tab,
            command,
        };
        self.sender.send(push).map_err(|_| DeliveryError {
            tab,
            reason: "no agents connected".into(),
        })?;
        Ok(())
    }
}

type SharedEngine = Arc<Mutex<Engine<SqliteStore, Arc<BroadcastTransport>, SystemClock>>>;

/// Runs the daemon until ctrl-c.
pub async fn run(config: &Config, store: SqliteStore) -> Result<()> {
    let transport = Arc::new(BroadcastTransport::new());
    let mut engine = Engine::new(store, Arc::clone(&transport), SystemClock);

    // Catch up on any day boundary crossed while the process was down
    // before accepting traffic.
    engine.tick().await?;

    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let listener = bind_socket(&config.socket_path)?;
    tracing::info!(socket = %config.socket_path.display(), "daemon listening");

    let tick_interval = Duration::from_secs(config.tick_interval_secs.max(1));
    let ticker = tokio::spawn(tick_loop(Arc::clone(&engine), tick_interval));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted.context("accept failed")?;
                let engine = Arc::clone(&engine);
                let pushes = transport.subscribe();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, engine, pushes).await {
                        tracing::debug!(%err, "agent connection closed with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    ticker.abort();
    let _ = std::fs::remove_file(&config.socket_path);
    Ok(())
}

/// Binds the listening socket, replacing a stale socket file from a
/// previous run.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

async fn tick_loop(engine: SharedEngine, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if let Err(err) = engine.lock().await.tick().await {
            tracing::error!(%err, "tick failed");
        }
    }
}

/// Serves one agent connection: request/response lines interleaved
/// with broadcast pushes.
async fn handle_connection(
    stream: UnixStream,
    engine: SharedEngine,
    mut pushes: broadcast::Receiver<AgentPush>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(request) => {
                        let response = engine.lock().await.handle_request(request).await;
                        serde_json::to_string(&response)?
                    }
                    Err(err) => {
                        tracing::warn!(%err, "unparseable request line");
                        serde_json::to_string(&serde_json::json!({ "error": err.to_string() }))?
                    }
                };
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            push = pushes.recv() => {
                match push {
                    Ok(push) => {
                        let line = serde_json::to_string(&push)?;
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "agent connection lagged behind pushes");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}
