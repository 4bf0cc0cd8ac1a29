//! mongo-bus host: newline-delimited JSON calls on stdin, replies and events on stdout.
//!
//! Each input line is `{"id": 1, "method": "mongo.find", "args": ["app.users", {}]}`.
//! Replies are `{"id": 1, "result": ...}` or `{"id": 1, "error": {...}}`; events
//! are `{"event": "mongo.insert", "data": {...}}`. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongo_bus::{error_to_json, Bus, Config, ConnectOverrides, ConnectionManager, Dispatcher, MongoConnector};

/// Serve MongoDB operations over a line-oriented JSON bus.
#[derive(Parser, Debug)]
#[command(name = "mongo-bus", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MongoDB host, `host:port`, or a full mongodb:// URL
    #[arg(long)]
    host: Option<String>,

    /// Port used when the host has none
    #[arg(long)]
    port: Option<u16>,

    /// Connection string; overrides host and port
    #[arg(long)]
    url: Option<String>,

    /// Default database
    #[arg(long)]
    database: Option<String>,

    /// Do not connect at startup; wait for a mongo.connect call
    #[arg(long)]
    no_connect: bool,
}

impl Args {
    fn overrides(&self) -> ConnectOverrides {
        ConnectOverrides {
            host: self.host.clone(),
            port: self.port,
            url: self.url.clone(),
            database: self.database.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Call {
    #[serde(default)]
    id: JsonValue,
    method: String,
    #[serde(default)]
    args: Vec<JsonValue>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongo_bus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply(&args.overrides());
    let connect_at_start = config.enabled && !args.no_connect;
    let watch = config.watch.clone();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.connection_url(),
        "starting mongo-bus"
    );

    let manager = ConnectionManager::new(config, Arc::new(MongoConnector));
    for namespace in &watch {
        manager.watch(namespace)?;
    }
    if connect_at_start {
        manager.connect();
    }

    let (bus, _serve) = Bus::start(Dispatcher::new(manager.clone()));

    // single writer so lines never interleave
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<JsonValue>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                tracing::error!(error = %e, "failed to write to stdout");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut events = bus.subscribe();
    let event_tx = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = event_tx.send(json!({ "event": event.name(), "data": event.payload() }));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let call: Call = match serde_json::from_str(&line) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable call");
                let _ = out_tx.send(json!({ "id": null, "error": { "kind": "Rejected", "message": e.to_string() } }));
                continue;
            }
        };

        let bus = bus.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = match bus.call_raw(&call.method, call.args).await {
                Ok(result) => json!({ "id": call.id, "result": result }),
                Err(err) => json!({ "id": call.id, "error": error_to_json(&err) }),
            };
            let _ = out_tx.send(response);
        });
    }

    manager.shutdown().await;
    drop(out_tx);
    drop(bus);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;
    tracing::info!("mongo-bus stopped");
    Ok(())
}
