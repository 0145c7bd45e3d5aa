//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p world_server -- [--config server.json] [--addr 127.0.0.1:15243]
//!
//! The server accepts connections and merges `register`/`update` messages into
//! its world state. Nothing is sent back to clients.
//!
//! Console commands:
//!   status       - Show connections, world size and drop counters
//!   owners       - List registered owners
//!   owner <id>   - Dump one owner's entities
//!   quit         - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use world_server::WorldServer;
use world_shared::config::ServerConfig;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base layer; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--config" => i += 2,
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        duplicate_registration = ?cfg.world.duplicate_registration,
        zero_hp_is_absent = cfg.world.zero_hp_is_absent,
        "Starting server"
    );

    let mut server = WorldServer::new(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'help' for commands, 'quit' to exit.");
    println!();

    server.run().await
}
