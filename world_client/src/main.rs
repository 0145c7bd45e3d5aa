//! Standalone demo client.
//!
//! Usage:
//!   cargo run -p world_client -- [--addr 127.0.0.1:15243] [--uuid 1] [--pawns 3]
//!                                [--rate-hz 10] [--updates 0]
//!
//! The client registers `--uuid`, then walks `--pawns` pawns around square
//! patrols and pushes their positions `--rate-hz` times per second. Health is
//! sent on every tenth update only, so the server keeps the last value in
//! between. `--updates 0` runs until interrupted.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use world_client::{patrol::Patrol, WorldClient};
use world_shared::{
    config::DEFAULT_PORT,
    world::{EntityIndex, OwnerId},
};

struct Args {
    addr: String,
    uuid: u64,
    pawns: u32,
    rate_hz: u32,
    updates: u64,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: format!("127.0.0.1:{DEFAULT_PORT}"),
        uuid: 1,
        pawns: 3,
        rate_hz: 10,
        updates: 0,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = args[i + 1].clone();
                i += 2;
            }
            "--uuid" if i + 1 < args.len() => {
                out.uuid = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "--pawns" if i + 1 < args.len() => {
                out.pawns = args[i + 1].parse().unwrap_or(3);
                i += 2;
            }
            "--rate-hz" if i + 1 < args.len() => {
                out.rate_hz = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            "--updates" if i + 1 < args.len() => {
                out.updates = args[i + 1].parse().unwrap_or(0);
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let addr: SocketAddr = args.addr.parse().context("parse --addr")?;
    info!(server = %addr, uuid = args.uuid, pawns = args.pawns, "Starting client");

    let mut client = WorldClient::connect(addr).await?;
    client.register(OwnerId(args.uuid)).await?;

    let patrols: Vec<Patrol> = (0..args.pawns)
        .map(|i| Patrol::square(i as f64 * 10.0, 8.0, 2.0))
        .collect();
    let dt = 1.0 / args.rate_hz.max(1) as f64;
    let mut interval = tokio::time::interval(Duration::from_secs_f64(dt));

    let mut n: u64 = 0;
    while args.updates == 0 || n < args.updates {
        interval.tick().await;
        let t = n as f64 * dt;
        let send_hp = n % 10 == 0;
        let hp = 100.0 - (n / 10 % 100) as f64;

        client
            .push_pawns(patrols.iter().enumerate().map(|(i, p)| {
                (
                    EntityIndex(i as u32),
                    p.position_at(t),
                    send_hp.then_some(hp),
                )
            }))
            .await?;

        if n % 50 == 0 {
            info!(update = n, sent = client.sent(), "Pushing pawns");
        }
        n += 1;
    }

    info!(sent = client.sent(), "Done");
    Ok(())
}
