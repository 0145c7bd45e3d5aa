//! Server implementation.
//!
//! The server is the single owner of the `WorldState`. Every connection gets a
//! reader task that decodes frames and forwards them over one mpsc queue; the
//! server drains that queue and routes messages one at a time, so mutation of
//! the world is serialized without any locking.
//!
//! Nothing is ever written back to clients.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use world_shared::{
    config::ServerConfig,
    net::{Delivery, FrameListener, MessageSource},
    router::{route, DropCounters},
    world::{OwnerId, WorldState},
};

static NEXT_CONN_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one inbound connection for logging and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u32);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Event sent from a connection reader to the world loop.
#[derive(Debug)]
pub enum Inbound {
    Delivery { conn: ConnId, delivery: Delivery },
    Closed { conn: ConnId, error: Option<String> },
}

/// Per-connection bookkeeping.
#[derive(Debug, Clone)]
struct ConnState {
    peer: Option<SocketAddr>,
    messages: u64,
}

/// Authoritative world-state server.
pub struct WorldServer {
    pub cfg: ServerConfig,
    world: WorldState,
    counters: DropCounters,
    connections: HashMap<ConnId, ConnState>,

    listener: FrameListener,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: mpsc::Receiver<Inbound>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    running: bool,
}

impl WorldServer {
    /// Binds the listener from `cfg.server_addr`.
    pub async fn new(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FrameListener::bind(addr, cfg.max_frame_len).await?;
        let (inbox_tx, inbox_rx) = mpsc::channel(cfg.channel_capacity.max(1));

        Ok(Self {
            world: WorldState::with_config(cfg.world),
            cfg,
            counters: DropCounters::default(),
            connections: HashMap::new(),
            listener,
            inbox_tx,
            inbox_rx,
            console_rx: None,
            running: true,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn counters(&self) -> &DropCounters {
        &self.counters
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts reading from `source` on its own task.
    ///
    /// Used for accepted sockets and for in-process sources alike.
    pub fn attach<S>(&mut self, source: S, peer: Option<SocketAddr>) -> ConnId
    where
        S: MessageSource + 'static,
    {
        let conn = ConnId::new_unique();
        self.connections.insert(conn, ConnState { peer, messages: 0 });
        tokio::spawn(read_connection(conn, source, self.inbox_tx.clone()));
        info!(conn = ?conn, peer = ?peer, "Connection opened");
        conn
    }

    /// Accepts exactly one connection.
    pub async fn accept_one(&mut self) -> anyhow::Result<ConnId> {
        let (conn, peer) = self.listener.accept().await?;
        Ok(self.attach(conn, Some(peer)))
    }

    /// Accepts a connection with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ConnId>> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((conn, peer))) => Ok(Some(self.attach(conn, Some(peer)))),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Handles everything already queued without waiting.
    pub async fn step(&mut self) -> anyhow::Result<usize> {
        self.process_console_commands()?;
        let mut handled = 0;
        while let Ok(event) = self.inbox_rx.try_recv() {
            self.handle_inbound(event);
            handled += 1;
        }
        Ok(handled)
    }

    /// Waits up to `timeout` for the first queued event, then drains the rest.
    pub async fn pump(&mut self, timeout: Duration) -> anyhow::Result<usize> {
        match tokio::time::timeout(timeout, self.inbox_rx.recv()).await {
            Ok(Some(event)) => {
                self.handle_inbound(event);
                Ok(1 + self.step().await?)
            }
            // The server holds a sender, so the queue never closes while it lives.
            Ok(None) | Err(_) => self.step().await,
        }
    }

    /// Serves connections until `quit` is entered on the console.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        while self.running {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        self.attach(conn, Some(peer));
                    }
                    Err(e) => warn!(error = ?e, "Accept failed"),
                },
                Some(event) = self.inbox_rx.recv() => self.handle_inbound(event),
                Some(line) = recv_console(&mut self.console_rx) => {
                    for out in self.exec_console(&line)? {
                        println!("{out}");
                    }
                }
            }
        }
        info!("Server shutting down");
        Ok(())
    }

    fn handle_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::Delivery { conn, delivery } => {
                if let Some(state) = self.connections.get_mut(&conn) {
                    state.messages += 1;
                }
                match delivery {
                    Delivery::Message(msg) => {
                        let outcome = route(&mut self.world, &msg);
                        debug!(conn = ?conn, ?outcome, "Message routed");
                        self.counters.record(&outcome);
                    }
                    Delivery::Undecodable { reason } => {
                        warn!(conn = ?conn, %reason, "Undecodable frame dropped");
                        self.counters.record_undecodable();
                    }
                }
            }
            Inbound::Closed { conn, error } => {
                let state = self.connections.remove(&conn);
                let peer = state.as_ref().and_then(|s| s.peer);
                let messages = state.map(|s| s.messages).unwrap_or(0);
                match error {
                    Some(error) => {
                        warn!(conn = ?conn, peer = ?peer, messages, %error, "Connection closed with error")
                    }
                    None => info!(conn = ?conn, peer = ?peer, messages, "Connection closed"),
                }
            }
        }
    }

    fn process_console_commands(&mut self) -> anyhow::Result<()> {
        // Collect lines first to avoid borrow conflict
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line)? {
                println!("{out}");
            }
        }
        Ok(())
    }

    /// Executes a console command and returns the lines to print.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let c = &self.counters;
                Ok(vec![
                    format!("Listening: {}", self.local_addr()?),
                    format!("Connections: {}", self.connections.len()),
                    format!(
                        "Owners: {}  Entities: {}",
                        self.world.owner_count(),
                        self.world.entity_count()
                    ),
                    format!("Registrations: {}  Updates: {}", c.registrations, c.updates),
                    format!(
                        "Dropped: {} (untagged={} missing_uuid={} unknown_tag={} duplicate={} unknown_owner={} bad_key={} bad_entry={} undecodable={})",
                        c.dropped(),
                        c.untagged,
                        c.missing_uuid,
                        c.unknown_tag,
                        c.duplicate_registration,
                        c.unknown_owner,
                        c.bad_entity_key,
                        c.bad_entry,
                        c.undecodable
                    ),
                ])
            }
            "owners" => {
                let mut out = vec![format!("{} owner(s)", self.world.owner_count())];
                for owner in self.world.owners() {
                    out.push(format!(
                        "  {}: {} entities",
                        owner.id().0,
                        owner.entity_count()
                    ));
                }
                Ok(out)
            }
            "owner" => {
                let Some(id) = tokens.get(1).and_then(|t| t.parse::<u64>().ok()) else {
                    return Ok(vec!["Usage: owner <id>".to_string()]);
                };
                let Some(owner) = self.world.find_owner(OwnerId(id)) else {
                    return Ok(vec![format!("No owner {id}")]);
                };
                let mut out = vec![format!("Owner {id}: {} entities", owner.entity_count())];
                for e in owner.entities() {
                    let health = e
                        .health
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    out.push(format!(
                        "  [{}] pos=({}, {}, {}) hp={}",
                        e.index().0,
                        e.position.x,
                        e.position.y,
                        e.position.z,
                        health
                    ));
                }
                Ok(out)
            }
            "quit" | "exit" => {
                self.running = false;
                Ok(vec!["Shutting down".to_string()])
            }
            "help" => Ok(vec![
                "status        - counts and drop counters".to_string(),
                "owners        - list registered owners".to_string(),
                "owner <id>    - dump one owner's entities".to_string(),
                "quit          - stop the server".to_string(),
            ]),
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}

async fn recv_console(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn read_connection<S: MessageSource>(conn: ConnId, mut source: S, tx: mpsc::Sender<Inbound>) {
    loop {
        match source.recv().await {
            Ok(Some(delivery)) => {
                if tx.send(Inbound::Delivery { conn, delivery }).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.send(Inbound::Closed { conn, error: None }).await;
                return;
            }
            Err(e) => {
                let error = Some(format!("{e:#}"));
                let _ = tx.send(Inbound::Closed { conn, error }).await;
                return;
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(mut cfg: ServerConfig) -> anyhow::Result<(WorldServer, SocketAddr)> {
    cfg.server_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string();
    let server = WorldServer::new(cfg).await?;
    let addr = server.local_addr()?;
    Ok((server, addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_shared::{
        config::{DuplicateRegistration, WorldConfig},
        net::{ClientMsg, PawnUpdate, UpdateMsg},
        world::EntityIndex,
    };

    async fn drain_until<F>(server: &mut WorldServer, mut done: F)
    where
        F: FnMut(&WorldServer) -> bool,
    {
        for _ in 0..100 {
            if done(server) {
                return;
            }
            server.pump(Duration::from_millis(20)).await.unwrap();
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn attached_source_is_routed_and_closed() -> anyhow::Result<()> {
        let (mut server, _) = bind_ephemeral(ServerConfig::default()).await?;
        let (tx, rx) = mpsc::channel(8);
        server.attach(rx, None);
        assert_eq!(server.connection_count(), 1);

        tx.send(ClientMsg::register(OwnerId(3))).await?;
        tx.send(ClientMsg::Update(UpdateMsg::new().pawn(
            OwnerId(3),
            EntityIndex(1),
            PawnUpdate::at(4.0, 5.0, 6.0).with_hp(12.0),
        )))
        .await?;
        tx.send(ClientMsg::Untagged).await?;
        drop(tx);

        drain_until(&mut server, |s| s.connection_count() == 0).await;

        let e = server
            .world()
            .find_owner(OwnerId(3))
            .and_then(|o| o.entity(EntityIndex(1)))
            .cloned()
            .unwrap();
        assert_eq!(e.health, Some(12.0));
        assert_eq!(server.counters().registrations, 1);
        assert_eq!(server.counters().updates, 1);
        assert_eq!(server.counters().untagged, 1);
        Ok(())
    }

    #[tokio::test]
    async fn messages_from_many_sources_all_apply() -> anyhow::Result<()> {
        let (mut server, _) = bind_ephemeral(ServerConfig::default()).await?;
        let mut senders = Vec::new();
        for id in 0..4u64 {
            let (tx, rx) = mpsc::channel(8);
            server.attach(rx, None);
            senders.push((id, tx));
        }
        for (id, tx) in &senders {
            tx.send(ClientMsg::register(OwnerId(*id))).await?;
            tx.send(ClientMsg::Update(UpdateMsg::new().pawn(
                OwnerId(*id),
                EntityIndex(0),
                PawnUpdate::at(*id as f64, 0.0, 0.0),
            )))
            .await?;
        }
        drop(senders);

        drain_until(&mut server, |s| s.connection_count() == 0).await;
        assert_eq!(server.world().owner_count(), 4);
        for owner in server.world().owners() {
            let e = owner.entity(EntityIndex(0)).unwrap();
            assert_eq!(e.position.x, owner.id().0 as f64);
            assert_eq!(e.owner(), owner.id());
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_policy_comes_from_config() -> anyhow::Result<()> {
        let cfg = ServerConfig {
            world: WorldConfig {
                duplicate_registration: DuplicateRegistration::Reset,
                ..Default::default()
            },
            ..Default::default()
        };
        let (server, _) = bind_ephemeral(cfg).await?;
        assert_eq!(
            server.world().config().duplicate_registration,
            DuplicateRegistration::Reset
        );
        Ok(())
    }

    #[tokio::test]
    async fn console_reports_world() -> anyhow::Result<()> {
        let (mut server, _) = bind_ephemeral(ServerConfig::default()).await?;
        let (tx, rx) = mpsc::channel(8);
        server.attach(rx, None);
        tx.send(ClientMsg::register(OwnerId(9))).await?;
        tx.send(ClientMsg::Update(UpdateMsg::new().pawn(
            OwnerId(9),
            EntityIndex(2),
            PawnUpdate::at(1.0, 2.0, 3.0),
        )))
        .await?;
        drop(tx);
        drain_until(&mut server, |s| s.connection_count() == 0).await;

        let status = server.exec_console("status")?;
        assert!(status.iter().any(|l| l == "Owners: 1  Entities: 1"));

        let owners = server.exec_console("owners")?;
        assert_eq!(owners, vec!["1 owner(s)".to_string(), "  9: 1 entities".to_string()]);

        let dump = server.exec_console("owner 9")?;
        assert_eq!(dump[1], "  [2] pos=(1, 2, 3) hp=-");

        assert_eq!(server.exec_console("owner 10")?, vec!["No owner 10".to_string()]);
        assert_eq!(server.exec_console("owner")?, vec!["Usage: owner <id>".to_string()]);

        assert!(server.is_running());
        server.exec_console("quit")?;
        assert!(!server.is_running());
        Ok(())
    }
}
