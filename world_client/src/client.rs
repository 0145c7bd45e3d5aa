//! Client implementation.
//!
//! The client keeps one framed TCP connection open, registers its owner id and
//! then pushes pawn updates. The server never answers, so every call here is
//! fire-and-forget once the bytes are written.

use std::net::SocketAddr;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info};
use world_shared::{
    config::DEFAULT_MAX_FRAME_LEN,
    math::Vec3,
    net::{ClientMsg, FramedConn, PawnUpdate, UpdateMsg},
    world::{EntityIndex, OwnerId},
};

/// Connection to a world-state server.
pub struct WorldClient {
    conn: FramedConn,
    /// Set once `register` has been sent.
    owner: Option<OwnerId>,
    sent: u64,
}

impl WorldClient {
    /// Opens the connection. No handshake is exchanged.
    pub async fn connect(server_addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %server_addr, "Connecting to server");
        let conn = FramedConn::connect(server_addr, DEFAULT_MAX_FRAME_LEN)
            .await
            .context("connect")?;
        Ok(Self {
            conn,
            owner: None,
            sent: 0,
        })
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    /// Frames written so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Announces `uuid` as this client's owner id.
    pub async fn register(&mut self, uuid: OwnerId) -> anyhow::Result<()> {
        self.send(&ClientMsg::register(uuid)).await?;
        self.owner = Some(uuid);
        info!(owner = ?uuid, "Registered");
        Ok(())
    }

    /// Pushes new state for pawns of the registered owner.
    pub async fn push_pawns<I>(&mut self, pawns: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (EntityIndex, Vec3, Option<f64>)>,
    {
        let owner = self.owner.context("push before register")?;
        let mut update = UpdateMsg::new();
        for (index, pos, hp) in pawns {
            let mut pawn = PawnUpdate::at(pos.x, pos.y, pos.z);
            pawn.hp = hp;
            update = update.pawn(owner, index, pawn);
        }
        self.send_update(update).await
    }

    pub async fn send_update(&mut self, update: UpdateMsg) -> anyhow::Result<()> {
        self.send(&ClientMsg::Update(update)).await
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        self.conn.send(msg).await?;
        self.sent += 1;
        debug!(sent = self.sent, "Message sent");
        Ok(())
    }

    /// Sends any JSON document as one frame, bypassing the typed messages.
    pub async fn send_raw(&mut self, value: &Value) -> anyhow::Result<()> {
        self.conn.send_value(value).await?;
        self.sent += 1;
        Ok(())
    }

    /// Sends raw bytes as one frame.
    pub async fn send_bytes(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.conn.send_payload(payload).await?;
        self.sent += 1;
        Ok(())
    }
}
