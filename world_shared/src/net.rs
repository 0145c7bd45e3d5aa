//! Wire messages and framing.
//!
//! Goals:
//! - Decode each delivery once, at the boundary, into a typed `ClientMsg`.
//! - Keep the JSON shape explicit: `{"t": "register", ...}` / `{"t": "update", ...}`.
//! - One length-prefixed frame per message over TCP.
//!
//! The world core never sees raw JSON; the server consumes `MessageSource`s.

use std::{collections::BTreeMap, net::SocketAddr};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

use crate::world::{EntityIndex, OwnerId};

/// Tag value for registration messages.
pub const TAG_REGISTER: &str = "register";
/// Tag value for update messages.
pub const TAG_UPDATE: &str = "update";

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    Register(RegisterMsg),
    Update(UpdateMsg),
    /// Carried a `t` the server does not know.
    Unknown { tag: String },
    /// No `t` at all.
    Untagged,
}

/// `{"t": "register", "uuid": 7}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OwnerId>,
}

/// `{"t": "update", "players": {"0": {"uuid": 7, "pawns": {"3": {...}}}}}`
///
/// Keys of `players` are opaque; the owner is named by `uuid`. Keys of `pawns`
/// are entity indices written as plain decimal (no sign, no padding spaces).
/// Every player and pawn entry is decoded on its own: a null entry means
/// "nothing to do" and an entry that does not fit the schema is kept as
/// `Entry::Malformed`, so it never spoils its siblings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMsg {
    #[serde(default, skip_serializing_if = "Entry::is_absent")]
    pub players: Entry<BTreeMap<String, Entry<PlayerUpdate>>>,
}

/// Per-owner part of an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OwnerId>,
    #[serde(default, skip_serializing_if = "Entry::is_absent")]
    pub pawns: Entry<BTreeMap<String, Entry<PawnUpdate>>>,
}

/// New state for one entity. Position is mandatory, health optional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PawnUpdate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<f64>,
}

/// One independently decoded piece of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<T> {
    Present(T),
    /// Missing or `null`.
    Absent,
    /// Present but not of the expected shape.
    Malformed { reason: String },
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Entry::Absent
    }
}

impl<T> Entry<T> {
    pub fn is_absent(&self) -> bool {
        !matches!(self, Entry::Present(_))
    }

    pub fn as_present(&self) -> Option<&T> {
        match self {
            Entry::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Replaces anything but a present value with `f()`.
    pub fn get_or_insert_with(&mut self, f: impl FnOnce() -> T) -> &mut T {
        if self.is_absent() {
            *self = Entry::Present(f());
        }
        match self {
            Entry::Present(v) => v,
            _ => unreachable!("entry was just filled"),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Entry<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Entry::Absent);
        }
        Ok(match serde_json::from_value(value) {
            Ok(v) => Entry::Present(v),
            Err(e) => Entry::Malformed {
                reason: e.to_string(),
            },
        })
    }
}

impl<T: Serialize> Serialize for Entry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Entry::Present(v) => v.serialize(serializer),
            Entry::Absent | Entry::Malformed { .. } => serializer.serialize_none(),
        }
    }
}

impl PawnUpdate {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, hp: None }
    }

    pub fn with_hp(mut self, hp: f64) -> Self {
        self.hp = Some(hp);
        self
    }
}

impl UpdateMsg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) one pawn entry under the player keyed by `owner`.
    pub fn pawn(mut self, owner: OwnerId, index: EntityIndex, pawn: PawnUpdate) -> Self {
        let player = self
            .players
            .get_or_insert_with(BTreeMap::new)
            .entry(owner.0.to_string())
            .or_default()
            .get_or_insert_with(|| PlayerUpdate {
                uuid: Some(owner),
                pawns: Entry::Absent,
            });
        player
            .pawns
            .get_or_insert_with(BTreeMap::new)
            .insert(index.0.to_string(), Entry::Present(pawn));
        self
    }
}

#[derive(Serialize)]
#[serde(tag = "t", rename_all = "lowercase")]
enum Tagged<'a> {
    Register(&'a RegisterMsg),
    Update(&'a UpdateMsg),
}

impl ClientMsg {
    pub fn register(uuid: OwnerId) -> Self {
        ClientMsg::Register(RegisterMsg { uuid: Some(uuid) })
    }

    /// Classifies a decoded JSON document.
    ///
    /// A missing or null `t` yields `Untagged` and an unrecognized one `Unknown`.
    /// Only a `register` whose `uuid` is not an id is an error; bad parts of an
    /// update are kept as `Entry::Malformed` instead.
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        let tag = match value.get("t") {
            None | Some(Value::Null) => return Ok(ClientMsg::Untagged),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Ok(ClientMsg::Unknown { tag: other.to_string() }),
        };
        match tag.as_str() {
            TAG_REGISTER => Ok(ClientMsg::Register(
                serde_json::from_value(value).context("decode register body")?,
            )),
            TAG_UPDATE => Ok(ClientMsg::Update(
                serde_json::from_value(value).context("decode update body")?,
            )),
            _ => Ok(ClientMsg::Unknown { tag }),
        }
    }

    pub fn to_value(&self) -> anyhow::Result<Value> {
        let value = match self {
            ClientMsg::Register(r) => serde_json::to_value(Tagged::Register(r)),
            ClientMsg::Update(u) => serde_json::to_value(Tagged::Update(u)),
            ClientMsg::Unknown { tag } => Ok(serde_json::json!({ "t": tag })),
            ClientMsg::Untagged => Ok(serde_json::json!({})),
        };
        value.context("serialize msg")
    }
}

/// Encodes a message as a frame payload.
pub fn encode_to_bytes(msg: &ClientMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(&msg.to_value()?).context("serialize")?;
    Ok(Bytes::from(payload))
}

/// Decodes one frame payload.
pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<ClientMsg> {
    let value: Value = serde_json::from_slice(b).context("deserialize")?;
    ClientMsg::from_value(value)
}

/// One delivery from a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(ClientMsg),
    /// The frame arrived intact but its payload could not be decoded.
    Undecodable { reason: String },
}

/// Per-connection source of decoded messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next delivery. `Ok(None)` means the peer closed cleanly.
    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>>;
}

#[async_trait]
impl MessageSource for mpsc::Receiver<ClientMsg> {
    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>> {
        Ok(mpsc::Receiver::recv(self).await.map(Delivery::Message))
    }
}

/// TCP connection carrying length-prefixed frames (u32 big-endian length, JSON body).
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
    max_frame_len: usize,
}

impl FramedConn {
    pub fn new(stream: TcpStream, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }

    pub async fn connect(addr: SocketAddr, max_frame_len: usize) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream, max_frame_len))
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.send_payload(&payload).await
    }

    /// Sends an arbitrary JSON document as one frame.
    pub async fn send_value(&mut self, value: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(value).context("serialize value")?;
        self.send_payload(&payload).await
    }

    /// Sends raw bytes as one frame.
    pub async fn send_payload(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > self.max_frame_len {
            anyhow::bail!(
                "frame of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_frame_len
            );
        }
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    /// Reads one frame. `Ok(None)` on a clean close between frames.
    pub async fn recv_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("tcp read len"),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            anyhow::bail!("frame of {len} bytes exceeds limit of {}", self.max_frame_len);
        }
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        Ok(Some(payload))
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

#[async_trait]
impl MessageSource for FramedConn {
    async fn recv(&mut self) -> anyhow::Result<Option<Delivery>> {
        let Some(payload) = self.recv_frame().await? else {
            return Ok(None);
        };
        let delivery = match decode_from_bytes(&payload) {
            Ok(msg) => Delivery::Message(msg),
            Err(e) => Delivery::Undecodable {
                reason: format!("{e:#}"),
            },
        };
        Ok(Some(delivery))
    }
}

/// TCP server listener producing `FramedConn`s.
pub struct FrameListener {
    listener: TcpListener,
    max_frame_len: usize,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr, max_frame_len: usize) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self {
            listener,
            max_frame_len,
        })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((FramedConn::new(stream, self.max_frame_len), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
