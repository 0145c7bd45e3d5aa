//! `world_server`
//!
//! Server-side systems:
//! - TCP listener and per-connection reader tasks
//! - Single world loop that owns the `WorldState`
//! - Message routing with drop counters
//! - Operator console (status, owners, owner, quit)
//!
//! Clients only push; the server never replies.

pub mod server;

pub use server::WorldServer;
