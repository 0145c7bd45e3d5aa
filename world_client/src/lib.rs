//! `world_client`
//!
//! Client-side pieces:
//! - Framed connection and typed senders for `register`/`update`
//! - Scripted patrols used by the demo binary

pub mod client;
pub mod patrol;

pub use client::WorldClient;
