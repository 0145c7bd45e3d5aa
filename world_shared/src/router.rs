//! Message dispatch.
//!
//! `route` is the only way a decoded message reaches the world. It holds no
//! state of its own; everything it decides is returned as a `RouteOutcome` so
//! the caller can count and log dropped messages.

use tracing::{debug, info, warn};

use crate::{
    apply::{apply_update, ApplyReport},
    net::ClientMsg,
    world::{OwnerId, Registration, WorldState},
};

/// Why a message changed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No `t` field.
    Untagged,
    /// `register` without `uuid`.
    MissingUuid,
    /// `t` not understood.
    UnknownTag(String),
}

/// What routing one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Registered {
        owner: OwnerId,
        registration: Registration,
    },
    Updated(ApplyReport),
    Ignored(IgnoreReason),
}

/// Dispatches one message against the world.
pub fn route(world: &mut WorldState, msg: &ClientMsg) -> RouteOutcome {
    match msg {
        ClientMsg::Untagged => {
            debug!("message without type tag ignored");
            RouteOutcome::Ignored(IgnoreReason::Untagged)
        }
        ClientMsg::Register(reg) => {
            let Some(owner) = reg.uuid else {
                debug!("register without uuid ignored");
                return RouteOutcome::Ignored(IgnoreReason::MissingUuid);
            };
            let registration = world.register_owner(owner);
            match registration {
                Registration::Created => info!(owner = ?owner, "Owner registered"),
                Registration::KeptExisting => {
                    debug!(owner = ?owner, "duplicate register ignored")
                }
                Registration::Reset => info!(owner = ?owner, "Owner re-registered, entities reset"),
            }
            RouteOutcome::Registered {
                owner,
                registration,
            }
        }
        ClientMsg::Update(update) => RouteOutcome::Updated(apply_update(world, update)),
        ClientMsg::Unknown { tag } => {
            warn!(tag = %tag, "unknown message type ignored");
            RouteOutcome::Ignored(IgnoreReason::UnknownTag(tag.clone()))
        }
    }
}

/// Running totals of routed and dropped messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropCounters {
    pub registrations: u64,
    pub updates: u64,
    pub untagged: u64,
    pub missing_uuid: u64,
    pub unknown_tag: u64,
    pub duplicate_registration: u64,
    /// Player entries naming an owner that is not registered.
    pub unknown_owner: u64,
    pub bad_entity_key: u64,
    /// Player or pawn entries that did not fit the schema.
    pub bad_entry: u64,
    /// Frames whose payload failed to decode.
    pub undecodable: u64,
}

impl DropCounters {
    pub fn record(&mut self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Registered { registration, .. } => match registration {
                Registration::KeptExisting => self.duplicate_registration += 1,
                Registration::Created | Registration::Reset => self.registrations += 1,
            },
            RouteOutcome::Updated(report) => {
                self.updates += 1;
                self.unknown_owner += report.owners_skipped as u64;
                self.bad_entity_key += report.bad_entity_keys as u64;
                self.bad_entry += report.bad_entries as u64;
            }
            RouteOutcome::Ignored(IgnoreReason::Untagged) => self.untagged += 1,
            RouteOutcome::Ignored(IgnoreReason::MissingUuid) => self.missing_uuid += 1,
            RouteOutcome::Ignored(IgnoreReason::UnknownTag(_)) => self.unknown_tag += 1,
        }
    }

    pub fn record_undecodable(&mut self) {
        self.undecodable += 1;
    }

    /// Everything dropped, whole messages and sub-updates alike.
    pub fn dropped(&self) -> u64 {
        self.untagged
            + self.missing_uuid
            + self.unknown_tag
            + self.duplicate_registration
            + self.unknown_owner
            + self.bad_entity_key
            + self.bad_entry
            + self.undecodable
    }
}
