//! Merge of update messages into the world.
//!
//! Each `(owner, entity)` pair in an update is independent, so the order in
//! which players and pawns are visited does not change the final state.
//!
//! Rules:
//! - unknown owner: its whole sub-update is skipped, nothing is created
//! - unknown entity index under a known owner: the entity is created
//! - position is always overwritten
//! - health is written only when `hp` is present
//! - a malformed player or pawn entry is skipped on its own

use tracing::debug;

use crate::{
    net::{Entry, PawnUpdate, UpdateMsg},
    world::{Entity, EntityIndex, WorldState},
};

/// What one update did to the world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Player entries merged into a known owner.
    pub owners_applied: usize,
    /// Player entries naming no registered owner (or no owner at all).
    pub owners_skipped: usize,
    /// Entities written, including new ones.
    pub entities_touched: usize,
    pub entities_created: usize,
    /// Pawn keys that are not entity indices.
    pub bad_entity_keys: usize,
    /// Player or pawn entries (or their maps) that did not fit the schema.
    pub bad_entries: usize,
}

impl ApplyReport {
    pub fn is_noop(&self) -> bool {
        self.entities_touched == 0
    }
}

/// Applies `msg` to `world`. Never fails; malformed parts are skipped and counted.
pub fn apply_update(world: &mut WorldState, msg: &UpdateMsg) -> ApplyReport {
    let mut report = ApplyReport::default();
    let zero_hp_is_absent = world.config().zero_hp_is_absent;

    let Some(players) = present(&msg.players, &mut report, "players") else {
        return report;
    };

    for (key, player) in players {
        let Some(player) = present(player, &mut report, key) else {
            continue;
        };
        let owner = match player.uuid {
            Some(id) => world.find_owner_mut(id),
            None => None,
        };
        let Some(owner) = owner else {
            debug!(player_key = %key, uuid = ?player.uuid, "update for unregistered owner dropped");
            report.owners_skipped += 1;
            continue;
        };
        report.owners_applied += 1;

        let Some(pawns) = present(&player.pawns, &mut report, key) else {
            continue;
        };
        for (pawn_key, pawn) in pawns {
            let Some(pawn) = present(pawn, &mut report, pawn_key) else {
                continue;
            };
            let Some(index) = parse_entity_index(pawn_key) else {
                debug!(owner = ?owner.id(), pawn_key = %pawn_key, "pawn key is not an entity index");
                report.bad_entity_keys += 1;
                continue;
            };
            if !owner.has_entity(index) {
                report.entities_created += 1;
            }
            merge_pawn(owner.upsert_entity(index), pawn, zero_hp_is_absent);
            report.entities_touched += 1;
        }
    }

    report
}

/// Unwraps a present entry; a malformed one is logged and counted.
fn present<'a, T>(entry: &'a Entry<T>, report: &mut ApplyReport, key: &str) -> Option<&'a T> {
    match entry {
        Entry::Present(v) => Some(v),
        Entry::Absent => None,
        Entry::Malformed { reason } => {
            debug!(key = %key, %reason, "malformed update entry skipped");
            report.bad_entries += 1;
            None
        }
    }
}

fn merge_pawn(entity: &mut Entity, pawn: &PawnUpdate, zero_hp_is_absent: bool) {
    entity.position.x = pawn.x;
    entity.position.y = pawn.y;
    entity.position.z = pawn.z;

    match pawn.hp {
        Some(hp) if zero_hp_is_absent && hp == 0.0 => {}
        Some(hp) => entity.health = Some(hp),
        None => {}
    }
}

/// Plain decimal only: `"3"` is an index, `" 3"` and `"+3"` are not.
fn parse_entity_index(key: &str) -> Option<EntityIndex> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok().map(EntityIndex)
}
