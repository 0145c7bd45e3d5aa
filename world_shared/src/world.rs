//! World-state data model.
//!
//! `WorldState` owns every `Owner`, and each `Owner` owns the `Entity` records it
//! controls. An entity refers back to its owner by `OwnerId` only, so the graph
//! has no ownership cycles.
//!
//! There is no internal locking: callers serialize mutation (the server does it by
//! giving the world to a single task).
//!
//! Maps are `BTreeMap`s so iteration order is stable for logs and console dumps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::{DuplicateRegistration, WorldConfig},
    math::Vec3,
};

/// Client-supplied, globally unique owner (player) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

/// Entity index, unique within one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIndex(pub u32);

/// A controllable simulated object (a pawn on the wire).
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    index: EntityIndex,
    owner: OwnerId,
    pub position: Vec3,
    /// `None` until an update supplies a value.
    pub health: Option<f64>,
}

impl Entity {
    fn new(owner: OwnerId, index: EntityIndex) -> Self {
        Self {
            index,
            owner,
            position: Vec3::ZERO,
            health: None,
        }
    }

    pub fn index(&self) -> EntityIndex {
        self.index
    }

    /// Owner whose entity map holds this entity.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

/// A registered participant and the entities it controls.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    id: OwnerId,
    entities: BTreeMap<EntityIndex, Entity>,
}

impl Owner {
    pub fn new(id: OwnerId) -> Self {
        Self {
            id,
            entities: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn entity(&self, index: EntityIndex) -> Option<&Entity> {
        self.entities.get(&index)
    }

    pub fn has_entity(&self, index: EntityIndex) -> bool {
        self.entities.contains_key(&index)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the entity at `index`, creating it first if this owner has none.
    ///
    /// New entities sit at the origin with no health, and always carry this
    /// owner's id.
    pub fn upsert_entity(&mut self, index: EntityIndex) -> &mut Entity {
        let owner = self.id;
        self.entities
            .entry(index)
            .or_insert_with(|| Entity::new(owner, index))
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Id already registered; existing owner left alone.
    KeptExisting,
    /// Id already registered; owner replaced with an empty one.
    Reset,
}

/// The authoritative shared snapshot of all owners.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    config: WorldConfig,
    owners: BTreeMap<OwnerId, Owner>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            config,
            owners: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Registers an owner with no entities.
    ///
    /// A repeated id is handled per `WorldConfig::duplicate_registration`.
    pub fn register_owner(&mut self, id: OwnerId) -> Registration {
        if self.owners.contains_key(&id) {
            return match self.config.duplicate_registration {
                DuplicateRegistration::Keep => Registration::KeptExisting,
                DuplicateRegistration::Reset => {
                    self.owners.insert(id, Owner::new(id));
                    Registration::Reset
                }
            };
        }
        self.owners.insert(id, Owner::new(id));
        Registration::Created
    }

    pub fn find_owner(&self, id: OwnerId) -> Option<&Owner> {
        self.owners.get(&id)
    }

    pub fn find_owner_mut(&mut self, id: OwnerId) -> Option<&mut Owner> {
        self.owners.get_mut(&id)
    }

    pub fn owners(&self) -> impl Iterator<Item = &Owner> {
        self.owners.values()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Total entities across all owners.
    pub fn entity_count(&self) -> usize {
        self.owners.values().map(Owner::entity_count).sum()
    }
}
