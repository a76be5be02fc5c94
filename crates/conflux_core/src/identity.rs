//! # Instance Identity
//!
//! A logical task item is identified by an [`InstanceId`]:
//! - the owner that currently holds it,
//! - the target (stream/system) it is addressed to,
//! - the entity it was spawned for.
//!
//! The id stays stable across consolidation cycles. When an item is resolved
//! into another owner or target, a migrated copy is made with
//! [`InstanceId::with_owner`] / [`InstanceId::with_target`].

use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

/// Unique identifier for the entity an instance was spawned for.
///
/// The key is split into two parts:
/// - Lower 32 bits: Index into entity storage
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityKey(u64);

impl EntityKey {
    /// Creates a new entity key from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the key.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the key.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid entity key.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this key is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::NULL
    }
}

/// Identifier of a task owner (a node in the owner tree).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct OwnerId(pub u32);

/// Identifier of the stream or system an instance is addressed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct TargetId(pub u32);

/// Composite identity of one logical task item.
///
/// Immutable once created. Two ids are equal when all three parts are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceId {
    owner: OwnerId,
    target: TargetId,
    entity: EntityKey,
}

impl InstanceId {
    /// Creates a new instance id.
    #[inline]
    #[must_use]
    pub const fn new(owner: OwnerId, target: TargetId, entity: EntityKey) -> Self {
        Self {
            owner,
            target,
            entity,
        }
    }

    /// Owner currently holding the instance.
    #[inline]
    #[must_use]
    pub const fn owner(self) -> OwnerId {
        self.owner
    }

    /// Target the instance is addressed to.
    #[inline]
    #[must_use]
    pub const fn target(self) -> TargetId {
        self.target
    }

    /// Entity the instance was spawned for.
    #[inline]
    #[must_use]
    pub const fn entity(self) -> EntityKey {
        self.entity
    }

    /// Copy of this id migrated to another owner.
    #[inline]
    #[must_use]
    pub const fn with_owner(self, owner: OwnerId) -> Self {
        Self { owner, ..self }
    }

    /// Copy of this id resolved to another target.
    #[inline]
    #[must_use]
    pub const fn with_target(self, target: TargetId) -> Self {
        Self { target, ..self }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}v{}",
            self.owner.0,
            self.target.0,
            self.entity.index(),
            self.entity.generation()
        )
    }
}

/// Anything that carries an [`InstanceId`].
pub trait Identified {
    /// The id this item is keyed on.
    fn instance_id(&self) -> InstanceId;
}

impl Identified for InstanceId {
    #[inline]
    fn instance_id(&self) -> InstanceId {
        *self
    }
}

/// An instance id with a payload attached.
///
/// Equality and hashing look at the id only; the payload is ignored.
#[derive(Clone, Copy, Debug)]
pub struct Tagged<P> {
    /// Identity of the item.
    pub id: InstanceId,
    /// Data carried with it.
    pub payload: P,
}

impl<P> Tagged<P> {
    /// Attaches a payload to an id.
    #[inline]
    #[must_use]
    pub const fn new(id: InstanceId, payload: P) -> Self {
        Self { id, payload }
    }
}

impl<P> Identified for Tagged<P> {
    #[inline]
    fn instance_id(&self) -> InstanceId {
        self.id
    }
}

impl<P> PartialEq for Tagged<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Tagged<P> {}

impl<P> Hash for Tagged<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
