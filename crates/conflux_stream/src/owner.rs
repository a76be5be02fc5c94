//! # Owner Tree
//!
//! Arena of task owners, each with its own cancellation pipeline. Nodes
//! refer to their parent by index; a child is always added after its
//! parent, so every ancestor has a smaller index than its descendants.
//!
//! ```text
//!   [0] root ─┬─ [1] squad ─── [3] unit
//!             └─ [2] squad
//! ```
//!
//! Hardening runs from the highest index down, so requests forwarded by
//! `[3]` reach `[1]` and `[0]` before those owners harden in the same cycle.

use conflux_core::{ConfluxError, ConfluxResult, Fence, JobPool, OwnerId};

use crate::cancel::{CancelRequestDataStream, CancellationPipeline};

/// Index of a node in an [`OwnerTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerIndex(pub(crate) u32);

impl OwnerIndex {
    /// Raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// One owner and its cancellation pipeline.
#[derive(Debug)]
pub struct OwnerNode {
    id: OwnerId,
    parent: Option<OwnerIndex>,
    pipeline: CancellationPipeline,
}

impl OwnerNode {
    /// Owner identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Parent node, if any.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<OwnerIndex> {
        self.parent
    }

    /// This owner's cancellation pipeline.
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &CancellationPipeline {
        &self.pipeline
    }

    /// This owner's cancellation pipeline, mutably.
    #[inline]
    pub fn pipeline_mut(&mut self) -> &mut CancellationPipeline {
        &mut self.pipeline
    }
}

/// Arena of owners linked by parent index.
#[derive(Debug)]
pub struct OwnerTree {
    nodes: Vec<OwnerNode>,
    lane_count: usize,
}

impl OwnerTree {
    /// Creates an empty tree whose pipelines get `lane_count` request lanes.
    #[must_use]
    pub fn new(lane_count: usize) -> Self {
        Self {
            nodes: Vec::new(),
            lane_count,
        }
    }

    /// Number of owners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no owners.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, id: OwnerId, parent: Option<OwnerIndex>) -> OwnerIndex {
        let index = OwnerIndex(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(OwnerNode {
            id,
            parent,
            pipeline: CancellationPipeline::new(&format!("owner{}", id.0), self.lane_count),
        });
        index
    }

    /// Adds an owner with no parent.
    pub fn add_root(&mut self, id: OwnerId) -> OwnerIndex {
        self.push(id, None)
    }

    /// Adds an owner under `parent`.
    pub fn add_child(&mut self, parent: OwnerIndex, id: OwnerId) -> ConfluxResult<OwnerIndex> {
        self.check(parent)?;
        Ok(self.push(id, Some(parent)))
    }

    /// Fails with [`ConfluxError::UnknownOwner`] if `index` is not in the tree.
    pub fn check(&self, index: OwnerIndex) -> ConfluxResult<()> {
        if index.slot() < self.nodes.len() {
            Ok(())
        } else {
            Err(ConfluxError::UnknownOwner(index.0))
        }
    }

    /// Node at `index`.
    #[must_use]
    pub fn get(&self, index: OwnerIndex) -> Option<&OwnerNode> {
        self.nodes.get(index.slot())
    }

    /// Node at `index`, mutably.
    pub fn get_mut(&mut self, index: OwnerIndex) -> Option<&mut OwnerNode> {
        self.nodes.get_mut(index.slot())
    }

    /// Pipeline of the owner at `index`.
    pub fn pipeline_mut(&mut self, index: OwnerIndex) -> Option<&mut CancellationPipeline> {
        self.get_mut(index).map(OwnerNode::pipeline_mut)
    }

    /// First node with owner identity `id`.
    #[must_use]
    pub fn find(&self, id: OwnerId) -> Option<OwnerIndex> {
        self.nodes
            .iter()
            .position(|node| node.id == id)
            .and_then(|slot| u32::try_from(slot).ok())
            .map(OwnerIndex)
    }

    /// Ancestors of `index`, nearest first.
    #[must_use]
    pub fn ancestors(&self, index: OwnerIndex) -> Vec<OwnerIndex> {
        let mut chain = Vec::new();
        let mut cursor = self.get(index).and_then(OwnerNode::parent);
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.get(parent).and_then(OwnerNode::parent);
        }
        chain
    }

    /// Iterates `(index, node)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (OwnerIndex, &OwnerNode)> {
        (0u32..).map(OwnerIndex).zip(self.nodes.iter())
    }

    /// Hardens every owner's requests, children first, forwarding local
    /// requests to every ancestor. Returns the combined fence.
    pub fn harden_all(&mut self, pool: &JobPool) -> Fence {
        let mut fences = Vec::with_capacity(self.nodes.len());
        for slot in (0..self.nodes.len()).rev() {
            let ancestors: Vec<usize> = self
                .ancestors(OwnerIndex(u32::try_from(slot).unwrap_or(u32::MAX)))
                .into_iter()
                .map(OwnerIndex::slot)
                .collect();

            let (before, rest) = self.nodes.split_at_mut(slot);
            let mut targets: Vec<&mut CancelRequestDataStream> = before
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| ancestors.contains(i))
                .map(|(_, node)| node.pipeline.requests_mut())
                .collect();

            fences.push(rest[0].pipeline.harden_requests(pool, &mut targets));
        }
        Fence::combine_all(&fences)
    }

    /// Advances every owner's progress and complete stages.
    pub fn advance_all(&mut self, pool: &JobPool) -> Fence {
        let fences: Vec<Fence> = self
            .nodes
            .iter_mut()
            .map(|node| node.pipeline.advance(pool))
            .collect();
        Fence::combine_all(&fences)
    }

    /// Cancellations completed across every owner.
    #[must_use]
    pub fn completed_total(&self) -> u64 {
        self.nodes
            .iter()
            .map(|node| node.pipeline.completed_total())
            .sum()
    }

    /// Disposes every pipeline, leaves first.
    pub fn dispose_all(&mut self) {
        for node in self.nodes.iter_mut().rev() {
            node.pipeline.dispose();
        }
    }
}
