//! # Stream Registry
//!
//! Owns every stream and shared value of a pipeline, plus the worker pool
//! and the owner tree. Callers register each stream at startup and keep the
//! typed key; there is no global state and no discovery at runtime.
//!
//! ```rust,ignore
//! let mut registry = StreamRegistry::new(PipelineConfig::default())?;
//! let root = registry.owners_mut().add_root(OwnerId(0));
//! let hits = registry.register_cancellable_stream::<Tagged<u32>>("hits", root, CancelBehaviour::Default)?;
//!
//! registry.get_mut(&hits).unwrap().append_now(0, item);
//! registry.consolidate_all().wait();
//! ```
//!
//! Teardown runs in reverse registration order, then the owner tree, then
//! the pool.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use conflux_core::{
    AccessControlledValue, CancelBehaviour, ConfluxError, ConfluxResult, Dispose, Fence,
    Identified, JobPool, PipelineConfig,
};

use crate::cancellable::CancellableDataStream;
use crate::owner::{OwnerIndex, OwnerTree};
use crate::stream::DataStream;

/// Typed handle to a registered value.
pub struct RegistryKey<V> {
    index: usize,
    _marker: PhantomData<fn() -> V>,
}

impl<V> RegistryKey<V> {
    /// Registration slot.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<V> Clone for RegistryKey<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RegistryKey<V> {}

impl<V> std::fmt::Debug for RegistryKey<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegistryKey").field(&self.index).finish()
    }
}

/// Something the registry can consolidate and tear down.
trait Registered: Send {
    fn consolidate(&mut self, pool: &JobPool, owners: &mut OwnerTree) -> Option<Fence>;
    fn consolidated_items(&self) -> u64;
    fn dispose(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> Registered for DataStream<T> {
    fn consolidate(&mut self, pool: &JobPool, _owners: &mut OwnerTree) -> Option<Fence> {
        Some(DataStream::consolidate(self, pool))
    }

    fn consolidated_items(&self) -> u64 {
        self.stats().consolidated
    }

    fn dispose(&mut self) {
        DataStream::dispose(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A cancellable stream bound to the owner whose requests filter it.
struct OwnedStream<T> {
    stream: CancellableDataStream<T>,
    owner: OwnerIndex,
}

impl<T: Identified + Send + Sync + 'static> Registered for OwnedStream<T> {
    fn consolidate(&mut self, pool: &JobPool, owners: &mut OwnerTree) -> Option<Fence> {
        let pipeline = owners.pipeline_mut(self.owner)?;
        Some(self.stream.consolidate(pool, pipeline.requests_mut()))
    }

    fn consolidated_items(&self) -> u64 {
        self.stream.stats().consolidated
    }

    fn dispose(&mut self) {
        self.stream.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        &self.stream
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.stream
    }
}

impl<V: Dispose + Send + Sync + 'static> Registered for AccessControlledValue<V> {
    fn consolidate(&mut self, _pool: &JobPool, _owners: &mut OwnerTree) -> Option<Fence> {
        None
    }

    fn consolidated_items(&self) -> u64 {
        0
    }

    fn dispose(&mut self) {
        AccessControlledValue::dispose(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Entry {
    name: String,
    value: Box<dyn Registered>,
}

/// Explicit owner of a pipeline's streams, values, owners and workers.
pub struct StreamRegistry {
    config: PipelineConfig,
    pool: Arc<JobPool>,
    owners: OwnerTree,
    entries: Vec<Entry>,
    disposed: bool,
}

impl StreamRegistry {
    /// Validates `config` and starts the worker pool.
    pub fn new(config: PipelineConfig) -> ConfluxResult<Self> {
        config.validate()?;
        let pool = Arc::new(JobPool::try_new(config.worker_count)?);
        let owners = OwnerTree::new(config.lane_count);
        Ok(Self {
            config,
            pool,
            owners,
            entries: Vec::new(),
            disposed: false,
        })
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The worker pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<JobPool> {
        &self.pool
    }

    /// The owner tree.
    #[inline]
    #[must_use]
    pub fn owners(&self) -> &OwnerTree {
        &self.owners
    }

    /// The owner tree, mutably.
    #[inline]
    pub fn owners_mut(&mut self) -> &mut OwnerTree {
        &mut self.owners
    }

    /// Number of registered values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `name` is taken.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    fn insert<V>(&mut self, name: &str, value: Box<dyn Registered>) -> ConfluxResult<RegistryKey<V>> {
        if self.contains(name) {
            return Err(ConfluxError::DuplicateRegistration {
                name: name.to_owned(),
            });
        }
        self.entries.push(Entry {
            name: name.to_owned(),
            value,
        });
        tracing::debug!(name, slot = self.entries.len() - 1, "registered");
        Ok(RegistryKey {
            index: self.entries.len() - 1,
            _marker: PhantomData,
        })
    }

    /// Registers a plain stream with the configured lane count.
    pub fn register_stream<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
    ) -> ConfluxResult<RegistryKey<DataStream<T>>> {
        let stream = DataStream::<T>::new(name, self.config.lane_count);
        self.insert(name, Box::new(stream))
    }

    /// Registers a stream filtered by `owner`'s cancellation requests.
    pub fn register_cancellable_stream<T: Identified + Send + Sync + 'static>(
        &mut self,
        name: &str,
        owner: OwnerIndex,
        behaviour: CancelBehaviour,
    ) -> ConfluxResult<RegistryKey<CancellableDataStream<T>>> {
        self.owners.check(owner)?;
        let stream = CancellableDataStream::<T>::new(name, self.config.lane_count, behaviour);
        self.insert(name, Box::new(OwnedStream { stream, owner }))
    }

    /// Registers a shared value.
    pub fn register_value<V: Dispose + Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: V,
    ) -> ConfluxResult<RegistryKey<AccessControlledValue<V>>> {
        self.insert(name, Box::new(AccessControlledValue::new(value)))
    }

    /// The value behind `key`.
    #[must_use]
    pub fn get<V: 'static>(&self, key: &RegistryKey<V>) -> Option<&V> {
        self.entries
            .get(key.index)
            .and_then(|entry| entry.value.as_any().downcast_ref())
    }

    /// The value behind `key`, mutably.
    pub fn get_mut<V: 'static>(&mut self, key: &RegistryKey<V>) -> Option<&mut V> {
        self.entries
            .get_mut(key.index)
            .and_then(|entry| entry.value.as_any_mut().downcast_mut())
    }

    /// Hardens cancellation requests for every owner.
    pub fn harden_cancellations(&mut self) -> Fence {
        self.owners.harden_all(&self.pool)
    }

    /// Schedules a consolidation of every registered stream.
    pub fn consolidate_all(&mut self) -> Fence {
        let pool = &self.pool;
        let owners = &mut self.owners;
        let fences: Vec<Fence> = self
            .entries
            .iter_mut()
            .filter_map(|entry| entry.value.consolidate(pool, owners))
            .collect();
        Fence::combine_all(&fences)
    }

    /// Ages every owner's progress and publishes completed cancellations.
    pub fn advance_cancellations(&mut self) -> Fence {
        self.owners.advance_all(&self.pool)
    }

    /// Items consolidated across every stream so far.
    #[must_use]
    pub fn items_consolidated(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.value.consolidated_items())
            .sum()
    }

    /// Cancellations completed across every owner so far.
    #[must_use]
    pub fn cancellations_completed(&self) -> u64 {
        self.owners.completed_total()
    }

    /// Disposes everything in reverse registration order, then the owner
    /// tree. Runs once.
    pub fn dispose_all(&mut self) {
        if self.disposed {
            return;
        }
        for entry in self.entries.iter_mut().rev() {
            entry.value.dispose();
        }
        self.owners.dispose_all();
        self.disposed = true;
        tracing::info!(
            entries = self.entries.len(),
            owners = self.owners.len(),
            "registry disposed"
        );
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("entries", &self.entries.iter().map(|e| &e.name).collect::<Vec<_>>())
            .field("owners", &self.owners.len())
            .field("pool", &self.pool)
            .finish()
    }
}
