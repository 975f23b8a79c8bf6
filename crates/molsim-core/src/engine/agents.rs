use super::error::IndexError;
use super::events::{IndexSpace, LifecycleEvent, LifecycleListener, ListenerId};
use crate::core::models::entity::EntityRecord;
use crate::core::models::ids::EntityId;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Creates and disposes of the per-entity values held by an [`AgentTable`].
pub trait AgentFactory<A>: 'static {
    fn create(&mut self, entity: &EntityRecord) -> A;

    /// Called when the entity leaves the table; the default just drops the agent.
    fn release(&mut self, agent: A, entity: &EntityRecord) {
        let _ = (agent, entity);
    }
}

/// Factory backed by a creation closure; agents are dropped on release.
pub struct FnFactory<C>(C);

impl<A, C> AgentFactory<A> for FnFactory<C>
where
    C: FnMut(&EntityRecord) -> A + 'static,
{
    fn create(&mut self, entity: &EntityRecord) -> A {
        (self.0)(entity)
    }
}

impl<C> fmt::Debug for FnFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFactory")
    }
}

pub fn from_fn<A, C>(create: C) -> FnFactory<C>
where
    C: FnMut(&EntityRecord) -> A + 'static,
{
    FnFactory(create)
}

/// Which entities a table holds agents for, and which index keys them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentScope {
    /// Every entity, keyed by global index.
    All,
    /// Group entities only, keyed by global index.
    Groups,
    /// Leaf entities only, keyed by leaf index.
    Leaves,
}

impl AgentScope {
    pub fn index_space(self) -> IndexSpace {
        match self {
            AgentScope::All | AgentScope::Groups => IndexSpace::Global,
            AgentScope::Leaves => IndexSpace::Leaf,
        }
    }

    pub fn covers(self, entity: &EntityRecord) -> bool {
        match self {
            AgentScope::All => true,
            AgentScope::Groups => !entity.is_leaf(),
            AgentScope::Leaves => entity.is_leaf(),
        }
    }

    /// Key of `entity` in a table of this scope, or `None` if out of scope.
    pub fn key_of(self, entity: &EntityRecord) -> Option<usize> {
        if !self.covers(entity) {
            return None;
        }
        match self.index_space() {
            IndexSpace::Global => Some(entity.global_index),
            IndexSpace::Leaf => entity.leaf_index,
        }
    }
}

#[derive(Debug)]
struct Slot<A> {
    record: EntityRecord, // Owner as of its last add or move
    agent: A,
}

/// Dense side table of one agent per in-scope entity.
///
/// Kept in step with the tree by lifecycle events: agents are created on add,
/// released on removal and moved whenever their key is renumbered. Spare
/// capacity of `reservoir_capacity` slots is kept past the index bound so that
/// ordinary churn does not reallocate.
#[derive(Debug)]
pub struct AgentTable<A, F> {
    scope: AgentScope,
    factory: F,
    slots: Vec<Option<Slot<A>>>,
    reservoir_capacity: usize,
    agent_count: usize,
}

impl<A: 'static, F: AgentFactory<A>> AgentTable<A, F> {
    pub fn new(scope: AgentScope, factory: F, reservoir_capacity: usize) -> Self {
        Self {
            scope,
            factory,
            slots: Vec::new(),
            reservoir_capacity,
            agent_count: 0,
        }
    }

    pub fn scope(&self) -> AgentScope {
        self.scope
    }

    /// Number of slots, occupied or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_count == 0
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    pub fn get(&self, key: usize) -> Result<&A, IndexError> {
        self.slot(key).map(|slot| &slot.agent)
    }

    pub fn get_mut(&mut self, key: usize) -> Result<&mut A, IndexError> {
        let len = self.slots.len();
        match self.slots.get_mut(key) {
            None => Err(IndexError::IndexOutOfBounds { index: key, len }),
            Some(None) => Err(IndexError::NoAgent(key)),
            Some(Some(slot)) => Ok(&mut slot.agent),
        }
    }

    /// Replaces the agent at `key`, returning the previous one.
    ///
    /// The replaced agent is not passed to the factory.
    pub fn set(&mut self, key: usize, agent: A) -> Result<A, IndexError> {
        self.get_mut(key)
            .map(|current| std::mem::replace(current, agent))
    }

    /// Entity owning the agent at `key`.
    pub fn entity_at(&self, key: usize) -> Option<EntityId> {
        self.slot(key).ok().map(|slot| slot.record.id)
    }

    /// Occupied slots as `(key, entity, agent)`, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, EntityId, &A)> + '_ {
        self.slots.iter().enumerate().filter_map(|(key, slot)| {
            slot.as_ref().map(|slot| (key, slot.record.id, &slot.agent))
        })
    }

    pub(crate) fn into_parts(self) -> (F, Vec<(EntityId, A)>) {
        let agents = self
            .slots
            .into_iter()
            .flatten()
            .map(|slot| (slot.record.id, slot.agent))
            .collect();
        (self.factory, agents)
    }

    /// Sizes the table for an index space of `bound` entries.
    ///
    /// Grows eagerly; shrinks only when more than twice the target, and never
    /// below the last occupied slot.
    pub(crate) fn resize_for_bound(&mut self, bound: usize) {
        let target = bound + self.reservoir_capacity;
        let len = self.slots.len();
        if len < target {
            self.slots.resize_with(target, || None);
        } else if len > target.saturating_mul(2) {
            let occupied = self
                .slots
                .iter()
                .rposition(Option::is_some)
                .map_or(0, |last| last + 1);
            let new_len = target.max(occupied);
            self.slots.truncate(new_len);
            self.slots.shrink_to_fit();
            debug!(from = len, to = new_len, scope = ?self.scope, "Shrank agent table");
        }
    }

    pub(crate) fn insert(&mut self, entity: &EntityRecord) {
        let Some(key) = self.scope.key_of(entity) else {
            return;
        };
        self.ensure_slot(key);
        let agent = self.factory.create(entity);
        let previous = self.slots[key].replace(Slot {
            record: *entity,
            agent,
        });
        match previous {
            Some(stale) => self.release_stale(key, stale),
            None => self.agent_count += 1,
        }
    }

    fn remove(&mut self, entity: &EntityRecord) {
        let Some(key) = self.scope.key_of(entity) else {
            return;
        };
        if let Some(slot) = self.slots.get_mut(key).and_then(Option::take) {
            self.agent_count -= 1;
            self.factory.release(slot.agent, entity);
        }
    }

    fn relocate(&mut self, entity: &EntityRecord, old_key: usize) {
        let Some(new_key) = self.scope.key_of(entity) else {
            return;
        };
        let Some(mut slot) = self.slots.get_mut(old_key).and_then(Option::take) else {
            return;
        };
        slot.record = *entity;
        self.ensure_slot(new_key);
        if let Some(stale) = self.slots[new_key].replace(slot) {
            self.agent_count -= 1;
            self.release_stale(new_key, stale);
        }
    }

    /// Releases an agent evicted from an occupied slot, under its own owner's record.
    fn release_stale(&mut self, key: usize, stale: Slot<A>) {
        warn!(key, entity = ?stale.record.id, scope = ?self.scope, "Agent slot was still occupied");
        self.factory.release(stale.agent, &stale.record);
    }

    fn ensure_slot(&mut self, key: usize) {
        if key >= self.slots.len() {
            self.slots.resize_with(key + 1 + self.reservoir_capacity, || None);
        }
    }

    fn slot(&self, key: usize) -> Result<&Slot<A>, IndexError> {
        match self.slots.get(key) {
            None => Err(IndexError::IndexOutOfBounds {
                index: key,
                len: self.slots.len(),
            }),
            Some(None) => Err(IndexError::NoAgent(key)),
            Some(Some(slot)) => Ok(slot),
        }
    }
}

impl<A: 'static, F: AgentFactory<A>> LifecycleListener for AgentTable<A, F> {
    fn on_event(&mut self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::EntityAdded(entity) => self.insert(entity),
            LifecycleEvent::EntityRemoved(entity) => self.remove(entity),
            LifecycleEvent::IndexChanged {
                entity,
                old_index,
                space,
            } => {
                if *space == self.scope.index_space() {
                    self.relocate(entity, *old_index);
                }
            }
            LifecycleEvent::BoundChanged { space, bound } => {
                if *space == self.scope.index_space() {
                    self.resize_for_bound(*bound);
                }
            }
        }
    }
}

/// Typed handle to an agent table registered with an entity system.
pub struct AgentTableId<A, F> {
    pub(crate) listener: ListenerId,
    _marker: PhantomData<fn() -> (A, F)>,
}

impl<A, F> AgentTableId<A, F> {
    pub(crate) fn new(listener: ListenerId) -> Self {
        Self {
            listener,
            _marker: PhantomData,
        }
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }
}

impl<A, F> Clone for AgentTableId<A, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, F> Copy for AgentTableId<A, F> {}

impl<A, F> PartialEq for AgentTableId<A, F> {
    fn eq(&self, other: &Self) -> bool {
        self.listener == other.listener
    }
}

impl<A, F> Eq for AgentTableId<A, F> {}

impl<A, F> fmt::Debug for AgentTableId<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AgentTableId").field(&self.listener).finish()
    }
}
