use super::agents::{AgentFactory, AgentScope, AgentTable, AgentTableId};
use super::allocator::{Compaction, IndexAllocator};
use super::config::IndexingConfig;
use super::error::IndexError;
use super::events::{EventBus, IndexSpace, LifecycleEvent, LifecycleListener, ListenerId};
use crate::core::address::{Address, AddressCodec};
use crate::core::models::entity::{EntityKind, EntityNode, EntityRecord, NodeState};
use crate::core::models::ids::EntityId;
use crate::core::models::tree::EntityTree;
use tracing::{debug, info};

/// Owns the entity tree, the global index allocator and the listeners that
/// observe them.
///
/// Every mutation goes through `&mut self`, and all events it causes have been
/// delivered when the call returns.
#[derive(Debug)]
pub struct EntitySystem {
    config: IndexingConfig,
    tree: EntityTree,
    allocator: IndexAllocator,
    bus: EventBus,
}

impl EntitySystem {
    pub fn new(config: &IndexingConfig) -> Result<Self, IndexError> {
        let tree = EntityTree::new(config.codec()?)?;
        Ok(Self {
            config: config.clone(),
            tree,
            allocator: IndexAllocator::new(config.reservoir_capacity),
            bus: EventBus::new(),
        })
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    pub fn codec(&self) -> &AddressCodec {
        self.tree.codec()
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn allocator(&self) -> &IndexAllocator {
        &self.allocator
    }

    pub fn root(&self) -> EntityId {
        self.tree.root()
    }

    pub fn node(&self, id: EntityId) -> Option<&EntityNode> {
        self.tree.node(id)
    }

    pub fn is_attached(&self, id: EntityId) -> bool {
        self.tree
            .node(id)
            .is_some_and(|node| node.state() == NodeState::Attached)
    }

    /// Number of attached entities, excluding the root.
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    // --- Structure ---

    /// Creates an unattached entity; it gets its indices when attached.
    pub fn create(&mut self, kind: EntityKind) -> EntityId {
        self.tree.create(kind)
    }

    /// Attaches `child` as the last child of `parent`, issues its global index and
    /// announces it with [`LifecycleEvent::EntityAdded`].
    pub fn attach_child(&mut self, parent: EntityId, child: EntityId) -> Result<(), IndexError> {
        self.tree.attach(parent, child)?;
        let index = self.allocator.allocate(child);
        self.tree.set_global_index(child, Some(index))?;
        let record = self.tree.record(child)?;
        self.bus.fire(&LifecycleEvent::EntityAdded(record));
        Ok(())
    }

    /// Creates a leaf and attaches it under `parent`.
    pub fn add_leaf(&mut self, parent: EntityId) -> Result<EntityId, IndexError> {
        self.add(parent, EntityKind::Leaf)
    }

    /// Creates an empty group and attaches it under `parent`.
    pub fn add_group(&mut self, parent: EntityId) -> Result<EntityId, IndexError> {
        self.add(parent, EntityKind::Group)
    }

    /// Removes `child` and its whole subtree.
    ///
    /// The last sibling takes over `child`'s ordinal. Each removed entity is
    /// announced while it still holds its indices, children before parents; the
    /// leaf and global indices it frees are then reclaimed, which may move other
    /// entities and trigger a compaction. A single leaf-space
    /// [`LifecycleEvent::BoundChanged`] closes the removal when leaves were lost.
    pub fn detach_child(&mut self, parent: EntityId, child: EntityId) -> Result<(), IndexError> {
        let removed_leaves = self
            .tree
            .node(child)
            .ok_or(IndexError::EntityNotFound(child))?
            .leaf_count();
        self.tree.detach(parent, child)?;

        for id in self.tree.post_order(child)? {
            self.retire(id)?;
        }

        if removed_leaves > 0 {
            self.bus.fire(&LifecycleEvent::BoundChanged {
                space: IndexSpace::Leaf,
                bound: self.tree.leaf_count(),
            });
        }
        Ok(())
    }

    /// Compacts the global index space now, whatever the reservoir fill.
    pub fn compact(&mut self) -> Result<Compaction, IndexError> {
        let compaction = self.allocator.compact()?;
        self.apply_compaction(&compaction)?;
        Ok(compaction)
    }

    /// Announces that `additional` entities are about to be added to `space`, so
    /// that listeners can size their storage once. Returns the anticipated bound.
    pub fn preallocate(&mut self, space: IndexSpace, additional: usize) -> usize {
        let bound = match space {
            IndexSpace::Global => self.allocator.preallocate(additional),
            IndexSpace::Leaf => self.tree.leaf_count() + additional,
        };
        debug!(?space, additional, bound, "Preallocating index space");
        self.bus
            .fire(&LifecycleEvent::BoundChanged { space, bound });
        bound
    }

    // --- Queries ---

    pub fn global_index(&self, id: EntityId) -> Result<usize, IndexError> {
        self.node_ref(id)?
            .global_index()
            .ok_or(IndexError::Unindexed(id))
    }

    pub fn leaf_index(&self, id: EntityId) -> Result<usize, IndexError> {
        let node = self.node_ref(id)?;
        if !node.is_leaf() {
            return Err(IndexError::NotALeaf(id));
        }
        node.leaf_index().ok_or(IndexError::Unindexed(id))
    }

    pub fn address(&self, id: EntityId) -> Result<Address, IndexError> {
        self.tree.address(id)
    }

    /// Whether `a` and `b` share their ancestor at `depth`.
    pub fn same_ancestry(&self, a: EntityId, b: EntityId, depth: usize) -> Result<bool, IndexError> {
        Ok(self
            .codec()
            .same_ancestry(self.tree.address(a)?, self.tree.address(b)?, depth))
    }

    pub fn record(&self, id: EntityId) -> Result<EntityRecord, IndexError> {
        self.tree.record(id)
    }

    pub fn entity_at_global_index(&self, index: usize) -> Option<EntityId> {
        self.allocator.owner(index)
    }

    pub fn leaf_at(&self, leaf_index: usize) -> Option<EntityId> {
        self.tree.leaf_at(leaf_index)
    }

    pub fn children(&self, id: EntityId) -> Result<&[EntityId], IndexError> {
        self.tree.children(id)
    }

    pub fn child_count(&self, id: EntityId) -> Result<usize, IndexError> {
        Ok(self.node_ref(id)?.child_count())
    }

    // --- Listeners ---

    pub fn subscribe<L: LifecycleListener>(&mut self, listener: L) -> ListenerId {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_fn<G>(&mut self, callback: G) -> ListenerId
    where
        G: FnMut(&LifecycleEvent) + 'static,
    {
        self.bus.subscribe_fn(callback)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.bus.unsubscribe(id)
    }

    // --- Agent tables ---

    /// Registers an agent table and fills it with agents for every attached
    /// in-scope entity before returning.
    pub fn add_agent_table<A: 'static, F: AgentFactory<A>>(
        &mut self,
        scope: AgentScope,
        factory: F,
    ) -> Result<AgentTableId<A, F>, IndexError> {
        let mut table = AgentTable::new(scope, factory, self.config.reservoir_capacity);
        table.resize_for_bound(self.bound_of(scope.index_space()));
        for id in self.tree.attached_entities()? {
            table.insert(&self.tree.record(id)?);
        }

        let agents = table.agent_count();
        let listener = self.bus.subscribe(table);
        info!(?scope, agents, "Registered agent table");
        Ok(AgentTableId::new(listener))
    }

    pub fn agent_table<A: 'static, F: AgentFactory<A>>(
        &self,
        id: AgentTableId<A, F>,
    ) -> Result<&AgentTable<A, F>, IndexError> {
        self.bus
            .get::<AgentTable<A, F>>(id.listener)
            .ok_or(IndexError::AgentTableNotFound)
    }

    pub fn agent_table_mut<A: 'static, F: AgentFactory<A>>(
        &mut self,
        id: AgentTableId<A, F>,
    ) -> Result<&mut AgentTable<A, F>, IndexError> {
        self.bus
            .get_mut::<AgentTable<A, F>>(id.listener)
            .ok_or(IndexError::AgentTableNotFound)
    }

    /// Agent held for `entity` by the given table.
    pub fn agent<A: 'static, F: AgentFactory<A>>(
        &self,
        id: AgentTableId<A, F>,
        entity: EntityId,
    ) -> Result<&A, IndexError> {
        let table = self.agent_table(id)?;
        let key = self.agent_key(table.scope(), entity)?;
        table.get(key)
    }

    /// Replaces the agent held for `entity`, returning the previous one.
    pub fn set_agent<A: 'static, F: AgentFactory<A>>(
        &mut self,
        id: AgentTableId<A, F>,
        entity: EntityId,
        agent: A,
    ) -> Result<A, IndexError> {
        let scope = self.agent_table(id)?.scope();
        let key = self.agent_key(scope, entity)?;
        self.agent_table_mut(id)?.set(key, agent)
    }

    /// Unregisters the table, releasing every agent through its factory, and
    /// returns the factory.
    pub fn remove_agent_table<A: 'static, F: AgentFactory<A>>(
        &mut self,
        id: AgentTableId<A, F>,
    ) -> Result<F, IndexError> {
        let table = self
            .bus
            .take::<AgentTable<A, F>>(id.listener)
            .ok_or(IndexError::AgentTableNotFound)?;
        let scope = table.scope();
        let (mut factory, agents) = table.into_parts();
        let released = agents.len();
        for (entity, agent) in agents {
            let record = self.tree.record(entity)?;
            factory.release(agent, &record);
        }
        info!(?scope, released, "Removed agent table");
        Ok(factory)
    }

    fn add(&mut self, parent: EntityId, kind: EntityKind) -> Result<EntityId, IndexError> {
        let id = self.tree.create(kind);
        if let Err(err) = self.attach_child(parent, id) {
            self.tree.remove(id)?;
            return Err(err);
        }
        Ok(id)
    }

    /// Tears down one node of a detached subtree.
    fn retire(&mut self, id: EntityId) -> Result<(), IndexError> {
        let record = self.tree.record(id)?;
        self.bus.fire(&LifecycleEvent::EntityRemoved(record));

        if let Some(moved) = self.tree.release_leaf_index(id)? {
            let entity = self.tree.record(moved.entity)?;
            self.bus.fire(&LifecycleEvent::IndexChanged {
                entity,
                old_index: moved.old_index,
                space: IndexSpace::Leaf,
            });
        }

        self.tree.remove(id)?;
        if let Some(compaction) = self.allocator.free(record.global_index)? {
            self.apply_compaction(&compaction)?;
        }
        Ok(())
    }

    fn apply_compaction(&mut self, compaction: &Compaction) -> Result<(), IndexError> {
        for renumbering in &compaction.renumbered {
            self.tree
                .set_global_index(renumbering.entity, Some(renumbering.new_index))?;
        }
        for renumbering in &compaction.renumbered {
            let entity = self.tree.record(renumbering.entity)?;
            self.bus.fire(&LifecycleEvent::IndexChanged {
                entity,
                old_index: renumbering.old_index,
                space: IndexSpace::Global,
            });
        }
        self.bus.fire(&LifecycleEvent::BoundChanged {
            space: IndexSpace::Global,
            bound: compaction.bound,
        });
        Ok(())
    }

    fn bound_of(&self, space: IndexSpace) -> usize {
        match space {
            IndexSpace::Global => self.allocator.bound(),
            IndexSpace::Leaf => self.tree.leaf_count(),
        }
    }

    fn agent_key(&self, scope: AgentScope, entity: EntityId) -> Result<usize, IndexError> {
        let record = self.tree.record(entity)?;
        scope
            .key_of(&record)
            .ok_or(IndexError::OutOfScope(entity))
    }

    fn node_ref(&self, id: EntityId) -> Result<&EntityNode, IndexError> {
        self.tree.node(id).ok_or(IndexError::EntityNotFound(id))
    }
}
