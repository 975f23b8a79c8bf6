use super::entity::{EntityKind, EntityNode, EntityRecord, NodeBody, NodeState};
use super::ids::EntityId;
use crate::core::address::{Address, AddressCodec};
use crate::engine::error::IndexError;
use slotmap::SlotMap;
use tracing::trace;

/// A leaf whose leaf index changed because another leaf was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafMove {
    pub entity: EntityId,
    pub old_index: usize,
    pub new_index: usize,
}

/// Arena-backed entity tree.
///
/// Maintains sibling ordinals (always contiguous over `1..=child_count`), each
/// node's own address fragment, per-group leaf totals and the dense leaf list
/// that backs leaf indices. Global indices are stored here but issued by the
/// allocator.
#[derive(Debug, Clone)]
pub struct EntityTree {
    /// Primary storage for nodes; removed subtrees are deleted from the arena.
    nodes: SlotMap<EntityId, EntityNode>,
    /// Root group, depth 0, ordinal 1.
    root: EntityId,
    /// Leaves ordered by leaf index.
    leaves: Vec<EntityId>,
    codec: AddressCodec,
}

impl EntityTree {
    /// Creates a tree containing only the root group.
    pub fn new(codec: AddressCodec) -> Result<Self, IndexError> {
        let mut nodes = SlotMap::with_key();
        let mut root_node = EntityNode::new(EntityKind::Group);
        root_node.state = NodeState::Attached;
        root_node.ordinal = 1;
        root_node.local_bits = codec.encode(0, 1)?;
        let root = nodes.insert(root_node);

        Ok(Self {
            nodes,
            root,
            leaves: Vec::new(),
            codec,
        })
    }

    pub fn root(&self) -> EntityId {
        self.root
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    pub fn node(&self, id: EntityId) -> Option<&EntityNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes in the arena, including the root and unattached nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is attached below the root. Unattached nodes waiting in
    /// the arena do not count.
    pub fn is_empty(&self) -> bool {
        self.nodes
            .get(self.root)
            .is_none_or(|root| root.child_count() == 0)
    }

    /// Leaves in leaf-index order.
    pub fn leaves(&self) -> &[EntityId] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaf_at(&self, leaf_index: usize) -> Option<EntityId> {
        self.leaves.get(leaf_index).copied()
    }

    pub fn children(&self, id: EntityId) -> Result<&[EntityId], IndexError> {
        Ok(self.get(id)?.children())
    }

    /// Creates an unattached node. It joins the tree through [`EntityTree::attach`].
    pub fn create(&mut self, kind: EntityKind) -> EntityId {
        self.nodes.insert(EntityNode::new(kind))
    }

    /// Full address of an attached (or detached but not yet deleted) node.
    ///
    /// Computed by OR-ing each ancestor's own fragment, so renumbering a group
    /// never requires touching its descendants.
    pub fn address(&self, id: EntityId) -> Result<Address, IndexError> {
        let mut address = 0;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.get(current)?;
            if node.state == NodeState::Unattached {
                return Err(IndexError::ParentNotAttached(current));
            }
            address |= node.local_bits;
            cursor = node.parent;
        }
        Ok(address)
    }

    /// Builds the event snapshot for a node that holds a global index.
    pub fn record(&self, id: EntityId) -> Result<EntityRecord, IndexError> {
        let node = self.get(id)?;
        let global_index = node.global_index.ok_or(IndexError::Unindexed(id))?;
        Ok(EntityRecord {
            id,
            kind: node.kind(),
            parent: node.parent,
            depth: node.depth,
            ordinal: node.ordinal,
            address: self.address(id)?,
            global_index,
            leaf_index: node.leaf_index(),
        })
    }

    /// Appends `child` to `parent`'s children.
    ///
    /// The child's ordinal becomes `child_count + 1`. Leaves receive the next leaf
    /// index and every ancestor's leaf total grows by one. All checks, including
    /// the address encoding, run before anything is modified.
    ///
    /// # Errors
    ///
    /// * [`IndexError::AlreadyAttached`] - the child already has a parent.
    /// * [`IndexError::ParentNotAttached`] / [`IndexError::NotAGroup`] - the parent
    ///   cannot accept children.
    /// * [`IndexError::Address`] - the new ordinal or depth does not fit the codec.
    pub fn attach(&mut self, parent: EntityId, child: EntityId) -> Result<(), IndexError> {
        let child_node = self.get(child)?;
        if child_node.state != NodeState::Unattached || child == self.root {
            return Err(IndexError::AlreadyAttached(child));
        }
        let is_leaf = child_node.is_leaf();
        let kind = child_node.kind();

        let parent_node = self.get(parent)?;
        if parent_node.state != NodeState::Attached {
            return Err(IndexError::ParentNotAttached(parent));
        }
        let NodeBody::Group { children, .. } = &parent_node.body else {
            return Err(IndexError::NotAGroup(parent));
        };

        let depth = parent_node.depth + 1;
        let ordinal = u32::try_from(children.len() + 1).unwrap_or(u32::MAX);
        let local_bits = self.codec.encode(depth, ordinal)?;

        if let NodeBody::Group { children, .. } = &mut self.get_mut(parent)?.body {
            children.push(child);
        }

        let leaf_index = self.leaves.len();
        let node = self.get_mut(child)?;
        node.parent = Some(parent);
        node.state = NodeState::Attached;
        node.depth = depth;
        node.ordinal = ordinal;
        node.local_bits = local_bits;
        if let NodeBody::Leaf { leaf_index: slot } = &mut node.body {
            *slot = Some(leaf_index);
        }

        if is_leaf {
            self.leaves.push(child);
            self.adjust_leaf_counts(parent, 1, true);
        }

        trace!(?parent, ?child, %kind, depth, ordinal, "attached entity");
        Ok(())
    }

    /// Unlinks `child` from `parent` by swapping the last sibling into its slot.
    ///
    /// The moved sibling gets the vacated ordinal and a re-encoded fragment; its
    /// descendants are untouched because addresses are resolved through parents.
    /// The whole subtree is marked detached; the detached node keeps its stale
    /// parent link and ordinal so the subtree can still report addresses while it
    /// is torn down.
    ///
    /// Returns the sibling that was moved, if any.
    pub fn detach(
        &mut self,
        parent: EntityId,
        child: EntityId,
    ) -> Result<Option<EntityId>, IndexError> {
        let child_node = self.get(child)?;
        if child_node.state != NodeState::Attached || child_node.parent != Some(parent) {
            return Err(IndexError::NotAChild { parent, child });
        }
        let position = child_node.ordinal as usize - 1;
        let removed_leaves = child_node.leaf_count();
        let depth = child_node.depth;

        let children = match &mut self.get_mut(parent)?.body {
            NodeBody::Group { children, .. } => children,
            NodeBody::Leaf { .. } => return Err(IndexError::NotAGroup(parent)),
        };
        if children.get(position) != Some(&child) {
            return Err(IndexError::Internal(format!(
                "ordinal of {:?} does not match its position under {:?}",
                child, parent
            )));
        }
        children.swap_remove(position);
        let moved = children.get(position).copied();

        if let Some(moved_id) = moved {
            let ordinal = position as u32 + 1;
            let local_bits = self.codec.encode(depth, ordinal)?;
            let moved_node = self.get_mut(moved_id)?;
            moved_node.ordinal = ordinal;
            moved_node.local_bits = local_bits;
        }

        for id in self.pre_order(child)? {
            self.get_mut(id)?.state = NodeState::Detached;
        }
        if removed_leaves > 0 {
            self.adjust_leaf_counts(parent, removed_leaves, false);
        }

        trace!(?parent, ?child, ?moved, "detached entity");
        Ok(moved)
    }

    /// Gives up a leaf's index, filling the hole with the last leaf.
    ///
    /// Returns the move performed, or `None` if the leaf was already last (or the
    /// node is a group).
    pub fn release_leaf_index(&mut self, id: EntityId) -> Result<Option<LeafMove>, IndexError> {
        let Some(index) = self.get(id)?.leaf_index() else {
            return Ok(None);
        };
        if self.leaves.get(index) != Some(&id) {
            return Err(IndexError::Internal(format!(
                "leaf list slot {} does not hold {:?}",
                index, id
            )));
        }

        self.leaves.swap_remove(index);
        if let NodeBody::Leaf { leaf_index } = &mut self.get_mut(id)?.body {
            *leaf_index = None;
        }

        let Some(&moved) = self.leaves.get(index) else {
            return Ok(None);
        };
        if let NodeBody::Leaf { leaf_index } = &mut self.get_mut(moved)?.body {
            *leaf_index = Some(index);
        }
        Ok(Some(LeafMove {
            entity: moved,
            old_index: self.leaves.len(),
            new_index: index,
        }))
    }

    pub(crate) fn set_global_index(
        &mut self,
        id: EntityId,
        index: Option<usize>,
    ) -> Result<(), IndexError> {
        self.get_mut(id)?.global_index = index;
        Ok(())
    }

    /// Deletes a detached node from the arena. Its children must already be gone.
    pub(crate) fn remove(&mut self, id: EntityId) -> Result<EntityNode, IndexError> {
        let node = self.get(id)?;
        if node.state == NodeState::Attached || id == self.root {
            return Err(IndexError::Internal(format!(
                "attempted to delete attached entity {:?}",
                id
            )));
        }
        if node.leaf_index().is_some() {
            return Err(IndexError::Internal(format!(
                "attempted to delete {:?} while it still holds a leaf index",
                id
            )));
        }
        if let NodeBody::Group { children, .. } = &node.body {
            if children.iter().any(|&c| self.nodes.contains_key(c)) {
                return Err(IndexError::Internal(format!(
                    "attempted to delete {:?} before its children",
                    id
                )));
            }
        }
        self.nodes.remove(id).ok_or(IndexError::EntityNotFound(id))
    }

    /// Subtree rooted at `id` in pre-order (parents before children).
    pub fn pre_order(&self, id: EntityId) -> Result<Vec<EntityId>, IndexError> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.get(current)?;
            order.push(current);
            stack.extend(node.children().iter().rev());
        }
        Ok(order)
    }

    /// Subtree rooted at `id` in post-order (children before parents).
    pub fn post_order(&self, id: EntityId) -> Result<Vec<EntityId>, IndexError> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.get(current)?.children().iter());
        }
        order.reverse();
        Ok(order)
    }

    /// Every attached entity except the root, in pre-order.
    pub fn attached_entities(&self) -> Result<Vec<EntityId>, IndexError> {
        let mut order = self.pre_order(self.root)?;
        order.remove(0);
        Ok(order)
    }

    fn adjust_leaf_counts(&mut self, start: EntityId, amount: usize, grow: bool) {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(id) else {
                break;
            };
            if let NodeBody::Group { leaf_count, .. } = &mut node.body {
                if grow {
                    *leaf_count += amount;
                } else {
                    *leaf_count = leaf_count.saturating_sub(amount);
                }
            }
            cursor = node.parent;
        }
    }

    fn get(&self, id: EntityId) -> Result<&EntityNode, IndexError> {
        self.nodes.get(id).ok_or(IndexError::EntityNotFound(id))
    }

    fn get_mut(&mut self, id: EntityId) -> Result<&mut EntityNode, IndexError> {
        self.nodes.get_mut(id).ok_or(IndexError::EntityNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::AddressError;

    fn tree() -> EntityTree {
        EntityTree::new(AddressCodec::new(&[1, 7, 8, 16]).unwrap()).unwrap()
    }

    fn add(tree: &mut EntityTree, parent: EntityId, kind: EntityKind) -> EntityId {
        let id = tree.create(kind);
        tree.attach(parent, id).unwrap();
        id
    }

    fn assert_contiguous(tree: &EntityTree) {
        for id in tree.pre_order(tree.root()).unwrap() {
            for (position, &child) in tree.children(id).unwrap().iter().enumerate() {
                let node = tree.node(child).unwrap();
                assert_eq!(node.ordinal() as usize, position + 1);
                assert_eq!(node.parent(), Some(id));
            }
        }
        for (index, &leaf) in tree.leaves().iter().enumerate() {
            assert_eq!(tree.node(leaf).unwrap().leaf_index(), Some(index));
        }
    }

    mod attach {
        use super::*;

        #[test]
        fn root_is_attached_group_at_depth_zero() {
            let tree = tree();
            let root = tree.node(tree.root()).unwrap();
            assert_eq!(root.kind(), EntityKind::Group);
            assert_eq!(root.state(), NodeState::Attached);
            assert_eq!(root.depth(), 0);
            assert_eq!(root.ordinal(), 1);
            assert_eq!(tree.address(tree.root()).unwrap(), 0x8000_0000);
        }

        #[test]
        fn children_receive_sequential_ordinals_and_addresses() {
            let mut tree = tree();
            let root = tree.root();
            let species = add(&mut tree, root, EntityKind::Group);
            let a = add(&mut tree, species, EntityKind::Leaf);
            let b = add(&mut tree, species, EntityKind::Leaf);

            assert_eq!(tree.node(a).unwrap().ordinal(), 1);
            assert_eq!(tree.node(b).unwrap().ordinal(), 2);
            assert_eq!(tree.node(b).unwrap().depth(), 2);
            assert_eq!(tree.address(species).unwrap(), 0x8100_0000);
            assert_eq!(tree.address(a).unwrap(), 0x8101_0000);
            assert_eq!(tree.address(b).unwrap(), 0x8102_0000);
        }

        #[test]
        fn leaves_get_dense_leaf_indices_and_counts_propagate() {
            let mut tree = tree();
            let root = tree.root();
            let species = add(&mut tree, root, EntityKind::Group);
            let molecule = add(&mut tree, species, EntityKind::Group);
            let a = add(&mut tree, molecule, EntityKind::Leaf);
            let b = add(&mut tree, molecule, EntityKind::Leaf);

            assert_eq!(tree.node(a).unwrap().leaf_index(), Some(0));
            assert_eq!(tree.node(b).unwrap().leaf_index(), Some(1));
            assert_eq!(tree.node(molecule).unwrap().leaf_count(), 2);
            assert_eq!(tree.node(species).unwrap().leaf_count(), 2);
            assert_eq!(tree.node(root).unwrap().leaf_count(), 2);
            assert_eq!(tree.leaves(), &[a, b]);
        }

        #[test]
        fn double_attach_is_rejected() {
            let mut tree = tree();
            let root = tree.root();
            let leaf = add(&mut tree, root, EntityKind::Leaf);
            assert_eq!(
                tree.attach(root, leaf).unwrap_err(),
                IndexError::AlreadyAttached(leaf)
            );
            assert_eq!(
                tree.attach(root, root).unwrap_err(),
                IndexError::AlreadyAttached(root)
            );
        }

        #[test]
        fn leaf_and_unattached_parents_are_rejected() {
            let mut tree = tree();
            let root = tree.root();
            let leaf = add(&mut tree, root, EntityKind::Leaf);
            let orphan = tree.create(EntityKind::Group);
            let child = tree.create(EntityKind::Leaf);

            assert_eq!(
                tree.attach(leaf, child).unwrap_err(),
                IndexError::NotAGroup(leaf)
            );
            assert_eq!(
                tree.attach(orphan, child).unwrap_err(),
                IndexError::ParentNotAttached(orphan)
            );
            assert_eq!(tree.node(child).unwrap().state(), NodeState::Unattached);
        }

        #[test]
        fn ordinal_overflow_leaves_tree_untouched() {
            let mut tree = EntityTree::new(AddressCodec::new(&[1, 2, 29]).unwrap()).unwrap();
            let root = tree.root();
            for _ in 0..3 {
                add(&mut tree, root, EntityKind::Leaf);
            }
            let extra = tree.create(EntityKind::Leaf);
            assert_eq!(
                tree.attach(root, extra).unwrap_err(),
                IndexError::Address {
                    source: AddressError::OrdinalOverflow {
                        depth: 1,
                        ordinal: 4,
                        bits: 2
                    }
                }
            );
            assert_eq!(tree.children(root).unwrap().len(), 3);
            assert_eq!(tree.leaf_count(), 3);
            assert_eq!(tree.node(extra).unwrap().state(), NodeState::Unattached);
        }

        #[test]
        fn attaching_past_deepest_level_fails() {
            let mut tree = EntityTree::new(AddressCodec::new(&[1, 31]).unwrap()).unwrap();
            let root = tree.root();
            let group = add(&mut tree, root, EntityKind::Group);
            let child = tree.create(EntityKind::Leaf);
            assert!(matches!(
                tree.attach(group, child),
                Err(IndexError::Address {
                    source: AddressError::DepthOutOfRange { depth: 2, .. }
                })
            ));
        }
    }

    mod detach {
        use super::*;

        #[test]
        fn last_sibling_fills_vacated_slot() {
            let mut tree = tree();
            let root = tree.root();
            let ids: Vec<_> = (0..4).map(|_| add(&mut tree, root, EntityKind::Leaf)).collect();

            let moved = tree.detach(root, ids[1]).unwrap();

            assert_eq!(moved, Some(ids[3]));
            assert_eq!(tree.children(root).unwrap(), &[ids[0], ids[3], ids[2]]);
            assert_eq!(tree.node(ids[3]).unwrap().ordinal(), 2);
            assert_eq!(tree.address(ids[3]).unwrap(), 0x8200_0000);
            assert_eq!(tree.node(ids[1]).unwrap().state(), NodeState::Detached);
            assert_contiguous(&tree);
        }

        #[test]
        fn detaching_last_child_moves_nothing() {
            let mut tree = tree();
            let root = tree.root();
            let a = add(&mut tree, root, EntityKind::Leaf);
            let b = add(&mut tree, root, EntityKind::Leaf);

            assert_eq!(tree.detach(root, b).unwrap(), None);
            assert_eq!(tree.children(root).unwrap(), &[a]);
            assert_eq!(tree.node(a).unwrap().ordinal(), 1);
        }

        #[test]
        fn renumbered_group_carries_descendant_addresses() {
            let mut tree = tree();
            let root = tree.root();
            let first = add(&mut tree, root, EntityKind::Group);
            let second = add(&mut tree, root, EntityKind::Group);
            let atom = add(&mut tree, second, EntityKind::Leaf);
            assert_eq!(tree.address(atom).unwrap(), 0x8201_0000);

            tree.detach(root, first).unwrap();

            assert_eq!(tree.address(second).unwrap(), 0x8100_0000);
            assert_eq!(tree.address(atom).unwrap(), 0x8101_0000);
        }

        #[test]
        fn detach_subtracts_subtree_leaves_from_ancestors() {
            let mut tree = tree();
            let root = tree.root();
            let species = add(&mut tree, root, EntityKind::Group);
            let m1 = add(&mut tree, species, EntityKind::Group);
            let m2 = add(&mut tree, species, EntityKind::Group);
            for _ in 0..3 {
                add(&mut tree, m1, EntityKind::Leaf);
            }
            add(&mut tree, m2, EntityKind::Leaf);
            assert_eq!(tree.node(root).unwrap().leaf_count(), 4);

            tree.detach(species, m1).unwrap();

            assert_eq!(tree.node(species).unwrap().leaf_count(), 1);
            assert_eq!(tree.node(root).unwrap().leaf_count(), 1);
        }

        #[test]
        fn detaching_a_non_child_is_rejected() {
            let mut tree = tree();
            let root = tree.root();
            let group = add(&mut tree, root, EntityKind::Group);
            let leaf = add(&mut tree, root, EntityKind::Leaf);
            let loose = tree.create(EntityKind::Leaf);

            assert_eq!(
                tree.detach(group, leaf).unwrap_err(),
                IndexError::NotAChild {
                    parent: group,
                    child: leaf
                }
            );
            assert!(matches!(
                tree.detach(root, loose),
                Err(IndexError::NotAChild { .. })
            ));
            tree.detach(root, leaf).unwrap();
            assert!(matches!(
                tree.detach(root, leaf),
                Err(IndexError::NotAChild { .. })
            ));
        }
    }

    mod leaf_indices {
        use super::*;

        #[test]
        fn releasing_a_leaf_moves_the_last_leaf_down() {
            let mut tree = tree();
            let root = tree.root();
            let ids: Vec<_> = (0..3).map(|_| add(&mut tree, root, EntityKind::Leaf)).collect();
            tree.detach(root, ids[0]).unwrap();

            let moved = tree.release_leaf_index(ids[0]).unwrap();

            assert_eq!(
                moved,
                Some(LeafMove {
                    entity: ids[2],
                    old_index: 2,
                    new_index: 0
                })
            );
            assert_eq!(tree.leaves(), &[ids[2], ids[1]]);
            assert_eq!(tree.node(ids[0]).unwrap().leaf_index(), None);
            tree.remove(ids[0]).unwrap();
            assert_contiguous(&tree);
        }

        #[test]
        fn releasing_last_leaf_or_group_reports_no_move() {
            let mut tree = tree();
            let root = tree.root();
            let group = add(&mut tree, root, EntityKind::Group);
            let leaf = add(&mut tree, root, EntityKind::Leaf);
            assert_eq!(tree.release_leaf_index(leaf).unwrap(), None);
            assert_eq!(tree.release_leaf_index(group).unwrap(), None);
            assert!(tree.leaves().is_empty());
        }
    }

    mod traversal {
        use super::*;

        #[test]
        fn pre_and_post_order_visit_subtree() {
            let mut tree = tree();
            let root = tree.root();
            let group = add(&mut tree, root, EntityKind::Group);
            let a = add(&mut tree, group, EntityKind::Leaf);
            let b = add(&mut tree, group, EntityKind::Leaf);
            let c = add(&mut tree, root, EntityKind::Leaf);

            assert_eq!(tree.pre_order(root).unwrap(), vec![root, group, a, b, c]);
            assert_eq!(tree.post_order(group).unwrap(), vec![a, b, group]);
            assert_eq!(tree.attached_entities().unwrap(), vec![group, a, b, c]);
        }

        #[test]
        fn remove_requires_detached_childless_node() {
            let mut tree = tree();
            let root = tree.root();
            let group = add(&mut tree, root, EntityKind::Group);
            let leaf = add(&mut tree, group, EntityKind::Leaf);

            assert!(matches!(tree.remove(group), Err(IndexError::Internal(_))));
            tree.detach(root, group).unwrap();
            assert!(matches!(tree.remove(group), Err(IndexError::Internal(_))));
            assert!(matches!(tree.remove(leaf), Err(IndexError::Internal(_))));
            tree.release_leaf_index(leaf).unwrap();
            tree.remove(leaf).unwrap();
            tree.remove(group).unwrap();
            assert!(!tree.contains(group));
            assert!(tree.is_empty());
        }

        #[test]
        fn emptiness_ignores_unattached_nodes() {
            let mut tree = tree();
            let root = tree.root();
            let loose = tree.create(EntityKind::Leaf);

            assert_eq!(tree.len(), 2);
            assert!(tree.is_empty());
            assert!(tree.attached_entities().unwrap().is_empty());

            let group = add(&mut tree, root, EntityKind::Group);
            assert!(!tree.is_empty());
            tree.detach(root, group).unwrap();
            assert!(tree.is_empty());
            assert!(tree.contains(loose));
        }
    }
}
