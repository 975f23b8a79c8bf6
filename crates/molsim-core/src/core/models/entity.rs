use super::ids::EntityId;
use crate::core::address::Address;
use std::fmt;

/// Kind tag of an entity: a terminal atom-like leaf or a group owning children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Leaf,
    Group,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EntityKind::Leaf => "Leaf",
                EntityKind::Group => "Group",
            }
        )
    }
}

/// Attachment state of a node.
///
/// `Detached` only exists while a removed subtree is being torn down; the node is
/// deleted from the arena before the removing call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unattached,
    Attached,
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeBody {
    Leaf {
        leaf_index: Option<usize>,
    },
    Group {
        children: Vec<EntityId>, // Ordered; position + 1 == child ordinal
        leaf_count: usize,       // Leaves anywhere below this group
    },
}

/// A node of the entity tree.
///
/// The parent link is a lookup-only arena key; the parent group owns its children
/// through its `children` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityNode {
    pub(crate) body: NodeBody,
    pub(crate) parent: Option<EntityId>,
    pub(crate) state: NodeState,
    pub(crate) depth: usize,
    pub(crate) ordinal: u32,
    pub(crate) local_bits: Address, // This node's own encoded ordinal
    pub(crate) global_index: Option<usize>,
}

impl EntityNode {
    pub(crate) fn new(kind: EntityKind) -> Self {
        let body = match kind {
            EntityKind::Leaf => NodeBody::Leaf { leaf_index: None },
            EntityKind::Group => NodeBody::Group {
                children: Vec::new(),
                leaf_count: 0,
            },
        };
        Self {
            body,
            parent: None,
            state: NodeState::Unattached,
            depth: 0,
            ordinal: 0,
            local_bits: 0,
            global_index: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self.body {
            NodeBody::Leaf { .. } => EntityKind::Leaf,
            NodeBody::Group { .. } => EntityKind::Group,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 1-based position among siblings; 0 while unattached.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn global_index(&self) -> Option<usize> {
        self.global_index
    }

    pub fn leaf_index(&self) -> Option<usize> {
        match self.body {
            NodeBody::Leaf { leaf_index } => leaf_index,
            NodeBody::Group { .. } => None,
        }
    }

    /// Children of a group; empty for leaves.
    pub fn children(&self) -> &[EntityId] {
        match &self.body {
            NodeBody::Leaf { .. } => &[],
            NodeBody::Group { children, .. } => children,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    /// Number of leaves this node accounts for: 1 for a leaf, the subtree's leaf
    /// total for a group.
    pub fn leaf_count(&self) -> usize {
        match self.body {
            NodeBody::Leaf { .. } => 1,
            NodeBody::Group { leaf_count, .. } => leaf_count,
        }
    }
}

/// Snapshot of an attached entity, delivered with lifecycle events.
///
/// Records are plain data so listeners never hold a borrow of the tree while a
/// mutation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub parent: Option<EntityId>,
    pub depth: usize,
    pub ordinal: u32,
    pub address: Address,
    pub global_index: usize,
    pub leaf_index: Option<usize>,
}

impl EntityRecord {
    pub fn is_leaf(&self) -> bool {
        self.kind == EntityKind::Leaf
    }
}
