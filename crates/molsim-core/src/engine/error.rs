use thiserror::Error;

use super::config::ConfigError;
use crate::core::address::AddressError;
use crate::core::models::ids::EntityId;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum IndexError {
    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Address encoding failed: {source}")]
    Address {
        #[from]
        source: AddressError,
    },

    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    #[error("Entity {0:?} is already attached to a parent")]
    AlreadyAttached(EntityId),

    #[error("Cannot attach to {0:?}: parent is not part of the tree")]
    ParentNotAttached(EntityId),

    #[error("Entity {0:?} is a leaf and cannot own children")]
    NotAGroup(EntityId),

    #[error("Entity {child:?} is not a child of {parent:?}")]
    NotAChild { parent: EntityId, child: EntityId },

    #[error("Entity {0:?} has no global index")]
    Unindexed(EntityId),

    #[error("Entity {0:?} is not a leaf and has no leaf index")]
    NotALeaf(EntityId),

    #[error("Index {0} is not held by a live entity")]
    IndexNotLive(usize),

    #[error("Index {index} is out of bounds for a table of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("No agent stored at index {0}")]
    NoAgent(usize),

    #[error("Entity {0:?} is outside the scope of this agent table")]
    OutOfScope(EntityId),

    #[error("Agent table not found (already removed or of a different type)")]
    AgentTableNotFound,

    #[error("Internal consistency error: {0}")]
    Internal(String),
}
