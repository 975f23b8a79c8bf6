//! # Entity Models
//!
//! The entity tree of a simulation: groups (species, molecules) that own ordered
//! children, and leaves (atoms) that terminate the hierarchy.
//!
//! ## Key Components
//!
//! - [`ids`] - Arena keys for entity nodes
//! - [`entity`] - Node representation and the [`entity::EntityRecord`] snapshot carried by events
//! - [`tree`] - Arena-backed tree with ordinal, address and leaf-index bookkeeping
//!
//! ## Usage
//!
//! ```ignore
//! use molsim::core::address::AddressCodec;
//! use molsim::core::models::{entity::EntityKind, tree::EntityTree};
//!
//! let mut tree = EntityTree::new(AddressCodec::new(&[1, 7, 8, 16])?)?;
//! let molecule = tree.create(EntityKind::Group);
//! tree.attach(tree.root(), molecule)?;
//! ```

pub mod entity;
pub mod ids;
pub mod tree;
