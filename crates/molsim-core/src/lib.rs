//! # molsim Core Library
//!
//! Entity indexing for molecular simulation: a hierarchy of species, molecules
//! and atoms with compact bit-packed addresses, dense recyclable indices and
//! per-entity side tables that follow every renumbering.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** The address codec and the arena-backed entity
//!   tree: ordinals, addresses, leaf indices and structural checks.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer: the global index allocator
//!   with its reservoir and compaction, lifecycle events, agent tables, and the
//!   `EntitySystem` that ties them together.
//!
//! - **[`workflows`]: The Public API.** Procedures such as populating species with
//!   molecules, written against the engine.

pub mod core;
pub mod engine;
pub mod workflows;
