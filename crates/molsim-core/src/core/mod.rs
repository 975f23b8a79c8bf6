//! # Core Module
//!
//! Stateless building blocks of the indexing subsystem: the packed address codec
//! and the entity tree that owns ordinal and leaf-index bookkeeping.
//!
//! ## Architecture
//!
//! - **Addressing** ([`address`]) - Per-depth bit-packing of sibling ordinals into a 32-bit address
//! - **Entity Representation** ([`models`]) - Arena-backed tree of groups and leaves
//!
//! Nothing in this layer emits events or issues global indices; the
//! [`crate::engine`] layer sequences those around tree mutations.

pub mod address;
pub mod models;
