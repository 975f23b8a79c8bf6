//! # Engine Module
//!
//! The stateful layer of molsim: it issues and recycles global indices, keeps
//! per-entity agent tables in step with the tree and tells listeners about every
//! change.
//!
//! ## Architecture
//!
//! - **Entity System** ([`system`]) - Owns the tree, the allocator and the event bus;
//!   every structural mutation goes through it
//! - **Index Allocation** ([`allocator`]) - Global index issue, the free-index reservoir
//!   and compaction
//! - **Lifecycle Events** ([`events`]) - Event types and the ordered listener list
//! - **Agent Tables** ([`agents`]) - Dense per-entity side tables driven by events
//! - **Configuration** ([`config`]) - Address layout and reservoir settings, with TOML loading
//! - **Error Handling** ([`error`]) - The [`error::IndexError`] taxonomy
//!
//! ## Consistency Model
//!
//! Everything is single-threaded and synchronous. A mutating call on
//! [`system::EntitySystem`] has delivered all of its events, including any
//! compaction it triggered, before it returns.

pub mod agents;
pub mod allocator;
pub mod config;
pub mod error;
pub mod events;
pub mod system;
