//! # Workflows Module
//!
//! High-level procedures built on [`crate::engine::system::EntitySystem`].
//!
//! - **Population** ([`populate`]) - Builds species of identical molecules under the
//!   root and resizes them, announcing index bounds up front so agent tables grow once.

pub mod populate;
