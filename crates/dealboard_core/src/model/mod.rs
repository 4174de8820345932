//! Pipeline domain model.
//!
//! # Responsibility
//! - Define canonical records used by deal and dashboard logic.
//! - Keep validation next to the data it guards.
//!
//! # Invariants
//! - Every deal and integration is identified by a stable UUID.
//! - Stage, user, brand, channel and tag ids are opaque external references.

pub mod deal;
pub mod integration;
