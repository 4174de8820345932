//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into deal and dashboard use-cases.
//! - Keep callers decoupled from storage details.

pub mod deal_service;
pub mod integration_service;
