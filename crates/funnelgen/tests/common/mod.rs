//! Shared test utilities for funnelgen integration tests.
//!
//! This module provides:
//! - `ScriptedGenerator`, a generation oracle answering by prompt marker
//! - `TestHarness` wiring an engine to an in-memory database
//! - Builders for section documents used across tests

pub mod builders;
pub mod generator;
pub mod harness;

pub use builders::*;
pub use generator::{Reply, ScriptedGenerator};
pub use harness::{TestHarness, FUNNEL};
