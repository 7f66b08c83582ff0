//! Configuration for tessera.
//!
//! This module provides the engine configuration structure.

mod engine;

pub use engine::EngineConfig;
