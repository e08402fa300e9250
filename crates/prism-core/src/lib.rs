//! Foundation types for the Prism rendering engine.
//!
//! This crate provides the building blocks shared by the engine layers:
//! - Fixed-capacity resource pools with stable indices
//! - Typed, generation-tagged handles

pub mod pool;

pub use pool::{Handle, ResourcePool};
