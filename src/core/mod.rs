//! Core domain models for cluster provisioning
//!
//! This module defines the fundamental data structures that represent
//! hosts, stages, pipelines and their configuration.

pub mod config;
pub mod context;
pub mod host;
pub mod pipeline;
pub mod probe;
pub mod retry;
pub mod stage;
pub mod state;
pub mod sync_point;

pub use context::*;
pub use host::*;
pub use pipeline::*;
pub use probe::*;
pub use retry::*;
pub use stage::*;
pub use state::*;
pub use sync_point::*;
