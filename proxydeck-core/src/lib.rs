//! proxydeck core library
//!
//! Shared types, URL rule matching, the profile store, and the auto-switch
//! engine that keeps the single global proxy setting in line with per-tab
//! decisions.

pub mod applier;
pub mod error;
pub mod matcher;
pub mod messaging;
pub mod orchestrator;
pub mod profiles;
pub mod resolver;
pub mod storage;
pub mod tabs;
pub mod types;

pub use error::ProxydeckError;
pub use orchestrator::Engine;
pub use types::*;
