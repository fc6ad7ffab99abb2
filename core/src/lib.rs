//! Kiln Core - Foundational Types
//!
//! Error type, build configuration and build events shared by the
//! Kiln build engine and anything embedding it.

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use config::{BuildConfig, ContainerLimits, VolumeMount, DEFAULT_INFINITE_COMMAND};
pub use error::{KilnError, Result};
pub use event::{BuildEvent, EventEmitter, EventPayload};

/// Kiln version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
