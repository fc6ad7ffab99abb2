//! Kiln Engine - layered container image builds.
//!
//! Groups parsed build instructions into layers, runs each layer's commands
//! in a build container through a [`Client`], commits the container as an
//! image and reuses previously committed layers from a [`LayerCache`].

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod build_context;
pub mod builder;
pub mod cache;
pub mod client;
pub mod command;
pub mod context;
pub mod expand;
pub mod instruction;
pub mod layer;
pub mod planner;
pub mod transfer;

#[cfg(test)]
mod testutil;

// Re-export common types
pub use build_context::{BuildContext, ContextFile, ContextItem, DirContext};
pub use builder::{BuildHooks, Builder, NoopHooks, ResultImage};
pub use cache::{DiskLayerCache, LayerCache, LayerCacheEntry, MemoryLayerCache};
pub use client::{Client, ImageTag, OutputStream};
pub use command::{Command, CommandKind};
pub use context::{
    CommandLog, CommitConfig, CommitProperties, GlobalContext, LayerContext, DEFAULT_WORKDIR,
};
pub use instruction::{Instruction, InstructionSet, LineContext};
pub use layer::{ImageLayer, COMMIT_MESSAGE_MARKER};
pub use planner::{layer_split_marks, plan_layers};

pub use kiln_core::{BuildConfig, KilnError, Result};

/// Kiln engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
