//! Image layers: groups of commands materialized by a single commit.

use std::collections::BTreeMap;

use kiln_core::config::BuildConfig;
use kiln_core::error::Result;
use sha2::{Digest, Sha256};

use crate::command::Command;
use crate::context::{GlobalContext, LayerContext};

/// Marker every layer commit message starts with.
pub const COMMIT_MESSAGE_MARKER: &str = "kiln-build:";

/// An ordered group of commands that share one container and one commit.
#[derive(Debug, Clone)]
pub struct ImageLayer {
    /// Position of the layer in the build, starting at 0
    pub number: usize,
    /// Commands in execution order
    pub commands: Vec<Command>,
    /// Whether this is the final layer of the build
    pub is_last: bool,
    /// Commit message: the marker followed by every command's content
    pub commit_message: String,
    /// Metadata and runtime state accumulated while the layer runs
    pub context: LayerContext,
    /// Resolved build state the cache key covers, set by [`ImageLayer::resolve`]
    cache_inputs: Vec<String>,
}

impl ImageLayer {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            commands: Vec::new(),
            is_last: false,
            commit_message: COMMIT_MESSAGE_MARKER.to_string(),
            context: LayerContext::new(),
            cache_inputs: Vec::new(),
        }
    }

    /// Append a command, recording its content in the commit message and
    /// in the layer's debug label.
    pub fn add_command(&mut self, command: Command) {
        let content = format!(" {}", command.content().trim_end());
        let key = self.debug_label_key();
        self.commit_message.push_str(&content);
        self.context
            .labels
            .entry(key)
            .or_default()
            .push_str(&content);
        self.commands.push(command);
    }

    /// Label key holding the commands of this layer.
    pub fn debug_label_key(&self) -> String {
        format!("layer_{}_commands", self.number)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether any command in the layer modifies the container filesystem.
    pub fn changes_data(&self) -> bool {
        self.commands.iter().any(|c| c.kind().changes_data())
    }

    /// Replay the layer's commands against `global` and record the inputs
    /// its cache key depends on.
    ///
    /// The inputs are the build state before and after the layer (working
    /// directory, user and environment), `base_image` when the layer has no
    /// parent image, and every command's resolved value. On return `global`
    /// holds the state later layers see once this one has run.
    pub fn resolve(
        &mut self,
        base_image: Option<&str>,
        global: &mut GlobalContext,
        config: &BuildConfig,
    ) -> Result<()> {
        let mut inputs = Vec::new();
        if let Some(base) = base_image {
            inputs.push(format!("base {}", base));
        }
        push_state(&mut inputs, "before", global);
        for command in &self.commands {
            let value = command.replay(global, config)?;
            inputs.push(format!("{} {}", command.kind(), value));
        }
        push_state(&mut inputs, "after", global);

        self.cache_inputs = inputs;
        Ok(())
    }

    /// Key identifying this layer on top of `parent`.
    ///
    /// The key is a SHA256 hash of the parent image id, every command's
    /// original content and the inputs recorded by [`ImageLayer::resolve`].
    pub fn fingerprint(&self, parent: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"layer-cache-v2\n");
        hasher.update(parent.unwrap_or("").as_bytes());
        hasher.update(b"\n");

        for command in &self.commands {
            hasher.update(command.content().as_bytes());
            hasher.update(b"\n");
        }
        for input in &self.cache_inputs {
            hasher.update((input.len() as u64).to_le_bytes());
            hasher.update(input.as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

fn push_state(inputs: &mut Vec<String>, phase: &str, global: &GlobalContext) {
    inputs.push(format!("{} workdir {}", phase, global.workdir));
    if let Some(user) = &global.user {
        inputs.push(format!("{} user {}", phase, user));
    }
    let envs: BTreeMap<&String, &String> = global.envs.iter().collect();
    for (key, value) in envs {
        inputs.push(format!("{} env {}={}", phase, key, value));
    }
}
