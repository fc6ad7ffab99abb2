//! Executable build commands, one per supported instruction keyword.

use std::collections::BTreeMap;
use std::fmt;

use futures::StreamExt;
use kiln_core::config::BuildConfig;
use kiln_core::error::{KilnError, Result};

use crate::archive::is_archive;
use crate::build_context::BuildContext;
use crate::client::Client;
use crate::context::{CommandLog, GlobalContext, LayerContext};
use crate::expand::{apply_shell_expansion, substitute_variables};
use crate::instruction::{Instruction, LineContext};
use crate::transfer::{self, norm_path_with_workdir, CopyTarget};

/// Supported instruction keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Arg,
    Copy,
    Add,
    Cmd,
    Entrypoint,
    Env,
    Expose,
    From,
    Label,
    Maintainer,
    Run,
    StopSignal,
    User,
    Volume,
    Workdir,
}

impl CommandKind {
    /// Look up a keyword. Keywords are matched exactly (uppercase).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let kind = match keyword {
            "ARG" => Self::Arg,
            "COPY" => Self::Copy,
            "ADD" => Self::Add,
            "CMD" => Self::Cmd,
            "ENTRYPOINT" => Self::Entrypoint,
            "ENV" => Self::Env,
            "EXPOSE" => Self::Expose,
            "FROM" => Self::From,
            "LABEL" => Self::Label,
            "MAINTAINER" => Self::Maintainer,
            "RUN" => Self::Run,
            "STOPSIGNAL" => Self::StopSignal,
            "USER" => Self::User,
            "VOLUME" => Self::Volume,
            "WORKDIR" => Self::Workdir,
            _ => return None,
        };
        Some(kind)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Arg => "ARG",
            Self::Copy => "COPY",
            Self::Add => "ADD",
            Self::Cmd => "CMD",
            Self::Entrypoint => "ENTRYPOINT",
            Self::Env => "ENV",
            Self::Expose => "EXPOSE",
            Self::From => "FROM",
            Self::Label => "LABEL",
            Self::Maintainer => "MAINTAINER",
            Self::Run => "RUN",
            Self::StopSignal => "STOPSIGNAL",
            Self::User => "USER",
            Self::Volume => "VOLUME",
            Self::Workdir => "WORKDIR",
        }
    }

    /// Whether the command modifies the container filesystem.
    pub fn changes_data(&self) -> bool {
        matches!(self, Self::Copy | Self::Add | Self::Run)
    }

    /// Whether the value skips shell expansion (variables are still substituted).
    pub fn raw_value(&self) -> bool {
        matches!(self, Self::Run)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One instruction bound to the behavior of its keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    value: String,
    content: String,
    line_envs: BTreeMap<String, String>,
    line_labels: BTreeMap<String, String>,
}

impl Command {
    pub fn new(kind: CommandKind, instruction: &Instruction, context: LineContext) -> Self {
        Self {
            kind,
            value: instruction.value.clone(),
            content: instruction.content.clone(),
            line_envs: context.line_envs,
            line_labels: context.line_labels,
        }
    }

    /// Build a command from an instruction; `None` for unknown keywords.
    pub fn from_instruction(instruction: &Instruction, context: LineContext) -> Option<Self> {
        CommandKind::from_keyword(&instruction.keyword)
            .map(|kind| Self::new(kind, instruction, context))
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Current value; substituted and expanded once the command has run.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Original instruction text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Execute the command against the layer's container.
    ///
    /// Variables in the value are substituted from the build environment
    /// first; unless the kind keeps its value raw, the result is then
    /// shell-expanded.
    pub async fn call(
        &mut self,
        client: &dyn Client,
        global: &mut GlobalContext,
        layer: &mut LayerContext,
        build_context: &dyn BuildContext,
        config: &BuildConfig,
    ) -> Result<()> {
        tracing::info!(command = %self.content, "Executing instruction");

        self.value = self.resolve_value(global);
        self.apply(client, global, layer, build_context, config).await
    }

    /// Value after variable substitution from `global` and, unless the kind
    /// keeps its value raw, shell expansion.
    pub fn resolve_value(&self, global: &GlobalContext) -> String {
        let substituted = substitute_variables(&self.value, &global.envs);
        if self.kind.raw_value() {
            substituted
        } else {
            apply_shell_expansion(&substituted)
        }
    }

    /// Apply only the command's effect on build-wide state, without a
    /// container, and return the resolved value.
    ///
    /// ARG, ENV, WORKDIR and USER update `global` exactly as [`call`] would.
    /// Every other kind leaves it untouched.
    ///
    /// [`call`]: Command::call
    pub fn replay(&self, global: &mut GlobalContext, config: &BuildConfig) -> Result<String> {
        let value = self.resolve_value(global);
        match self.kind {
            CommandKind::Arg => self.apply_arg(&value, global, config)?,
            CommandKind::Env => {
                for (key, env) in &self.line_envs {
                    global.envs.insert(key.clone(), env.clone());
                }
            }
            CommandKind::Workdir => {
                global.workdir = norm_path_with_workdir(&value, &global.workdir);
            }
            CommandKind::User => global.user = Some(value.clone()),
            _ => {}
        }
        Ok(value)
    }

    async fn apply(
        &self,
        client: &dyn Client,
        global: &mut GlobalContext,
        layer: &mut LayerContext,
        build_context: &dyn BuildContext,
        config: &BuildConfig,
    ) -> Result<()> {
        match self.kind {
            CommandKind::Arg => self.apply_arg(&self.value, global, config),
            CommandKind::Env => {
                layer.update_envs(global, &self.line_envs);
                Ok(())
            }
            CommandKind::Label => {
                layer.update_labels(&self.line_labels);
                Ok(())
            }
            CommandKind::Copy => self.apply_copy(client, global, layer, build_context).await,
            CommandKind::Add => self.apply_add(client, global, layer, build_context).await,
            CommandKind::Run => self.apply_run(client, global, layer).await,
            CommandKind::Workdir => {
                let workdir = norm_path_with_workdir(&self.value, &global.workdir);
                layer.change_workdir(global, &workdir);
                transfer::create_directory(client, current_container(layer)?, &workdir).await
            }
            CommandKind::Cmd => {
                layer.commit_config_properties.cmd = Some(self.value.clone());
                Ok(())
            }
            CommandKind::Entrypoint => {
                layer.commit_config_properties.entrypoint = Some(self.value.clone());
                Ok(())
            }
            CommandKind::StopSignal => {
                layer.commit_config_properties.stop_signal = Some(self.value.clone());
                Ok(())
            }
            CommandKind::User => {
                layer.update_user(global, &self.value);
                Ok(())
            }
            CommandKind::Maintainer => {
                layer.author = Some(self.value.clone());
                Ok(())
            }
            CommandKind::Expose => {
                for port in self.value.split_whitespace() {
                    layer
                        .commit_config_properties
                        .exposed_ports
                        .insert(port.to_string(), serde_json::json!({}));
                }
                Ok(())
            }
            CommandKind::Volume => {
                for volume in self.value.split_whitespace() {
                    layer
                        .commit_config_properties
                        .volumes
                        .insert(volume.to_string(), serde_json::json!({}));
                }
                Ok(())
            }
            CommandKind::From => Ok(()),
        }
    }

    fn apply_arg(
        &self,
        value: &str,
        global: &mut GlobalContext,
        config: &BuildConfig,
    ) -> Result<()> {
        let mut parts = value.split('=');
        let key = parts.next().unwrap_or_default().trim();
        let default_value = parts.next().unwrap_or_default();

        if key.is_empty() || parts.next().is_some() {
            return Err(KilnError::InvalidInstruction {
                keyword: self.kind.to_string(),
                value: value.to_string(),
                message: "expected KEY or KEY=default".to_string(),
            });
        }

        let resolved = config
            .buildargs
            .get(key)
            .map(String::as_str)
            .unwrap_or(default_value);
        global.use_buildarg(key, resolved);
        Ok(())
    }

    /// Split a COPY/ADD value into sources and target.
    fn copy_operands(&self) -> Option<(Vec<&str>, &str)> {
        let mut tokens: Vec<&str> = self.value.split_whitespace().collect();
        if tokens.len() < 2 {
            tracing::warn!(command = %self.content, "Expected at least one source and a target, skipping");
            return None;
        }
        let target = tokens.pop()?;
        Some((tokens, target))
    }

    async fn apply_copy(
        &self,
        client: &dyn Client,
        global: &GlobalContext,
        layer: &LayerContext,
        build_context: &dyn BuildContext,
    ) -> Result<()> {
        let Some((sources, target)) = self.copy_operands() else {
            return Ok(());
        };
        let container = current_container(layer)?;
        let target = CopyTarget::new(target, sources.len(), &global.workdir);

        for source in sources {
            transfer::copy_to_container(client, container, build_context, source, &target).await?;
        }
        Ok(())
    }

    async fn apply_add(
        &self,
        client: &dyn Client,
        global: &GlobalContext,
        layer: &LayerContext,
        build_context: &dyn BuildContext,
    ) -> Result<()> {
        let Some((sources, target)) = self.copy_operands() else {
            return Ok(());
        };
        let container = current_container(layer)?;
        let target = CopyTarget::new(target, sources.len(), &global.workdir);

        for source in sources {
            if let Some(data) = build_context.get_file(source)? {
                if is_archive(&data) {
                    tracing::debug!(source, "Source is an archive, extracting in container");
                    return transfer::put_archive(client, container, data, &target).await;
                }
            }
            transfer::copy_to_container(client, container, build_context, source, &target).await?;
        }
        Ok(())
    }

    async fn apply_run(
        &self,
        client: &dyn Client,
        global: &GlobalContext,
        layer: &mut LayerContext,
    ) -> Result<()> {
        let container = current_container(layer)?.to_string();
        let cmd = if global.has_custom_workdir() {
            format!("cd {}; {}", global.workdir, self.value)
        } else {
            self.value.clone()
        };

        let mut log = CommandLog::new(self.content.clone());
        let mut output = client
            .execute(&container, &cmd, &global.envs, global.user.as_deref())
            .await?;

        while let Some(chunk) = output.next().await {
            let chunk = chunk?;
            let line = String::from_utf8_lossy(&chunk).trim_end().to_string();
            tracing::debug!(container = %container, "{}", line);
            log.add_log(line);
        }

        layer.logs.push(log);
        Ok(())
    }
}

fn current_container(layer: &LayerContext) -> Result<&str> {
    layer
        .container
        .as_deref()
        .ok_or_else(|| KilnError::client("execute", "no container is running for the layer"))
}
