//! Build-wide and per-layer state threaded through every command.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Working directory a build starts in.
pub const DEFAULT_WORKDIR: &str = "/";

/// State shared by every command of one build.
///
/// Created once per [`Builder::build`](crate::Builder::build) call and
/// dropped when it returns.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory inside the image
    pub workdir: String,
    /// Variables available for `${VAR}` substitution and RUN environments
    pub envs: HashMap<String, String>,
    /// User subsequent RUN commands execute as
    pub user: Option<String>,
    /// Build arguments consumed by ARG instructions
    used_buildargs: BTreeSet<String>,
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self {
            workdir: DEFAULT_WORKDIR.to_string(),
            envs: HashMap::new(),
            user: None,
            used_buildargs: BTreeSet::new(),
        }
    }
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a build argument and make it available for substitution.
    pub fn use_buildarg(&mut self, key: &str, value: &str) {
        self.used_buildargs.insert(key.to_string());
        self.envs.insert(key.to_string(), value.to_string());
    }

    /// Build arguments consumed so far.
    pub fn used_buildargs(&self) -> &BTreeSet<String> {
        &self.used_buildargs
    }

    /// Declared build arguments no ARG instruction consumed, sorted.
    pub fn unused_buildargs(&self, declared: &HashMap<String, String>) -> Vec<String> {
        let mut unused: Vec<String> = declared
            .keys()
            .filter(|k| !self.used_buildargs.contains(*k))
            .cloned()
            .collect();
        unused.sort();
        unused
    }

    /// Whether the working directory differs from the build default.
    pub fn has_custom_workdir(&self) -> bool {
        !self.workdir.is_empty() && self.workdir != DEFAULT_WORKDIR
    }
}

/// Output captured from one RUN command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    /// Original instruction text
    pub command: String,
    /// Output lines in the order they were received
    pub logs: Vec<String>,
}

impl CommandLog {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            logs: Vec::new(),
        }
    }

    pub fn add_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// Image metadata properties set by metadata instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommitProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
}

/// Configuration handed to the container runtime's commit primitive.
///
/// Serialises with the runtime's field names (`Cmd`, `Env`, `Labels`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommitConfig {
    #[serde(flatten)]
    pub properties: CommitProperties,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Commit metadata and runtime state accumulated while one layer runs.
#[derive(Debug, Clone, Default)]
pub struct LayerContext {
    /// Container the layer's commands run in, while the layer is open
    pub container: Option<String>,
    /// Image author (MAINTAINER)
    pub author: Option<String>,
    /// Image labels
    pub labels: BTreeMap<String, String>,
    /// Environment added by this layer, in declaration order
    pub envs: Vec<(String, String)>,
    /// Structured commit properties
    pub commit_config_properties: CommitProperties,
    /// Output of RUN commands executed in this layer
    pub logs: Vec<CommandLog>,
}

impl LayerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge env pairs into both the build-wide and the layer-local env.
    pub fn update_envs(&mut self, global: &mut GlobalContext, envs: &BTreeMap<String, String>) {
        for (key, value) in envs {
            global.envs.insert(key.clone(), value.clone());
            // Replace existing or add new
            if let Some(existing) = self.envs.iter_mut().find(|(k, _)| k == key) {
                existing.1 = value.clone();
            } else {
                self.envs.push((key.clone(), value.clone()));
            }
        }
    }

    pub fn update_labels(&mut self, labels: &BTreeMap<String, String>) {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Record the new working directory for the image and later commands.
    pub fn change_workdir(&mut self, global: &mut GlobalContext, workdir: &str) {
        self.commit_config_properties.working_dir = Some(workdir.to_string());
        global.workdir = workdir.to_string();
    }

    pub fn update_user(&mut self, global: &mut GlobalContext, user: &str) {
        self.commit_config_properties.user = Some(user.to_string());
        global.user = Some(user.to_string());
    }

    /// Snapshot of the commit configuration for this layer.
    pub fn commit_config(&self) -> CommitConfig {
        CommitConfig {
            properties: self.commit_config_properties.clone(),
            env: self
                .envs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_global_context_defaults() {
        let global = GlobalContext::new();
        assert_eq!(global.workdir, "/");
        assert!(!global.has_custom_workdir());
        assert!(global.envs.is_empty());
        assert!(global.user.is_none());
    }

    #[test]
    fn test_use_buildarg_tracks_consumption() {
        let mut global = GlobalContext::new();
        global.use_buildarg("VERSION", "2");

        let mut declared = HashMap::new();
        declared.insert("VERSION".to_string(), "2".to_string());
        declared.insert("UNUSED".to_string(), "x".to_string());
        declared.insert("ALSO_UNUSED".to_string(), "y".to_string());

        assert_eq!(global.envs.get("VERSION"), Some(&"2".to_string()));
        assert!(global.used_buildargs().contains("VERSION"));
        assert_eq!(
            global.unused_buildargs(&declared),
            vec!["ALSO_UNUSED".to_string(), "UNUSED".to_string()]
        );
    }

    #[test]
    fn test_update_envs_replaces_existing() {
        let mut global = GlobalContext::new();
        let mut layer = LayerContext::new();

        layer.update_envs(&mut global, &map(&[("A", "1"), ("B", "2")]));
        layer.update_envs(&mut global, &map(&[("A", "3")]));

        assert_eq!(
            layer.envs,
            vec![
                ("A".to_string(), "3".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
        assert_eq!(global.envs.get("A"), Some(&"3".to_string()));
    }

    #[test]
    fn test_change_workdir() {
        let mut global = GlobalContext::new();
        let mut layer = LayerContext::new();
        layer.change_workdir(&mut global, "/app");

        assert!(global.has_custom_workdir());
        assert_eq!(
            layer.commit_config_properties.working_dir.as_deref(),
            Some("/app")
        );
    }

    #[test]
    fn test_commit_config_snapshot() {
        let mut global = GlobalContext::new();
        let mut layer = LayerContext::new();
        layer.update_envs(&mut global, &map(&[("PATH", "/usr/bin")]));
        layer.update_labels(&map(&[("version", "1.0")]));
        layer.commit_config_properties.cmd = Some("./server".to_string());
        layer
            .commit_config_properties
            .exposed_ports
            .insert("80/tcp".to_string(), serde_json::json!({}));

        let config = layer.commit_config();
        assert_eq!(config.env, vec!["PATH=/usr/bin".to_string()]);
        assert_eq!(config.labels.get("version"), Some(&"1.0".to_string()));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["Cmd"], "./server");
        assert_eq!(json["Env"][0], "PATH=/usr/bin");
        assert_eq!(json["Labels"]["version"], "1.0");
        assert_eq!(json["ExposedPorts"]["80/tcp"], serde_json::json!({}));
        assert!(json.get("Entrypoint").is_none());
        assert!(json.get("Volumes").is_none());
    }

    #[test]
    fn test_empty_commit_config_serialises_to_empty_object() {
        let json = serde_json::to_value(LayerContext::new().commit_config()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_command_log() {
        let mut log = CommandLog::new("RUN make");
        log.add_log("line 1");
        log.add_log("line 2");
        assert_eq!(log.logs, vec!["line 1", "line 2"]);
    }
}
