use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{KilnError, Result};

/// Command keeping the build-time container alive between `exec` calls.
pub const DEFAULT_INFINITE_COMMAND: &str = "tail -f /dev/null";

/// Build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Declared build arguments (`--build-arg KEY=VALUE`)
    pub buildargs: HashMap<String, String>,

    /// Explicit layer split marks (instruction indices)
    pub layers: Option<Vec<usize>>,

    /// Always pull the base image, even when it is present locally
    pub pull: bool,

    /// Remove the open container when the build fails
    pub forcerm: bool,

    /// Remove intermediate containers after a successful commit
    pub rm: bool,

    /// Labels applied to the final image
    pub labels: BTreeMap<String, String>,

    /// Tags for the final image (e.g. "myimage:latest")
    pub tags_and_repos: Vec<String>,

    /// Host volumes mounted into every build container
    pub volumes: Vec<VolumeMount>,

    /// Resource limits for build containers
    pub container_limits: ContainerLimits,

    /// Command used to keep build containers running
    pub infinite_command: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            buildargs: HashMap::new(),
            layers: None,
            pull: false,
            forcerm: false,
            rm: true,
            labels: BTreeMap::new(),
            tags_and_repos: Vec::new(),
            volumes: Vec::new(),
            container_limits: ContainerLimits::default(),
            infinite_command: DEFAULT_INFINITE_COMMAND.to_string(),
        }
    }
}

impl BuildConfig {
    /// Load a configuration file.
    ///
    /// Files ending in `.json` are read as JSON, everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KilnError::ConfigError(format!(
                "Failed to read build config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: BuildConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            tags = config.tags_and_repos.len(),
            buildargs = config.buildargs.len(),
            "Loaded build configuration"
        );
        Ok(config)
    }

    /// Check the configuration for values the builder cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.infinite_command.trim().is_empty() {
            return Err(KilnError::ConfigError(
                "infinite_command must not be empty".to_string(),
            ));
        }

        if let Some(tag) = self.tags_and_repos.iter().find(|t| t.trim().is_empty()) {
            return Err(KilnError::ConfigError(format!("Invalid empty tag '{}'", tag)));
        }

        for volume in &self.volumes {
            if !volume.container.starts_with('/') {
                return Err(KilnError::ConfigError(format!(
                    "Volume target must be an absolute path: {}",
                    volume.container
                )));
            }
        }

        Ok(())
    }
}

/// A host directory bound into build containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Path on the host
    pub host: PathBuf,
    /// Mount point inside the container
    pub container: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// Render in Docker bind syntax: `host:container:mode`.
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }

    /// Parse Docker bind syntax (`host:container[:ro|:rw]`).
    pub fn parse(bind: &str) -> Result<Self> {
        let parts: Vec<&str> = bind.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (*host, *container, false),
            [host, container, "ro"] => (*host, *container, true),
            [host, container, "rw"] => (*host, *container, false),
            _ => {
                return Err(KilnError::ConfigError(format!(
                    "Invalid volume '{}' (expected host:container[:ro|rw])",
                    bind
                )))
            }
        };

        if host.is_empty() || container.is_empty() {
            return Err(KilnError::ConfigError(format!("Invalid volume '{}'", bind)));
        }

        Ok(Self {
            host: PathBuf::from(host),
            container: container.to_string(),
            read_only,
        })
    }
}

/// Resource limits applied to each build container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLimits {
    /// Memory limit in bytes
    pub memory: Option<i64>,
    /// Total memory (memory + swap), -1 disables swap
    pub memswap: Option<i64>,
    /// CPU shares (relative weight)
    pub cpushares: Option<i64>,
    /// CPUs in which to allow execution, e.g. "0-3"
    pub cpusetcpus: Option<String>,
}
