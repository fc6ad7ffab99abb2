//! Container runtime interface consumed by the builder.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use kiln_core::config::{ContainerLimits, VolumeMount};
use kiln_core::error::{KilnError, Result};

use crate::context::CommitConfig;

/// Output of a command executed in a container, chunk by chunk.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Container runtime operations the builder drives.
///
/// Implementations block (await) until the runtime has finished the
/// operation; the builder never issues two calls concurrently.
#[async_trait]
pub trait Client: Send + Sync {
    /// Id of the image with the given name or id, `None` if absent.
    async fn get_image(&self, reference: &str) -> Result<Option<String>>;

    /// Pull an image; returns its id when the runtime reports one.
    async fn pull_image(&self, reference: &str) -> Result<Option<String>>;

    /// Create and start a container that stays up running `infinite_command`.
    async fn run_container_infinitely(
        &self,
        image: &str,
        infinite_command: &str,
        volumes: &[VolumeMount],
        container_limits: &ContainerLimits,
    ) -> Result<String>;

    /// Run `cmd` through a shell inside the container, streaming its output.
    ///
    /// A failing command surfaces as an error item in the stream.
    async fn execute(
        &self,
        container: &str,
        cmd: &str,
        envs: &HashMap<String, String>,
        user: Option<&str>,
    ) -> Result<OutputStream>;

    /// Extract a tar archive (optionally compressed) into `path` in the container.
    async fn put_archive(&self, container: &str, path: &str, data: Vec<u8>) -> Result<()>;

    async fn stop_container(&self, container: &str) -> Result<()>;

    async fn remove_container(&self, container: &str) -> Result<()>;

    /// Snapshot the container into a new image and return the image id.
    async fn commit_container(
        &self,
        container: &str,
        conf: &CommitConfig,
        author: Option<&str>,
        message: &str,
        tags: &[ImageTag],
    ) -> Result<String>;

    async fn tag_image(&self, image: &str, tag: &ImageTag) -> Result<()>;
}

/// Repository and tag an image is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTag {
    /// Repository (e.g., "ghcr.io/org/app", "localhost:5000/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1.0")
    pub tag: String,
}

impl ImageTag {
    /// Parse `repository[:tag]`.
    ///
    /// The tag is whatever follows the last `:` after the last `/`, so
    /// registry ports are not mistaken for tags. Defaults to `latest`.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(KilnError::ConfigError("Empty image tag".to_string()));
        }

        let name_start = reference.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match reference[name_start..].rfind(':') {
            Some(colon) => {
                let colon = name_start + colon;
                (&reference[..colon], &reference[colon + 1..])
            }
            None => (reference, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(KilnError::ConfigError(format!(
                "Invalid image tag '{}'",
                reference
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
