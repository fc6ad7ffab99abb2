//! Moving files into build containers.

use std::collections::HashMap;
use std::path::PathBuf;

use futures::StreamExt;
use kiln_core::error::{KilnError, Result};

use crate::archive::pack_files;
use crate::build_context::{BuildContext, ContextItem};
use crate::client::Client;

/// Resolve `path` against `workdir` and normalise it lexically.
///
/// The result is absolute, has no `.` or `..` components, no duplicate or
/// trailing slashes, and never climbs above `/`.
pub fn norm_path_with_workdir(path: &str, workdir: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("/{}", parts.join("/"))
}

/// Create `path` (and its parents) inside the container.
pub async fn create_directory(client: &dyn Client, container: &str, path: &str) -> Result<()> {
    let cmd = format!("mkdir -p {}", shell_words::quote(path));
    drain(client, container, &cmd).await
}

async fn drain(client: &dyn Client, container: &str, cmd: &str) -> Result<()> {
    let mut output = client.execute(container, cmd, &HashMap::new(), None).await?;
    while let Some(chunk) = output.next().await {
        chunk?;
    }
    Ok(())
}

/// Destination of a COPY or ADD instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    /// Normalised absolute destination path
    pub path: String,
    /// Sources land inside `path` rather than replacing it
    pub into_dir: bool,
}

impl CopyTarget {
    /// `target` as written in the instruction, for `source_count` sources.
    pub fn new(target: &str, source_count: usize, workdir: &str) -> Self {
        let path = norm_path_with_workdir(target, workdir);
        let into_dir = target.ends_with('/') || source_count > 1 || path == "/";
        Self { path, into_dir }
    }

    /// Directory containing `path`.
    fn parent(&self) -> String {
        match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        }
    }

    fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Copy one build-context source into the container.
///
/// Directories are copied recursively into the target. A single file is
/// placed inside the target when it is a directory, otherwise it is
/// written as the target itself.
pub async fn copy_to_container(
    client: &dyn Client,
    container: &str,
    build_context: &dyn BuildContext,
    source: &str,
    target: &CopyTarget,
) -> Result<()> {
    let item = build_context.resolve(source)?.ok_or_else(|| {
        KilnError::ContextError(format!("Source not found in build context: {}", source))
    })?;

    let (destination, files) = match item {
        ContextItem::Directory(files) => (target.path.clone(), files),
        ContextItem::File(file) if target.into_dir => (target.path.clone(), vec![file]),
        ContextItem::File(mut file) => {
            file.path = PathBuf::from(target.file_name());
            (target.parent(), vec![file])
        }
    };

    tracing::debug!(
        source,
        destination = %destination,
        files = files.len(),
        "Copying files to container"
    );

    let archive = pack_files(&files)?;
    create_directory(client, container, &destination).await?;
    client.put_archive(container, &destination, archive).await
}

/// Deliver an archive unchanged; the runtime extracts it into the target.
pub async fn put_archive(
    client: &dyn Client,
    container: &str,
    data: Vec<u8>,
    target: &CopyTarget,
) -> Result<()> {
    tracing::debug!(destination = %target.path, size_bytes = data.len(), "Extracting archive in container");
    create_directory(client, container, &target.path).await?;
    client.put_archive(container, &target.path, data).await
}
