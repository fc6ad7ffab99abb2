//! Test doubles shared by the engine's unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use kiln_core::config::{ContainerLimits, VolumeMount};
use kiln_core::error::{KilnError, Result};

use crate::build_context::{BuildContext, ContextFile, ContextItem};
use crate::client::{Client, ImageTag, OutputStream};
use crate::command::Command;
use crate::context::CommitConfig;
use crate::instruction::{Instruction, LineContext};

pub fn command(keyword: &str, value: &str) -> Command {
    command_with(keyword, value, LineContext::default())
}

pub fn command_with(keyword: &str, value: &str, context: LineContext) -> Command {
    Command::from_instruction(&Instruction::new(keyword, value), context)
        .unwrap_or_else(|| panic!("unknown keyword {}", keyword))
}

/// Paths of the file entries in a tar archive.
pub fn archive_entries(data: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(data);
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub container: String,
    pub cmd: String,
    pub envs: HashMap<String, String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub container: String,
    pub config: CommitConfig,
    pub author: Option<String>,
    pub message: String,
    pub tags: Vec<ImageTag>,
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetImage(String),
    PullImage(String),
    RunContainer {
        image: String,
        infinite_command: String,
        volumes: Vec<VolumeMount>,
        limits: ContainerLimits,
        container: String,
    },
    Execute(Execution),
    PutArchive {
        container: String,
        path: String,
        data: Vec<u8>,
    },
    Stop(String),
    Remove(String),
    Commit(Commit),
    Tag {
        image: String,
        tag: ImageTag,
    },
}

/// Client that records every call and simulates a container runtime.
#[derive(Default)]
pub struct MockClient {
    calls: Mutex<Vec<Call>>,
    images: Mutex<HashMap<String, String>>,
    output: Vec<String>,
    fail_on: Option<String>,
    fail_remove: bool,
    next_id: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `reference` resolve to `id` without pulling.
    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), id.to_string());
        self
    }

    /// Chunks every non-mkdir command prints.
    pub fn with_output(mut self, chunks: &[&str]) -> Self {
        self.output = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Commands containing `pattern` fail after printing their output.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executions().into_iter().map(|e| e.cmd).collect()
    }

    pub fn archives(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PutArchive { path, data, .. } => Some((path, data)),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Commit(commit) => Some(commit),
                _ => None,
            })
            .collect()
    }

    /// Images the containers were created from, in order.
    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RunContainer { image, .. } => Some(image),
                _ => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Remove(container) => Some(container),
                _ => None,
            })
            .collect()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PullImage(reference) => Some(reference),
                _ => None,
            })
            .collect()
    }

    pub fn tagged(&self) -> Vec<(String, ImageTag)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Tag { image, tag } => Some((image, tag)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn get_image(&self, reference: &str) -> Result<Option<String>> {
        self.record(Call::GetImage(reference.to_string()));
        Ok(self.images.lock().unwrap().get(reference).cloned())
    }

    async fn pull_image(&self, reference: &str) -> Result<Option<String>> {
        self.record(Call::PullImage(reference.to_string()));
        let id = format!("sha256:pulled-{}", reference);
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), id.clone());
        Ok(Some(id))
    }

    async fn run_container_infinitely(
        &self,
        image: &str,
        infinite_command: &str,
        volumes: &[VolumeMount],
        container_limits: &ContainerLimits,
    ) -> Result<String> {
        let container = format!("container{}", self.next());
        self.record(Call::RunContainer {
            image: image.to_string(),
            infinite_command: infinite_command.to_string(),
            volumes: volumes.to_vec(),
            limits: container_limits.clone(),
            container: container.clone(),
        });
        Ok(container)
    }

    async fn execute(
        &self,
        container: &str,
        cmd: &str,
        envs: &HashMap<String, String>,
        user: Option<&str>,
    ) -> Result<OutputStream> {
        self.record(Call::Execute(Execution {
            container: container.to_string(),
            cmd: cmd.to_string(),
            envs: envs.clone(),
            user: user.map(str::to_string),
        }));

        if cmd.starts_with("mkdir -p ") {
            return Ok(futures::stream::empty::<Result<Bytes>>().boxed());
        }

        let mut items: Vec<Result<Bytes>> = self
            .output
            .iter()
            .map(|chunk| Ok(Bytes::from(chunk.clone())))
            .collect();
        if self.fail_on.as_deref().is_some_and(|p| cmd.contains(p)) {
            items.push(Err(KilnError::client(
                "execute",
                format!("'{}' exited with code 1", cmd),
            )));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn put_archive(&self, container: &str, path: &str, data: Vec<u8>) -> Result<()> {
        self.record(Call::PutArchive {
            container: container.to_string(),
            path: path.to_string(),
            data,
        });
        Ok(())
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        self.record(Call::Stop(container.to_string()));
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.record(Call::Remove(container.to_string()));
        if self.fail_remove {
            return Err(KilnError::client("remove_container", "container is busy"));
        }
        Ok(())
    }

    async fn commit_container(
        &self,
        container: &str,
        conf: &CommitConfig,
        author: Option<&str>,
        message: &str,
        tags: &[ImageTag],
    ) -> Result<String> {
        let image_id = format!("sha256:image{}", self.next());
        self.record(Call::Commit(Commit {
            container: container.to_string(),
            config: conf.clone(),
            author: author.map(str::to_string),
            message: message.to_string(),
            tags: tags.to_vec(),
            image_id: image_id.clone(),
        }));
        Ok(image_id)
    }

    async fn tag_image(&self, image: &str, tag: &ImageTag) -> Result<()> {
        self.record(Call::Tag {
            image: image.to_string(),
            tag: tag.clone(),
        });
        Ok(())
    }
}

/// Build context held in memory, keyed by `/`-separated relative paths.
#[derive(Debug, Default)]
pub struct MemoryContext {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.with_bytes(path, content.as_bytes().to_vec())
    }

    pub fn with_bytes(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }
}

impl BuildContext for MemoryContext {
    fn resolve(&self, path: &str) -> Result<Option<ContextItem>> {
        let path = path
            .trim_start_matches("./")
            .trim_start_matches('/')
            .trim_end_matches('/');

        if let Some(data) = self.files.get(path) {
            let name = path.rsplit('/').next().unwrap_or(path);
            return Ok(Some(ContextItem::File(ContextFile {
                path: PathBuf::from(name),
                data: data.clone(),
                mode: 0o644,
            })));
        }

        let prefix = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("{}/", path)
        };
        let files: Vec<ContextFile> = self
            .files
            .iter()
            .filter_map(|(name, data)| {
                name.strip_prefix(&prefix).map(|rest| ContextFile {
                    path: PathBuf::from(rest),
                    data: data.clone(),
                    mode: 0o644,
                })
            })
            .collect();

        if files.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ContextItem::Directory(files)))
        }
    }
}
