//! Build context: the source files COPY and ADD read from.

use std::path::{Component, Path, PathBuf};

use kiln_core::error::{KilnError, Result};

/// A file taken from the build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Path relative to the resolved source (the file name for a single file)
    pub path: PathBuf,
    /// File content
    pub data: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

/// What a build-context path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextItem {
    /// A single regular file
    File(ContextFile),
    /// A directory and every regular file below it
    Directory(Vec<ContextFile>),
}

/// Provider of build-context files.
pub trait BuildContext: Send + Sync {
    /// Resolve a context-relative path; `None` if it does not exist.
    fn resolve(&self, path: &str) -> Result<Option<ContextItem>>;

    /// Content of a regular file; `None` if missing or not a file.
    fn get_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.resolve(path)? {
            Some(ContextItem::File(file)) => Ok(Some(file.data)),
            _ => Ok(None),
        }
    }
}

/// Build context backed by a directory on the host.
#[derive(Debug, Clone)]
pub struct DirContext {
    root: PathBuf,
}

impl DirContext {
    pub fn new(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(KilnError::ContextError(format!(
                "Build context '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BuildContext for DirContext {
    fn resolve(&self, path: &str) -> Result<Option<ContextItem>> {
        let relative = clean_relative(path)?;
        let full = self.root.join(&relative);

        if full.is_file() {
            let file = read_context_file(&full, file_name_of(&relative, path))?;
            return Ok(Some(ContextItem::File(file)));
        }

        if !full.is_dir() {
            return Ok(None);
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&full).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                KilnError::ContextError(format!(
                    "Failed to walk {}: {}",
                    full.display(),
                    e
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .strip_prefix(&full)
                .map_err(|e| {
                    KilnError::ContextError(format!(
                        "Failed to compute relative path for {}: {}",
                        entry.path().display(),
                        e
                    ))
                })?
                .to_path_buf();
            files.push(read_context_file(entry.path(), name)?);
        }

        Ok(Some(ContextItem::Directory(files)))
    }
}

/// Normalise a context path lexically, refusing to leave the context root.
fn clean_relative(path: &str) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(KilnError::ContextError(format!(
                        "Path escapes the build context: {}",
                        path
                    )));
                }
            }
            Component::Prefix(_) => {
                return Err(KilnError::ContextError(format!(
                    "Unsupported path in build context: {}",
                    path
                )))
            }
        }
    }
    Ok(clean)
}

fn file_name_of(relative: &Path, original: &str) -> PathBuf {
    relative
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(original))
}

fn read_context_file(full: &Path, name: PathBuf) -> Result<ContextFile> {
    let data = std::fs::read(full).map_err(|e| {
        KilnError::ContextError(format!("Failed to read {}: {}", full.display(), e))
    })?;
    let metadata = std::fs::metadata(full)?;
    Ok(ContextFile {
        path: name,
        data,
        mode: file_mode(&metadata),
    })
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
