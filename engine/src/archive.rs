//! Tar archives exchanged with the container runtime.

use std::io::Read;

use flate2::read::GzDecoder;
use kiln_core::error::{KilnError, Result};

use crate::build_context::ContextFile;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Pack files into an uncompressed tar archive held in memory.
///
/// Entries keep their modes; mtimes are zeroed so identical inputs give
/// identical archives.
pub fn pack_files(files: &[ContextFile]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.data.len() as u64);
        header.set_mode(file.mode);
        header.set_mtime(0);
        builder
            .append_data(&mut header, &file.path, file.data.as_slice())
            .map_err(|e| {
                KilnError::ArchiveError(format!(
                    "Failed to add {} to archive: {}",
                    file.path.display(),
                    e
                ))
            })?;
    }

    builder
        .into_inner()
        .map_err(|e| KilnError::ArchiveError(format!("Failed to finalize archive: {}", e)))
}

/// Whether `data` is a tar archive, plain or gzip-compressed.
///
/// An archive must contain at least one readable entry.
pub fn is_archive(data: &[u8]) -> bool {
    if data.starts_with(&GZIP_MAGIC) {
        has_tar_entry(GzDecoder::new(data))
    } else {
        has_tar_entry(data)
    }
}

fn has_tar_entry<R: Read>(reader: R) -> bool {
    let mut archive = tar::Archive::new(reader);
    let mut entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    let readable = matches!(entries.next(), Some(Ok(ref entry)) if entry.path().is_ok());
    readable
}
