//! Content assembly: the ordered file list a tick hands to the git worker.
//!
//! Sources are concatenated in a fixed total order — literal files, then
//! resource-ref outputs, then REST outputs, each in declaration order — and
//! merged per path. Literal files always overwrite; extracted and REST
//! entries carry the write mode of the entry that produced them. On a
//! collision the later entry's mode is applied against the accumulated
//! content, and the merged entry keeps the mode that governs how it meets
//! the checkout on disk.

use crate::Error;
use crate::api::{FileSpec, WriteMode};

/// One assembled file, ready for the git worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Repository-relative path.
    pub path: String,
    /// Content bytes.
    pub content: Vec<u8>,
    /// How the file meets an existing file in the checkout.
    pub mode: WriteMode,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode,
        }
    }
}

/// Reject paths that could escape the checkout: empty, absolute, or
/// containing a `..` segment after normalization.
pub fn ensure_safe_path(path: &str) -> Result<(), Error> {
    let unsafe_path = |why: &str| {
        Err(Error::Validation(format!("unsafe path {path:?}: {why}")))
    };

    if path.trim().is_empty() {
        return unsafe_path("empty");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return unsafe_path("absolute");
    }
    if path.contains('\\') {
        return unsafe_path("backslash separator");
    }
    // Windows drive prefixes never describe a repository-relative file.
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return unsafe_path("drive prefix");
    }
    for segment in path.split('/') {
        if segment == ".." {
            return unsafe_path("parent traversal");
        }
    }
    Ok(())
}

/// Merge the three source streams into the assembled file list.
///
/// Every path is safety-checked, including paths produced by extraction
/// rather than written by the user.
pub fn assemble(
    literals: &[FileSpec],
    extracted: Vec<FileEntry>,
    rest: Vec<FileEntry>,
) -> Result<Vec<FileEntry>, Error> {
    let mut ordered: Vec<FileEntry> = Vec::new();
    let mut by_path: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    let literal_entries = literals
        .iter()
        .map(|f| FileEntry::new(f.path.clone(), f.content.clone().into_bytes(), WriteMode::Overwrite));

    for entry in literal_entries.chain(extracted).chain(rest) {
        ensure_safe_path(&entry.path)?;
        match by_path.get(&entry.path) {
            None => {
                by_path.insert(entry.path.clone(), ordered.len());
                ordered.push(entry);
            }
            Some(&idx) => merge_into(&mut ordered[idx], entry),
        }
    }

    Ok(ordered)
}

/// Append `addition` to `content`, inserting a single newline separator when
/// the existing content does not already end with one.
pub fn append_with_separator(content: &mut Vec<u8>, addition: &[u8]) {
    if !content.is_empty() && !content.ends_with(b"\n") {
        content.push(b'\n');
    }
    content.extend_from_slice(addition);
}

fn merge_into(existing: &mut FileEntry, later: FileEntry) {
    match later.mode {
        WriteMode::Overwrite => {
            existing.content = later.content;
            existing.mode = WriteMode::Overwrite;
        }
        WriteMode::Append => {
            append_with_separator(&mut existing.content, &later.content);
        }
    }
}
