use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Whole-document reads and writes.
///
/// There is no locking and no transaction across documents: a caller that
/// writes several documents may stop half way through.
pub trait DocumentStore {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()>;
}

/// Documents on the local file system.
///
/// Writes are atomic (tempfile + fsync + rename) and bump the mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl DocumentStore for FsStore {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        atomic_write(path, contents.as_bytes())?;
        filetime::set_file_mtime(path, filetime::FileTime::now())
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the file is left as it was.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    // Same directory keeps the rename on one filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Documents held in memory, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    documents: BTreeMap<PathBuf, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.documents.insert(path.into(), contents.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.documents.get(path.as_ref()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.documents
            .iter()
            .map(|(path, contents)| (path.as_path(), contents.as_str()))
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.get(path).map(str::to_string).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no document at {}", path.display()),
            )
        })
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        self.insert(path, contents);
        Ok(())
    }
}
