//! Blob Store Boundary
//!
//! Project-scoped named text blobs backing the `app.files` capability.
//! Names are flat: no separators, no parent escapes.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::{StoreError, StoreResult};

/// Project-scoped named blobs.
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` when absent.
    fn read(&self, scope: &str, name: &str) -> StoreResult<Option<String>>;

    /// Create or overwrite a blob.
    fn write(&self, scope: &str, name: &str, content: &str) -> StoreResult<()>;

    /// Delete a blob. Returns false when no such blob exists.
    fn remove(&self, scope: &str, name: &str) -> StoreResult<bool>;

    /// All blob names in a scope, sorted.
    fn list(&self, scope: &str) -> StoreResult<Vec<String>>;
}

/// Reject names that could escape the scope directory.
fn validate_name(name: &str) -> StoreResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Blob Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory blob store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    scopes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, scope: &str, name: &str) -> StoreResult<Option<String>> {
        validate_name(name)?;
        Ok(self
            .scopes
            .lock()
            .get(scope)
            .and_then(|blobs| blobs.get(name).cloned()))
    }

    fn write(&self, scope: &str, name: &str, content: &str) -> StoreResult<()> {
        validate_name(name)?;
        self.scopes
            .lock()
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), content.to_string());
        Ok(())
    }

    fn remove(&self, scope: &str, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        Ok(self
            .scopes
            .lock()
            .get_mut(scope)
            .is_some_and(|blobs| blobs.remove(name).is_some()))
    }

    fn list(&self, scope: &str) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .scopes
            .lock()
            .get(scope)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Blob Store
// ─────────────────────────────────────────────────────────────────────────────

/// Blob store laying files out as `root/scope/name`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, scope: &str, name: &str) -> PathBuf {
        self.root.join(scope).join(name)
    }
}

impl BlobStore for LocalBlobStore {
    fn read(&self, scope: &str, name: &str) -> StoreResult<Option<String>> {
        validate_name(name)?;
        match std::fs::read_to_string(self.path(scope, name)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, scope: &str, name: &str, content: &str) -> StoreResult<()> {
        validate_name(name)?;
        std::fs::create_dir_all(self.root.join(scope))?;
        std::fs::write(self.path(scope, name), content)?;
        Ok(())
    }

    fn remove(&self, scope: &str, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        match std::fs::remove_file(self.path(scope, name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, scope: &str) -> StoreResult<Vec<String>> {
        let dir = self.root.join(scope);
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_blobs_roundtrip() {
        let blobs = MemoryBlobStore::new();
        blobs.write("p1", "notes.txt", "hello").unwrap();
        assert_eq!(blobs.read("p1", "notes.txt").unwrap().as_deref(), Some("hello"));
        assert!(blobs.read("p2", "notes.txt").unwrap().is_none());
        assert_eq!(blobs.list("p1").unwrap(), vec!["notes.txt"]);
        assert!(blobs.remove("p1", "notes.txt").unwrap());
        assert!(!blobs.remove("p1", "notes.txt").unwrap());
    }

    #[test]
    fn names_cannot_escape_the_scope() {
        let blobs = MemoryBlobStore::new();
        assert!(matches!(
            blobs.write("p1", "../escape", "x"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            blobs.read("p1", "a/b"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            blobs.write("p1", "", "x"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn local_blobs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        blobs.write("p1", "a.txt", "one").unwrap();
        blobs.write("p1", "b.txt", "two").unwrap();
        assert_eq!(blobs.read("p1", "a.txt").unwrap().as_deref(), Some("one"));
        assert_eq!(blobs.list("p1").unwrap(), vec!["a.txt", "b.txt"]);
        assert!(blobs.remove("p1", "a.txt").unwrap());
        assert_eq!(blobs.list("p1").unwrap(), vec!["b.txt"]);
    }
}
