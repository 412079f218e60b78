// src/blobstore.rs

//! Attachment Object Store (C3): a flat, content-addressed blob directory
//! keyed by the lowercase hex SHA-256 of the file's bytes.
//!
//! Writes are create-if-absent; the store never mutates or deletes existing
//! blobs outside the explicit purge path (engine::purge). The hash is the
//! only key — there is no manifest and no reference count.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of writing a blob: whether it was already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyExists,
}

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a blob with the given hash would live at, whether or not it
    /// currently exists. Callers must check existence themselves (§4.2).
    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(content_hash)
    }

    pub fn exists(&self, content_hash: &str) -> bool {
        self.path_for(content_hash).is_file()
    }

    /// Hash `source_path`'s contents and copy into the store unless a blob
    /// with that hash already exists. Returns the hash, size, and outcome.
    pub fn put_file(&self, source_path: &Path) -> Result<(String, u64, WriteOutcome)> {
        std::fs::create_dir_all(&self.root)?;

        let (hash, size) = hash_file(source_path)?;
        let dest = self.path_for(&hash);

        if dest.is_file() {
            debug!(hash = %hash, "blob already present, skipping copy");
            return Ok((hash, size, WriteOutcome::AlreadyExists));
        }

        let tmp_path = self.root.join(format!(".{hash}.tmp"));
        std::fs::copy(source_path, &tmp_path)?;
        std::fs::rename(&tmp_path, &dest)?;

        Ok((hash, size, WriteOutcome::Created))
    }

    /// Write raw bytes (e.g. extracted from a package) unless a blob with
    /// the same hash already exists. Used by package import.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<(String, WriteOutcome)> {
        std::fs::create_dir_all(&self.root)?;

        let hash = hash_bytes(bytes);
        let dest = self.path_for(&hash);

        if dest.is_file() {
            return Ok((hash, WriteOutcome::AlreadyExists));
        }

        let tmp_path = self.root.join(format!(".{hash}.tmp"));
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(bytes)?;
        }
        std::fs::rename(&tmp_path, &dest)?;

        Ok((hash, WriteOutcome::Created))
    }

    /// Copy a blob already present in a package scratch directory into the
    /// store, skipping if the hash is already present.
    pub fn put_from_path(&self, content_hash: &str, source_path: &Path) -> Result<WriteOutcome> {
        std::fs::create_dir_all(&self.root)?;

        let dest = self.path_for(content_hash);
        if dest.is_file() {
            return Ok(WriteOutcome::AlreadyExists);
        }

        let tmp_path = self.root.join(format!(".{content_hash}.tmp"));
        std::fs::copy(source_path, &tmp_path)?;
        std::fs::rename(&tmp_path, &dest)?;
        Ok(WriteOutcome::Created)
    }
}

fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn test_put_file_creates_blob_named_by_hash() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("attachments"));

        let src = dir.path().join("log.txt");
        std::fs::write(&src, b"hello world").unwrap();

        let (hash, size, outcome) = store.put_file(&src).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        assert_eq!(size, 11);
        assert_eq!(hash.len(), 64);
        assert!(store.exists(&hash));
    }

    #[test]
    fn test_put_file_dedupes_identical_content() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("attachments"));

        let src_a = dir.path().join("a.txt");
        let src_b = dir.path().join("b.txt");
        std::fs::write(&src_a, b"same bytes").unwrap();
        std::fs::write(&src_b, b"same bytes").unwrap();

        let (hash_a, _, outcome_a) = store.put_file(&src_a).unwrap();
        let (hash_b, _, outcome_b) = store.put_file(&src_b).unwrap();

        assert_eq!(hash_a, hash_b);
        assert_eq!(outcome_a, WriteOutcome::Created);
        assert_eq!(outcome_b, WriteOutcome::AlreadyExists);

        let entries: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_put_bytes_matches_sha256_of_input() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("attachments"));

        let (hash, _) = store.put_bytes(b"hello world").unwrap();
        // Known SHA-256("hello world")
        assert_eq!(hash, "b94d27b9934d3e08a52e52d7da7dacefbc98f3ea884c8cc0e5c5c1bdf5b4abf0");
    }

    #[test]
    fn test_path_for_does_not_require_existence() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("attachments"));
        let path = store.path_for("deadbeef");
        assert!(!path.exists());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "deadbeef");
    }

    #[test]
    fn test_hash_file_handles_larger_input() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("attachments"));
        let src = dir.path().join("big.bin");
        let mut f = std::fs::File::create(&src).unwrap();
        let chunk = vec![7u8; 128 * 1024];
        f.write_all(&chunk).unwrap();
        drop(f);

        let (hash, size, _) = store.put_file(&src).unwrap();
        assert_eq!(size, 128 * 1024);
        assert_eq!(hash.len(), 64);
    }
}
