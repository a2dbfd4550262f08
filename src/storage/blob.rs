//! Content-addressed blob storage.
//!
//! Database snapshots and licence texts are stored as opaque byte blobs keyed
//! by the SHA256 of their content. The git-backed implementation keeps the
//! bytes in a bare repository's object database and records the SHA256 key as
//! a ref (`refs/snapshots/{sha256}`) pointing at the git blob.

use std::path::Path;

use git2::{ErrorCode, Oid, Repository};
use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::ContentHash;

/// Content-addressed storage for snapshot and licence bytes.
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their SHA256. Storing the same bytes twice is a no-op.
    fn store(&self, bytes: &[u8]) -> StorageResult<ContentHash>;

    /// Fetch the bytes stored under a digest.
    fn fetch(&self, sha: &ContentHash) -> StorageResult<Vec<u8>>;

    /// Byte length of a stored blob.
    fn size(&self, sha: &ContentHash) -> StorageResult<u64>;

    /// Check whether a digest is present.
    fn contains(&self, sha: &ContentHash) -> StorageResult<bool>;
}

/// Blob store backed by a bare git repository.
///
/// `git2::Repository` is not `Sync`, so access goes through a mutex.
pub struct GitBlobStore {
    repo: Mutex<Repository>,
}

impl GitBlobStore {
    const REF_PREFIX: &'static str = "refs/snapshots/";

    /// Open an existing bare repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path)?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    /// Initialize a new bare repository.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init_bare(path)?;
        tracing::debug!("initialized blob store at {}", path.display());
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn ref_name(sha: &ContentHash) -> String {
        format!("{}{}", Self::REF_PREFIX, sha)
    }

    /// Resolve a digest to the git object holding its bytes.
    fn lookup(repo: &Repository, sha: &ContentHash) -> StorageResult<Option<Oid>> {
        match repo.find_reference(&Self::ref_name(sha)) {
            Ok(reference) => reference.target().map(Some).ok_or_else(|| StorageError::CorruptedData {
                key: sha.to_string(),
                reason: "snapshot ref is symbolic".to_string(),
            }),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(StorageError::Git(e)),
        }
    }
}

impl BlobStore for GitBlobStore {
    fn store(&self, bytes: &[u8]) -> StorageResult<ContentHash> {
        let sha = ContentHash::of(bytes);
        let repo = self.repo.lock();

        if Self::lookup(&repo, &sha)?.is_some() {
            return Ok(sha);
        }

        let oid = repo.blob(bytes)?;
        repo.reference(&Self::ref_name(&sha), oid, true, "store snapshot")?;
        tracing::debug!(sha = %sha, bytes = bytes.len(), "stored blob");

        Ok(sha)
    }

    fn fetch(&self, sha: &ContentHash) -> StorageResult<Vec<u8>> {
        let repo = self.repo.lock();
        let oid = Self::lookup(&repo, sha)?.ok_or_else(|| StorageError::BlobNotFound(sha.to_string()))?;
        let blob = repo.find_blob(oid)?;
        let bytes = blob.content().to_vec();

        if ContentHash::of(&bytes) != *sha {
            return Err(StorageError::CorruptedData {
                key: sha.to_string(),
                reason: "content does not match its digest".to_string(),
            });
        }

        Ok(bytes)
    }

    fn size(&self, sha: &ContentHash) -> StorageResult<u64> {
        let repo = self.repo.lock();
        let oid = Self::lookup(&repo, sha)?.ok_or_else(|| StorageError::BlobNotFound(sha.to_string()))?;
        let blob = repo.find_blob(oid)?;
        Ok(blob.size() as u64)
    }

    fn contains(&self, sha: &ContentHash) -> StorageResult<bool> {
        let repo = self.repo.lock();
        Ok(Self::lookup(&repo, sha)?.is_some())
    }
}
