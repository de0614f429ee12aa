//! Extra-file sharing.
//!
//! Posts reference files by hash. A file must be registered here (hashed and
//! offered to peers) before a post that lists it can be published.

use crate::channel::types::{FileHash, FileRef};
use crate::error::{ChansyncError, Result};
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Read buffer used while hashing.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// File-sharing collaborator.
pub trait FileSharing: Send + Sync {
    /// Hashes a local file and starts offering it to peers.
    fn hash_file(&self, path: &Path) -> Result<FileHash>;

    /// Stops offering a file.
    fn remove(&self, hash: &FileHash) -> Result<()>;

    /// Returns true if the file is currently offered.
    fn is_shared(&self, hash: &FileHash) -> bool;

    /// Returns a post file reference for an offered file.
    fn file_ref(&self, hash: &FileHash) -> Option<FileRef>;
}

#[derive(Debug, Clone)]
struct SharedFile {
    path: PathBuf,
    size: u64,
}

/// Shares files straight from the local filesystem.
#[derive(Debug, Default)]
pub struct LocalFileShare {
    shared: RwLock<HashMap<FileHash, SharedFile>>,
}

impl LocalFileShare {
    /// Creates an empty share.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the local path of an offered file.
    pub fn path_of(&self, hash: &FileHash) -> Option<PathBuf> {
        self.shared
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(hash)
            .map(|f| f.path.clone())
    }
}

/// Streams a file through SHA3-256.
pub fn hash_file_contents(path: &Path) -> Result<(FileHash, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_CHUNK_SIZE, file);
    let mut hasher = Sha3_256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    Ok((FileHash::from_bytes(hash), size))
}

impl FileSharing for LocalFileShare {
    fn hash_file(&self, path: &Path) -> Result<FileHash> {
        if !path.is_file() {
            return Err(ChansyncError::validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let (hash, size) = hash_file_contents(path)?;
        self.shared
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                hash,
                SharedFile {
                    path: path.to_path_buf(),
                    size,
                },
            );

        info!(file = %path.display(), hash = %hash, size, "Sharing extra file");
        Ok(hash)
    }

    fn remove(&self, hash: &FileHash) -> Result<()> {
        let removed = self
            .shared
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(hash);
        match removed {
            Some(file) => {
                debug!(hash = %hash, file = %file.path.display(), "Stopped sharing extra file");
                Ok(())
            }
            None => Err(ChansyncError::not_found(format!(
                "File {} is not shared",
                hash
            ))),
        }
    }

    fn is_shared(&self, hash: &FileHash) -> bool {
        self.shared
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(hash)
    }

    fn file_ref(&self, hash: &FileHash) -> Option<FileRef> {
        let shared = self.shared.read().unwrap_or_else(|p| p.into_inner());
        let file = shared.get(hash)?;
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| hash.to_hex());
        Some(FileRef {
            hash: *hash,
            name,
            size: file.size,
        })
    }
}
