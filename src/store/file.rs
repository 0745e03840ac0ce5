//! File-based blob store
//!
//! Stores one file per key inside a directory, named by the key's hex digest.
//! Each file is framed as `[crc32 (4 bytes LE)][len (4 bytes LE)][payload]`.
//! Writes go to a temp file first and are renamed into place, so a reader
//! sees either nothing or the whole blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BlobStore, StoreError};
use crate::content::{BlobKey, Payload};

const HEADER_LEN: usize = 8;

/// Simple CRC32 checksum (IEEE polynomial)
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.extend_from_slice(&crc32(payload).to_le_bytes());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Write `framed` to `temp`, flush it to disk and move it to `target`
async fn commit(temp: &Path, framed: &[u8], target: &Path) -> std::io::Result<()> {
    let mut file = fs::File::create(temp).await?;
    file.write_all(framed).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp, target).await
}

fn decode(path: &Path, framed: &[u8]) -> Result<Payload, StoreError> {
    if framed.len() < HEADER_LEN {
        return Err(StoreError::Corruption(format!(
            "{:?}: truncated header ({} bytes)",
            path,
            framed.len()
        )));
    }
    let (header, body) = framed.split_at(HEADER_LEN);
    let stored_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let stored_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    if stored_len != body.len() {
        return Err(StoreError::Corruption(format!(
            "{:?}: length mismatch: header {}, body {}",
            path,
            stored_len,
            body.len()
        )));
    }

    let computed = crc32(body);
    if stored_crc != computed {
        return Err(StoreError::Corruption(format!(
            "{:?}: checksum mismatch: stored {:08x}, computed {:08x}",
            path, stored_crc, computed
        )));
    }

    Ok(Payload::new(body.to_vec()))
}

/// File-based store implementation
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    closed: AtomicBool,
    temp_seq: AtomicU64,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(io_err)?;
        Ok(FileStore {
            dir,
            closed: AtomicBool::new(false),
            temp_seq: AtomicU64::new(0),
        })
    }

    /// Remove `dir` and everything in it; a missing directory is not an error
    pub async fn clear<P: AsRef<Path>>(dir: P) -> Result<(), StoreError> {
        match fs::remove_dir_all(dir.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reject all further operations
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.dir.join(key.to_string())
    }

    fn temp_path(&self, key: &BlobKey) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(".{}.{}.tmp", key, seq))
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        self.check_open()?;
        let temp = self.temp_path(&key);
        let framed = encode(payload.as_bytes());

        let result = commit(&temp, &framed, &self.blob_path(&key)).await;
        if result.is_err() {
            // drop the partial temp file
            let _ = fs::remove_file(&temp).await;
        }
        result.map_err(io_err)
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.check_open()?;
        let path = self.blob_path(key);
        match fs::read(&path).await {
            Ok(framed) => decode(&path, &framed).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
