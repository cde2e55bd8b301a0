// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Named blob stores for weights and input images.
//!
//! Three backends implement [`BlobStore`]:
//!
//! 1. [`DirectoryBlobs`]: one `<key>.bin` file per blob, memory-mapped on
//!    load.
//! 2. [`SafeTensorBlobs`]: a single `model.safetensors` file, memory-mapped
//!    once; each tensor is one blob.
//! 3. [`MemoryBlobs`]: an in-memory map, for tests and synthetic models.
//!
//! At setup every blob is copied into the off-chip pool through a small
//! on-chip frame, `transfer_chunk` bytes at a time ([`stage_blob`]).

use crate::checksum::byte_sum;
use crate::RuntimeError;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use transfer_engine::{Address, TransferEngine};

/// Default SafeTensors filename inside a model directory.
pub const SAFETENSORS_FILE: &str = "model.safetensors";

/// Bytes of one blob, either mapped, borrowed from a mapped container or
/// owned.
pub enum Blob<'a> {
    Mapped(Mmap),
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl Deref for Blob<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Blob::Mapped(m) => m,
            Blob::Borrowed(b) => b,
            Blob::Owned(v) => v,
        }
    }
}

/// A read-only source of named blobs.
pub trait BlobStore: Send + Sync {
    /// Loads the blob stored under `key`.
    fn load(&self, key: &str) -> Result<Blob<'_>, RuntimeError>;

    /// Returns `true` if `key` exists.
    fn contains(&self, key: &str) -> bool;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Opens the blob store of a model directory: `model.safetensors` if it
/// exists, the directory itself otherwise.
pub fn open_store(dir: &Path) -> Result<Box<dyn BlobStore>, RuntimeError> {
    let st = dir.join(SAFETENSORS_FILE);
    if st.exists() {
        Ok(Box::new(SafeTensorBlobs::open(&st)?))
    } else {
        Ok(Box::new(DirectoryBlobs::new(dir)))
    }
}

// ── Directory ──────────────────────────────────────────────────────

/// Blobs stored as `<dir>/<key>.bin`.
#[derive(Debug, Clone)]
pub struct DirectoryBlobs {
    dir: PathBuf,
}

impl DirectoryBlobs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl BlobStore for DirectoryBlobs {
    fn load(&self, key: &str) -> Result<Blob<'_>, RuntimeError> {
        let path = self.path(key);
        let file = File::open(&path)
            .map_err(|e| RuntimeError::blob(key, format!("cannot open '{}': {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| RuntimeError::blob(key, format!("cannot stat '{}': {e}", path.display())))?
            .len();
        if len == 0 {
            return Ok(Blob::Owned(Vec::new()));
        }
        // SAFETY: the file is opened read-only and model files are not
        // modified while the runtime holds them.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| RuntimeError::blob(key, format!("mmap failed: {e}")))?;
        tracing::trace!("mapped '{}' ({len} B)", path.display());
        Ok(Blob::Mapped(mmap))
    }

    fn contains(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

// ── SafeTensors ────────────────────────────────────────────────────

/// Blobs stored as tensors of one SafeTensors file.
pub struct SafeTensorBlobs {
    path: PathBuf,
    mmap: Mmap,
}

impl SafeTensorBlobs {
    /// Maps `path` and checks that its header parses.
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        let key = SAFETENSORS_FILE;
        let file = File::open(path)
            .map_err(|e| RuntimeError::blob(key, format!("cannot open '{}': {e}", path.display())))?;
        // SAFETY: see `DirectoryBlobs::load`.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| RuntimeError::blob(key, format!("mmap failed: {e}")))?;
        let count = safetensors::SafeTensors::deserialize(&mmap)
            .map_err(|e| RuntimeError::blob(key, format!("SafeTensors parse error: {e}")))?
            .names()
            .len();
        tracing::info!(
            "blob store: mmap'd {} ({count} tensors, {:.2} MB)",
            path.display(),
            mmap.len() as f64 / (1024.0 * 1024.0),
        );
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    fn tensors(&self) -> Result<safetensors::SafeTensors<'_>, RuntimeError> {
        safetensors::SafeTensors::deserialize(&self.mmap)
            .map_err(|e| RuntimeError::blob(SAFETENSORS_FILE, format!("SafeTensors parse error: {e}")))
    }
}

impl BlobStore for SafeTensorBlobs {
    fn load(&self, key: &str) -> Result<Blob<'_>, RuntimeError> {
        let view = self
            .tensors()?
            .tensor(key)
            .map_err(|e| RuntimeError::blob(key, format!("tensor not found: {e}")))?;
        Ok(Blob::Borrowed(view.data()))
    }

    fn contains(&self, key: &str) -> bool {
        self.tensors().is_ok_and(|st| st.tensor(key).is_ok())
    }

    fn describe(&self) -> String {
        format!("safetensors {}", self.path.display())
    }
}

impl std::fmt::Debug for SafeTensorBlobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeTensorBlobs")
            .field("path", &self.path)
            .field("bytes", &self.mmap.len())
            .finish()
    }
}

// ── Memory ─────────────────────────────────────────────────────────

/// Blobs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobs {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a blob.
    pub fn insert(&mut self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.insert(key.into(), bytes);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(key, bytes);
        self
    }

    /// Mutable access to a blob, for corrupting fixtures in tests.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Vec<u8>> {
        self.blobs.get_mut(key)
    }
}

impl BlobStore for MemoryBlobs {
    fn load(&self, key: &str) -> Result<Blob<'_>, RuntimeError> {
        self.blobs
            .get(key)
            .map(|b| Blob::Borrowed(b.as_slice()))
            .ok_or_else(|| RuntimeError::blob(key, "not in memory store"))
    }

    fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    fn describe(&self) -> String {
        format!("memory ({} blobs)", self.blobs.len())
    }
}

// ── Staging ────────────────────────────────────────────────────────

/// Copies blob `key` to off-chip address `dst` through the on-chip `frame`,
/// `chunk` bytes per transfer. Returns the byte sum of the blob.
pub fn stage_blob(
    store: &dyn BlobStore,
    key: &str,
    expected_len: usize,
    dst: Address,
    dma: &TransferEngine,
    frame: Address,
    chunk: usize,
) -> Result<i64, RuntimeError> {
    let blob = store.load(key)?;
    if blob.len() != expected_len {
        return Err(RuntimeError::blob(
            key,
            format!("expected {expected_len} bytes, store holds {}", blob.len()),
        ));
    }
    let frame_memory = dma.tiers().resolve(frame)?;
    let chunk = chunk.max(1);
    for (k, piece) in blob.chunks(chunk).enumerate() {
        frame_memory.write(frame, piece)?;
        dma.write_blocking(dst.add(k * chunk), frame, piece.len())?;
    }
    tracing::trace!("staged blob '{key}' ({expected_len} B) at {dst}");
    Ok(byte_sum(&blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_engine::Tiers;

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conv0.bin"), [1u8, 2, 3]).unwrap();
        std::fs::write(dir.path().join("empty.bin"), []).unwrap();

        let store = DirectoryBlobs::new(dir.path());
        assert!(store.contains("conv0"));
        assert!(!store.contains("conv1"));
        assert_eq!(&*store.load("conv0").unwrap(), &[1, 2, 3]);
        assert!(store.load("empty").unwrap().is_empty());
        assert!(matches!(store.load("conv1"), Err(RuntimeError::Blob { .. })));
    }

    #[test]
    fn test_safetensors_store() {
        use safetensors::tensor::TensorView;
        use safetensors::Dtype;

        let dir = tempfile::tempdir().unwrap();
        let w0 = vec![9u8; 12];
        let w1 = vec![4u8; 5];
        let bytes = safetensors::serialize(
            [
                ("conv0", TensorView::new(Dtype::U8, vec![12], &w0).unwrap()),
                ("fc", TensorView::new(Dtype::U8, vec![5], &w1).unwrap()),
            ],
            &None,
        )
        .unwrap();
        std::fs::write(dir.path().join(SAFETENSORS_FILE), bytes).unwrap();

        let store = open_store(dir.path()).unwrap();
        assert!(store.describe().starts_with("safetensors"));
        assert!(store.contains("fc"));
        assert_eq!(&*store.load("conv0").unwrap(), w0.as_slice());
        assert_eq!(&*store.load("fc").unwrap(), w1.as_slice());
        assert!(store.load("missing").is_err());
    }

    #[test]
    fn test_open_store_falls_back_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        assert!(store.describe().starts_with("directory"));
    }

    #[test]
    fn test_stage_blob_in_chunks() {
        let tiers = Tiers::new(16, 64, 256).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let data: Vec<u8> = (0..50).collect();
        let store = MemoryBlobs::new().with("w", data.clone());

        let dst = tiers.offchip.address_of(8);
        let sum = stage_blob(&store, "w", 50, dst, &dma, tiers.onchip.base(), 16).unwrap();
        assert_eq!(sum, byte_sum(&data));
        assert_eq!(tiers.offchip.read(dst, 50).unwrap(), data);
        assert_eq!(dma.stats().writes, 4);
    }

    #[test]
    fn test_stage_blob_length_mismatch() {
        let tiers = Tiers::new(16, 64, 256).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let store = MemoryBlobs::new().with("w", vec![0; 10]);
        let err = stage_blob(&store, "w", 12, tiers.offchip.base(), &dma, tiers.onchip.base(), 16)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Blob { .. }));
    }
}
