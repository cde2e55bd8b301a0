// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Asynchronous DMA engine.
//!
//! Transfers are queued on a channel and executed in order by a dedicated
//! worker thread. Issuing a transfer returns a [`TransferHandle`]
//! immediately; the copy is only guaranteed to be visible after
//! [`TransferHandle::wait`] returns.
//!
//! ```text
//!  read(dst, src, n) ──► [ job queue ] ──► dma worker ──► completion
//!        │                                                   │
//!        └──── TransferHandle ───────── wait() ◄─────────────┘
//! ```
//!
//! Reads move data off-chip → on-chip/scratch, writes the other way.

use crate::{Address, Tier, Tiers, TransferError, TransferStats};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Direction of a transfer relative to the off-chip tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Off-chip → on-chip or scratch.
    Read,
    /// On-chip or scratch → off-chip.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

// ── Completion ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Completion {
    state: Mutex<Option<Result<(), TransferError>>>,
    ready: Condvar,
}

impl Completion {
    fn finish(&self, result: Result<(), TransferError>) {
        if let Ok(mut state) = self.state.lock() {
            *state = Some(result);
        }
        self.ready.notify_all();
    }
}

/// Handle to an issued transfer.
///
/// Dropping a handle does not cancel the transfer.
#[derive(Clone)]
pub struct TransferHandle {
    id: u64,
    direction: Direction,
    len: usize,
    completion: Arc<Completion>,
    stats: Arc<Mutex<TransferStats>>,
}

impl TransferHandle {
    /// Sequence number assigned at issue time.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` once the worker has finished the transfer.
    pub fn is_complete(&self) -> bool {
        self.completion
            .state
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(true)
    }

    /// Blocks until the transfer finishes and returns its outcome.
    ///
    /// Waiting more than once is allowed and returns the same outcome.
    pub fn wait(&self) -> Result<(), TransferError> {
        let mut state = self
            .completion
            .state
            .lock()
            .map_err(|_| TransferError::Disconnected)?;
        let blocked = state.is_none();
        while state.is_none() {
            state = self
                .completion
                .ready
                .wait(state)
                .map_err(|_| TransferError::Disconnected)?;
        }
        let outcome = state.clone().unwrap_or(Err(TransferError::Disconnected));
        drop(state);

        if let Ok(mut stats) = self.stats.lock() {
            stats.waits += 1;
            if blocked {
                stats.blocking_waits += 1;
            }
        }
        outcome
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("len", &self.len)
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────

struct Job {
    id: u64,
    direction: Direction,
    dst: Address,
    src: Address,
    len: usize,
    completion: Arc<Completion>,
}

/// Queue-backed DMA engine over a set of tier memories.
pub struct TransferEngine {
    tiers: Tiers,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    stats: Arc<Mutex<TransferStats>>,
}

impl TransferEngine {
    /// Starts the DMA worker over `tiers`.
    pub fn spawn(tiers: Tiers) -> Result<Self, TransferError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let stats = Arc::new(Mutex::new(TransferStats::default()));

        let worker_tiers = tiers.clone();
        let worker_stats = Arc::clone(&stats);
        let worker = std::thread::Builder::new()
            .name("dma".into())
            .spawn(move || {
                for job in receiver {
                    let result = execute(&worker_tiers, &job);
                    if let Ok(mut stats) = worker_stats.lock() {
                        match (&result, job.direction) {
                            (Ok(()), Direction::Read) => stats.reads += 1,
                            (Ok(()), Direction::Write) => stats.writes += 1,
                            (Err(_), _) => stats.failures += 1,
                        }
                        if result.is_ok() {
                            stats.bytes_moved += job.len as u64;
                        }
                    }
                    if let Err(e) = &result {
                        tracing::warn!("transfer #{} failed: {e}", job.id);
                    }
                    job.completion.finish(result);
                }
                tracing::debug!("dma worker exiting");
            })
            .map_err(|e| TransferError::Spawn(e.to_string()))?;

        tracing::debug!(
            "transfer engine started (scratch={} B, on-chip={} B, off-chip={} B)",
            tiers.scratch.len(),
            tiers.onchip.len(),
            tiers.offchip.len()
        );

        Ok(Self {
            tiers,
            sender: Some(sender),
            worker: Some(worker),
            next_id: AtomicU64::new(0),
            stats,
        })
    }

    /// Issues an off-chip → on-chip/scratch copy of `len` bytes.
    pub fn read(&self, dst: Address, src: Address, len: usize) -> Result<TransferHandle, TransferError> {
        self.issue(Direction::Read, dst, src, len)
    }

    /// Issues an on-chip/scratch → off-chip copy of `len` bytes.
    pub fn write(&self, dst: Address, src: Address, len: usize) -> Result<TransferHandle, TransferError> {
        self.issue(Direction::Write, dst, src, len)
    }

    /// Issues a read and waits for it.
    pub fn read_blocking(&self, dst: Address, src: Address, len: usize) -> Result<(), TransferError> {
        self.read(dst, src, len)?.wait()
    }

    /// Issues a write and waits for it.
    pub fn write_blocking(&self, dst: Address, src: Address, len: usize) -> Result<(), TransferError> {
        self.write(dst, src, len)?.wait()
    }

    /// The tier memories this engine moves data between.
    pub fn tiers(&self) -> &Tiers {
        &self.tiers
    }

    /// Snapshot of the transfer counters.
    pub fn stats(&self) -> TransferStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn issue(
        &self,
        direction: Direction,
        dst: Address,
        src: Address,
        len: usize,
    ) -> Result<TransferHandle, TransferError> {
        if len == 0 {
            return Err(TransferError::ZeroLength);
        }
        let src_tier = self.tiers.resolve(src)?.tier();
        let dst_tier = self.tiers.resolve(dst)?.tier();
        let valid = match direction {
            Direction::Read => src_tier == Tier::OffChip && dst_tier != Tier::OffChip,
            Direction::Write => src_tier != Tier::OffChip && dst_tier == Tier::OffChip,
        };
        if !valid {
            return Err(TransferError::InvalidDirection { direction, src, dst });
        }
        // Bounds are checked here so a bad request fails at the call site.
        self.tiers.get(src_tier).offset_of(src, len)?;
        self.tiers.get(dst_tier).offset_of(dst, len)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let completion = Arc::new(Completion::default());
        let job = Job {
            id,
            direction,
            dst,
            src,
            len,
            completion: Arc::clone(&completion),
        };
        tracing::trace!("transfer #{id} {direction}: {len} B {src} -> {dst}");

        self.sender
            .as_ref()
            .ok_or(TransferError::Disconnected)?
            .send(job)
            .map_err(|_| TransferError::Disconnected)?;

        Ok(TransferHandle {
            id,
            direction,
            len,
            completion,
            stats: Arc::clone(&self.stats),
        })
    }
}

fn execute(tiers: &Tiers, job: &Job) -> Result<(), TransferError> {
    let data = tiers.resolve(job.src)?.read(job.src, job.len)?;
    tiers.resolve(job.dst)?.write(job.dst, &data)
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued jobs and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("dma worker panicked");
            }
        }
    }
}

impl fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field("tiers", &self.tiers)
            .field("issued", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TransferEngine {
        TransferEngine::spawn(Tiers::new(64, 256, 1024).unwrap()).unwrap()
    }

    #[test]
    fn test_read_then_wait() {
        let dma = engine();
        let off = dma.tiers().offchip.address_of(32);
        let on = dma.tiers().onchip.address_of(0);
        dma.tiers().offchip.write(off, &[9, 8, 7, 6]).unwrap();

        let handle = dma.read(on, off, 4).unwrap();
        handle.wait().unwrap();
        assert!(handle.is_complete());
        assert_eq!(dma.tiers().onchip.read(on, 4).unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_write_from_scratch() {
        let dma = engine();
        let scratch = dma.tiers().scratch.base();
        let off = dma.tiers().offchip.address_of(100);
        dma.tiers().scratch.write(scratch, &[1, 2, 3]).unwrap();

        dma.write_blocking(off, scratch, 3).unwrap();
        assert_eq!(dma.tiers().offchip.read(off, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(dma.stats().writes, 1);
    }

    #[test]
    fn test_jobs_run_in_order() {
        let dma = engine();
        let on = dma.tiers().onchip.base();
        let off = dma.tiers().offchip.base();
        dma.tiers().onchip.write(on, &[1; 8]).unwrap();

        let first = dma.write(off, on, 8).unwrap();
        let second = dma.read(on.add(8), off, 8).unwrap();
        second.wait().unwrap();
        assert!(first.is_complete());
        assert_eq!(dma.tiers().onchip.read(on.add(8), 8).unwrap(), vec![1; 8]);
    }

    #[test]
    fn test_invalid_direction() {
        let dma = engine();
        let on = dma.tiers().onchip.base();
        let scratch = dma.tiers().scratch.base();
        assert!(matches!(
            dma.read(on, scratch, 4),
            Err(TransferError::InvalidDirection { .. })
        ));
        let off = dma.tiers().offchip.base();
        assert!(matches!(
            dma.write(on, off, 4),
            Err(TransferError::InvalidDirection { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_requests() {
        let dma = engine();
        let on = dma.tiers().onchip.base();
        let off = dma.tiers().offchip.base();
        assert_eq!(dma.read(on, off, 0).unwrap_err(), TransferError::ZeroLength);
        assert!(matches!(
            dma.read(on, off, 512),
            Err(TransferError::OutOfBounds { tier: Tier::OnChip, .. })
        ));
        assert!(matches!(
            dma.read(Address::NULL, off, 4),
            Err(TransferError::Unmapped { .. })
        ));
    }

    #[test]
    fn test_wait_twice_counts_waits() {
        let dma = engine();
        let handle = dma
            .read(dma.tiers().onchip.base(), dma.tiers().offchip.base(), 16)
            .unwrap();
        handle.wait().unwrap();
        handle.wait().unwrap();
        let stats = dma.stats();
        assert_eq!(stats.waits, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_moved, 16);
    }

    #[test]
    fn test_drop_drains_queue() {
        let tiers = Tiers::new(0, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        tiers.offchip.fill(tiers.offchip.base(), 64, 5).unwrap();
        let _pending = dma.read(tiers.onchip.base(), tiers.offchip.base(), 64).unwrap();
        drop(dma);
        assert_eq!(tiers.onchip.read(tiers.onchip.base(), 64).unwrap(), vec![5; 64]);
    }
}
