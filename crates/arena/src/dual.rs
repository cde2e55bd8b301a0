// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Double-ended bump arena with per-side frame stacks.
//!
//! The [`DualArena`] manages a single contiguous on-chip range. Frames are
//! carved from either boundary and grow toward each other:
//!
//! ```text
//!  0                                                        capacity
//!  ├── in0 ──┼── w0 ──┼──► begin          end ◄──┼── w1 ──┼── out0 ──┤
//!  │  begin stack (grows up)   free gap   end stack (grows down)     │
//! ```
//!
//! Each side is a strict LIFO stack: only the most recent frame on a side
//! may be freed. Every free is checked against the frame on top, so a
//! caller that threads the side flag inconsistently gets an error instead
//! of silently corrupting the boundaries.
//!
//! # Single writer
//! `DualArena` takes `&mut self` for every mutation. Only the coordinating
//! core owns it; other cores see the regions only through the addresses
//! handed to kernels.

use crate::{ArenaError, ArenaStats};
use std::fmt;

/// Every frame is rounded up to this many bytes.
pub const FRAME_ALIGN: usize = 4;

/// Which boundary a frame is carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Grows upward from offset 0.
    Begin,
    /// Grows downward from the arena capacity.
    End,
}

impl Side {
    /// Returns the opposite boundary.
    pub fn flip(self) -> Self {
        match self {
            Side::Begin => Side::End,
            Side::End => Side::Begin,
        }
    }

    /// Returns a lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Begin => "begin",
            Side::End => "end",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live frame inside the arena.
///
/// Regions are plain values: they name an offset range but do not own the
/// bytes, which live in the on-chip tier memory. Two regions compare equal
/// when they describe the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Region {
    /// Boundary the frame was carved from.
    pub side: Side,
    /// Byte offset from the start of the arena.
    pub offset: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Bytes actually reserved (size rounded up to [`FRAME_ALIGN`]).
    pub footprint: usize,
}

impl Region {
    /// One past the last reserved byte.
    pub fn end(&self) -> usize {
        self.offset + self.footprint
    }
}

/// Kind of arena event recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArenaOp {
    Alloc,
    Free,
}

/// One entry of the allocation journal: `(op, requested size, side)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ArenaEvent {
    pub op: ArenaOp,
    pub size: usize,
    pub side: Side,
}

impl ArenaEvent {
    pub fn alloc(size: usize, side: Side) -> Self {
        Self { op: ArenaOp::Alloc, size, side }
    }

    pub fn free(size: usize, side: Side) -> Self {
        Self { op: ArenaOp::Free, size, side }
    }
}

impl fmt::Display for ArenaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            ArenaOp::Alloc => "alloc",
            ArenaOp::Free => "free",
        };
        write!(f, "{op}({}, {})", self.size, self.side)
    }
}

/// The double-ended arena allocator.
///
/// # Example
/// ```
/// use arena::{DualArena, Side};
///
/// let mut arena = DualArena::new(1024);
/// let input = arena.allocate(100, Side::Begin).unwrap();
/// let output = arena.allocate(200, Side::End).unwrap();
/// assert_eq!(input.offset, 0);
/// assert_eq!(output.end(), 1024);
///
/// arena.release(&output).unwrap();
/// arena.free(100, Side::Begin).unwrap();
/// assert_eq!(arena.boundaries(), (0, 1024));
/// ```
pub struct DualArena {
    capacity: usize,
    begin: usize,
    end: usize,
    begin_frames: Vec<Region>,
    end_frames: Vec<Region>,
    journal: Option<Vec<ArenaEvent>>,
    stats: ArenaStats,
}

impl DualArena {
    /// Creates an arena over `capacity` bytes with both stacks empty.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            begin: 0,
            end: capacity,
            begin_frames: Vec::new(),
            end_frames: Vec::new(),
            journal: None,
            stats: ArenaStats::default(),
        }
    }

    /// Turns on the allocation journal. The journal is cleared on every
    /// [`reset`](Self::reset), so it always describes the current pass.
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Vec::new());
        self
    }

    /// Carves `size` bytes from the given boundary.
    pub fn allocate(&mut self, size: usize, side: Side) -> Result<Region, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSized);
        }

        let footprint = align_up(size);
        let available = self.available();
        if footprint > available {
            self.stats.record_exhausted();
            return Err(ArenaError::Exhausted {
                requested: size,
                available,
                side,
            });
        }

        let region = match side {
            Side::Begin => {
                let region = Region { side, offset: self.begin, size, footprint };
                self.begin += footprint;
                self.begin_frames.push(region);
                region
            }
            Side::End => {
                self.end -= footprint;
                let region = Region { side, offset: self.end, size, footprint };
                self.end_frames.push(region);
                region
            }
        };

        self.stats.record_allocation();
        self.stats
            .update_peaks(self.begin, self.capacity - self.end);
        self.log(ArenaEvent::alloc(size, side));
        tracing::trace!("arena alloc {size} B on {side} @ {}", region.offset);

        Ok(region)
    }

    /// Pops the top frame of `side`, asserting it holds `size` bytes.
    pub fn free(&mut self, size: usize, side: Side) -> Result<Region, ArenaError> {
        let top = self.top(side).ok_or(ArenaError::EmptySide { side })?;
        if top.size != size {
            return Err(ArenaError::OutOfOrderFree {
                side,
                top_size: top.size,
                size,
            });
        }
        self.pop(side).ok_or(ArenaError::EmptySide { side })
    }

    /// Pops `region`, asserting it is the top frame of its side.
    pub fn release(&mut self, region: &Region) -> Result<(), ArenaError> {
        let side = region.side;
        let top = self.top(side).ok_or(ArenaError::EmptySide { side })?;
        if top != *region {
            return Err(ArenaError::NotOnTop {
                side,
                offset: region.offset,
                top_offset: top.offset,
            });
        }
        self.pop(side);
        Ok(())
    }

    /// Returns `true` if `region` is the most recent frame on its side.
    pub fn is_top(&self, region: &Region) -> bool {
        self.top(region.side) == Some(*region)
    }

    /// Returns the most recent frame on `side`, if any.
    pub fn top(&self, side: Side) -> Option<Region> {
        self.frames(side).last().copied()
    }

    /// Frees every live frame in LIFO order, begin side first.
    ///
    /// Returns the number of frames popped.
    pub fn unwind(&mut self) -> usize {
        let mut popped = 0;
        for side in [Side::Begin, Side::End] {
            while self.pop(side).is_some() {
                popped += 1;
            }
        }
        popped
    }

    /// Restores the initial boundaries and drops every frame without
    /// journaling individual frees.
    pub fn reset(&mut self) {
        self.begin = 0;
        self.end = self.capacity;
        self.begin_frames.clear();
        self.end_frames.clear();
        if let Some(journal) = self.journal.as_mut() {
            journal.clear();
        }
        self.stats.record_reset();
    }

    /// Returns `(begin, end)` boundary offsets.
    pub fn boundaries(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    /// Returns the total arena size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bytes still free between the two boundaries.
    pub fn available(&self) -> usize {
        self.end - self.begin
    }

    /// Returns the bytes reserved by live frames on both sides.
    pub fn live_bytes(&self) -> usize {
        self.capacity - self.available()
    }

    /// Returns the number of live frames on `side`.
    pub fn depth(&self, side: Side) -> usize {
        self.frames(side).len()
    }

    /// Returns the events recorded since the last reset, if journaling is on.
    pub fn journal(&self) -> Option<&[ArenaEvent]> {
        self.journal.as_deref()
    }

    /// Returns a snapshot of the usage statistics.
    pub fn stats(&self) -> ArenaStats {
        self.stats.clone()
    }

    // ── Private helpers ────────────────────────────────────────

    fn frames(&self, side: Side) -> &Vec<Region> {
        match side {
            Side::Begin => &self.begin_frames,
            Side::End => &self.end_frames,
        }
    }

    fn pop(&mut self, side: Side) -> Option<Region> {
        let region = match side {
            Side::Begin => self.begin_frames.pop(),
            Side::End => self.end_frames.pop(),
        }?;
        match side {
            Side::Begin => self.begin = region.offset,
            Side::End => self.end = region.end(),
        }
        self.stats.record_free();
        self.log(ArenaEvent::free(region.size, side));
        tracing::trace!("arena free {} B on {side} @ {}", region.size, region.offset);
        Some(region)
    }

    fn log(&mut self, event: ArenaEvent) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(event);
        }
    }
}

fn align_up(size: usize) -> usize {
    (size + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1)
}

impl fmt::Debug for DualArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualArena")
            .field("capacity", &self.capacity)
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("begin_depth", &self.begin_frames.len())
            .field("end_depth", &self.end_frames.len())
            .finish()
    }
}
