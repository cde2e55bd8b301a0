// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Double-buffered weight staging.
//!
//! Two on-chip slots alternate roles. While the kernel of layer *i* reads
//! its weights from the **execution** slot, the DMA engine fills the
//! **transfer** slot with the weights of the next weighted layer:
//!
//! ```text
//!            layer i                layer i+1
//!   slot A   [exec: W_i]  ────────► [free / next transfer]
//!   slot B   [transfer: W_i+1] ───► [exec: W_i+1]
//!                 ▲
//!                 └── DMA in flight while kernel i runs
//! ```
//!
//! The controller only tracks which arena region sits in which slot and the
//! one transfer that may be in flight. Allocation and release of the regions
//! themselves is the scheduler's job, since they follow the arena's stack
//! discipline.

use crate::RuntimeError;
use arena::Region;
use std::fmt;
use transfer_engine::{Address, Tier, TransferEngine, TransferHandle};

/// One of the two staging slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::A => "A",
            Slot::B => "B",
        })
    }
}

/// On-chip address of an arena region.
pub(crate) fn region_address(region: &Region) -> Address {
    Address::in_tier(Tier::OnChip, region.offset)
}

/// Two-slot weight staging controller.
pub struct StagingSlots {
    slots: [Option<Region>; 2],
    exec: Slot,
    transfer: Slot,
    inflight: Option<(Slot, TransferHandle)>,
}

impl StagingSlots {
    /// Creates a controller with both slots empty.
    pub fn new() -> Self {
        Self {
            slots: [None, None],
            exec: Slot::A,
            transfer: Slot::A,
            inflight: None,
        }
    }

    /// Forgets every slot and any in-flight transfer handle.
    ///
    /// Call only once the transfer has been waited on.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Places the first layer's weights, already loaded, in slot A and makes
    /// it both the execution and the transfer slot.
    pub fn prime(&mut self, region: Region) {
        self.slots = [Some(region), None];
        self.exec = Slot::A;
        self.transfer = Slot::A;
        self.inflight = None;
        tracing::trace!("staging primed slot A @ {}", region.offset);
    }

    /// Places a freshly allocated region in the slot opposite the execution
    /// slot and makes it the transfer slot.
    pub fn stage(&mut self, region: Region) -> Result<Slot, RuntimeError> {
        let target = self.exec.other();
        if let Some(held) = self.slots[target.index()] {
            return Err(RuntimeError::StagingDesync(format!(
                "slot {target} still holds the region @ {} while staging @ {}",
                held.offset, region.offset
            )));
        }
        self.slots[target.index()] = Some(region);
        self.transfer = target;
        tracing::trace!("staged slot {target} @ {}", region.offset);
        Ok(target)
    }

    /// Starts the DMA of `len` bytes from `src` into the transfer slot.
    pub fn prefetch(&mut self, dma: &TransferEngine, src: Address, len: usize) -> Result<(), RuntimeError> {
        if let Some((slot, handle)) = &self.inflight {
            return Err(RuntimeError::StagingDesync(format!(
                "transfer #{} into slot {slot} still in flight",
                handle.id()
            )));
        }
        let region = self.slots[self.transfer.index()].ok_or_else(|| {
            RuntimeError::StagingDesync(format!("transfer slot {} is empty", self.transfer))
        })?;
        let handle = dma.read(region_address(&region), src, len)?;
        tracing::trace!("prefetch #{} -> slot {} ({len} B)", handle.id(), self.transfer);
        self.inflight = Some((self.transfer, handle));
        Ok(())
    }

    /// Waits for the in-flight transfer, if any.
    pub fn wait_inflight(&mut self) -> Result<(), RuntimeError> {
        if let Some((_, handle)) = self.inflight.take() {
            handle.wait()?;
        }
        Ok(())
    }

    /// Whether a transfer is outstanding.
    pub fn is_inflight(&self) -> bool {
        self.inflight.is_some()
    }

    /// Empties the execution slot and returns the region it held.
    pub fn release_exec(&mut self) -> Option<Region> {
        self.slots[self.exec.index()].take()
    }

    /// Rotates the execution role to the other slot, which must already hold
    /// the next layer's weights.
    pub fn advance_exec(&mut self) -> Result<(), RuntimeError> {
        let next = self.exec.other();
        if self.slots[next.index()].is_none() {
            return Err(RuntimeError::StagingDesync(format!(
                "advancing execution to empty slot {next}"
            )));
        }
        self.exec = next;
        Ok(())
    }

    /// On-chip address of the execution slot, or `NULL` when it is empty.
    pub fn exec_address(&self) -> Address {
        self.slots[self.exec.index()]
            .as_ref()
            .map(region_address)
            .unwrap_or(Address::NULL)
    }

    /// Refuses to dispatch a kernel while DMA is still writing the slot it
    /// is about to read.
    pub fn check_dispatch(&self, layer: usize) -> Result<(), RuntimeError> {
        if let Some((slot, handle)) = &self.inflight {
            if *slot == self.exec && self.slots[slot.index()].is_some() {
                return Err(RuntimeError::StagingDesync(format!(
                    "layer {layer} dispatched while transfer #{} still fills execution slot {slot}",
                    handle.id()
                )));
            }
        }
        Ok(())
    }

    pub fn exec_slot(&self) -> Slot {
        self.exec
    }

    pub fn transfer_slot(&self) -> Slot {
        self.transfer
    }

    /// Region held by `slot`, if any.
    pub fn slot(&self, slot: Slot) -> Option<Region> {
        self.slots[slot.index()]
    }
}

impl Default for StagingSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StagingSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingSlots")
            .field("a", &self.slots[0])
            .field("b", &self.slots[1])
            .field("exec", &self.exec)
            .field("transfer", &self.transfer)
            .field("inflight", &self.inflight.as_ref().map(|(s, h)| (*s, h.id())))
            .finish()
    }
}
