// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Skip-connection bookkeeping.
//!
//! A skip activation outlives the layer that produced it. The manager keeps
//! at most one of each kind alive:
//!
//! - the **bypass record**, produced by a branch-change layer and kept in
//!   the arena until the merge layer consumes it;
//! - the **spill record**, produced by a branch-output layer, which also
//!   captures the off-chip ping-pong buffers in use at the fork.
//!
//! ```text
//!   branch-change          next layer declines        merge           frame on top
//!   ─────────────► ARMED ─────────────────────► HELD ───────► CONSUMED ──────────► IDLE
//!                    │        to free it                │
//!                    └─────────── merge ────────────────┘
//! ```
//!
//! Regions are released only when they surface at the top of their arena
//! stack ([`BypassManager::drain`]); anything still buried at the end of a
//! pass is reclaimed by the arena unwind.

use crate::staging::region_address;
use crate::RuntimeError;
use arena::{DualArena, Region, Side};
use std::fmt;
use transfer_engine::Address;

/// Lifecycle of the bypass record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BypassState {
    /// No record.
    Idle,
    /// A branch-change layer just produced the record.
    Armed,
    /// A later layer kept the record alive instead of freeing it.
    Held,
    /// The merge ran; the region waits to be popped.
    Consumed,
}

impl fmt::Display for BypassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BypassState::Idle => "idle",
            BypassState::Armed => "armed",
            BypassState::Held => "held",
            BypassState::Consumed => "consumed",
        })
    }
}

/// The on-chip skip activation of a branch-change layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BypassRecord {
    pub region: Region,
    /// Where the merge reads the activation from.
    pub address: Address,
    pub producer: usize,
    /// The producer wrote its output to the off-chip tier.
    pub offchip_resident: bool,
    /// The merge output was placed on top of this region.
    pub adopted: bool,
}

/// The skip activation of a branch-output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SpillRecord {
    pub region: Region,
    /// Where the merge reads the activation from.
    pub address: Address,
    /// Off-chip input buffer after the fork's ping-pong swap.
    pub offchip_in: Address,
    /// Off-chip output buffer after the fork's ping-pong swap.
    pub offchip_out: Address,
    pub producer: usize,
    pub consumed: bool,
}

/// Tracks the live bypass and spill records of one pass.
#[derive(Debug)]
pub struct BypassManager {
    state: BypassState,
    record: Option<BypassRecord>,
    spill: Option<SpillRecord>,
    pending: Vec<Region>,
}

impl BypassManager {
    pub fn new() -> Self {
        Self {
            state: BypassState::Idle,
            record: None,
            spill: None,
            pending: Vec::new(),
        }
    }

    /// Drops every record. The arena is reset alongside, so no region is
    /// leaked.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> BypassState {
        self.state
    }

    pub fn record(&self) -> Option<&BypassRecord> {
        self.record.as_ref()
    }

    pub fn spill(&self) -> Option<&SpillRecord> {
        self.spill.as_ref()
    }

    /// Records the output of branch-change layer `layer` as the bypass.
    ///
    /// `offchip_out` is where the producer wrote when its output is
    /// off-chip resident.
    pub fn on_branch_change(
        &mut self,
        layer: usize,
        region: Region,
        offchip_resident: bool,
        offchip_out: Address,
    ) -> Result<(), RuntimeError> {
        if matches!(self.state, BypassState::Armed | BypassState::Held) {
            let producer = self.record.map(|r| r.producer).unwrap_or(layer);
            return Err(RuntimeError::branch(
                layer,
                format!("overlapping skip connections: layer {producer} still holds the bypass"),
            ));
        }
        if let Some(old) = self.record.take() {
            self.pending.push(old.region);
        }
        let address = if offchip_resident {
            offchip_out
        } else {
            region_address(&region)
        };
        self.record = Some(BypassRecord {
            region,
            address,
            producer: layer,
            offchip_resident,
            adopted: false,
        });
        self.state = BypassState::Armed;
        tracing::debug!("layer {layer}: bypass armed @ {address} ({} B)", region.size);
        Ok(())
    }

    /// Returns `true` if `region` must not be freed as a layer input because
    /// a record still owns it. The first refusal moves an armed record to
    /// [`BypassState::Held`].
    pub fn retains(&mut self, region: &Region) -> bool {
        if let Some(record) = &self.record {
            if record.region == *region {
                if self.state == BypassState::Armed {
                    self.state = BypassState::Held;
                    tracing::trace!("bypass from layer {} held", record.producer);
                }
                return true;
            }
        }
        if self.spill.is_some_and(|s| s.region == *region) {
            return true;
        }
        self.pending.contains(region)
    }

    /// Records the output of branch-output layer `layer` as the spill.
    ///
    /// The off-chip addresses are the ping-pong buffers after this layer's
    /// swap, so `offchip_in` holds what the layer wrote off-chip.
    pub fn on_branch_output(
        &mut self,
        layer: usize,
        region: Region,
        offchip_in: Address,
        offchip_out: Address,
        offchip_resident: bool,
    ) -> Result<(), RuntimeError> {
        if let Some(old) = self.spill {
            if !old.consumed {
                return Err(RuntimeError::branch(
                    layer,
                    format!("spill from layer {} is still live", old.producer),
                ));
            }
            self.pending.push(old.region);
        }
        let address = if offchip_resident {
            offchip_in
        } else {
            region_address(&region)
        };
        self.spill = Some(SpillRecord {
            region,
            address,
            offchip_in,
            offchip_out,
            producer: layer,
            consumed: false,
        });
        tracing::debug!("layer {layer}: spill recorded @ {address} ({} B)", region.size);
        Ok(())
    }

    /// The skip activation merge layer `layer` adds in.
    pub fn merge_bypass(&self, layer: usize) -> Result<Address, RuntimeError> {
        if let Some(record) = &self.record {
            if matches!(self.state, BypassState::Armed | BypassState::Held) {
                return Ok(record.address);
            }
        }
        match self.live_spill() {
            Some(spill) => Ok(spill.address),
            None => Err(RuntimeError::branch(
                layer,
                "merge without an armed bypass or a live spill",
            )),
        }
    }

    /// The live spill a layer following a fork reads in place of its
    /// regular input.
    pub fn alternate_input(&self) -> Option<&SpillRecord> {
        self.live_spill()
    }

    /// Picks storage for a merge output of `size` bytes that would be
    /// allocated on `side`.
    ///
    /// The live bypass record is reused when it sits on top of that side, is
    /// large enough and is not also the merge's input; otherwise a fresh
    /// frame is allocated.
    pub fn plan_merge_output(
        &mut self,
        arena: &mut DualArena,
        side: Side,
        size: usize,
        input: &Region,
    ) -> Result<Region, RuntimeError> {
        let live = matches!(self.state, BypassState::Armed | BypassState::Held);
        if let Some(record) = self.record.as_mut() {
            let fits = record.region.side == side
                && arena.is_top(&record.region)
                && record.region.size >= size
                && record.region != *input
                && !record.offchip_resident;
            if live && fits {
                record.adopted = true;
                tracing::debug!(
                    "merge output reuses bypass from layer {} @ {}",
                    record.producer,
                    record.region.offset
                );
                return Ok(record.region);
            }
        }
        Ok(arena.allocate(size, side)?)
    }

    /// Marks the skip activation used by merge layer `layer` as consumed.
    pub fn on_merge_complete(&mut self, layer: usize) {
        if let Some(record) = self.record {
            if matches!(self.state, BypassState::Armed | BypassState::Held) {
                if record.adopted {
                    // The region now belongs to the merge output.
                    self.record = None;
                    self.state = BypassState::Idle;
                } else {
                    self.state = BypassState::Consumed;
                }
                tracing::debug!("layer {layer}: bypass from layer {} consumed", record.producer);
            }
        }
        if let Some(spill) = self.spill.as_mut() {
            if !spill.consumed {
                spill.consumed = true;
                tracing::debug!("layer {layer}: spill from layer {} consumed", spill.producer);
            }
        }
    }

    /// Releases consumed regions that have surfaced at the top of their
    /// stack. Returns the number of frames popped.
    pub fn drain(&mut self, arena: &mut DualArena) -> Result<usize, RuntimeError> {
        let mut popped = 0;
        loop {
            if let Some(record) = self.record {
                if self.state == BypassState::Consumed && arena.is_top(&record.region) {
                    arena.release(&record.region)?;
                    self.record = None;
                    self.state = BypassState::Idle;
                    popped += 1;
                    continue;
                }
            }
            if let Some(spill) = self.spill {
                if spill.consumed && arena.is_top(&spill.region) {
                    arena.release(&spill.region)?;
                    self.spill = None;
                    popped += 1;
                    continue;
                }
            }
            if let Some(pos) = self.pending.iter().position(|r| arena.is_top(r)) {
                let region = self.pending.swap_remove(pos);
                arena.release(&region)?;
                popped += 1;
                continue;
            }
            break;
        }
        Ok(popped)
    }

    /// Asserts that no skip activation is left unmerged at the end of a
    /// pass.
    pub fn finish_pass(&self, last_layer: usize) -> Result<(), RuntimeError> {
        if matches!(self.state, BypassState::Armed | BypassState::Held) {
            let producer = self.record.map(|r| r.producer).unwrap_or(last_layer);
            return Err(RuntimeError::branch(
                last_layer,
                format!("bypass from layer {producer} still {} at end of pass", self.state),
            ));
        }
        if let Some(spill) = self.live_spill() {
            return Err(RuntimeError::branch(
                last_layer,
                format!("spill from layer {} never merged", spill.producer),
            ));
        }
        Ok(())
    }

    fn live_spill(&self) -> Option<&SpillRecord> {
        self.spill.as_ref().filter(|s| !s.consumed)
    }
}

impl Default for BypassManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFF_A: Address = Address::from_raw(0x8000_0000);
    const OFF_B: Address = Address::from_raw(0x8000_1000);

    #[test]
    fn test_armed_held_consumed_idle() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();

        let skip = arena.allocate(64, Side::Begin).unwrap();
        bypass.on_branch_change(2, skip, false, OFF_A).unwrap();
        assert_eq!(bypass.state(), BypassState::Armed);

        assert!(bypass.retains(&skip));
        assert_eq!(bypass.state(), BypassState::Held);
        let other = arena.allocate(32, Side::End).unwrap();
        assert!(!bypass.retains(&other));

        assert_eq!(bypass.merge_bypass(5).unwrap(), region_address(&skip));
        bypass.on_merge_complete(5);
        assert_eq!(bypass.state(), BypassState::Consumed);

        assert_eq!(bypass.drain(&mut arena).unwrap(), 1);
        assert_eq!(bypass.state(), BypassState::Idle);
        assert_eq!(arena.depth(Side::Begin), 0);
        bypass.finish_pass(6).unwrap();
    }

    #[test]
    fn test_drain_waits_for_top() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let skip = arena.allocate(64, Side::Begin).unwrap();
        bypass.on_branch_change(0, skip, false, OFF_A).unwrap();
        let above = arena.allocate(16, Side::Begin).unwrap();
        bypass.on_merge_complete(1);

        assert_eq!(bypass.drain(&mut arena).unwrap(), 0);
        assert_eq!(bypass.state(), BypassState::Consumed);
        arena.release(&above).unwrap();
        assert_eq!(bypass.drain(&mut arena).unwrap(), 1);
        assert_eq!(bypass.state(), BypassState::Idle);
    }

    #[test]
    fn test_overlapping_change_rejected() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let a = arena.allocate(8, Side::Begin).unwrap();
        let b = arena.allocate(8, Side::End).unwrap();
        bypass.on_branch_change(1, a, false, OFF_A).unwrap();
        let err = bypass.on_branch_change(3, b, false, OFF_A).unwrap_err();
        assert!(matches!(err, RuntimeError::BranchStateAssertion { layer: 3, .. }));
    }

    #[test]
    fn test_merge_without_skip() {
        let bypass = BypassManager::new();
        assert!(matches!(
            bypass.merge_bypass(4),
            Err(RuntimeError::BranchStateAssertion { layer: 4, .. })
        ));
    }

    #[test]
    fn test_spill_path() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let region = arena.allocate(48, Side::End).unwrap();
        bypass.on_branch_output(3, region, OFF_B, OFF_A, false).unwrap();

        let spill = *bypass.alternate_input().unwrap();
        assert_eq!(spill.offchip_in, OFF_B);
        assert_eq!(spill.offchip_out, OFF_A);
        assert!(bypass.retains(&region));
        assert_eq!(bypass.state(), BypassState::Idle);

        let again = arena.allocate(8, Side::Begin).unwrap();
        assert!(bypass.on_branch_output(4, again, OFF_A, OFF_B, false).is_err());

        assert_eq!(bypass.merge_bypass(6).unwrap(), region_address(&region));
        assert!(bypass.finish_pass(6).is_err());
        bypass.on_merge_complete(6);
        assert!(bypass.alternate_input().is_none());
        bypass.finish_pass(6).unwrap();
        arena.release(&again).unwrap();
        assert_eq!(bypass.drain(&mut arena).unwrap(), 1);
        assert!(bypass.spill().is_none());
    }

    #[test]
    fn test_offchip_resident_spill_reads_offchip() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let region = arena.allocate(48, Side::End).unwrap();
        bypass.on_branch_output(3, region, OFF_B, OFF_A, true).unwrap();
        assert_eq!(bypass.merge_bypass(5).unwrap(), OFF_B);
    }

    #[test]
    fn test_merge_output_reuses_record() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let skip = arena.allocate(64, Side::Begin).unwrap();
        bypass.on_branch_change(1, skip, false, OFF_A).unwrap();
        let input = arena.allocate(64, Side::End).unwrap();

        let out = bypass.plan_merge_output(&mut arena, Side::Begin, 64, &input).unwrap();
        assert_eq!(out, skip);
        assert_eq!(arena.depth(Side::Begin), 1);
        bypass.on_merge_complete(3);
        assert_eq!(bypass.state(), BypassState::Idle);
        assert!(bypass.record().is_none());
        assert!(!bypass.retains(&skip));
    }

    #[test]
    fn test_merge_output_allocates_when_buried() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let skip = arena.allocate(64, Side::Begin).unwrap();
        bypass.on_branch_change(1, skip, false, OFF_A).unwrap();
        let input = arena.allocate(64, Side::End).unwrap();

        // Wrong side.
        let out = bypass.plan_merge_output(&mut arena, Side::End, 64, &input).unwrap();
        assert_ne!(out, skip);
        assert_eq!(out.side, Side::End);

        // Right side but buried.
        let _w = arena.allocate(8, Side::Begin).unwrap();
        let out = bypass.plan_merge_output(&mut arena, Side::Begin, 64, &input).unwrap();
        assert_ne!(out, skip);

        bypass.on_merge_complete(3);
        assert_eq!(bypass.state(), BypassState::Consumed);
    }

    #[test]
    fn test_finish_pass_with_held_bypass() {
        let mut arena = DualArena::new(1024);
        let mut bypass = BypassManager::new();
        let skip = arena.allocate(64, Side::Begin).unwrap();
        bypass.on_branch_change(1, skip, false, OFF_A).unwrap();
        bypass.retains(&skip);
        assert!(matches!(
            bypass.finish_pass(4),
            Err(RuntimeError::BranchStateAssertion { layer: 4, .. })
        ));
    }
}
