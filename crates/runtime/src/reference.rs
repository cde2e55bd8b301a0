// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Single-buffered reference execution.
//!
//! Runs the same kernels over private copies of the tiers with none of the
//! memory tricks: every activation and weight buffer gets its own on-chip
//! region for the whole pass, weights are loaded synchronously right before
//! their layer, and one core does all the work. A pipelined pass must
//! produce the same final output bit for bit.

use crate::kernel::{KernelArgs, Layer};
use crate::layout::OffChipLayout;
use crate::scheduler::PassReport;
use crate::staging::region_address;
use crate::team::{with_team, KernelEnv};
use crate::RuntimeError;
use arena::{DualArena, Side, FRAME_ALIGN};
use layer_table::{LayerTable, Validated};
use transfer_engine::{Address, Tier, TierMemory, Tiers, TransferEngine};

/// Outcome of a pipelined pass checked against the reference.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub pipelined: PassReport,
    pub reference_output: Vec<u8>,
    /// Byte offset of the first difference, if any.
    pub first_difference: Option<usize>,
}

impl VerifyReport {
    pub fn matches(&self) -> bool {
        self.first_difference.is_none() && self.pipelined.output.len() == self.reference_output.len()
    }
}

/// Compares two outputs and returns the first differing offset.
pub(crate) fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then_some(a.len().min(b.len())))
}

/// Single-buffered executor over one network's table and kernels.
pub struct ReferenceExecutor<'a> {
    table: &'a LayerTable<Validated>,
    kernels: &'a [Box<dyn Layer>],
    layout: &'a OffChipLayout,
}

/// Where a skip activation can be read from.
#[derive(Clone, Copy)]
struct Skip {
    onchip: Address,
    address: Address,
    offchip_in: Address,
    offchip_out: Address,
}

impl<'a> ReferenceExecutor<'a> {
    pub fn new(table: &'a LayerTable<Validated>, kernels: &'a [Box<dyn Layer>], layout: &'a OffChipLayout) -> Self {
        Self { table, kernels, layout }
    }

    /// On-chip bytes needed to give every buffer its own region.
    pub fn onchip_bytes(&self) -> usize {
        let align = |n: usize| (n + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1);
        align(self.table.input_bytes())
            + self
                .table
                .iter_layers()
                .map(|l| {
                    align(l.output_bytes)
                        + if l.needs_weight_allocation {
                            align(l.weight_bytes)
                        } else {
                            0
                        }
                })
                .sum::<usize>()
    }

    /// Runs one pass over a copy of `offchip` with `input` as the first
    /// layer's input. Returns the final layer's output.
    pub fn run(&self, offchip: &[u8], scratch_bytes: usize, input: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let first = self
            .table
            .layer(0)
            .ok_or_else(|| RuntimeError::ConfigError("empty layer table".into()))?;
        if input.len() != first.input_bytes {
            return Err(RuntimeError::ConfigError(format!(
                "reference input has {} bytes, layer '{}' expects {}",
                input.len(),
                first.name,
                first.input_bytes
            )));
        }

        let tiers = Tiers {
            scratch: TierMemory::new(Tier::Scratch, scratch_bytes)?,
            onchip: TierMemory::new(Tier::OnChip, self.onchip_bytes())?,
            offchip: TierMemory::new(Tier::OffChip, offchip.len())?,
        };
        tiers.offchip.write(tiers.offchip.base(), offchip)?;
        let dma = TransferEngine::spawn(tiers.clone())?;
        let mut arena = DualArena::new(tiers.onchip.len());

        let env = KernelEnv {
            kernels: self.kernels,
            layers: &self.table.layers,
            tiers: &tiers,
            dma: &dma,
            scratch_partition: scratch_bytes,
        };

        let region = arena.allocate(first.input_bytes, Side::Begin)?;
        let mut input_addr = region_address(&region);
        tiers.onchip.write(input_addr, input)?;

        let mut offchip_in = self.layout.activations_a;
        let mut offchip_out = self.layout.activations_b;
        let mut kept: Option<Address> = None;
        let mut spill: Option<Skip> = None;
        let mut output = Vec::new();

        with_team(1, &env, |team| {
            for (i, desc) in self.table.iter_layers().enumerate() {
                let exec_weights = if desc.needs_weight_allocation {
                    let w = arena.allocate(desc.weight_bytes, Side::Begin)?;
                    dma.read_blocking(region_address(&w), self.layout.weight_address(desc), desc.weight_bytes)?;
                    region_address(&w)
                } else {
                    Address::NULL
                };
                let out = region_address(&arena.allocate(desc.output_bytes, Side::Begin)?);

                let mut args = KernelArgs {
                    offchip_in,
                    offchip_out,
                    weight_src: if desc.weight_bytes > 0 {
                        self.layout.weight_address(desc)
                    } else {
                        Address::NULL
                    },
                    onchip_in: input_addr,
                    bypass_in: Address::NULL,
                    onchip_out: out,
                    exec_weights,
                    scratch: tiers.scratch.base(),
                    ram_handle: tiers.offchip.base().raw(),
                    out_mult: desc.quant.out_mult,
                    in_mul1: desc.quant.in_mul1,
                    in_mul2: desc.quant.in_mul2,
                    out_shift: desc.quant.out_shift,
                };
                let after_change = i > 0 && self.table.layers[i - 1].branch.change;
                if let (true, false, Some(s)) = (after_change, desc.is_merge(), spill) {
                    args.offchip_in = s.offchip_in;
                    args.offchip_out = s.offchip_out;
                    args.onchip_in = s.onchip;
                }
                args.bypass_in = if desc.is_merge() {
                    kept.or(spill.map(|s| s.address))
                        .ok_or_else(|| RuntimeError::branch(i, "merge without a skip activation"))?
                } else {
                    spill.map(|s| s.address).unwrap_or(Address::NULL)
                };

                team.execute(i, args)?;
                std::mem::swap(&mut offchip_in, &mut offchip_out);

                if desc.is_merge() {
                    kept = None;
                    spill = None;
                }
                let written = if desc.residency.output { offchip_in } else { out };
                if desc.arms_bypass() {
                    kept = Some(written);
                }
                if desc.branch.output {
                    spill = Some(Skip {
                        onchip: out,
                        address: written,
                        offchip_in,
                        offchip_out,
                    });
                }
                input_addr = out;
                if i + 1 == self.table.num_layers() {
                    output = tiers.onchip.read(out, desc.output_bytes)?;
                }
            }
            Ok::<(), RuntimeError>(())
        })?;

        tracing::debug!("reference pass done ({} B on-chip)", tiers.onchip.len());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(first_difference(&[1, 2, 3], &[1, 9, 3]), Some(1));
        assert_eq!(first_difference(&[1, 2], &[1, 2, 3]), Some(2));
    }
}
