// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The layer execution scheduler.
//!
//! One pass walks the layer chain once. Core 0 does all the bookkeeping;
//! every core runs the kernel:
//!
//! ```text
//! setup      in0, w0 on one side ── out0, w1 on the other
//!  │
//!  ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │ layer i                                                       │
//! │   wait weights of i ─► prefetch weights of i+1                │
//! │   build args ─► barrier ─► kernel on all cores ─► barrier     │
//! │   swap off-chip ping-pong buffers                             │
//! │   free w_i, in_i ─► record skips ─► alloc out_{i+1}, w_{i+2}  │
//! │   flip side                                                   │
//! └───────────────────────────────────────────────────────────────┘
//!  │
//!  ▼
//! unwind arena, assert no skip is left open
//! ```
//!
//! Inputs and outputs ping-pong between the two ends of the arena. Every
//! free hits the top of its stack, which keeps the arena a pair of strict
//! LIFO stacks for any chain the layer table accepts.

use crate::bypass::{BypassManager, BypassState};
use crate::checksum::{self, byte_sum, word_sum, ChecksumMismatch, ChecksumTarget};
use crate::config::InputSource;
use crate::kernel::{KernelArgs, Layer};
use crate::layout::OffChipLayout;
use crate::metrics::PassMetrics;
use crate::result::{InferenceResult, ResultLayout};
use crate::staging::{region_address, StagingSlots};
use crate::team::{with_team, Dispatcher, KernelEnv};
use crate::RuntimeError;
use arena::{ArenaEvent, ArenaStats, DualArena, Region, Side};
use layer_table::{LayerDescriptor, LayerTable, Validated};
use std::time::{Duration, Instant};
use transfer_engine::{Address, TransferEngine, TransferStats};

/// Knobs of the scheduler, resolved from the runtime configuration.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub num_cores: usize,
    /// Scratch bytes per core.
    pub scratch_partition: usize,
    pub verify_checksums: bool,
    pub input_source: InputSource,
    pub result_layout: ResultLayout,
    pub profiling: bool,
}

/// Everything one pass produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PassReport {
    pub result: InferenceResult,
    /// Raw bytes of the final layer's output.
    pub output: Vec<u8>,
    pub metrics: PassMetrics,
    pub checksum_mismatches: Vec<ChecksumMismatch>,
    /// Bypass state after each layer's bookkeeping.
    pub bypass_timeline: Vec<BypassState>,
    /// Arena events of the pass (empty unless journaling is on).
    pub journal: Vec<ArenaEvent>,
    pub arena_stats: ArenaStats,
    pub transfer_stats: TransferStats,
}

/// Mutable state carried from pass to pass.
#[derive(Debug)]
pub struct SchedulerState {
    pub arena: DualArena,
    pub staging: StagingSlots,
    pub bypass: BypassManager,
}

impl SchedulerState {
    pub fn new(arena: DualArena) -> Self {
        Self {
            arena,
            staging: StagingSlots::new(),
            bypass: BypassManager::new(),
        }
    }

    fn reset(&mut self) {
        self.arena.reset();
        self.staging.reset();
        self.bypass.reset();
    }
}

/// Runs passes of one network.
pub struct Scheduler {
    table: LayerTable<Validated>,
    kernels: Vec<Box<dyn Layer>>,
    dma: TransferEngine,
    layout: OffChipLayout,
    options: SchedulerOptions,
    state: SchedulerState,
}

impl Scheduler {
    /// Assembles a scheduler. `kernels[i]` runs layer `i`.
    pub fn new(
        table: LayerTable<Validated>,
        kernels: Vec<Box<dyn Layer>>,
        dma: TransferEngine,
        layout: OffChipLayout,
        options: SchedulerOptions,
        arena: DualArena,
    ) -> Result<Self, RuntimeError> {
        if kernels.len() != table.num_layers() {
            return Err(RuntimeError::ConfigError(format!(
                "{} kernels for {} layers",
                kernels.len(),
                table.num_layers()
            )));
        }
        Ok(Self {
            table,
            kernels,
            dma,
            layout,
            options,
            state: SchedulerState::new(arena),
        })
    }

    pub fn table(&self) -> &LayerTable<Validated> {
        &self.table
    }

    pub fn kernels(&self) -> &[Box<dyn Layer>] {
        &self.kernels
    }

    pub fn dma(&self) -> &TransferEngine {
        &self.dma
    }

    pub fn layout(&self) -> &OffChipLayout {
        &self.layout
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Runs one full pass over the layer chain.
    pub fn run_pass(&mut self) -> Result<PassReport, RuntimeError> {
        let started = Instant::now();
        let Self {
            table,
            kernels,
            dma,
            layout,
            options,
            state,
        } = self;

        state.reset();
        let env = KernelEnv {
            kernels: kernels.as_slice(),
            layers: &table.layers,
            tiers: dma.tiers(),
            dma,
            scratch_partition: options.scratch_partition,
        };

        let mut pass = Pass::setup(table, dma, layout, options, state)?;
        let outcome = with_team(options.num_cores, &env, |team| {
            for i in 0..table.num_layers() {
                pass.step(i, team)?;
            }
            Ok::<(), RuntimeError>(())
        });
        if let Err(e) = outcome {
            // The next pass starts from a reset anyway; just make sure no
            // transfer is left writing into the arena.
            let _ = pass.state.staging.wait_inflight();
            return Err(e);
        }
        pass.finish(started)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("model", &self.table.name)
            .field("layers", &self.table.num_layers())
            .field("num_cores", &self.options.num_cores)
            .field("state", &self.state)
            .finish()
    }
}

// ── One pass ───────────────────────────────────────────────────────

/// Per-pass cursor: the live input/output regions, the arena side the next
/// output goes to and the off-chip ping-pong buffers.
struct Pass<'a> {
    table: &'a LayerTable<Validated>,
    dma: &'a TransferEngine,
    layout: &'a OffChipLayout,
    options: &'a SchedulerOptions,
    state: &'a mut SchedulerState,
    side: Side,
    input: Region,
    output: Region,
    offchip_in: Address,
    offchip_out: Address,
    mismatches: Vec<ChecksumMismatch>,
    timeline: Vec<BypassState>,
    metrics: PassMetrics,
    result: Option<(Vec<u8>, InferenceResult)>,
}

impl<'a> Pass<'a> {
    /// Places the first layer's input, weights and output, and stages the
    /// second layer's weight region.
    fn setup(
        table: &'a LayerTable<Validated>,
        dma: &'a TransferEngine,
        layout: &'a OffChipLayout,
        options: &'a SchedulerOptions,
        state: &'a mut SchedulerState,
    ) -> Result<Self, RuntimeError> {
        let first = layer(table, 0)?;
        let mut side = Side::Begin;

        let input = state.arena.allocate(first.input_bytes, side)?;
        match options.input_source {
            InputSource::Offchip => {
                dma.read_blocking(region_address(&input), layout.input, first.input_bytes)?;
            }
            // The frame buffer is this very region: arena offset 0.
            InputSource::Frame => {}
        }
        if first.needs_weight_allocation {
            let w0 = state.arena.allocate(first.weight_bytes, side)?;
            dma.read_blocking(region_address(&w0), layout.weight_address(first), first.weight_bytes)?;
            state.staging.prime(w0);
        }

        side = side.flip();
        let output = state.arena.allocate(first.output_bytes, side)?;
        if table.needs_weights(1) {
            let next = layer(table, 1)?;
            let w1 = state.arena.allocate(next.weight_bytes, side)?;
            state.staging.stage(w1)?;
        }
        side = side.flip();

        Ok(Self {
            table,
            dma,
            layout,
            options,
            state,
            side,
            input,
            output,
            offchip_in: layout.activations_a,
            offchip_out: layout.activations_b,
            mismatches: Vec::new(),
            timeline: Vec::with_capacity(table.num_layers()),
            metrics: PassMetrics::new(options.num_cores),
            result: None,
        })
    }

    fn step(&mut self, i: usize, team: &mut Dispatcher<'_, '_>) -> Result<(), RuntimeError> {
        let desc = layer(self.table, i)?;
        let last = i + 1 == self.table.num_layers();

        // Weights of this layer must have landed before anything else.
        let wait_start = Instant::now();
        self.state.staging.wait_inflight()?;
        if self.table.needs_weights(i + 1) {
            let next = layer(self.table, i + 1)?;
            self.state
                .staging
                .prefetch(self.dma, self.layout.weight_address(next), next.weight_bytes)?;
            if desc.residency.kernel {
                // This kernel streams through the off-chip tier itself.
                self.state.staging.wait_inflight()?;
            }
        }
        let weight_wait = wait_start.elapsed();

        self.state.staging.check_dispatch(i)?;
        let args = self.build_args(i, desc)?;
        if self.options.verify_checksums {
            let sum = byte_sum(&self.read_input(desc, &args)?);
            self.mismatches.extend(checksum::check(desc, ChecksumTarget::Input, sum));
        }

        tracing::debug!(
            "layer {i} '{}' ({}): in @ {} out @ {} weights @ {} bypass @ {}",
            desc.name,
            desc.kind,
            args.onchip_in,
            args.onchip_out,
            args.exec_weights,
            args.bypass_in,
        );
        let kernel_start = Instant::now();
        team.execute(i, args)?;
        let kernel_time = kernel_start.elapsed();

        if self.options.verify_checksums {
            let bytes = self.read_output(desc, &args)?;
            let sum = if last { word_sum(&bytes) } else { byte_sum(&bytes) };
            self.mismatches.extend(checksum::check(desc, ChecksumTarget::Output, sum));
        }
        if last {
            let bytes = self.dma.tiers().onchip.read(region_address(&self.output), desc.output_bytes)?;
            let result = self.options.result_layout.extract(&bytes)?;
            tracing::debug!("result: {result}");
            self.result = Some((bytes, result));
        }

        std::mem::swap(&mut self.offchip_in, &mut self.offchip_out);
        if desc.is_merge() {
            self.state.bypass.on_merge_complete(i);
        }
        if !last {
            self.advance(i, desc)?;
        }
        self.timeline.push(self.state.bypass.state());

        if self.options.profiling {
            self.metrics.record_layer(
                desc.name.clone(),
                weight_wait,
                kernel_time,
                desc.macs,
                self.state.arena.live_bytes(),
            );
        }
        Ok(())
    }

    /// Bookkeeping between layer `i` and layer `i + 1`.
    fn advance(&mut self, i: usize, desc: &LayerDescriptor) -> Result<(), RuntimeError> {
        let next = layer(self.table, i + 1)?;
        let state = &mut *self.state;

        if desc.needs_weight_allocation {
            let weights = state.staging.release_exec().ok_or_else(|| {
                RuntimeError::StagingDesync(format!("layer {i} ran without staged weights"))
            })?;
            state.arena.release(&weights)?;
        }
        if next.needs_weight_allocation {
            state.staging.advance_exec()?;
        }

        if !state.bypass.retains(&self.input) {
            state.arena.release(&self.input)?;
        }
        state.bypass.drain(&mut state.arena)?;

        if desc.arms_bypass() {
            state
                .bypass
                .on_branch_change(i, self.output, desc.residency.output, self.offchip_in)?;
        }
        if desc.branch.output {
            state.bypass.on_branch_output(
                i,
                self.output,
                self.offchip_in,
                self.offchip_out,
                desc.residency.output,
            )?;
        }

        self.input = self.output;
        self.output = if next.is_merge() && next.kind.is_elementwise() {
            state
                .bypass
                .plan_merge_output(&mut state.arena, self.side, next.output_bytes, &self.input)?
        } else {
            state.arena.allocate(next.output_bytes, self.side)?
        };
        if self.table.needs_weights(i + 2) {
            let after = layer(self.table, i + 2)?;
            let region = state.arena.allocate(after.weight_bytes, self.side)?;
            state.staging.stage(region)?;
        }
        self.side = self.side.flip();
        Ok(())
    }

    fn build_args(&self, i: usize, desc: &LayerDescriptor) -> Result<KernelArgs, RuntimeError> {
        let tiers = self.dma.tiers();
        let mut args = KernelArgs {
            offchip_in: self.offchip_in,
            offchip_out: self.offchip_out,
            weight_src: if desc.weight_bytes > 0 {
                self.layout.weight_address(desc)
            } else {
                Address::NULL
            },
            onchip_in: region_address(&self.input),
            bypass_in: Address::NULL,
            onchip_out: region_address(&self.output),
            exec_weights: if desc.needs_weight_allocation {
                self.state.staging.exec_address()
            } else {
                Address::NULL
            },
            scratch: tiers.scratch.base(),
            ram_handle: tiers.offchip.base().raw(),
            out_mult: desc.quant.out_mult,
            in_mul1: desc.quant.in_mul1,
            in_mul2: desc.quant.in_mul2,
            out_shift: desc.quant.out_shift,
        };

        let spill = self.state.bypass.alternate_input().copied();
        let after_change = i > 0 && layer(self.table, i - 1)?.branch.change;
        if after_change && !desc.is_merge() {
            if let Some(spill) = &spill {
                // Second branch of a fork: restart from the spilled activation.
                args.offchip_in = spill.offchip_in;
                args.offchip_out = spill.offchip_out;
                args.onchip_in = region_address(&spill.region);
            }
        }
        args.bypass_in = if desc.is_merge() {
            self.state.bypass.merge_bypass(i)?
        } else {
            spill.map(|s| s.address).unwrap_or(Address::NULL)
        };
        Ok(args)
    }

    fn read_input(&self, desc: &LayerDescriptor, args: &KernelArgs) -> Result<Vec<u8>, RuntimeError> {
        let tiers = self.dma.tiers();
        Ok(if desc.residency.input {
            tiers.offchip.read(args.offchip_in, desc.offchip.input_bytes)?
        } else {
            tiers.onchip.read(args.onchip_in, desc.input_bytes)?
        })
    }

    fn read_output(&self, desc: &LayerDescriptor, args: &KernelArgs) -> Result<Vec<u8>, RuntimeError> {
        let tiers = self.dma.tiers();
        Ok(if desc.residency.output {
            tiers.offchip.read(args.offchip_out, desc.offchip.output_bytes)?
        } else {
            tiers.onchip.read(args.onchip_out, desc.output_bytes)?
        })
    }

    fn finish(mut self, started: Instant) -> Result<PassReport, RuntimeError> {
        let last = self.table.num_layers() - 1;
        self.state.staging.wait_inflight()?;
        self.state.bypass.finish_pass(last)?;
        let popped = self.state.arena.unwind();
        tracing::trace!("pass end: unwound {popped} frames");

        let journal = self.state.arena.journal().map(<[_]>::to_vec).unwrap_or_default();
        self.state.staging.reset();
        self.state.bypass.reset();

        let (output, result) = self
            .result
            .take()
            .ok_or_else(|| RuntimeError::Result("pass produced no output".into()))?;

        let arena_stats = self.state.arena.stats();
        self.metrics.finalise(if self.options.profiling {
            started.elapsed()
        } else {
            Duration::ZERO
        });
        if !self.mismatches.is_empty() {
            tracing::warn!("{} checksum mismatch(es) in this pass", self.mismatches.len());
        }

        Ok(PassReport {
            result,
            output,
            metrics: self.metrics,
            checksum_mismatches: self.mismatches,
            bypass_timeline: self.timeline,
            journal,
            arena_stats,
            transfer_stats: self.dma.stats(),
        })
    }
}

fn layer(table: &LayerTable<Validated>, index: usize) -> Result<&LayerDescriptor, RuntimeError> {
    table.layer(index).ok_or_else(|| {
        RuntimeError::ConfigError(format!("layer {index} is out of range ({} layers)", table.num_layers()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::reference_kernels;
    use crate::layout::offchip_tier_bytes;
    use crate::TierSizes;
    use layer_table::LayerKind;
    use transfer_engine::{OffChipPool, Tiers};

    fn build(layers: Vec<LayerDescriptor>, cores: usize) -> Scheduler {
        let table = LayerTable::new("t", layers).validate().unwrap();
        let sizes = TierSizes {
            onchip_arena: 4096,
            scratch: 256,
            offchip_weights: 1024,
            offchip_activations: 256,
        };
        let tiers = Tiers::new(sizes.scratch, sizes.onchip_arena, offchip_tier_bytes(&sizes)).unwrap();
        let mut pool = OffChipPool::new(tiers.offchip.clone());
        let layout = OffChipLayout::reserve(&mut pool, &table, &sizes, table.input_bytes()).unwrap();
        let dma = TransferEngine::spawn(tiers).unwrap();
        let kernels = reference_kernels(&table.layers);
        let options = SchedulerOptions {
            num_cores: cores,
            scratch_partition: sizes.scratch / cores,
            verify_checksums: true,
            input_source: InputSource::Offchip,
            result_layout: ResultLayout::custom(1),
            profiling: true,
        };
        Scheduler::new(table, kernels, dma, layout, options, DualArena::new(sizes.onchip_arena).with_journal())
            .unwrap()
    }

    #[test]
    fn test_journal_matches_ping_pong_plan() {
        let layers = vec![
            LayerDescriptor::new("c0", 0, LayerKind::Conv, 100, 200, 40),
            LayerDescriptor::new("p1", 1, LayerKind::MaxPool, 200, 150, 0),
            LayerDescriptor::new("c2", 2, LayerKind::Conv, 150, 8, 60),
        ];
        let mut scheduler = build(layers, 2);
        let report = scheduler.run_pass().unwrap();

        let events: Vec<String> = report.journal.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            &events[..9],
            &[
                "alloc(100, begin)",
                "alloc(40, begin)",
                "alloc(200, end)",
                "free(40, begin)",
                "free(100, begin)",
                "alloc(150, begin)",
                "alloc(60, begin)",
                "free(200, end)",
                "alloc(8, end)",
            ]
        );
        assert_eq!(scheduler.state().arena.boundaries(), (0, 4096));
        assert_eq!(report.bypass_timeline, vec![BypassState::Idle; 3]);
        assert_eq!(report.metrics.layer_metrics.len(), 3);
    }

    #[test]
    fn test_kernel_count_must_match() {
        let table = LayerTable::new("t", vec![LayerDescriptor::new("id", 0, LayerKind::Identity, 4, 4, 0)])
            .validate()
            .unwrap();
        let tiers = Tiers::new(16, 64, 64).unwrap();
        let dma = TransferEngine::spawn(tiers.clone()).unwrap();
        let layout = OffChipLayout {
            weights: tiers.offchip.base(),
            input: tiers.offchip.base(),
            activations_a: tiers.offchip.base(),
            activations_b: tiers.offchip.base(),
        };
        let options = SchedulerOptions {
            num_cores: 1,
            scratch_partition: 16,
            verify_checksums: false,
            input_source: InputSource::Frame,
            result_layout: ResultLayout::custom(1),
            profiling: false,
        };
        let err = Scheduler::new(table, Vec::new(), dma, layout, options, DualArena::new(64)).unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigError(_)));
    }

    #[test]
    fn test_output_checksum_mismatch_is_reported() {
        let mut last = LayerDescriptor::new("id", 1, LayerKind::Identity, 8, 8, 0);
        last.checksums.output = Some(12345);
        let layers = vec![LayerDescriptor::new("c0", 0, LayerKind::Conv, 8, 8, 4), last];
        let mut scheduler = build(layers, 1);
        let report = scheduler.run_pass().unwrap();
        assert_eq!(report.checksum_mismatches.len(), 1);
        let m = &report.checksum_mismatches[0];
        assert_eq!(m.target, ChecksumTarget::Output);
        assert_eq!(m.expected, 12345);
        assert_eq!(m.actual, word_sum(&report.output));
    }

    #[test]
    fn test_arena_is_reset_between_passes() {
        let layers = vec![
            LayerDescriptor::new("c0", 0, LayerKind::Conv, 16, 16, 8),
            LayerDescriptor::new("c1", 1, LayerKind::Conv, 16, 8, 8),
        ];
        let mut scheduler = build(layers, 4);
        let first = scheduler.run_pass().unwrap();
        let second = scheduler.run_pass().unwrap();
        assert_eq!(first.output, second.output);
        assert_eq!(first.journal, second.journal);
        assert_eq!(scheduler.state().arena.boundaries(), (0, 4096));
    }
}
