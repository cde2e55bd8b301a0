// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference kernels.
//!
//! Small integer kernels that follow the calling convention exactly, so the
//! orchestrator can be driven end-to-end on a host. Every output element
//! depends only on its own index, which makes the result independent of how
//! many cores share the work.
//!
//! Buffers flagged as off-chip are streamed through the calling core's
//! scratch slice with blocking DMA transfers; kernels never touch the
//! off-chip tier directly.

use crate::kernel::{KernelContext, KernelError, Layer};
use layer_table::{LayerDescriptor, LayerKind};
use std::ops::Range;
use transfer_engine::{Address, Tier, TransferError};

/// Maximum number of taps of the weighted kernel.
const MAX_TAPS: usize = 8;

/// Builds the dispatch table for `layers`, one kernel per layer.
pub fn reference_kernels(layers: &[LayerDescriptor]) -> Vec<Box<dyn Layer>> {
    layers
        .iter()
        .map(|l| -> Box<dyn Layer> {
            match l.kind {
                LayerKind::Conv | LayerKind::Gemm | LayerKind::MatMul => Box::new(WeightedKernel),
                LayerKind::MaxPool => Box::new(PoolKernel { max: true }),
                LayerKind::AvgPool => Box::new(PoolKernel { max: false }),
                LayerKind::Add => Box::new(AddKernel),
                LayerKind::Identity => Box::new(IdentityKernel),
            }
        })
        .collect()
}

// ── Buffer access ──────────────────────────────────────────────────

/// Where this layer reads its input from, and how many bytes.
fn input_source(ctx: &KernelContext<'_>) -> (Address, usize) {
    if ctx.layer.residency.input {
        (ctx.args.offchip_in, ctx.layer.offchip.input_bytes)
    } else {
        (ctx.args.onchip_in, ctx.layer.input_bytes)
    }
}

/// Where this layer writes its output, and how many bytes.
fn output_target(ctx: &KernelContext<'_>) -> (Address, usize) {
    if ctx.layer.residency.output {
        (ctx.args.offchip_out, ctx.layer.offchip.output_bytes)
    } else {
        (ctx.args.onchip_out, ctx.layer.output_bytes)
    }
}

fn weight_source(ctx: &KernelContext<'_>) -> Result<(Address, usize), KernelError> {
    let addr = if !ctx.args.exec_weights.is_null() {
        ctx.args.exec_weights
    } else if ctx.layer.residency.weights {
        ctx.args.weight_src
    } else {
        Address::NULL
    };
    if addr.is_null() || ctx.layer.weight_bytes == 0 {
        return Err(KernelError::InvalidArgs("no weights for a weighted kernel".into()));
    }
    Ok((addr, ctx.layer.weight_bytes))
}

/// Reads `range` of the buffer at `base`.
fn fetch(ctx: &KernelContext<'_>, base: Address, range: Range<usize>) -> Result<Vec<u8>, KernelError> {
    match base.tier() {
        Some(Tier::OffChip) => {
            let (scratch, part) = ctx.scratch();
            if part == 0 && !range.is_empty() {
                return Err(KernelError::InvalidArgs("no scratch for off-chip streaming".into()));
            }
            let mut out = Vec::with_capacity(range.len());
            let mut pos = range.start;
            while pos < range.end {
                let n = part.min(range.end - pos);
                ctx.dma.read_blocking(scratch, base.add(pos), n)?;
                out.extend(ctx.tiers.scratch.read(scratch, n)?);
                pos += n;
            }
            Ok(out)
        }
        Some(tier) => Ok(ctx.tiers.get(tier).read(base.add(range.start), range.len())?),
        None => Err(TransferError::Unmapped { address: base }.into()),
    }
}

/// Writes `data` at byte `offset` of the buffer at `base`.
fn store(ctx: &KernelContext<'_>, base: Address, offset: usize, data: &[u8]) -> Result<(), KernelError> {
    match base.tier() {
        Some(Tier::OffChip) => {
            let (scratch, part) = ctx.scratch();
            if part == 0 && !data.is_empty() {
                return Err(KernelError::InvalidArgs("no scratch for off-chip streaming".into()));
            }
            for (k, chunk) in data.chunks(part.max(1)).enumerate() {
                ctx.tiers.scratch.write(scratch, chunk)?;
                ctx.dma.write_blocking(base.add(offset + k * part), scratch, chunk.len())?;
            }
            Ok(())
        }
        Some(tier) => Ok(ctx.tiers.get(tier).write(base.add(offset), data)?),
        None => Err(TransferError::Unmapped { address: base }.into()),
    }
}

/// Scales an accumulator back to a signed byte.
fn requantize(acc: i64, mult: i32, shift: i32) -> u8 {
    let scaled = acc.saturating_mul(i64::from(mult)) >> shift.clamp(0, 62);
    scaled.clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as i8 as u8
}

// ── Kernels ────────────────────────────────────────────────────────

/// Convolution, fully-connected and matmul stand-in: a short strided dot
/// product against the weight blob.
pub struct WeightedKernel;

impl Layer for WeightedKernel {
    fn name(&self) -> &str {
        "weighted"
    }

    fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
        let (in_addr, in_len) = input_source(ctx);
        let (out_addr, out_len) = output_target(ctx);
        let (w_addr, w_len) = weight_source(ctx)?;
        if in_len == 0 || out_len == 0 {
            return Err(KernelError::InvalidArgs("empty activation".into()));
        }

        let input = fetch(ctx, in_addr, 0..in_len)?;
        let weights = fetch(ctx, w_addr, 0..w_len)?;
        let taps = w_len.min(in_len).min(MAX_TAPS);
        let stride = (in_len / out_len).max(1);

        let range = ctx.partition(out_len);
        let out: Vec<u8> = range
            .clone()
            .map(|j| {
                let acc: i64 = (0..taps)
                    .map(|t| {
                        let x = i64::from(input[(j * stride + t) % in_len] as i8);
                        let w = i64::from(weights[(j + t) % w_len] as i8);
                        x * w
                    })
                    .sum();
                requantize(acc, ctx.args.out_mult, ctx.args.out_shift)
            })
            .collect();
        store(ctx, out_addr, range.start, &out)
    }
}

/// Max or average pooling over windows of `input / output` bytes.
pub struct PoolKernel {
    pub max: bool,
}

impl Layer for PoolKernel {
    fn name(&self) -> &str {
        if self.max {
            "max_pool"
        } else {
            "avg_pool"
        }
    }

    fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
        let (in_addr, in_len) = input_source(ctx);
        let (out_addr, out_len) = output_target(ctx);
        if in_len == 0 || out_len == 0 {
            return Err(KernelError::InvalidArgs("empty activation".into()));
        }

        let input = fetch(ctx, in_addr, 0..in_len)?;
        let window = (in_len / out_len).max(1);

        let range = ctx.partition(out_len);
        let out: Vec<u8> = range
            .clone()
            .map(|j| {
                let start = (j * window) % in_len;
                let end = (start + window).min(in_len);
                let values = input[start..end].iter().map(|&b| i32::from(b as i8));
                let v = if self.max {
                    values.max().unwrap_or(0)
                } else {
                    values.sum::<i32>() / (end - start) as i32
                };
                v as i8 as u8
            })
            .collect();
        store(ctx, out_addr, range.start, &out)
    }
}

/// Residual add of the layer input and the skip activation.
pub struct AddKernel;

impl Layer for AddKernel {
    fn name(&self) -> &str {
        "add"
    }

    fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
        if ctx.args.bypass_in.is_null() {
            return Err(KernelError::InvalidArgs("add without a skip activation".into()));
        }
        let (in_addr, _) = input_source(ctx);
        let (out_addr, out_len) = output_target(ctx);

        // Each core reads only its own slice, so the output may alias an operand.
        let range = ctx.partition(out_len);
        let a = fetch(ctx, in_addr, range.clone())?;
        let b = fetch(ctx, ctx.args.bypass_in, range.clone())?;
        let out: Vec<u8> = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| {
                let acc = i64::from(x as i8) * i64::from(ctx.args.in_mul1)
                    + i64::from(y as i8) * i64::from(ctx.args.in_mul2);
                requantize(acc, ctx.args.out_mult, ctx.args.out_shift)
            })
            .collect();
        store(ctx, out_addr, range.start, &out)
    }
}

/// Copies the input, wrapping when the output is larger.
pub struct IdentityKernel;

impl Layer for IdentityKernel {
    fn name(&self) -> &str {
        "identity"
    }

    fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError> {
        let (in_addr, in_len) = input_source(ctx);
        let (out_addr, out_len) = output_target(ctx);
        if in_len == 0 {
            return Err(KernelError::InvalidArgs("empty activation".into()));
        }
        let input = fetch(ctx, in_addr, 0..in_len)?;
        let range = ctx.partition(out_len);
        let out: Vec<u8> = range.clone().map(|j| input[j % in_len]).collect();
        store(ctx, out_addr, range.start, &out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CoreBarrier, KernelArgs};
    use transfer_engine::{Tiers, TransferEngine};

    struct Rig {
        tiers: Tiers,
        dma: TransferEngine,
        barrier: CoreBarrier,
    }

    impl Rig {
        fn new() -> Self {
            let tiers = Tiers::new(64, 1024, 1024).unwrap();
            let dma = TransferEngine::spawn(tiers.clone()).unwrap();
            Self {
                tiers,
                dma,
                barrier: CoreBarrier::new(1),
            }
        }

        fn run(&self, kernel: &dyn Layer, layer: &LayerDescriptor, args: KernelArgs, cores: usize) {
            for core in 0..cores {
                let ctx = KernelContext::new(args, core, cores, layer, &self.tiers, &self.dma, 64 / cores, &self.barrier);
                kernel.execute(&ctx).unwrap();
            }
        }

        fn on(&self, offset: usize) -> Address {
            self.tiers.onchip.address_of(offset)
        }
    }

    fn base_args(rig: &Rig) -> KernelArgs {
        KernelArgs {
            scratch: rig.tiers.scratch.base(),
            out_mult: 1,
            in_mul1: 1,
            in_mul2: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_copies() {
        let rig = Rig::new();
        let layer = LayerDescriptor::new("id", 0, LayerKind::Identity, 4, 6, 0);
        rig.tiers.onchip.write(rig.on(0), &[1, 2, 3, 4]).unwrap();
        let args = KernelArgs {
            onchip_in: rig.on(0),
            onchip_out: rig.on(100),
            ..base_args(&rig)
        };
        rig.run(&IdentityKernel, &layer, args, 4);
        assert_eq!(rig.tiers.onchip.read(rig.on(100), 6).unwrap(), vec![1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn test_max_and_avg_pool() {
        let rig = Rig::new();
        let layer = LayerDescriptor::new("pool", 0, LayerKind::MaxPool, 8, 2, 0);
        rig.tiers
            .onchip
            .write(rig.on(0), &[1, 5, 3, 0xFF, 2, 2, 8, 4])
            .unwrap();
        let args = KernelArgs {
            onchip_in: rig.on(0),
            onchip_out: rig.on(64),
            ..base_args(&rig)
        };
        rig.run(&PoolKernel { max: true }, &layer, args, 2);
        assert_eq!(rig.tiers.onchip.read(rig.on(64), 2).unwrap(), vec![5, 8]);

        rig.run(&PoolKernel { max: false }, &layer, args, 1);
        // (1 + 5 + 3 - 1) / 4 = 2, (2 + 2 + 8 + 4) / 4 = 4
        assert_eq!(rig.tiers.onchip.read(rig.on(64), 2).unwrap(), vec![2, 4]);
    }

    #[test]
    fn test_weighted_is_core_count_independent() {
        let rig = Rig::new();
        let layer = LayerDescriptor::new("conv", 0, LayerKind::Conv, 32, 16, 12);
        let input: Vec<u8> = (0..32).map(|i| (i * 7 % 256) as u8).collect();
        let weights: Vec<u8> = (0..12).map(|i| (i as i8 - 6) as u8).collect();
        rig.tiers.onchip.write(rig.on(0), &input).unwrap();
        rig.tiers.onchip.write(rig.on(32), &weights).unwrap();
        let args = KernelArgs {
            onchip_in: rig.on(0),
            exec_weights: rig.on(32),
            onchip_out: rig.on(100),
            out_shift: 2,
            ..base_args(&rig)
        };

        rig.run(&WeightedKernel, &layer, args, 1);
        let single = rig.tiers.onchip.read(rig.on(100), 16).unwrap();
        rig.tiers.onchip.fill(rig.on(100), 16, 0).unwrap();
        rig.run(&WeightedKernel, &layer, args, 4);
        assert_eq!(rig.tiers.onchip.read(rig.on(100), 16).unwrap(), single);
    }

    #[test]
    fn test_weighted_streams_offchip_weights() {
        let rig = Rig::new();
        let mut layer = LayerDescriptor::new("fc", 0, LayerKind::Gemm, 8, 4, 8);
        layer.needs_weight_allocation = false;
        layer.residency.weights = true;
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let weights = [1u8; 8];
        rig.tiers.onchip.write(rig.on(0), &input).unwrap();
        rig.tiers.onchip.write(rig.on(200), &weights).unwrap();
        rig.tiers
            .offchip
            .write(rig.tiers.offchip.address_of(16), &weights)
            .unwrap();

        let staged = KernelArgs {
            onchip_in: rig.on(0),
            exec_weights: rig.on(200),
            onchip_out: rig.on(100),
            ..base_args(&rig)
        };
        rig.run(&WeightedKernel, &layer, staged, 1);
        let expected = rig.tiers.onchip.read(rig.on(100), 4).unwrap();

        let streamed = KernelArgs {
            exec_weights: Address::NULL,
            weight_src: rig.tiers.offchip.address_of(16),
            onchip_out: rig.on(300),
            ..staged
        };
        rig.run(&WeightedKernel, &layer, streamed, 2);
        assert_eq!(rig.tiers.onchip.read(rig.on(300), 4).unwrap(), expected);
        // Stride 2, 8 taps of weight 1: out[0] = 1+..+8.
        assert_eq!(expected[0], 36);
    }

    #[test]
    fn test_requantize_saturates() {
        assert_eq!(requantize(36, 1, 0), 36);
        assert_eq!(requantize(3600, 1, 0), 127);
        assert_eq!(requantize(-3600, 1, 0) as i8, -128);
        assert_eq!(requantize(3600, 1, 5), 112);
    }

    #[test]
    fn test_add_in_place() {
        let rig = Rig::new();
        let mut layer = LayerDescriptor::new("add", 0, LayerKind::Add, 4, 4, 0);
        layer.branch.input = true;
        rig.tiers.onchip.write(rig.on(0), &[1, 2, 3, 4]).unwrap();
        rig.tiers.onchip.write(rig.on(16), &[10, 20, 30, 0xFE]).unwrap();
        let args = KernelArgs {
            onchip_in: rig.on(0),
            bypass_in: rig.on(16),
            onchip_out: rig.on(16),
            in_mul2: 2,
            ..base_args(&rig)
        };
        rig.run(&AddKernel, &layer, args, 2);
        assert_eq!(
            rig.tiers.onchip.read(rig.on(16), 4).unwrap(),
            vec![21, 42, 63, 0]
        );
    }

    #[test]
    fn test_add_requires_bypass() {
        let rig = Rig::new();
        let layer = LayerDescriptor::new("add", 0, LayerKind::Add, 4, 4, 0);
        let args = KernelArgs {
            onchip_in: rig.on(0),
            onchip_out: rig.on(16),
            ..base_args(&rig)
        };
        let ctx = KernelContext::new(args, 0, 1, &layer, &rig.tiers, &rig.dma, 64, &rig.barrier);
        assert!(matches!(
            AddKernel.execute(&ctx),
            Err(KernelError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_offchip_output_roundtrip() {
        let rig = Rig::new();
        let mut layer = LayerDescriptor::new("id", 0, LayerKind::Identity, 40, 40, 0);
        layer.residency.output = true;
        layer.offchip.output_bytes = 40;
        let input: Vec<u8> = (0..40).collect();
        rig.tiers.onchip.write(rig.on(0), &input).unwrap();
        let args = KernelArgs {
            onchip_in: rig.on(0),
            offchip_out: rig.tiers.offchip.address_of(100),
            ..base_args(&rig)
        };
        // 4 cores with 16-byte scratch slices: each core streams 10 bytes.
        rig.run(&IdentityKernel, &layer, args, 4);
        assert_eq!(
            rig.tiers.offchip.read(rig.tiers.offchip.address_of(100), 40).unwrap(),
            input
        );
    }

    #[test]
    fn test_reference_kernels_dispatch() {
        let layers = vec![
            LayerDescriptor::new("c", 0, LayerKind::Conv, 4, 4, 4),
            LayerDescriptor::new("p", 1, LayerKind::AvgPool, 4, 2, 0),
            LayerDescriptor::new("a", 2, LayerKind::Add, 2, 2, 0),
        ];
        let names: Vec<_> = reference_kernels(&layers).iter().map(|k| k.name().to_string()).collect();
        assert_eq!(names, vec!["weighted", "avg_pool", "add"]);
    }
}
