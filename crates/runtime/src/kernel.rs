// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The kernel calling convention.
//!
//! Every layer kernel receives the same 13-word argument vector, built by
//! the scheduler from the arena regions, the staging slots and the bypass
//! state:
//!
//! ```text
//!  0 offchip_in    1 offchip_out   2 weight_src    3 onchip_in
//!  4 bypass_in     5 onchip_out    6 exec_weights  7 scratch
//!  8 ram_handle    9 out_mult     10 in_mul1      11 in_mul2
//! 12 out_shift
//! ```
//!
//! The kernel runs on every core of the team at once. Cores split the work
//! among themselves using [`KernelContext::partition`]; the scheduler
//! brackets each call with a barrier on both sides.

use layer_table::LayerDescriptor;
use std::ops::Range;
use std::sync::{Condvar, Mutex, PoisonError};
use transfer_engine::{Address, Tiers, TransferEngine, TransferError};

/// Number of words in the kernel argument vector.
pub const NUM_ARGS: usize = 13;

/// The fixed kernel argument vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct KernelArgs {
    /// Off-chip activation buffer the layer may stream its input from.
    pub offchip_in: Address,
    /// Off-chip activation buffer the layer may stream its output to.
    pub offchip_out: Address,
    /// Off-chip address of the layer's weight blob, or `NULL`.
    pub weight_src: Address,
    pub onchip_in: Address,
    /// Skip activation for merge layers, otherwise the spill address or `NULL`.
    pub bypass_in: Address,
    pub onchip_out: Address,
    /// Staged on-chip weights, or `NULL`.
    pub exec_weights: Address,
    /// Base of the scratch tier.
    pub scratch: Address,
    /// Handle of the off-chip device.
    pub ram_handle: u32,
    pub out_mult: i32,
    pub in_mul1: i32,
    pub in_mul2: i32,
    pub out_shift: i32,
}

impl KernelArgs {
    /// Flattens the vector into machine words, in slot order.
    pub fn to_words(&self) -> [u32; NUM_ARGS] {
        [
            self.offchip_in.raw(),
            self.offchip_out.raw(),
            self.weight_src.raw(),
            self.onchip_in.raw(),
            self.bypass_in.raw(),
            self.onchip_out.raw(),
            self.exec_weights.raw(),
            self.scratch.raw(),
            self.ram_handle,
            self.out_mult as u32,
            self.in_mul1 as u32,
            self.in_mul2 as u32,
            self.out_shift as u32,
        ]
    }

    /// Rebuilds the vector from machine words.
    pub fn from_words(words: [u32; NUM_ARGS]) -> Self {
        Self {
            offchip_in: Address::from_raw(words[0]),
            offchip_out: Address::from_raw(words[1]),
            weight_src: Address::from_raw(words[2]),
            onchip_in: Address::from_raw(words[3]),
            bypass_in: Address::from_raw(words[4]),
            onchip_out: Address::from_raw(words[5]),
            exec_weights: Address::from_raw(words[6]),
            scratch: Address::from_raw(words[7]),
            ram_handle: words[8],
            out_mult: words[9] as i32,
            in_mul1: words[10] as i32,
            in_mul2: words[11] as i32,
            out_shift: words[12] as i32,
        }
    }
}

/// Failures reported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A tier access or DMA transfer issued by the kernel failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The arguments do not make sense for this kernel.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The kernel panicked.
    #[error("kernel panicked")]
    Panicked,

    /// Another core failed while this one waited at the in-kernel barrier.
    #[error("kernel call aborted by another core")]
    Aborted,
}

// ── Core Barrier ───────────────────────────────────────────────────

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// Reusable barrier for the cores of one kernel call.
///
/// Unlike [`std::sync::Barrier`] it can be aborted: a core that fails
/// releases everyone parked here, and later waits return at once.
pub(crate) struct CoreBarrier {
    cores: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl CoreBarrier {
    pub fn new(cores: usize) -> Self {
        Self {
            cores: cores.max(1),
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn wait(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            return Err(KernelError::Aborted);
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.cores {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }
        while state.generation == generation && !state.aborted {
            state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation == generation {
            Err(KernelError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Releases every waiter and fails all later waits until [`reset`](Self::reset).
    pub fn abort(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).aborted = true;
        self.cvar.notify_all();
    }

    /// Must only be called while no core is inside a kernel.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.arrived = 0;
        state.aborted = false;
    }
}

/// Everything a kernel may touch during one call.
pub struct KernelContext<'a> {
    pub args: KernelArgs,
    pub core_id: usize,
    pub num_cores: usize,
    pub layer: &'a LayerDescriptor,
    pub tiers: &'a Tiers,
    pub dma: &'a TransferEngine,
    scratch_partition: usize,
    barrier: &'a CoreBarrier,
}

impl<'a> KernelContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        args: KernelArgs,
        core_id: usize,
        num_cores: usize,
        layer: &'a LayerDescriptor,
        tiers: &'a Tiers,
        dma: &'a TransferEngine,
        scratch_partition: usize,
        barrier: &'a CoreBarrier,
    ) -> Self {
        Self {
            args,
            core_id,
            num_cores,
            layer,
            tiers,
            dma,
            scratch_partition,
            barrier,
        }
    }

    /// Splits `len` items into contiguous per-core chunks and returns this
    /// core's share. Trailing cores may get an empty range.
    pub fn partition(&self, len: usize) -> Range<usize> {
        let chunk = len.div_ceil(self.num_cores.max(1));
        let start = (self.core_id * chunk).min(len);
        let end = (start + chunk).min(len);
        start..end
    }

    /// This core's slice of the scratch tier, as `(address, len)`.
    pub fn scratch(&self) -> (Address, usize) {
        (
            self.args.scratch.add(self.core_id * self.scratch_partition),
            self.scratch_partition,
        )
    }

    /// Waits until every core of the team reaches this point.
    ///
    /// Every core must call it the same number of times in a kernel. When
    /// another core fails or panics first, this returns
    /// [`KernelError::Aborted`] instead of blocking; propagate it with `?`.
    pub fn barrier(&self) -> Result<(), KernelError> {
        self.barrier.wait()
    }
}

/// A layer kernel.
///
/// Implementations are shared by all cores of the team, so they must be
/// `Send + Sync` and keep no per-call mutable state.
pub trait Layer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Runs this core's share of the layer.
    ///
    /// An error or panic on any core aborts the whole call: cores waiting
    /// in [`KernelContext::barrier`] are released with an error.
    fn execute(&self, ctx: &KernelContext<'_>) -> Result<(), KernelError>;
}
