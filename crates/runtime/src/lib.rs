// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Orchestrates quantised CNN inference on a multi-core microcontroller
//! whose memory comes in three tiers: a small core-local scratchpad, a
//! shared on-chip arena and a large off-chip RAM.
//!
//! The runtime takes:
//! - A validated [`LayerTable`](layer_table::LayerTable) from `layer-table`.
//! - A [`DualArena`](arena::DualArena) from `arena` for on-chip buffers.
//! - A [`TransferEngine`](transfer_engine::TransferEngine) from
//!   `transfer-engine` for off-chip DMA.
//!
//! And runs the network layer by layer: activations ping-pong between the
//! two ends of the arena, the next layer's weights are prefetched into one
//! of two staging slots while the current layer runs, and skip connections
//! are kept alive across the layers they bypass.
//!
//! # Type-State Pipeline
//! ```text
//! Network<Idle> → Network<Loaded> → Network<Ready>
//! ```
//! Transitions are compile-time checked.
//!
//! # Streaming
//! [`run_stream`] drives passes from a `tokio` channel of frames, one pass
//! per frame on the blocking pool.

mod blobs;
mod bypass;
mod checksum;
mod config;
pub mod demo;
mod engine;
mod error;
mod kernel;
mod kernels;
mod layout;
mod metrics;
mod reference;
mod result;
mod scheduler;
mod staging;
mod stream;
mod team;

pub use blobs::{open_store, stage_blob, Blob, BlobStore, DirectoryBlobs, MemoryBlobs, SafeTensorBlobs, SAFETENSORS_FILE};
pub use bypass::{BypassManager, BypassRecord, BypassState, SpillRecord};
pub use checksum::{byte_sum, word_sum, ChecksumMismatch, ChecksumTarget};
pub use config::{InputSource, RuntimeConfig, TierSizes};
pub use engine::{Idle, Loaded, Network, NetworkState, Ready, MANIFEST_FILE};
pub use error::RuntimeError;
pub use kernel::{KernelArgs, KernelContext, KernelError, Layer};
pub use kernels::{reference_kernels, AddKernel, IdentityKernel, PoolKernel, WeightedKernel};
pub use layout::{offchip_tier_bytes, OffChipLayout};
pub use metrics::{LayerMetrics, PassMetrics};
pub use reference::{ReferenceExecutor, VerifyReport};
pub use result::{InferenceResult, ResultLayout};
pub use scheduler::{PassReport, Scheduler, SchedulerOptions, SchedulerState};
pub use staging::{Slot, StagingSlots};
pub use stream::{run_stream, StreamSummary};
