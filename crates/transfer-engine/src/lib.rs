// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # transfer-engine
//!
//! Simulated memory tiers and the DMA engine that moves data between them.
//!
//! # Key Components
//!
//! - [`Address`] / [`Tier`]: 32-bit addresses tagged by tier window.
//! - [`TierMemory`] / [`Tiers`]: shared, bounds-checked backing bytes.
//! - [`OffChipPool`]: setup-time reservations in the off-chip tier.
//! - [`TransferEngine`]: asynchronous copies with wait handles. Off-chip
//!   memory is never touched by kernels directly; every byte crosses this
//!   engine.
//!
//! # Example
//! ```
//! use transfer_engine::{Tiers, TransferEngine};
//!
//! let dma = TransferEngine::spawn(Tiers::new(64, 256, 1024).unwrap()).unwrap();
//! let off = dma.tiers().offchip.base();
//! let on = dma.tiers().onchip.base();
//! dma.tiers().offchip.write(off, &[1, 2, 3, 4]).unwrap();
//!
//! let handle = dma.read(on, off, 4).unwrap();
//! handle.wait().unwrap();
//! assert_eq!(dma.tiers().onchip.read(on, 4).unwrap(), vec![1, 2, 3, 4]);
//! ```

mod address;
mod engine;
mod error;
mod memory;
mod pool;
mod stats;

pub use address::{Address, Tier};
pub use engine::{Direction, TransferEngine, TransferHandle};
pub use error::TransferError;
pub use memory::{TierMemory, Tiers};
pub use pool::{OffChipPool, Reservation};
pub use stats::TransferStats;
