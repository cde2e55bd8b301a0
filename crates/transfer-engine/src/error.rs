// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tier memories and transfers.

use crate::{Address, Direction, Tier};

/// Errors reported by tier memories, the off-chip pool and the DMA worker.
///
/// `Clone` so a single failure can be handed to every waiter of a handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The address does not fall inside any tier window.
    #[error("address {address} is not mapped to any memory tier")]
    Unmapped { address: Address },

    /// The access runs past the end of the tier memory.
    #[error("{len}-byte access at {address} overruns the {tier} tier")]
    OutOfBounds {
        address: Address,
        len: usize,
        tier: Tier,
    },

    /// The address belongs to a different tier than the memory it was used on.
    #[error("address {address} is not in the {expected} tier")]
    WrongTier { address: Address, expected: Tier },

    /// A transfer was issued between tiers it cannot connect.
    #[error("invalid {direction} transfer from {src} to {dst}")]
    InvalidDirection {
        direction: Direction,
        src: Address,
        dst: Address,
    },

    /// A zero-length transfer was requested.
    #[error("zero-length transfer")]
    ZeroLength,

    /// The off-chip pool cannot satisfy a reservation.
    #[error("off-chip pool exhausted reserving '{label}': requested {requested} bytes, {available} available")]
    PoolExhausted {
        label: String,
        requested: usize,
        available: usize,
    },

    /// A tier memory larger than its address window was requested.
    #[error("{len} bytes do not fit the {tier} address window")]
    TierTooLarge { tier: Tier, len: usize },

    /// A thread panicked while holding a tier lock.
    #[error("{tier} memory lock poisoned")]
    Poisoned { tier: Tier },

    /// The DMA worker is no longer accepting jobs.
    #[error("transfer engine worker disconnected")]
    Disconnected,

    /// The DMA worker thread could not be started.
    #[error("failed to spawn transfer worker: {0}")]
    Spawn(String),
}
