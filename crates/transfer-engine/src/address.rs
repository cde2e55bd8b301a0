// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tier-tagged 32-bit addresses.
//!
//! Kernels receive machine words, so every buffer is named by a 32-bit
//! address. Each memory tier occupies its own window of the address space,
//! which lets the transfer engine route a copy from the two raw addresses
//! alone:
//!
//! ```text
//! 0x1000_0000 ┬ scratch   (core-local, ≤ 1 MB)
//! 0x1C00_0000 ┼ on-chip   (arena tier, ≤ 16 MB)
//! 0x8000_0000 ┴ off-chip  (DMA only, ≤ 1 GB)
//! ```

use std::fmt;

/// A memory tier of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Small core-local scratchpad handed to kernels.
    Scratch,
    /// Mid-size pool managed by the double-ended arena.
    OnChip,
    /// Large pool reachable only through the transfer engine.
    OffChip,
}

impl Tier {
    /// First address of the tier window.
    pub const fn base(self) -> u32 {
        match self {
            Tier::Scratch => 0x1000_0000,
            Tier::OnChip => 0x1C00_0000,
            Tier::OffChip => 0x8000_0000,
        }
    }

    /// Size of the tier window in bytes.
    pub const fn span(self) -> u32 {
        match self {
            Tier::Scratch => 0x0010_0000,
            Tier::OnChip => 0x0100_0000,
            Tier::OffChip => 0x4000_0000,
        }
    }

    /// Returns a short label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Scratch => "scratch",
            Tier::OnChip => "on-chip",
            Tier::OffChip => "off-chip",
        }
    }

    fn contains(self, raw: u32) -> bool {
        raw >= self.base() && raw - self.base() < self.span()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 32-bit address in one of the tier windows, or [`Address::NULL`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Address(u32);

impl Address {
    /// The null address. Never resolves to a tier.
    pub const NULL: Address = Address(0);

    /// Wraps a raw machine word.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the address `offset` bytes into `tier`.
    pub fn in_tier(tier: Tier, offset: usize) -> Self {
        Self(tier.base().wrapping_add(offset as u32))
    }

    /// Returns the raw machine word.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`Address::NULL`].
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` further on.
    pub fn add(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes as u32))
    }

    /// Returns the tier whose window contains this address.
    pub fn tier(self) -> Option<Tier> {
        [Tier::Scratch, Tier::OnChip, Tier::OffChip]
            .into_iter()
            .find(|t| t.contains(self.0))
    }

    /// Returns the byte offset from the start of the containing tier.
    pub fn tier_offset(self) -> Option<usize> {
        self.tier().map(|t| (self.0 - t.base()) as usize)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
