// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte-addressed tier memories.
//!
//! A [`TierMemory`] is a cheaply clonable handle to one tier's backing
//! bytes. Every access is checked against the tier window and the memory
//! length before the lock is taken.

use crate::{Address, Tier, TransferError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the bytes of one memory tier.
#[derive(Clone)]
pub struct TierMemory {
    tier: Tier,
    len: usize,
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl TierMemory {
    /// Creates a zero-filled memory of `len` bytes for `tier`.
    pub fn new(tier: Tier, len: usize) -> Result<Self, TransferError> {
        if len > tier.span() as usize {
            return Err(TransferError::TierTooLarge { tier, len });
        }
        Ok(Self {
            tier,
            len,
            bytes: Arc::new(Mutex::new(vec![0u8; len])),
        })
    }

    /// Returns the tier this memory backs.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Returns the memory size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the memory has no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the first address of the memory.
    pub fn base(&self) -> Address {
        Address::in_tier(self.tier, 0)
    }

    /// Returns the address `offset` bytes into the memory.
    pub fn address_of(&self, offset: usize) -> Address {
        Address::in_tier(self.tier, offset)
    }

    /// Resolves `address` to a byte offset, checking tier and bounds for a
    /// `len`-byte access.
    pub fn offset_of(&self, address: Address, len: usize) -> Result<usize, TransferError> {
        match address.tier() {
            Some(t) if t == self.tier => {}
            Some(_) => {
                return Err(TransferError::WrongTier {
                    address,
                    expected: self.tier,
                })
            }
            None => return Err(TransferError::Unmapped { address }),
        }
        let offset = address.tier_offset().unwrap_or(usize::MAX);
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(offset),
            _ => Err(TransferError::OutOfBounds {
                address,
                len,
                tier: self.tier,
            }),
        }
    }

    /// Copies `len` bytes starting at `address` into a new vector.
    pub fn read(&self, address: Address, len: usize) -> Result<Vec<u8>, TransferError> {
        let offset = self.offset_of(address, len)?;
        let bytes = self.lock()?;
        Ok(bytes[offset..offset + len].to_vec())
    }

    /// Copies bytes starting at `address` into `dst`.
    pub fn read_into(&self, address: Address, dst: &mut [u8]) -> Result<(), TransferError> {
        let offset = self.offset_of(address, dst.len())?;
        let bytes = self.lock()?;
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }

    /// Writes `src` starting at `address`.
    pub fn write(&self, address: Address, src: &[u8]) -> Result<(), TransferError> {
        let offset = self.offset_of(address, src.len())?;
        let mut bytes = self.lock()?;
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Sets `len` bytes starting at `address` to `value`.
    pub fn fill(&self, address: Address, len: usize, value: u8) -> Result<(), TransferError> {
        let offset = self.offset_of(address, len)?;
        let mut bytes = self.lock()?;
        bytes[offset..offset + len].fill(value);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<u8>>, TransferError> {
        self.bytes
            .lock()
            .map_err(|_| TransferError::Poisoned { tier: self.tier })
    }
}

impl std::fmt::Debug for TierMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierMemory")
            .field("tier", &self.tier)
            .field("base", &self.base())
            .field("len", &self.len)
            .finish()
    }
}

/// The three tier memories of one target.
#[derive(Debug, Clone)]
pub struct Tiers {
    pub scratch: TierMemory,
    pub onchip: TierMemory,
    pub offchip: TierMemory,
}

impl Tiers {
    /// Allocates zero-filled memories of the given sizes.
    pub fn new(scratch: usize, onchip: usize, offchip: usize) -> Result<Self, TransferError> {
        Ok(Self {
            scratch: TierMemory::new(Tier::Scratch, scratch)?,
            onchip: TierMemory::new(Tier::OnChip, onchip)?,
            offchip: TierMemory::new(Tier::OffChip, offchip)?,
        })
    }

    /// Returns the memory backing `tier`.
    pub fn get(&self, tier: Tier) -> &TierMemory {
        match tier {
            Tier::Scratch => &self.scratch,
            Tier::OnChip => &self.onchip,
            Tier::OffChip => &self.offchip,
        }
    }

    /// Returns the memory whose window contains `address`.
    pub fn resolve(&self, address: Address) -> Result<&TierMemory, TransferError> {
        address
            .tier()
            .map(|t| self.get(t))
            .ok_or(TransferError::Unmapped { address })
    }
}
