// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Off-chip reservation pool.
//!
//! The off-chip tier is carved once at setup into long-lived regions
//! (weights, the two activation ping-pong buffers, the input image). There
//! is no free: the whole pool lives for the process.

use crate::{Address, TierMemory, TransferError};

/// Alignment of every off-chip reservation.
const RESERVATION_ALIGN: usize = 4;

/// A named off-chip reservation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Reservation {
    pub label: String,
    pub address: Address,
    pub len: usize,
}

/// Bump allocator over the off-chip tier.
#[derive(Debug)]
pub struct OffChipPool {
    memory: TierMemory,
    next: usize,
    reservations: Vec<Reservation>,
}

impl OffChipPool {
    /// Creates an empty pool over `memory`.
    pub fn new(memory: TierMemory) -> Self {
        Self {
            memory,
            next: 0,
            reservations: Vec::new(),
        }
    }

    /// Reserves `len` bytes and returns their base address.
    pub fn reserve(&mut self, label: &str, len: usize) -> Result<Address, TransferError> {
        let aligned = (len + RESERVATION_ALIGN - 1) & !(RESERVATION_ALIGN - 1);
        if aligned > self.remaining() {
            return Err(TransferError::PoolExhausted {
                label: label.to_string(),
                requested: len,
                available: self.remaining(),
            });
        }
        let address = self.memory.address_of(self.next);
        self.next += aligned;
        self.reservations.push(Reservation {
            label: label.to_string(),
            address,
            len,
        });
        tracing::debug!("off-chip reserve '{label}': {len} B @ {address}");
        Ok(address)
    }

    /// Bytes reserved so far.
    pub fn used(&self) -> usize {
        self.next
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.memory.len() - self.next
    }

    /// All reservations in the order they were made.
    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tier;

    #[test]
    fn test_reserve_sequential() {
        let mem = TierMemory::new(Tier::OffChip, 1024).unwrap();
        let mut pool = OffChipPool::new(mem.clone());

        let w = pool.reserve("weights", 100).unwrap();
        let a = pool.reserve("act_a", 200).unwrap();
        assert_eq!(w, mem.base());
        assert_eq!(a, mem.address_of(100));
        assert_eq!(pool.used(), 300);
        assert_eq!(pool.reservations().len(), 2);
    }

    #[test]
    fn test_reserve_aligns() {
        let mem = TierMemory::new(Tier::OffChip, 64).unwrap();
        let mut pool = OffChipPool::new(mem.clone());
        pool.reserve("odd", 5).unwrap();
        let next = pool.reserve("next", 4).unwrap();
        assert_eq!(next, mem.address_of(8));
    }

    #[test]
    fn test_exhausted() {
        let mem = TierMemory::new(Tier::OffChip, 64).unwrap();
        let mut pool = OffChipPool::new(mem);
        pool.reserve("a", 60).unwrap();
        let err = pool.reserve("b", 8).unwrap_err();
        assert!(matches!(err, TransferError::PoolExhausted { available: 4, .. }));
    }
}
