// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transfer counters.

use serde::Serialize;

/// Counters accumulated by the DMA worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Off-chip to on-chip/scratch transfers completed.
    pub reads: u64,
    /// On-chip/scratch to off-chip transfers completed.
    pub writes: u64,
    /// Total bytes moved by completed transfers.
    pub bytes_moved: u64,
    /// Transfers that completed with an error.
    pub failures: u64,
    /// Explicit waits on a transfer handle.
    pub waits: u64,
    /// Waits that found the transfer still running.
    pub blocking_waits: u64,
}

impl TransferStats {
    /// Returns a one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "Transfers: {} reads, {} writes, {} bytes moved, {} failures, {}/{} waits blocked",
            self.reads, self.writes, self.bytes_moved, self.failures, self.blocking_waits, self.waits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let stats = TransferStats {
            reads: 3,
            writes: 1,
            bytes_moved: 512,
            failures: 0,
            waits: 4,
            blocking_waits: 2,
        };
        let s = stats.summary();
        assert!(s.contains("3 reads"));
        assert!(s.contains("512 bytes"));
        assert!(s.contains("2/4 waits"));
    }
}
