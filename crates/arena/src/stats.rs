// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena usage statistics.
//!
//! [`ArenaStats`] tracks how close a model comes to crossing the two
//! boundaries. The peak figures are what decides whether a network fits the
//! on-chip tier at all, so they survive [`DualArena::reset`](crate::DualArena::reset).

/// Cumulative statistics about arena usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ArenaStats {
    /// Number of successful allocations.
    pub total_allocations: u64,
    /// Number of frames popped (size-based frees, releases and unwinds).
    pub total_frees: u64,
    /// Number of requests rejected because the boundaries would cross.
    pub exhausted_count: u64,
    /// Number of times the arena was reset to its initial bounds.
    pub resets: u64,
    /// Highest number of bytes live at once across both sides.
    pub peak_live_bytes: usize,
    /// Highest position the begin boundary reached.
    pub peak_begin_bytes: usize,
    /// Highest number of bytes carved from the end boundary.
    pub peak_end_bytes: usize,
}

impl ArenaStats {
    pub(crate) fn record_allocation(&mut self) {
        self.total_allocations += 1;
    }

    pub(crate) fn record_free(&mut self) {
        self.total_frees += 1;
    }

    pub(crate) fn record_exhausted(&mut self) {
        self.exhausted_count += 1;
    }

    pub(crate) fn record_reset(&mut self) {
        self.resets += 1;
    }

    /// Updates the high-water marks from the current boundary positions.
    pub(crate) fn update_peaks(&mut self, begin_bytes: usize, end_bytes: usize) {
        self.peak_begin_bytes = self.peak_begin_bytes.max(begin_bytes);
        self.peak_end_bytes = self.peak_end_bytes.max(end_bytes);
        self.peak_live_bytes = self.peak_live_bytes.max(begin_bytes + end_bytes);
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Arena: {} allocs, {} frees, {} exhausted, {} resets, peak {} B live \
             (begin {} B, end {} B)",
            self.total_allocations,
            self.total_frees,
            self.exhausted_count,
            self.resets,
            self.peak_live_bytes,
            self.peak_begin_bytes,
            self.peak_end_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_never_decrease() {
        let mut s = ArenaStats::default();
        s.update_peaks(100, 40);
        s.update_peaks(20, 10);
        assert_eq!(s.peak_live_bytes, 140);
        assert_eq!(s.peak_begin_bytes, 100);
        assert_eq!(s.peak_end_bytes, 40);

        s.update_peaks(50, 200);
        assert_eq!(s.peak_live_bytes, 250);
        assert_eq!(s.peak_end_bytes, 200);
    }

    #[test]
    fn test_summary() {
        let mut s = ArenaStats::default();
        s.record_allocation();
        s.record_allocation();
        s.record_free();
        s.record_exhausted();
        let summary = s.summary();
        assert!(summary.contains("2 allocs"));
        assert!(summary.contains("1 frees"));
        assert!(summary.contains("1 exhausted"));
    }
}
