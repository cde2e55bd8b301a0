// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pass profiling metrics.
//!
//! [`PassMetrics`] collects per-layer and aggregate timing, arena usage and
//! throughput for one inference pass. Weight-wait time is what the
//! double-buffered prefetch is meant to hide, so it is reported separately
//! from kernel time.

use std::time::Duration;

/// Metrics for a single layer's execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerMetrics {
    /// Layer name.
    pub layer_name: String,
    /// Time spent waiting for weight transfers before the kernel ran.
    pub weight_wait_duration: Duration,
    /// Time spent in the kernel, barrier to barrier.
    pub kernel_duration: Duration,
    /// Multiply-accumulates performed.
    pub macs: u64,
    /// On-chip bytes live while the kernel ran.
    pub arena_live_bytes: usize,
}

impl LayerMetrics {
    /// Returns throughput in MACs per second.
    pub fn macs_per_second(&self) -> f64 {
        let secs = self.kernel_duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.macs as f64 / secs
    }
}

/// Aggregate metrics for one pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PassMetrics {
    /// Total wall-clock time of the pass.
    pub total_duration: Duration,
    /// Total time spent waiting on weight transfers.
    pub total_weight_wait_duration: Duration,
    /// Total time spent in kernels.
    pub total_kernel_duration: Duration,
    /// Highest on-chip live byte count seen at a kernel dispatch.
    pub peak_arena_bytes: usize,
    /// Total multiply-accumulates.
    pub total_macs: u64,
    /// Number of cores in the team.
    pub num_cores: usize,
    /// Per-layer metrics (empty when profiling is disabled).
    pub layer_metrics: Vec<LayerMetrics>,
}

impl PassMetrics {
    /// Creates an empty metrics container.
    pub fn new(num_cores: usize) -> Self {
        Self {
            num_cores,
            ..Default::default()
        }
    }

    /// Records metrics for a single layer.
    pub fn record_layer(
        &mut self,
        name: String,
        weight_wait: Duration,
        kernel: Duration,
        macs: u64,
        arena_live_bytes: usize,
    ) {
        self.total_weight_wait_duration += weight_wait;
        self.total_kernel_duration += kernel;
        self.total_macs += macs;
        self.peak_arena_bytes = self.peak_arena_bytes.max(arena_live_bytes);
        self.layer_metrics.push(LayerMetrics {
            layer_name: name,
            weight_wait_duration: weight_wait,
            kernel_duration: kernel,
            macs,
            arena_live_bytes,
        });
    }

    /// Finalises metrics with the total wall-clock time.
    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
    }

    /// Returns pass throughput in MACs per second.
    pub fn macs_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.total_macs == 0 {
            return 0.0;
        }
        self.total_macs as f64 / secs
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let wait_pct = if self.total_duration.as_secs_f64() > 0.0 {
            (self.total_weight_wait_duration.as_secs_f64() / self.total_duration.as_secs_f64()) * 100.0
        } else {
            0.0
        };

        format!(
            "Pass: {:.2}ms total, {} layers on {} cores, \
             {:.2}ms weight wait ({:.0}%), {:.2}ms kernels, \
             peak arena {} B, {} MACs ({:.1} MMAC/s)",
            self.total_duration.as_secs_f64() * 1000.0,
            self.layer_metrics.len(),
            self.num_cores,
            self.total_weight_wait_duration.as_secs_f64() * 1000.0,
            wait_pct,
            self.total_kernel_duration.as_secs_f64() * 1000.0,
            self.peak_arena_bytes,
            self.total_macs,
            self.macs_per_second() / 1e6,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = PassMetrics::new(8);
        assert_eq!(m.macs_per_second(), 0.0);
        assert_eq!(m.num_cores, 8);
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = PassMetrics::new(2);
        m.record_layer("l0".into(), Duration::from_millis(5), Duration::from_millis(10), 1000, 300);
        m.record_layer("l1".into(), Duration::from_millis(3), Duration::from_millis(8), 500, 700);
        m.finalise(Duration::from_millis(30));

        assert_eq!(m.layer_metrics.len(), 2);
        assert_eq!(m.peak_arena_bytes, 700);
        assert_eq!(m.total_macs, 1500);
        assert_eq!(m.total_weight_wait_duration, Duration::from_millis(8));
        assert_eq!(m.total_kernel_duration, Duration::from_millis(18));
        assert!(m.macs_per_second() > 0.0);
    }

    #[test]
    fn test_layer_macs_per_second() {
        let l = LayerMetrics {
            layer_name: "conv".into(),
            weight_wait_duration: Duration::ZERO,
            kernel_duration: Duration::from_secs(2),
            macs: 100,
            arena_live_bytes: 0,
        };
        assert!((l.macs_per_second() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_summary_format() {
        let mut m = PassMetrics::new(4);
        m.record_layer("l0".into(), Duration::from_millis(1), Duration::from_millis(5), 10, 1024);
        m.finalise(Duration::from_millis(10));

        let s = m.summary();
        assert!(s.contains("Pass:"));
        assert!(s.contains("1 layers on 4 cores"));
        assert!(s.contains("peak arena 1024 B"));
    }
}
