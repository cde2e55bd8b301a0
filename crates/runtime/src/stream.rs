// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Continuous inference over a stream of frames.
//!
//! ```text
//!  camera task ──mpsc──▶ run_stream ──spawn_blocking──▶ Network::run
//!                            │
//!                            └──▶ on_pass(index, &report)
//! ```
//!
//! A pass blocks its thread until every core has finished, so each frame is
//! handed to tokio's blocking pool together with the network and the
//! network comes back with the report. The stream ends when every sender
//! is dropped.

use crate::config::InputSource;
use crate::engine::{Network, Ready};
use crate::result::InferenceResult;
use crate::scheduler::PassReport;
use crate::RuntimeError;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Totals of one stream.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StreamSummary {
    pub passes: usize,
    /// Checksum mismatches over all passes.
    pub checksum_mismatches: usize,
    pub last: Option<InferenceResult>,
    pub elapsed: Duration,
}

impl StreamSummary {
    /// Passes per second over the whole stream.
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.passes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs one pass per frame received on `frames` until the channel closes.
///
/// Returns the network so the caller can keep using it. A failed pass ends
/// the stream with its error.
pub async fn run_stream<F>(
    mut network: Network<Ready>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    mut on_pass: F,
) -> Result<(Network<Ready>, StreamSummary), RuntimeError>
where
    F: FnMut(usize, &PassReport),
{
    if network.config().input_source != InputSource::Frame {
        return Err(RuntimeError::ConfigError(
            "streaming requires input_source = \"frame\"".into(),
        ));
    }

    let started = Instant::now();
    let mut summary = StreamSummary::default();
    while let Some(frame) = frames.recv().await {
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = network.write_frame(&frame).and_then(|()| network.run());
            (network, outcome)
        })
        .await
        .map_err(|e| RuntimeError::Stream(format!("pass task failed: {e}")))?;
        network = returned;

        let report = outcome?;
        on_pass(summary.passes, &report);
        summary.passes += 1;
        summary.checksum_mismatches += report.checksum_mismatches.len();
        summary.last = Some(report.result);
    }
    summary.elapsed = started.elapsed();

    tracing::info!(
        "stream closed after {} passes ({:.1} frames/s)",
        summary.passes,
        summary.frames_per_second()
    );
    Ok((network, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::RuntimeConfig;

    #[tokio::test]
    async fn test_stream_runs_every_frame() {
        let config = RuntimeConfig {
            input_source: InputSource::Frame,
            ..demo::demo_config()
        };
        let network = demo::demo_network(config).unwrap().setup().unwrap();
        let frame_len = network.table().input_bytes();

        let (tx, rx) = mpsc::channel(4);
        let producer = tokio::spawn(async move {
            for k in 0..3u8 {
                tx.send(vec![k; frame_len]).await.unwrap();
            }
        });

        let mut seen = Vec::new();
        let (network, summary) = run_stream(network, rx, |i, report| {
            seen.push((i, report.output.clone()));
        })
        .await
        .unwrap();
        producer.await.unwrap();

        assert_eq!(summary.passes, 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].0, 2);
        assert!(seen.iter().all(|(_, out)| out.len() == network.table().output_bytes()));
        assert!(summary.last.is_some());
        assert_eq!(network.table().input_bytes(), frame_len);
    }

    #[tokio::test]
    async fn test_stream_rejects_offchip_source() {
        let network = demo::demo_network(demo::demo_config()).unwrap().setup().unwrap();
        let (_tx, rx) = mpsc::channel(1);
        let err = run_stream(network, rx, |_, _| {}).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_stream_stops_on_bad_frame() {
        let config = RuntimeConfig {
            input_source: InputSource::Frame,
            ..demo::demo_config()
        };
        let network = demo::demo_network(config).unwrap().setup().unwrap();
        let (tx, rx) = mpsc::channel(1);
        tx.send(vec![0; 3]).await.unwrap();
        drop(tx);
        assert!(run_stream(network, rx, |_, _| {}).await.is_err());
    }
}
