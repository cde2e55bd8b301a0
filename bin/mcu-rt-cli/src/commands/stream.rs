// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mcu-rt stream` command: feed synthetic camera frames to the network.

use super::{load_network, print_banner};
use runtime::{InputSource, RuntimeConfig};
use std::time::Duration;
use tokio::sync::mpsc;

pub async fn execute(mut config: RuntimeConfig, frames: usize, interval_ms: u64) -> anyhow::Result<()> {
    print_banner("Frame Stream");

    config.input_source = InputSource::Frame;
    let network = load_network(config)?.setup()?;
    let frame_len = network.table().input_bytes();
    println!(
        "  Streaming {} frames of {frame_len} B (Ctrl-C to stop)...",
        if frames == 0 { "unbounded".to_string() } else { frames.to_string() }
    );
    println!();

    let (tx, rx) = mpsc::channel(4);
    let producer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        let mut sent = 0usize;
        while frames == 0 || sent < frames {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted after {sent} frames");
                    break;
                }
                _ = ticker.tick() => {
                    let frame = runtime::demo::demo_frame((sent % 256) as u8, frame_len);
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                    sent += 1;
                }
            }
        }
    });

    let (_network, summary) = runtime::run_stream(network, rx, |i, report| {
        println!("   #{i:<5} {}", report.result);
    })
    .await?;
    producer.await?;

    println!();
    println!("  Summary:");
    println!("   Passes:             {}", summary.passes);
    println!("   Checksum mismatches: {}", summary.checksum_mismatches);
    println!("   Throughput:         {:.1} frames/s", summary.frames_per_second());
    println!();
    Ok(())
}
