// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mcu-rt inspect` command: display the layer table and memory plan.
//!
//! Prints every descriptor, the skip connections found by validation and
//! how much of each tier one pass actually uses.

use super::{load_network, print_banner, truncate};
use runtime::{offchip_tier_bytes, ReferenceExecutor, RuntimeConfig};

pub async fn execute(config: RuntimeConfig) -> anyhow::Result<()> {
    print_banner("Model Inspector");

    let sizes = config.tier_sizes()?;
    let loaded = load_network(config)?;
    let table = loaded.table();

    // ── Summary ────────────────────────────────────────────────
    println!("  {}", table.summary());
    println!("  Input: {} B, output: {} B", table.input_bytes(), table.output_bytes());
    if let Some(key) = &table.input_blob {
        println!("  Input blob: '{key}'");
    }
    println!();

    // ── Per-Layer Detail ───────────────────────────────────────
    println!(
        "  {:<4} {:<20} {:<10} {:>8} {:>8} {:>8}  {}",
        "Idx", "Name", "Kind", "In", "Out", "Weights", "Flags",
    );
    println!("  {}", "-".repeat(78));
    for layer in table.iter_layers() {
        let mut flags = Vec::new();
        if layer.needs_weight_allocation {
            flags.push("staged");
        }
        if layer.residency.weights {
            flags.push("w-offchip");
        }
        if layer.residency.input {
            flags.push("in-offchip");
        }
        if layer.residency.output {
            flags.push("out-offchip");
        }
        if layer.arms_bypass() {
            flags.push("keep");
        }
        if layer.branch.output {
            flags.push("spill");
        }
        if layer.is_merge() {
            flags.push("merge");
        }
        println!(
            "  {:<4} {:<20} {:<10} {:>8} {:>8} {:>8}  {}",
            layer.index,
            truncate(&layer.name, 20),
            layer.kind.as_str(),
            layer.input_bytes,
            layer.output_bytes,
            layer.weight_bytes,
            flags.join(","),
        );
    }
    println!();

    // ── Skip Connections ───────────────────────────────────────
    if !table.skips().is_empty() {
        println!("  Skip connections:");
        for skip in table.skips() {
            println!(
                "   {} → {} ({})",
                table.layers[skip.producer].name,
                table.layers[skip.consumer].name,
                if skip.spilled { "spilled" } else { "kept on-chip" },
            );
        }
        println!();
    }

    // ── Memory Plan ────────────────────────────────────────────
    let weights = table.total_weight_bytes();
    let activations = table.max_offchip_activation_bytes();
    println!("  Off-chip ({} B tier):", offchip_tier_bytes(&sizes));
    println!("   Weights pool:  {weights:>10} / {} B", sizes.offchip_weights);
    println!("   Ping-pong:     {activations:>10} / {} B (x2)", sizes.offchip_activations);
    println!();

    let mut network = loaded.setup()?;
    let report = network.run()?;
    let scheduler = network.scheduler();
    let single = ReferenceExecutor::new(scheduler.table(), scheduler.kernels(), scheduler.layout()).onchip_bytes();
    let peak = report.arena_stats.peak_live_bytes;
    println!("  On-chip arena ({} B):", sizes.onchip_arena);
    println!("   Pipelined peak:     {peak:>10} B");
    println!("   Single-buffered:    {single:>10} B");
    if single > 0 {
        println!("   Saving:             {:>9.1} %", 100.0 * (1.0 - peak as f64 / single as f64));
    }
    println!();
    Ok(())
}
