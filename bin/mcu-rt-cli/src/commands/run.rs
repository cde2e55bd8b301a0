// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mcu-rt run` command: execute inference passes.
//!
//! Walks the full type-state pipeline:
//! ```text
//! Network<Idle> → load_model → <Loaded> → setup → <Ready> → run
//! ```

use super::{load_network, print_banner, print_report};
use runtime::RuntimeConfig;

pub async fn execute(config: RuntimeConfig, passes: usize, json: bool) -> anyhow::Result<()> {
    print_banner("Inference Runner");

    println!("  Config:");
    println!("   Model:   {}", config.model_path.display());
    println!("   Cores:   {}", config.num_cores);
    println!("   Arena:   {} B on-chip, {} scratch", config.onchip_arena, config.scratch);
    println!("   Input:   {:?}", config.input_source);
    println!("   Passes:  {passes}");
    println!();

    // Step 1: Idle → Loaded (manifest + blob store).
    println!("  [1/3] Loading layer table...");
    let loaded = load_network(config)?;
    println!("        {}", loaded.table().summary());
    println!();

    // Step 2: Loaded → Ready (tiers, DMA, blob staging).
    println!("  [2/3] Staging weights off-chip...");
    let mut network = loaded.setup()?;
    for r in network.reservations() {
        println!("        {:<16} {} ({} B)", r.label, r.address, r.len);
    }
    for m in network.setup_diagnostics() {
        println!("        warning: {m}");
    }
    println!();

    // Step 3: Ready → run.
    println!("  [3/3] Running {passes} pass(es)...");
    let mut last = None;
    for _ in 0..passes.max(1) {
        last = Some(network.run()?);
    }
    println!();

    if let Some(report) = last {
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
    }
    Ok(())
}
