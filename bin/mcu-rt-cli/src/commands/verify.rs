// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `mcu-rt verify` command: pipelined pass against the single-buffered
//! reference.

use super::{load_network, print_banner, print_report};
use runtime::RuntimeConfig;

pub async fn execute(config: RuntimeConfig) -> anyhow::Result<()> {
    print_banner("Reference Check");

    let mut network = load_network(config)?.setup()?;
    let report = network.verify()?;
    print_report(&report.pipelined);

    match report.first_difference {
        None if report.matches() => {
            println!("  ✓ pipelined output matches the reference ({} B)", report.reference_output.len());
            Ok(())
        }
        _ => {
            let at = report.first_difference.unwrap_or(0);
            println!("  ✗ outputs differ at byte {at}");
            println!("   pipelined: {:02x?}", &report.pipelined.output[at..report.pipelined.output.len().min(at + 8)]);
            println!("   reference: {:02x?}", &report.reference_output[at..report.reference_output.len().min(at + 8)]);
            anyhow::bail!("pipelined pass diverged from the reference")
        }
    }
}
