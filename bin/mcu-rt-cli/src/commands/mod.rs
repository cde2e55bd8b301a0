// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod inspect;
pub mod run;
pub mod stream;
pub mod verify;

use runtime::{Loaded, Network, PassReport, RuntimeConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` applies when no `-v` is given.
pub fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the TOML file if given, then applies command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    model: Option<PathBuf>,
    cores: Option<usize>,
) -> anyhow::Result<RuntimeConfig> {
    let mut config = match path {
        Some(p) => RuntimeConfig::from_file(p)?,
        None => RuntimeConfig::default(),
    };
    if let Some(model) = model {
        config.model_path = model;
    }
    if let Some(cores) = cores {
        config.num_cores = cores;
    }
    config.validate()?;
    Ok(config)
}

/// Loads the configured model, or the synthetic demo network when there is
/// no model manifest. Any other load failure is returned.
pub fn load_network(config: RuntimeConfig) -> anyhow::Result<Network<Loaded>> {
    match Network::new(config.clone()).load_model() {
        Ok(network) => Ok(network),
        Err(e) if e.is_missing_model() => {
            tracing::warn!("no model at {}: {e}", config.model_path.display());
            println!("  Model files not found. Using the synthetic demo network...");
            println!();
            Ok(runtime::demo::demo_network(config)?)
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!(
            "failed to load model from {}",
            config.model_path.display()
        ))),
    }
}

pub fn print_banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║  {:<52}║", format!("mcu-rt · {title}"));
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
}

pub fn print_report(report: &PassReport) {
    println!("  Result:");
    for (field, value) in &report.result.values {
        println!("   {field:<20} {value:>8}");
    }
    println!();
    if !report.checksum_mismatches.is_empty() {
        println!("  Checksum mismatches:");
        for m in &report.checksum_mismatches {
            println!("   {m}");
        }
        println!();
    }
    println!("  Metrics:");
    println!("   {}", report.metrics.summary());
    println!("   Arena:     {}", report.arena_stats.summary());
    println!("   Transfers: {}", report.transfer_stats.summary());
    println!();
}

/// Truncates a string with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
