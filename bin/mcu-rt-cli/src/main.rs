// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # mcu-rt
//!
//! Command-line interface for the tiered-memory CNN inference runtime.
//!
//! ## Usage
//! ```bash
//! # Run one pass (falls back to the synthetic demo without model files)
//! mcu-rt run --model ./models/frontnet
//!
//! # Stream frames through the network
//! mcu-rt stream --model ./models/frontnet --frames 100 --interval-ms 10
//!
//! # Inspect the layer table and memory plan
//! mcu-rt inspect --model ./models/frontnet
//!
//! # Check the pipelined pass against the single-buffered reference
//! mcu-rt verify --model ./models/frontnet
//!
//! # Write the synthetic demo model to disk
//! mcu-rt write-demo --out ./models/demo
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mcu-rt",
    about = "Tiered-memory CNN inference runtime for multi-core microcontrollers",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file. Command-line flags override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run inference passes on the staged input image.
    Run {
        /// Path to the model directory.
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Number of cores in the compute team.
        #[arg(long)]
        cores: Option<usize>,

        /// Number of passes to run.
        #[arg(short, long, default_value_t = 1)]
        passes: usize,

        /// Print the last pass report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Stream synthetic frames through the network.
    Stream {
        /// Path to the model directory.
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Number of cores in the compute team.
        #[arg(long)]
        cores: Option<usize>,

        /// Number of frames to send (0 streams until Ctrl-C).
        #[arg(short, long, default_value_t = 32)]
        frames: usize,

        /// Delay between frames in milliseconds.
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },

    /// Inspect a model: layer table, skip connections and memory plan.
    Inspect {
        /// Path to the model directory.
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Run one pass and compare it with the single-buffered reference.
    Verify {
        /// Path to the model directory.
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Number of cores in the compute team.
        #[arg(long)]
        cores: Option<usize>,
    },

    /// Write the synthetic demo model as a model directory.
    WriteDemo {
        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            model,
            cores,
            passes,
            json,
        } => {
            let config = commands::load_config(config, model, cores)?;
            commands::run::execute(config, passes, json).await
        }
        Commands::Stream {
            model,
            cores,
            frames,
            interval_ms,
        } => {
            let config = commands::load_config(config, model, cores)?;
            commands::stream::execute(config, frames, interval_ms).await
        }
        Commands::Inspect { model } => {
            let config = commands::load_config(config, model, None)?;
            commands::inspect::execute(config).await
        }
        Commands::Verify { model, cores } => {
            let config = commands::load_config(config, model, cores)?;
            commands::verify::execute(config).await
        }
        Commands::WriteDemo { out } => {
            runtime::demo::write_model_dir(&out)?;
            println!("  Demo model written to {}", out.display());
            Ok(())
        }
    }
}
