// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_path = "./models/frontnet"
//! onchip_arena = "410000"
//! scratch = "64K"
//! offchip_weights = "4800000"
//! offchip_activations = "1500000"
//! num_cores = 8
//! verify_checksums = true
//! result_layout = "imav"
//! input_source = "offchip"
//! transfer_chunk = 128
//! journal = false
//! enable_profiling = true
//! ```

use crate::{ResultLayout, RuntimeError};
use arena::ByteSize;
use std::path::{Path, PathBuf};

/// Where the first layer's input comes from on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// The input blob staged off-chip at setup is copied in before each pass.
    Offchip,
    /// The caller writes each frame into the frame buffer at the arena base.
    Frame,
}

/// Parsed tier sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSizes {
    pub onchip_arena: usize,
    pub scratch: usize,
    pub offchip_weights: usize,
    /// Size of each of the two off-chip activation ping-pong buffers.
    pub offchip_activations: usize,
}

/// Configuration for the inference runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Path to the model directory (`model.json` plus weight blobs).
    pub model_path: PathBuf,
    /// On-chip arena size (human-readable, e.g. `"410000"`, `"400K"`).
    #[serde(default = "default_onchip")]
    pub onchip_arena: String,
    /// Core-local scratchpad size, split evenly across cores.
    #[serde(default = "default_scratch")]
    pub scratch: String,
    /// Off-chip pool for weight blobs and the input image.
    #[serde(default = "default_offchip_weights")]
    pub offchip_weights: String,
    /// Size of each off-chip activation ping-pong buffer.
    #[serde(default = "default_offchip_activations")]
    pub offchip_activations: String,
    /// Number of cores in the compute team.
    #[serde(default = "default_cores")]
    pub num_cores: usize,
    /// Whether weight and activation checksums are verified.
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    /// Result layout: `"regression"`, `"classification"`, `"imav"` or `"custom"`.
    #[serde(default = "default_layout")]
    pub result_layout: String,
    /// Number of fields for the `"custom"` layout.
    #[serde(default)]
    pub result_fields: Option<usize>,
    #[serde(default = "default_input_source")]
    pub input_source: InputSource,
    /// Chunk size in bytes for staging blobs into off-chip memory.
    #[serde(default = "default_chunk")]
    pub transfer_chunk: usize,
    /// Whether the arena records an allocation journal.
    #[serde(default)]
    pub journal: bool,
    /// Whether to collect per-layer profiling metrics.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_onchip() -> String {
    "410000".to_string()
}

fn default_scratch() -> String {
    "64K".to_string()
}

fn default_offchip_weights() -> String {
    "4800000".to_string()
}

fn default_offchip_activations() -> String {
    "1500000".to_string()
}

fn default_cores() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_layout() -> String {
    "imav".to_string()
}

fn default_input_source() -> InputSource {
    InputSource::Offchip
}

fn default_chunk() -> usize {
    128
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the tier size strings.
    pub fn tier_sizes(&self) -> Result<TierSizes, RuntimeError> {
        let parse = |field: &str, value: &str| {
            ByteSize::parse(value)
                .map(|s| s.as_bytes())
                .map_err(|e| RuntimeError::ConfigError(format!("invalid {field} '{value}': {e}")))
        };
        Ok(TierSizes {
            onchip_arena: parse("onchip_arena", &self.onchip_arena)?,
            scratch: parse("scratch", &self.scratch)?,
            offchip_weights: parse("offchip_weights", &self.offchip_weights)?,
            offchip_activations: parse("offchip_activations", &self.offchip_activations)?,
        })
    }

    /// Resolves the configured result layout.
    pub fn layout(&self) -> Result<ResultLayout, RuntimeError> {
        ResultLayout::by_name(&self.result_layout, self.result_fields)
    }

    /// Checks values that have no natural type-level constraint.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.num_cores == 0 {
            return Err(RuntimeError::ConfigError("num_cores must be at least 1".into()));
        }
        if self.transfer_chunk == 0 {
            return Err(RuntimeError::ConfigError("transfer_chunk must be non-zero".into()));
        }
        let sizes = self.tier_sizes()?;
        if sizes.scratch / self.num_cores == 0 {
            return Err(RuntimeError::ConfigError(format!(
                "scratch of {} bytes cannot be split across {} cores",
                sizes.scratch, self.num_cores
            )));
        }
        if self.transfer_chunk > sizes.onchip_arena {
            return Err(RuntimeError::ConfigError(format!(
                "transfer_chunk {} exceeds the on-chip arena",
                self.transfer_chunk
            )));
        }
        self.layout()?;
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/frontnet"),
            onchip_arena: default_onchip(),
            scratch: default_scratch(),
            offchip_weights: default_offchip_weights(),
            offchip_activations: default_offchip_activations(),
            num_cores: default_cores(),
            verify_checksums: true,
            result_layout: default_layout(),
            result_fields: None,
            input_source: InputSource::Offchip,
            transfer_chunk: default_chunk(),
            journal: false,
            enable_profiling: true,
        }
    }
}
