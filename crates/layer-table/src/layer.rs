// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer descriptors.
//!
//! Each [`LayerDescriptor`] is one row of the static table produced by the
//! offline model compiler: buffer sizes in both memory tiers, residency and
//! branch flags, optional checksums and the quantisation constants passed
//! to the kernel. Weight bytes are **not** stored here, only the key of the
//! blob holding them.

use serde::{Deserialize, Serialize};

/// The computation a layer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// 2-D convolution (including depthwise and pointwise variants).
    Conv,
    /// Fully-connected layer.
    Gemm,
    /// Matrix multiply against a constant operand.
    MatMul,
    /// Max pooling.
    MaxPool,
    /// Average pooling.
    AvgPool,
    /// Elementwise residual add. Reads the skip activation.
    Add,
    /// Copy of the input, e.g. a reshape.
    Identity,
}

impl LayerKind {
    /// Parses a layer kind from a manifest string.
    ///
    /// Accepts snake_case names plus common exporter aliases
    /// (`"Conv2d"`, `"fc"`, `"linear"`, `"residual"`, `"reshape"`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conv" | "conv2d" | "depthwise" | "pointwise" => Some(Self::Conv),
            "gemm" | "fc" | "linear" | "dense" => Some(Self::Gemm),
            "matmul" | "mat_mul" => Some(Self::MatMul),
            "maxpool" | "max_pool" => Some(Self::MaxPool),
            "avgpool" | "avg_pool" | "averagepool" | "globalaveragepool" => Some(Self::AvgPool),
            "add" | "residual" | "qadd" => Some(Self::Add),
            "identity" | "reshape" | "flatten" => Some(Self::Identity),
            _ => None,
        }
    }

    /// Returns a human-readable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conv => "conv",
            Self::Gemm => "gemm",
            Self::MatMul => "matmul",
            Self::MaxPool => "max_pool",
            Self::AvgPool => "avg_pool",
            Self::Add => "add",
            Self::Identity => "identity",
        }
    }

    /// Returns `true` for kinds that consume a weight blob.
    pub fn carries_weights(&self) -> bool {
        matches!(self, Self::Conv | Self::Gemm | Self::MatMul)
    }

    /// Returns `true` for kinds whose output may overwrite an operand in place.
    pub fn is_elementwise(&self) -> bool {
        matches!(self, Self::Add | Self::Identity)
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Off-chip activation sizes, used when the input or output lives off-chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffChipSizes {
    pub input_bytes: usize,
    pub output_bytes: usize,
}

/// Which buffers of a layer live in the off-chip tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Residency {
    /// The kernel streams its input from the off-chip ping-pong buffer.
    pub input: bool,
    /// The kernel streams its output to the off-chip ping-pong buffer.
    pub output: bool,
    /// The kernel streams its weights straight from the off-chip pool.
    pub weights: bool,
    /// The kernel itself issues off-chip transfers.
    pub kernel: bool,
}

/// Skip-connection flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchFlags {
    /// Merge layer: consumes the skip activation.
    pub input: bool,
    /// Fork whose output is spilled for a later merge.
    pub output: bool,
    /// Fork whose output is kept on-chip as the skip activation.
    pub change: bool,
    /// Last layer of a branch.
    pub last: bool,
}

/// Precomputed sums used to validate weights and activations.
///
/// Byte sums are non-negative. The final layer's output sum is a wrapping
/// sum of signed 32-bit words and may be negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checksums {
    pub weights: Option<i64>,
    pub input: Option<i64>,
    pub output: Option<i64>,
}

/// Requantisation constants passed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quant {
    pub out_mult: i32,
    pub in_mul1: i32,
    pub in_mul2: i32,
    pub out_shift: i32,
}

impl Default for Quant {
    fn default() -> Self {
        Self {
            out_mult: 1,
            in_mul1: 1,
            in_mul2: 1,
            out_shift: 0,
        }
    }
}

/// One immutable row of the layer table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Unique layer name (e.g. `"conv_3"`).
    pub name: String,
    /// Position in the execution order (0-based).
    pub index: usize,
    pub kind: LayerKind,
    /// On-chip input activation size in bytes.
    pub input_bytes: usize,
    /// On-chip output activation size in bytes.
    pub output_bytes: usize,
    /// Size of the layer's weight blob in bytes (0 for weight-free layers).
    pub weight_bytes: usize,
    /// Whether the weights are staged into an on-chip region before execution.
    pub needs_weight_allocation: bool,
    pub offchip: OffChipSizes,
    /// Byte offset of this layer's weight blob inside the off-chip weight pool.
    pub weight_offset: usize,
    pub residency: Residency,
    pub branch: BranchFlags,
    pub checksums: Checksums,
    pub quant: Quant,
    /// Multiply-accumulate count, for profiling.
    pub macs: u64,
    /// Blob-store key of the weights. Defaults to the layer name.
    pub weights_blob: Option<String>,
}

impl LayerDescriptor {
    /// Creates a descriptor with default flags.
    pub fn new(
        name: impl Into<String>,
        index: usize,
        kind: LayerKind,
        input_bytes: usize,
        output_bytes: usize,
        weight_bytes: usize,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            kind,
            input_bytes,
            output_bytes,
            weight_bytes,
            needs_weight_allocation: weight_bytes > 0,
            offchip: OffChipSizes::default(),
            weight_offset: 0,
            residency: Residency::default(),
            branch: BranchFlags::default(),
            checksums: Checksums::default(),
            quant: Quant::default(),
            macs: 0,
            weights_blob: None,
        }
    }

    /// Key under which the weight blob is stored.
    pub fn blob_key(&self) -> &str {
        self.weights_blob.as_deref().unwrap_or(&self.name)
    }

    /// Returns `true` if this layer is the merge point of a skip connection.
    pub fn is_merge(&self) -> bool {
        self.branch.input
    }

    /// Returns `true` if this layer's output becomes the on-chip skip activation.
    pub fn arms_bypass(&self) -> bool {
        self.branch.change && !self.branch.output && !self.branch.last
    }

    /// Returns a concise summary string for display.
    pub fn summary(&self) -> String {
        let mut flags = Vec::new();
        if self.needs_weight_allocation {
            flags.push("staged");
        }
        if self.residency.weights {
            flags.push("w-offchip");
        }
        if self.residency.input {
            flags.push("in-offchip");
        }
        if self.residency.output {
            flags.push("out-offchip");
        }
        if self.branch.change {
            flags.push("fork");
        }
        if self.branch.output {
            flags.push("spill");
        }
        if self.branch.input {
            flags.push("merge");
        }
        format!(
            "[{}] {} ({}): in {} B, out {} B, weights {} B{}",
            self.index,
            self.name,
            self.kind,
            self.input_bytes,
            self.output_bytes,
            self.weight_bytes,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            },
        )
    }
}
