// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The layer table: a model as an ordered chain of descriptors.
//!
//! # Type-State Pattern
//!
//! ```text
//! LayerTable<Loaded>     : rows parsed, not yet checked.
//!       │  .validate()
//!       ▼
//! LayerTable<Validated>  : sizes, residency and branch layout verified.
//! ```
//!
//! Only a validated table can be handed to the runtime, so the scheduler
//! never meets an overlapping skip connection or a staged layer without
//! weights at execution time.

use crate::{LayerDescriptor, LayerKind, TableError};
use std::fmt;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: table has been loaded but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: table has been validated and is ready for execution.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for table states.
pub trait TableState: fmt::Debug + Clone {}
impl TableState for Loaded {}
impl TableState for Validated {}

// ── LayerTable ─────────────────────────────────────────────────────

/// A skip connection found while validating the branch flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SkipSpan {
    /// Layer whose output is kept (fork).
    pub producer: usize,
    /// Layer that consumes it (merge).
    pub consumer: usize,
    /// `true` if the activation is carried by the spill record.
    pub spilled: bool,
}

/// The complete model as an ordered sequence of layer descriptors.
#[derive(Debug, Clone)]
pub struct LayerTable<S: TableState = Loaded> {
    /// Human-readable model name.
    pub name: String,
    /// Blob key of the input image staged off-chip at setup, if any.
    pub input_blob: Option<String>,
    /// Ordered descriptors.
    pub layers: Vec<LayerDescriptor>,
    skips: Vec<SkipSpan>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl LayerTable<Loaded> {
    /// Creates a table in the `Loaded` state.
    ///
    /// Weight offsets are recomputed as the running sum of weight blob
    /// sizes, in layer order.
    pub fn new(name: impl Into<String>, mut layers: Vec<LayerDescriptor>) -> Self {
        let mut offset = 0;
        for layer in &mut layers {
            layer.weight_offset = offset;
            offset += layer.weight_bytes;
        }
        Self {
            name: name.into(),
            input_blob: None,
            layers,
            skips: Vec::new(),
            _state: std::marker::PhantomData,
        }
    }

    /// Sets the blob key of the input image.
    pub fn with_input_blob(mut self, key: impl Into<String>) -> Self {
        self.input_blob = Some(key.into());
        self
    }

    /// Validates the table and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The table is non-empty and indices are consecutive from 0.
    /// - Activation sizes are non-zero.
    /// - Staged layers carry weights; a layer cannot both stage its weights
    ///   and stream them from off-chip memory.
    /// - Weighted kinds have a weight blob.
    /// - Off-chip residency flags come with off-chip sizes; the first layer
    ///   reads on-chip and the last layer writes on-chip.
    /// - Branch flags describe at most one live skip connection at a time,
    ///   every merge has a skip to consume, and no skip is left open.
    pub fn validate(self) -> Result<LayerTable<Validated>, TableError> {
        if self.layers.is_empty() {
            return Err(TableError::Empty);
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.index != i {
                return Err(invalid(layer, format!("expected index {i}, got {}", layer.index)));
            }
            check_layer(layer)?;
        }
        if let Some(first) = self.layers.first().filter(|l| l.residency.input) {
            return Err(invalid(first, "the first layer reads the staged input on-chip"));
        }
        if let Some(last) = self.layers.last().filter(|l| l.residency.output) {
            return Err(invalid(last, "the last layer must leave its output on-chip"));
        }

        let skips = simulate_branches(&self.layers)?;

        for (prev, next) in self.layers.iter().zip(self.layers.iter().skip(1)) {
            if prev.output_bytes != next.input_bytes && !next.is_merge() {
                tracing::warn!(
                    "'{}' output ({} B) differs from '{}' input ({} B)",
                    prev.name,
                    prev.output_bytes,
                    next.name,
                    next.input_bytes,
                );
            }
        }

        tracing::debug!("table '{}' validated: {} skip connection(s)", self.name, skips.len());

        Ok(LayerTable {
            name: self.name,
            input_blob: self.input_blob,
            layers: self.layers,
            skips,
            _state: std::marker::PhantomData,
        })
    }
}

fn invalid(layer: &LayerDescriptor, detail: impl Into<String>) -> TableError {
    TableError::InvalidLayer {
        layer: layer.name.clone(),
        detail: detail.into(),
    }
}

fn invalid_branch(layer: &LayerDescriptor, detail: impl Into<String>) -> TableError {
    TableError::InvalidBranch {
        layer: layer.name.clone(),
        detail: detail.into(),
    }
}

fn check_layer(layer: &LayerDescriptor) -> Result<(), TableError> {
    if layer.input_bytes == 0 || layer.output_bytes == 0 {
        return Err(invalid(layer, "zero-sized activation"));
    }
    if layer.needs_weight_allocation && layer.weight_bytes == 0 {
        return Err(invalid(layer, "weight allocation requested without weights"));
    }
    if layer.needs_weight_allocation && layer.residency.weights {
        return Err(invalid(layer, "weights cannot be both staged on-chip and streamed off-chip"));
    }
    if layer.kind.carries_weights() && layer.weight_bytes == 0 {
        return Err(invalid(layer, format!("{} layer without weights", layer.kind)));
    }
    if layer.weight_bytes > 0 && !layer.needs_weight_allocation && !layer.residency.weights {
        return Err(invalid(layer, "weights are neither staged nor streamed"));
    }
    if layer.residency.input && layer.offchip.input_bytes == 0 {
        return Err(invalid(layer, "off-chip input without an off-chip input size"));
    }
    if layer.residency.output && layer.offchip.output_bytes == 0 {
        return Err(invalid(layer, "off-chip output without an off-chip output size"));
    }
    if layer.kind == LayerKind::Add && !layer.branch.input {
        return Err(invalid(layer, "add layer is not a merge point"));
    }
    if layer.kind == LayerKind::Add && layer.input_bytes < layer.output_bytes {
        return Err(invalid(layer, "add layer input is smaller than its output"));
    }
    Ok(())
}

/// Replays the branch flags through the one-skip state machine the runtime
/// enforces, returning the skip connections found.
fn simulate_branches(layers: &[LayerDescriptor]) -> Result<Vec<SkipSpan>, TableError> {
    let last = layers.len() - 1;
    // (producer, bytes)
    let mut kept: Option<(usize, usize)> = None;
    let mut spill: Option<(usize, usize)> = None;
    let mut skips = Vec::new();

    for (i, layer) in layers.iter().enumerate() {
        if layer.is_merge() {
            let (producer, bytes, spilled) = match (kept, spill) {
                (Some((p, b)), _) => (p, b, false),
                (None, Some((p, b))) => (p, b, true),
                (None, None) => {
                    return Err(invalid_branch(layer, "merge without a live skip activation"))
                }
            };
            if bytes < layer.output_bytes {
                return Err(invalid_branch(
                    layer,
                    format!("skip activation of {bytes} B is smaller than the {} B merge output", layer.output_bytes),
                ));
            }
            skips.push(SkipSpan {
                producer,
                consumer: i,
                spilled,
            });
            kept = None;
            spill = None;
        }

        if i == last {
            break;
        }

        if layer.arms_bypass() {
            if kept.is_some() {
                return Err(invalid_branch(layer, "overlapping skip connections"));
            }
            kept = Some((i, layer.output_bytes));
        }
        if layer.branch.output {
            if spill.is_some() {
                return Err(invalid_branch(layer, "second spill while one is live"));
            }
            spill = Some((i, layer.output_bytes));
        }
    }

    if let Some((producer, _)) = kept.or(spill) {
        return Err(invalid_branch(&layers[producer], "skip connection is never merged"));
    }
    Ok(skips)
}

// ── Validated state ────────────────────────────────────────────────

impl LayerTable<Validated> {
    /// Returns the number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Returns a descriptor by index.
    pub fn layer(&self, index: usize) -> Option<&LayerDescriptor> {
        self.layers.get(index)
    }

    /// Returns an iterator over the layers in execution order.
    pub fn iter_layers(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    /// Returns `true` if layer `index` exists and stages weights on-chip.
    pub fn needs_weights(&self, index: usize) -> bool {
        self.layers
            .get(index)
            .map(|l| l.needs_weight_allocation)
            .unwrap_or(false)
    }

    /// Skip connections in execution order.
    pub fn skips(&self) -> &[SkipSpan] {
        &self.skips
    }

    /// Input size of the first layer.
    pub fn input_bytes(&self) -> usize {
        self.layers.first().map(|l| l.input_bytes).unwrap_or(0)
    }

    /// Output size of the last layer.
    pub fn output_bytes(&self) -> usize {
        self.layers.last().map(|l| l.output_bytes).unwrap_or(0)
    }

    /// Total bytes of all weight blobs.
    pub fn total_weight_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.weight_bytes).sum()
    }

    /// Largest off-chip activation any layer reads or writes.
    pub fn max_offchip_activation_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.offchip.input_bytes.max(l.offchip.output_bytes))
            .max()
            .unwrap_or(0)
    }

    /// Total multiply-accumulates of one pass.
    pub fn total_macs(&self) -> u64 {
        self.layers.iter().map(|l| l.macs).sum()
    }

    /// Returns a summary string describing the table.
    pub fn summary(&self) -> String {
        format!(
            "Model '{}': {} layers, {:.1} KB weights, {} skip connection(s), {} MACs",
            self.name,
            self.num_layers(),
            self.total_weight_bytes() as f64 / 1024.0,
            self.skips.len(),
            self.total_macs(),
        )
    }

    /// Builds a validated table directly (for testing).
    #[doc(hidden)]
    pub fn from_layers_unchecked(name: impl Into<String>, layers: Vec<LayerDescriptor>) -> Self {
        let loaded = LayerTable::new(name, layers);
        LayerTable {
            name: loaded.name,
            input_blob: None,
            layers: loaded.layers,
            skips: Vec::new(),
            _state: std::marker::PhantomData,
        }
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: TableState> fmt::Display for LayerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LayerTable '{}' ({} layers):", self.name, self.layers.len())?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        Ok(())
    }
}
