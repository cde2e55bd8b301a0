// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Off-chip memory layout.
//!
//! ```text
//! off-chip tier
//! ┌──────────────────────────────────────┬───────────────┬───────────────┐
//! │ weights pool                         │ activations A │ activations B │
//! │ W0 │ W1 │ ... │ Wn-1 │ input │ free  │               │               │
//! └──────────────────────────────────────┴───────────────┴───────────────┘
//! ```
//!
//! Weight blobs sit back to back at the cumulative offsets recorded in the
//! layer table; the staged input image follows the last blob. The two
//! activation buffers are swapped after every layer.

use crate::config::TierSizes;
use crate::RuntimeError;
use layer_table::{LayerDescriptor, LayerTable, Validated};
use transfer_engine::{Address, OffChipPool};

/// Bytes the off-chip tier needs for `sizes`.
pub fn offchip_tier_bytes(sizes: &TierSizes) -> usize {
    sizes.offchip_weights + 2 * sizes.offchip_activations
}

/// Fixed off-chip addresses of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct OffChipLayout {
    /// Base of the weights pool.
    pub weights: Address,
    /// Where the input image is staged (right after the last weight blob).
    pub input: Address,
    pub activations_a: Address,
    pub activations_b: Address,
}

impl OffChipLayout {
    /// Reserves the weights pool and both activation buffers from `pool`.
    pub fn reserve(
        pool: &mut OffChipPool,
        table: &LayerTable<Validated>,
        sizes: &TierSizes,
        input_bytes: usize,
    ) -> Result<Self, RuntimeError> {
        let weight_bytes = table.total_weight_bytes();
        if weight_bytes + input_bytes > sizes.offchip_weights {
            return Err(RuntimeError::ConfigError(format!(
                "{weight_bytes} B of weights and {input_bytes} B of input do not fit the {} B off-chip weights pool",
                sizes.offchip_weights
            )));
        }
        let activation_bytes = table.max_offchip_activation_bytes();
        if activation_bytes > sizes.offchip_activations {
            return Err(RuntimeError::ConfigError(format!(
                "off-chip activation of {activation_bytes} B exceeds the {} B ping-pong buffers",
                sizes.offchip_activations
            )));
        }

        let weights = pool.reserve("weights", sizes.offchip_weights)?;
        let activations_a = pool.reserve("activations.a", sizes.offchip_activations)?;
        let activations_b = pool.reserve("activations.b", sizes.offchip_activations)?;
        Ok(Self {
            weights,
            input: weights.add(weight_bytes),
            activations_a,
            activations_b,
        })
    }

    /// Off-chip address of `layer`'s weight blob.
    pub fn weight_address(&self, layer: &LayerDescriptor) -> Address {
        self.weights.add(layer.weight_offset)
    }
}
