// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A small synthetic network for demos, tests and benchmarks.
//!
//! ```text
//!  conv0 ─ pool1 ─ conv2 ─┬─ conv3 ═▶ conv4 ─ add5 ─ conv6 ─┬─ conv7 ─ add8 ─ pool9 ─ fc10
//!                         │  (off-chip hand-off)    ▲       │  (spill)          ▲
//!                         └──────── kept ───────────┘       └────────────────────┘
//! ```
//!
//! It exercises every path of the scheduler: staged and streamed weights,
//! an activation handed over through the off-chip ping-pong buffers, a
//! skip kept on-chip and a skip spilled at a two-branch fork.

use crate::blobs::MemoryBlobs;
use crate::checksum::byte_sum;
use crate::config::InputSource;
use crate::engine::{Loaded, Network, MANIFEST_FILE};
use crate::{RuntimeConfig, RuntimeError};
use layer_table::{LayerDescriptor, LayerKind, LayerTable, ModelManifest, TableError};
use std::path::Path;

/// Blob key of the demo input image.
pub const INPUT_BLOB: &str = "input";

/// Configuration sized for the demo network.
pub fn demo_config() -> RuntimeConfig {
    RuntimeConfig {
        model_path: "demo".into(),
        onchip_arena: "16K".into(),
        scratch: "4K".into(),
        offchip_weights: "4K".into(),
        offchip_activations: "1K".into(),
        num_cores: 4,
        result_layout: "imav".into(),
        input_source: InputSource::Offchip,
        transfer_chunk: 64,
        journal: true,
        ..RuntimeConfig::default()
    }
}

fn weighted(name: &str, index: usize, kind: LayerKind, input: usize, output: usize, weights: usize, shift: i32) -> LayerDescriptor {
    let mut layer = LayerDescriptor::new(name, index, kind, input, output, weights);
    layer.quant.out_shift = shift;
    layer.macs = (output * weights.min(8)) as u64;
    layer.checksums.weights = Some(byte_sum(&weight_pattern(index, weights)));
    layer
}

fn merge(name: &str, index: usize, bytes: usize) -> LayerDescriptor {
    let mut layer = LayerDescriptor::new(name, index, LayerKind::Add, bytes, bytes, 0);
    layer.branch.input = true;
    layer.quant.out_shift = 1;
    layer.macs = bytes as u64;
    layer
}

/// Layer descriptors of the demo network.
pub fn demo_layers() -> Vec<LayerDescriptor> {
    let mut conv2 = weighted("conv2", 2, LayerKind::Conv, 128, 128, 48, 4);
    conv2.branch.change = true;

    let mut conv3 = weighted("conv3", 3, LayerKind::Conv, 128, 128, 48, 4);
    conv3.residency.output = true;
    conv3.offchip.output_bytes = 128;

    let mut conv4 = weighted("conv4", 4, LayerKind::Conv, 128, 128, 48, 4);
    conv4.residency.input = true;
    conv4.residency.kernel = true;
    conv4.offchip.input_bytes = 128;

    let mut conv6 = weighted("conv6", 6, LayerKind::Conv, 128, 128, 32, 4);
    conv6.branch.output = true;
    conv6.branch.change = true;

    let mut fc10 = weighted("fc10", 10, LayerKind::Gemm, 64, 28, 56, 3);
    fc10.needs_weight_allocation = false;
    fc10.residency.weights = true;

    vec![
        weighted("conv0", 0, LayerKind::Conv, 256, 256, 64, 5),
        LayerDescriptor::new("pool1", 1, LayerKind::MaxPool, 256, 128, 0),
        conv2,
        conv3,
        conv4,
        merge("add5", 5, 128),
        conv6,
        weighted("conv7", 7, LayerKind::Conv, 128, 128, 32, 4),
        merge("add8", 8, 128),
        LayerDescriptor::new("pool9", 9, LayerKind::AvgPool, 128, 64, 0),
        fc10,
    ]
}

/// The demo layer table, with its input blob.
pub fn demo_table() -> LayerTable {
    LayerTable::new("demo", demo_layers()).with_input_blob(INPUT_BLOB)
}

/// Deterministic weights in `-11..=11`.
pub fn weight_pattern(seed: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (((i * 37 + seed * 11) % 23) as i8 - 11) as u8)
        .collect()
}

/// A deterministic input frame in `-30..=30`.
pub fn demo_frame(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (((i * 13 + usize::from(seed) * 7) % 61) as i8 - 30) as u8)
        .collect()
}

/// Weight blobs and the input image of `layers`.
pub fn demo_blobs(layers: &[LayerDescriptor]) -> MemoryBlobs {
    let mut blobs = MemoryBlobs::new();
    for layer in layers.iter().filter(|l| l.weight_bytes > 0) {
        blobs.insert(layer.blob_key(), weight_pattern(layer.index, layer.weight_bytes));
    }
    if let Some(first) = layers.first() {
        blobs.insert(INPUT_BLOB, demo_frame(0, first.input_bytes));
    }
    blobs
}

/// The demo network, loaded and ready for setup.
pub fn demo_network(config: RuntimeConfig) -> Result<Network<Loaded>, RuntimeError> {
    let table = demo_table().validate()?;
    let blobs = demo_blobs(&table.layers);
    Ok(Network::from_parts(config, table, Box::new(blobs)))
}

/// Writes the demo network as a model directory: `model.json` plus one
/// `<key>.bin` per blob.
pub fn write_model_dir(dir: &Path) -> Result<(), RuntimeError> {
    let table = demo_table();
    let manifest = ModelManifest::from_descriptors(&table.name, table.input_blob.clone(), &table.layers);
    std::fs::create_dir_all(dir).map_err(TableError::from)?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest.to_json()?).map_err(TableError::from)?;

    let mut blobs: Vec<(String, Vec<u8>)> = table
        .layers
        .iter()
        .filter(|l| l.weight_bytes > 0)
        .map(|l| (l.blob_key().to_string(), weight_pattern(l.index, l.weight_bytes)))
        .collect();
    blobs.push((INPUT_BLOB.to_string(), demo_frame(0, table.layers[0].input_bytes)));
    for (key, bytes) in blobs {
        std::fs::write(dir.join(format!("{key}.bin")), bytes)
            .map_err(|e| RuntimeError::blob(&key, format!("cannot write: {e}")))?;
    }
    tracing::info!("wrote demo model to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_table_validates() {
        let table = demo_table().validate().unwrap();
        assert_eq!(table.num_layers(), 11);
        assert_eq!(table.skips().len(), 2);
        assert!(!table.skips()[0].spilled);
        assert!(table.skips()[1].spilled);
        assert_eq!(table.output_bytes(), 28);
    }

    #[test]
    fn test_demo_blobs_match_checksums() {
        let layers = demo_layers();
        let blobs = demo_blobs(&layers);
        for layer in layers.iter().filter(|l| l.weight_bytes > 0) {
            let blob = crate::blobs::BlobStore::load(&blobs, layer.blob_key()).unwrap();
            assert_eq!(Some(byte_sum(&blob)), layer.checksums.weights);
        }
    }

    #[test]
    fn test_write_model_dir_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path()).unwrap();
        let config = RuntimeConfig {
            model_path: dir.path().to_path_buf(),
            ..demo_config()
        };
        let network = Network::new(config).load_model().unwrap();
        assert_eq!(network.table().num_layers(), 11);
        assert_eq!(network.table().input_blob.as_deref(), Some(INPUT_BLOB));
    }
}
