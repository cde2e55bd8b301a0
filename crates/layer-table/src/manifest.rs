// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON model manifest parsing.
//!
//! The manifest (`model.json`) is the host-side form of the constant tables
//! the offline compiler emits: one entry per layer, in execution order.
//!
//! # Format
//! ```json
//! {
//!   "name": "frontnet",
//!   "input_blob": "inputs",
//!   "layers": [
//!     {
//!       "name": "conv0",
//!       "kind": "conv",
//!       "input_bytes": 100,
//!       "output_bytes": 200,
//!       "weight_bytes": 40,
//!       "checksums": { "weights": 1234 },
//!       "quant": { "out_mult": 3, "out_shift": 2 }
//!     },
//!     ...
//!   ]
//! }
//! ```
//!
//! Omitted flag groups default to all-false, and `needs_weight_allocation`
//! defaults to "has weights that are not streamed off-chip".

use crate::layer::{BranchFlags, Checksums, OffChipSizes, Quant, Residency};
use crate::{LayerDescriptor, LayerKind, LayerTable, Loaded, TableError};
use std::path::Path;

/// Top-level model manifest, deserialized from `model.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    /// Human-readable model name.
    pub name: String,
    /// Blob key of the input image, if the deployment stages one off-chip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_blob: Option<String>,
    /// Layer entries in execution order.
    pub layers: Vec<ManifestLayer>,
}

/// A single layer entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestLayer {
    pub name: String,
    /// Layer kind string (e.g. `"conv"`, `"Conv2d"`, `"add"`).
    pub kind: String,
    pub input_bytes: usize,
    pub output_bytes: usize,
    #[serde(default)]
    pub weight_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_weight_allocation: Option<bool>,
    #[serde(default)]
    pub offchip: OffChipSizes,
    #[serde(default)]
    pub residency: Residency,
    #[serde(default)]
    pub branch: BranchFlags,
    #[serde(default)]
    pub checksums: Checksums,
    #[serde(default)]
    pub quant: Quant,
    #[serde(default)]
    pub macs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_blob: Option<String>,
}

impl ModelManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, TableError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Serializes the manifest to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, TableError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds a manifest from existing descriptors.
    pub fn from_descriptors(
        name: impl Into<String>,
        input_blob: Option<String>,
        layers: &[LayerDescriptor],
    ) -> Self {
        Self {
            name: name.into(),
            input_blob,
            layers: layers
                .iter()
                .map(|d| ManifestLayer {
                    name: d.name.clone(),
                    kind: d.kind.as_str().to_string(),
                    input_bytes: d.input_bytes,
                    output_bytes: d.output_bytes,
                    weight_bytes: d.weight_bytes,
                    needs_weight_allocation: Some(d.needs_weight_allocation),
                    offchip: d.offchip,
                    residency: d.residency,
                    branch: d.branch,
                    checksums: d.checksums,
                    quant: d.quant,
                    macs: d.macs,
                    weights_blob: d.weights_blob.clone(),
                })
                .collect(),
        }
    }

    /// Converts the manifest into an unvalidated layer table.
    ///
    /// Fails on unknown kinds and duplicate layer names; everything else is
    /// left to [`LayerTable::validate`].
    pub fn into_table(self) -> Result<LayerTable<Loaded>, TableError> {
        let mut seen = std::collections::HashSet::new();
        let mut layers = Vec::with_capacity(self.layers.len());

        for (index, entry) in self.layers.into_iter().enumerate() {
            if !seen.insert(entry.name.clone()) {
                return Err(TableError::InvalidLayer {
                    layer: entry.name,
                    detail: "duplicate layer name".into(),
                });
            }
            let kind = LayerKind::from_str_loose(&entry.kind).ok_or_else(|| TableError::UnknownKind {
                layer: entry.name.clone(),
                kind: entry.kind.clone(),
            })?;
            let needs_weight_allocation = entry
                .needs_weight_allocation
                .unwrap_or(entry.weight_bytes > 0 && !entry.residency.weights);

            layers.push(LayerDescriptor {
                name: entry.name,
                index,
                kind,
                input_bytes: entry.input_bytes,
                output_bytes: entry.output_bytes,
                weight_bytes: entry.weight_bytes,
                needs_weight_allocation,
                offchip: entry.offchip,
                weight_offset: 0,
                residency: entry.residency,
                branch: entry.branch,
                checksums: entry.checksums,
                quant: entry.quant,
                macs: entry.macs,
                weights_blob: entry.weights_blob,
            });
        }

        let table = LayerTable::new(self.name, layers);
        Ok(match self.input_blob {
            Some(key) => table.with_input_blob(key),
            None => table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest_json() -> &'static str {
        r#"{
            "name": "tiny",
            "input_blob": "inputs",
            "layers": [
                {
                    "name": "conv0",
                    "kind": "Conv2d",
                    "input_bytes": 100,
                    "output_bytes": 200,
                    "weight_bytes": 40,
                    "checksums": { "weights": 1234 },
                    "quant": { "out_mult": 3, "out_shift": 2 },
                    "macs": 8000
                },
                {
                    "name": "pool1",
                    "kind": "maxpool",
                    "input_bytes": 200,
                    "output_bytes": 150
                },
                {
                    "name": "fc2",
                    "kind": "fc",
                    "input_bytes": 150,
                    "output_bytes": 28,
                    "weight_bytes": 60,
                    "weights_blob": "fc2.weight"
                }
            ]
        }"#
    }

    #[test]
    fn test_parse_manifest() {
        let m = ModelManifest::from_json(sample_manifest_json()).unwrap();
        assert_eq!(m.name, "tiny");
        assert_eq!(m.input_blob.as_deref(), Some("inputs"));
        assert_eq!(m.layers.len(), 3);
        assert_eq!(m.layers[0].quant.out_mult, 3);
        // Omitted quant fields keep their defaults.
        assert_eq!(m.layers[0].quant.in_mul1, 1);
        assert_eq!(m.layers[1].weight_bytes, 0);
    }

    #[test]
    fn test_into_table() {
        let table = ModelManifest::from_json(sample_manifest_json())
            .unwrap()
            .into_table()
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(table.input_blob.as_deref(), Some("inputs"));
        let l0 = table.layer(0).unwrap();
        assert_eq!(l0.kind, LayerKind::Conv);
        assert!(l0.needs_weight_allocation);
        assert_eq!(l0.checksums.weights, Some(1234));
        assert!(!table.layer(1).unwrap().needs_weight_allocation);
        let l2 = table.layer(2).unwrap();
        assert_eq!(l2.weight_offset, 40);
        assert_eq!(l2.blob_key(), "fc2.weight");
    }

    #[test]
    fn test_streamed_weights_default() {
        let json = r#"{
            "name": "s",
            "layers": [{
                "name": "fc", "kind": "gemm", "input_bytes": 8, "output_bytes": 4,
                "weight_bytes": 32, "residency": { "weights": true }
            }]
        }"#;
        let table = ModelManifest::from_json(json).unwrap().into_table().unwrap();
        assert!(!table.layers[0].needs_weight_allocation);
    }

    #[test]
    fn test_negative_output_checksum() {
        let json = r#"{
            "name": "n",
            "layers": [{
                "name": "fc", "kind": "gemm", "input_bytes": 8, "output_bytes": 8,
                "checksums": { "output": -3021 }
            }]
        }"#;
        let table = ModelManifest::from_json(json).unwrap().into_table().unwrap();
        assert_eq!(table.layers[0].checksums.output, Some(-3021));
    }

    #[test]
    fn test_unknown_kind() {
        let json = r#"{
            "name": "bad",
            "layers": [{ "name": "l0", "kind": "softmax", "input_bytes": 4, "output_bytes": 4 }]
        }"#;
        let err = ModelManifest::from_json(json).unwrap().into_table().unwrap_err();
        assert!(matches!(err, TableError::UnknownKind { .. }));
    }

    #[test]
    fn test_duplicate_names() {
        let json = r#"{
            "name": "dup",
            "layers": [
                { "name": "l0", "kind": "identity", "input_bytes": 4, "output_bytes": 4 },
                { "name": "l0", "kind": "identity", "input_bytes": 4, "output_bytes": 4 }
            ]
        }"#;
        assert!(ModelManifest::from_json(json).unwrap().into_table().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, sample_manifest_json()).unwrap();
        let m = ModelManifest::from_file(&path).unwrap();
        assert_eq!(m.layers.len(), 3);
        assert!(ModelManifest::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let table = ModelManifest::from_json(sample_manifest_json())
            .unwrap()
            .into_table()
            .unwrap();
        let json = ModelManifest::from_descriptors("tiny", None, &table.layers)
            .to_json()
            .unwrap();
        let back = ModelManifest::from_json(&json).unwrap().into_table().unwrap();
        assert_eq!(back.layers, table.layers);
    }
}
