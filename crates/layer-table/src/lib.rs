// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # layer-table
//!
//! The static per-layer metadata consumed by the inference scheduler.
//!
//! - [`LayerKind`]: the computation each layer performs.
//! - [`LayerDescriptor`]: one immutable row: sizes in both memory tiers,
//!   residency and branch flags, checksums, quantisation constants.
//! - [`LayerTable`]: the model as an ordered chain, with a **type-state
//!   pattern** (`Loaded` → `Validated`).
//! - [`ModelManifest`]: the JSON form of the table (`model.json`).
//!
//! # Example
//! ```no_run
//! use layer_table::ModelManifest;
//! use std::path::Path;
//!
//! let table = ModelManifest::from_file(Path::new("./models/frontnet/model.json"))
//!     .unwrap()
//!     .into_table()
//!     .unwrap()
//!     .validate()
//!     .unwrap();
//! println!("{}", table.summary());
//! for layer in table.iter_layers() {
//!     println!("  {}", layer.summary());
//! }
//! ```

mod error;
mod layer;
mod manifest;
pub mod table;

pub use error::TableError;
pub use layer::{BranchFlags, Checksums, LayerDescriptor, LayerKind, OffChipSizes, Quant, Residency};
pub use manifest::{ManifestLayer, ModelManifest};
pub use table::{LayerTable, Loaded, SkipSpan, Validated};
