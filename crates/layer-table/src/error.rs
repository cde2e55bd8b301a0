// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for manifest loading and table validation.

/// Errors that can occur when building a layer table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// The manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    ManifestRead(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    /// The table contains no layers.
    #[error("layer table is empty")]
    Empty,

    /// A layer kind string is not recognised.
    #[error("layer '{layer}' has unknown kind '{kind}'")]
    UnknownKind { layer: String, kind: String },

    /// A descriptor is internally inconsistent.
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// The branch flags do not describe a supported skip-connection layout.
    #[error("invalid branch layout at layer '{layer}': {detail}")]
    InvalidBranch { layer: String, detail: String },
}
