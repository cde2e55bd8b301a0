// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the inference runtime.
//!
//! Every variant is fatal to the pass that raised it. Checksum mismatches
//! are not errors: they are reported as [`crate::ChecksumMismatch`]
//! diagnostics and execution continues.

use crate::KernelError;

/// Errors that can occur while setting up or executing a network.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The on-chip arena could not satisfy a request, or a free broke the
    /// stack discipline.
    #[error("arena error: {0}")]
    Arena(#[from] arena::ArenaError),

    /// A DMA transfer or tier access failed.
    #[error("transfer failure: {0}")]
    Transfer(#[from] transfer_engine::TransferError),

    /// The layer table could not be loaded or validated.
    #[error("layer table error: {0}")]
    Table(#[from] layer_table::TableError),

    /// The skip-connection state machine was driven into an unsupported state.
    #[error("branch state assertion at layer {layer}: {detail}")]
    BranchStateAssertion { layer: usize, detail: String },

    /// The weight staging slots lost track of which slot holds what.
    #[error("staging desync: {0}")]
    StagingDesync(String),

    /// A kernel reported a failure on one of the cores.
    #[error("kernel '{layer}' failed on core {core}: {source}")]
    Kernel {
        layer: String,
        core: usize,
        #[source]
        source: KernelError,
    },

    /// A named blob could not be loaded.
    #[error("blob '{key}': {detail}")]
    Blob { key: String, detail: String },

    /// The result layout does not fit the final output.
    #[error("result extraction failed: {0}")]
    Result(String),

    /// The background stream task failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl RuntimeError {
    /// Returns `true` when loading failed only because there is no model
    /// manifest at the configured path.
    pub fn is_missing_model(&self) -> bool {
        matches!(
            self,
            Self::Table(layer_table::TableError::ManifestRead(e)) if e.kind() == std::io::ErrorKind::NotFound
        )
    }

    pub(crate) fn branch(layer: usize, detail: impl Into<String>) -> Self {
        Self::BranchStateAssertion {
            layer,
            detail: detail.into(),
        }
    }

    pub(crate) fn blob(key: &str, detail: impl Into<String>) -> Self {
        Self::Blob {
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}
