// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight and activation checksums.
//!
//! Sums are compared against the values the offline compiler stored in the
//! layer table. A mismatch never stops execution: it is logged and returned
//! as a [`ChecksumMismatch`] so callers can decide what to do with it.

use layer_table::LayerDescriptor;
use std::fmt;

/// Which buffer a checksum was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumTarget {
    Weights,
    Input,
    Output,
}

impl fmt::Display for ChecksumTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChecksumTarget::Weights => "weights",
            ChecksumTarget::Input => "input",
            ChecksumTarget::Output => "output",
        })
    }
}

/// A checksum that did not match the expected value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChecksumMismatch {
    pub layer: String,
    pub index: usize,
    pub target: ChecksumTarget,
    pub expected: i64,
    pub actual: i64,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "layer {} ('{}') {} checksum mismatch: expected {}, got {}",
            self.index, self.layer, self.target, self.expected, self.actual
        )
    }
}

/// Sum of all bytes.
pub fn byte_sum(bytes: &[u8]) -> i64 {
    bytes.iter().map(|&b| i64::from(b)).sum()
}

/// Sum of little-endian signed 32-bit words, wrapping at 32 bits.
/// Trailing bytes are ignored.
pub fn word_sum(bytes: &[u8]) -> i64 {
    let sum = bytes
        .chunks_exact(4)
        .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0i32, i32::wrapping_add);
    i64::from(sum)
}

/// Compares `actual` against the layer's expected checksum for `target`.
///
/// Returns `None` when the layer carries no checksum for `target` or the
/// values agree.
pub fn check(layer: &LayerDescriptor, target: ChecksumTarget, actual: i64) -> Option<ChecksumMismatch> {
    let expected = match target {
        ChecksumTarget::Weights => layer.checksums.weights,
        ChecksumTarget::Input => layer.checksums.input,
        ChecksumTarget::Output => layer.checksums.output,
    }?;
    if expected == actual {
        tracing::trace!("layer {} {target} checksum ok ({actual})", layer.index);
        return None;
    }
    let mismatch = ChecksumMismatch {
        layer: layer.name.clone(),
        index: layer.index,
        target,
        expected,
        actual,
    };
    tracing::warn!("{mismatch}");
    Some(mismatch)
}
