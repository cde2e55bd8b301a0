// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the double-ended arena.

use crate::Side;

/// Errors that can occur while carving or releasing arena frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    /// The two boundaries would cross if the request were granted.
    #[error("arena exhausted: requested {requested} bytes on the {side} side, but only {available} bytes remain between the boundaries")]
    Exhausted {
        requested: usize,
        available: usize,
        side: Side,
    },

    /// Attempted to allocate a zero-sized frame.
    #[error("cannot allocate a zero-sized frame")]
    ZeroSized,

    /// A size-based free did not match the frame on top of that side.
    #[error("out-of-order free on the {side} side: top frame holds {top_size} bytes, caller freed {size} bytes")]
    OutOfOrderFree {
        side: Side,
        top_size: usize,
        size: usize,
    },

    /// A handle-based release named a frame that is not on top of its side.
    #[error("frame at offset {offset} is not on top of the {side} side (top frame is at offset {top_offset})")]
    NotOnTop {
        side: Side,
        offset: usize,
        top_offset: usize,
    },

    /// A free was issued against a side with no live frames.
    #[error("no live frames on the {side} side")]
    EmptySide { side: Side },

    /// A human-readable size string could not be parsed.
    #[error("invalid size '{0}': expected a number followed by an optional suffix (K, M)")]
    InvalidSize(String),
}
