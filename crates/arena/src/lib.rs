// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # arena
//!
//! A double-ended bump allocator for the on-chip memory tier of a
//! multi-core microcontroller.
//!
//! # Key Components
//!
//! - [`DualArena`]: carves frames from either end of a fixed range. Each
//!   end is an explicit LIFO stack; frees are checked against the top frame.
//! - [`Side`]: which boundary a frame comes from. The scheduler flips it
//!   every layer to ping-pong inputs and outputs between the two ends.
//! - [`Region`]: a value naming one live frame (side, offset, size).
//! - [`ByteSize`]: human-readable tier sizes (`"410000"`, `"64K"`).
//! - [`ArenaStats`]: allocation counts and high-water marks.
//!
//! # Stack Model
//!
//! ```text
//! allocate(100, Begin)  allocate(200, End)
//!       │                     │
//!       ▼                     ▼
//!   begin stack: [100]    end stack: [200]
//!       │
//!       │  free(100, Begin)   ← must be the top frame of that side
//!       ▼
//!   begin stack: []
//! ```
//!
//! There is no coalescing and no general heap behaviour: a model whose
//! buffer lifetimes cannot be expressed as two stacks is rejected at the
//! first out-of-order free.
//!
//! # Example
//! ```
//! use arena::{DualArena, Side};
//!
//! let mut arena = DualArena::new(410_000).with_journal();
//! let input = arena.allocate(100, Side::Begin).unwrap();
//! let weights = arena.allocate(40, Side::Begin).unwrap();
//! arena.release(&weights).unwrap();
//! arena.release(&input).unwrap();
//! assert_eq!(arena.boundaries(), (0, 410_000));
//! assert_eq!(arena.journal().unwrap().len(), 4);
//! ```

mod dual;
mod error;
mod size;
mod stats;

pub use dual::{ArenaEvent, ArenaOp, DualArena, Region, Side, FRAME_ALIGN};
pub use error::ArenaError;
pub use size::ByteSize;
pub use stats::ArenaStats;
