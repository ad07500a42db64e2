// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Error type shared by every fallible entry point of the document core.
//!
//! Undo/redo exhaustion is deliberately not an error; it is reported through
//! [`crate::undo::UndoOutcome::Exhausted`] so callers can treat it as a normal
//! outcome. Internal invariant violations (a linked chunk with `start >= end`,
//! a dangling handle inside the chunk list) are bugs and panic instead of
//! returning one of these variants.

use thiserror::Error;

/// Errors reported by document, mark and attribute operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The requested position is not reachable in this document.
    #[error("position out of bounds")]
    OutOfBounds,

    /// A required argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An edit was attempted from inside a change-notification callback.
    #[error("buffer edit re-entered from a change notification")]
    Reentrancy,

    /// A single attribute exceeded the combined key+value size bound.
    #[error("attribute entry exceeds the size bound")]
    AttributeOverflow,
}

pub type Result<T> = std::result::Result<T, CoreError>;
