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

use thiserror::Error;

/// Failures decoding the JSON form of an instruction sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IseqError {
    #[error("not an instruction sequence: unexpected format tag {0:?}")]
    BadMagic(String),
    #[error("expected a {expected}-element array, found {found}")]
    BadArity { expected: usize, found: String },
    #[error("malformed header field `{field}`: {reason}")]
    BadHeader { field: &'static str, reason: String },
    #[error("unknown code object type: {0}")]
    UnknownType(String),
    #[error("malformed instruction `{opcode}`: {reason}")]
    BadInstruction { opcode: String, reason: String },
    #[error("malformed body element: {0}")]
    BadElement(String),
    #[error("malformed literal operand: {0}")]
    BadLiteral(String),
    #[error("malformed catch table entry: {0}")]
    BadCatchEntry(String),
}
