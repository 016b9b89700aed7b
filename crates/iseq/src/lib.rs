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

//! The instruction sequence interchange format of the host VM: a 14-element JSON array holding a
//! header and a flat body of line events, labels and instructions.

mod bitenum;
mod call;
mod error;
mod iseq;
mod labels;
mod opcode;
mod symbol;
mod value;

pub use bitenum::BitEnum;
pub use call::{CallFlag, CallFlags, CallInfo};
pub use error::IseqError;
pub use iseq::{
    ArgShape, CatchEntry, CatchKind, FormatVersion, InstructionSequence, IseqType, MAGIC, Misc,
};
pub use labels::Label;
pub use opcode::{
    Element, GETLOCAL_LEVEL0, GETLOCAL_LEVEL1, Instruction, PUTOBJECT_FIX0, PUTOBJECT_FIX1,
    SETLOCAL_LEVEL0, SETLOCAL_LEVEL1,
};
pub use symbol::Symbol;
pub use value::Value;
