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

//! Lifts the host VM's flat instruction sequences into scope trees, desugars bind statements
//! into continuation calls, and lowers the result back to instruction sequences.

mod ast;
mod codegen;
mod diagnostics;
mod lift;
mod options;
mod pipeline;
mod rewrite;
mod unparse;


pub use crate::ast::{
    Call, Local, LocalKind, Node, Scope, ScopeId, ScopeIds, ScopeKind, Variable, visit_blocks,
};
pub use crate::codegen::{CodegenError, lower, wrap_for_loading};
pub use crate::diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, NullSink, TracingSink};
pub use crate::lift::{LiftError, lift, lift_within};
pub use crate::options::{CodegenOptions, LiftOptions, PipelineOptions, RewriteOptions, SlotLayout};
pub use crate::pipeline::{Pipeline, PipelineError};
pub use crate::rewrite::{RewriteError, rewrite};
pub use crate::unparse::unparse;
