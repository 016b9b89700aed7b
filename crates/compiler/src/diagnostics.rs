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

//! Progress reports from the pipeline stages. The stages never log or print on their own; they
//! hand these events to whatever sink the caller supplies.

use crate::ast::{ScopeId, ScopeKind};
use rebind_iseq::{Label, Symbol};
use std::fmt::{Display, Formatter};
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    ScopeLifted {
        scope: ScopeId,
        kind: ScopeKind,
        locals: usize,
        expressions: usize,
    },
    InstructionSkipped {
        position: usize,
        opcode: String,
    },
    CatchEntryIgnored {
        kind: String,
    },
    ConditionalReconstructed {
        scope: ScopeId,
        else_label: Label,
        has_alternate: bool,
    },
    MarkerRewritten {
        scope: ScopeId,
        bound: Symbol,
        continuation: ScopeId,
        method: Symbol,
    },
    ScopeLowered {
        scope: ScopeId,
        instructions: usize,
        stack_max: u32,
    },
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::ScopeLifted {
                scope,
                kind,
                locals,
                expressions,
            } => write!(
                f,
                "lifted {kind} scope {} ({locals} locals, {expressions} expressions)",
                scope.0
            ),
            Diagnostic::InstructionSkipped { position, opcode } => {
                write!(f, "skipped `{opcode}` at {position}")
            }
            Diagnostic::CatchEntryIgnored { kind } => write!(f, "ignored `{kind}` catch entry"),
            Diagnostic::ConditionalReconstructed {
                scope,
                else_label,
                has_alternate,
            } => write!(
                f,
                "reconstructed conditional at {else_label} in scope {} (else arm: {has_alternate})",
                scope.0
            ),
            Diagnostic::MarkerRewritten {
                scope,
                bound,
                continuation,
                method,
            } => write!(
                f,
                "rewrote bind of `{bound}` in scope {} into `{method}` with continuation scope {}",
                scope.0, continuation.0
            ),
            Diagnostic::ScopeLowered {
                scope,
                instructions,
                stack_max,
            } => write!(
                f,
                "lowered scope {} to {instructions} instructions (stack max {stack_max})",
                scope.0
            ),
        }
    }
}

pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::InstructionSkipped { .. } | Diagnostic::CatchEntryIgnored { .. } => {
                trace!("{diagnostic}")
            }
            _ => debug!("{diagnostic}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _diagnostic: Diagnostic) {}
}

/// Keeps every diagnostic, in order.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink for CollectingSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
