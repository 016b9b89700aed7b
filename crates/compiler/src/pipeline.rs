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

use crate::ast::Scope;
use crate::codegen::{CodegenError, lower};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::lift::{LiftError, lift};
use crate::options::PipelineOptions;
use crate::rewrite::{RewriteError, rewrite};
use rebind_iseq::{InstructionSequence, IseqError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("could not decode instruction sequence: {0}")]
    Decode(#[from] IseqError),
    #[error("lift failed: {0}")]
    Lift(#[from] LiftError),
    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
    #[error("lowering failed: {0}")]
    Codegen(#[from] CodegenError),
}

/// Lift, rewrite, lower. Any stage failing fails the whole run.
pub struct Pipeline<S: DiagnosticSink = TracingSink> {
    options: PipelineOptions,
    sink: S,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            sink: TracingSink,
        }
    }
}

impl<S: DiagnosticSink> Pipeline<S> {
    pub fn with_sink<T: DiagnosticSink>(self, sink: T) -> Pipeline<T> {
        Pipeline {
            options: self.options,
            sink,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn lift(&mut self, iseq: &InstructionSequence) -> Result<Scope, PipelineError> {
        Ok(lift(iseq, &self.options.lift, &mut self.sink)?)
    }

    pub fn rewrite(&mut self, scope: Scope) -> Result<Scope, PipelineError> {
        Ok(rewrite(scope, &self.options.rewrite, &mut self.sink)?)
    }

    /// Lower `scope` with the configured codegen options as they are. The tree doesn't remember
    /// the version of the code object it was lifted from, so the header gets
    /// `options.codegen.version`, or the default version when that is unset; [`Pipeline::run`]
    /// carries the input's version over instead.
    pub fn lower(&mut self, scope: &Scope) -> Result<InstructionSequence, PipelineError> {
        Ok(lower(scope, &self.options.codegen, &mut self.sink)?)
    }

    /// The lifted (and, unless disabled, rewritten) tree of `iseq`.
    pub fn tree(&mut self, iseq: &InstructionSequence) -> Result<Scope, PipelineError> {
        let scope = self.lift(iseq)?;
        if self.options.rewrite_enabled {
            self.rewrite(scope)
        } else {
            Ok(scope)
        }
    }

    pub fn run(&mut self, iseq: &InstructionSequence) -> Result<InstructionSequence, PipelineError> {
        let scope = self.tree(iseq)?;
        let mut codegen = self.options.codegen.clone();
        codegen.version = Some(codegen.version.unwrap_or(iseq.version));
        Ok(lower(&scope, &codegen, &mut self.sink)?)
    }

    /// [`Pipeline::run`] over the JSON array form.
    pub fn run_json(&mut self, json: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
        let iseq = InstructionSequence::from_json(json)?;
        Ok(self.run(&iseq)?.to_json())
    }
}
