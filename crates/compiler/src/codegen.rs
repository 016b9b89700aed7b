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

/// Takes a scope tree and turns it back into a flat instruction sequence.
use crate::ast::{Call, LocalKind, Node, Scope, ScopeId, ScopeKind, Variable};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::options::CodegenOptions;
use rebind_iseq::{
    ArgShape, CallFlag, CallFlags, CallInfo, Element, Instruction, InstructionSequence, IseqType,
    Label, Misc, Symbol, Value,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("scope {0:?} has an empty body")]
    EmptyBody(ScopeId),
    #[error("`{0}` is not declared by any enclosing scope")]
    UnboundVariable(Symbol),
    #[error("call to `{0}` has no receiver")]
    MissingReceiver(Symbol),
    #[error("unsupported argument shape: {0}")]
    UnsupportedArgumentShape(String),
}

// Code generation state for one code object.
pub struct CodegenState<'a, 's> {
    /// Outermost first; the scope being lowered is last.
    pub(crate) chain: Vec<&'a Scope>,
    pub(crate) body: Vec<Element>,
    pub(crate) next_label: usize,
    pub(crate) cur_stack: usize,
    pub(crate) max_stack: usize,
    pub(crate) last_line: Option<u32>,
    pub(crate) options: &'a CodegenOptions,
    pub(crate) sink: &'s mut dyn DiagnosticSink,
}

impl<'a, 's> CodegenState<'a, 's> {
    pub fn new(
        chain: Vec<&'a Scope>,
        options: &'a CodegenOptions,
        sink: &'s mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            chain,
            body: vec![],
            next_label: 0,
            cur_stack: 0,
            max_stack: 0,
            last_line: None,
            options,
            sink,
        }
    }

    // Create a fresh label, unique within this code object.
    fn make_jump_label(&mut self) -> Label {
        let label = Label::numbered(self.next_label);
        self.next_label += 1;
        label
    }

    // Place a label at the current position.
    fn commit_jump_label(&mut self, label: Label) {
        self.body.push(Element::Label(label));
    }

    fn emit(&mut self, instruction: Instruction) {
        self.body.push(Element::Instruction(instruction));
    }

    fn push_stack(&mut self, n: usize) {
        self.cur_stack += n;
        if self.cur_stack > self.max_stack {
            self.max_stack = self.cur_stack;
        }
    }

    fn pop_stack(&mut self, n: usize) {
        self.cur_stack = self.cur_stack.saturating_sub(n);
    }

    /// `(slot, level)` addressing `variable` from the scope being lowered.
    fn locate(&self, variable: &Variable) -> Result<(u32, u32), CodegenError> {
        let (level, scope) = self
            .chain
            .iter()
            .rev()
            .enumerate()
            .find(|(_, s)| s.id == variable.scope)
            .ok_or_else(|| CodegenError::UnboundVariable(variable.name.clone()))?;
        if variable.index >= scope.locals.len() {
            return Err(CodegenError::UnboundVariable(variable.name.clone()));
        }
        let slot = self
            .options
            .slots
            .slot(scope.locals.len(), variable.index);
        Ok((slot, level as u32))
    }

    fn generate_literal(&mut self, value: &Value) {
        let instruction = match value {
            Value::Nil => Instruction::PutNil,
            Value::Integer(0) => Instruction::PutObjectFix0,
            Value::Integer(1) => Instruction::PutObjectFix1,
            Value::String(s) => Instruction::PutString(s.clone()),
            Value::Array(items) => Instruction::DupArray(items.clone()),
            other => Instruction::PutObject(other.clone()),
        };
        self.emit(instruction);
        self.push_stack(1);
    }

    fn generate_call(&mut self, call: &Call) -> Result<(), CodegenError> {
        if call.args.is_empty() {
            return Err(CodegenError::MissingReceiver(call.method.clone()));
        }
        if let Some(line) = call.line {
            if self.last_line != Some(line) {
                self.body.push(Element::Line(line));
                self.last_line = Some(line);
            }
        }
        for arg in &call.args {
            self.generate_expr(arg)?;
        }
        let mut flags = CallFlags::new();
        if call.private {
            flags |= CallFlag::FCall;
            if call.args.len() == 1 && call.block.is_none() {
                flags |= CallFlag::VCall;
            }
        }
        let block = match &call.block {
            Some(block) => {
                let mut chain = self.chain.clone();
                chain.push(block);
                Some(Box::new(lower_scope(chain, self.options, self.sink)?))
            }
            None => None,
        };
        let argc = call.args.len() - 1;
        self.emit(Instruction::Send {
            call: CallInfo {
                mid: call.method.clone(),
                flags,
                argc: argc as u32,
            },
            block,
        });
        self.pop_stack(argc + 1);
        self.push_stack(1);
        Ok(())
    }

    /// Lower `nodes` so that they leave exactly one value: the last one's, or nil if empty.
    fn generate_sequence(&mut self, nodes: &[Node]) -> Result<(), CodegenError> {
        if nodes.is_empty() {
            self.emit(Instruction::PutNil);
            self.push_stack(1);
            return Ok(());
        }
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                self.emit(Instruction::Pop);
                self.pop_stack(1);
            }
            self.generate_expr(node)?;
        }
        Ok(())
    }

    fn generate_expr(&mut self, node: &Node) -> Result<(), CodegenError> {
        match node {
            Node::Literal(value) => self.generate_literal(value),
            Node::ArrayLiteral(items) => {
                for item in items {
                    self.generate_expr(item)?;
                }
                self.emit(Instruction::NewArray(items.len() as u32));
                self.pop_stack(items.len());
                self.push_stack(1);
            }
            Node::SelfReference => {
                self.emit(Instruction::PutSelf);
                self.push_stack(1);
            }
            Node::LocalRead(variable) => {
                let (slot, level) = self.locate(variable)?;
                self.emit(match level {
                    0 => Instruction::GetLocalLevel0(slot),
                    1 => Instruction::GetLocalLevel1(slot),
                    level => Instruction::GetLocal { slot, level },
                });
                self.push_stack(1);
            }
            Node::Assignment(variable, value) => {
                self.generate_expr(value)?;
                let (slot, level) = self.locate(variable)?;
                self.emit(Instruction::Dup);
                self.push_stack(1);
                self.emit(match level {
                    0 => Instruction::SetLocalLevel0(slot),
                    1 => Instruction::SetLocalLevel1(slot),
                    level => Instruction::SetLocal { slot, level },
                });
                self.pop_stack(1);
            }
            Node::Call(call) => self.generate_call(call)?,
            Node::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.generate_expr(test)?;
                let else_label = self.make_jump_label();
                let end_label = self.make_jump_label();
                self.emit(Instruction::BranchUnless(else_label.clone()));
                self.pop_stack(1);
                self.generate_sequence(consequent)?;
                self.emit(Instruction::Jump(end_label.clone()));
                // The alternate starts from the stack as it was at the branch.
                self.pop_stack(1);
                self.commit_jump_label(else_label);
                self.generate_sequence(alternate)?;
                self.commit_jump_label(end_label);
            }
        }
        Ok(())
    }

    fn generate_body(&mut self, scope: &Scope) -> Result<(), CodegenError> {
        let Some((last, init)) = scope.expressions.split_last() else {
            return Err(CodegenError::EmptyBody(scope.id));
        };
        for node in init {
            self.generate_expr(node)?;
            self.emit(Instruction::Pop);
            self.pop_stack(1);
        }
        self.generate_expr(last)?;
        self.emit(Instruction::Leave);
        self.pop_stack(1);
        Ok(())
    }
}

fn arg_shape(scope: &Scope) -> Result<ArgShape, CodegenError> {
    let mut shape = ArgShape::default();
    for (position, local) in scope.locals.iter().enumerate() {
        match local.kind {
            LocalKind::PlainArgument => shape.lead += 1,
            LocalKind::VariadicArgument => shape.rest = Some(position as u32),
            LocalKind::PostArgument => {
                if shape.post == 0 {
                    shape.post_start = position as u32;
                }
                shape.post += 1;
            }
            LocalKind::OptionalArgument => {
                return Err(CodegenError::UnsupportedArgumentShape(format!(
                    "optional argument `{}`",
                    local.name
                )));
            }
            LocalKind::PlainLocal => {}
        }
    }
    Ok(shape)
}

fn lower_scope(
    chain: Vec<&Scope>,
    options: &CodegenOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<InstructionSequence, CodegenError> {
    // `chain` always ends with the scope being lowered.
    let Some(scope) = chain.last().copied() else {
        return Err(CodegenError::EmptyBody(ScopeId(0)));
    };
    let params = arg_shape(scope)?;
    let mut state = CodegenState::new(chain, options, sink);
    state.generate_body(scope)?;
    let CodegenState {
        body,
        max_stack,
        sink,
        ..
    } = state;

    let (kind, label) = match scope.kind {
        ScopeKind::TopLevel => (IseqType::Top, options.root_label.clone()),
        ScopeKind::Method => (IseqType::Method, options.root_label.clone()),
        ScopeKind::Block => (IseqType::Block, format!("block in {}", options.root_label)),
    };
    let iseq = InstructionSequence {
        version: options.version.unwrap_or_default(),
        misc: Misc {
            arg_size: scope.argument_count() as u32,
            local_size: options.slots.local_size(scope.locals.len()),
            stack_max: max_stack as u32,
        },
        label,
        path: options.path.clone(),
        absolute_path: None,
        first_lineno: scope.line.unwrap_or(1),
        kind,
        locals: scope.locals.iter().map(|l| l.name.clone()).collect(),
        params,
        catch_table: vec![],
        body,
    };
    sink.emit(Diagnostic::ScopeLowered {
        scope: scope.id,
        instructions: iseq.instructions().count(),
        stack_max: iseq.misc.stack_max,
    });
    Ok(iseq)
}

/// Lower `scope` (and every block in it) to a code object of the matching type.
pub fn lower(
    scope: &Scope,
    options: &CodegenOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<InstructionSequence, CodegenError> {
    lower_scope(vec![scope], options, sink)
}

/// The host can't run a block code object on its own. Wrap it in a top-level one that evaluates
/// to a proc around it; top-level code objects are returned as they are.
pub fn wrap_for_loading(iseq: InstructionSequence, options: &CodegenOptions) -> InstructionSequence {
    if iseq.kind == IseqType::Top {
        return iseq;
    }
    let proc_call = CallInfo::new("proc", 0, CallFlags::new_with(CallFlag::FCall));
    InstructionSequence {
        version: iseq.version,
        misc: Misc {
            arg_size: 0,
            local_size: options.slots.local_size(0),
            stack_max: 1,
        },
        label: options.root_label.clone(),
        path: iseq.path.clone(),
        absolute_path: None,
        first_lineno: iseq.first_lineno,
        kind: IseqType::Top,
        locals: vec![],
        params: ArgShape::default(),
        catch_table: vec![],
        body: vec![
            Element::Instruction(Instruction::PutSelf),
            Element::Instruction(Instruction::Send {
                call: proc_call,
                block: Some(Box::new(iseq)),
            }),
            Element::Instruction(Instruction::Leave),
        ],
    }
}
