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

//! Lifts a flat instruction sequence into a [`Scope`] tree by abstract interpretation over a
//! symbolic operand stack, reconstructing `if`/`else` from branch, jump and label triples.

use crate::ast::{Call, Local, LocalKind, Node, Scope, ScopeId, ScopeIds, ScopeKind, Variable};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::options::LiftOptions;
use rebind_iseq::{
    ArgShape, CallFlag, CallInfo, CatchKind, Element, Instruction, InstructionSequence, IseqType,
    Label, Symbol, Value,
};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiftError {
    #[error("unsupported instruction `{opcode}` at position {position}: {detail}")]
    UnsupportedOpcode {
        opcode: String,
        position: usize,
        detail: String,
    },
    #[error("malformed bytecode at position {position}: {reason}")]
    MalformedBytecode { position: usize, reason: String },
    #[error("cannot lift a `{0}` code object")]
    UnsupportedScopeKind(IseqType),
    #[error("unsupported argument shape: {0}")]
    UnsupportedArgumentShape(String),
}

/// Where a conditional's consequent arm continues once it's done.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArmEnd {
    Label(Label),
    /// The arm returns; the host's peephole pass folds a jump to a trailing `leave` into the
    /// `leave` itself.
    Leave,
}

#[derive(Debug, Default)]
struct Arm {
    nodes: Vec<Node>,
    /// Whether the arm leaves its last value on the stack.
    value: bool,
}

/// An `if` whose arms are still being read.
#[derive(Debug)]
struct PendingIf {
    test: Node,
    else_label: Label,
    end: Option<ArmEnd>,
    /// Set once the else label has been reached; the entries above are then the alternate arm.
    consequent: Option<Arm>,
}

impl PendingIf {
    fn closes_at(&self, label: &Label) -> bool {
        match &self.consequent {
            None => self.else_label == *label,
            Some(_) => matches!(&self.end, Some(ArmEnd::Label(end)) if end == label),
        }
    }

    fn closes_at_leave(&self) -> bool {
        self.consequent.is_some() && self.end == Some(ArmEnd::Leave)
    }
}

#[derive(Debug)]
enum Entry {
    /// A value still available as an operand.
    Value(Node),
    /// A completed statement whose value was discarded or never produced.
    Statement(Node),
    PendingIf(PendingIf),
}

impl Entry {
    fn into_node(self, position: usize) -> Result<Node, LiftError> {
        match self {
            Entry::Value(node) | Entry::Statement(node) => Ok(node),
            Entry::PendingIf(pending) => Err(LiftError::MalformedBytecode {
                position,
                reason: format!("branch to {} is never resolved", pending.else_label),
            }),
        }
    }
}

/// A scope on the lexical chain of the scope being lifted.
#[derive(Clone, Copy)]
struct Frame<'a> {
    id: ScopeId,
    locals: &'a [Local],
}

struct Lift<'a, 's> {
    body: &'a [Element],
    /// Outermost first; the scope being lifted is last.
    frames: &'a [Frame<'a>],
    depth: u32,
    options: &'a LiftOptions,
    ids: &'s mut ScopeIds,
    sink: &'s mut dyn DiagnosticSink,
    stack: Vec<Entry>,
    seen_labels: HashSet<Label>,
    line: Option<u32>,
    /// Set by a `dup` that feeds the local write after it.
    dup_pending: bool,
    left: bool,
}

fn unsupported(instruction: &Instruction, position: usize, detail: &str) -> LiftError {
    LiftError::UnsupportedOpcode {
        opcode: instruction.opcode().to_string(),
        position,
        detail: detail.to_string(),
    }
}

fn malformed(position: usize, reason: impl Into<String>) -> LiftError {
    LiftError::MalformedBytecode {
        position,
        reason: reason.into(),
    }
}

impl<'a, 's> Lift<'a, 's> {
    fn current(&self) -> ScopeId {
        // The scope being lifted is always pushed before lifting starts.
        self.frames.last().map(|f| f.id).unwrap_or(ScopeId(0))
    }

    fn push_value(&mut self, node: Node) {
        self.stack.push(Entry::Value(node));
    }

    fn pop_value(&mut self, position: usize) -> Result<Node, LiftError> {
        match self.stack.pop() {
            Some(Entry::Value(node)) => Ok(node),
            Some(Entry::Statement(_)) => Err(malformed(
                position,
                "expected a value on the operand stack, found a discarded statement",
            )),
            Some(Entry::PendingIf(_)) => Err(malformed(
                position,
                "operand stack underflow inside a conditional arm",
            )),
            None => Err(malformed(position, "operand stack underflow")),
        }
    }

    fn pop_values(&mut self, n: usize, position: usize) -> Result<Vec<Node>, LiftError> {
        let mut values = (0..n)
            .map(|_| self.pop_value(position))
            .collect::<Result<Vec<_>, _>>()?;
        values.reverse();
        Ok(values)
    }

    fn variable(&self, slot: u32, level: u32, position: usize) -> Result<Variable, LiftError> {
        let frame = self
            .frames
            .len()
            .checked_sub(level as usize + 1)
            .map(|i| self.frames[i])
            .ok_or_else(|| {
                malformed(
                    position,
                    format!("local access {level} scopes up, but only {} enclose it", self.frames.len() - 1),
                )
            })?;
        let index = self
            .options
            .slots
            .position(frame.locals.len(), slot)
            .ok_or_else(|| malformed(position, format!("slot {slot} addresses no local")))?;
        Ok(Variable {
            scope: frame.id,
            index,
            name: frame.locals[index].name.clone(),
        })
    }

    fn write_local(&mut self, slot: u32, level: u32, position: usize) -> Result<(), LiftError> {
        let value = self.pop_value(position)?;
        let variable = self.variable(slot, level, position)?;
        let node = Node::Assignment(variable, Box::new(value));
        if std::mem::take(&mut self.dup_pending) {
            self.stack.push(Entry::Value(node));
        } else {
            self.stack.push(Entry::Statement(node));
        }
        Ok(())
    }

    fn call(
        &mut self,
        instruction: &Instruction,
        call: &CallInfo,
        block: Option<&InstructionSequence>,
        position: usize,
    ) -> Result<(), LiftError> {
        if call.flags.contains(CallFlag::ArgsSplat) || call.flags.contains(CallFlag::ArgsBlockArg) {
            return Err(unsupported(
                instruction,
                position,
                "splat and block arguments are not supported",
            ));
        }
        let args = self.pop_values(call.argc as usize + 1, position)?;
        let block = match block {
            Some(block) => Some(Box::new(lift_scope(
                block,
                self.frames,
                self.depth + 1,
                self.options,
                self.ids,
                self.sink,
            )?)),
            None => None,
        };
        self.push_value(Node::Call(Call {
            method: call.mid.clone(),
            args,
            block,
            private: call.is_private(),
            line: self.line,
        }));
        Ok(())
    }

    fn branch(&mut self, test: Node, label: &Label, position: usize) -> Result<(), LiftError> {
        if self.seen_labels.contains(label) {
            return Err(malformed(position, format!("backward branch to {label}")));
        }
        self.stack.push(Entry::PendingIf(PendingIf {
            test,
            else_label: label.clone(),
            end: None,
            consequent: None,
        }));
        Ok(())
    }

    /// Record where the innermost conditional still reading its consequent arm continues.
    ///
    /// A jump to an arm's own else label can't be that arm's exit: the arm is an `if` without
    /// `else` whose branch was threaded to the end of an enclosing arm, and the jump is the
    /// enclosing arm's.
    fn end_arm(&mut self, end: ArmEnd, position: usize) -> Result<bool, LiftError> {
        let open = |e: &Entry| matches!(e, Entry::PendingIf(p) if p.consequent.is_none());
        let threaded = |e: &Entry| {
            matches!((e, &end), (Entry::PendingIf(p), ArmEnd::Label(l)) if p.else_label == *l)
        };
        let index = self
            .stack
            .iter()
            .rposition(|e| open(e) && !threaded(e))
            .or_else(|| self.stack.iter().rposition(open));
        let Some(index) = index else {
            return Ok(false);
        };
        let Entry::PendingIf(pending) = &mut self.stack[index] else {
            return Ok(false);
        };
        if let Some(existing) = &pending.end {
            // An unreachable repeat of the same exit is let through.
            if *existing != end {
                return Err(malformed(
                    position,
                    format!("second exit from the arm branching to {}", pending.else_label),
                ));
            }
        } else {
            pending.end = Some(end);
        }
        Ok(true)
    }

    fn drain_arm(&mut self, index: usize, position: usize) -> Result<Arm, LiftError> {
        let entries = self.stack.split_off(index + 1);
        let value = matches!(entries.last(), Some(Entry::Value(_)));
        let nodes = entries
            .into_iter()
            .map(|e| e.into_node(position))
            .collect::<Result<_, _>>()?;
        Ok(Arm { nodes, value })
    }

    /// Finish the conditional at `index`, which must be the topmost one, with the entries above it
    /// as its last arm.
    fn close(&mut self, index: usize, position: usize) -> Result<(), LiftError> {
        let arm = self.drain_arm(index, position)?;
        let Some(Entry::PendingIf(pending)) = self.stack.pop() else {
            return Err(malformed(position, "lost track of a conditional"));
        };
        let (consequent, alternate) = match pending.consequent {
            Some(consequent) => (consequent, arm),
            None => (arm, Arm::default()),
        };
        let value = if alternate.nodes.is_empty() {
            consequent.value
        } else {
            alternate.value
        };
        self.sink.emit(Diagnostic::ConditionalReconstructed {
            scope: self.current(),
            else_label: pending.else_label,
            has_alternate: !alternate.nodes.is_empty(),
        });
        let node = Node::Conditional {
            test: Box::new(pending.test),
            consequent: consequent.nodes,
            alternate: alternate.nodes,
        };
        self.stack.push(if value {
            Entry::Value(node)
        } else {
            Entry::Statement(node)
        });
        Ok(())
    }

    /// Resolve every pending conditional that `closes` says ends here, innermost first. A
    /// conditional nested in an arm that ends here is finished along with it, which is what the
    /// host's jump threading produces for `if/elsif` chains and for an `if` without `else` at the
    /// end of an enclosing consequent.
    fn resolve(
        &mut self,
        position: usize,
        closes: impl Fn(&PendingIf) -> bool,
    ) -> Result<(), LiftError> {
        while let Some(index) = self
            .stack
            .iter()
            .rposition(|e| matches!(e, Entry::PendingIf(p) if closes(p)))
        {
            let outer_end = match &self.stack[index] {
                Entry::PendingIf(p) if p.consequent.is_none() => p.end.clone(),
                _ => None,
            };
            while let Some(inner) = self.stack[index + 1..]
                .iter()
                .rposition(|e| matches!(e, Entry::PendingIf(_)))
            {
                let inner = index + 1 + inner;
                match &self.stack[inner] {
                    Entry::PendingIf(p) if p.consequent.is_some() => self.close(inner, position)?,
                    Entry::PendingIf(p)
                        if outer_end == Some(ArmEnd::Label(p.else_label.clone())) =>
                    {
                        self.close(inner, position)?
                    }
                    _ => {
                        return Err(malformed(
                            position,
                            "conditional arms overlap without nesting",
                        ));
                    }
                }
            }
            let reached_else = matches!(
                &self.stack[index],
                Entry::PendingIf(p) if p.consequent.is_none() && p.end.is_some()
            );
            if reached_else {
                let arm = self.drain_arm(index, position)?;
                if let Some(Entry::PendingIf(pending)) = self.stack.last_mut() {
                    pending.consequent = Some(arm);
                }
            } else {
                self.close(index, position)?;
            }
        }
        Ok(())
    }

    fn label(&mut self, label: &Label, position: usize) -> Result<(), LiftError> {
        self.seen_labels.insert(label.clone());
        self.resolve(position, |p| p.closes_at(label))
    }

    fn instruction(
        &mut self,
        instruction: &Instruction,
        position: usize,
        last: bool,
    ) -> Result<(), LiftError> {
        match instruction {
            Instruction::Nop | Instruction::Trace(_) => {
                self.sink.emit(Diagnostic::InstructionSkipped {
                    position,
                    opcode: instruction.opcode().to_string(),
                });
            }
            Instruction::PutNil => self.push_value(Node::Literal(Value::Nil)),
            Instruction::PutSelf => self.push_value(Node::SelfReference),
            Instruction::PutObject(value) => self.push_value(Node::Literal(value.clone())),
            Instruction::PutObjectFix0 => self.push_value(Node::int(0)),
            Instruction::PutObjectFix1 => self.push_value(Node::int(1)),
            Instruction::PutString(s) => self.push_value(Node::Literal(Value::String(s.clone()))),
            Instruction::NewArray(n) => {
                let items = self.pop_values(*n as usize, position)?;
                self.push_value(Node::ArrayLiteral(items));
            }
            Instruction::DupArray(values) => {
                self.push_value(Node::Literal(Value::Array(values.clone())));
            }
            Instruction::Dup => {
                // Only the "assignment as a value" idiom: `dup` straight into a local write.
                let next = self.body[position + 1..]
                    .iter()
                    .find(|e| !matches!(e, Element::Line(_)));
                match next {
                    Some(Element::Instruction(i)) if i.local_write().is_some() => {
                        self.dup_pending = true;
                    }
                    _ => {
                        return Err(unsupported(
                            instruction,
                            position,
                            "only supported directly before a local write",
                        ));
                    }
                }
            }
            Instruction::Pop => match self.stack.pop() {
                Some(Entry::Value(node)) => self.stack.push(Entry::Statement(node)),
                _ => return Err(malformed(position, "`pop` with no value on the stack")),
            },
            Instruction::GetLocal { slot, level } => {
                let variable = self.variable(*slot, *level, position)?;
                self.push_value(Node::LocalRead(variable));
            }
            Instruction::GetLocalLevel0(slot) => {
                let variable = self.variable(*slot, 0, position)?;
                self.push_value(Node::LocalRead(variable));
            }
            Instruction::GetLocalLevel1(slot) => {
                let variable = self.variable(*slot, 1, position)?;
                self.push_value(Node::LocalRead(variable));
            }
            Instruction::SetLocal { slot, level } => self.write_local(*slot, *level, position)?,
            Instruction::SetLocalLevel0(slot) => self.write_local(*slot, 0, position)?,
            Instruction::SetLocalLevel1(slot) => self.write_local(*slot, 1, position)?,
            Instruction::Send { call, block } => {
                self.call(instruction, call, block.as_deref(), position)?;
            }
            Instruction::OptSend { call, .. } => self.call(instruction, call, None, position)?,
            Instruction::BranchUnless(label) => {
                let test = self.pop_value(position)?;
                self.branch(test, label, position)?;
            }
            Instruction::BranchIf(label) => {
                let test = self.pop_value(position)?;
                let negated = Node::Call(Call {
                    method: Symbol::new("!"),
                    args: vec![test],
                    block: None,
                    private: false,
                    line: self.line,
                });
                self.branch(negated, label, position)?;
            }
            Instruction::Jump(label) => {
                if self.seen_labels.contains(label) {
                    return Err(unsupported(instruction, position, "backward jumps (loops)"));
                }
                if !self.end_arm(ArmEnd::Label(label.clone()), position)? {
                    return Err(unsupported(
                        instruction,
                        position,
                        "jump outside a conditional",
                    ));
                }
            }
            Instruction::Leave if last => {
                self.resolve(position, PendingIf::closes_at_leave)?;
                self.left = true;
            }
            Instruction::Leave => {
                if !self.end_arm(ArmEnd::Leave, position)? {
                    return Err(unsupported(instruction, position, "early return"));
                }
            }
            Instruction::Other { .. } => {
                return Err(unsupported(
                    instruction,
                    position,
                    "not in the supported instruction subset",
                ));
            }
        }
        Ok(())
    }

    fn run(mut self) -> Result<Vec<Node>, LiftError> {
        let body = self.body;
        let last = body
            .iter()
            .rposition(|e| matches!(e, Element::Instruction(_)));
        for (position, element) in body.iter().enumerate() {
            match element {
                Element::Line(line) => self.line = Some(*line),
                Element::Label(label) => self.label(label, position)?,
                Element::Instruction(instruction) => {
                    self.instruction(instruction, position, Some(position) == last)?;
                }
            }
        }
        let end = body.len();
        if !self.left {
            return Err(malformed(end, "code object does not end with `leave`"));
        }
        if !matches!(self.stack.last(), Some(Entry::Value(_))) {
            return Err(malformed(end, "`leave` with no value on the stack"));
        }
        self.stack
            .into_iter()
            .map(|e| e.into_node(end))
            .collect()
    }
}

fn scope_kind(kind: IseqType) -> Result<ScopeKind, LiftError> {
    match kind {
        IseqType::Top => Ok(ScopeKind::TopLevel),
        IseqType::Block => Ok(ScopeKind::Block),
        IseqType::Method => Ok(ScopeKind::Method),
        other => Err(LiftError::UnsupportedScopeKind(other)),
    }
}

fn local_kinds(params: &ArgShape, count: usize) -> Result<Vec<LocalKind>, LiftError> {
    if !params.optional.is_empty() {
        return Err(LiftError::UnsupportedArgumentShape(
            "optional arguments".to_string(),
        ));
    }
    if params.block.is_some() {
        return Err(LiftError::UnsupportedArgumentShape(
            "block arguments".to_string(),
        ));
    }
    let lead = params.lead as usize;
    let post_end = params.post_start.checked_add(params.post).ok_or_else(|| {
        LiftError::UnsupportedArgumentShape(format!("post arguments of {params:?} overflow"))
    })?;
    let post = params.post_start as usize..post_end as usize;
    if lead > count || post.end > count || params.rest.is_some_and(|r| r as usize >= count) {
        return Err(LiftError::UnsupportedArgumentShape(format!(
            "argument shape {params:?} does not fit {count} locals"
        )));
    }
    let kinds = (0..count)
        .map(|i| {
            if i < lead {
                LocalKind::PlainArgument
            } else if params.rest == Some(i as u32) {
                LocalKind::VariadicArgument
            } else if post.contains(&i) {
                LocalKind::PostArgument
            } else {
                LocalKind::PlainLocal
            }
        })
        .collect();
    Ok(kinds)
}

fn lift_scope(
    iseq: &InstructionSequence,
    chain: &[Frame<'_>],
    depth: u32,
    options: &LiftOptions,
    ids: &mut ScopeIds,
    sink: &mut dyn DiagnosticSink,
) -> Result<Scope, LiftError> {
    let kind = scope_kind(iseq.kind)?;
    for entry in &iseq.catch_table {
        match entry.kind {
            CatchKind::Redo | CatchKind::Next => sink.emit(Diagnostic::CatchEntryIgnored {
                kind: entry.kind.to_string(),
            }),
            other => {
                return Err(LiftError::UnsupportedOpcode {
                    opcode: format!("catch:{other}"),
                    position: 0,
                    detail: "exception handling".to_string(),
                });
            }
        }
    }
    let locals: Vec<Local> = local_kinds(&iseq.params, iseq.locals.len())?
        .into_iter()
        .zip(&iseq.locals)
        .map(|(kind, name)| Local {
            name: name.clone(),
            kind,
        })
        .collect();
    let id = ids.fresh();
    let parent = chain.last().map(|f| f.id);
    let mut frames = chain.to_vec();
    frames.push(Frame {
        id,
        locals: &locals,
    });
    let lift = Lift {
        body: &iseq.body,
        frames: &frames,
        depth,
        options,
        ids,
        sink: &mut *sink,
        stack: vec![],
        seen_labels: HashSet::new(),
        line: None,
        dup_pending: false,
        left: false,
    };
    let expressions = lift.run()?;
    sink.emit(Diagnostic::ScopeLifted {
        scope: id,
        kind,
        locals: locals.len(),
        expressions: expressions.len(),
    });
    Ok(Scope {
        id,
        kind,
        depth,
        parent,
        locals,
        expressions,
        line: Some(iseq.first_lineno),
    })
}

/// Lift a code object and the blocks nested in it.
pub fn lift(
    iseq: &InstructionSequence,
    options: &LiftOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<Scope, LiftError> {
    let mut ids = ScopeIds::default();
    lift_scope(iseq, &[], 0, options, &mut ids, sink)
}

/// Lift a code object that runs nested inside `parents` (outermost first), so that its accesses to
/// enclosing locals resolve against them.
pub fn lift_within(
    iseq: &InstructionSequence,
    parents: &[&Scope],
    options: &LiftOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<Scope, LiftError> {
    let mut ids = parents
        .iter()
        .map(|p| p.max_id())
        .max()
        .map(ScopeIds::after_id)
        .unwrap_or_default();
    let chain: Vec<Frame> = parents
        .iter()
        .map(|p| Frame {
            id: p.id,
            locals: &p.locals,
        })
        .collect();
    let depth = parents.last().map(|p| p.depth + 1).unwrap_or(0);
    lift_scope(iseq, &chain, depth, options, &mut ids, sink)
}
