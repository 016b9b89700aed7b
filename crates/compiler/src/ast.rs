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

/// The scope-aware expression tree produced by lifting, transformed by the rewriter and consumed
/// by codegen.
use rebind_iseq::{Symbol, Value};
use strum::Display;

/// Identifies a scope within one tree. Nodes refer to locals through the id of the declaring
/// scope rather than by position in the tree, so statements can move between scopes without
/// their references going stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

/// Hands out scope ids, in order.
#[derive(Debug, Default)]
pub struct ScopeIds {
    next: u32,
}

impl ScopeIds {
    /// An allocator whose ids don't collide with any already used in `scope`.
    pub fn after(scope: &Scope) -> Self {
        Self::after_id(scope.max_id())
    }

    pub fn after_id(id: ScopeId) -> Self {
        Self { next: id.0 + 1 }
    }

    pub fn fresh(&mut self) -> ScopeId {
        let id = ScopeId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeKind {
    TopLevel,
    Block,
    Method,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LocalKind {
    PlainArgument,
    OptionalArgument,
    VariadicArgument,
    PostArgument,
    PlainLocal,
}

impl LocalKind {
    pub fn is_argument(&self) -> bool {
        !matches!(self, LocalKind::PlainLocal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Local {
    pub name: Symbol,
    pub kind: LocalKind,
}

impl Local {
    pub fn new(name: &str, kind: LocalKind) -> Self {
        Self {
            name: Symbol::new(name),
            kind,
        }
    }
}

/// A reference to the `index`th local of scope `scope`. The name is carried along for display.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Variable {
    pub scope: ScopeId,
    pub index: usize,
    pub name: Symbol,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: Symbol,
    /// Receiver first, then the arguments.
    pub args: Vec<Node>,
    pub block: Option<Box<Scope>>,
    /// Receiver-less, function-style call.
    pub private: bool,
    /// The source line this call was lifted from; `None` when synthesized.
    pub line: Option<u32>,
}

impl Call {
    pub fn receiver(&self) -> Option<&Node> {
        self.args.first()
    }

    pub fn arguments(&self) -> &[Node] {
        self.args.get(1..).unwrap_or_default()
    }

    /// A read of `name` written before any local of that name exists: `name` called on self with
    /// no arguments.
    pub fn is_self_reference_to(&self, name: &Symbol) -> bool {
        self.private
            && self.method == *name
            && self.block.is_none()
            && matches!(self.args.as_slice(), [Node::SelfReference])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Literal(Value),
    ArrayLiteral(Vec<Node>),
    SelfReference,
    LocalRead(Variable),
    Assignment(Variable, Box<Node>),
    Call(Call),
    Conditional {
        test: Box<Node>,
        consequent: Vec<Node>,
        alternate: Vec<Node>,
    },
}

impl Node {
    pub fn int(i: i64) -> Self {
        Node::Literal(Value::Integer(i))
    }

    /// `receiver.method(args...)`
    pub fn send(method: &str, receiver: Node, args: Vec<Node>) -> Self {
        let mut all = vec![receiver];
        all.extend(args);
        Node::Call(Call {
            method: Symbol::new(method),
            args: all,
            block: None,
            private: false,
            line: None,
        })
    }

    /// `method(args...)`, called on self without an explicit receiver.
    pub fn fcall(method: &str, args: Vec<Node>) -> Self {
        let mut all = vec![Node::SelfReference];
        all.extend(args);
        Node::Call(Call {
            method: Symbol::new(method),
            args: all,
            block: None,
            private: true,
            line: None,
        })
    }

    pub fn assign(variable: Variable, value: Node) -> Self {
        Node::Assignment(variable, Box::new(value))
    }
}

/// A lexical activation record: its locals, its body, and where it sits in the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    /// 0 for the outermost scope, `parent.depth + 1` otherwise.
    pub depth: u32,
    /// Lookup only; a scope never owns its parent.
    pub parent: Option<ScopeId>,
    pub locals: Vec<Local>,
    pub expressions: Vec<Node>,
    pub line: Option<u32>,
}

impl Scope {
    pub fn new(id: ScopeId, kind: ScopeKind, parent: Option<&Scope>) -> Self {
        Self {
            id,
            kind,
            depth: parent.map(|p| p.depth + 1).unwrap_or(0),
            parent: parent.map(|p| p.id),
            locals: vec![],
            expressions: vec![],
            line: None,
        }
    }

    /// Reference to this scope's `index`th local.
    pub fn variable(&self, index: usize) -> Option<Variable> {
        self.locals.get(index).map(|local| Variable {
            scope: self.id,
            index,
            name: local.name.clone(),
        })
    }

    pub fn argument_count(&self) -> usize {
        self.locals.iter().filter(|l| l.kind.is_argument()).count()
    }

    /// Re-parent this scope, fixing up the depth of every scope nested in it.
    pub fn rebase(&mut self, parent: Option<ScopeId>, depth: u32) {
        self.parent = parent;
        self.depth = depth;
        let (id, depth) = (self.id, self.depth + 1);
        for node in &mut self.expressions {
            rebase_blocks(node, id, depth);
        }
    }

    /// The largest scope id used anywhere in this tree.
    pub fn max_id(&self) -> ScopeId {
        let mut max = self.id;
        for node in &self.expressions {
            visit_blocks(node, &mut |scope| max = max.max(scope.max_id()));
        }
        max
    }
}

fn rebase_blocks(node: &mut Node, parent: ScopeId, depth: u32) {
    match node {
        Node::Literal(_) | Node::SelfReference | Node::LocalRead(_) => {}
        Node::ArrayLiteral(items) => {
            for item in items {
                rebase_blocks(item, parent, depth);
            }
        }
        Node::Assignment(_, value) => rebase_blocks(value, parent, depth),
        Node::Call(call) => {
            for arg in &mut call.args {
                rebase_blocks(arg, parent, depth);
            }
            if let Some(block) = &mut call.block {
                block.rebase(Some(parent), depth);
            }
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
        } => {
            rebase_blocks(test, parent, depth);
            for n in consequent.iter_mut().chain(alternate.iter_mut()) {
                rebase_blocks(n, parent, depth);
            }
        }
    }
}

/// Call `f` on each block scope directly nested under `node` (not recursing into the blocks).
pub fn visit_blocks<'a>(node: &'a Node, f: &mut dyn FnMut(&'a Scope)) {
    match node {
        Node::Literal(_) | Node::SelfReference | Node::LocalRead(_) => {}
        Node::ArrayLiteral(items) => {
            for item in items {
                visit_blocks(item, f);
            }
        }
        Node::Assignment(_, value) => visit_blocks(value, f),
        Node::Call(call) => {
            for arg in &call.args {
                visit_blocks(arg, f);
            }
            if let Some(block) = &call.block {
                f(block);
            }
        }
        Node::Conditional {
            test,
            consequent,
            alternate,
        } => {
            visit_blocks(test, f);
            for n in consequent.iter().chain(alternate.iter()) {
                visit_blocks(n, f);
            }
        }
    }
}
