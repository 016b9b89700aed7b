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

//! Desugars bind statements (`name <= effect`) into continuation calls: everything after the
//! statement moves into a block taking `name`, passed to `effect.and_then` (or `effect.within`
//! for the last bind of a chain).

use crate::ast::{Call, Local, LocalKind, Node, Scope, ScopeId, ScopeIds, ScopeKind, Variable};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::options::RewriteOptions;
use rebind_iseq::Symbol;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("cannot resolve `{operator}` bind: {reason}")]
    UnresolvedMarker { operator: String, reason: String },
}

/// What a continuation parameter replaces inside its body.
struct Binding {
    name: Symbol,
    /// A variable the bind rebinds, if the name was already bound by an earlier bind.
    rebinds: Option<Variable>,
    parameter: Variable,
}

fn is_marker(node: &Node, options: &RewriteOptions) -> bool {
    matches!(node, Node::Call(call)
        if call.method == options.bind_operator.as_str()
            && call.args.len() == 2
            && call.block.is_none())
}

fn unresolved(options: &RewriteOptions, reason: impl Into<String>) -> RewriteError {
    RewriteError::UnresolvedMarker {
        operator: options.bind_operator.clone(),
        reason: reason.into(),
    }
}

/// The name a marker's left operand binds, and the variable it rebinds if any. Only parameters of
/// `continuations` can be rebound; any other local on the left is an ordinary comparison.
fn bound_name(
    target: &Node,
    continuations: &[ScopeId],
    options: &RewriteOptions,
) -> Result<(Symbol, Option<Variable>), RewriteError> {
    match target {
        Node::Call(call) if call.is_self_reference_to(&call.method) => {
            Ok((call.method.clone(), None))
        }
        Node::LocalRead(variable) if continuations.contains(&variable.scope) => {
            Ok((variable.name.clone(), Some(variable.clone())))
        }
        Node::LocalRead(variable) => Err(unresolved(
            options,
            format!("`{}` is a local variable, not a bound name", variable.name),
        )),
        _ => Err(unresolved(
            options,
            "the left operand is not a plain name",
        )),
    }
}

fn shadow_all(nodes: Vec<Node>, binding: &Binding) -> Vec<Node> {
    nodes.into_iter().map(|n| shadow(n, binding)).collect()
}

fn shadow_scope(mut scope: Scope, binding: &Binding) -> Scope {
    scope.expressions = shadow_all(std::mem::take(&mut scope.expressions), binding);
    scope
}

/// Replace references to the bound name with reads of the continuation parameter, all the way
/// down the tree.
fn shadow(node: Node, binding: &Binding) -> Node {
    match node {
        Node::Call(call) if call.is_self_reference_to(&binding.name) => {
            Node::LocalRead(binding.parameter.clone())
        }
        Node::LocalRead(variable) if binding.rebinds.as_ref() == Some(&variable) => {
            Node::LocalRead(binding.parameter.clone())
        }
        Node::Literal(_) | Node::SelfReference | Node::LocalRead(_) => node,
        Node::ArrayLiteral(items) => Node::ArrayLiteral(shadow_all(items, binding)),
        Node::Assignment(variable, value) => {
            Node::Assignment(variable, Box::new(shadow(*value, binding)))
        }
        Node::Call(call) => Node::Call(Call {
            args: shadow_all(call.args, binding),
            block: call.block.map(|b| Box::new(shadow_scope(*b, binding))),
            ..call
        }),
        Node::Conditional {
            test,
            consequent,
            alternate,
        } => Node::Conditional {
            test: Box::new(shadow(*test, binding)),
            consequent: shadow_all(consequent, binding),
            alternate: shadow_all(alternate, binding),
        },
    }
}

fn rewrite_scope(
    mut scope: Scope,
    options: &RewriteOptions,
    ids: &mut ScopeIds,
    continuations: &mut Vec<ScopeId>,
    sink: &mut dyn DiagnosticSink,
) -> Result<Scope, RewriteError> {
    let markers = scope
        .expressions
        .iter()
        .filter(|n| is_marker(n, options))
        .count();
    let Some(first) = scope
        .expressions
        .iter()
        .position(|n| is_marker(n, options))
    else {
        return Ok(scope);
    };

    let mut body = scope.expressions.split_off(first);
    let Node::Call(marker) = body.remove(0) else {
        return Err(unresolved(options, "bind is not a call"));
    };
    let [target, effect]: [Node; 2] = marker
        .args
        .try_into()
        .map_err(|_| unresolved(options, "bind does not have two operands"))?;
    let (name, rebinds) = bound_name(&target, continuations, options)?;
    if body.is_empty() {
        return Err(unresolved(
            options,
            format!("nothing follows the bind of `{name}`"),
        ));
    }

    let id = ids.fresh();
    continuations.push(id);
    let parameter = Variable {
        scope: id,
        index: 0,
        name: name.clone(),
    };
    let binding = Binding {
        name: name.clone(),
        rebinds,
        parameter,
    };
    let mut continuation = Scope::new(id, ScopeKind::Block, Some(&scope));
    continuation.locals = vec![Local {
        name: name.clone(),
        kind: LocalKind::PlainArgument,
    }];
    continuation.expressions = shadow_all(body, &binding);
    continuation.rebase(Some(scope.id), scope.depth + 1);
    let continuation = rewrite_scope(continuation, options, ids, continuations, sink)?;

    let method = if markers > 1 {
        &options.chain_method
    } else {
        &options.terminal_method
    };
    sink.emit(Diagnostic::MarkerRewritten {
        scope: scope.id,
        bound: name,
        continuation: id,
        method: Symbol::new(method),
    });
    scope.expressions.push(Node::Call(Call {
        method: Symbol::new(method),
        args: vec![effect],
        block: Some(Box::new(continuation)),
        private: false,
        line: None,
    }));
    Ok(scope)
}

/// Rewrite every bind statement in `scope`'s body. Binds nested in expressions or inside blocks
/// the scope already had are left alone; a scope with no binds comes back unchanged.
pub fn rewrite(
    scope: Scope,
    options: &RewriteOptions,
    sink: &mut dyn DiagnosticSink,
) -> Result<Scope, RewriteError> {
    let mut ids = ScopeIds::after(&scope);
    rewrite_scope(scope, options, &mut ids, &mut vec![], sink)
}

#[cfg(test)]
mod tests {
    use crate::ast::{Call, Local, LocalKind, Node, Scope, ScopeId, ScopeKind, Variable};
    use crate::diagnostics::{CollectingSink, Diagnostic, NullSink};
    use crate::options::RewriteOptions;
    use crate::rewrite::{RewriteError, rewrite};
    use crate::unparse::unparse;
    use pretty_assertions::assert_eq;
    use rebind_iseq::Symbol;
    use unindent::unindent;

    fn bind(target: Node, effect: Node) -> Node {
        Node::send("<=", target, vec![effect])
    }

    fn name(n: &str) -> Node {
        Node::fcall(n, vec![])
    }

    fn top_with_locals(locals: &[&str]) -> Scope {
        let mut top = Scope::new(ScopeId(0), ScopeKind::TopLevel, None);
        top.locals = locals
            .iter()
            .map(|l| Local::new(l, LocalKind::PlainLocal))
            .collect();
        top
    }

    fn run(scope: Scope) -> Scope {
        rewrite(scope, &RewriteOptions::default(), &mut NullSink).unwrap()
    }

    /// The continuation block passed to `call`.
    fn continuation(node: &Node) -> &Scope {
        match node {
            Node::Call(Call {
                block: Some(block), ..
            }) => block,
            other => panic!("expected a call with a block, got {other:?}"),
        }
    }

    fn count_calls(scope: &Scope, method: &str) -> usize {
        let mut count = 0;
        for node in &scope.expressions {
            if let Node::Call(call) = node {
                if call.method == method {
                    count += 1;
                }
                if let Some(block) = &call.block {
                    count += count_calls(block, method);
                }
            }
        }
        count
    }

    /// a <= do_first(1); b = a + 4; c <= do_second(b); d = c * 2; e <= do_third(d); e + d
    fn three_binds() -> Scope {
        let mut top = top_with_locals(&["b", "d"]);
        let b = top.variable(0).unwrap();
        let d = top.variable(1).unwrap();
        top.expressions = vec![
            bind(name("a"), Node::fcall("do_first", vec![Node::int(1)])),
            Node::assign(b.clone(), Node::send("+", name("a"), vec![Node::int(4)])),
            bind(name("c"), Node::fcall("do_second", vec![Node::LocalRead(b)])),
            Node::assign(d.clone(), Node::send("*", name("c"), vec![Node::int(2)])),
            bind(name("e"), Node::fcall("do_third", vec![Node::LocalRead(d.clone())])),
            Node::send("+", name("e"), vec![Node::LocalRead(d)]),
        ];
        top
    }

    #[test]
    fn test_three_binds_nest_right() {
        let rewritten = run(three_binds());
        let expected = unindent(
            r#"
            do_first(1).and_then do |a|
              b = a + 4
              do_second(b).and_then do |c|
                d = c * 2
                do_third(d).within do |e|
                  e + d
                end
              end
            end"#,
        );
        assert_eq!(unparse(&rewritten), expected);
        assert_eq!(count_calls(&rewritten, "and_then"), 2);
        assert_eq!(count_calls(&rewritten, "within"), 1);
        assert_eq!(count_calls(&rewritten, "<="), 0);

        let a = continuation(&rewritten.expressions[0]);
        let c = continuation(&a.expressions[1]);
        let e = continuation(&c.expressions[1]);
        assert_eq!(
            [a.id, c.id, e.id],
            [ScopeId(1), ScopeId(2), ScopeId(3)]
        );
        assert_eq!([a.depth, c.depth, e.depth], [1, 2, 3]);
        assert_eq!(
            [a.parent, c.parent, e.parent],
            [Some(ScopeId(0)), Some(ScopeId(1)), Some(ScopeId(2))]
        );
        assert_eq!(e.kind, ScopeKind::Block);
        assert_eq!(e.locals, vec![Local::new("e", LocalKind::PlainArgument)]);
        let Node::Call(sum) = &e.expressions[0] else {
            panic!("expected a call");
        };
        assert_eq!(
            sum.receiver(),
            Some(&Node::LocalRead(Variable {
                scope: e.id,
                index: 0,
                name: Symbol::new("e"),
            }))
        );
    }

    #[test]
    fn test_single_bind_is_terminal() {
        let mut top = top_with_locals(&[]);
        top.expressions = vec![bind(name("v"), name("fetch")), name("v")];
        let rewritten = run(top);
        assert_eq!(
            unparse(&rewritten),
            unindent(
                r#"
                fetch.within do |v|
                  v
                end"#
            )
        );
        assert_eq!(count_calls(&rewritten, "and_then"), 0);
        assert_eq!(count_calls(&rewritten, "within"), 1);
    }

    #[test]
    fn test_statements_before_the_first_bind_stay_put() {
        let mut top = top_with_locals(&[]);
        top.expressions = vec![
            Node::fcall("puts", vec![name("x")]),
            bind(name("x"), name("get")),
            Node::fcall("puts", vec![name("x")]),
        ];
        let rewritten = run(top);
        assert_eq!(
            unparse(&rewritten),
            unindent(
                r#"
                puts(x)
                get.within do |x|
                  puts(x)
                end"#
            )
        );
        // Only the use inside the continuation refers to the parameter.
        assert_eq!(rewritten.expressions[0], Node::fcall("puts", vec![name("x")]));
        let body = continuation(&rewritten.expressions[1]);
        assert_eq!(
            body.expressions[0],
            Node::fcall("puts", vec![Node::LocalRead(body.variable(0).unwrap())])
        );
    }

    #[test]
    fn test_shadowing_reaches_nested_blocks() {
        let mut top = top_with_locals(&[]);
        let mut block = Scope::new(ScopeId(1), ScopeKind::Block, Some(&top));
        block.locals = vec![Local::new("y", LocalKind::PlainArgument)];
        block.expressions = vec![Node::send(
            "+",
            Node::LocalRead(block.variable(0).unwrap()),
            vec![name("x")],
        )];
        top.expressions = vec![
            bind(name("x"), name("get")),
            Node::Call(Call {
                method: Symbol::new("map"),
                args: vec![name("items")],
                block: Some(Box::new(block)),
                private: false,
                line: None,
            }),
        ];
        let rewritten = run(top);
        assert_eq!(
            unparse(&rewritten),
            unindent(
                r#"
                get.within do |x|
                  items.map do |y|
                    y + x
                  end
                end"#
            )
        );
        let outer = continuation(&rewritten.expressions[0]);
        assert_eq!(outer.id, ScopeId(2));
        let inner = continuation(&outer.expressions[0]);
        assert_eq!(inner.parent, Some(outer.id));
        assert_eq!(inner.depth, 2);
        let Node::Call(sum) = &inner.expressions[0] else {
            panic!("expected a call");
        };
        assert_eq!(sum.args[1], Node::LocalRead(outer.variable(0).unwrap()));
    }

    #[test]
    fn test_rebinding_a_bound_name() {
        // a <= first; a <= second(a); a
        let mut top = top_with_locals(&[]);
        top.expressions = vec![
            bind(name("a"), name("first")),
            bind(name("a"), Node::fcall("second", vec![name("a")])),
            name("a"),
        ];
        let rewritten = run(top);
        assert_eq!(
            unparse(&rewritten),
            unindent(
                r#"
                first.and_then do |a|
                  second(a).within do |a|
                    a
                  end
                end"#
            )
        );
        let outer = continuation(&rewritten.expressions[0]);
        let Node::Call(second) = &outer.expressions[0] else {
            panic!("expected a call");
        };
        // The effect runs before the rebind, so it still sees the outer `a`.
        assert_eq!(
            second.args[0],
            Node::fcall("second", vec![Node::LocalRead(outer.variable(0).unwrap())])
        );
        let inner = continuation(&outer.expressions[0]);
        assert_eq!(
            inner.expressions,
            vec![Node::LocalRead(inner.variable(0).unwrap())]
        );
    }

    #[test]
    fn test_plain_local_on_the_left_is_not_a_bind() {
        // x = 1; x <= 2; foo
        let mut top = top_with_locals(&["x"]);
        let x = top.variable(0).unwrap();
        top.expressions = vec![
            Node::assign(x.clone(), Node::int(1)),
            bind(Node::LocalRead(x), Node::int(2)),
            name("foo"),
        ];
        let mut sink = CollectingSink::default();
        let err = rewrite(top, &RewriteOptions::default(), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::UnresolvedMarker { ref reason, .. } if reason.contains("`x`")
        ));
        assert!(sink.diagnostics.is_empty());
    }

    #[test]
    fn test_no_binds_is_identity() {
        let mut top = top_with_locals(&["a"]);
        let a = top.variable(0).unwrap();
        let mut block = Scope::new(ScopeId(1), ScopeKind::Block, Some(&top));
        block.locals = vec![Local::new("x", LocalKind::PlainArgument)];
        // Binds inside an existing block, or nested in an expression, are not statements of `top`.
        block.expressions = vec![bind(name("y"), name("f")), name("y")];
        top.expressions = vec![
            Node::assign(a.clone(), Node::int(1)),
            Node::fcall("puts", vec![bind(name("p"), name("q"))]),
            Node::Call(Call {
                method: Symbol::new("each"),
                args: vec![Node::LocalRead(a)],
                block: Some(Box::new(block)),
                private: false,
                line: Some(3),
            }),
        ];
        let mut sink = CollectingSink::default();
        let rewritten = rewrite(top.clone(), &RewriteOptions::default(), &mut sink).unwrap();
        assert_eq!(rewritten, top);
        assert!(sink.diagnostics.is_empty());
    }

    #[test]
    fn test_configured_method_names() {
        let options = RewriteOptions {
            bind_operator: "<<".to_string(),
            chain_method: "flat_map".to_string(),
            terminal_method: "map".to_string(),
        };
        let mut top = top_with_locals(&[]);
        top.expressions = vec![
            Node::send("<<", name("a"), vec![name("f")]),
            Node::send("<<", name("b"), vec![name("g")]),
            bind(name("c"), name("h")),
        ];
        let rewritten = rewrite(top, &options, &mut NullSink).unwrap();
        assert_eq!(
            unparse(&rewritten),
            unindent(
                r#"
                f.flat_map do |a|
                  g.map do |b|
                    c <= h
                  end
                end"#
            )
        );
    }

    #[test]
    fn test_reports_each_rewrite_innermost_first() {
        let mut sink = CollectingSink::default();
        rewrite(three_binds(), &RewriteOptions::default(), &mut sink).unwrap();
        let rewritten: Vec<_> = sink
            .diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::MarkerRewritten {
                    bound, method, ..
                } => Some(format!("{bound}:{method}")),
                _ => None,
            })
            .collect();
        assert_eq!(rewritten, vec!["e:within", "c:and_then", "a:and_then"]);
    }

    #[test]
    fn test_unresolved_binds() {
        let mut trailing = top_with_locals(&[]);
        trailing.expressions = vec![name("setup"), bind(name("v"), name("fetch"))];
        let err = rewrite(trailing, &RewriteOptions::default(), &mut NullSink).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::UnresolvedMarker { ref operator, .. } if operator == "<="
        ));

        // The last of a chain with nothing after it.
        let mut nested = top_with_locals(&[]);
        nested.expressions = vec![
            bind(name("a"), name("f")),
            bind(name("b"), name("g")),
        ];
        assert!(rewrite(nested, &RewriteOptions::default(), &mut NullSink).is_err());

        let mut literal = top_with_locals(&[]);
        literal.expressions = vec![bind(Node::int(1), name("f")), name("g")];
        assert!(matches!(
            rewrite(literal, &RewriteOptions::default(), &mut NullSink),
            Err(RewriteError::UnresolvedMarker { .. })
        ));
    }
}
