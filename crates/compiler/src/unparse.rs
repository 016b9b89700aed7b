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

use crate::ast::{Call, LocalKind, Node, Scope};
use itertools::Itertools;

const INDENT_LEVEL: usize = 2;

const BINARY_OPERATORS: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "==", "!=", "<", "<=", ">", ">=", "<=>", "===", "=~", "<<",
    ">>", "&", "|", "^",
];

/// Renders trees as host-language-like source text. Only used for display; the output is not
/// meant to be fed back to anything.
struct Unparse;

impl Unparse {
    fn is_binary(call: &Call) -> bool {
        call.args.len() == 2
            && call.block.is_none()
            && !call.private
            && BINARY_OPERATORS.contains(&call.method.as_str())
    }

    fn operand(&self, node: &Node, indent: usize) -> String {
        let text = self.unparse_expr(node, indent);
        match node {
            Node::Call(call) if Self::is_binary(call) => format!("({text})"),
            Node::Assignment(..) | Node::Conditional { .. } => format!("({text})"),
            _ => text,
        }
    }

    fn unparse_args(&self, args: &[Node], indent: usize) -> String {
        args.iter().map(|a| self.unparse_expr(a, indent)).join(", ")
    }

    fn unparse_call(&self, call: &Call, indent: usize) -> String {
        let method = call.method.as_str();
        let mut text = match call.args.as_slice() {
            [lhs, rhs] if Self::is_binary(call) => {
                format!(
                    "{} {method} {}",
                    self.operand(lhs, indent),
                    self.operand(rhs, indent)
                )
            }
            [receiver] if method == "!" && call.block.is_none() => {
                format!("!{}", self.operand(receiver, indent))
            }
            [receiver, index @ ..] if method == "[]" && call.block.is_none() => {
                format!(
                    "{}[{}]",
                    self.operand(receiver, indent),
                    self.unparse_args(index, indent)
                )
            }
            [Node::SelfReference, args @ ..] if call.private => {
                if args.is_empty() {
                    method.to_string()
                } else {
                    format!("{method}({})", self.unparse_args(args, indent))
                }
            }
            [receiver, args @ ..] => {
                let receiver = self.operand(receiver, indent);
                if args.is_empty() {
                    format!("{receiver}.{method}")
                } else {
                    format!("{receiver}.{method}({})", self.unparse_args(args, indent))
                }
            }
            [] => method.to_string(),
        };
        if let Some(block) = &call.block {
            text.push_str(" do");
            let params = block
                .locals
                .iter()
                .filter(|l| l.kind.is_argument())
                .map(|l| match l.kind {
                    LocalKind::VariadicArgument => format!("*{}", l.name),
                    _ => l.name.to_string(),
                })
                .join(", ");
            if !params.is_empty() {
                text.push_str(&format!(" |{params}|"));
            }
            for line in self.unparse_stmts(&block.expressions, indent + INDENT_LEVEL) {
                text.push('\n');
                text.push_str(&line);
            }
            text.push_str(&format!("\n{:indent$}end", ""));
        }
        text
    }

    fn unparse_expr(&self, node: &Node, indent: usize) -> String {
        match node {
            Node::Literal(value) => value.to_literal(),
            Node::ArrayLiteral(items) => format!("[{}]", self.unparse_args(items, indent)),
            Node::SelfReference => "self".to_string(),
            Node::LocalRead(variable) => variable.name.to_string(),
            Node::Assignment(variable, value) => {
                format!("{} = {}", variable.name, self.unparse_expr(value, indent))
            }
            Node::Call(call) => self.unparse_call(call, indent),
            Node::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let mut text = format!("if {}", self.unparse_expr(test, indent));
                for line in self.unparse_stmts(consequent, indent + INDENT_LEVEL) {
                    text.push('\n');
                    text.push_str(&line);
                }
                if !alternate.is_empty() {
                    text.push_str(&format!("\n{:indent$}else", ""));
                    for line in self.unparse_stmts(alternate, indent + INDENT_LEVEL) {
                        text.push('\n');
                        text.push_str(&line);
                    }
                }
                text.push_str(&format!("\n{:indent$}end", ""));
                text
            }
        }
    }

    fn unparse_stmts(&self, nodes: &[Node], indent: usize) -> Vec<String> {
        nodes
            .iter()
            .map(|n| format!("{:indent$}{}", "", self.unparse_expr(n, indent)))
            .collect()
    }
}

/// The body of `scope` as source text, one statement per line.
pub fn unparse(scope: &Scope) -> String {
    Unparse.unparse_stmts(&scope.expressions, 0).join("\n")
}
