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

use crate::error::IseqError;
use crate::symbol::Symbol;
use itertools::Itertools;
use serde_json::Number;

/// A literal operand, as carried by the push instructions.
///
/// JSON does not distinguish the host's symbols from its strings. Bare strings in `putobject` and
/// `duparray` operands are always symbols (string literals are pushed with `putstring`, which
/// decodes its operand as [`Value::String`] explicitly).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Symbol(Symbol),
    String(String),
    /// A frozen array literal.
    Array(Vec<Value>),
}

impl Value {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, IseqError> {
        match json {
            serde_json::Value::Null => Ok(Value::Nil),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if n.is_u64() {
                    Err(IseqError::BadLiteral(format!(
                        "integer {n} does not fit in 64 bits"
                    )))
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| IseqError::BadLiteral(n.to_string()))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Symbol(Symbol::from(s.as_str()))),
            serde_json::Value::Array(items) => Ok(Value::Array(
                items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(_) => Err(IseqError::BadLiteral(json.to_string())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number(Number::from(*i)),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Symbol(s) => serde_json::Value::String(s.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Render as a host-language literal.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Symbol(s) => format!(":{s}"),
            Value::String(s) => format!("{s:?}"),
            Value::Array(items) => format!("[{}]", items.iter().map(Value::to_literal).join(", ")),
        }
    }
}
