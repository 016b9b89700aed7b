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

//! The instruction sequence ("iseq") container: header, locals table, argument shape, catch table
//! and body, in the host's `SimpleDataFormat` array layout.

use crate::error::IseqError;
use crate::labels::Label;
use crate::opcode::{Element, Instruction};
use crate::symbol::Symbol;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

pub const MAGIC: &str = "YARVInstructionSequence/SimpleDataFormat";

const ISEQ_ARITY: usize = 14;
const PARAMS_ARITY: usize = 7;
const CATCH_ARITY: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
    pub format_type: u32,
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self {
            major: 2,
            minor: 1,
            format_type: 1,
        }
    }
}

/// Sizing information the host's loader uses to allocate frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Misc {
    /// Number of argument locals.
    pub arg_size: u32,
    /// Locals plus the environment slots the frame reserves.
    pub local_size: u32,
    /// Maximum operand stack depth reached by the body.
    pub stack_max: u32,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum IseqType {
    Top,
    Method,
    Block,
    Class,
    Rescue,
    Ensure,
    Eval,
    Main,
    DefinedGuard,
}

/// Argument shape of a code object.
///
/// On the wire a "simple" shape (leading arguments only) is just the leading count; anything
/// else is the 7-element array `[lead, optional_labels, post_len, post_start, rest, block, simple]`
/// with `-1` marking an absent rest or block argument.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgShape {
    pub lead: u32,
    /// Entry labels for each optional argument's default-value code.
    pub optional: Vec<Label>,
    pub post: u32,
    pub post_start: u32,
    /// Local position of the `*rest` argument.
    pub rest: Option<u32>,
    /// Local position of the `&block` argument.
    pub block: Option<u32>,
}

impl ArgShape {
    pub fn simple(lead: u32) -> Self {
        Self {
            lead,
            ..Default::default()
        }
    }

    pub fn is_simple(&self) -> bool {
        self.optional.is_empty() && self.post == 0 && self.rest.is_none() && self.block.is_none()
    }

    fn from_json(json: &serde_json::Value) -> Result<Self, IseqError> {
        let bad = |reason: String| IseqError::BadHeader {
            field: "params",
            reason,
        };
        if let Some(lead) = json.as_u64() {
            let lead = u32::try_from(lead).map_err(|_| bad(format!("{lead} out of range")))?;
            return Ok(Self::simple(lead));
        }
        let Some(items) = json.as_array().filter(|items| items.len() == PARAMS_ARITY) else {
            return Err(bad(format!("unrecognized argument shape {json}")));
        };
        let count = |n: usize| {
            items[n]
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| bad(format!("element #{n} is not a count: {}", items[n])))
        };
        let position = |n: usize| match items[n].as_i64() {
            Some(-1) => Ok(None),
            Some(v) if v >= 0 => Ok(u32::try_from(v).ok()),
            _ => Err(bad(format!("element #{n} is not a position: {}", items[n]))),
        };
        let optional = items[1]
            .as_array()
            .ok_or_else(|| bad("optional argument labels are not an array".to_string()))?
            .iter()
            .map(|l| {
                l.as_str()
                    .map(Label::from)
                    .ok_or_else(|| bad(format!("bad optional argument label {l}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            lead: count(0)?,
            optional,
            post: count(2)?,
            post_start: count(3)?,
            rest: position(4)?,
            block: position(5)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        if self.is_simple() {
            return json!(self.lead);
        }
        let position = |p: Option<u32>| p.map(i64::from).unwrap_or(-1);
        json!([
            self.lead,
            self.optional.iter().map(|l| l.name()).collect::<Vec<_>>(),
            self.post,
            self.post_start,
            position(self.rest),
            position(self.block),
            0
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CatchKind {
    Rescue,
    Ensure,
    Retry,
    Break,
    Redo,
    Next,
}

/// An exception/control-transfer handler covering `start..end`.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchEntry {
    pub kind: CatchKind,
    pub handler: Option<Box<InstructionSequence>>,
    pub start: Label,
    pub end: Label,
    pub cont: Label,
    pub sp: u32,
}

impl CatchEntry {
    fn from_json(json: &serde_json::Value) -> Result<Self, IseqError> {
        let Some(items) = json.as_array().filter(|items| items.len() == CATCH_ARITY) else {
            return Err(IseqError::BadCatchEntry(json.to_string()));
        };
        let label = |n: usize| {
            items[n]
                .as_str()
                .map(Label::from)
                .ok_or_else(|| IseqError::BadCatchEntry(format!("bad label {}", items[n])))
        };
        let kind: CatchKind = items[0]
            .as_str()
            .and_then(|k| k.parse().ok())
            .ok_or_else(|| IseqError::BadCatchEntry(format!("bad entry type {}", items[0])))?;
        let handler = match &items[1] {
            serde_json::Value::Null => None,
            h => Some(Box::new(InstructionSequence::from_json(h)?)),
        };
        let sp = items[5]
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| IseqError::BadCatchEntry(format!("bad stack pointer {}", items[5])))?;
        Ok(Self {
            kind,
            handler,
            start: label(2)?,
            end: label(3)?,
            cont: label(4)?,
            sp,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        let kind: &'static str = self.kind.into();
        json!([
            kind,
            self.handler
                .as_ref()
                .map(|h| h.to_json())
                .unwrap_or(serde_json::Value::Null),
            self.start.name(),
            self.end.name(),
            self.cont.name(),
            self.sp
        ])
    }
}

/// A compiled code object. Blocks passed to calls are nested code objects of type
/// [`IseqType::Block`], carried inside the `send` instruction that passes them.
#[derive(Clone, Debug, PartialEq)]
pub struct InstructionSequence {
    pub version: FormatVersion,
    pub misc: Misc,
    /// Human readable name, e.g. `<compiled>` or `block in <compiled>`.
    pub label: String,
    pub path: String,
    pub absolute_path: Option<String>,
    pub first_lineno: u32,
    pub kind: IseqType,
    /// Local variable names in declaration order, arguments first.
    pub locals: Vec<Symbol>,
    pub params: ArgShape,
    pub catch_table: Vec<CatchEntry>,
    pub body: Vec<Element>,
}

fn header_u32(json: &serde_json::Value, field: &'static str) -> Result<u32, IseqError> {
    json.as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| IseqError::BadHeader {
            field,
            reason: format!("expected an unsigned integer, found {json}"),
        })
}

fn header_str<'a>(json: &'a serde_json::Value, field: &'static str) -> Result<&'a str, IseqError> {
    json.as_str().ok_or_else(|| IseqError::BadHeader {
        field,
        reason: format!("expected a string, found {json}"),
    })
}

fn header_array<'a>(
    json: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a Vec<serde_json::Value>, IseqError> {
    json.as_array().ok_or_else(|| IseqError::BadHeader {
        field,
        reason: format!("expected an array, found {json}"),
    })
}

impl InstructionSequence {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, IseqError> {
        let Some(data) = json.as_array().filter(|data| data.len() == ISEQ_ARITY) else {
            let found = match json.as_array() {
                Some(data) => format!("{} elements", data.len()),
                None => json.to_string(),
            };
            return Err(IseqError::BadArity {
                expected: ISEQ_ARITY,
                found,
            });
        };
        match data[0].as_str() {
            Some(MAGIC) => {}
            _ => return Err(IseqError::BadMagic(data[0].to_string())),
        }
        let version = FormatVersion {
            major: header_u32(&data[1], "major_version")?,
            minor: header_u32(&data[2], "minor_version")?,
            format_type: header_u32(&data[3], "format_type")?,
        };
        let misc_field = |name: &'static str| match data[4].get(name) {
            Some(v) => header_u32(v, name),
            None => Err(IseqError::BadHeader {
                field: "misc",
                reason: format!("missing `{name}`"),
            }),
        };
        let misc = Misc {
            arg_size: misc_field("arg_size")?,
            local_size: misc_field("local_size")?,
            stack_max: misc_field("stack_max")?,
        };
        let absolute_path = match &data[7] {
            serde_json::Value::Null => None,
            p => Some(header_str(p, "absolute_path")?.to_string()),
        };
        let kind = header_str(&data[9], "type")?;
        let kind: IseqType = kind
            .parse()
            .map_err(|_| IseqError::UnknownType(kind.to_string()))?;
        let locals = header_array(&data[10], "locals")?
            .iter()
            .map(|l| header_str(l, "locals").map(Symbol::new))
            .collect::<Result<_, _>>()?;
        let catch_table = header_array(&data[12], "catch_table")?
            .iter()
            .map(CatchEntry::from_json)
            .collect::<Result<_, _>>()?;
        let body = header_array(&data[13], "body")?
            .iter()
            .map(Element::from_json)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            version,
            misc,
            label: header_str(&data[5], "label")?.to_string(),
            path: header_str(&data[6], "path")?.to_string(),
            absolute_path,
            first_lineno: header_u32(&data[8], "first_lineno")?,
            kind,
            locals,
            params: ArgShape::from_json(&data[11])?,
            catch_table,
            body,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let kind: &'static str = self.kind.into();
        json!([
            MAGIC,
            self.version.major,
            self.version.minor,
            self.version.format_type,
            {
                "arg_size": self.misc.arg_size,
                "local_size": self.misc.local_size,
                "stack_max": self.misc.stack_max
            },
            self.label,
            self.path,
            self.absolute_path,
            self.first_lineno,
            kind,
            self.locals.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
            self.params.to_json(),
            self.catch_table
                .iter()
                .map(CatchEntry::to_json)
                .collect::<Vec<_>>(),
            self.body.iter().map(Element::to_json).collect::<Vec<_>>()
        ])
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.body.iter().filter_map(|e| match e {
            Element::Instruction(i) => Some(i),
            _ => None,
        })
    }

    fn disassemble(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        writeln!(
            f,
            "{pad}== disasm: <{}@{}> ({}) locals: [{}] arg_size: {} local_size: {} stack_max: {}",
            self.label,
            self.path,
            self.kind,
            self.locals
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.misc.arg_size,
            self.misc.local_size,
            self.misc.stack_max,
        )?;
        let mut pc = 0;
        for element in &self.body {
            match element {
                Element::Line(n) => writeln!(f, "{pad}  # line {n}")?,
                Element::Label(l) => writeln!(f, "{pad}{l}:")?,
                Element::Instruction(i) => {
                    writeln!(f, "{pad}  {pc:04} {i}")?;
                    pc += 1;
                    if let Instruction::Send {
                        block: Some(block), ..
                    } = i
                    {
                        block.disassemble(f, indent + 4)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Display for InstructionSequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.disassemble(f, 0)
    }
}

impl Serialize for InstructionSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InstructionSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        InstructionSequence::from_json(&json).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{ArgShape, CatchKind, InstructionSequence, IseqType};
    use crate::labels::Label;
    use crate::opcode::{Element, Instruction};
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// `a = 1; if a then 2 else 3 end` as dumped by a 2.1 host.
    fn conditional_dump() -> serde_json::Value {
        json!([
            "YARVInstructionSequence/SimpleDataFormat", 2, 1, 1,
            {"arg_size": 0, "local_size": 2, "stack_max": 1},
            "<compiled>", "<compiled>", null, 1, "top",
            ["a"], 0,
            [["break", null, "label_0", "label_9", "label_9", 0]],
            [
                1,
                ["trace", 1],
                ["putobject_OP_INT2FIX_O_1_C_"],
                ["setlocal_OP__WC__0", 2],
                ["trace", 1],
                ["getlocal_OP__WC__0", 2],
                ["branchunless", "label_15"],
                ["putobject", 2],
                ["leave"],
                "label_15",
                ["putobject", 3],
                ["leave"]
            ]
        ])
    }

    #[test]
    fn decode_conditional_dump() {
        let iseq = InstructionSequence::from_json(&conditional_dump()).unwrap();
        assert_eq!(iseq.kind, IseqType::Top);
        assert_eq!(iseq.misc.local_size, 2);
        assert_eq!(iseq.locals.len(), 1);
        assert_eq!(iseq.locals[0], "a");
        assert_eq!(iseq.params, ArgShape::simple(0));
        assert_eq!(iseq.catch_table.len(), 1);
        assert_eq!(iseq.catch_table[0].kind, CatchKind::Break);
        assert_eq!(iseq.body[0], Element::Line(1));
        assert_eq!(
            iseq.body[6],
            Element::Instruction(Instruction::BranchUnless(Label::from("label_15")))
        );
        assert_eq!(
            iseq.body[7],
            Element::Instruction(Instruction::PutObject(Value::Integer(2)))
        );
        assert_eq!(iseq.instructions().count(), 10);
        assert_eq!(iseq.to_json(), conditional_dump());
    }

    #[test]
    fn nested_blocks_are_decoded() {
        let block = json!([
            "YARVInstructionSequence/SimpleDataFormat", 2, 1, 1,
            {"arg_size": 1, "local_size": 2, "stack_max": 1},
            "block in <compiled>", "<compiled>", null, 1, "block",
            ["x"], 1, [],
            [["getlocal_OP__WC__0", 2], ["leave"]]
        ]);
        let top = json!([
            "YARVInstructionSequence/SimpleDataFormat", 2, 1, 1,
            {"arg_size": 0, "local_size": 1, "stack_max": 1},
            "<compiled>", "<compiled>", null, 1, "top",
            [], 0, [],
            [
                ["putself"],
                ["send", {"mid": "m", "flag": 4, "orig_argc": 0, "blockptr": block}],
                ["leave"]
            ]
        ]);
        let iseq = InstructionSequence::from_json(&top).unwrap();
        let Element::Instruction(Instruction::Send {
            call,
            block: Some(block),
        }) = &iseq.body[1]
        else {
            panic!("expected a send with a block");
        };
        assert!(call.is_private());
        assert_eq!(block.kind, IseqType::Block);
        assert_eq!(block.label, "block in <compiled>");
        assert_eq!(block.params.lead, 1);
        assert_eq!(iseq.to_json(), top);
    }

    #[test]
    fn complex_argument_shapes() {
        let shape = ArgShape::from_json(&json!([1, ["label_1", "label_2"], 0, 0, 3, -1, 0])).unwrap();
        assert!(!shape.is_simple());
        assert_eq!(shape.lead, 1);
        assert_eq!(shape.optional.len(), 2);
        assert_eq!(shape.rest, Some(3));
        assert_eq!(shape.block, None);
        assert_eq!(
            shape.to_json(),
            json!([1, ["label_1", "label_2"], 0, 0, 3, -1, 0])
        );
    }

    #[test]
    fn serde_goes_through_the_array_form() {
        let iseq: InstructionSequence = serde_json::from_value(conditional_dump()).unwrap();
        assert_eq!(serde_json::to_value(&iseq).unwrap(), conditional_dump());
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(InstructionSequence::from_json(&json!([1, 2, 3])).is_err());
        let mut dump = conditional_dump();
        dump[0] = json!("SomethingElse");
        assert!(InstructionSequence::from_json(&dump).is_err());
        let mut dump = conditional_dump();
        dump[9] = json!("lambda");
        assert!(InstructionSequence::from_json(&dump).is_err());
    }

    #[test]
    fn display_lists_instructions() {
        let iseq = InstructionSequence::from_json(&conditional_dump()).unwrap();
        let listing = iseq.to_string();
        assert!(listing.contains("0008 putobject 3"));
        assert!(listing.contains("label_15:"));
    }
}
