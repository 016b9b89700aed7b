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

use crate::call::CallInfo;
use crate::error::IseqError;
use crate::iseq::InstructionSequence;
use crate::labels::Label;
use crate::symbol::Symbol;
use crate::value::Value;
use itertools::Itertools;
use serde_json::json;
use std::fmt::{Display, Formatter};

pub const PUTOBJECT_FIX0: &str = "putobject_OP_INT2FIX_O_0_C_";
pub const PUTOBJECT_FIX1: &str = "putobject_OP_INT2FIX_O_1_C_";
pub const GETLOCAL_LEVEL0: &str = "getlocal_OP__WC__0";
pub const GETLOCAL_LEVEL1: &str = "getlocal_OP__WC__1";
pub const SETLOCAL_LEVEL0: &str = "setlocal_OP__WC__0";
pub const SETLOCAL_LEVEL1: &str = "setlocal_OP__WC__1";

/// The typed subset of the host instruction set this system understands. Anything else decodes
/// as [`Instruction::Other`] and is carried through untouched, so that decoding never fails on
/// code that merely uses instructions we don't lift.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    /// Tracing event hook. No stack effect.
    Trace(u32),
    PutNil,
    PutSelf,
    PutObject(Value),
    PutObjectFix0,
    PutObjectFix1,
    PutString(String),
    NewArray(u32),
    DupArray(Vec<Value>),
    Dup,
    Pop,
    GetLocal {
        slot: u32,
        level: u32,
    },
    GetLocalLevel0(u32),
    GetLocalLevel1(u32),
    SetLocal {
        slot: u32,
        level: u32,
    },
    SetLocalLevel0(u32),
    SetLocalLevel1(u32),
    Send {
        call: CallInfo,
        block: Option<Box<InstructionSequence>>,
    },
    /// One of the specialized sends (`opt_plus`, `opt_send_simple`, ...). These behave exactly like
    /// a blockless `send` with the same call info.
    OptSend {
        opcode: Symbol,
        call: CallInfo,
    },
    BranchUnless(Label),
    BranchIf(Label),
    Jump(Label),
    Leave,
    Other {
        opcode: Symbol,
        operands: Vec<serde_json::Value>,
    },
}

/// One element of a code object's body stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    /// A line-number event; applies to the instructions that follow it.
    Line(u32),
    /// The position of a jump target.
    Label(Label),
    Instruction(Instruction),
}

struct Operands<'a> {
    opcode: &'a str,
    operands: &'a [serde_json::Value],
}

impl<'a> Operands<'a> {
    fn error(&self, reason: String) -> IseqError {
        IseqError::BadInstruction {
            opcode: self.opcode.to_string(),
            reason,
        }
    }

    fn get(&self, n: usize) -> Result<&'a serde_json::Value, IseqError> {
        self.operands
            .get(n)
            .ok_or_else(|| self.error(format!("missing operand #{n}")))
    }

    fn u32(&self, n: usize) -> Result<u32, IseqError> {
        self.get(n)?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.error(format!("operand #{n} is not a small unsigned integer")))
    }

    fn str(&self, n: usize) -> Result<&'a str, IseqError> {
        self.get(n)?
            .as_str()
            .ok_or_else(|| self.error(format!("operand #{n} is not a string")))
    }

    fn label(&self, n: usize) -> Result<Label, IseqError> {
        self.str(n).map(Label::from)
    }
}

impl Instruction {
    pub fn from_json(items: &[serde_json::Value]) -> Result<Self, IseqError> {
        let Some((head, operands)) = items.split_first() else {
            return Err(IseqError::BadElement("empty instruction".to_string()));
        };
        let Some(opcode) = head.as_str() else {
            return Err(IseqError::BadElement(format!(
                "instruction name is not a symbol: {head}"
            )));
        };
        let d = Operands { opcode, operands };
        let instruction = match opcode {
            "nop" => Instruction::Nop,
            "trace" => Instruction::Trace(d.u32(0)?),
            "putnil" => Instruction::PutNil,
            "putself" => Instruction::PutSelf,
            "putobject" => Instruction::PutObject(Value::from_json(d.get(0)?)?),
            PUTOBJECT_FIX0 => Instruction::PutObjectFix0,
            PUTOBJECT_FIX1 => Instruction::PutObjectFix1,
            "putstring" => Instruction::PutString(d.str(0)?.to_string()),
            "newarray" => Instruction::NewArray(d.u32(0)?),
            "duparray" => match Value::from_json(d.get(0)?)? {
                Value::Array(items) => Instruction::DupArray(items),
                other => {
                    return Err(d.error(format!("expected an array literal, found {other:?}")));
                }
            },
            "dup" => Instruction::Dup,
            "pop" => Instruction::Pop,
            "getlocal" => Instruction::GetLocal {
                slot: d.u32(0)?,
                level: d.u32(1)?,
            },
            GETLOCAL_LEVEL0 => Instruction::GetLocalLevel0(d.u32(0)?),
            GETLOCAL_LEVEL1 => Instruction::GetLocalLevel1(d.u32(0)?),
            "setlocal" => Instruction::SetLocal {
                slot: d.u32(0)?,
                level: d.u32(1)?,
            },
            SETLOCAL_LEVEL0 => Instruction::SetLocalLevel0(d.u32(0)?),
            SETLOCAL_LEVEL1 => Instruction::SetLocalLevel1(d.u32(0)?),
            "send" => {
                let (call, blockptr) = CallInfo::from_json(opcode, d.get(0)?)?;
                // Older hosts put the block in the call info; newer ones pass it as a trailing
                // operand.
                let block = blockptr.or_else(|| operands.iter().skip(1).find(|o| o.is_array()));
                let block = block
                    .map(|b| InstructionSequence::from_json(b).map(Box::new))
                    .transpose()?;
                Instruction::Send { call, block }
            }
            "branchunless" => Instruction::BranchUnless(d.label(0)?),
            "branchif" => Instruction::BranchIf(d.label(0)?),
            "jump" => Instruction::Jump(d.label(0)?),
            "leave" => Instruction::Leave,
            op if op.starts_with("opt_")
                && operands.first().is_some_and(|o| o.get("mid").is_some()) =>
            {
                match CallInfo::from_json(op, &operands[0])? {
                    (call, None) => Instruction::OptSend {
                        opcode: Symbol::new(op),
                        call,
                    },
                    // Specialized sends don't take blocks; keep this one opaque.
                    (_, Some(_)) => Instruction::Other {
                        opcode: Symbol::new(op),
                        operands: operands.to_vec(),
                    },
                }
            }
            op => Instruction::Other {
                opcode: Symbol::new(op),
                operands: operands.to_vec(),
            },
        };
        Ok(instruction)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut items = vec![json!(self.opcode())];
        match self {
            Instruction::Nop
            | Instruction::PutNil
            | Instruction::PutSelf
            | Instruction::PutObjectFix0
            | Instruction::PutObjectFix1
            | Instruction::Dup
            | Instruction::Pop
            | Instruction::Leave => {}
            Instruction::Trace(events) => items.push(json!(events)),
            Instruction::PutObject(v) => items.push(v.to_json()),
            Instruction::PutString(s) => items.push(json!(s)),
            Instruction::NewArray(n) => items.push(json!(n)),
            Instruction::DupArray(values) => {
                items.push(serde_json::Value::Array(
                    values.iter().map(Value::to_json).collect(),
                ));
            }
            Instruction::GetLocal { slot, level } | Instruction::SetLocal { slot, level } => {
                items.push(json!(slot));
                items.push(json!(level));
            }
            Instruction::GetLocalLevel0(slot)
            | Instruction::GetLocalLevel1(slot)
            | Instruction::SetLocalLevel0(slot)
            | Instruction::SetLocalLevel1(slot) => items.push(json!(slot)),
            Instruction::Send { call, block } => {
                let blockptr = block
                    .as_ref()
                    .map(|b| b.to_json())
                    .unwrap_or(serde_json::Value::Null);
                items.push(call.to_json(blockptr));
            }
            Instruction::OptSend { call, .. } => items.push(call.to_json(serde_json::Value::Null)),
            Instruction::BranchUnless(l) | Instruction::BranchIf(l) | Instruction::Jump(l) => {
                items.push(json!(l.name()));
            }
            Instruction::Other { operands, .. } => items.extend(operands.iter().cloned()),
        }
        serde_json::Value::Array(items)
    }

    pub fn opcode(&self) -> &str {
        match self {
            Instruction::Nop => "nop",
            Instruction::Trace(_) => "trace",
            Instruction::PutNil => "putnil",
            Instruction::PutSelf => "putself",
            Instruction::PutObject(_) => "putobject",
            Instruction::PutObjectFix0 => PUTOBJECT_FIX0,
            Instruction::PutObjectFix1 => PUTOBJECT_FIX1,
            Instruction::PutString(_) => "putstring",
            Instruction::NewArray(_) => "newarray",
            Instruction::DupArray(_) => "duparray",
            Instruction::Dup => "dup",
            Instruction::Pop => "pop",
            Instruction::GetLocal { .. } => "getlocal",
            Instruction::GetLocalLevel0(_) => GETLOCAL_LEVEL0,
            Instruction::GetLocalLevel1(_) => GETLOCAL_LEVEL1,
            Instruction::SetLocal { .. } => "setlocal",
            Instruction::SetLocalLevel0(_) => SETLOCAL_LEVEL0,
            Instruction::SetLocalLevel1(_) => SETLOCAL_LEVEL1,
            Instruction::Send { .. } => "send",
            Instruction::OptSend { opcode, .. } => opcode.as_str(),
            Instruction::BranchUnless(_) => "branchunless",
            Instruction::BranchIf(_) => "branchif",
            Instruction::Jump(_) => "jump",
            Instruction::Leave => "leave",
            Instruction::Other { opcode, .. } => opcode.as_str(),
        }
    }

    /// `(slot, level)` for local variable reads.
    pub fn local_read(&self) -> Option<(u32, u32)> {
        match self {
            Instruction::GetLocal { slot, level } => Some((*slot, *level)),
            Instruction::GetLocalLevel0(slot) => Some((*slot, 0)),
            Instruction::GetLocalLevel1(slot) => Some((*slot, 1)),
            _ => None,
        }
    }

    /// `(slot, level)` for local variable writes.
    pub fn local_write(&self) -> Option<(u32, u32)> {
        match self {
            Instruction::SetLocal { slot, level } => Some((*slot, *level)),
            Instruction::SetLocalLevel0(slot) => Some((*slot, 0)),
            Instruction::SetLocalLevel1(slot) => Some((*slot, 1)),
            _ => None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode())?;
        match self {
            Instruction::Trace(events) => write!(f, " {events}"),
            Instruction::PutObject(v) => write!(f, " {}", v.to_literal()),
            Instruction::PutString(s) => write!(f, " {s:?}"),
            Instruction::NewArray(n) => write!(f, " {n}"),
            Instruction::DupArray(values) => {
                write!(f, " [{}]", values.iter().map(Value::to_literal).join(", "))
            }
            Instruction::GetLocal { slot, level } | Instruction::SetLocal { slot, level } => {
                write!(f, " {slot}, {level}")
            }
            Instruction::GetLocalLevel0(slot)
            | Instruction::GetLocalLevel1(slot)
            | Instruction::SetLocalLevel0(slot)
            | Instruction::SetLocalLevel1(slot) => write!(f, " {slot}"),
            Instruction::Send { call, block } => {
                write!(f, " <callinfo!mid:{}, argc:{}", call.mid, call.argc)?;
                if call.is_private() {
                    write!(f, ", FCALL")?;
                }
                write!(f, ">")?;
                if block.is_some() {
                    write!(f, ", block")?;
                }
                Ok(())
            }
            Instruction::OptSend { call, .. } => {
                write!(f, " <callinfo!mid:{}, argc:{}>", call.mid, call.argc)
            }
            Instruction::BranchUnless(l) | Instruction::BranchIf(l) | Instruction::Jump(l) => {
                write!(f, " {l}")
            }
            Instruction::Other { operands, .. } => {
                for (i, o) in operands.iter().enumerate() {
                    write!(f, "{}{o}", if i == 0 { " " } else { ", " })?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Element {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, IseqError> {
        match json {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Element::Line)
                .ok_or_else(|| IseqError::BadElement(format!("bad line number {n}"))),
            serde_json::Value::String(label) => Ok(Element::Label(Label::from(label.as_str()))),
            serde_json::Value::Array(items) => Instruction::from_json(items).map(Element::Instruction),
            other => Err(IseqError::BadElement(other.to_string())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Element::Line(n) => json!(n),
            Element::Label(l) => json!(l.name()),
            Element::Instruction(i) => i.to_json(),
        }
    }
}

impl From<Instruction> for Element {
    fn from(value: Instruction) -> Self {
        Element::Instruction(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Element, Instruction};
    use crate::call::CallFlag;
    use crate::labels::Label;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn decode_simple_instructions() {
        assert_eq!(
            Element::from_json(&json!(["putobject", 4])).unwrap(),
            Element::Instruction(Instruction::PutObject(Value::Integer(4)))
        );
        assert_eq!(
            Element::from_json(&json!(["getlocal_OP__WC__1", 3])).unwrap(),
            Element::Instruction(Instruction::GetLocalLevel1(3))
        );
        assert_eq!(
            Element::from_json(&json!(["branchunless", "label_9"])).unwrap(),
            Element::Instruction(Instruction::BranchUnless(Label::from("label_9")))
        );
        assert_eq!(Element::from_json(&json!(3)).unwrap(), Element::Line(3));
        assert_eq!(
            Element::from_json(&json!("label_2")).unwrap(),
            Element::Label(Label::numbered(2))
        );
    }

    #[test]
    fn specialized_sends_decode_as_calls() {
        let Element::Instruction(Instruction::OptSend { opcode, call }) = Element::from_json(
            &json!(["opt_le", {"mid": "<=", "flag": 256, "orig_argc": 1, "blockptr": null}]),
        )
        .unwrap() else {
            panic!("expected an opt send");
        };
        assert_eq!(opcode, "opt_le");
        assert_eq!(call.mid, "<=");
        assert_eq!(call.argc, 1);
        assert!(call.flags.contains(CallFlag::ArgsSimple));
    }

    #[test]
    fn unknown_instructions_are_preserved() {
        let json = json!(["getinstancevariable", "@foo", 0]);
        let element = Element::from_json(&json).unwrap();
        let Element::Instruction(Instruction::Other { opcode, operands }) = &element else {
            panic!("expected an opaque instruction");
        };
        assert_eq!(*opcode, "getinstancevariable");
        assert_eq!(operands.len(), 2);
        assert_eq!(element.to_json(), json);
    }

    #[test]
    fn specialized_sends_with_blocks_stay_opaque() {
        let json = json!(["opt_plus", {"mid": "+", "flag": 256, "orig_argc": 1, "blockptr": []}]);
        let element = Element::from_json(&json).unwrap();
        let Element::Instruction(Instruction::Other { opcode, .. }) = &element else {
            panic!("expected an opaque instruction, got {element:?}");
        };
        assert_eq!(*opcode, "opt_plus");
        assert_eq!(element.to_json(), json);
    }

    #[test]
    fn malformed_instructions_are_rejected() {
        assert!(Element::from_json(&json!([])).is_err());
        assert!(Element::from_json(&json!(["getlocal", 3])).is_err());
        assert!(Element::from_json(&json!(["duparray", 3])).is_err());
        assert!(Element::from_json(&json!({"x": 1})).is_err());
    }

    #[test]
    fn instructions_display_like_a_disassembly() {
        assert_eq!(Instruction::GetLocal { slot: 2, level: 3 }.to_string(), "getlocal 2, 3");
        assert_eq!(
            Instruction::PutObject(Value::Integer(4)).to_string(),
            "putobject 4"
        );
        assert_eq!(Instruction::Jump(Label::numbered(4)).to_string(), "jump label_4");
    }
}
