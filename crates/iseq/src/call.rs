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

use crate::bitenum::BitEnum;
use crate::error::IseqError;
use crate::symbol::Symbol;
use enum_primitive_derive::Primitive;
use serde_json::{Map, json};

/// Call-site flag bits, numbered the way the 2.1 host numbers them.
#[derive(Debug, Ord, PartialOrd, Copy, Clone, Eq, PartialEq, Hash, Primitive)]
#[repr(u8)]
pub enum CallFlag {
    ArgsSplat = 0,
    ArgsBlockArg = 1,
    /// Receiver-less ("function style") call; may reach private methods.
    FCall = 2,
    /// A bare identifier that could have been a local variable read.
    VCall = 3,
    TailCall = 4,
    Super = 5,
    OptSend = 6,
    ArgsSkip = 7,
    ArgsSimple = 8,
}

pub type CallFlags = BitEnum<CallFlag>;

/// The call-info operand of `send` and the specialized `opt_*` sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallInfo {
    pub mid: Symbol,
    pub flags: CallFlags,
    /// Argument count, not including the receiver or a block.
    pub argc: u32,
}

impl CallInfo {
    pub fn new(mid: &str, argc: u32, flags: CallFlags) -> Self {
        Self {
            mid: Symbol::new(mid),
            flags,
            argc,
        }
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(CallFlag::FCall)
    }

    /// Decode a `{mid, flag, orig_argc, blockptr}` object. Returns the `blockptr` value as well when
    /// it is present and not null.
    pub(crate) fn from_json<'a>(
        opcode: &str,
        json: &'a serde_json::Value,
    ) -> Result<(Self, Option<&'a serde_json::Value>), IseqError> {
        let bad = |reason: &str| IseqError::BadInstruction {
            opcode: opcode.to_string(),
            reason: reason.to_string(),
        };
        let serde_json::Value::Object(fields) = json else {
            return Err(bad("call info operand is not an object"));
        };
        let mid = fields
            .get("mid")
            .and_then(|m| m.as_str())
            .ok_or_else(|| bad("call info has no method id"))?;
        let flag = fields.get("flag").and_then(|f| f.as_u64()).unwrap_or(0);
        let flag = u16::try_from(flag).map_err(|_| bad("call flags out of range"))?;
        let argc = fields
            .get("orig_argc")
            .and_then(|a| a.as_u64())
            .ok_or_else(|| bad("call info has no argument count"))?;
        let argc = u32::try_from(argc).map_err(|_| bad("argument count out of range"))?;
        let blockptr = fields.get("blockptr").filter(|b| !b.is_null());
        Ok((
            CallInfo {
                mid: Symbol::new(mid),
                flags: CallFlags::from_u16(flag),
                argc,
            },
            blockptr,
        ))
    }

    pub(crate) fn to_json(&self, blockptr: serde_json::Value) -> serde_json::Value {
        let mut fields = Map::new();
        fields.insert("mid".to_string(), json!(self.mid.as_str()));
        fields.insert("flag".to_string(), json!(self.flags.to_u16()));
        fields.insert("orig_argc".to_string(), json!(self.argc));
        fields.insert("blockptr".to_string(), blockptr);
        serde_json::Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::{CallFlag, CallFlags, CallInfo};
    use serde_json::json;

    #[test]
    fn vcall_flags_decode() {
        // 12 == fcall | vcall, which is what the host emits for a bare identifier.
        let raw = json!({"mid": "a", "flag": 12, "orig_argc": 0, "blockptr": null});
        let (ci, block) = CallInfo::from_json("send", &raw).unwrap();
        assert!(block.is_none());
        assert!(ci.is_private());
        assert!(ci.flags.contains(CallFlag::VCall));
        assert!(!ci.flags.contains(CallFlag::ArgsSplat));
        assert_eq!(ci.argc, 0);
        assert_eq!(ci.mid, "a");
    }

    #[test]
    fn flags_encode_as_bits() {
        let flags = CallFlags::new_with(CallFlag::FCall) | CallFlag::ArgsSimple;
        assert_eq!(flags.to_u16(), 0x104);
        let ci = CallInfo::new("puts", 1, flags);
        assert_eq!(
            ci.to_json(json!(null)),
            json!({"mid": "puts", "flag": 260, "orig_argc": 1, "blockptr": null})
        );
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(CallInfo::from_json("send", &json!({"flag": 0})).is_err());
        assert!(CallInfo::from_json("send", &json!([1, 2])).is_err());
    }
}
