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

use rebind_iseq::FormatVersion;
use serde::{Deserialize, Serialize};

/// How local positions map to the slot numbers local access instructions carry.
///
/// Slots count down from the end of the locals table: the last declared local sits just past the
/// reserved environment slots, the first one furthest away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotLayout {
    /// Number of environment slots the host reserves below the locals (1 on 2.0/2.1 hosts).
    pub base_offset: u32,
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self { base_offset: 1 }
    }
}

impl SlotLayout {
    pub fn slot(&self, local_count: usize, position: usize) -> u32 {
        (local_count - position) as u32 + self.base_offset
    }

    /// Inverse of [`SlotLayout::slot`], or `None` if `slot` addresses no local.
    pub fn position(&self, local_count: usize, slot: u32) -> Option<usize> {
        let top = local_count as u32 + self.base_offset;
        let position = top.checked_sub(slot)? as usize;
        (position < local_count).then_some(position)
    }

    pub fn local_size(&self, local_count: usize) -> u32 {
        local_count as u32 + self.base_offset
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiftOptions {
    pub slots: SlotLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    /// The two-operand method marking a bind: `name <= effect`.
    pub bind_operator: String,
    /// Continuation method used while more binds follow.
    pub chain_method: String,
    /// Continuation method used for the last bind of a chain.
    pub terminal_method: String,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            bind_operator: "<=".to_string(),
            chain_method: "and_then".to_string(),
            terminal_method: "within".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    pub slots: SlotLayout,
    /// Format version written into the header. When unset, `Pipeline::run` carries over the
    /// input's and a bare `lower` writes the default.
    pub version: Option<FormatVersion>,
    /// Label of the outermost code object; blocks are labelled `block in <root_label>`.
    pub root_label: String,
    pub path: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            slots: SlotLayout::default(),
            version: None,
            root_label: "<compiled>".to_string(),
            path: "<compiled>".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub lift: LiftOptions,
    pub rewrite: RewriteOptions,
    pub codegen: CodegenOptions,
    /// When false the lifted tree is lowered as is.
    pub rewrite_enabled: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            lift: LiftOptions::default(),
            rewrite: RewriteOptions::default(),
            codegen: CodegenOptions::default(),
            rewrite_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineOptions, SlotLayout};

    #[test]
    fn slots_count_down_from_the_end() {
        let layout = SlotLayout::default();
        // locals [a, b, c]
        assert_eq!(layout.slot(3, 0), 4);
        assert_eq!(layout.slot(3, 2), 2);
        assert_eq!(layout.local_size(3), 4);
        for position in 0..3 {
            assert_eq!(layout.position(3, layout.slot(3, position)), Some(position));
        }
        assert_eq!(layout.position(3, 1), None);
        assert_eq!(layout.position(3, 5), None);
        assert_eq!(layout.position(0, 1), None);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let options: PipelineOptions =
            serde_json::from_str(r#"{"rewrite": {"bind_operator": "<<"}}"#).unwrap();
        assert_eq!(options.rewrite.bind_operator, "<<");
        assert_eq!(options.rewrite.chain_method, "and_then");
        assert!(options.rewrite_enabled);
        assert_eq!(options.lift.slots.base_offset, 1);
    }
}
