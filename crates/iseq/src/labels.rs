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

use crate::symbol::Symbol;
use std::fmt::{Display, Formatter};

/// A Label names a jump target inside a single code object's body. Labels appear in the body
/// stream as bare symbols (`label_12`) at the position they mark, and as operands of branch
/// instructions.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub Symbol);

impl Label {
    /// The label naming convention the host uses for compiler-generated labels.
    pub fn numbered(n: usize) -> Self {
        Label(Symbol::from(format!("label_{n}")))
    }

    pub fn name(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Label(Symbol::new(value))
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::Label;

    #[test]
    fn numbered_labels_follow_host_convention() {
        assert_eq!(Label::numbered(7).name(), "label_7");
        assert_eq!(Label::numbered(7), Label::from("label_7"));
        assert_ne!(Label::numbered(7), Label::numbered(8));
    }
}
