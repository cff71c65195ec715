//! # Chip Generations
//!
//! The TeraScale family shares one ALU model with small per-generation
//! differences: Cayman dropped the transcendental lane, R600 only shifts on
//! the trans unit, and instruction bundles are four or five lanes wide.

use core::fmt;

/// Hardware generation of the shader core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipClass {
    /// R600 (HD 2000 / HD 3000)
    R600,
    /// R700 (HD 4000)
    R700,
    /// Evergreen (HD 5000 / HD 6000 non-VLIW4)
    Evergreen,
    /// Cayman (HD 6900, VLIW4)
    Cayman,
}

impl ChipClass {
    /// All generations, oldest first
    pub const ALL: [ChipClass; 4] = [
        ChipClass::R600,
        ChipClass::R700,
        ChipClass::Evergreen,
        ChipClass::Cayman,
    ];

    /// Whether bundles carry a fifth (transcendental) lane
    pub const fn has_trans_unit(self) -> bool {
        !matches!(self, ChipClass::Cayman)
    }

    /// Number of lanes in one instruction group
    pub const fn group_width(self) -> usize {
        if self.has_trans_unit() {
            5
        } else {
            4
        }
    }

    /// Table index, used for per-generation lookup tables
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ChipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipClass::R600 => "R600",
            ChipClass::R700 => "R700",
            ChipClass::Evergreen => "EVERGREEN",
            ChipClass::Cayman => "CAYMAN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_width() {
        assert_eq!(ChipClass::R600.group_width(), 5);
        assert_eq!(ChipClass::Evergreen.group_width(), 5);
        assert_eq!(ChipClass::Cayman.group_width(), 4);
        assert!(!ChipClass::Cayman.has_trans_unit());
    }

    #[test]
    fn test_index_order() {
        for (i, chip) in ChipClass::ALL.iter().enumerate() {
            assert_eq!(chip.index(), i);
        }
    }
}
