//! # ALU Groups
//!
//! A group is the unit the hardware issues per cycle: up to four vector
//! lanes plus the trans lane (Cayman has no trans lane). The container only
//! holds membership and the read-port reservation; placement is decided by
//! [`Program::add_to_group`](crate::program::Program::add_to_group), which
//! needs the value arena.

use arrayvec::ArrayVec;

use crate::instr::InstrId;
use crate::readport::ReadPortReservation;
use crate::value::RegId;

/// Index of the trans lane
pub const TRANS_LANE: usize = 4;

/// Index of a group in the program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Arena slot
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bundle of instructions issued together
#[derive(Debug, Clone)]
pub struct AluGroup {
    pub(crate) lanes: [Option<InstrId>; 5],
    pub(crate) order: ArrayVec<InstrId, 5>,
    pub(crate) width: u8,
    pub(crate) readports: ReadPortReservation,
    pub(crate) last: Option<InstrId>,
    pub(crate) addr: Option<(RegId, bool)>,
    pub(crate) has_lds: bool,
}

impl AluGroup {
    /// Empty group with `width` lanes
    pub fn new(width: usize) -> Self {
        assert!(width == 4 || width == 5, "group width {}", width);
        Self {
            lanes: [None; 5],
            order: ArrayVec::new(),
            width: width as u8,
            readports: ReadPortReservation::new(),
            last: None,
            addr: None,
            has_lds: false,
        }
    }

    /// Number of lanes
    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Instruction in lane `lane`
    pub fn lane(&self, lane: usize) -> Option<InstrId> {
        self.lanes.get(lane).copied().flatten()
    }

    /// Lane of a member
    pub fn lane_of(&self, instr: InstrId) -> Option<usize> {
        self.lanes.iter().position(|&l| l == Some(instr))
    }

    /// Members in lane order
    pub fn members(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.lanes[..self.width()].iter().filter_map(|l| *l)
    }

    /// Members in insertion order
    pub fn insertion_order(&self) -> &[InstrId] {
        &self.order
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the group has no member
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether lane `lane` exists and is free
    pub fn lane_free(&self, lane: usize) -> bool {
        lane < self.width() && self.lanes[lane].is_none()
    }

    /// Member carrying the last-in-group flag
    pub fn last_instr(&self) -> Option<InstrId> {
        self.last
    }

    /// Indirect address register used by the group, and whether it is a
    /// buffer index
    pub fn indirect_addr(&self) -> Option<(RegId, bool)> {
        self.addr
    }

    /// Whether a member accesses the local data share
    pub fn has_lds_access(&self) -> bool {
        self.has_lds
    }

    /// Accumulated read-port usage
    pub fn readports(&self) -> &ReadPortReservation {
        &self.readports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_group() {
        let group = AluGroup::new(5);
        assert!(group.is_empty());
        assert!(group.lane_free(4));
        let cayman = AluGroup::new(4);
        assert!(!cayman.lane_free(TRANS_LANE));
        assert_eq!(cayman.members().count(), 0);
    }

    #[test]
    #[should_panic(expected = "group width")]
    fn test_invalid_width() {
        let _ = AluGroup::new(3);
    }
}
