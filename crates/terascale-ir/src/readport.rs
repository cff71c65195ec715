//! # Read Ports and Bank Swizzles
//!
//! A group fetches its GPR operands over three read cycles. In each cycle
//! every channel bank can deliver one register index, so two operands on the
//! same channel may only share a cycle if they are the same register. The
//! bank swizzle of a lane selects the cycle each of its sources is fetched
//! in. Constant-buffer reads share two kcache ports and a group carries at
//! most four literal dwords.
//!
//! Everything in this module is pure: a [`ReadPortReservation`] is an
//! accumulator that is copied, extended and either committed or dropped.

use arrayvec::ArrayVec;

use crate::instr::BankSwizzle;
use crate::pool::ValuePool;
use crate::value::Value;

/// Number of read cycles of a group
pub const READ_CYCLES: usize = 3;
/// Kcache read ports per group
pub const MAX_CONST_PORTS: usize = 2;
/// Literal dwords per group
pub const MAX_LITERALS: usize = 4;

// =============================================================================
// OPERANDS
// =============================================================================

/// Operand as seen by the read-port logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRead {
    /// General purpose register
    Gpr {
        /// Register index
        sel: u32,
        /// Channel bank
        chan: u8,
    },
    /// Constant-buffer element
    Const {
        /// Kcache bank
        bank: u16,
        /// Element index
        index: u32,
        /// Channel
        chan: u8,
    },
    /// Literal dword
    Literal(u32),
    /// Hardware inline constant
    Inline,
}

impl PortRead {
    /// Resolve an operand against the value arena
    pub fn of(pool: &ValuePool, value: &Value) -> PortRead {
        match value {
            Value::Register(id) => {
                let reg = pool.register(*id);
                PortRead::Gpr {
                    sel: reg.sel(),
                    chan: reg.chan(),
                }
            }
            Value::Uniform(u) => PortRead::Const {
                bank: u.bank,
                index: u.index,
                chan: u.chan,
            },
            Value::Literal(bits) => PortRead::Literal(*bits),
            Value::Inline(_) => PortRead::Inline,
        }
    }

    fn is_const(&self) -> bool {
        !matches!(self, PortRead::Gpr { .. })
    }
}

/// Operands of one lane of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneReads {
    /// Sources in order
    pub reads: ArrayVec<PortRead, 3>,
    /// Whether the lane is the trans lane
    pub trans: bool,
    /// Swizzle to try first
    pub preferred: Option<BankSwizzle>,
}

impl LaneReads {
    /// Vector lane reading `reads`
    pub fn vector(reads: &[PortRead]) -> Self {
        Self {
            reads: reads.iter().copied().collect(),
            trans: false,
            preferred: None,
        }
    }

    /// Trans lane reading `reads`
    pub fn trans(reads: &[PortRead]) -> Self {
        Self {
            trans: true,
            ..Self::vector(reads)
        }
    }

    fn candidates(&self) -> ArrayVec<BankSwizzle, 6> {
        let all: &[BankSwizzle] = if self.trans {
            &BankSwizzle::TRANS
        } else {
            &BankSwizzle::ALL
        };
        let mut out = ArrayVec::new();
        if let Some(p) = self.preferred.filter(|p| all.contains(p)) {
            out.push(p);
        }
        for &s in all {
            if Some(s) != self.preferred {
                out.push(s);
            }
        }
        out
    }
}

// =============================================================================
// RESERVATION
// =============================================================================

/// Accumulated read-port usage of a group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPortReservation {
    gpr: [[Option<u32>; 4]; READ_CYCLES],
    consts: ArrayVec<(u16, u32, u8), MAX_CONST_PORTS>,
    literals: ArrayVec<u32, MAX_LITERALS>,
}

impl ReadPortReservation {
    /// Empty reservation
    pub fn new() -> Self {
        Self::default()
    }

    /// Literal dwords reserved so far
    pub fn literals(&self) -> &[u32] {
        &self.literals
    }

    fn reserve_gpr(&mut self, sel: u32, chan: u8, cycle: usize) -> bool {
        let slot = &mut self.gpr[cycle][chan as usize];
        match slot {
            Some(held) => *held == sel,
            None => {
                *slot = Some(sel);
                true
            }
        }
    }

    fn reserve_const(&mut self, bank: u16, index: u32, chan: u8) -> bool {
        let key = (bank, index, chan >> 1);
        if self.consts.contains(&key) {
            return true;
        }
        self.consts.try_push(key).is_ok()
    }

    fn add_literal(&mut self, bits: u32) -> bool {
        if self.literals.contains(&bits) {
            return true;
        }
        self.literals.try_push(bits).is_ok()
    }

    fn reserve_non_gpr(&mut self, read: &PortRead) -> bool {
        match *read {
            PortRead::Const { bank, index, chan } => self.reserve_const(bank, index, chan),
            PortRead::Literal(bits) => self.add_literal(bits),
            PortRead::Inline | PortRead::Gpr { .. } => true,
        }
    }

    /// Reserve the sources of a vector lane fetched with `swizzle`
    ///
    /// The reservation is only updated on success.
    pub fn schedule_vec_src(&mut self, srcs: &[PortRead], swizzle: BankSwizzle) -> bool {
        let mut next = self.clone();
        for (i, src) in srcs.iter().enumerate() {
            let ok = match *src {
                PortRead::Gpr { sel, chan } => {
                    // same register as src0 shares its read
                    (i == 1 && srcs[0] == *src) || next.reserve_gpr(sel, chan, swizzle.vec_cycle(i))
                }
                _ => next.reserve_non_gpr(src),
            };
            if !ok {
                return false;
            }
        }
        *self = next;
        true
    }

    /// Reserve the sources of the trans lane fetched with `swizzle`
    ///
    /// Constant operands of the trans lane consume the first read cycles.
    pub fn schedule_trans_src(&mut self, srcs: &[PortRead], swizzle: BankSwizzle) -> bool {
        let mut next = self.clone();
        let mut const_count = 0;
        for src in srcs.iter().filter(|s| s.is_const()) {
            if const_count >= 2 || !next.reserve_non_gpr(src) {
                return false;
            }
            const_count += 1;
        }
        for (i, src) in srcs.iter().enumerate() {
            if let PortRead::Gpr { sel, chan } = *src {
                let Some(cycle) = swizzle.trans_cycle(i) else {
                    return false;
                };
                if cycle < const_count || !next.reserve_gpr(sel, chan, cycle) {
                    return false;
                }
            }
        }
        *self = next;
        true
    }

    /// Reserve a lane with the first swizzle that fits, returning it
    pub fn schedule_lane(&mut self, lane: &LaneReads) -> Option<BankSwizzle> {
        lane.candidates().into_iter().find(|&swz| {
            if lane.trans {
                self.schedule_trans_src(&lane.reads, swz)
            } else {
                self.schedule_vec_src(&lane.reads, swz)
            }
        })
    }
}

/// Find bank swizzles for all lanes of a group
///
/// Searches every combination of per-lane swizzles, trying each lane's
/// preferred swizzle first. Returns the reservation and the chosen swizzles
/// in lane order, or `None` when no combination fits.
pub fn find_bank_swizzles(
    lanes: &[LaneReads],
) -> Option<(ReadPortReservation, ArrayVec<BankSwizzle, 5>)> {
    fn search(
        lanes: &[LaneReads],
        reservation: &ReadPortReservation,
        chosen: &mut ArrayVec<BankSwizzle, 5>,
    ) -> Option<ReadPortReservation> {
        let Some((lane, rest)) = lanes.split_first() else {
            return Some(reservation.clone());
        };
        for swz in lane.candidates() {
            let mut next = reservation.clone();
            let ok = if lane.trans {
                next.schedule_trans_src(&lane.reads, swz)
            } else {
                next.schedule_vec_src(&lane.reads, swz)
            };
            if !ok {
                continue;
            }
            chosen.push(swz);
            if let Some(done) = search(rest, &next, chosen) {
                return Some(done);
            }
            chosen.pop();
        }
        None
    }

    assert!(lanes.len() <= 5, "a group has at most five lanes");
    let mut chosen = ArrayVec::new();
    let reservation = search(lanes, &ReadPortReservation::new(), &mut chosen)?;
    Some((reservation, chosen))
}

/// Whether the lanes of a single instruction can be fetched
///
/// Instructions with fewer than three sources in total never conflict.
pub fn instruction_fits(lanes: &[LaneReads]) -> bool {
    let total: usize = lanes.iter().map(|l| l.reads.len()).sum();
    total < 3 || find_bank_swizzles(lanes).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpr(sel: u32, chan: u8) -> PortRead {
        PortRead::Gpr { sel, chan }
    }

    #[test]
    fn test_three_distinct_same_chan_fit_one_lane() {
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[gpr(1, 0), gpr(2, 0), gpr(3, 0)], BankSwizzle::Vec012));
    }

    #[test]
    fn test_same_sel_in_same_cycle_is_shared() {
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[gpr(1, 0), gpr(2, 1)], BankSwizzle::Vec012));
        assert!(res.schedule_vec_src(&[gpr(1, 0), gpr(2, 1)], BankSwizzle::Vec012));
        assert!(!res.schedule_vec_src(&[gpr(5, 0)], BankSwizzle::Vec012));
        assert!(res.schedule_vec_src(&[gpr(5, 0)], BankSwizzle::Vec120));
    }

    #[test]
    fn test_src1_equal_to_src0_is_free() {
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[gpr(4, 2), gpr(4, 2), gpr(6, 2)], BankSwizzle::Vec012));
        assert_eq!(res.gpr[1][2], None);
    }

    #[test]
    fn test_failed_schedule_leaves_reservation() {
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[gpr(1, 0), gpr(2, 0), gpr(3, 0)], BankSwizzle::Vec012));
        let before = res.clone();
        assert!(!res.schedule_vec_src(&[gpr(7, 0), gpr(8, 1)], BankSwizzle::Vec012));
        assert_eq!(res, before);
    }

    #[test]
    fn test_literal_limit() {
        let mut res = ReadPortReservation::new();
        for bits in 0..4 {
            assert!(res.schedule_vec_src(&[PortRead::Literal(bits + 100)], BankSwizzle::Vec012));
        }
        assert!(res.schedule_vec_src(&[PortRead::Literal(101)], BankSwizzle::Vec012));
        assert!(!res.schedule_vec_src(&[PortRead::Literal(200)], BankSwizzle::Vec012));
    }

    #[test]
    fn test_const_ports_pair_channels() {
        let c = |index, chan| PortRead::Const { bank: 0, index, chan };
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[c(1, 0), c(1, 1)], BankSwizzle::Vec012));
        assert!(res.schedule_vec_src(&[c(2, 3)], BankSwizzle::Vec012));
        assert!(!res.schedule_vec_src(&[c(3, 0)], BankSwizzle::Vec012));
    }

    #[test]
    fn test_trans_constants_take_early_cycles() {
        let mut res = ReadPortReservation::new();
        let srcs = [PortRead::Literal(7), gpr(1, 0)];
        // SCL_210: src1 in cycle 1, one constant occupies cycle 0
        assert!(res.schedule_trans_src(&srcs, BankSwizzle::Vec012));

        let mut res = ReadPortReservation::new();
        let srcs = [PortRead::Literal(7), PortRead::Inline, gpr(1, 0)];
        // src2 is fetched in cycle 0 with SCL_210
        assert!(!res.schedule_trans_src(&srcs, BankSwizzle::Vec012));
        assert!(res.schedule_trans_src(&srcs, BankSwizzle::Vec021));
    }

    #[test]
    fn test_trans_rejects_vector_only_swizzle() {
        let mut res = ReadPortReservation::new();
        assert!(!res.schedule_trans_src(&[gpr(1, 0)], BankSwizzle::Vec210));
    }

    #[test]
    fn test_replicated_lanes_always_fit() {
        let patterns: [[PortRead; 3]; 4] = [
            [gpr(1, 0), gpr(2, 0), gpr(3, 0)],
            [gpr(1, 0), gpr(1, 0), gpr(2, 0)],
            [gpr(1, 0), gpr(2, 1), gpr(1, 0)],
            [gpr(1, 2), PortRead::Literal(3), gpr(9, 2)],
        ];
        for pattern in &patterns {
            for nlanes in 1..=4 {
                let lanes: ArrayVec<LaneReads, 4> =
                    (0..nlanes).map(|_| LaneReads::vector(pattern)).collect();
                assert!(find_bank_swizzles(&lanes).is_some(), "{:?} x {}", pattern, nlanes);
            }
        }
    }

    #[test]
    fn test_rejects_distinct_third_operand_on_shared_bank() {
        let lanes: ArrayVec<LaneReads, 4> = (0..4)
            .map(|k| LaneReads::vector(&[gpr(1, 3), gpr(2, 3), gpr(10 + k, 3)]))
            .collect();
        assert!(find_bank_swizzles(&lanes).is_none());
        assert!(find_bank_swizzles(&lanes[..1]).is_some());
    }

    #[test]
    fn test_search_finds_compatible_permutation() {
        let mut first = LaneReads::vector(&[gpr(1, 0), gpr(2, 0)]);
        first.preferred = Some(BankSwizzle::Vec012);
        // lane 1 only fits with its sources fetched in reverse order
        let second = LaneReads::vector(&[gpr(3, 0), gpr(2, 0), gpr(1, 0)]);
        let (_, swizzles) = find_bank_swizzles(&[first, second]).unwrap();
        assert_eq!(swizzles.len(), 2);
    }

    #[test]
    fn test_schedule_lane_skips_taken_cycle() {
        let mut res = ReadPortReservation::new();
        assert!(res.schedule_vec_src(&[gpr(1, 0)], BankSwizzle::Vec012));
        let lane = LaneReads::vector(&[gpr(5, 0)]);
        assert_eq!(res.schedule_lane(&lane), Some(BankSwizzle::Vec102));
        assert_eq!(res.gpr[1][0], Some(5));
    }

    #[test]
    fn test_short_instruction_always_fits() {
        let lanes = [LaneReads::vector(&[gpr(1, 0), gpr(2, 0)])];
        assert!(instruction_fits(&lanes));
    }
}
