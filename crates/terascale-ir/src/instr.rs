//! # Scalar ALU Instructions
//!
//! One [`AluInstr`] is a single opcode applied in one to four lanes. A
//! multi-slot instruction (DOT4, MAX4, replicated transcendentals, 64-bit
//! compares) carries `nsrc * slots` sources and must be split into a group
//! before encoding.
//!
//! Construction only checks the shape of the instruction. Use and parent
//! registration happens when the instruction enters the [`Program`] arena.
//!
//! [`Program`]: crate::program::Program

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use crate::group::GroupId;
use crate::opcode::{AluOp, LdsOp};
use crate::value::{RegId, Value};

/// Index of an instruction in the program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    /// Arena slot
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Instruction modifier flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AluFlags: u32 {
        /// Result is written to the destination
        const WRITE = 1 << 0;
        /// Last instruction of its group
        const LAST = 1 << 1;
        /// Clamp result to [0, 1]
        const DST_CLAMP = 1 << 2;
        /// Negate source 0
        const SRC0_NEG = 1 << 3;
        /// Negate source 1
        const SRC1_NEG = 1 << 4;
        /// Negate source 2
        const SRC2_NEG = 1 << 5;
        /// Absolute value of source 0
        const SRC0_ABS = 1 << 6;
        /// Absolute value of source 1
        const SRC1_ABS = 1 << 7;
        /// Source 0 is relatively addressed
        const SRC0_REL = 1 << 8;
        /// Source 1 is relatively addressed
        const SRC1_REL = 1 << 9;
        /// Source 2 is relatively addressed
        const SRC2_REL = 1 << 10;
        /// Destination is relatively addressed
        const DST_REL = 1 << 11;
        /// Update the execution mask
        const UPDATE_EXEC = 1 << 12;
        /// Update the predicate
        const UPDATE_PRED = 1 << 13;
        /// Three-source encoding
        const OP3 = 1 << 14;
        /// Part of an emulated double precision operation
        const IS_64BIT = 1 << 15;
        /// Local data share access
        const IS_LDS = 1 << 16;
        /// Prefers the trans lane
        const IS_TRANS = 1 << 17;
        /// Transcendental replicated across the Cayman vector lanes
        const IS_CAYMAN_TRANS = 1 << 18;
        /// Keep out of the scheduler's priority bias
        const NO_SCHEDULE_BIAS = 1 << 19;

        /// Flags that survive a print/parse round trip
        const ENCODED = Self::WRITE.bits()
            | Self::LAST.bits()
            | Self::DST_CLAMP.bits()
            | Self::SRC0_NEG.bits()
            | Self::SRC1_NEG.bits()
            | Self::SRC2_NEG.bits()
            | Self::SRC0_ABS.bits()
            | Self::SRC1_ABS.bits()
            | Self::SRC0_REL.bits()
            | Self::SRC1_REL.bits()
            | Self::SRC2_REL.bits()
            | Self::DST_REL.bits()
            | Self::UPDATE_EXEC.bits()
            | Self::UPDATE_PRED.bits()
            | Self::OP3.bits()
            | Self::IS_LDS.bits();
    }
}

impl AluFlags {
    /// Negate flag of source `i`
    pub fn neg(i: usize) -> AluFlags {
        match i {
            0 => AluFlags::SRC0_NEG,
            1 => AluFlags::SRC1_NEG,
            2 => AluFlags::SRC2_NEG,
            _ => panic!("no negate modifier for source {}", i),
        }
    }

    /// Absolute-value flag of source `i`, only sources 0 and 1 have one
    pub fn abs(i: usize) -> AluFlags {
        match i {
            0 => AluFlags::SRC0_ABS,
            1 => AluFlags::SRC1_ABS,
            _ => panic!("no abs modifier for source {}", i),
        }
    }

    /// Relative-addressing flag of source `i`
    pub fn rel(i: usize) -> AluFlags {
        match i {
            0 => AluFlags::SRC0_REL,
            1 => AluFlags::SRC1_REL,
            2 => AluFlags::SRC2_REL,
            _ => panic!("no relative modifier for source {}", i),
        }
    }

    /// Written result that closes its group
    pub const fn last_write() -> AluFlags {
        AluFlags::WRITE.union(AluFlags::LAST)
    }
}

// =============================================================================
// BANK SWIZZLE
// =============================================================================

/// Order in which the sources of a lane are fetched from the register banks
///
/// The first four values double as the trans lane swizzles
/// `SCL_210`, `SCL_122`, `SCL_212` and `SCL_221`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankSwizzle {
    /// Sources fetched in cycles 0, 1, 2
    Vec012,
    /// Sources fetched in cycles 0, 2, 1
    Vec021,
    /// Sources fetched in cycles 1, 0, 2
    Vec102,
    /// Sources fetched in cycles 1, 2, 0
    Vec120,
    /// Sources fetched in cycles 2, 0, 1
    Vec201,
    /// Sources fetched in cycles 2, 1, 0
    Vec210,
}

const VEC_CYCLES: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

const TRANS_CYCLES: [[usize; 3]; 4] = [[2, 1, 0], [1, 2, 2], [2, 1, 2], [2, 2, 1]];

impl BankSwizzle {
    /// All vector swizzles
    pub const ALL: [BankSwizzle; 6] = [
        BankSwizzle::Vec012,
        BankSwizzle::Vec021,
        BankSwizzle::Vec102,
        BankSwizzle::Vec120,
        BankSwizzle::Vec201,
        BankSwizzle::Vec210,
    ];

    /// Swizzles valid in the trans lane
    pub const TRANS: [BankSwizzle; 4] = [
        BankSwizzle::Vec012,
        BankSwizzle::Vec021,
        BankSwizzle::Vec102,
        BankSwizzle::Vec120,
    ];

    /// Read cycle of source `src` in a vector lane
    pub fn vec_cycle(self, src: usize) -> usize {
        VEC_CYCLES[self as usize][src]
    }

    /// Read cycle of source `src` in the trans lane
    pub fn trans_cycle(self, src: usize) -> Option<usize> {
        TRANS_CYCLES.get(self as usize).map(|cycles| cycles[src])
    }

    /// Textual name
    pub const fn name(self) -> &'static str {
        match self {
            BankSwizzle::Vec012 => "VEC_012",
            BankSwizzle::Vec021 => "VEC_021",
            BankSwizzle::Vec102 => "VEC_102",
            BankSwizzle::Vec120 => "VEC_120",
            BankSwizzle::Vec201 => "VEC_201",
            BankSwizzle::Vec210 => "VEC_210",
        }
    }

    /// Parse a textual name
    pub fn from_name(name: &str) -> Option<BankSwizzle> {
        BankSwizzle::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for BankSwizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// CONTROL FLOW MARKER
// =============================================================================

/// Control-flow side effect of the clause an instruction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CfMarker {
    /// Plain ALU clause
    #[default]
    Alu,
    /// Push the stack before the clause
    PushBefore,
    /// Pop once after the clause
    PopAfter,
    /// Pop twice after the clause
    Pop2After,
    /// Extended clause
    Extended,
    /// Loop break
    Break,
    /// Loop continue
    Continue,
    /// Else after the clause
    ElseAfter,
}

impl CfMarker {
    /// Textual name, the plain clause has none
    pub const fn name(self) -> Option<&'static str> {
        match self {
            CfMarker::Alu => None,
            CfMarker::PushBefore => Some("PUSH_BEFORE"),
            CfMarker::PopAfter => Some("POP_AFTER"),
            CfMarker::Pop2After => Some("POP2_AFTER"),
            CfMarker::Extended => Some("EXTENDED"),
            CfMarker::Break => Some("BREAK"),
            CfMarker::Continue => Some("CONT"),
            CfMarker::ElseAfter => Some("ELSE_AFTER"),
        }
    }

    /// Parse a textual name
    pub fn from_name(name: &str) -> Option<CfMarker> {
        Some(match name {
            "PUSH_BEFORE" => CfMarker::PushBefore,
            "POP_AFTER" => CfMarker::PopAfter,
            "POP2_AFTER" => CfMarker::Pop2After,
            "EXTENDED" => CfMarker::Extended,
            "BREAK" => CfMarker::Break,
            "CONT" => CfMarker::Continue,
            "ELSE_AFTER" => CfMarker::ElseAfter,
            _ => return None,
        })
    }
}

// =============================================================================
// OPCODE
// =============================================================================

/// ALU or LDS opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Arithmetic opcode
    Alu(AluOp),
    /// Local data share opcode
    Lds(LdsOp),
}

impl Opcode {
    /// Sources per slot
    pub fn nsrc(self) -> usize {
        match self {
            Opcode::Alu(op) => op.nsrc(),
            Opcode::Lds(op) => op.nsrc(),
        }
    }

    /// Arithmetic opcode, if any
    pub fn alu(self) -> Option<AluOp> {
        match self {
            Opcode::Alu(op) => Some(op),
            Opcode::Lds(_) => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Alu(op) => op.fmt(f),
            Opcode::Lds(op) => op.fmt(f),
        }
    }
}

/// Position of an instruction in the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Position {
    /// Basic block
    pub block: u32,
    /// Index inside the block
    pub index: u32,
}

// =============================================================================
// INSTRUCTION
// =============================================================================

/// Scalar ALU instruction
#[derive(Debug, Clone)]
pub struct AluInstr {
    pub(crate) opcode: Opcode,
    pub(crate) dest: Option<RegId>,
    pub(crate) src: Vec<Value>,
    pub(crate) flags: AluFlags,
    pub(crate) bank_swizzle: Option<BankSwizzle>,
    pub(crate) cf: CfMarker,
    pub(crate) slots: u8,
    pub(crate) fallback_chan: u8,
    pub(crate) extra_deps: Vec<RegId>,
    pub(crate) required: Vec<InstrId>,
    pub(crate) parent_group: Option<GroupId>,
    pub(crate) position: Position,
    pub(crate) scheduled: bool,
    pub(crate) dead: bool,
}

impl AluInstr {
    /// Single-slot instruction
    pub fn new(op: AluOp, dest: Option<RegId>, src: Vec<Value>, flags: AluFlags) -> Self {
        Self::with_slots(op, dest, src, flags, 1)
    }

    /// Instruction spanning `slots` lanes
    ///
    /// # Panics
    ///
    /// If the source count is not `nsrc(op) * slots`, or if `WRITE` is set
    /// without a destination.
    pub fn with_slots(op: AluOp, dest: Option<RegId>, src: Vec<Value>, flags: AluFlags, slots: u8) -> Self {
        Self::build(Opcode::Alu(op), dest, src, flags, slots)
    }

    /// Local data share access; LDS instructions never write a register
    pub fn lds(op: LdsOp, src: Vec<Value>) -> Self {
        Self::build(Opcode::Lds(op), None, src, AluFlags::IS_LDS, 1)
    }

    fn build(opcode: Opcode, dest: Option<RegId>, src: Vec<Value>, mut flags: AluFlags, slots: u8) -> Self {
        assert!((1..=4).contains(&slots), "{}: invalid slot count {}", opcode, slots);
        let nsrc = opcode.nsrc();
        assert!(
            src.len() == nsrc * slots as usize,
            "{}: expected {} sources, got {}",
            opcode,
            nsrc * slots as usize,
            src.len()
        );
        assert!(
            !flags.contains(AluFlags::WRITE) || dest.is_some(),
            "{}: WRITE without destination",
            opcode
        );
        if nsrc == 3 {
            flags |= AluFlags::OP3;
        }
        Self {
            opcode,
            dest,
            src,
            flags,
            bank_swizzle: None,
            cf: CfMarker::Alu,
            slots,
            fallback_chan: 0,
            extra_deps: Vec::new(),
            required: Vec::new(),
            parent_group: None,
            position: Position::default(),
            scheduled: false,
            dead: false,
        }
    }

    /// Builder: control-flow marker
    pub fn with_cf(mut self, cf: CfMarker) -> Self {
        self.cf = cf;
        self
    }

    /// Builder: bank swizzle
    pub fn with_bank_swizzle(mut self, swizzle: BankSwizzle) -> Self {
        self.bank_swizzle = Some(swizzle);
        self
    }

    /// Builder: lane used when there is no destination
    pub fn with_fallback_chan(mut self, chan: u8) -> Self {
        self.fallback_chan = chan;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Arithmetic opcode, if any
    pub fn alu_op(&self) -> Option<AluOp> {
        self.opcode.alu()
    }

    /// Destination register
    pub fn dest(&self) -> Option<RegId> {
        self.dest
    }

    /// All sources, slot after slot
    pub fn sources(&self) -> &[Value] {
        &self.src
    }

    /// Source `i`
    pub fn src(&self, i: usize) -> &Value {
        &self.src[i]
    }

    /// Sources per slot
    pub fn nsrc(&self) -> usize {
        self.opcode.nsrc()
    }

    /// Number of lanes
    pub fn slots(&self) -> usize {
        self.slots as usize
    }

    /// Modifier flags
    pub fn flags(&self) -> AluFlags {
        self.flags
    }

    /// Whether all of `flag` are set
    pub fn has_flag(&self, flag: AluFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Set flags
    pub fn set_flag(&mut self, flag: AluFlags) {
        self.flags |= flag;
    }

    /// Clear flags
    pub fn reset_flag(&mut self, flag: AluFlags) {
        self.flags.remove(flag);
    }

    /// Whether the destination is written
    pub fn writes(&self) -> bool {
        self.flags.contains(AluFlags::WRITE)
    }

    /// Bank swizzle chosen by the bundler
    pub fn bank_swizzle(&self) -> Option<BankSwizzle> {
        self.bank_swizzle
    }

    /// Set the bank swizzle
    pub fn set_bank_swizzle(&mut self, swizzle: Option<BankSwizzle>) {
        self.bank_swizzle = swizzle;
    }

    /// Control-flow marker
    pub fn cf(&self) -> CfMarker {
        self.cf
    }

    /// Set the control-flow marker
    pub fn set_cf(&mut self, cf: CfMarker) {
        self.cf = cf;
    }

    /// Lane used when there is no destination
    pub fn fallback_chan(&self) -> u8 {
        self.fallback_chan
    }

    /// Registers that must be ready before this instruction
    pub fn extra_dependencies(&self) -> &[RegId] {
        &self.extra_deps
    }

    /// Add a register that must be ready before this instruction
    pub fn add_extra_dependency(&mut self, reg: RegId) {
        if !self.extra_deps.contains(&reg) {
            self.extra_deps.push(reg);
        }
    }

    /// Instructions that must be scheduled before this one
    pub fn required_instrs(&self) -> &[InstrId] {
        &self.required
    }

    /// Require `instr` to be scheduled first
    pub fn add_required_instr(&mut self, instr: InstrId) {
        if !self.required.contains(&instr) {
            self.required.push(instr);
        }
    }

    /// Group this instruction was placed in
    pub fn parent_group(&self) -> Option<GroupId> {
        self.parent_group
    }

    /// Position in the schedule
    pub fn position(&self) -> Position {
        self.position
    }

    /// Whether the instruction was scheduled
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Whether the instruction was removed from the program
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Whether this is an LDS access
    pub fn is_lds(&self) -> bool {
        matches!(self.opcode, Opcode::Lds(_))
    }

    /// Whether the instruction touches the local data share
    pub fn has_lds_access(&self) -> bool {
        self.is_lds()
            || self.src.iter().any(|v| match v {
                Value::Inline(c) => c.is_lds_queue_pop(),
                _ => false,
            })
    }

    /// Whether the sources form a three-source instruction
    pub fn is_op3(&self) -> bool {
        self.flags.contains(AluFlags::OP3)
    }

    /// Mask of lanes the destination may be written to
    ///
    /// Replicated Cayman transcendentals only produce a result in the lanes
    /// they occupy.
    pub fn allowed_dest_chan_mask(&self) -> u8 {
        if self.slots > 1 && self.has_flag(AluFlags::IS_CAYMAN_TRANS) {
            ((1u16 << self.slots) - 1) as u8
        } else {
            0xf
        }
    }

    /// Replace all sources
    ///
    /// Use lists are not updated; callers going through the program arena
    /// use [`Program::set_sources`](crate::program::Program::set_sources).
    pub(crate) fn replace_sources(&mut self, src: Vec<Value>) {
        assert!(
            src.len() == self.nsrc() * self.slots(),
            "{}: expected {} sources, got {}",
            self.opcode,
            self.nsrc() * self.slots(),
            src.len()
        );
        self.src = src;
    }

    /// Sources of lane `slot`
    pub fn slot_sources(&self, slot: usize) -> &[Value] {
        let n = self.nsrc();
        &self.src[slot * n..(slot + 1) * n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op3_flag_derived() {
        let instr = AluInstr::new(
            AluOp::MuladdIeee,
            Some(RegId(0)),
            vec![Value::zero(), Value::one(), Value::zero()],
            AluFlags::WRITE,
        );
        assert!(instr.is_op3());
        let instr = AluInstr::new(AluOp::Add, Some(RegId(0)), vec![Value::zero(), Value::one()], AluFlags::WRITE);
        assert!(!instr.is_op3());
    }

    #[test]
    #[should_panic(expected = "expected 8 sources")]
    fn test_arity_enforced() {
        let _ = AluInstr::with_slots(AluOp::Dot4, Some(RegId(0)), vec![Value::zero(); 6], AluFlags::WRITE, 4);
    }

    #[test]
    #[should_panic(expected = "WRITE without destination")]
    fn test_write_needs_dest() {
        let _ = AluInstr::new(AluOp::Mov, None, vec![Value::zero()], AluFlags::WRITE);
    }

    #[test]
    fn test_bank_swizzle_cycles() {
        assert_eq!(BankSwizzle::Vec120.vec_cycle(0), 1);
        assert_eq!(BankSwizzle::Vec120.vec_cycle(2), 0);
        assert_eq!(BankSwizzle::Vec012.trans_cycle(0), Some(2));
        assert_eq!(BankSwizzle::Vec201.trans_cycle(0), None);
        assert_eq!(BankSwizzle::from_name("VEC_210"), Some(BankSwizzle::Vec210));
    }

    #[test]
    fn test_lds_access() {
        let read = AluInstr::lds(LdsOp::ReadRet, vec![Value::zero()]);
        assert!(read.has_lds_access());
        assert!(!read.writes());
        let pop = AluInstr::new(
            AluOp::Mov,
            Some(RegId(1)),
            vec![Value::Inline(crate::value::InlineConstant::LdsOqAPop)],
            AluFlags::WRITE,
        );
        assert!(pop.has_lds_access());
    }

    #[test]
    fn test_slot_sources() {
        let srcs = (0..8).map(Value::Literal).collect::<Vec<_>>();
        let dot = AluInstr::with_slots(AluOp::Dot4, Some(RegId(0)), srcs, AluFlags::WRITE, 4);
        assert_eq!(dot.slot_sources(2), &[Value::Literal(4), Value::Literal(5)]);
        assert_eq!(dot.allowed_dest_chan_mask(), 0xf);
    }
}
