//! # Values
//!
//! Operands of ALU instructions. Registers live in the [`ValuePool`] arena
//! and are referred to by [`RegId`]; uniforms, literals and inline constants
//! are small immutable values stored directly in the operand.
//!
//! [`ValuePool`]: crate::pool::ValuePool

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use crate::instr::InstrId;
use crate::tex::TexId;

/// Channel names in lane order
pub const CHAN_NAMES: [char; 4] = ['x', 'y', 'z', 'w'];

/// Register index reserved for placeholder destinations
pub const DUMMY_SEL: u32 = 127;

/// Character of a channel, `?` when out of range
pub fn chan_char(chan: u8) -> char {
    CHAN_NAMES.get(chan as usize).copied().unwrap_or('?')
}

/// Channel of a channel character
pub fn chan_from_char(c: char) -> Option<u8> {
    CHAN_NAMES.iter().position(|&n| n == c).map(|i| i as u8)
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Index of a register in the value arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub u32);

impl RegId {
    /// Arena slot
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a local register array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub u32);

impl ArrayId {
    /// Arena slot
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// PIN
// =============================================================================

/// Placement constraint of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pin {
    /// Unconstrained
    #[default]
    None,
    /// Channel may still be chosen by the bundler
    Free,
    /// Fixed channel
    Chan,
    /// Shares its register index with the other members of a vector
    Group,
    /// Fixed channel within a fixed vector
    ChanGroup,
    /// Element of a local array
    Array,
    /// Hardware register, fixed index and channel
    Fully,
}

impl Pin {
    /// Textual name, `None` has no name
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Pin::None => None,
            Pin::Free => Some("free"),
            Pin::Chan => Some("chan"),
            Pin::Group => Some("group"),
            Pin::ChanGroup => Some("chgr"),
            Pin::Array => Some("array"),
            Pin::Fully => Some("fully"),
        }
    }

    /// Parse a textual pin name
    pub fn from_name(name: &str) -> Option<Pin> {
        Some(match name {
            "free" => Pin::Free,
            "chan" => Pin::Chan,
            "group" => Pin::Group,
            "chgr" => Pin::ChanGroup,
            "array" => Pin::Array,
            "fully" => Pin::Fully,
            _ => return None,
        })
    }

    /// Whether the channel is fixed
    pub const fn fixes_chan(self) -> bool {
        matches!(self, Pin::Chan | Pin::ChanGroup | Pin::Fully)
    }

    /// Pin after the register was placed in a bundle lane
    pub const fn placed(self) -> Pin {
        match self {
            Pin::Free => Pin::Chan,
            Pin::Group => Pin::ChanGroup,
            other => other,
        }
    }
}

// =============================================================================
// REGISTER
// =============================================================================

bitflags::bitflags! {
    /// Register property flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegisterFlags: u8 {
        /// Written exactly once
        const SSA = 1 << 0;
        /// Preloaded shader input
        const INPUT = 1 << 1;
        /// Read after the shader ends
        const OUTPUT = 1 << 2;
    }
}

/// Link of an array element register to its array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayLink {
    /// The array
    pub array: ArrayId,
    /// Element offset inside the array
    pub offset: u32,
    /// Indirect address register added to the offset
    pub addr: Option<RegId>,
}

/// A register of the value arena
#[derive(Debug, Clone)]
pub struct Register {
    pub(crate) sel: u32,
    pub(crate) chan: u8,
    pub(crate) pin: Pin,
    pub(crate) flags: RegisterFlags,
    pub(crate) array: Option<ArrayLink>,
    pub(crate) uses: Vec<InstrId>,
    pub(crate) tex_uses: Vec<TexId>,
    pub(crate) parents: Vec<InstrId>,
}

impl Register {
    pub(crate) fn new(sel: u32, chan: u8, pin: Pin, flags: RegisterFlags) -> Self {
        assert!(chan < 4, "register channel {} out of range", chan);
        Self {
            sel,
            chan,
            pin,
            flags,
            array: None,
            uses: Vec::new(),
            tex_uses: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Register index
    pub fn sel(&self) -> u32 {
        self.sel
    }

    /// Channel
    pub fn chan(&self) -> u8 {
        self.chan
    }

    /// Placement constraint
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Property flags
    pub fn flags(&self) -> RegisterFlags {
        self.flags
    }

    /// Written exactly once
    pub fn is_ssa(&self) -> bool {
        self.flags.contains(RegisterFlags::SSA)
    }

    /// Array link, for array elements
    pub fn array(&self) -> Option<&ArrayLink> {
        self.array.as_ref()
    }

    /// Indirect address register of an array element
    pub fn addr(&self) -> Option<RegId> {
        self.array.and_then(|link| link.addr)
    }

    /// Instructions reading this register, in insertion order
    pub fn uses(&self) -> &[InstrId] {
        &self.uses
    }

    /// Instructions writing this register, in insertion order
    pub fn parents(&self) -> &[InstrId] {
        &self.parents
    }

    /// Gradient fetches reading this register
    pub fn tex_uses(&self) -> &[TexId] {
        &self.tex_uses
    }

    /// Whether any instruction reads this register
    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty() || !self.tex_uses.is_empty()
    }

    pub(crate) fn add_use(&mut self, instr: InstrId) {
        if !self.uses.contains(&instr) {
            self.uses.push(instr);
        }
    }

    pub(crate) fn del_use(&mut self, instr: InstrId) {
        self.uses.retain(|&u| u != instr);
    }

    pub(crate) fn add_parent(&mut self, instr: InstrId) {
        if !self.parents.contains(&instr) {
            self.parents.push(instr);
        }
    }

    pub(crate) fn del_parent(&mut self, instr: InstrId) {
        self.parents.retain(|&p| p != instr);
    }
}

/// Local register array, addressable with an index register
#[derive(Debug, Clone)]
pub struct LocalArray {
    pub(crate) base_sel: u32,
    pub(crate) size: u32,
    pub(crate) ncomponents: u8,
    pub(crate) writers: Vec<InstrId>,
    pub(crate) indirect_writers: Vec<InstrId>,
}

impl LocalArray {
    /// Register index of the first element
    pub fn base_sel(&self) -> u32 {
        self.base_sel
    }

    /// Number of elements
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Channels per element
    pub fn ncomponents(&self) -> u8 {
        self.ncomponents
    }

    /// All instructions writing some element
    pub fn writers(&self) -> &[InstrId] {
        &self.writers
    }

    /// Instructions writing an element through an address register
    pub fn indirect_writers(&self) -> &[InstrId] {
        &self.indirect_writers
    }
}

// =============================================================================
// CONSTANTS
// =============================================================================

/// Value read from a constant buffer through the kcache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uniform {
    /// Constant buffer (kcache bank)
    pub bank: u16,
    /// Element index inside the buffer
    pub index: u32,
    /// Channel
    pub chan: u8,
    /// Buffer index register, for indirectly selected buffers
    pub buf_addr: Option<RegId>,
}

impl Uniform {
    /// Direct uniform access
    pub const fn new(bank: u16, index: u32, chan: u8) -> Self {
        Self {
            bank,
            index,
            chan,
            buf_addr: None,
        }
    }
}

/// Constant provided by the hardware without consuming a literal slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineConstant {
    /// 0 (integer and float)
    Zero,
    /// 1.0f
    One,
    /// 1 (integer)
    OneInt,
    /// -1 (integer)
    MinusOneInt,
    /// 0.5f
    Half,
    /// Result of the previous vector lane
    PrevVector(u8),
    /// Result of the previous trans lane
    PrevScalar,
    /// LDS output queue A, popped
    LdsOqAPop,
    /// LDS output queue B, popped
    LdsOqBPop,
    /// LDS output queue A
    LdsOqA,
    /// LDS output queue B
    LdsOqB,
    /// Interpolation parameter
    Param(u8, u8),
}

impl InlineConstant {
    /// Whether reading this value pops the LDS output queue
    pub const fn is_lds_queue_pop(self) -> bool {
        matches!(self, InlineConstant::LdsOqAPop | InlineConstant::LdsOqBPop)
    }

    /// Inline replacement for a 32-bit literal, if the hardware has one
    pub fn from_bits(bits: u32) -> Option<InlineConstant> {
        Some(match bits {
            0 => InlineConstant::Zero,
            0x3f80_0000 => InlineConstant::One,
            1 => InlineConstant::OneInt,
            0xffff_ffff => InlineConstant::MinusOneInt,
            0x3f00_0000 => InlineConstant::Half,
            _ => return None,
        })
    }
}

impl fmt::Display for InlineConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineConstant::Zero => f.write_str("I[0]"),
            InlineConstant::One => f.write_str("I[1.0]"),
            InlineConstant::OneInt => f.write_str("I[1]"),
            InlineConstant::MinusOneInt => f.write_str("I[-1]"),
            InlineConstant::Half => f.write_str("I[0.5]"),
            InlineConstant::PrevVector(chan) => write!(f, "I[PV].{}", chan_char(*chan)),
            InlineConstant::PrevScalar => f.write_str("I[PS]"),
            InlineConstant::LdsOqAPop => f.write_str("I[LDS_OQ_A_POP]"),
            InlineConstant::LdsOqBPop => f.write_str("I[LDS_OQ_B_POP]"),
            InlineConstant::LdsOqA => f.write_str("I[LDS_OQ_A]"),
            InlineConstant::LdsOqB => f.write_str("I[LDS_OQ_B]"),
            InlineConstant::Param(index, chan) => write!(f, "Param{}.{}", index, chan_char(*chan)),
        }
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// Operand of an ALU instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Virtual register or array element
    Register(RegId),
    /// Constant buffer element
    Uniform(Uniform),
    /// 32-bit literal dword
    Literal(u32),
    /// Hardware inline constant
    Inline(InlineConstant),
}

impl Value {
    /// Register operand, if any
    pub fn as_register(&self) -> Option<RegId> {
        match self {
            Value::Register(id) => Some(*id),
            _ => None,
        }
    }

    /// Uniform operand, if any
    pub fn as_uniform(&self) -> Option<&Uniform> {
        match self {
            Value::Uniform(u) => Some(u),
            _ => None,
        }
    }

    /// Literal for a float value, or the matching inline constant
    pub fn float(value: f32) -> Value {
        Value::from_bits(value.to_bits())
    }

    /// Literal for a dword, or the matching inline constant
    pub fn from_bits(bits: u32) -> Value {
        match InlineConstant::from_bits(bits) {
            Some(inline) => Value::Inline(inline),
            None => Value::Literal(bits),
        }
    }

    /// Inline zero
    pub const fn zero() -> Value {
        Value::Inline(InlineConstant::Zero)
    }

    /// Inline 1.0f
    pub const fn one() -> Value {
        Value::Inline(InlineConstant::One)
    }

    /// Inline integer 1
    pub const fn one_int() -> Value {
        Value::Inline(InlineConstant::OneInt)
    }
}

impl From<RegId> for Value {
    fn from(id: RegId) -> Self {
        Value::Register(id)
    }
}

impl From<Uniform> for Value {
    fn from(u: Uniform) -> Self {
        Value::Uniform(u)
    }
}

impl From<InlineConstant> for Value {
    fn from(c: InlineConstant) -> Self {
        Value::Inline(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_names() {
        for pin in [
            Pin::Free,
            Pin::Chan,
            Pin::Group,
            Pin::ChanGroup,
            Pin::Array,
            Pin::Fully,
        ] {
            let name = pin.name().unwrap();
            assert_eq!(Pin::from_name(name), Some(pin));
        }
        assert_eq!(Pin::None.name(), None);
        assert_eq!(Pin::from_name("bogus"), None);
    }

    #[test]
    fn test_pin_tightening() {
        assert_eq!(Pin::Free.placed(), Pin::Chan);
        assert_eq!(Pin::Group.placed(), Pin::ChanGroup);
        assert_eq!(Pin::None.placed(), Pin::None);
        assert!(Pin::ChanGroup.fixes_chan());
        assert!(!Pin::Group.fixes_chan());
    }

    #[test]
    fn test_inline_from_literal() {
        assert_eq!(Value::float(1.0), Value::one());
        assert_eq!(Value::float(0.5), Value::Inline(InlineConstant::Half));
        assert_eq!(Value::from_bits(1), Value::one_int());
        assert_eq!(Value::float(2.0), Value::Literal(0x4000_0000));
    }

    #[test]
    fn test_use_list_is_a_set() {
        let mut reg = Register::new(3, 1, Pin::None, RegisterFlags::SSA);
        reg.add_use(InstrId(4));
        reg.add_use(InstrId(2));
        reg.add_use(InstrId(4));
        assert_eq!(reg.uses(), &[InstrId(4), InstrId(2)]);
        reg.del_use(InstrId(4));
        assert_eq!(reg.uses(), &[InstrId(2)]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_register_chan_checked() {
        let _ = Register::new(1, 4, Pin::None, RegisterFlags::empty());
    }
}
