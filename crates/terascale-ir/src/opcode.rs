//! # ALU and LDS Opcodes
//!
//! Every opcode carries its hardware mnemonic (used by the textual format),
//! its source arity per slot, and the execution units able to run it.
//! Name lookup goes through a table built once per process.

use core::fmt;

use hashbrown::HashMap;
use spin::Once;
use static_assertions::const_assert;

use crate::chip::ChipClass;

/// Maximum number of sources of a single-slot ALU instruction
pub const MAX_ALU_SOURCES: usize = 3;

// =============================================================================
// EXECUTION UNITS
// =============================================================================

/// Units able to execute an opcode on the five-lane generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Units {
    /// Vector lanes x, y, z, w only
    Vector,
    /// Transcendental lane t only
    Trans,
    /// Any lane
    Any,
}

impl Units {
    /// Whether the op may be placed in a vector lane
    pub const fn vector(self) -> bool {
        !matches!(self, Units::Trans)
    }

    /// Whether the op may be placed in the trans lane
    pub const fn trans(self) -> bool {
        !matches!(self, Units::Vector)
    }
}

/// Static description of an ALU opcode
#[derive(Debug, Clone, Copy)]
pub struct AluOpInfo {
    /// The opcode
    pub op: AluOp,
    /// Hardware mnemonic
    pub name: &'static str,
    /// Sources per slot
    pub nsrc: u8,
    /// Units on R700/Evergreen
    pub units: Units,
}

// =============================================================================
// ALU OPCODES
// =============================================================================

macro_rules! alu_ops {
    ($($variant:ident => ($name:literal, $nsrc:literal, $units:ident)),* $(,)?) => {
        /// ALU opcode
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum AluOp {
            $(
                #[doc = $name]
                $variant,
            )*
        }

        /// Opcode descriptions, indexed by `AluOp as usize`
        pub const ALU_OP_TABLE: &[AluOpInfo] = &[
            $(AluOpInfo { op: AluOp::$variant, name: $name, nsrc: $nsrc, units: Units::$units },)*
        ];

        impl AluOp {
            /// Number of ALU opcodes
            pub const COUNT: usize = [$(AluOp::$variant),*].len();
        }
    };
}

alu_ops! {
    // Moves and float rounding
    Mov => ("MOV", 1, Any),
    Fract => ("FRACT", 1, Any),
    Trunc => ("TRUNC", 1, Any),
    Ceil => ("CEIL", 1, Any),
    Floor => ("FLOOR", 1, Any),
    Rndne => ("RNDNE", 1, Any),

    // Float arithmetic
    Add => ("ADD", 2, Any),
    Mul => ("MUL", 2, Any),
    MulIeee => ("MUL_IEEE", 2, Any),
    Max => ("MAX", 2, Any),
    Min => ("MIN", 2, Any),
    MaxDx10 => ("MAX_DX10", 2, Any),
    MinDx10 => ("MIN_DX10", 2, Any),
    Muladd => ("MULADD", 3, Any),
    MuladdIeee => ("MULADD_IEEE", 3, Any),

    // Float compares and selects
    Sete => ("SETE", 2, Any),
    Setgt => ("SETGT", 2, Any),
    Setge => ("SETGE", 2, Any),
    Setne => ("SETNE", 2, Any),
    SeteDx10 => ("SETE_DX10", 2, Any),
    SetgtDx10 => ("SETGT_DX10", 2, Any),
    SetgeDx10 => ("SETGE_DX10", 2, Any),
    SetneDx10 => ("SETNE_DX10", 2, Any),
    Cnde => ("CNDE", 3, Any),
    Cndgt => ("CNDGT", 3, Any),
    Cndge => ("CNDGE", 3, Any),

    // Integer arithmetic and logic
    AddInt => ("ADD_INT", 2, Any),
    SubInt => ("SUB_INT", 2, Any),
    AndInt => ("AND_INT", 2, Any),
    OrInt => ("OR_INT", 2, Any),
    XorInt => ("XOR_INT", 2, Any),
    NotInt => ("NOT_INT", 1, Any),
    LshlInt => ("LSHL_INT", 2, Any),
    LshrInt => ("LSHR_INT", 2, Any),
    AshrInt => ("ASHR_INT", 2, Any),
    MaxInt => ("MAX_INT", 2, Any),
    MinInt => ("MIN_INT", 2, Any),
    MaxUint => ("MAX_UINT", 2, Any),
    MinUint => ("MIN_UINT", 2, Any),
    MulUint24 => ("MUL_UINT24", 2, Any),
    MuladdUint24 => ("MULADD_UINT24", 3, Vector),
    BcntInt => ("BCNT_INT", 1, Vector),
    BfrevInt => ("BFREV_INT", 1, Vector),
    FfblInt => ("FFBL_INT", 1, Vector),
    FfbhInt => ("FFBH_INT", 1, Vector),
    FfbhUint => ("FFBH_UINT", 1, Vector),
    BfmInt => ("BFM_INT", 2, Vector),
    BfeInt => ("BFE_INT", 3, Vector),
    BfeUint => ("BFE_UINT", 3, Vector),
    BfiInt => ("BFI_INT", 3, Vector),

    // Integer compares and selects
    SeteInt => ("SETE_INT", 2, Any),
    SetneInt => ("SETNE_INT", 2, Any),
    SetgtInt => ("SETGT_INT", 2, Any),
    SetgeInt => ("SETGE_INT", 2, Any),
    SetgtUint => ("SETGT_UINT", 2, Any),
    SetgeUint => ("SETGE_UINT", 2, Any),
    CndeInt => ("CNDE_INT", 3, Any),
    CndgtInt => ("CNDGT_INT", 3, Any),
    CndgeInt => ("CNDGE_INT", 3, Any),

    // Conversions
    FltToInt => ("FLT_TO_INT", 1, Trans),
    FltToUint => ("FLT_TO_UINT", 1, Trans),
    IntToFlt => ("INT_TO_FLT", 1, Trans),
    UintToFlt => ("UINT_TO_FLT", 1, Trans),
    Flt32ToFlt16 => ("FLT32_TO_FLT16", 1, Vector),
    Flt16ToFlt32 => ("FLT16_TO_FLT32", 1, Vector),

    // Transcendentals and wide integer multiplies
    ExpIeee => ("EXP_IEEE", 1, Trans),
    LogClamped => ("LOG_CLAMPED", 1, Trans),
    LogIeee => ("LOG_IEEE", 1, Trans),
    RecipIeee => ("RECIP_IEEE", 1, Trans),
    RecipsqrtIeee => ("RECIPSQRT_IEEE1", 1, Trans),
    SqrtIeee => ("SQRT_IEEE", 1, Trans),
    Sin => ("SIN", 1, Trans),
    Cos => ("COS", 1, Trans),
    MulloInt => ("MULLO_INT", 2, Trans),
    MulhiInt => ("MULHI_INT", 2, Trans),
    MulhiUint => ("MULHI_UINT", 2, Trans),

    // Multi-lane reductions
    Dot4 => ("DOT4", 2, Vector),
    Dot4Ieee => ("DOT4_IEEE", 2, Vector),
    Max4 => ("MAX4", 1, Vector),
    Cube => ("CUBE", 2, Vector),

    // Interpolation
    InterpXy => ("INTERP_XY", 2, Vector),
    InterpZw => ("INTERP_ZW", 2, Vector),
    InterpX => ("INTERP_X", 2, Vector),
    InterpZ => ("INTERP_Z", 2, Vector),

    // Double precision
    Add64 => ("ADD_64", 2, Vector),
    Mul64 => ("MUL_64", 2, Vector),
    Fma64 => ("FMA_64", 3, Vector),
    Min64 => ("MIN_64", 2, Vector),
    Max64 => ("MAX_64", 2, Vector),
    Sete64 => ("SETE_64", 2, Vector),
    Setne64 => ("SETNE_64", 2, Vector),
    Setgt64 => ("SETGT_64", 2, Vector),
    Setge64 => ("SETGE_64", 2, Vector),
    Fract64 => ("FRACT_64", 1, Vector),
    Sqrt64 => ("SQRT_64", 2, Vector),
    Recip64 => ("RECIP_64", 2, Vector),
    Recipsqrt64 => ("RECIPSQRT_64", 2, Vector),
    Flt32ToFlt64 => ("FLT32_TO_FLT64", 1, Vector),
    Flt64ToFlt32 => ("FLT64_TO_FLT32", 1, Vector),
}

const_assert!(AluOp::COUNT < u16::MAX as usize);

impl AluOp {
    /// Static description of this opcode
    pub fn info(self) -> &'static AluOpInfo {
        &ALU_OP_TABLE[self as usize]
    }

    /// Hardware mnemonic
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Sources per slot
    pub fn nsrc(self) -> usize {
        self.info().nsrc as usize
    }

    /// Units able to run this opcode on `chip`
    ///
    /// Cayman has no trans lane: its transcendentals run replicated across
    /// vector lanes. R600 only shifts on the trans unit.
    pub fn units(self, chip: ChipClass) -> Units {
        match chip {
            ChipClass::Cayman => Units::Vector,
            ChipClass::R600 if self.is_shift() => Units::Trans,
            _ => self.info().units,
        }
    }

    /// Integer shift opcodes
    pub const fn is_shift(self) -> bool {
        matches!(self, AluOp::LshlInt | AluOp::LshrInt | AluOp::AshrInt)
    }

    /// Opcodes operating on (low, high) register pairs
    pub const fn is_64bit(self) -> bool {
        matches!(
            self,
            AluOp::Add64
                | AluOp::Mul64
                | AluOp::Fma64
                | AluOp::Min64
                | AluOp::Max64
                | AluOp::Sete64
                | AluOp::Setne64
                | AluOp::Setgt64
                | AluOp::Setge64
                | AluOp::Fract64
                | AluOp::Sqrt64
                | AluOp::Recip64
                | AluOp::Recipsqrt64
                | AluOp::Flt32ToFlt64
                | AluOp::Flt64ToFlt32
        )
    }

    /// Interpolation opcodes, whose unused lanes are kept as placeholders
    pub const fn is_interp(self) -> bool {
        matches!(
            self,
            AluOp::InterpXy | AluOp::InterpZw | AluOp::InterpX | AluOp::InterpZ
        )
    }

    /// Look up an opcode by its mnemonic
    pub fn from_name(name: &str) -> Option<AluOp> {
        static TABLE: Once<HashMap<&'static str, AluOp>> = Once::new();
        TABLE
            .call_once(|| ALU_OP_TABLE.iter().map(|info| (info.name, info.op)).collect())
            .get(name)
            .copied()
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// LDS OPCODES
// =============================================================================

/// Static description of a local data share opcode
#[derive(Debug, Clone, Copy)]
pub struct LdsOpInfo {
    /// The opcode
    pub op: LdsOp,
    /// Mnemonic
    pub name: &'static str,
    /// Number of sources
    pub nsrc: u8,
}

macro_rules! lds_ops {
    ($($variant:ident => ($name:literal, $nsrc:literal)),* $(,)?) => {
        /// Local data share opcode
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum LdsOp {
            $(
                #[doc = $name]
                $variant,
            )*
        }

        /// LDS opcode descriptions, indexed by `LdsOp as usize`
        pub const LDS_OP_TABLE: &[LdsOpInfo] = &[
            $(LdsOpInfo { op: LdsOp::$variant, name: $name, nsrc: $nsrc },)*
        ];
    };
}

lds_ops! {
    Write => ("WRITE", 2),
    WriteRel => ("WRITE_REL", 3),
    Write2 => ("WRITE2", 3),
    Add => ("ADD", 2),
    ReadRet => ("READ_RET", 1),
    AddRet => ("ADD_RET", 2),
    SubRet => ("SUB_RET", 2),
    AndRet => ("AND_RET", 2),
    OrRet => ("OR_RET", 2),
    XorRet => ("XOR_RET", 2),
    MinIntRet => ("MIN_INT_RET", 2),
    MaxIntRet => ("MAX_INT_RET", 2),
    MinUintRet => ("MIN_UINT_RET", 2),
    MaxUintRet => ("MAX_UINT_RET", 2),
    XchgRet => ("XCHG_RET", 2),
    CmpXchgRet => ("CMP_XCHG_RET", 3),
}

impl LdsOp {
    /// Static description of this opcode
    pub fn info(self) -> &'static LdsOpInfo {
        &LDS_OP_TABLE[self as usize]
    }

    /// Mnemonic
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Number of sources
    pub fn nsrc(self) -> usize {
        self.info().nsrc as usize
    }

    /// Look up an LDS opcode by its mnemonic
    pub fn from_name(name: &str) -> Option<LdsOp> {
        static TABLE: Once<HashMap<&'static str, LdsOp>> = Once::new();
        TABLE
            .call_once(|| LDS_OP_TABLE.iter().map(|info| (info.name, info.op)).collect())
            .get(name)
            .copied()
    }
}

impl fmt::Display for LdsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_opcode() {
        assert_eq!(ALU_OP_TABLE.len(), AluOp::COUNT);
        for (i, info) in ALU_OP_TABLE.iter().enumerate() {
            assert_eq!(info.op as usize, i, "{} out of order", info.name);
            assert!((1..=MAX_ALU_SOURCES as u8).contains(&info.nsrc));
        }
        for (i, info) in LDS_OP_TABLE.iter().enumerate() {
            assert_eq!(info.op as usize, i);
        }
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(AluOp::from_name("MULADD_IEEE"), Some(AluOp::MuladdIeee));
        assert_eq!(AluOp::from_name("RECIPSQRT_IEEE1"), Some(AluOp::RecipsqrtIeee));
        assert_eq!(AluOp::from_name("NOPE"), None);
        assert_eq!(LdsOp::from_name("READ_RET"), Some(LdsOp::ReadRet));
        for info in ALU_OP_TABLE {
            assert_eq!(AluOp::from_name(info.name), Some(info.op));
        }
    }

    #[test]
    fn test_units_per_chip() {
        assert_eq!(AluOp::LshlInt.units(ChipClass::R600), Units::Trans);
        assert_eq!(AluOp::LshlInt.units(ChipClass::R700), Units::Any);
        assert_eq!(AluOp::RecipIeee.units(ChipClass::Evergreen), Units::Trans);
        assert_eq!(AluOp::RecipIeee.units(ChipClass::Cayman), Units::Vector);
        assert!(AluOp::Add64.is_64bit());
        assert!(!AluOp::Add.is_64bit());
    }
}
