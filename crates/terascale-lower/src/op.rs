//! # Generic Operations
//!
//! Input of the lowering: a target independent SSA arithmetic operation
//! with per-component source swizzles and modifiers, and a destination with
//! a write mask. 64-bit values occupy two consecutive 32-bit channels.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

// =============================================================================
// OPERATION TAGS
// =============================================================================

macro_rules! generic_ops {
    ($($variant:ident => ($name:literal, $nsrc:literal)),* $(,)?) => {
        /// Generic arithmetic operation
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum GenericOp {
            $(
                #[doc = $name]
                $variant,
            )*
        }

        impl GenericOp {
            /// Every operation, in declaration order
            pub const ALL: &'static [GenericOp] = &[$(GenericOp::$variant),*];

            /// Lower-case name
            pub const fn name(self) -> &'static str {
                match self {
                    $(GenericOp::$variant => $name,)*
                }
            }

            /// Number of sources
            pub const fn num_srcs(self) -> usize {
                match self {
                    $(GenericOp::$variant => $nsrc,)*
                }
            }
        }
    };
}

generic_ops! {
    // Moves and float modifiers
    Mov => ("mov", 1),
    Fneg => ("fneg", 1),
    Fabs => ("fabs", 1),
    Fsat => ("fsat", 1),

    // Float arithmetic
    Fadd => ("fadd", 2),
    Fsub => ("fsub", 2),
    Fmul => ("fmul", 2),
    Fmulz => ("fmulz", 2),
    Ffma => ("ffma", 3),
    Ffmaz => ("ffmaz", 3),
    Fmax => ("fmax", 2),
    Fmin => ("fmin", 2),
    Fceil => ("fceil", 1),
    Ffloor => ("ffloor", 1),
    Ffract => ("ffract", 1),
    Ftrunc => ("ftrunc", 1),
    FroundEven => ("fround_even", 1),

    // Float compares and selects
    Feq => ("feq", 2),
    Fneu => ("fneu", 2),
    Flt => ("flt", 2),
    Fge => ("fge", 2),
    Slt => ("slt", 2),
    Sge => ("sge", 2),
    Seq => ("seq", 2),
    Sne => ("sne", 2),
    Fcsel => ("fcsel", 3),
    FcselGe => ("fcsel_ge", 3),
    FcselGt => ("fcsel_gt", 3),

    // Reductions
    Fdot2 => ("fdot2", 2),
    Fdot3 => ("fdot3", 2),
    Fdot4 => ("fdot4", 2),
    Fdph => ("fdph", 2),
    AllFequal2 => ("b32all_fequal2", 2),
    AllFequal3 => ("b32all_fequal3", 2),
    AllFequal4 => ("b32all_fequal4", 2),
    AnyFnequal2 => ("b32any_fnequal2", 2),
    AnyFnequal3 => ("b32any_fnequal3", 2),
    AnyFnequal4 => ("b32any_fnequal4", 2),
    AllIequal2 => ("b32all_iequal2", 2),
    AllIequal3 => ("b32all_iequal3", 2),
    AllIequal4 => ("b32all_iequal4", 2),
    AnyInequal2 => ("b32any_inequal2", 2),
    AnyInequal3 => ("b32any_inequal3", 2),
    AnyInequal4 => ("b32any_inequal4", 2),

    // Transcendentals
    Fsqrt => ("fsqrt", 1),
    Frcp => ("frcp", 1),
    Frsq => ("frsq", 1),
    Fexp2 => ("fexp2", 1),
    Flog2 => ("flog2", 1),
    Fsin => ("fsin", 1),
    Fcos => ("fcos", 1),

    // Conversions
    F2i32 => ("f2i32", 1),
    F2u32 => ("f2u32", 1),
    I2f32 => ("i2f32", 1),
    U2f32 => ("u2f32", 1),
    F2b32 => ("f2b32", 1),
    I2b32 => ("i2b32", 1),
    B2f32 => ("b2f32", 1),
    B2i32 => ("b2i32", 1),
    B2b32 => ("b2b32", 1),
    B2f64 => ("b2f64", 1),
    F2f64 => ("f2f64", 1),
    I2f64 => ("i2f64", 1),
    U2f64 => ("u2f64", 1),
    F2f32 => ("f2f32", 1),

    // Integer arithmetic and logic
    Iadd => ("iadd", 2),
    Isub => ("isub", 2),
    Ineg => ("ineg", 1),
    Iand => ("iand", 2),
    Ior => ("ior", 2),
    Ixor => ("ixor", 2),
    Inot => ("inot", 1),
    Ishl => ("ishl", 2),
    Ishr => ("ishr", 2),
    Ushr => ("ushr", 2),
    Imul => ("imul", 2),
    ImulHigh => ("imul_high", 2),
    UmulHigh => ("umul_high", 2),
    Umul24 => ("umul24", 2),
    Umad24 => ("umad24", 3),
    Imax => ("imax", 2),
    Imin => ("imin", 2),
    Umax => ("umax", 2),
    Umin => ("umin", 2),

    // Integer compares and selects
    Ieq => ("ieq", 2),
    Ine => ("ine", 2),
    Ilt => ("ilt", 2),
    Ige => ("ige", 2),
    Ult => ("ult", 2),
    Uge => ("uge", 2),
    B32csel => ("b32csel", 3),
    I32cselGe => ("i32csel_ge", 3),
    I32cselGt => ("i32csel_gt", 3),

    // Bit fields
    Ibfe => ("ibfe", 3),
    Ubfe => ("ubfe", 3),
    Bfm => ("bfm", 2),
    BitfieldSelect => ("bitfield_select", 3),
    BitCount => ("bit_count", 1),
    BitfieldReverse => ("bitfield_reverse", 1),
    FindLsb => ("find_lsb", 1),
    IfindMsbRev => ("ifind_msb_rev", 1),
    UfindMsbRev => ("ufind_msb_rev", 1),

    // Vector construction, packing
    Vec2 => ("vec2", 2),
    Vec3 => ("vec3", 3),
    Vec4 => ("vec4", 4),
    Pack64_2x32 => ("pack_64_2x32", 1),
    Unpack64_2x32 => ("unpack_64_2x32", 1),
    Pack64_2x32Split => ("pack_64_2x32_split", 2),
    Unpack64_2x32SplitX => ("unpack_64_2x32_split_x", 1),
    Unpack64_2x32SplitY => ("unpack_64_2x32_split_y", 1),
    PackHalf2x16Split => ("pack_half_2x16_split", 2),
    UnpackHalf2x16SplitX => ("unpack_half_2x16_split_x", 1),
    UnpackHalf2x16SplitY => ("unpack_half_2x16_split_y", 1),

    // Derivatives and cube maps
    Fddx => ("fddx", 1),
    FddxCoarse => ("fddx_coarse", 1),
    FddxFine => ("fddx_fine", 1),
    Fddy => ("fddy", 1),
    FddyCoarse => ("fddy_coarse", 1),
    FddyFine => ("fddy_fine", 1),
    Cube => ("cube", 1),
}

impl GenericOp {
    /// Packing operations that handle 64-bit operands with the 32-bit
    /// emitters, splitting the value into its halves
    pub const fn splits_64bit(self) -> bool {
        matches!(
            self,
            GenericOp::Pack64_2x32
                | GenericOp::Unpack64_2x32
                | GenericOp::Pack64_2x32Split
                | GenericOp::PackHalf2x16Split
                | GenericOp::Unpack64_2x32SplitX
                | GenericOp::Unpack64_2x32SplitY
        )
    }
}

impl fmt::Display for GenericOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// OPERANDS
// =============================================================================

/// Where a source value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// SSA definition
    Ssa(u32),
    /// Non-SSA local register
    Register(u32),
    /// Constant buffer element
    Uniform {
        /// Constant buffer
        bank: u16,
        /// Element index
        offset: u32,
    },
    /// Immediate dwords, one per channel
    Immediate([u32; 4]),
}

/// Source of a generic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcDescriptor {
    /// Operand
    pub value: Operand,
    /// Channel read for each component
    pub swizzle: [u8; 4],
    /// Negate modifier
    pub negate: bool,
    /// Absolute value modifier
    pub abs: bool,
    /// Bit size of one component
    pub bit_size: u8,
}

impl SrcDescriptor {
    /// Source with identity swizzle and no modifiers
    pub const fn new(value: Operand) -> Self {
        Self {
            value,
            swizzle: [0, 1, 2, 3],
            negate: false,
            abs: false,
            bit_size: 32,
        }
    }

    /// SSA source
    pub const fn ssa(index: u32) -> Self {
        Self::new(Operand::Ssa(index))
    }

    /// Local register source
    pub const fn register(index: u32) -> Self {
        Self::new(Operand::Register(index))
    }

    /// Uniform source
    pub const fn uniform(bank: u16, offset: u32) -> Self {
        Self::new(Operand::Uniform { bank, offset })
    }

    /// Immediate source
    pub const fn immediate(values: [u32; 4]) -> Self {
        Self::new(Operand::Immediate(values))
    }

    /// Builder: swizzle
    pub const fn with_swizzle(mut self, swizzle: [u8; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    /// Builder: negate modifier
    pub const fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Builder: absolute value modifier
    pub const fn absolute(mut self) -> Self {
        self.abs = true;
        self
    }

    /// Builder: bit size
    pub const fn with_bit_size(mut self, bit_size: u8) -> Self {
        self.bit_size = bit_size;
        self
    }

    /// Channel read for component `comp`
    pub fn chan(&self, comp: usize) -> u8 {
        self.swizzle[comp]
    }
}

/// Destination of a generic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestDescriptor {
    /// SSA or local register index
    pub index: u32,
    /// Written exactly once
    pub is_ssa: bool,
    /// Number of components
    pub num_components: u8,
    /// Components written
    pub write_mask: u8,
    /// Clamp the result to [0, 1]
    pub saturate: bool,
    /// Bit size of one component
    pub bit_size: u8,
}

impl DestDescriptor {
    /// SSA destination writing all `num_components` components
    pub const fn ssa(index: u32, num_components: u8) -> Self {
        Self {
            index,
            is_ssa: true,
            num_components,
            write_mask: (1 << num_components) - 1,
            saturate: false,
            bit_size: 32,
        }
    }

    /// Local register destination
    pub const fn register(index: u32, num_components: u8) -> Self {
        let mut dest = Self::ssa(index, num_components);
        dest.is_ssa = false;
        dest
    }

    /// Builder: write mask
    pub const fn with_write_mask(mut self, mask: u8) -> Self {
        self.write_mask = mask;
        self
    }

    /// Builder: saturate
    pub const fn saturated(mut self) -> Self {
        self.saturate = true;
        self
    }

    /// Builder: bit size
    pub const fn with_bit_size(mut self, bit_size: u8) -> Self {
        self.bit_size = bit_size;
        self
    }

    /// Whether component `comp` is written
    pub fn writes(&self, comp: usize) -> bool {
        self.write_mask & (1 << comp) != 0
    }

    /// Components to emit code for, in order
    pub fn written(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_components as usize).filter(move |&c| self.writes(c))
    }
}

/// One generic arithmetic operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluOperation {
    /// Operation
    pub op: GenericOp,
    /// Destination
    pub dest: DestDescriptor,
    /// Sources
    pub srcs: Vec<SrcDescriptor>,
}

impl AluOperation {
    /// Operation with the given operands
    pub fn new(op: GenericOp, dest: DestDescriptor, srcs: Vec<SrcDescriptor>) -> Self {
        Self { op, dest, srcs }
    }

    /// Whether a destination or source is 64 bits wide
    pub fn is_64bit(&self) -> bool {
        self.dest.bit_size == 64 || self.srcs.iter().any(|s| s.bit_size == 64)
    }
}
