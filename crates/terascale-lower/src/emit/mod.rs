//! # Lowering Emitters
//!
//! One translation per category of generic operation. Every emitter turns
//! an [`AluOperation`] into scalar instructions and groups appended to the
//! shader's stream, and leaves `LAST` on the final instruction it emitted.
//!
//! ```text
//!   AluOperation ──► dispatch table ──► Lowering ──► emitter
//!                     (chip, 64-bit, op)               │
//!                                                      ▼
//!                                  stand-alone instructions, groups,
//!                                  gradient fetches
//! ```
//!
//! - [`elementwise`] - one instruction per written component
//! - [`reduce`] - dot products and boolean any/all
//! - [`trans`] - transcendental unit, per generation
//! - [`wide`] - 64-bit emulation on register pairs
//! - [`vector`] - vector construction, packing, derivatives, cube maps

pub mod elementwise;
pub mod reduce;
pub mod trans;
pub mod vector;
pub mod wide;

use terascale_ir::{AluFlags, AluOp, GradientOp, InlineConstant, Pin};

use crate::error::Result;
use crate::op::{AluOperation, DestDescriptor, SrcDescriptor};
use crate::shader::Shader;

bitflags::bitflags! {
    /// Options of two-source elementwise emitters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Op2Options: u8 {
        /// Swap the two sources
        const REVERSE = 1 << 0;
        /// Negate the second source (after swapping)
        const NEG_SRC1 = 1 << 1;
    }
}

/// How a generic operation is lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    /// One-source elementwise op, with forced modifiers
    Op1 {
        /// Opcode
        op: AluOp,
        /// Modifiers added to every instruction
        flags: AluFlags,
    },
    /// Two-source elementwise op
    Op2 {
        /// Opcode
        op: AluOp,
        /// Source handling
        options: Op2Options,
    },
    /// Two-source integer op; integer sources carry no modifiers
    Op2Int {
        /// Opcode
        op: AluOp,
        /// Source handling
        options: Op2Options,
    },
    /// Three-source elementwise op reading the sources in `shuffle` order
    Op3 {
        /// Opcode
        op: AluOp,
        /// Source order
        shuffle: [u8; 3],
    },
    /// Boolean to number: `AND_INT` with the representation of true
    BoolToNumber(InlineConstant),
    /// `op(src, 0)` per component
    CompareZero(AluOp),
    /// `op(0, src)` per component
    CombineWithZero(AluOp),
    /// Two-component float any/all
    AnyAllFloat2(AluOp),
    /// Three or four component float any/all through `MAX4`
    AnyAllFloat {
        /// Per-component compare
        op: AluOp,
        /// Components compared
        components: u8,
        /// "all" rather than "any"
        all: bool,
    },
    /// Integer any/all through a tree of `AND_INT` / `OR_INT`
    AnyAllInt {
        /// Per-component compare
        op: AluOp,
        /// Components compared
        components: u8,
        /// "all" rather than "any"
        all: bool,
    },
    /// Dot product of the first `n` components
    Dot(u8),
    /// Plane distance: `dot(a.xyz, b.xyz) + b.w`
    Fdph,
    /// Vector of `n` scalar sources
    CreateVec(u8),
    /// 64-bit value from a two-component 32-bit vector
    Pack64,
    /// Two-component 32-bit vector from a 64-bit value
    Unpack64,
    /// 64-bit value from two 32-bit scalars
    Pack64Split,
    /// Low (0) or high (1) half of a 64-bit value
    Unpack64Split(u8),
    /// Two floats packed as halves into one dword
    PackHalfSplit,
    /// Low half-float of a dword
    UnpackHalfSplitX,
    /// High half-float of a dword
    UnpackHalfSplitY,
    /// Screen space derivative through the texture unit
    Gradient {
        /// Direction
        op: GradientOp,
        /// Per-pixel rather than per-quad
        fine: bool,
    },
    /// Cube map face and coordinates
    Cube,
    /// One-source transcendental on the trans lane
    Trans(AluOp),
    /// Two-source transcendental on the trans lane
    Trans2(AluOp),
    /// One-source transcendental replicated across Cayman vector lanes
    CaymanTrans(AluOp),
    /// Two-source transcendental replicated across Cayman vector lanes
    CaymanTrans2(AluOp),
    /// Float to integer through `TRUNC`
    TruncToInt(AluOp),
    /// 64-bit move
    Mov64,
    /// 64-bit negate
    Neg64,
    /// 64-bit absolute value
    Abs64,
    /// 64-bit one-source op reading the halves swapped
    Op1Wide(AluOp),
    /// 64-bit two-source arithmetic
    Op2Wide(AluOp),
    /// 64-bit compare producing one 32-bit boolean per component
    Compare64 {
        /// Opcode
        op: AluOp,
        /// Swap the two sources
        reverse: bool,
    },
    /// 64-bit fused multiply-add
    Fma64,
    /// 64-bit square root and reciprocals
    Trans64(AluOp),
    /// Boolean to double
    BoolToDouble,
    /// 32-bit integer to double
    IntToDouble(AluOp),
    /// Float to double
    FloatToDouble,
    /// Double to float
    DoubleToFloat,
    /// Two-component 64-bit vector
    Vec2Wide,
}

impl Lowering {
    /// Run the emitter
    pub fn emit(self, shader: &mut Shader, alu: &AluOperation) -> Result<()> {
        match self {
            Lowering::Op1 { op, flags } => elementwise::emit_op1(shader, alu, op, flags),
            Lowering::Op2 { op, options } => elementwise::emit_op2(shader, alu, op, options),
            Lowering::Op2Int { op, options } => elementwise::emit_op2_int(shader, alu, op, options),
            Lowering::Op3 { op, shuffle } => elementwise::emit_op3(shader, alu, op, shuffle),
            Lowering::BoolToNumber(value) => elementwise::emit_bool_to_number(shader, alu, value),
            Lowering::CompareZero(op) => elementwise::emit_with_zero(shader, alu, op, false),
            Lowering::CombineWithZero(op) => elementwise::emit_with_zero(shader, alu, op, true),
            Lowering::AnyAllFloat2(op) => reduce::emit_any_all_fcomp2(shader, alu, op),
            Lowering::AnyAllFloat { op, components, all } => {
                reduce::emit_any_all_fcomp(shader, alu, op, components, all)
            },
            Lowering::AnyAllInt { op, components, all } => {
                reduce::emit_any_all_icomp(shader, alu, op, components, all)
            },
            Lowering::Dot(n) => reduce::emit_dot(shader, alu, n),
            Lowering::Fdph => reduce::emit_fdph(shader, alu),
            Lowering::CreateVec(n) => vector::emit_create_vec(shader, alu, n),
            Lowering::Pack64 => vector::emit_pack_64(shader, alu),
            Lowering::Unpack64 => vector::emit_unpack_64(shader, alu),
            Lowering::Pack64Split => vector::emit_pack_64_split(shader, alu),
            Lowering::Unpack64Split(half) => vector::emit_unpack_64_split(shader, alu, half),
            Lowering::PackHalfSplit => vector::emit_pack_half_split(shader, alu),
            Lowering::UnpackHalfSplitX => vector::emit_unpack_half_split(shader, alu, false),
            Lowering::UnpackHalfSplitY => vector::emit_unpack_half_split(shader, alu, true),
            Lowering::Gradient { op, fine } => vector::emit_gradient(shader, alu, op, fine),
            Lowering::Cube => vector::emit_cube(shader, alu),
            Lowering::Trans(op) => trans::emit_trans_op1(shader, alu, op),
            Lowering::Trans2(op) => trans::emit_trans_op2(shader, alu, op),
            Lowering::CaymanTrans(op) => trans::emit_cayman_op1(shader, alu, op),
            Lowering::CaymanTrans2(op) => trans::emit_cayman_op2(shader, alu, op),
            Lowering::TruncToInt(op) => trans::emit_trunc_to_int(shader, alu, op),
            Lowering::Mov64 => wide::emit_mov(shader, alu),
            Lowering::Neg64 => wide::emit_neg(shader, alu),
            Lowering::Abs64 => wide::emit_abs(shader, alu),
            Lowering::Op1Wide(op) => wide::emit_op1(shader, alu, op),
            Lowering::Op2Wide(op) => wide::emit_op2(shader, alu, op),
            Lowering::Compare64 { op, reverse } => wide::emit_compare(shader, alu, op, reverse),
            Lowering::Fma64 => wide::emit_fma(shader, alu),
            Lowering::Trans64(op) => wide::emit_trans(shader, alu, op),
            Lowering::BoolToDouble => wide::emit_bool_to_double(shader, alu),
            Lowering::IntToDouble(op) => wide::emit_int_to_double(shader, alu, op),
            Lowering::FloatToDouble => wide::emit_float_to_double(shader, alu),
            Lowering::DoubleToFloat => wide::emit_double_to_float(shader, alu),
            Lowering::Vec2Wide => wide::emit_vec2(shader, alu),
        }
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Single-component SSA results may be moved to any channel
pub(crate) fn pin_for_components(dest: &DestDescriptor) -> Pin {
    if dest.is_ssa && dest.num_components == 1 {
        Pin::Free
    } else {
        Pin::None
    }
}

/// Negate and absolute-value flags of `src` read as source `slot`
pub(crate) fn src_modifiers(src: &SrcDescriptor, slot: usize) -> AluFlags {
    let mut flags = AluFlags::empty();
    if src.negate {
        flags |= AluFlags::neg(slot);
    }
    if src.abs {
        flags |= AluFlags::abs(slot);
    }
    flags
}

/// Clamp flag for a saturating destination
pub(crate) fn clamp(dest: &DestDescriptor) -> AluFlags {
    if dest.saturate {
        AluFlags::DST_CLAMP
    } else {
        AluFlags::empty()
    }
}
