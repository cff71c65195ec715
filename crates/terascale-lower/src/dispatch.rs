//! # Dispatch
//!
//! `(generation, 64-bit, generic op) → Lowering`. Each generation's table
//! is assembled once, on first use: the entries shared by every chip, then
//! the transcendental entries of the generation, then its overrides.
//!
//! | Table        | Chips                 |
//! |--------------|-----------------------|
//! | common       | all                   |
//! | trans lane   | R600, R700, Evergreen |
//! | Cayman       | Cayman                |
//! | 64-bit       | Evergreen, Cayman     |

use hashbrown::HashMap;
use spin::Once;

use terascale_ir::{AluFlags, AluOp, ChipClass, GradientOp, InlineConstant};

use crate::emit::{Lowering, Op2Options};
use crate::op::GenericOp;

type Table = HashMap<(bool, GenericOp), Lowering>;

// =============================================================================
// ENTRY CONSTRUCTORS
// =============================================================================

const fn op1(op: AluOp) -> Lowering {
    Lowering::Op1 {
        op,
        flags: AluFlags::empty(),
    }
}

const fn op2(op: AluOp) -> Lowering {
    Lowering::Op2 {
        op,
        options: Op2Options::empty(),
    }
}

const fn op2_reversed(op: AluOp) -> Lowering {
    Lowering::Op2 {
        op,
        options: Op2Options::REVERSE,
    }
}

const fn op2_int(op: AluOp) -> Lowering {
    Lowering::Op2Int {
        op,
        options: Op2Options::empty(),
    }
}

const fn op2_int_reversed(op: AluOp) -> Lowering {
    Lowering::Op2Int {
        op,
        options: Op2Options::REVERSE,
    }
}

const fn op3(op: AluOp, shuffle: [u8; 3]) -> Lowering {
    Lowering::Op3 { op, shuffle }
}

const IN_ORDER: [u8; 3] = [0, 1, 2];
const SELECT: [u8; 3] = [0, 2, 1];

// =============================================================================
// TABLES
// =============================================================================

const COMMON: &[(GenericOp, Lowering)] = &[
    (GenericOp::Mov, op1(AluOp::Mov)),
    (GenericOp::Fneg, Lowering::Op1 { op: AluOp::Mov, flags: AluFlags::SRC0_NEG }),
    (GenericOp::Fabs, Lowering::Op1 { op: AluOp::Mov, flags: AluFlags::SRC0_ABS }),
    (GenericOp::Fsat, Lowering::Op1 { op: AluOp::Mov, flags: AluFlags::DST_CLAMP }),
    (GenericOp::Fadd, op2(AluOp::Add)),
    (GenericOp::Fsub, Lowering::Op2 { op: AluOp::Add, options: Op2Options::NEG_SRC1 }),
    (GenericOp::Fmul, op2(AluOp::MulIeee)),
    (GenericOp::Fmulz, op2(AluOp::Mul)),
    (GenericOp::Ffma, op3(AluOp::MuladdIeee, IN_ORDER)),
    (GenericOp::Ffmaz, op3(AluOp::Muladd, IN_ORDER)),
    (GenericOp::Fmax, op2(AluOp::MaxDx10)),
    (GenericOp::Fmin, op2(AluOp::MinDx10)),
    (GenericOp::Fceil, op1(AluOp::Ceil)),
    (GenericOp::Ffloor, op1(AluOp::Floor)),
    (GenericOp::Ffract, op1(AluOp::Fract)),
    (GenericOp::Ftrunc, op1(AluOp::Trunc)),
    (GenericOp::FroundEven, op1(AluOp::Rndne)),
    (GenericOp::Feq, op2(AluOp::SeteDx10)),
    (GenericOp::Fneu, op2(AluOp::SetneDx10)),
    (GenericOp::Flt, op2_reversed(AluOp::SetgtDx10)),
    (GenericOp::Fge, op2(AluOp::SetgeDx10)),
    (GenericOp::Slt, op2_reversed(AluOp::Setgt)),
    (GenericOp::Sge, op2(AluOp::Setge)),
    (GenericOp::Seq, op2(AluOp::Sete)),
    (GenericOp::Sne, op2(AluOp::Setne)),
    (GenericOp::Fcsel, op3(AluOp::Cnde, SELECT)),
    (GenericOp::FcselGe, op3(AluOp::Cndge, IN_ORDER)),
    (GenericOp::FcselGt, op3(AluOp::Cndgt, IN_ORDER)),
    (GenericOp::Fdot2, Lowering::Dot(2)),
    (GenericOp::Fdot3, Lowering::Dot(3)),
    (GenericOp::Fdot4, Lowering::Dot(4)),
    (GenericOp::Fdph, Lowering::Fdph),
    (GenericOp::AllFequal2, Lowering::AnyAllFloat2(AluOp::SeteDx10)),
    (GenericOp::AllFequal3, Lowering::AnyAllFloat { op: AluOp::Sete, components: 3, all: true }),
    (GenericOp::AllFequal4, Lowering::AnyAllFloat { op: AluOp::Sete, components: 4, all: true }),
    (GenericOp::AnyFnequal2, Lowering::AnyAllFloat2(AluOp::SetneDx10)),
    (GenericOp::AnyFnequal3, Lowering::AnyAllFloat { op: AluOp::Setne, components: 3, all: false }),
    (GenericOp::AnyFnequal4, Lowering::AnyAllFloat { op: AluOp::Setne, components: 4, all: false }),
    (GenericOp::AllIequal2, Lowering::AnyAllInt { op: AluOp::SeteInt, components: 2, all: true }),
    (GenericOp::AllIequal3, Lowering::AnyAllInt { op: AluOp::SeteInt, components: 3, all: true }),
    (GenericOp::AllIequal4, Lowering::AnyAllInt { op: AluOp::SeteInt, components: 4, all: true }),
    (GenericOp::AnyInequal2, Lowering::AnyAllInt { op: AluOp::SetneInt, components: 2, all: false }),
    (GenericOp::AnyInequal3, Lowering::AnyAllInt { op: AluOp::SetneInt, components: 3, all: false }),
    (GenericOp::AnyInequal4, Lowering::AnyAllInt { op: AluOp::SetneInt, components: 4, all: false }),
    (GenericOp::F2b32, Lowering::CombineWithZero(AluOp::SetneDx10)),
    (GenericOp::I2b32, Lowering::CompareZero(AluOp::SetneInt)),
    (GenericOp::B2f32, Lowering::BoolToNumber(InlineConstant::One)),
    (GenericOp::B2i32, Lowering::BoolToNumber(InlineConstant::OneInt)),
    (GenericOp::B2b32, op1(AluOp::Mov)),
    (GenericOp::Iadd, op2_int(AluOp::AddInt)),
    (GenericOp::Isub, op2_int(AluOp::SubInt)),
    (GenericOp::Ineg, Lowering::CombineWithZero(AluOp::SubInt)),
    (GenericOp::Iand, op2_int(AluOp::AndInt)),
    (GenericOp::Ior, op2_int(AluOp::OrInt)),
    (GenericOp::Ixor, op2_int(AluOp::XorInt)),
    (GenericOp::Inot, op1(AluOp::NotInt)),
    (GenericOp::Umul24, op2(AluOp::MulUint24)),
    (GenericOp::Umad24, op3(AluOp::MuladdUint24, IN_ORDER)),
    (GenericOp::Imax, op2_int(AluOp::MaxInt)),
    (GenericOp::Imin, op2_int(AluOp::MinInt)),
    (GenericOp::Umax, op2_int(AluOp::MaxUint)),
    (GenericOp::Umin, op2_int(AluOp::MinUint)),
    (GenericOp::Ieq, op2_int(AluOp::SeteInt)),
    (GenericOp::Ine, op2_int(AluOp::SetneInt)),
    (GenericOp::Ilt, op2_int_reversed(AluOp::SetgtInt)),
    (GenericOp::Ige, op2_int(AluOp::SetgeInt)),
    (GenericOp::Ult, op2_int_reversed(AluOp::SetgtUint)),
    (GenericOp::Uge, op2_int(AluOp::SetgeUint)),
    (GenericOp::B32csel, op3(AluOp::CndeInt, SELECT)),
    (GenericOp::I32cselGe, op3(AluOp::CndgeInt, IN_ORDER)),
    (GenericOp::I32cselGt, op3(AluOp::CndgtInt, IN_ORDER)),
    (GenericOp::Ibfe, op3(AluOp::BfeInt, IN_ORDER)),
    (GenericOp::Ubfe, op3(AluOp::BfeUint, IN_ORDER)),
    (GenericOp::Bfm, op2_int(AluOp::BfmInt)),
    (GenericOp::BitfieldSelect, op3(AluOp::BfiInt, IN_ORDER)),
    (GenericOp::BitCount, op1(AluOp::BcntInt)),
    (GenericOp::BitfieldReverse, op1(AluOp::BfrevInt)),
    (GenericOp::FindLsb, op1(AluOp::FfblInt)),
    (GenericOp::IfindMsbRev, op1(AluOp::FfbhInt)),
    (GenericOp::UfindMsbRev, op1(AluOp::FfbhUint)),
    (GenericOp::Vec2, Lowering::CreateVec(2)),
    (GenericOp::Vec3, Lowering::CreateVec(3)),
    (GenericOp::Vec4, Lowering::CreateVec(4)),
    (GenericOp::Pack64_2x32, Lowering::Pack64),
    (GenericOp::Unpack64_2x32, Lowering::Unpack64),
    (GenericOp::Pack64_2x32Split, Lowering::Pack64Split),
    (GenericOp::Unpack64_2x32SplitX, Lowering::Unpack64Split(0)),
    (GenericOp::Unpack64_2x32SplitY, Lowering::Unpack64Split(1)),
    (GenericOp::PackHalf2x16Split, Lowering::PackHalfSplit),
    (GenericOp::UnpackHalf2x16SplitX, Lowering::UnpackHalfSplitX),
    (GenericOp::UnpackHalf2x16SplitY, Lowering::UnpackHalfSplitY),
    (GenericOp::Fddx, Lowering::Gradient { op: GradientOp::Horizontal, fine: false }),
    (GenericOp::FddxCoarse, Lowering::Gradient { op: GradientOp::Horizontal, fine: false }),
    (GenericOp::FddxFine, Lowering::Gradient { op: GradientOp::Horizontal, fine: true }),
    (GenericOp::Fddy, Lowering::Gradient { op: GradientOp::Vertical, fine: false }),
    (GenericOp::FddyCoarse, Lowering::Gradient { op: GradientOp::Vertical, fine: false }),
    (GenericOp::FddyFine, Lowering::Gradient { op: GradientOp::Vertical, fine: true }),
    (GenericOp::Cube, Lowering::Cube),
];

/// Generations with a transcendental lane
const TRANS_LANE: &[(GenericOp, Lowering)] = &[
    (GenericOp::Fsqrt, Lowering::Trans(AluOp::SqrtIeee)),
    (GenericOp::Frcp, Lowering::Trans(AluOp::RecipIeee)),
    (GenericOp::Frsq, Lowering::Trans(AluOp::RecipsqrtIeee)),
    (GenericOp::Fexp2, Lowering::Trans(AluOp::ExpIeee)),
    (GenericOp::Flog2, Lowering::Trans(AluOp::LogClamped)),
    (GenericOp::Fsin, Lowering::Trans(AluOp::Sin)),
    (GenericOp::Fcos, Lowering::Trans(AluOp::Cos)),
    (GenericOp::F2i32, Lowering::Trans(AluOp::FltToInt)),
    (GenericOp::F2u32, Lowering::Trans(AluOp::FltToUint)),
    (GenericOp::I2f32, Lowering::Trans(AluOp::IntToFlt)),
    (GenericOp::U2f32, Lowering::Trans(AluOp::UintToFlt)),
    (GenericOp::Imul, Lowering::Trans2(AluOp::MulloInt)),
    (GenericOp::ImulHigh, Lowering::Trans2(AluOp::MulhiInt)),
    (GenericOp::UmulHigh, Lowering::Trans2(AluOp::MulhiUint)),
];

const CAYMAN: &[(GenericOp, Lowering)] = &[
    (GenericOp::Fsqrt, Lowering::CaymanTrans(AluOp::SqrtIeee)),
    (GenericOp::Frcp, Lowering::CaymanTrans(AluOp::RecipIeee)),
    (GenericOp::Frsq, Lowering::CaymanTrans(AluOp::RecipsqrtIeee)),
    (GenericOp::Fexp2, Lowering::CaymanTrans(AluOp::ExpIeee)),
    (GenericOp::Flog2, Lowering::CaymanTrans(AluOp::LogClamped)),
    (GenericOp::Fsin, Lowering::CaymanTrans(AluOp::Sin)),
    (GenericOp::Fcos, Lowering::CaymanTrans(AluOp::Cos)),
    (GenericOp::F2i32, op1(AluOp::FltToInt)),
    (GenericOp::F2u32, op1(AluOp::FltToUint)),
    (GenericOp::I2f32, op1(AluOp::IntToFlt)),
    (GenericOp::U2f32, op1(AluOp::UintToFlt)),
    (GenericOp::Imul, Lowering::CaymanTrans2(AluOp::MulloInt)),
    (GenericOp::ImulHigh, Lowering::CaymanTrans2(AluOp::MulhiInt)),
    (GenericOp::UmulHigh, Lowering::CaymanTrans2(AluOp::MulhiUint)),
];

/// R600 shifts only run on the trans lane
const R600_SHIFTS: &[(GenericOp, Lowering)] = &[
    (GenericOp::Ishl, Lowering::Trans2(AluOp::LshlInt)),
    (GenericOp::Ishr, Lowering::Trans2(AluOp::AshrInt)),
    (GenericOp::Ushr, Lowering::Trans2(AluOp::LshrInt)),
];

const VECTOR_SHIFTS: &[(GenericOp, Lowering)] = &[
    (GenericOp::Ishl, op2_int(AluOp::LshlInt)),
    (GenericOp::Ishr, op2_int(AluOp::AshrInt)),
    (GenericOp::Ushr, op2_int(AluOp::LshrInt)),
];

const EVERGREEN: &[(GenericOp, Lowering)] = &[
    (GenericOp::F2i32, Lowering::TruncToInt(AluOp::FltToInt)),
    (GenericOp::F2u32, Lowering::TruncToInt(AluOp::FltToUint)),
];

/// Operations with 64-bit operands
const WIDE: &[(GenericOp, Lowering)] = &[
    (GenericOp::Mov, Lowering::Mov64),
    (GenericOp::Fneg, Lowering::Neg64),
    (GenericOp::Fabs, Lowering::Abs64),
    (GenericOp::Ffract, Lowering::Op1Wide(AluOp::Fract64)),
    (GenericOp::Fadd, Lowering::Op2Wide(AluOp::Add64)),
    (GenericOp::Fmul, Lowering::Op2Wide(AluOp::Mul64)),
    (GenericOp::Fmax, Lowering::Op2Wide(AluOp::Max64)),
    (GenericOp::Fmin, Lowering::Op2Wide(AluOp::Min64)),
    (GenericOp::Feq, Lowering::Compare64 { op: AluOp::Sete64, reverse: false }),
    (GenericOp::Fneu, Lowering::Compare64 { op: AluOp::Setne64, reverse: false }),
    (GenericOp::Fge, Lowering::Compare64 { op: AluOp::Setge64, reverse: false }),
    (GenericOp::Flt, Lowering::Compare64 { op: AluOp::Setgt64, reverse: true }),
    (GenericOp::Ffma, Lowering::Fma64),
    (GenericOp::Fsqrt, Lowering::Trans64(AluOp::Sqrt64)),
    (GenericOp::Frcp, Lowering::Trans64(AluOp::Recip64)),
    (GenericOp::Frsq, Lowering::Trans64(AluOp::Recipsqrt64)),
    (GenericOp::B2f64, Lowering::BoolToDouble),
    (GenericOp::F2f64, Lowering::FloatToDouble),
    (GenericOp::I2f64, Lowering::IntToDouble(AluOp::IntToFlt)),
    (GenericOp::U2f64, Lowering::IntToDouble(AluOp::UintToFlt)),
    (GenericOp::F2f32, Lowering::DoubleToFloat),
    (GenericOp::Vec2, Lowering::Vec2Wide),
];

fn insert(table: &mut Table, wide: bool, entries: &[(GenericOp, Lowering)]) {
    table.extend(entries.iter().map(|&(op, lowering)| ((wide, op), lowering)));
}

fn build(chip: ChipClass) -> Table {
    let mut table = Table::new();
    insert(&mut table, false, COMMON);
    match chip {
        ChipClass::Cayman => insert(&mut table, false, CAYMAN),
        _ => insert(&mut table, false, TRANS_LANE),
    }
    match chip {
        ChipClass::R600 => insert(&mut table, false, R600_SHIFTS),
        _ => insert(&mut table, false, VECTOR_SHIFTS),
    }
    if chip == ChipClass::Evergreen {
        insert(&mut table, false, EVERGREEN);
    }
    if matches!(chip, ChipClass::Evergreen | ChipClass::Cayman) {
        insert(&mut table, true, WIDE);
    }
    log::debug!("{}: {} lowering entries", chip, table.len());
    table
}

// =============================================================================
// LOOKUP
// =============================================================================

/// Lowering table of one generation
pub fn table(chip: ChipClass) -> &'static HashMap<(bool, GenericOp), Lowering> {
    static TABLES: [Once<Table>; 4] = [Once::new(), Once::new(), Once::new(), Once::new()];
    TABLES[chip.index()].call_once(|| build(chip))
}

/// How `op` is lowered on `chip`
///
/// Packing operations split their 64-bit operands into halves and always
/// use the 32-bit entries.
pub fn lookup(chip: ChipClass, is_64bit: bool, op: GenericOp) -> Option<Lowering> {
    let wide = is_64bit && !op.splits_64bit();
    table(chip).get(&(wide, op)).copied()
}

/// Whether `op` can be lowered on `chip`
pub fn supports(chip: ChipClass, is_64bit: bool, op: GenericOp) -> bool {
    lookup(chip, is_64bit, op).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_chip_lowers_32bit_ops() {
        for chip in ChipClass::ALL {
            for &op in GenericOp::ALL {
                if matches!(op, GenericOp::B2f64 | GenericOp::F2f64 | GenericOp::I2f64 | GenericOp::U2f64 | GenericOp::F2f32) {
                    continue;
                }
                assert!(supports(chip, false, op), "{} missing on {}", op, chip);
            }
        }
    }

    #[test]
    fn test_r600_shifts_on_trans() {
        assert_eq!(lookup(ChipClass::R600, false, GenericOp::Ishl), Some(Lowering::Trans2(AluOp::LshlInt)));
        assert_eq!(lookup(ChipClass::R700, false, GenericOp::Ushr), Some(op2_int(AluOp::LshrInt)));
        assert_eq!(lookup(ChipClass::Cayman, false, GenericOp::Ishr), Some(op2_int(AluOp::AshrInt)));
    }

    #[test]
    fn test_generation_overrides() {
        assert_eq!(
            lookup(ChipClass::Evergreen, false, GenericOp::F2i32),
            Some(Lowering::TruncToInt(AluOp::FltToInt))
        );
        assert_eq!(lookup(ChipClass::R700, false, GenericOp::F2i32), Some(Lowering::Trans(AluOp::FltToInt)));
        assert_eq!(lookup(ChipClass::Cayman, false, GenericOp::F2i32), Some(op1(AluOp::FltToInt)));
        assert_eq!(lookup(ChipClass::Cayman, false, GenericOp::Fsin), Some(Lowering::CaymanTrans(AluOp::Sin)));
        assert_eq!(lookup(ChipClass::Evergreen, false, GenericOp::Fsin), Some(Lowering::Trans(AluOp::Sin)));
    }

    #[test]
    fn test_wide_table() {
        assert_eq!(lookup(ChipClass::Evergreen, true, GenericOp::Fadd), Some(Lowering::Op2Wide(AluOp::Add64)));
        assert_eq!(lookup(ChipClass::Cayman, true, GenericOp::Fsin), None);
        assert_eq!(lookup(ChipClass::R700, true, GenericOp::Fadd), None);
        // packing falls back to the 32-bit entries
        assert_eq!(lookup(ChipClass::R600, true, GenericOp::Unpack64_2x32SplitX), Some(Lowering::Unpack64Split(0)));
    }

    #[test]
    fn test_table_built_once() {
        let a = table(ChipClass::Evergreen) as *const Table;
        let b = table(ChipClass::Evergreen) as *const Table;
        assert_eq!(a, b);
        assert_ne!(a, table(ChipClass::Cayman) as *const Table);
    }
}
