//! Elementwise emitters: one instruction per written component, `LAST` on
//! the final one.

#[cfg(not(feature = "std"))]
use alloc::vec;

use terascale_ir::{AluFlags, AluInstr, AluOp, InlineConstant};

use super::{clamp, pin_for_components, src_modifiers, Op2Options};
use crate::error::Result;
use crate::op::AluOperation;
use crate::shader::Shader;

/// `op(src)` per component
///
/// `forced` adds modifiers on top of the source's own; a forced negate
/// toggles the source negate.
pub(crate) fn emit_op1(shader: &mut Shader, alu: &AluOperation, op: AluOp, forced: AluFlags) -> Result<()> {
    let src = &alu.srcs[0];
    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for i in alu.dest.written() {
        let mut flags = AluFlags::WRITE;
        if src.abs || forced.contains(AluFlags::SRC0_ABS) {
            flags |= AluFlags::SRC0_ABS;
        }
        if src.negate ^ forced.contains(AluFlags::SRC0_NEG) {
            flags |= AluFlags::SRC0_NEG;
        }
        if alu.dest.saturate || forced.contains(AluFlags::DST_CLAMP) {
            flags |= AluFlags::DST_CLAMP;
        }
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let s = shader.src(src, i);
        last = Some(shader.emit(AluInstr::new(op, Some(dest), vec![s], flags)));
    }
    shader.finish(last);
    Ok(())
}

/// `op(src0, src1)` per component
pub(crate) fn emit_op2(shader: &mut Shader, alu: &AluOperation, op: AluOp, options: Op2Options) -> Result<()> {
    let op = shader.math_op(op);
    let (mut src0, mut src1) = (&alu.srcs[0], &alu.srcs[1]);
    if options.contains(Op2Options::REVERSE) {
        core::mem::swap(&mut src0, &mut src1);
    }
    let src1_negate = src1.negate ^ options.contains(Op2Options::NEG_SRC1);

    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for i in alu.dest.written() {
        let mut flags = AluFlags::WRITE | src_modifiers(src0, 0) | clamp(&alu.dest);
        if src1_negate {
            flags |= AluFlags::SRC1_NEG;
        }
        if src1.abs {
            flags |= AluFlags::SRC1_ABS;
        }
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let a = shader.src(src0, i);
        let b = shader.src(src1, i);
        last = Some(shader.emit(AluInstr::new(op, Some(dest), vec![a, b], flags)));
    }
    shader.finish(last);
    Ok(())
}

/// Integer `op(src0, src1)` per component
///
/// # Panics
///
/// If a source carries a float modifier.
pub(crate) fn emit_op2_int(shader: &mut Shader, alu: &AluOperation, op: AluOp, options: Op2Options) -> Result<()> {
    for src in &alu.srcs[..2] {
        assert!(!src.negate && !src.abs, "{}: integer source with float modifier", alu.op);
    }
    emit_op2(shader, alu, op, options)
}

/// `op(src[shuffle[0]], src[shuffle[1]], src[shuffle[2]])` per component
///
/// # Panics
///
/// If a source carries the absolute-value modifier, which three-source
/// encodings lack.
pub(crate) fn emit_op3(shader: &mut Shader, alu: &AluOperation, op: AluOp, shuffle: [u8; 3]) -> Result<()> {
    let op = shader.math_op(op);
    let srcs = shuffle.map(|s| &alu.srcs[s as usize]);
    for src in srcs {
        assert!(!src.abs, "{}: three-source instructions have no abs modifier", alu.op);
    }

    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for i in alu.dest.written() {
        let mut flags = AluFlags::WRITE | clamp(&alu.dest);
        for (slot, src) in srcs.iter().enumerate() {
            if src.negate {
                flags |= AluFlags::neg(slot);
            }
        }
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let values = vec![shader.src(srcs[0], i), shader.src(srcs[1], i), shader.src(srcs[2], i)];
        last = Some(shader.emit(AluInstr::new(op, Some(dest), values, flags)));
    }
    shader.finish(last);
    Ok(())
}

/// Booleans are all-ones or zero: masking with the representation of
/// "true" converts them
pub(crate) fn emit_bool_to_number(shader: &mut Shader, alu: &AluOperation, value: InlineConstant) -> Result<()> {
    let src = &alu.srcs[0];
    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for i in alu.dest.written() {
        let flags = AluFlags::WRITE | src_modifiers(src, 0);
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let s = shader.src(src, i);
        let mask = shader.inline_const(value);
        last = Some(shader.emit(AluInstr::new(AluOp::AndInt, Some(dest), vec![s, mask], flags)));
    }
    shader.finish(last);
    Ok(())
}

/// `op(src, 0)` per component, or `op(0, src)` when `zero_first`
pub(crate) fn emit_with_zero(shader: &mut Shader, alu: &AluOperation, op: AluOp, zero_first: bool) -> Result<()> {
    let src = &alu.srcs[0];
    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for i in alu.dest.written() {
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let s = shader.src(src, i);
        let zero = shader.zero();
        let values = if zero_first { vec![zero, s] } else { vec![s, zero] };
        last = Some(shader.emit(AluInstr::new(op, Some(dest), values, AluFlags::WRITE)));
    }
    shader.finish(last);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaderConfig;
    use crate::op::{DestDescriptor, GenericOp, SrcDescriptor};
    use terascale_ir::{ChipClass, InstrId, Pin, Value};

    fn shader() -> Shader {
        Shader::new(ShaderConfig::new(ChipClass::Evergreen))
    }

    fn last_flags(sh: &Shader) -> Vec<bool> {
        sh.program()
            .emitted_instrs()
            .into_iter()
            .map(|id| sh.program().instr(id).has_flag(AluFlags::LAST))
            .collect()
    }

    #[test]
    fn test_op1_per_component() {
        let mut sh = shader();
        let alu = AluOperation::new(
            GenericOp::Ffloor,
            DestDescriptor::ssa(1, 3).with_write_mask(0b101),
            vec![SrcDescriptor::ssa(0).absolute()],
        );
        sh.lower_alu(&alu).unwrap();
        assert_eq!(last_flags(&sh), [false, true]);
        let second = sh.program().instr(InstrId(1));
        assert_eq!(second.alu_op(), Some(AluOp::Floor));
        assert!(second.has_flag(AluFlags::SRC0_ABS));
        let dest = second.dest().unwrap();
        assert_eq!(sh.program().values().register(dest).chan(), 2);
        assert_eq!(sh.program().values().register(dest).pin(), Pin::None);
    }

    #[test]
    fn test_forced_negate_toggles() {
        let mut sh = shader();
        let alu = AluOperation::new(GenericOp::Fneg, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0).negated()]);
        sh.lower_alu(&alu).unwrap();
        let mov = sh.program().instr(InstrId(0));
        assert_eq!(mov.alu_op(), Some(AluOp::Mov));
        assert!(!mov.has_flag(AluFlags::SRC0_NEG));
        assert_eq!(sh.program().values().register(mov.dest().unwrap()).pin(), Pin::Free);
    }

    #[test]
    fn test_fsat_clamps() {
        let mut sh = shader();
        let alu = AluOperation::new(GenericOp::Fsat, DestDescriptor::ssa(1, 2), vec![SrcDescriptor::ssa(0)]);
        sh.lower_alu(&alu).unwrap();
        for id in sh.program().emitted_instrs() {
            assert!(sh.program().instr(id).has_flag(AluFlags::DST_CLAMP));
        }
    }

    #[test]
    fn test_fsub_negates_src1() {
        let mut sh = shader();
        let alu = AluOperation::new(
            GenericOp::Fsub,
            DestDescriptor::ssa(2, 1),
            vec![SrcDescriptor::ssa(0), SrcDescriptor::ssa(1)],
        );
        sh.lower_alu(&alu).unwrap();
        let add = sh.program().instr(InstrId(0));
        assert_eq!(add.alu_op(), Some(AluOp::Add));
        assert!(add.has_flag(AluFlags::SRC1_NEG));
        assert!(!add.has_flag(AluFlags::SRC0_NEG));
        assert!(add.has_flag(AluFlags::LAST));
    }

    #[test]
    fn test_flt_reverses_sources() {
        let mut sh = shader();
        let a = SrcDescriptor::ssa(0).negated();
        let b = SrcDescriptor::ssa(1);
        let alu = AluOperation::new(GenericOp::Flt, DestDescriptor::ssa(2, 1), vec![a, b]);
        sh.lower_alu(&alu).unwrap();
        let expected = [sh.src(&b, 0), sh.src(&a, 0)];
        let set = sh.program().instr(InstrId(0));
        assert_eq!(set.alu_op(), Some(AluOp::SetgtDx10));
        assert_eq!(set.sources(), &expected);
        assert!(set.has_flag(AluFlags::SRC1_NEG));
        assert!(!set.has_flag(AluFlags::SRC0_NEG));
    }

    #[test]
    fn test_fmul_legacy_rules() {
        let srcs = vec![SrcDescriptor::ssa(0), SrcDescriptor::ssa(1)];
        let alu = AluOperation::new(GenericOp::Fmul, DestDescriptor::ssa(2, 1), srcs);

        let mut sh = shader();
        sh.lower_alu(&alu).unwrap();
        assert_eq!(sh.program().instr(InstrId(0)).alu_op(), Some(AluOp::MulIeee));

        let mut sh = Shader::new(ShaderConfig::new(ChipClass::Evergreen).with_legacy_math_rules(true));
        sh.lower_alu(&alu).unwrap();
        assert_eq!(sh.program().instr(InstrId(0)).alu_op(), Some(AluOp::Mul));
    }

    #[test]
    fn test_fcsel_shuffle() {
        let mut sh = shader();
        let srcs = vec![SrcDescriptor::ssa(0), SrcDescriptor::ssa(1), SrcDescriptor::ssa(2).negated()];
        let alu = AluOperation::new(GenericOp::Fcsel, DestDescriptor::ssa(3, 1), srcs.clone());
        sh.lower_alu(&alu).unwrap();
        let expected = [sh.src(&srcs[0], 0), sh.src(&srcs[2], 0), sh.src(&srcs[1], 0)];
        let cnd = sh.program().instr(InstrId(0));
        assert_eq!(cnd.alu_op(), Some(AluOp::Cnde));
        assert_eq!(cnd.sources(), &expected);
        assert!(cnd.has_flag(AluFlags::SRC1_NEG));
        assert!(cnd.has_flag(AluFlags::OP3));
    }

    #[test]
    fn test_b2f_masks_with_one() {
        let mut sh = shader();
        let alu = AluOperation::new(GenericOp::B2f32, DestDescriptor::ssa(1, 2), vec![SrcDescriptor::ssa(0)]);
        sh.lower_alu(&alu).unwrap();
        for id in sh.program().emitted_instrs() {
            let and = sh.program().instr(id);
            assert_eq!(and.alu_op(), Some(AluOp::AndInt));
            assert_eq!(and.src(1), &Value::one());
        }
        assert_eq!(last_flags(&sh), [false, true]);
    }

    #[test]
    fn test_ineg_subtracts_from_zero() {
        let mut sh = shader();
        let alu = AluOperation::new(GenericOp::Ineg, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        sh.lower_alu(&alu).unwrap();
        let sub = sh.program().instr(InstrId(0));
        assert_eq!(sub.alu_op(), Some(AluOp::SubInt));
        assert_eq!(sub.src(0), &Value::zero());
    }

    #[test]
    #[should_panic(expected = "integer source with float modifier")]
    fn test_integer_modifier_rejected() {
        let mut sh = shader();
        let alu = AluOperation::new(
            GenericOp::Iadd,
            DestDescriptor::ssa(2, 1),
            vec![SrcDescriptor::ssa(0).negated(), SrcDescriptor::ssa(1)],
        );
        let _ = sh.lower_alu(&alu);
    }
}
