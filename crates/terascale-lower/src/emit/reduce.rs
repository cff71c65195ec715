//! Reductions across components: dot products and boolean any/all.
//!
//! The hardware has no three- or four-way boolean reduce. Two float
//! components are combined with one bitwise op; three and four go through
//! a `MAX4` over a channel-grouped temporary; integer compares are folded
//! pairwise.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use terascale_ir::{AluFlags, AluInstr, AluOp, Pin, RegId, Value};

use super::{clamp, src_modifiers};
use crate::error::{LowerError, Result};
use crate::op::AluOperation;
use crate::shader::Shader;

fn dot4(shader: &mut Shader, alu: &AluOperation, srcs: Vec<Value>) {
    let op = shader.math_op(AluOp::Dot4Ieee);
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    let flags = AluFlags::last_write()
        | src_modifiers(&alu.srcs[0], 0)
        | src_modifiers(&alu.srcs[1], 1)
        | clamp(&alu.dest);
    shader.emit(AluInstr::with_slots(op, Some(dest), srcs, flags, 4));
}

/// Dot product of the first `n` components, zero padded to four lanes
pub(crate) fn emit_dot(shader: &mut Shader, alu: &AluOperation, n: u8) -> Result<()> {
    let mut srcs = Vec::with_capacity(8);
    for i in 0..4 {
        if i < n as usize {
            srcs.push(shader.src(&alu.srcs[0], i));
            srcs.push(shader.src(&alu.srcs[1], i));
        } else {
            srcs.extend([shader.zero(), shader.zero()]);
        }
    }
    dot4(shader, alu, srcs);
    Ok(())
}

/// `dot(a.xyz, b.xyz) + 1.0 * b.w`
pub(crate) fn emit_fdph(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let mut srcs = Vec::with_capacity(8);
    for i in 0..3 {
        srcs.push(shader.src(&alu.srcs[0], i));
        srcs.push(shader.src(&alu.srcs[1], i));
    }
    srcs.push(shader.one());
    srcs.push(shader.src(&alu.srcs[1], 3));
    dot4(shader, alu, srcs);
    Ok(())
}

fn compare_flags(alu: &AluOperation) -> AluFlags {
    src_modifiers(&alu.srcs[0], 0) | src_modifiers(&alu.srcs[1], 1)
}

/// Two float compares combined with `OR_INT` (any) or `AND_INT` (all)
pub(crate) fn emit_any_all_fcomp2(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let tmp = [shader.temp_register(), shader.temp_register()];
    let mut last = None;
    for (i, t) in tmp.into_iter().enumerate() {
        let a = shader.src(&alu.srcs[0], i);
        let b = shader.src(&alu.srcs[1], i);
        let flags = AluFlags::WRITE | compare_flags(alu);
        last = Some(shader.emit(AluInstr::new(op, Some(t), vec![a, b], flags)));
    }
    shader.finish(last);

    let combine = if op == AluOp::SetneDx10 {
        AluOp::OrInt
    } else {
        AluOp::AndInt
    };
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    shader.emit(AluInstr::new(
        combine,
        Some(dest),
        vec![tmp[0].into(), tmp[1].into()],
        AluFlags::last_write(),
    ));
    Ok(())
}

/// Three or four float compares reduced with `MAX4`
///
/// Compares yield 1.0 or 0.0. "all" negates them so the maximum is 0 only
/// when every compare held; missing lanes are padded so they never decide
/// the outcome. The final compare against 1.0 turns the maximum back into
/// a boolean.
pub(crate) fn emit_any_all_fcomp(
    shader: &mut Shader,
    alu: &AluOperation,
    op: AluOp,
    components: u8,
    all: bool,
) -> Result<()> {
    let nc = components as usize;
    if !(3..=4).contains(&nc) {
        return Err(LowerError::InvalidComponentCount { op: alu.op, components });
    }

    let v = shader.temp_vec4(Pin::Group);
    let pad = if all { shader.one() } else { shader.zero() };
    let mut max_srcs: Vec<Value> = v[..nc].iter().map(|&r| r.into()).collect();
    max_srcs.resize(4, pad);

    let mut last = None;
    for (i, &t) in v[..nc].iter().enumerate() {
        let a = shader.src(&alu.srcs[0], i);
        let b = shader.src(&alu.srcs[1], i);
        let flags = AluFlags::WRITE | compare_flags(alu);
        last = Some(shader.emit(AluInstr::new(op, Some(t), vec![a, b], flags)));
    }
    shader.finish(last);

    let max_val = shader.temp_register();
    let mut flags = AluFlags::last_write();
    if all {
        flags |= AluFlags::SRC0_NEG;
    }
    shader.emit(AluInstr::with_slots(AluOp::Max4, Some(max_val), max_srcs, flags, 4));

    let equal = op == AluOp::Sete;
    let final_op = if equal == all {
        AluOp::SeteDx10
    } else {
        AluOp::SetneDx10
    };
    let mut flags = AluFlags::last_write();
    if all {
        flags |= AluFlags::SRC1_NEG;
    }
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    let one = shader.one();
    shader.emit(AluInstr::new(final_op, Some(dest), vec![max_val.into(), one], flags));
    Ok(())
}

/// Integer compares folded pairwise with `AND_INT` (all) or `OR_INT` (any)
pub(crate) fn emit_any_all_icomp(
    shader: &mut Shader,
    alu: &AluOperation,
    op: AluOp,
    components: u8,
    all: bool,
) -> Result<()> {
    let nc = components as usize;
    if !(2..=4).contains(&nc) {
        return Err(LowerError::InvalidComponentCount { op: alu.op, components });
    }
    for src in &alu.srcs[..2] {
        assert!(!src.negate && !src.abs, "{}: integer source with float modifier", alu.op);
    }

    let combine = if all { AluOp::AndInt } else { AluOp::OrInt };
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    let v: Vec<_> = (0..nc + nc / 2).map(|_| shader.temp_register()).collect();

    let mut last = None;
    for i in 0..nc {
        let a = shader.src(&alu.srcs[0], i);
        let b = shader.src(&alu.srcs[1], i);
        last = Some(shader.emit(AluInstr::new(op, Some(v[i]), vec![a, b], AluFlags::WRITE)));
    }
    shader.finish(last);

    let fold = |shader: &mut Shader, d: RegId, a: usize, b: usize, flags: AluFlags| {
        shader.emit(AluInstr::new(combine, Some(d), vec![v[a].into(), v[b].into()], flags));
    };
    match nc {
        2 => fold(shader, dest, 0, 1, AluFlags::last_write()),
        3 => {
            fold(shader, v[3], 0, 1, AluFlags::last_write());
            fold(shader, dest, 3, 2, AluFlags::last_write());
        },
        _ => {
            fold(shader, v[4], 0, 1, AluFlags::WRITE);
            fold(shader, v[5], 2, 3, AluFlags::last_write());
            fold(shader, dest, 4, 5, AluFlags::last_write());
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaderConfig;
    use crate::op::{DestDescriptor, GenericOp, SrcDescriptor};
    use terascale_ir::{ChipClass, InstrId};

    fn lower(chip: ChipClass, op: GenericOp) -> Shader {
        let mut sh = Shader::new(ShaderConfig::new(chip));
        let a = SrcDescriptor::ssa(0);
        let b = SrcDescriptor::ssa(1);
        sh.lower_alu(&AluOperation::new(op, DestDescriptor::ssa(2, 1), vec![a, b]))
            .unwrap();
        sh
    }

    fn ops(sh: &Shader) -> Vec<AluOp> {
        sh.program()
            .emitted_instrs()
            .into_iter()
            .filter_map(|id| sh.program().instr(id).alu_op())
            .collect()
    }

    #[test]
    fn test_dot3_pads_with_zero() {
        let sh = lower(ChipClass::Evergreen, GenericOp::Fdot3);
        let dot = sh.program().instr(InstrId(0));
        assert_eq!(dot.alu_op(), Some(AluOp::Dot4Ieee));
        assert_eq!(dot.slots(), 4);
        assert_eq!(dot.slot_sources(3), &[Value::zero(), Value::zero()]);
        assert!(dot.has_flag(AluFlags::LAST));
        let dest = dot.dest().unwrap();
        assert_eq!(sh.program().values().register(dest).pin(), Pin::Free);
    }

    #[test]
    fn test_dot4_legacy() {
        let mut sh = Shader::new(ShaderConfig::new(ChipClass::R700).with_legacy_math_rules(true));
        let alu = AluOperation::new(
            GenericOp::Fdot4,
            DestDescriptor::ssa(2, 1).saturated(),
            vec![SrcDescriptor::ssa(0).negated(), SrcDescriptor::ssa(1)],
        );
        sh.lower_alu(&alu).unwrap();
        let dot = sh.program().instr(InstrId(0));
        assert_eq!(dot.alu_op(), Some(AluOp::Dot4));
        assert!(dot.has_flag(AluFlags::SRC0_NEG | AluFlags::DST_CLAMP));
    }

    #[test]
    fn test_fdph_reads_w() {
        let mut sh = lower(ChipClass::Cayman, GenericOp::Fdph);
        let w = sh.src(&SrcDescriptor::ssa(1), 3);
        let dot = sh.program().instr(InstrId(0));
        assert_eq!(dot.slot_sources(3), &[Value::one(), w]);
    }

    #[test]
    fn test_any_fnequal2() {
        let sh = lower(ChipClass::Evergreen, GenericOp::AnyFnequal2);
        assert_eq!(ops(&sh), [AluOp::SetneDx10, AluOp::SetneDx10, AluOp::OrInt]);
        let flags: Vec<bool> = sh
            .program()
            .emitted_instrs()
            .into_iter()
            .map(|id| sh.program().instr(id).has_flag(AluFlags::LAST))
            .collect();
        assert_eq!(flags, [false, true, true]);
    }

    #[test]
    fn test_all_fequal3_through_max4() {
        let sh = lower(ChipClass::Evergreen, GenericOp::AllFequal3);
        assert_eq!(
            ops(&sh),
            [AluOp::Sete, AluOp::Sete, AluOp::Sete, AluOp::Max4, AluOp::SeteDx10]
        );
        let max = sh.program().instr(InstrId(3));
        assert!(max.has_flag(AluFlags::SRC0_NEG));
        assert_eq!(max.slot_sources(3), &[Value::one()]);
        let set = sh.program().instr(InstrId(4));
        assert!(set.has_flag(AluFlags::SRC1_NEG | AluFlags::LAST));

        // compares land in one channel-grouped vector
        let sel: Vec<u32> = (0..3)
            .map(|i| {
                let d = sh.program().instr(InstrId(i)).dest().unwrap();
                sh.program().values().register(d).sel()
            })
            .collect();
        assert!(sel.iter().all(|&s| s == sel[0]));
    }

    #[test]
    fn test_any_fnequal4_final_compare() {
        let sh = lower(ChipClass::Evergreen, GenericOp::AnyFnequal4);
        let ops = ops(&sh);
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[5], AluOp::SeteDx10);
        let max = sh.program().instr(InstrId(4));
        assert!(!max.has_flag(AluFlags::SRC0_NEG));
    }

    #[test]
    fn test_all_iequal3_pairwise() {
        let sh = lower(ChipClass::Evergreen, GenericOp::AllIequal3);
        assert_eq!(
            ops(&sh),
            [AluOp::SeteInt, AluOp::SeteInt, AluOp::SeteInt, AluOp::AndInt, AluOp::AndInt]
        );
        let last = sh.program().instr(InstrId(4));
        assert!(last.has_flag(AluFlags::LAST));
        let first_fold = sh.program().instr(InstrId(3)).dest().unwrap();
        assert_eq!(last.src(0), &Value::Register(first_fold));
    }

    #[test]
    fn test_any_inequal4_tree() {
        let sh = lower(ChipClass::Cayman, GenericOp::AnyInequal4);
        let ops = ops(&sh);
        assert_eq!(ops.len(), 7);
        assert!(ops[4..].iter().all(|&op| op == AluOp::OrInt));
        assert!(!sh.program().instr(InstrId(4)).has_flag(AluFlags::LAST));
        assert!(sh.program().instr(InstrId(6)).has_flag(AluFlags::LAST));
    }
}
