//! # Vector Emitters
//!
//! Vector construction, 64-bit and half-float packing, screen space
//! derivatives through the texture unit, and the cube map helper.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use terascale_ir::{AluFlags, AluInstr, AluOp, GradientInstr, GradientOp, Pin, Value};

use super::{clamp, src_modifiers};
use crate::error::{LowerError, Result};
use crate::op::AluOperation;
use crate::shader::Shader;

/// Vector of `n` scalar sources, one move per written component
pub(crate) fn emit_create_vec(shader: &mut Shader, alu: &AluOperation, n: u8) -> Result<()> {
    let mut last = None;
    for i in (0..n as usize).filter(|&i| alu.dest.writes(i)) {
        let src = &alu.srcs[i];
        let s = shader.src(src, 0);
        let dest = shader.dest(&alu.dest, i as u8, Pin::Chan);
        let flags = AluFlags::WRITE | clamp(&alu.dest) | src_modifiers(src, 0);
        last = Some(shader.emit(AluInstr::new(AluOp::Mov, Some(dest), vec![s], flags)));
    }
    shader.finish(last);
    Ok(())
}

// =============================================================================
// PACKING
// =============================================================================

fn emit_word_moves(shader: &mut Shader, alu: &AluOperation, words: impl Fn(&mut Shader, usize) -> Value) {
    let mut last = None;
    for i in 0..2 {
        let s = words(shader, i);
        let dest = shader.dest(&alu.dest, i as u8, Pin::None);
        last = Some(shader.emit(AluInstr::new(AluOp::Mov, Some(dest), vec![s], AluFlags::WRITE)));
    }
    shader.finish(last);
}

/// 64-bit value from a two-component 32-bit vector
pub(crate) fn emit_pack_64(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let src = alu.srcs[0];
    emit_word_moves(shader, alu, |shader, i| shader.src(&src, i));
    Ok(())
}

/// Two-component 32-bit vector from a 64-bit value
pub(crate) fn emit_unpack_64(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let src = alu.srcs[0];
    emit_word_moves(shader, alu, |shader, i| shader.src64(&src, 0, i as u8));
    Ok(())
}

/// 64-bit value from a low and a high 32-bit scalar
pub(crate) fn emit_pack_64_split(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let srcs = [alu.srcs[0], alu.srcs[1]];
    emit_word_moves(shader, alu, |shader, i| shader.src(&srcs[i], 0));
    Ok(())
}

/// One 32-bit half of a 64-bit value
pub(crate) fn emit_unpack_64_split(shader: &mut Shader, alu: &AluOperation, half: u8) -> Result<()> {
    let s = shader.src64(&alu.srcs[0], 0, half);
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    shader.emit(AluInstr::new(AluOp::Mov, Some(dest), vec![s], AluFlags::last_write()));
    Ok(())
}

/// Two floats as half-floats in the low and high 16 bits of a dword
pub(crate) fn emit_pack_half_split(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let x = shader.temp_register();
    let y = shader.temp_register();
    let yy = shader.temp_register();

    let s = shader.src(&alu.srcs[0], 0);
    shader.emit(AluInstr::new(AluOp::Flt32ToFlt16, Some(x), vec![s], AluFlags::last_write()));
    let s = shader.src(&alu.srcs[1], 0);
    shader.emit(AluInstr::new(AluOp::Flt32ToFlt16, Some(y), vec![s], AluFlags::last_write()));

    let shift = shader.literal(16);
    shader.emit(AluInstr::new(AluOp::LshlInt, Some(yy), vec![y.into(), shift], AluFlags::last_write()));

    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    shader.emit(AluInstr::new(
        AluOp::OrInt,
        Some(dest),
        vec![x.into(), yy.into()],
        AluFlags::last_write(),
    ));
    Ok(())
}

/// Low (`high == false`) or high half-float of a dword as a float
pub(crate) fn emit_unpack_half_split(shader: &mut Shader, alu: &AluOperation, high: bool) -> Result<()> {
    let mut s = shader.src(&alu.srcs[0], 0);
    if high {
        let tmp = shader.temp_register();
        let shift = shader.literal(16);
        shader.emit(AluInstr::new(AluOp::LshrInt, Some(tmp), vec![s, shift], AluFlags::last_write()));
        s = tmp.into();
    }
    let dest = shader.dest(&alu.dest, 0, Pin::Free);
    shader.emit(AluInstr::new(AluOp::Flt16ToFlt32, Some(dest), vec![s], AluFlags::last_write()));
    Ok(())
}

// =============================================================================
// TEXTURE UNIT HELPERS
// =============================================================================

/// Derivative through a gradient fetch
///
/// The source is first copied into a four-channel temporary so the fetch
/// reads one register; modifiers are applied by the copies.
pub(crate) fn emit_gradient(shader: &mut Shader, alu: &AluOperation, op: GradientOp, fine: bool) -> Result<()> {
    let src = &alu.srcs[0];
    let ncomp = alu.dest.num_components as usize;
    let tmp = shader.temp_vec4(Pin::Group);

    let mut last = None;
    for (i, &t) in tmp.iter().enumerate().take(ncomp) {
        let s = shader.src(src, i);
        let flags = AluFlags::WRITE | src_modifiers(src, 0);
        last = Some(shader.emit(AluInstr::new(AluOp::Mov, Some(t), vec![s], flags)));
    }
    shader.finish(last);

    let mut dest = [None; 4];
    for i in alu.dest.written() {
        dest[i] = Some(shader.dest(&alu.dest, i as u8, Pin::Group));
    }
    let tex = shader.emit_gradient(GradientInstr::new(op, dest, tmp, fine));
    log::trace!("{}: gradient fetch {}", alu.op, tex.0);
    Ok(())
}

/// Cube map face selection: four `CUBE` lanes over swizzled coordinates
pub(crate) fn emit_cube(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    const SRC0_CHAN: [usize; 4] = [2, 2, 0, 1];
    const SRC1_CHAN: [usize; 4] = [1, 0, 2, 2];

    if alu.dest.num_components != 4 {
        return Err(LowerError::InvalidComponentCount {
            op: alu.op,
            components: alu.dest.num_components,
        });
    }
    let src = &alu.srcs[0];
    let mut instrs = Vec::with_capacity(4);
    for i in 0..4 {
        let dest = shader.dest(&alu.dest, i as u8, Pin::Chan);
        let srcs = vec![shader.src(src, SRC0_CHAN[i]), shader.src(src, SRC1_CHAN[i])];
        instrs.push(AluInstr::new(AluOp::Cube, Some(dest), srcs, AluFlags::WRITE));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaderConfig;
    use crate::op::{DestDescriptor, GenericOp, SrcDescriptor};
    use terascale_ir::{ChipClass, InstrId, Node};

    fn lower(alu: &AluOperation) -> Shader {
        let mut sh = Shader::new(ShaderConfig::new(ChipClass::R700));
        sh.lower_alu(alu).unwrap();
        sh
    }

    #[test]
    fn test_create_vec_skips_masked() {
        let alu = AluOperation::new(
            GenericOp::Vec3,
            DestDescriptor::ssa(5, 3).with_write_mask(0b101),
            vec![
                SrcDescriptor::ssa(0).with_swizzle([2, 0, 0, 0]),
                SrcDescriptor::ssa(1),
                SrcDescriptor::ssa(2).negated(),
            ],
        );
        let mut sh = lower(&alu);
        assert_eq!(sh.program().instr_count(), 2);
        let x = sh.src(&SrcDescriptor::ssa(0), 2);
        assert_eq!(sh.program().instr(InstrId(0)).src(0), &x);
        let z = sh.program().instr(InstrId(1));
        assert!(z.has_flag(AluFlags::SRC0_NEG | AluFlags::LAST));
        assert_eq!(sh.program().values().register(z.dest().unwrap()).chan(), 2);
    }

    #[test]
    fn test_unpack_64_split_high() {
        let alu = AluOperation::new(
            GenericOp::Unpack64_2x32SplitY,
            DestDescriptor::ssa(1, 1),
            vec![SrcDescriptor::ssa(0).with_swizzle([1, 0, 0, 0]).with_bit_size(64)],
        );
        let sh = lower(&alu);
        let mov = sh.program().instr(InstrId(0));
        let s = mov.src(0).as_register().unwrap();
        assert_eq!(sh.program().values().register(s).chan(), 3);
        assert!(mov.has_flag(AluFlags::LAST | AluFlags::WRITE));
    }

    #[test]
    fn test_pack_half_split() {
        let alu = AluOperation::new(
            GenericOp::PackHalf2x16Split,
            DestDescriptor::ssa(2, 1),
            vec![SrcDescriptor::ssa(0), SrcDescriptor::ssa(1)],
        );
        let sh = lower(&alu);
        let ops: Vec<_> = (0..4).map(|i| sh.program().instr(InstrId(i)).alu_op()).collect();
        assert_eq!(
            ops,
            [
                Some(AluOp::Flt32ToFlt16),
                Some(AluOp::Flt32ToFlt16),
                Some(AluOp::LshlInt),
                Some(AluOp::OrInt)
            ]
        );
        assert_eq!(sh.program().instr(InstrId(2)).src(1), &Value::Literal(16));
    }

    #[test]
    fn test_unpack_half_high_shifts() {
        let alu = AluOperation::new(GenericOp::UnpackHalf2x16SplitY, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        let sh = lower(&alu);
        assert_eq!(sh.program().instr(InstrId(0)).alu_op(), Some(AluOp::LshrInt));
        assert_eq!(sh.program().instr(InstrId(1)).alu_op(), Some(AluOp::Flt16ToFlt32));

        let alu = AluOperation::new(GenericOp::UnpackHalf2x16SplitX, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        assert_eq!(lower(&alu).program().instr_count(), 1);
    }

    #[test]
    fn test_gradient_fetch() {
        let alu = AluOperation::new(
            GenericOp::FddyFine,
            DestDescriptor::ssa(1, 2).with_write_mask(0b10),
            vec![SrcDescriptor::ssa(0).absolute()],
        );
        let sh = lower(&alu);
        let stream = sh.program().stream();
        assert_eq!(stream.len(), 3);
        let Node::Gradient(tex) = stream[2] else {
            panic!("expected a gradient fetch");
        };
        let grad = sh.program().gradient(tex);
        assert_eq!(grad.op(), GradientOp::Vertical);
        assert!(grad.is_fine());
        assert!(grad.dest()[0].is_none());
        assert!(grad.dest()[1].is_some());
        assert!(sh.program().instr(InstrId(0)).has_flag(AluFlags::SRC0_ABS));
        assert!(sh.program().instr(InstrId(1)).has_flag(AluFlags::LAST));
    }

    #[test]
    fn test_cube_group() {
        let alu = AluOperation::new(GenericOp::Cube, DestDescriptor::ssa(1, 4), vec![SrcDescriptor::ssa(0)]);
        let mut sh = lower(&alu);
        let z = sh.src(&SrcDescriptor::ssa(0), 2);
        let Node::Group(gid) = sh.program().stream()[0] else {
            panic!("expected a group");
        };
        let group = sh.program().group(gid);
        assert_eq!(group.len(), 4);
        let x = sh.program().instr(group.lane(0).unwrap());
        assert_eq!(x.alu_op(), Some(AluOp::Cube));
        assert_eq!(x.src(0), &z);

        let alu = AluOperation::new(GenericOp::Cube, DestDescriptor::ssa(2, 3), vec![SrcDescriptor::ssa(0)]);
        assert!(matches!(
            sh.lower_alu(&alu),
            Err(LowerError::InvalidComponentCount { components: 3, .. })
        ));
    }
}
