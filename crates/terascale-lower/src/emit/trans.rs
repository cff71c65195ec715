//! # Transcendental Emitters
//!
//! R600 to Evergreen run transcendentals on the trans lane: one instruction
//! per component, each closing its own group. Cayman has no trans lane and
//! replicates the scalar operation across three vector lanes (four when the
//! w channel is written, and always four for two-source ops); only the lane
//! matching the destination channel keeps its result.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use terascale_ir::{AluFlags, AluInstr, AluOp, Pin};

use super::{clamp, pin_for_components, src_modifiers};
use crate::error::Result;
use crate::op::AluOperation;
use crate::shader::Shader;

/// One-source op per component on the trans lane
pub(crate) fn emit_trans_op1(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let src = &alu.srcs[0];
    let pin = pin_for_components(&alu.dest);
    for i in alu.dest.written() {
        let flags = AluFlags::last_write() | AluFlags::IS_TRANS | src_modifiers(src, 0) | clamp(&alu.dest);
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let s = shader.src(src, i);
        shader.emit(AluInstr::new(op, Some(dest), vec![s], flags));
    }
    Ok(())
}

/// Two-source op per component on the trans lane
pub(crate) fn emit_trans_op2(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let (src0, src1) = (&alu.srcs[0], &alu.srcs[1]);
    let pin = pin_for_components(&alu.dest);
    for i in alu.dest.written() {
        let flags = AluFlags::last_write()
            | AluFlags::IS_TRANS
            | src_modifiers(src0, 0)
            | src_modifiers(src1, 1)
            | clamp(&alu.dest);
        let dest = shader.dest(&alu.dest, i as u8, pin);
        let a = shader.src(src0, i);
        let b = shader.src(src1, i);
        shader.emit(AluInstr::new(op, Some(dest), vec![a, b], flags));
    }
    Ok(())
}

/// One-source op replicated across the Cayman vector lanes
pub(crate) fn emit_cayman_op1(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let src = &alu.srcs[0];
    let pin = pin_for_components(&alu.dest);
    let slots: u8 = if alu.dest.num_components == 4 { 4 } else { 3 };
    for j in (0..slots as usize).filter(|&j| alu.dest.writes(j)) {
        let dest = shader.dest(&alu.dest, j as u8, pin);
        let s = shader.src(src, j);
        let flags = AluFlags::last_write() | AluFlags::IS_CAYMAN_TRANS | src_modifiers(src, 0) | clamp(&alu.dest);
        shader.emit(AluInstr::with_slots(op, Some(dest), vec![s; slots as usize], flags, slots));
    }
    Ok(())
}

/// Two-source op replicated across all four Cayman vector lanes
pub(crate) fn emit_cayman_op2(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let (src0, src1) = (&alu.srcs[0], &alu.srcs[1]);
    for k in alu.dest.written() {
        let dest = shader.dest(&alu.dest, k as u8, Pin::Free);
        let pair = [shader.src(src0, k), shader.src(src1, k)];
        let srcs: Vec<_> = pair.iter().copied().cycle().take(8).collect();
        let flags = AluFlags::last_write()
            | AluFlags::IS_CAYMAN_TRANS
            | src_modifiers(src0, 0)
            | src_modifiers(src1, 1)
            | clamp(&alu.dest);
        shader.emit(AluInstr::with_slots(op, Some(dest), srcs, flags, 4));
    }
    Ok(())
}

/// Evergreen float to integer: `TRUNC` every component, then convert
pub(crate) fn emit_trunc_to_int(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let src = &alu.srcs[0];
    let ncomp = alu.dest.num_components as usize;

    let mut truncated = Vec::with_capacity(ncomp);
    for i in 0..ncomp {
        let tmp = shader.temp_register();
        let s = shader.src(src, i);
        let flags = AluFlags::last_write() | src_modifiers(src, 0);
        shader.emit(AluInstr::new(AluOp::Trunc, Some(tmp), vec![s], flags));
        truncated.push(tmp);
    }

    let pin = pin_for_components(&alu.dest);
    let mut last = None;
    for (i, &tmp) in truncated.iter().enumerate() {
        let mut flags = AluFlags::WRITE;
        if op == AluOp::FltToUint {
            flags |= AluFlags::IS_TRANS | AluFlags::LAST;
        }
        let dest = shader.dest(&alu.dest, i as u8, pin);
        last = Some(shader.emit(AluInstr::new(op, Some(dest), vec![tmp.into()], flags)));
    }
    shader.finish(last);
    Ok(())
}
