//! # 64-bit Emulation
//!
//! A double occupies a register pair: channel `2k` holds the low word of
//! component `k` and channel `2k + 1` the high word. The 64-bit opcodes
//! run across adjacent lanes of one group; the x lane reads the high words
//! and the y lane the low words. Lanes whose result is not needed write
//! placeholder destinations.
//!
//! Every instruction emitted here carries `IS_64BIT`, which also keeps the
//! bundler from moving it to another lane.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use terascale_ir::{AluFlags, AluInstr, AluOp, Pin, Value};

use super::{clamp, src_modifiers};
use crate::error::{LowerError, Result};
use crate::op::{AluOperation, SrcDescriptor};
use crate::shader::Shader;

/// Exponent and top mantissa bits of 1.0 as a double
const ONE_HIGH_WORD: u32 = 0x3ff0_0000;

fn wide(mut instr: AluInstr) -> AluInstr {
    instr.set_flag(AluFlags::IS_64BIT);
    instr
}

fn require_components(alu: &AluOperation, max: u8) -> Result<()> {
    if alu.dest.num_components > max {
        return Err(LowerError::InvalidComponentCount {
            op: alu.op,
            components: alu.dest.num_components,
        });
    }
    Ok(())
}

/// Source modifiers of a two-source op, following the sources when swapped
fn pair_modifiers(a: &SrcDescriptor, b: &SrcDescriptor, reverse: bool) -> AluFlags {
    if reverse {
        src_modifiers(a, 1) | src_modifiers(b, 0)
    } else {
        src_modifiers(a, 0) | src_modifiers(b, 1)
    }
}

// =============================================================================
// MOVES
// =============================================================================

/// Word-by-word copy; modifiers apply to the high word
pub(crate) fn emit_mov(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let src = &alu.srcs[0];
    let mut last = None;
    for i in 0..alu.dest.num_components as usize {
        for half in 0..2u8 {
            let mut flags = AluFlags::WRITE;
            if half == 1 {
                flags |= src_modifiers(src, 0);
            }
            let dest = shader.dest(&alu.dest, 2 * i as u8 + half, Pin::Free);
            let s = shader.src64(src, i, half);
            last = Some(shader.emit(wide(AluInstr::new(AluOp::Mov, Some(dest), vec![s], flags))));
        }
    }
    shader.finish(last);
    Ok(())
}

/// Sign flip of the high word, in one group
pub(crate) fn emit_neg(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 2)?;
    let src = &alu.srcs[0];
    let mut instrs = Vec::with_capacity(2 * alu.dest.num_components as usize);
    for i in 0..alu.dest.num_components as usize {
        for half in 0..2u8 {
            let mut flags = AluFlags::WRITE;
            if half == 1 {
                flags |= AluFlags::SRC0_NEG;
            }
            let dest = shader.dest(&alu.dest, 2 * i as u8 + half, Pin::Chan);
            let s = shader.src64(src, i, half);
            instrs.push(wide(AluInstr::new(AluOp::Mov, Some(dest), vec![s], flags)));
        }
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Clear the sign bit of the high word
pub(crate) fn emit_abs(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 1)?;
    let src = &alu.srcs[0];

    let lo = shader.dest(&alu.dest, 0, Pin::Chan);
    let s = shader.src64(src, 0, 0);
    shader.emit(wide(AluInstr::new(AluOp::Mov, Some(lo), vec![s], AluFlags::WRITE)));

    let hi = shader.dest(&alu.dest, 1, Pin::Chan);
    let s = shader.src64(src, 0, 1);
    let flags = AluFlags::last_write() | AluFlags::SRC0_ABS;
    shader.emit(wide(AluInstr::new(AluOp::Mov, Some(hi), vec![s], flags)));
    Ok(())
}

// =============================================================================
// ARITHMETIC
// =============================================================================

/// One-source op reading the high word in the low lane
pub(crate) fn emit_op1(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    require_components(alu, 2)?;
    let src = &alu.srcs[0];
    let mut instrs = Vec::with_capacity(2 * alu.dest.num_components as usize);
    for i in 0..alu.dest.num_components as usize {
        let lo = shader.dest(&alu.dest, 2 * i as u8, Pin::Chan);
        let s = shader.src64(src, i, 1);
        let flags = AluFlags::WRITE | src_modifiers(src, 0);
        instrs.push(wide(AluInstr::new(op, Some(lo), vec![s], flags)));

        let hi = shader.dest(&alu.dest, 2 * i as u8 + 1, Pin::Chan);
        let s = shader.src64(src, i, 0);
        instrs.push(wide(AluInstr::new(op, Some(hi), vec![s], AluFlags::WRITE)));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Two-source arithmetic
///
/// `MUL_64` computes three partial products on the high words before the
/// final lane and therefore takes a whole group per component.
pub(crate) fn emit_op2(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    let partials: u8 = if op == AluOp::Mul64 { 3 } else { 1 };
    require_components(alu, if partials == 1 { 2 } else { 1 })?;
    let (a, b) = (&alu.srcs[0], &alu.srcs[1]);
    let modifiers = pair_modifiers(a, b, false);

    let mut instrs = Vec::with_capacity(4);
    for k in 0..alu.dest.num_components as usize {
        let base = 2 * k as u8;
        for i in 0..partials {
            let (dest, mut flags) = if i < 2 {
                (shader.dest(&alu.dest, base + i, Pin::Chan), AluFlags::WRITE)
            } else {
                (shader.dummy_dest(base + i), AluFlags::empty())
            };
            flags |= modifiers;
            if i == 0 {
                flags |= clamp(&alu.dest);
            }
            let srcs = vec![shader.src64(a, k, 1), shader.src64(b, k, 1)];
            instrs.push(wide(AluInstr::new(op, Some(dest), srcs, flags)));
        }

        let (dest, flags) = if partials == 1 {
            (shader.dest(&alu.dest, base + 1, Pin::Chan), AluFlags::WRITE)
        } else {
            (shader.dummy_dest(base + partials), AluFlags::empty())
        };
        let srcs = vec![shader.src64(a, k, 0), shader.src64(b, k, 0)];
        instrs.push(wide(AluInstr::new(op, Some(dest), srcs, flags)));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Compare into one 32-bit boolean per component, two lanes each
pub(crate) fn emit_compare(shader: &mut Shader, alu: &AluOperation, op: AluOp, reverse: bool) -> Result<()> {
    require_components(alu, 2)?;
    let (a, b) = if reverse {
        (&alu.srcs[1], &alu.srcs[0])
    } else {
        (&alu.srcs[0], &alu.srcs[1])
    };
    let modifiers = pair_modifiers(&alu.srcs[0], &alu.srcs[1], reverse);

    let mut last = None;
    for k in 0..alu.dest.num_components as usize {
        let dest = shader.dest(&alu.dest, 2 * k as u8, Pin::Chan);
        let srcs = vec![
            shader.src64(a, k, 1),
            shader.src64(b, k, 1),
            shader.src64(a, k, 0),
            shader.src64(b, k, 0),
        ];
        let instr = AluInstr::with_slots(op, Some(dest), srcs, AluFlags::WRITE | modifiers, 2);
        last = Some(shader.emit(wide(instr)));
    }
    shader.finish(last);
    Ok(())
}

/// Fused multiply-add: three lanes on the high words, one on the low words
pub(crate) fn emit_fma(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 1)?;
    let mut instrs = Vec::with_capacity(4);
    for i in 0..4u8 {
        let half = if i < 3 { 1 } else { 0 };
        let (dest, mut flags) = if i < 2 {
            (shader.dest(&alu.dest, i, Pin::Chan), AluFlags::WRITE)
        } else {
            (shader.dummy_dest(i), AluFlags::empty())
        };
        if i < 3 {
            for (slot, src) in alu.srcs.iter().enumerate() {
                if src.negate {
                    flags |= AluFlags::neg(slot);
                }
            }
        }
        let srcs: Vec<Value> = alu.srcs.iter().map(|src| shader.src64(src, 0, half)).collect();
        instrs.push(wide(AluInstr::new(AluOp::Fma64, Some(dest), srcs, flags)));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Square root and reciprocals: three lanes reading (high, low)
///
/// The square root always takes the magnitude of the high word.
pub(crate) fn emit_trans(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    require_components(alu, 1)?;
    let src = &alu.srcs[0];
    let mut flags = AluFlags::empty();
    if src.abs || op == AluOp::Sqrt64 {
        flags |= AluFlags::SRC1_ABS;
    }
    if src.negate {
        flags |= AluFlags::SRC1_NEG;
    }

    let mut instrs = Vec::with_capacity(3);
    for i in 0..3u8 {
        let (dest, write) = if i < 2 {
            (shader.dest(&alu.dest, i, Pin::Chan), AluFlags::WRITE)
        } else {
            (shader.dummy_dest(i), AluFlags::empty())
        };
        let srcs = vec![shader.src64(src, 0, 1), shader.src64(src, 0, 0)];
        instrs.push(wide(AluInstr::new(op, Some(dest), srcs, flags | write)));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Booleans to 0.0 / 1.0 by masking the high word of 1.0
pub(crate) fn emit_bool_to_double(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 2)?;
    let src = &alu.srcs[0];
    let mut instrs = Vec::with_capacity(2 * alu.dest.num_components as usize);
    for i in 0..alu.dest.num_components as usize {
        let s = shader.src(src, i);

        let lo = shader.dest(&alu.dest, 2 * i as u8, Pin::Group);
        let zero = shader.zero();
        instrs.push(wide(AluInstr::new(AluOp::AndInt, Some(lo), vec![s, zero], AluFlags::WRITE)));

        let hi = shader.dest(&alu.dest, 2 * i as u8 + 1, Pin::Group);
        let one = shader.literal(ONE_HIGH_WORD);
        instrs.push(wide(AluInstr::new(AluOp::AndInt, Some(hi), vec![s, one], AluFlags::WRITE)));
    }
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// 32-bit integer to double
///
/// The integer is split into its upper 24 and lower 8 bits so that both
/// parts convert to float exactly; the parts are widened and summed in
/// double precision.
pub(crate) fn emit_int_to_double(shader: &mut Shader, alu: &AluOperation, op: AluOp) -> Result<()> {
    require_components(alu, 1)?;
    let s = shader.src(&alu.srcs[0], 0);

    let upper = shader.temp_register();
    let mask = shader.literal(0xffff_ff00);
    shader.emit(AluInstr::new(AluOp::AndInt, Some(upper), vec![s, mask], AluFlags::WRITE));
    let lower = shader.temp_register();
    let mask = shader.literal(0xff);
    shader.emit(AluInstr::new(AluOp::AndInt, Some(lower), vec![s, mask], AluFlags::last_write()));

    let upper_f = shader.temp_register();
    let lower_f = shader.temp_register();
    shader.emit(AluInstr::new(op, Some(upper_f), vec![upper.into()], AluFlags::last_write()));
    shader.emit(AluInstr::new(op, Some(lower_f), vec![lower.into()], AluFlags::last_write()));

    let widened = [0, 1, 2, 3].map(|chan| shader.temp_register_chan(chan));
    let zero = shader.zero();
    let inputs = [upper_f.into(), zero, lower_f.into(), zero];
    let instrs = widened
        .iter()
        .zip(inputs)
        .map(|(&dest, src)| wide(AluInstr::new(AluOp::Flt32ToFlt64, Some(dest), vec![src], AluFlags::WRITE)))
        .collect();
    shader.emit_group(alu.op, instrs)?;

    let [x, y, z, w] = widened;
    let lo = shader.dest(&alu.dest, 0, Pin::Chan);
    let hi = shader.dest(&alu.dest, 1, Pin::Chan);
    let instrs = vec![
        wide(AluInstr::new(AluOp::Add64, Some(lo), vec![y.into(), w.into()], AluFlags::WRITE)),
        wide(AluInstr::new(AluOp::Add64, Some(hi), vec![x.into(), z.into()], AluFlags::WRITE)),
    ];
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Float to double
pub(crate) fn emit_float_to_double(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 1)?;
    let lo = shader.dest(&alu.dest, 0, Pin::Chan);
    let s = shader.src(&alu.srcs[0], 0);
    let hi = shader.dest(&alu.dest, 1, Pin::Chan);
    let zero = shader.zero();
    let instrs = vec![
        wide(AluInstr::new(AluOp::Flt32ToFlt64, Some(lo), vec![s], AluFlags::WRITE)),
        wide(AluInstr::new(AluOp::Flt32ToFlt64, Some(hi), vec![zero], AluFlags::WRITE)),
    ];
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Double to float; the y lane only feeds the low word
pub(crate) fn emit_double_to_float(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    require_components(alu, 1)?;
    let src = &alu.srcs[0];
    let dest = shader.dest(&alu.dest, 0, Pin::Chan);
    let hi = shader.src64(src, 0, 1);
    let dummy = shader.dummy_dest(1);
    let lo = shader.src64(src, 0, 0);
    let instrs = vec![
        wide(AluInstr::new(AluOp::Flt64ToFlt32, Some(dest), vec![hi], AluFlags::WRITE)),
        wide(AluInstr::new(AluOp::Flt64ToFlt32, Some(dummy), vec![lo], AluFlags::empty())),
    ];
    shader.emit_group(alu.op, instrs)?;
    Ok(())
}

/// Two doubles into one register quadruple
pub(crate) fn emit_vec2(shader: &mut Shader, alu: &AluOperation) -> Result<()> {
    let mut last = None;
    for (k, src) in alu.srcs.iter().enumerate() {
        for half in 0..2u8 {
            let dest = shader.dest(&alu.dest, 2 * k as u8 + half, Pin::Chan);
            let s = shader.src64(src, 0, half);
            last = Some(shader.emit(wide(AluInstr::new(AluOp::Mov, Some(dest), vec![s], AluFlags::WRITE))));
        }
    }
    shader.finish(last);
    Ok(())
}
