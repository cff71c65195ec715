//! # Textual Form
//!
//! One instruction per line:
//!
//! ```text
//! ALU [LDS] OPNAME [CLAMP] DEST : SRC... [+ SRC...]... {FLAGS} [VEC_xyz] [CFMARKER]
//! ```
//!
//! Registers print as `S<sel>.<c>` (SSA) or `R<sel>.<c>`, followed by
//! `@<pin>` when pinned. A destination that is not written prints as
//! `__.<c>`. Source modifiers print as `-` (negate) around `|x|` (abs).
//! Flags are `W` (write), `L` (last in group), `E` (update exec mask) and
//! `P` (update predicate).
//!
//! Parsing is strict: an unknown token is a logic error and panics.

#[cfg(not(feature = "std"))]
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};

use core::fmt::{self, Write as _};

use crate::group::GroupId;
use crate::instr::{AluFlags, AluInstr, BankSwizzle, CfMarker, InstrId, Opcode};
use crate::opcode::{AluOp, LdsOp};
use crate::pool::ValuePool;
use crate::program::{Node, Program};
use crate::value::{chan_char, chan_from_char, InlineConstant, Pin, RegId, RegisterFlags, Uniform, Value};

// =============================================================================
// PRINTING
// =============================================================================

fn write_register(f: &mut dyn fmt::Write, pool: &ValuePool, id: RegId) -> fmt::Result {
    let reg = pool.register(id);
    let c = chan_char(reg.chan());
    if let Some(link) = reg.array() {
        let base = pool.array(link.array).base_sel();
        write!(f, "A{}[{}", base, link.offset)?;
        if let Some(addr) = link.addr {
            f.write_char('+')?;
            write_register(f, pool, addr)?;
        }
        return write!(f, "].{}", c);
    }
    let prefix = if reg.is_ssa() { 'S' } else { 'R' };
    write!(f, "{}{}.{}", prefix, reg.sel(), c)?;
    if let Some(pin) = reg.pin().name() {
        write!(f, "@{}", pin)?;
    }
    Ok(())
}

fn write_value(f: &mut dyn fmt::Write, pool: &ValuePool, value: &Value) -> fmt::Result {
    match value {
        Value::Register(id) => write_register(f, pool, *id),
        Value::Uniform(u) => {
            write!(f, "KC{}[{}", u.bank, u.index)?;
            if let Some(addr) = u.buf_addr {
                f.write_char('+')?;
                write_register(f, pool, addr)?;
            }
            write!(f, "].{}", chan_char(u.chan))
        }
        Value::Literal(bits) => write!(f, "L[{:#x}]", bits),
        Value::Inline(c) => write!(f, "{}", c),
    }
}

/// Printable view of a register
#[derive(Debug, Clone, Copy)]
pub struct RegisterDisplay<'a> {
    pool: &'a ValuePool,
    id: RegId,
}

impl fmt::Display for RegisterDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_register(f, self.pool, self.id)
    }
}

/// Printable view of an instruction
#[derive(Debug, Clone, Copy)]
pub struct InstrDisplay<'a> {
    program: &'a Program,
    id: InstrId,
}

impl fmt::Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.program.values();
        let instr = self.program.instr(self.id);
        f.write_str("ALU ")?;
        if instr.is_lds() {
            f.write_str("LDS ")?;
        }
        write!(f, "{}", instr.opcode())?;
        if instr.has_flag(AluFlags::DST_CLAMP) {
            f.write_str(" CLAMP")?;
        }
        f.write_char(' ')?;

        match instr.dest() {
            Some(d) if instr.writes() => write_register(f, pool, d)?,
            Some(d) => {
                let reg = pool.register(d);
                write!(f, "__.{}", chan_char(reg.chan()))?;
                if !pool.is_dummy(d) {
                    if let Some(pin) = reg.pin().name() {
                        write!(f, "@{}", pin)?;
                    }
                }
            }
            None => write!(f, "__.{}", chan_char(instr.fallback_chan()))?,
        }
        f.write_str(" :")?;

        for slot in 0..instr.slots() {
            if slot > 0 {
                f.write_str(" +")?;
            }
            for (k, src) in instr.slot_sources(slot).iter().enumerate() {
                f.write_char(' ')?;
                if k < 3 && instr.has_flag(AluFlags::neg(k)) {
                    f.write_char('-')?;
                }
                let abs = k < 2 && instr.has_flag(AluFlags::abs(k));
                if abs {
                    f.write_char('|')?;
                }
                write_value(f, pool, src)?;
                if abs {
                    f.write_char('|')?;
                }
            }
        }

        f.write_str(" {")?;
        for (flag, c) in [
            (AluFlags::WRITE, 'W'),
            (AluFlags::LAST, 'L'),
            (AluFlags::UPDATE_EXEC, 'E'),
            (AluFlags::UPDATE_PRED, 'P'),
        ] {
            if instr.has_flag(flag) {
                f.write_char(c)?;
            }
        }
        f.write_char('}')?;

        if let Some(swz) = instr.bank_swizzle() {
            write!(f, " {}", swz)?;
        }
        if let Some(cf) = instr.cf().name() {
            write!(f, " {}", cf)?;
        }
        Ok(())
    }
}

/// Printable view of a group
#[derive(Debug, Clone, Copy)]
pub struct GroupDisplay<'a> {
    program: &'a Program,
    id: GroupId,
}

impl fmt::Display for GroupDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ALU_GROUP_BEGIN")?;
        for m in self.program.group(self.id).members() {
            writeln!(f, "  {}", self.program.display(m))?;
        }
        write!(f, "ALU_GROUP_END")
    }
}

/// Printable view of the emitted stream
#[derive(Debug, Clone, Copy)]
pub struct StreamDisplay<'a> {
    program: &'a Program,
}

impl fmt::Display for StreamDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.program.values();
        for node in self.program.stream() {
            match *node {
                Node::Alu(id) if self.program.instr(id).is_dead() => {}
                Node::Alu(id) => writeln!(f, "{}", self.program.display(id))?,
                Node::Group(gid) => writeln!(f, "{}", self.program.display_group(gid))?,
                Node::Gradient(tid) => {
                    let grad = self.program.gradient(tid);
                    write!(f, "TEX {}", grad.op())?;
                    for d in grad.dest() {
                        f.write_char(' ')?;
                        match d {
                            Some(r) => write_register(f, pool, *r)?,
                            None => f.write_char('_')?,
                        }
                    }
                    f.write_str(" :")?;
                    for s in grad.src() {
                        f.write_char(' ')?;
                        write_register(f, pool, *s)?;
                    }
                    if grad.is_fine() {
                        f.write_str(" FINE")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}

impl Program {
    /// Printable view of a register
    pub fn display_register(&self, id: RegId) -> RegisterDisplay<'_> {
        RegisterDisplay {
            pool: self.values(),
            id,
        }
    }

    /// Printable view of an instruction
    pub fn display(&self, id: InstrId) -> InstrDisplay<'_> {
        InstrDisplay { program: self, id }
    }

    /// Printable view of a group
    pub fn display_group(&self, id: GroupId) -> GroupDisplay<'_> {
        GroupDisplay { program: self, id }
    }

    /// Printable view of the emitted stream
    pub fn display_stream(&self) -> StreamDisplay<'_> {
        StreamDisplay { program: self }
    }

    /// Print an instruction into a new string
    pub fn print(&self, id: InstrId) -> String {
        self.display(id).to_string()
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn unknown(token: &str) -> ! {
    panic!("unknown token '{}'", token)
}

fn parse_u32(token: &str, whole: &str) -> u32 {
    token.parse().unwrap_or_else(|_| unknown(whole))
}

fn parse_chan(token: &str, whole: &str) -> u8 {
    let mut chars = token.chars();
    match (chars.next().and_then(chan_from_char), chars.next()) {
        (Some(c), None) => c,
        _ => unknown(whole),
    }
}

/// Split `<head>[<inner>].<chan>` into its parts
fn split_indexed<'t>(token: &'t str, whole: &str) -> (&'t str, &'t str, &'t str) {
    let open = token.find('[').unwrap_or_else(|| unknown(whole));
    let close = token.rfind("].").unwrap_or_else(|| unknown(whole));
    if close < open {
        unknown(whole);
    }
    (&token[..open], &token[open + 1..close], &token[close + 2..])
}

/// `<offset>` or `<offset>+<register>`
fn split_offset<'t>(inner: &'t str, whole: &str) -> (u32, Option<&'t str>) {
    match inner.split_once('+') {
        Some((offset, addr)) => (parse_u32(offset, whole), Some(addr)),
        None => (parse_u32(inner, whole), None),
    }
}

fn parse_register(pool: &mut ValuePool, token: &str) -> RegId {
    if let Some(rest) = token.strip_prefix('A') {
        let (base, inner, chan) = split_indexed(rest, token);
        let base = parse_u32(base, token);
        let array = pool.find_array(base).unwrap_or_else(|| unknown(token));
        let (offset, addr) = split_offset(inner, token);
        let addr = addr.map(|a| parse_register(pool, a));
        return pool.array_element(array, offset, parse_chan(chan, token), addr);
    }

    let (body, pin) = match token.split_once('@') {
        Some((body, pin)) => (body, Pin::from_name(pin).unwrap_or_else(|| unknown(token))),
        None => (token, Pin::None),
    };
    let flags = match body.as_bytes().first() {
        Some(b'S') => RegisterFlags::SSA,
        Some(b'R') => RegisterFlags::empty(),
        _ => unknown(token),
    };
    let (sel, chan) = body[1..].split_once('.').unwrap_or_else(|| unknown(token));
    pool.get_or_create(parse_u32(sel, token), parse_chan(chan, token), pin, flags)
}

fn parse_inline(token: &str) -> Option<InlineConstant> {
    if let Some(rest) = token.strip_prefix("Param") {
        let (index, chan) = rest.split_once('.').unwrap_or_else(|| unknown(token));
        let index = parse_u32(index, token);
        return Some(InlineConstant::Param(index as u8, parse_chan(chan, token)));
    }
    if let Some(chan) = token.strip_prefix("I[PV].") {
        return Some(InlineConstant::PrevVector(parse_chan(chan, token)));
    }
    let inner = token.strip_prefix("I[")?.strip_suffix(']')?;
    Some(match inner {
        "0" => InlineConstant::Zero,
        "1.0" => InlineConstant::One,
        "1" => InlineConstant::OneInt,
        "-1" => InlineConstant::MinusOneInt,
        "0.5" => InlineConstant::Half,
        "PS" => InlineConstant::PrevScalar,
        "LDS_OQ_A_POP" => InlineConstant::LdsOqAPop,
        "LDS_OQ_B_POP" => InlineConstant::LdsOqBPop,
        "LDS_OQ_A" => InlineConstant::LdsOqA,
        "LDS_OQ_B" => InlineConstant::LdsOqB,
        _ => unknown(token),
    })
}

fn parse_value(pool: &mut ValuePool, token: &str) -> Value {
    if let Some(c) = parse_inline(token) {
        return Value::Inline(c);
    }
    if let Some(hex) = token.strip_prefix("L[0x").and_then(|t| t.strip_suffix(']')) {
        return Value::Literal(u32::from_str_radix(hex, 16).unwrap_or_else(|_| unknown(token)));
    }
    if let Some(rest) = token.strip_prefix("KC") {
        let (bank, inner, chan) = split_indexed(rest, token);
        let (index, addr) = split_offset(inner, token);
        let mut u = Uniform::new(parse_u32(bank, token) as u16, index, parse_chan(chan, token));
        u.buf_addr = addr.map(|a| parse_register(pool, a));
        return Value::Uniform(u);
    }
    Value::Register(parse_register(pool, token))
}

#[derive(Debug, Default, Clone, Copy)]
struct SrcModifiers {
    neg: bool,
    abs: bool,
}

/// Parse source `index` of a slot with its modifiers
fn parse_source(pool: &mut ValuePool, token: &str, index: usize) -> (Value, SrcModifiers) {
    let mut mods = SrcModifiers::default();
    let mut body = token;
    if let Some(rest) = body.strip_prefix('-') {
        mods.neg = true;
        body = rest;
    }
    if let Some(inner) = body.strip_prefix('|') {
        // only the first two sources have an abs modifier
        if index > 1 {
            unknown(token);
        }
        mods.abs = true;
        body = inner.strip_suffix('|').unwrap_or_else(|| unknown(token));
    }
    (parse_value(pool, body), mods)
}

fn parse_flags(token: &str) -> AluFlags {
    let inner = token
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or_else(|| unknown(token));
    inner.chars().fold(AluFlags::empty(), |flags, c| {
        flags
            | match c {
                'W' => AluFlags::WRITE,
                'L' => AluFlags::LAST,
                'E' => AluFlags::UPDATE_EXEC,
                'P' => AluFlags::UPDATE_PRED,
                _ => unknown(token),
            }
    })
}

impl Program {
    /// Parse one instruction line and add it to the arena
    ///
    /// # Panics
    ///
    /// On any token the format does not define.
    pub fn parse_alu(&mut self, line: &str) -> InstrId {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("ALU") => {}
            Some(t) => unknown(t),
            None => panic!("empty instruction line"),
        }

        let mut next = |what: &str| tokens.next().unwrap_or_else(|| panic!("missing {} in '{}'", what, line));
        let mut name = next("opcode");
        let is_lds = name == "LDS";
        if is_lds {
            name = next("LDS opcode");
        }
        let opcode = if is_lds {
            Opcode::Lds(LdsOp::from_name(name).unwrap_or_else(|| unknown(name)))
        } else {
            Opcode::Alu(AluOp::from_name(name).unwrap_or_else(|| unknown(name)))
        };

        let mut flags = AluFlags::empty();
        let mut dest_token = next("destination");
        if dest_token == "CLAMP" {
            flags |= AluFlags::DST_CLAMP;
            dest_token = next("destination");
        }
        if next("':'") != ":" {
            unknown(dest_token);
        }

        let mut slots: Vec<Vec<(Value, SrcModifiers)>> = vec![Vec::new()];
        let mut tail: Vec<&str> = Vec::new();
        for token in tokens.by_ref() {
            if token.starts_with('{') {
                tail.push(token);
                break;
            }
            if token == "+" {
                slots.push(Vec::new());
                continue;
            }
            if let Some(slot) = slots.last_mut() {
                let parsed = parse_source(self.values_mut(), token, slot.len());
                slot.push(parsed);
            }
        }
        tail.extend(tokens);

        let mut tail = tail.into_iter();
        flags |= parse_flags(tail.next().unwrap_or_else(|| panic!("missing flags in '{}'", line)));
        let mut bank_swizzle = None;
        let mut cf = CfMarker::Alu;
        for token in tail {
            if token.starts_with("VEC_") {
                bank_swizzle = Some(BankSwizzle::from_name(token).unwrap_or_else(|| unknown(token)));
            } else {
                cf = CfMarker::from_name(token).unwrap_or_else(|| unknown(token));
            }
        }

        for (k, (_, mods)) in slots[0].iter().enumerate() {
            if mods.neg {
                flags |= AluFlags::neg(k);
            }
            if mods.abs {
                flags |= AluFlags::abs(k);
            }
        }
        let nslots = slots.len() as u8;
        let src: Vec<Value> = slots.into_iter().flatten().map(|(v, _)| v).collect();

        let (dest, fallback_chan) = self.parse_dest(dest_token, is_lds);
        let mut instr = match opcode {
            Opcode::Lds(op) => {
                let mut instr = AluInstr::lds(op, src);
                instr.flags |= flags;
                instr
            }
            Opcode::Alu(op) => AluInstr::with_slots(op, dest, src, flags, nslots),
        };
        instr.fallback_chan = fallback_chan;
        instr.cf = cf;
        instr.bank_swizzle = bank_swizzle;
        self.add_instr(instr)
    }

    fn parse_dest(&mut self, token: &str, is_lds: bool) -> (Option<RegId>, u8) {
        if token == "(null)" {
            return (None, 0);
        }
        if let Some(rest) = token.strip_prefix("__.") {
            let chan = parse_chan(rest.split('@').next().unwrap_or(rest), token);
            if is_lds {
                return (None, chan);
            }
            return (Some(self.values_mut().dummy_dest(chan)), chan);
        }
        let reg = parse_register(self.values_mut(), token);
        (Some(reg), self.values().register(reg).chan())
    }

    /// Parse a group block and emit it
    ///
    /// Accepts the output of [`Program::display_group`].
    pub fn parse_group(&mut self, text: &str) -> GroupId {
        let gid = self.new_group();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line {
                "ALU_GROUP_BEGIN" | "ALU_GROUP_END" => {}
                _ => {
                    let id = self.parse_alu(line);
                    assert!(self.add_to_group(gid, id), "instruction does not fit group: {}", line);
                }
            }
        }
        self.emit_group(gid);
        gid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipClass;

    fn round_trip(line: &str) {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = p.parse_alu(line);
        let printed = p.print(a);
        assert_eq!(printed, line);
        let b = p.parse_alu(&printed);
        assert!(p.is_equal_to(a, b), "{} != {}", line, p.print(b));
    }

    #[test]
    fn test_round_trip_simple() {
        round_trip("ALU ADD S3.x@free : S1.x S2.y {WL}");
        round_trip("ALU MOV R4.w : KC0[2].z {W}");
        round_trip("ALU MULADD_IEEE S5.x : -S1.x |S2.x| I[1.0] {WL}");
        round_trip("ALU MUL_IEEE CLAMP S5.y@chgr : -|S1.x| L[0x40400000] {W} VEC_021");
        round_trip("ALU SETE_DX10 S6.z@chan : S1.z I[0] {WLEP} VEC_210 PUSH_BEFORE");
    }

    #[test]
    fn test_round_trip_multi_slot() {
        round_trip("ALU DOT4_IEEE S7.x@free : S1.x S2.x + S1.y S2.y + S1.z S2.z + S1.w I[0] {WL}");
        round_trip("ALU MAX4 S8.x : -S3.x + -S3.y + -S3.z + -I[1.0] {WL}");
    }

    #[test]
    fn test_round_trip_placeholder_dest() {
        round_trip("ALU INTERP_XY __.x : S1.x Param0.x {}");
        round_trip("ALU MOV __.y : I[PV].x {L} BREAK");
    }

    #[test]
    fn test_round_trip_inline_constants() {
        round_trip("ALU CNDE_INT S1.x : I[-1] I[1] I[0.5] {W}");
        round_trip("ALU MOV S2.x : I[PS] {W}");
        round_trip("ALU ADD S3.x : I[LDS_OQ_A_POP] I[LDS_OQ_B] {W}");
    }

    #[test]
    fn test_round_trip_lds() {
        round_trip("ALU LDS WRITE __.x : S1.x S2.x {}");
        round_trip("ALU LDS CMP_XCHG_RET __.x : S1.x S2.x S3.x {L}");
    }

    #[test]
    fn test_round_trip_indirect() {
        let mut p = Program::new(ChipClass::Evergreen);
        let arr = p.values_mut().allocate_array(4, 4);
        let base = p.values().array(arr).base_sel();
        let line = format!("ALU MOV S40.x : A{}[2+S41.x].y {{W}}", base);
        let a = p.parse_alu(&line);
        assert_eq!(p.print(a), line);
        assert!(p.instr(a).has_flag(AluFlags::SRC0_REL));
        let b = p.parse_alu(&line);
        assert!(p.is_equal_to(a, b));

        let line = "ALU MOV R42.y : KC1[3+S43.x].w {W}";
        let c = p.parse_alu(line);
        assert_eq!(p.print(c), line);
        assert!(p.indirect_addr(c).is_index);
    }

    #[test]
    fn test_same_register_resolves_to_same_id() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = p.parse_alu("ALU MOV S3.x : S1.x {W}");
        let b = p.parse_alu("ALU ADD S4.x : S3.x S1.x {W}");
        let s3 = p.instr(a).dest().unwrap();
        assert_eq!(p.instr(b).src(0), &Value::Register(s3));
        assert_eq!(p.values().register(s3).uses(), &[b]);
    }

    #[test]
    fn test_null_dest() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = p.parse_alu("ALU MOV (null) : S1.x {}");
        assert_eq!(p.instr(a).dest(), None);
    }

    #[test]
    #[should_panic(expected = "unknown token")]
    fn test_unknown_opcode() {
        let mut p = Program::new(ChipClass::Evergreen);
        p.parse_alu("ALU FROB S1.x : S2.x {W}");
    }

    #[test]
    #[should_panic(expected = "unknown token")]
    fn test_unknown_trailer() {
        let mut p = Program::new(ChipClass::Evergreen);
        p.parse_alu("ALU MOV S1.x : S2.x {W} SOMETIMES");
    }

    #[test]
    #[should_panic(expected = "unknown token")]
    fn test_unknown_bank_swizzle() {
        let mut p = Program::new(ChipClass::Evergreen);
        p.parse_alu("ALU MOV S1.x : S2.x {W} VEC_333");
    }

    #[test]
    #[should_panic(expected = "unknown token '|S4.x|'")]
    fn test_abs_on_third_source_rejected() {
        let mut p = Program::new(ChipClass::Evergreen);
        p.parse_alu("ALU MULADD S1.x : S2.x S3.x |S4.x| {W}");
    }

    #[test]
    #[should_panic(expected = "expected 2 sources")]
    fn test_arity_checked_on_parse() {
        let mut p = Program::new(ChipClass::Evergreen);
        p.parse_alu("ALU ADD S1.x : S2.x {W}");
    }

    #[test]
    fn test_group_text() {
        let mut p = Program::new(ChipClass::Evergreen);
        let gid = p.parse_group(
            "ALU_GROUP_BEGIN\n  ALU MOV S1.x@chan : S5.x {W}\n  ALU MOV S1.y@chan : S5.x {WL}\nALU_GROUP_END",
        );
        assert_eq!(p.group(gid).len(), 2);
        let text = format!("{}", p.display_stream());
        assert!(text.starts_with("ALU_GROUP_BEGIN\n  ALU MOV S1.x@chan : S5.x {W}"));
        assert!(text.contains("ALU MOV S1.y@chan : S5.x {WL}"));
    }
}
