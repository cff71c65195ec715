//! # Shader
//!
//! Compile context of one shader: the ALU [`Program`] being built, the map
//! from generic SSA and register indices to hardware registers, and the
//! lowering entry point.
//!
//! [`Shader::lower_alu`] is transactional: on failure the program, the
//! value arena and the index map are exactly as they were before the call.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use hashbrown::HashMap;

use terascale_ir::{
    AluFlags, AluInstr, AluOp, ChipClass, GradientInstr, GroupId, InlineConstant, InstrId, OptimizationStats,
    Optimizer, Pin, Program, RegId, RegisterFlags, TexId, Uniform, Value,
};

use crate::config::ShaderConfig;
use crate::dispatch;
use crate::error::{LowerError, Result};
use crate::op::{AluOperation, DestDescriptor, GenericOp, Operand, SrcDescriptor};

/// Generic value index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DefKey {
    ssa: bool,
    index: u32,
}

/// Map entry created since the last lowering call started
#[derive(Debug, Clone, Copy)]
enum NewKey {
    Sel(DefKey),
    Chan(DefKey, u8),
}

/// Compile context of one shader
#[derive(Debug, Clone)]
pub struct Shader {
    program: Program,
    config: ShaderConfig,
    sels: HashMap<DefKey, u32>,
    regs: HashMap<(DefKey, u8), RegId>,
    new_keys: Vec<NewKey>,
}

impl Shader {
    /// Empty shader
    pub fn new(config: ShaderConfig) -> Self {
        Self {
            program: Program::new(config.chip),
            config,
            sels: HashMap::new(),
            regs: HashMap::new(),
            new_keys: Vec::new(),
        }
    }

    /// Target generation
    pub fn chip(&self) -> ChipClass {
        self.config.chip
    }

    /// Configuration
    pub fn config(&self) -> &ShaderConfig {
        &self.config
    }

    /// The ALU program built so far
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The ALU program, mutable
    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Consume the shader, keeping the program
    pub fn into_program(self) -> Program {
        self.program
    }

    /// Start a new basic block
    pub fn start_block(&mut self) {
        self.program.start_block();
    }

    // =========================================================================
    // Lowering
    // =========================================================================

    /// Lower one generic operation into the instruction stream
    ///
    /// # Panics
    ///
    /// If the operation has the wrong number of sources.
    pub fn lower_alu(&mut self, alu: &AluOperation) -> Result<()> {
        assert!(
            alu.srcs.len() == alu.op.num_srcs(),
            "{}: expected {} sources, got {}",
            alu.op,
            alu.op.num_srcs(),
            alu.srcs.len()
        );

        let chip = self.config.chip;
        let Some(lowering) = dispatch::lookup(chip, alu.is_64bit(), alu.op) else {
            log::debug!("{} has no lowering on {}", alu.op, chip);
            return Err(LowerError::Unsupported { op: alu.op, chip });
        };
        if !(1..=4).contains(&alu.dest.num_components) {
            return Err(LowerError::InvalidComponentCount {
                op: alu.op,
                components: alu.dest.num_components,
            });
        }

        let cp = self.program.checkpoint();
        self.new_keys.clear();
        match lowering.emit(self, alu) {
            Ok(()) => {
                self.program.commit();
                self.new_keys.clear();
                Ok(())
            },
            Err(err) => {
                log::debug!("rolling back {}: {}", alu.op, err);
                self.program.rollback(cp);
                for key in self.new_keys.drain(..) {
                    match key {
                        NewKey::Sel(def) => {
                            self.sels.remove(&def);
                        },
                        NewKey::Chan(def, chan) => {
                            self.regs.remove(&(def, chan));
                        },
                    }
                }
                Err(err)
            },
        }
    }

    /// Run the configured cleanup passes over the program
    pub fn optimize(&mut self) -> OptimizationStats {
        let mut optimizer = Optimizer::new(self.config.optimizer.clone());
        let stats = optimizer.optimize(&mut self.program);
        log::debug!("optimizer: {:?}", stats);
        stats
    }

    /// Mark the written channels of `dest` as read after the shader ends
    pub fn mark_output(&mut self, dest: &DestDescriptor) {
        let wide = dest.bit_size == 64;
        for comp in dest.written() {
            let chans = if wide { [2 * comp, 2 * comp + 1] } else { [comp, comp] };
            for chan in chans {
                let reg = self.dest(dest, chan as u8, Pin::None);
                self.program.values_mut().set_flags(reg, RegisterFlags::OUTPUT);
            }
        }
    }

    // =========================================================================
    // Value factory
    // =========================================================================

    fn sel_for(&mut self, def: DefKey) -> u32 {
        if let Some(&sel) = self.sels.get(&def) {
            return sel;
        }
        let sel = self.program.values_mut().allocate_sel();
        self.sels.insert(def, sel);
        self.new_keys.push(NewKey::Sel(def));
        sel
    }

    fn register_for(&mut self, def: DefKey, chan: u8, pin: Pin) -> RegId {
        if let Some(&id) = self.regs.get(&(def, chan)) {
            return id;
        }
        let sel = self.sel_for(def);
        let flags = if def.ssa {
            RegisterFlags::SSA
        } else {
            RegisterFlags::empty()
        };
        let id = self.program.values_mut().get_or_create(sel, chan, pin, flags);
        self.regs.insert((def, chan), id);
        self.new_keys.push(NewKey::Chan(def, chan));
        id
    }

    /// Channel `chan` of an operand
    pub fn operand(&mut self, operand: &Operand, chan: u8) -> Value {
        match *operand {
            Operand::Ssa(index) => self.register_for(DefKey { ssa: true, index }, chan, Pin::None).into(),
            Operand::Register(index) => self
                .register_for(DefKey { ssa: false, index }, chan, Pin::None)
                .into(),
            Operand::Uniform { bank, offset } => Uniform::new(bank, offset, chan).into(),
            Operand::Immediate(values) => Value::from_bits(values[chan as usize]),
        }
    }

    /// Component `comp` of a 32-bit source
    pub fn src(&mut self, src: &SrcDescriptor, comp: usize) -> Value {
        self.operand(&src.value, src.chan(comp))
    }

    /// Low (`half` 0) or high (`half` 1) word of component `comp` of a
    /// 64-bit source
    pub fn src64(&mut self, src: &SrcDescriptor, comp: usize, half: u8) -> Value {
        self.operand(&src.value, 2 * src.chan(comp) + half)
    }

    /// Register receiving channel `chan` of a destination
    pub fn dest(&mut self, dest: &DestDescriptor, chan: u8, pin: Pin) -> RegId {
        let def = DefKey {
            ssa: dest.is_ssa,
            index: dest.index,
        };
        self.register_for(def, chan, pin)
    }

    /// Fresh scalar temporary, channel chosen by the bundler
    pub fn temp_register(&mut self) -> RegId {
        self.program.values_mut().temp_register(0, Pin::Free)
    }

    /// Fresh scalar temporary pinned to `chan`
    pub fn temp_register_chan(&mut self, chan: u8) -> RegId {
        self.program.values_mut().temp_register(chan, Pin::Chan)
    }

    /// Fresh four-channel temporary
    pub fn temp_vec4(&mut self, pin: Pin) -> [RegId; 4] {
        self.program.values_mut().temp_vec4(pin)
    }

    /// Placeholder destination for lane `chan`
    pub fn dummy_dest(&mut self, chan: u8) -> RegId {
        self.program.values_mut().dummy_dest(chan)
    }

    /// 32-bit literal, always consuming a literal slot
    pub fn literal(&self, bits: u32) -> Value {
        Value::Literal(bits)
    }

    /// Hardware inline constant
    pub fn inline_const(&self, value: InlineConstant) -> Value {
        Value::Inline(value)
    }

    /// Inline zero
    pub fn zero(&self) -> Value {
        Value::zero()
    }

    /// Inline 1.0f
    pub fn one(&self) -> Value {
        Value::one()
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Opcode honoring the legacy math rules
    pub(crate) fn math_op(&self, op: AluOp) -> AluOp {
        if !self.config.legacy_math_rules {
            return op;
        }
        match op {
            AluOp::MulIeee => AluOp::Mul,
            AluOp::MuladdIeee => AluOp::Muladd,
            AluOp::Dot4Ieee => AluOp::Dot4,
            other => other,
        }
    }

    /// Append a stand-alone instruction
    pub(crate) fn emit(&mut self, instr: AluInstr) -> InstrId {
        let id = self.program.add_instr(instr);
        self.program.emit(id);
        id
    }

    /// Close the instruction sequence of an emitter
    pub(crate) fn finish(&mut self, last: Option<InstrId>) {
        if let Some(id) = last {
            self.program.instr_mut(id).set_flag(AluFlags::LAST);
        }
    }

    /// Build one group from `instrs` and append it
    pub(crate) fn emit_group(&mut self, op: GenericOp, instrs: Vec<AluInstr>) -> Result<GroupId> {
        if instrs.is_empty() {
            return Err(LowerError::BundleRejected { op });
        }
        let gid = self.program.new_group();
        for instr in instrs {
            let id = self.program.add_instr(instr);
            if !self.program.add_to_group(gid, id) {
                log::debug!("{}: instruction {} does not fit group {}", op, id.0, gid.0);
                return Err(LowerError::BundleRejected { op });
            }
        }
        self.program.emit_group(gid);
        Ok(gid)
    }

    /// Append a gradient fetch
    pub(crate) fn emit_gradient(&mut self, grad: GradientInstr) -> TexId {
        let id = self.program.add_gradient(grad);
        self.program.emit_gradient(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terascale_ir::Node;

    fn shader() -> Shader {
        Shader::new(ShaderConfig::new(ChipClass::Evergreen))
    }

    #[test]
    fn test_same_def_same_register() {
        let mut sh = shader();
        let d = sh.dest(&DestDescriptor::ssa(3, 2), 1, Pin::None);
        let s = sh.src(&SrcDescriptor::ssa(3).with_swizzle([1, 1, 1, 1]), 0);
        assert_eq!(s, Value::Register(d));
        assert!(sh.program().values().register(d).is_ssa());

        let r = sh.dest(&DestDescriptor::register(3, 1), 1, Pin::None);
        assert_ne!(r, d);
        assert!(!sh.program().values().register(r).is_ssa());
    }

    #[test]
    fn test_src64_halves() {
        let mut sh = shader();
        let src = SrcDescriptor::ssa(0).with_swizzle([1, 0, 0, 0]).with_bit_size(64);
        let lo = sh.src64(&src, 0, 0).as_register().unwrap();
        let hi = sh.src64(&src, 0, 1).as_register().unwrap();
        assert_eq!(sh.program().values().register(lo).chan(), 2);
        assert_eq!(sh.program().values().register(hi).chan(), 3);
    }

    #[test]
    fn test_constant_operands() {
        let mut sh = shader();
        let imm = SrcDescriptor::immediate([0, 0x3f80_0000, 7, 0]);
        assert_eq!(sh.src(&imm, 0), Value::zero());
        assert_eq!(sh.src(&imm, 1), Value::one());
        assert_eq!(sh.src(&imm, 2), Value::Literal(7));
        let u = sh.src(&SrcDescriptor::uniform(1, 5), 3);
        assert_eq!(u, Value::Uniform(Uniform::new(1, 5, 3)));
    }

    #[test]
    fn test_unsupported_leaves_no_state() {
        let mut sh = Shader::new(ShaderConfig::new(ChipClass::R600));
        let before = sh.program().values().len();
        let alu = AluOperation::new(
            GenericOp::Fadd,
            DestDescriptor::ssa(2, 2).with_bit_size(64),
            vec![SrcDescriptor::ssa(0).with_bit_size(64), SrcDescriptor::ssa(1).with_bit_size(64)],
        );
        let err = sh.lower_alu(&alu).unwrap_err();
        assert_eq!(err, LowerError::Unsupported { op: GenericOp::Fadd, chip: ChipClass::R600 });
        assert!(sh.program().stream().is_empty());
        assert_eq!(sh.program().instr_count(), 0);
        assert_eq!(sh.program().values().len(), before);
    }

    #[test]
    fn test_rejected_lowering_rolls_back() {
        let mut sh = shader();
        let mov = AluOperation::new(GenericOp::Mov, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        sh.lower_alu(&mov).unwrap();
        let instrs = sh.program().instr_count();
        let values = sh.program().values().len();
        let stream = sh.program().stream().len();

        // a double multiply only fits one component per group
        let mul = AluOperation::new(
            GenericOp::Fmul,
            DestDescriptor::ssa(5, 2).with_bit_size(64),
            vec![SrcDescriptor::ssa(3).with_bit_size(64), SrcDescriptor::ssa(4).with_bit_size(64)],
        );
        let err = sh.lower_alu(&mul).unwrap_err();
        assert!(matches!(err, LowerError::InvalidComponentCount { components: 2, .. }));
        assert_eq!(sh.program().instr_count(), instrs);
        assert_eq!(sh.program().values().len(), values);
        assert_eq!(sh.program().stream().len(), stream);

        let again = sh.dest(&DestDescriptor::ssa(1, 1), 0, Pin::Free);
        assert_eq!(sh.program().instr(InstrId(0)).dest(), Some(again));
        assert!(!sh.sels.contains_key(&DefKey { ssa: true, index: 5 }));
    }

    #[test]
    fn test_group_emission() {
        let mut sh = shader();
        let a = sh.temp_register_chan(0);
        let b = sh.temp_register_chan(1);
        let instrs = vec![
            AluInstr::new(AluOp::Mov, Some(a), vec![Value::one()], AluFlags::WRITE),
            AluInstr::new(AluOp::Mov, Some(b), vec![Value::zero()], AluFlags::WRITE),
        ];
        let gid = sh.emit_group(GenericOp::Vec2, instrs).unwrap();
        assert_eq!(sh.program().stream(), &[Node::Group(gid)]);
        let last = sh.program().group(gid).last_instr().unwrap();
        assert!(sh.program().instr(last).has_flag(AluFlags::LAST));
        assert_eq!(sh.program().instr(last).dest(), Some(b));
    }

    #[test]
    fn test_optimize_keeps_outputs() {
        let mut sh = shader();
        let mov = AluOperation::new(GenericOp::Mov, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        let add = AluOperation::new(
            GenericOp::Fadd,
            DestDescriptor::ssa(2, 1),
            vec![SrcDescriptor::ssa(1), SrcDescriptor::ssa(1)],
        );
        sh.lower_alu(&mov).unwrap();
        sh.lower_alu(&add).unwrap();
        sh.mark_output(&add.dest);

        let stats = sh.optimize();
        assert!(stats.sources_propagated >= 1);
        assert!(stats.instructions_eliminated >= 1);

        let program = sh.into_program();
        assert!(program.instr(InstrId(0)).is_dead());
        let kept = program.instr(InstrId(1));
        assert!(!kept.is_dead());
        let out = kept.dest().unwrap();
        assert!(program.values().register(out).flags().contains(RegisterFlags::OUTPUT));
        assert_eq!(program.emitted_instrs(), vec![InstrId(1)]);
    }

    #[test]
    fn test_legacy_math_ops() {
        let sh = Shader::new(ShaderConfig::new(ChipClass::R700).with_legacy_math_rules(true));
        assert_eq!(sh.math_op(AluOp::MulIeee), AluOp::Mul);
        assert_eq!(sh.math_op(AluOp::Dot4Ieee), AluOp::Dot4);
        assert_eq!(sh.math_op(AluOp::Add), AluOp::Add);
        assert_eq!(shader().math_op(AluOp::MulIeee), AluOp::MulIeee);
    }

    #[test]
    #[should_panic(expected = "expected 2 sources")]
    fn test_arity_checked() {
        let mut sh = shader();
        let alu = AluOperation::new(GenericOp::Fadd, DestDescriptor::ssa(1, 1), vec![SrcDescriptor::ssa(0)]);
        let _ = sh.lower_alu(&alu);
    }
}
