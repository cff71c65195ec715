//! # Peephole Optimizer
//!
//! Local cleanup of freshly lowered ALU code: forward and backward copy
//! propagation through plain moves, and removal of instructions whose
//! result nobody reads. Passes run to a fixed point bounded by
//! [`OptimizerConfig::max_iterations`].

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use crate::instr::{AluFlags, CfMarker, InstrId, Position};
use crate::program::Program;
use crate::value::{RegId, RegisterFlags, Value};

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    /// Leave the code as emitted
    None,
    /// Dead code elimination only
    Basic,
    /// Forward copy propagation and dead code elimination
    #[default]
    Standard,
    /// All passes, more iterations
    Aggressive,
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Optimization level
    pub level: OptimizationLevel,
    /// Let readers of a move read its source
    pub forward_copy_propagation: bool,
    /// Let the producer of a moved value write the move's destination
    pub backward_copy_propagation: bool,
    /// Remove instructions with unused results
    pub dead_code_elimination: bool,
    /// Maximum fixed-point iterations
    pub max_iterations: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::with_level(OptimizationLevel::Standard)
    }
}

impl OptimizerConfig {
    /// Configuration for a level
    pub fn with_level(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => Self {
                level,
                forward_copy_propagation: false,
                backward_copy_propagation: false,
                dead_code_elimination: false,
                max_iterations: 0,
            },
            OptimizationLevel::Basic => Self {
                level,
                forward_copy_propagation: false,
                backward_copy_propagation: false,
                dead_code_elimination: true,
                max_iterations: 1,
            },
            OptimizationLevel::Standard => Self {
                level,
                forward_copy_propagation: true,
                backward_copy_propagation: false,
                dead_code_elimination: true,
                max_iterations: 4,
            },
            OptimizationLevel::Aggressive => Self {
                level,
                forward_copy_propagation: true,
                backward_copy_propagation: true,
                dead_code_elimination: true,
                max_iterations: 8,
            },
        }
    }
}

/// Optimization pass over a program
pub trait OptimizationPass {
    /// Pass name
    fn name(&self) -> &'static str;

    /// Run once, returning the number of rewrites
    fn run(&mut self, program: &mut Program) -> u32;
}

/// Statistics of one optimizer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationStats {
    /// Iterations run
    pub iterations: u32,
    /// Sources rewritten to bypass a move
    pub sources_propagated: u32,
    /// Producers retargeted to a move's destination
    pub dests_propagated: u32,
    /// Instructions removed
    pub instructions_eliminated: u32,
}

/// Whether removing the instruction would change more than its result
fn has_side_effects(program: &Program, id: InstrId) -> bool {
    let instr = program.instr(id);
    instr.has_lds_access()
        || instr.has_flag(AluFlags::UPDATE_EXEC)
        || instr.has_flag(AluFlags::UPDATE_PRED)
        || instr.cf() != CfMarker::Alu
        || instr.parent_group().is_some()
}

// ============================================================================
// Forward Copy Propagation
// ============================================================================

/// Rewrites readers of a move to read the move's source
#[derive(Debug, Default)]
pub struct ForwardCopyPropagation;

impl ForwardCopyPropagation {
    fn source_stable(program: &Program, src: &Value, from: Position, to: Position) -> bool {
        let Value::Register(r) = src else {
            return true;
        };
        let reg = program.values().register(*r);
        if reg.is_ssa() {
            return true;
        }
        // a non-SSA source must not be rewritten between the move and the read
        reg.parents().iter().all(|&w| {
            let p = program.instr(w).position();
            p.block != from.block || p.index < from.index || p.index > to.index
        })
    }

    fn dest_stable(program: &Program, mov: InstrId, dest: RegId, from: Position, to: Position) -> bool {
        let reg = program.values().register(dest);
        if reg.is_ssa() {
            return true;
        }
        // no other write of a non-SSA destination may reach the reader first
        reg.parents().iter().all(|&w| {
            if w == mov || program.instr(w).is_dead() {
                return true;
            }
            let p = program.instr(w).position();
            p.block != from.block || p.index < from.index || p.index >= to.index
        })
    }
}

impl OptimizationPass for ForwardCopyPropagation {
    fn name(&self) -> &'static str {
        "forward-copy-propagation"
    }

    fn run(&mut self, program: &mut Program) -> u32 {
        let movs: Vec<InstrId> = program.instrs().map(|(id, _)| id).collect();
        let mut rewrites = 0;
        for mov in movs {
            if program.instr(mov).is_dead() || !program.can_propagate_src(mov) {
                continue;
            }
            let (Some(dest), src, pos) = ({
                let instr = program.instr(mov);
                (instr.dest(), *instr.src(0), instr.position())
            }) else {
                continue;
            };
            let uses = program.values().register(dest).uses().to_vec();
            for user in uses {
                let at = program.instr(user).position();
                if user == mov || at.block != pos.block || at.index < pos.index {
                    continue;
                }
                if !Self::source_stable(program, &src, pos, at)
                    || !Self::dest_stable(program, mov, dest, pos, at)
                {
                    continue;
                }
                if program.replace_source(user, dest, src) {
                    log::trace!("fwd copy prop: instr {} reads {:?}", user.0, src);
                    rewrites += 1;
                }
            }
            let reg = program.values().register(dest);
            if !reg.has_uses() && !reg.flags().contains(RegisterFlags::OUTPUT) && !has_side_effects(program, mov) {
                program.set_dead(mov);
            }
        }
        rewrites
    }
}

// ============================================================================
// Backward Copy Propagation
// ============================================================================

/// Retargets the producer of a moved value to the move's destination
#[derive(Debug, Default)]
pub struct BackwardCopyPropagation;

impl BackwardCopyPropagation {
    fn producer(program: &Program, mov: InstrId) -> Option<(InstrId, RegId, RegId)> {
        let instr = program.instr(mov);
        let src = instr.src(0).as_register()?;
        let dest = instr.dest()?;
        let reg = program.values().register(src);
        if reg.uses() != [mov] || !reg.tex_uses().is_empty() {
            return None;
        }
        let &[producer] = reg.parents() else {
            return None;
        };
        let p = program.instr(producer);
        if p.slots() > 1 || !p.writes() || p.is_dead() {
            return None;
        }
        let (from, to) = (p.position(), instr.position());
        if from.block != to.block || from.index > to.index {
            return None;
        }
        // the destination may not be touched between producer and move
        let d = program.values().register(dest);
        let touched = d.uses().iter().chain(d.parents()).any(|&i| {
            let at = program.instr(i).position();
            i != mov && at.block == from.block && at.index >= from.index && at.index <= to.index
        });
        if touched {
            return None;
        }
        Some((producer, src, dest))
    }
}

impl OptimizationPass for BackwardCopyPropagation {
    fn name(&self) -> &'static str {
        "backward-copy-propagation"
    }

    fn run(&mut self, program: &mut Program) -> u32 {
        let movs: Vec<InstrId> = program.instrs().map(|(id, _)| id).collect();
        let mut rewrites = 0;
        for mov in movs {
            if program.instr(mov).is_dead()
                || program.instr(mov).parent_group().is_some()
                || !program.can_propagate_dest(mov)
            {
                continue;
            }
            let Some((producer, _, dest)) = Self::producer(program, mov) else {
                continue;
            };
            if program.replace_dest(producer, dest, mov) {
                log::trace!("bwd copy prop: instr {} writes {}", producer.0, program.display_register(dest));
                program.set_dead(mov);
                rewrites += 1;
            }
        }
        rewrites
    }
}

// ============================================================================
// Dead Code Elimination
// ============================================================================

/// Removes instructions whose SSA result is never read
#[derive(Debug, Default)]
pub struct DeadCodeElimination;

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&mut self, program: &mut Program) -> u32 {
        let candidates: Vec<InstrId> = program
            .instrs()
            .filter(|(_, i)| i.writes())
            .map(|(id, _)| id)
            .collect();
        let mut removed = 0;
        // walk backwards so chains die in one sweep
        for id in candidates.into_iter().rev() {
            let Some(dest) = program.instr(id).dest() else {
                continue;
            };
            let reg = program.values().register(dest);
            if !reg.is_ssa() || reg.has_uses() || reg.flags().contains(RegisterFlags::OUTPUT) {
                continue;
            }
            if has_side_effects(program, id) {
                continue;
            }
            let wrote = program.instr(id).writes();
            if program.propagate_death(id) {
                program.set_dead(id);
                removed += 1;
            } else if wrote && !program.instr(id).writes() {
                removed += 1;
            }
        }
        removed
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Pass manager
pub struct Optimizer {
    config: OptimizerConfig,
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    /// Optimizer with the passes enabled by `config`
    pub fn new(config: OptimizerConfig) -> Self {
        let mut passes: Vec<Box<dyn OptimizationPass>> = Vec::new();
        if config.forward_copy_propagation {
            passes.push(Box::new(ForwardCopyPropagation));
        }
        if config.backward_copy_propagation {
            passes.push(Box::new(BackwardCopyPropagation));
        }
        if config.dead_code_elimination {
            passes.push(Box::new(DeadCodeElimination));
        }
        Self { config, passes }
    }

    /// Configuration in use
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Add a custom pass
    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Run all passes until nothing changes
    pub fn optimize(&mut self, program: &mut Program) -> OptimizationStats {
        let mut stats = OptimizationStats::default();
        for iteration in 0..self.config.max_iterations {
            let mut changed = false;
            for pass in &mut self.passes {
                let before = program.instrs().count();
                let n = pass.run(program);
                if n == 0 {
                    continue;
                }
                changed = true;
                log::debug!("{}: {} rewrites", pass.name(), n);
                match pass.name() {
                    "forward-copy-propagation" => stats.sources_propagated += n,
                    "backward-copy-propagation" => stats.dests_propagated += n,
                    _ => {}
                }
                stats.instructions_eliminated += (before - program.instrs().count()) as u32;
            }
            stats.iterations = iteration + 1;
            if !changed {
                break;
            }
        }
        stats
    }
}

impl core::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<&str> = self.passes.iter().map(|p| p.name()).collect();
        f.debug_struct("Optimizer")
            .field("config", &self.config)
            .field("passes", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipClass;

    fn program(lines: &[&str]) -> (Program, Vec<InstrId>) {
        let mut p = Program::new(ChipClass::Evergreen);
        let ids = lines
            .iter()
            .map(|l| {
                let id = p.parse_alu(l);
                p.emit(id);
                id
            })
            .collect();
        (p, ids)
    }

    #[test]
    fn test_config_levels() {
        let none = OptimizerConfig::with_level(OptimizationLevel::None);
        assert_eq!(none.max_iterations, 0);
        assert!(!none.dead_code_elimination);
        let default = OptimizerConfig::default();
        assert_eq!(default.level, OptimizationLevel::Standard);
        assert!(default.forward_copy_propagation);
        assert!(!default.backward_copy_propagation);
        assert!(OptimizerConfig::with_level(OptimizationLevel::Aggressive).backward_copy_propagation);
    }

    #[test]
    fn test_forward_propagation_kills_move() {
        let (mut p, ids) = program(&[
            "ALU ADD S3.x : S1.x S2.x {WL}",
            "ALU MOV S4.x : S3.x {WL}",
            "ALU MUL_IEEE R5.x : S4.x S4.x {WL}",
        ]);
        let out = p.instr(ids[2]).dest().unwrap();
        p.values_mut().set_flags(out, RegisterFlags::OUTPUT);
        let mut opt = Optimizer::new(OptimizerConfig::default());
        let stats = opt.optimize(&mut p);
        assert_eq!(stats.sources_propagated, 1);
        assert_eq!(stats.instructions_eliminated, 1);
        assert!(p.instr(ids[1]).is_dead());
        assert_eq!(p.print(ids[2]), "ALU MUL_IEEE R5.x : S3.x S3.x {WL}");
        assert_eq!(p.emitted_instrs(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_forward_propagation_stops_at_redefinition() {
        let (mut p, ids) = program(&[
            "ALU MOV S4.x : R1.x {WL}",
            "ALU MOV R1.x : I[1.0] {WL}",
            "ALU ADD R6.x : S4.x I[0] {WL}",
        ]);
        let out = p.instr(ids[2]).dest().unwrap();
        p.values_mut().set_flags(out, RegisterFlags::OUTPUT);
        let mut opt = Optimizer::new(OptimizerConfig::default());
        opt.optimize(&mut p);
        assert!(!p.instr(ids[0]).is_dead());
        assert_eq!(p.print(ids[2]), "ALU ADD R6.x : S4.x I[0] {WL}");
    }

    #[test]
    fn test_forward_propagation_respects_later_write_of_dest() {
        let (mut p, ids) = program(&[
            "ALU MOV R1.x : I[1.0] {WL}",
            "ALU MOV R1.x : S2.x {WL}",
            "ALU ADD R6.x : R1.x I[0] {WL}",
        ]);
        let out = p.instr(ids[2]).dest().unwrap();
        p.values_mut().set_flags(out, RegisterFlags::OUTPUT);
        let before = p.instr(ids[2]).sources().to_vec();
        let mut opt = Optimizer::new(OptimizerConfig::default());
        let stats = opt.optimize(&mut p);
        assert_eq!(stats.sources_propagated, 0);
        assert_eq!(p.instr(ids[2]).sources(), &before[..]);
        assert_eq!(p.print(ids[2]), "ALU ADD R6.x : R1.x I[0] {WL}");
        assert!(!p.instr(ids[1]).is_dead());
    }

    #[test]
    fn test_forward_propagation_of_constant_into_register() {
        let (mut p, ids) = program(&["ALU MOV R1.x : I[1.0] {WL}", "ALU ADD R6.x : R1.x I[0] {WL}"]);
        let out = p.instr(ids[1]).dest().unwrap();
        p.values_mut().set_flags(out, RegisterFlags::OUTPUT);
        let mut opt = Optimizer::new(OptimizerConfig::default());
        let stats = opt.optimize(&mut p);
        assert_eq!(stats.sources_propagated, 1);
        assert_eq!(p.print(ids[1]), "ALU ADD R6.x : I[1.0] I[0] {WL}");
        assert!(p.instr(ids[0]).is_dead());
    }

    #[test]
    fn test_backward_propagation() {
        let (mut p, ids) = program(&["ALU ADD S3.x : S1.x S2.x {WL}", "ALU MOV R7.x : S3.x {WL}"]);
        let mut opt = Optimizer::new(OptimizerConfig::with_level(OptimizationLevel::Aggressive));
        let stats = opt.optimize(&mut p);
        assert_eq!(stats.dests_propagated, 1);
        assert!(p.instr(ids[1]).is_dead());
        assert_eq!(p.print(ids[0]), "ALU ADD R7.x : S1.x S2.x {WL}");
    }

    #[test]
    fn test_dead_chain_removed() {
        let (mut p, ids) = program(&["ALU ADD S3.x : S1.x S2.x {WL}", "ALU MUL S4.x : S3.x S3.x {WL}"]);
        let mut opt = Optimizer::new(OptimizerConfig::with_level(OptimizationLevel::Basic));
        let stats = opt.optimize(&mut p);
        assert_eq!(stats.instructions_eliminated, 2);
        assert!(ids.iter().all(|&i| p.instr(i).is_dead()));
        assert!(!p.values().register(p.instr(ids[0]).sources()[0].as_register().unwrap()).has_uses());
    }

    #[test]
    fn test_side_effects_kept() {
        let (mut p, ids) = program(&[
            "ALU SETE S3.x : S1.x I[0] {WLEP}",
            "ALU MOV S4.x : S1.x {WL} PUSH_BEFORE",
        ]);
        let mut opt = Optimizer::new(OptimizerConfig::default());
        opt.optimize(&mut p);
        assert!(ids.iter().all(|&i| !p.instr(i).is_dead()));
    }

    #[test]
    fn test_level_none_is_identity() {
        let (mut p, ids) = program(&["ALU MOV S4.x : S1.x {WL}"]);
        let mut opt = Optimizer::new(OptimizerConfig::with_level(OptimizationLevel::None));
        let stats = opt.optimize(&mut p);
        assert_eq!(stats, OptimizationStats::default());
        assert!(!p.instr(ids[0]).is_dead());
    }
}
