//! # Local Rewrites
//!
//! Operand and destination substitution used by copy propagation, dead
//! code removal, readiness queries for the scheduler and splitting of
//! multi-slot instructions into groups.
//!
//! Every rewrite either applies completely, keeping the use and parent
//! lists consistent, or returns `false` and leaves the program untouched.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::group::GroupId;
use crate::instr::{AluFlags, AluInstr, InstrId, Position};
use crate::opcode::AluOp;
use crate::program::{link_dest, unlink_dest, Program};
use crate::value::{Pin, RegId, Value};

fn value_addr(program: &Program, v: &Value) -> Option<RegId> {
    match v {
        Value::Register(r) => program.values().register(*r).addr(),
        Value::Uniform(u) => u.buf_addr,
        _ => None,
    }
}

impl Program {
    // =========================================================================
    // Propagation predicates
    // =========================================================================

    /// Whether the instruction is a plain move that copy propagation may
    /// look through
    pub fn can_copy_propagate(&self, id: InstrId) -> bool {
        let instr = self.instr(id);
        instr.alu_op() == Some(AluOp::Mov)
            && !instr.has_flag(AluFlags::SRC0_ABS)
            && !instr.has_flag(AluFlags::SRC0_NEG)
            && !instr.has_flag(AluFlags::DST_CLAMP)
            && instr.writes()
    }

    /// Whether readers of the move's destination may read its source
    /// instead
    pub fn can_propagate_src(&self, id: InstrId) -> bool {
        if !self.can_copy_propagate(id) {
            return false;
        }
        let instr = self.instr(id);
        let Some(src) = instr.src(0).as_register() else {
            return true;
        };
        let Some(dest) = instr.dest() else {
            return false;
        };
        let (d, s) = (self.values().register(dest), self.values().register(src));
        if !d.is_ssa() {
            return false;
        }
        match d.pin() {
            Pin::Fully => dest == src,
            Pin::Chan => s.pin() == Pin::None || (s.pin() == Pin::Chan && s.chan() == d.chan()),
            Pin::None | Pin::Free => true,
            _ => false,
        }
    }

    /// Whether the writer of the move's source may write the move's
    /// destination directly
    pub fn can_propagate_dest(&self, id: InstrId) -> bool {
        if !self.can_copy_propagate(id) {
            return false;
        }
        let instr = self.instr(id);
        let (Some(src), Some(dest)) = (instr.src(0).as_register(), instr.dest()) else {
            return false;
        };
        let (d, s) = (self.values().register(dest), self.values().register(src));
        if !s.is_ssa() {
            return false;
        }
        match s.pin() {
            Pin::Chan => match d.pin() {
                Pin::None | Pin::Free => true,
                Pin::Chan | Pin::Group => s.chan() == d.chan(),
                _ => false,
            },
            Pin::None | Pin::Free => true,
            _ => false,
        }
    }

    // =========================================================================
    // Substitution
    // =========================================================================

    /// Replace every read of `old` by `new`
    ///
    /// Rejected when `old` is an array element, when `new` brings an
    /// address register that conflicts with one already used, or when the
    /// updated sources no longer fit the read ports of the instruction or
    /// its group. A grouped instruction gets new bank swizzles for the
    /// whole group.
    pub fn replace_source(&mut self, id: InstrId, old: RegId, new: Value) -> bool {
        if self.values().register(old).pin() == Pin::Array {
            return false;
        }

        let instr = self.instr(id);
        if let Some(new_addr) = value_addr(self, &new) {
            if instr
                .sources()
                .iter()
                .filter_map(|s| value_addr(self, s))
                .any(|a| a != new_addr)
            {
                return false;
            }
            let dest_addr = instr.dest().and_then(|d| self.values().register(d).addr());
            if matches!(dest_addr, Some(a) if a != new_addr) {
                return false;
            }
        }

        let old_value = Value::Register(old);
        if !instr.sources().contains(&old_value) {
            return false;
        }
        let srcs: Vec<Value> = instr
            .sources()
            .iter()
            .map(|s| if *s == old_value { new } else { *s })
            .collect();

        match instr.parent_group() {
            Some(gid) => {
                let Some((reservation, plan)) = self.plan_group(gid, None, Some((id, &srcs))) else {
                    log::trace!("instr {}: replacement rejected by group read ports", id.0);
                    return false;
                };
                self.apply_plan(gid, reservation, &plan);
            }
            None => {
                if !self.instruction_fits(id, &srcs) {
                    log::trace!("instr {}: replacement rejected by read ports", id.0);
                    return false;
                }
            }
        }

        self.set_sources(id, srcs);
        true
    }

    /// Let the instruction write `new_dest` in place of the move `mov`
    /// that copied its result
    pub fn replace_dest(&mut self, id: InstrId, new_dest: RegId, mov: InstrId) -> bool {
        let Some(dest) = self.instr(id).dest() else {
            return false;
        };
        if dest == new_dest {
            return false;
        }
        let (cur, new) = (self.values().register(dest), self.values().register(new_dest));
        if cur.uses().len() > 1 || new.pin() == Pin::Array {
            return false;
        }
        if cur.pin() == Pin::Chan && new.chan() != cur.chan() {
            return false;
        }
        if self.instr(id).parent_group().is_some() && new.chan() != cur.chan() {
            return false;
        }

        if cur.pin() == Pin::Chan {
            let pin = if new.pin() == Pin::Group { Pin::ChanGroup } else { Pin::Chan };
            self.values_mut().set_pin(new_dest, pin);
        }

        let writes = self.instr(id).writes();
        unlink_dest(self.values_mut(), dest, id);
        self.instr_mut(id).dest = Some(new_dest);
        if writes {
            link_dest(self.values_mut(), new_dest, id);
        }
        self.update_relative_flags(id);

        let grouped = self.instr(id).parent_group().is_some();
        if !grouped && !self.instr(mov).has_flag(AluFlags::LAST) {
            self.instr_mut(id).reset_flag(AluFlags::LAST);
        }

        let instr = self.instr(id);
        if instr.has_flag(AluFlags::IS_CAYMAN_TRANS)
            && self.values().register(new_dest).chan() == 3
            && instr.slots() < 4
        {
            // the w lane needs a slot of its own
            let extra = instr.slot_sources(0).to_vec();
            let widened = self.instr_mut(id);
            widened.slots = 4;
            widened.src.extend(extra);
        }
        true
    }

    // =========================================================================
    // Death
    // =========================================================================

    /// Drop the instruction's source uses because its result is unused
    ///
    /// Returns `false` if the instruction has to stay: interpolation lanes
    /// only lose their write, array writes and replicated Cayman
    /// transcendentals are kept.
    pub fn propagate_death(&mut self, id: InstrId) -> bool {
        let instr = self.instr(id);
        if let Some(dest) = instr.dest() {
            let pin = self.values().register(dest).pin();
            if matches!(pin, Pin::Group | Pin::Chan) && instr.alu_op().is_some_and(AluOp::is_interp) {
                if instr.writes() {
                    self.instr_mut(id).reset_flag(AluFlags::WRITE);
                    unlink_dest(self.values_mut(), dest, id);
                }
                return false;
            }
            if pin == Pin::Array || instr.has_flag(AluFlags::IS_CAYMAN_TRANS) {
                return false;
            }
        }
        self.unlink_sources(id);
        true
    }

    /// Remove an instruction from the program
    pub fn set_dead(&mut self, id: InstrId) {
        self.unlink(id);
        self.instr_mut(id).dead = true;
        log::trace!("instr {} removed", id.0);
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    fn writers_before(&self, writers: &[InstrId], pos: Position) -> bool {
        writers.iter().all(|&w| {
            let instr = self.instr(w);
            let p = instr.position();
            instr.is_dead() || instr.is_scheduled() || p.block > pos.block || p.index >= pos.index
        })
    }

    /// Whether every write of `reg` placed before `pos` was scheduled
    ///
    /// An array element also waits for indirect writes to its array, and
    /// an indirectly addressed element waits for all writes to the array.
    pub fn register_ready(&self, reg: RegId, pos: Position) -> bool {
        let r = self.values().register(reg);
        if let Some(link) = r.array() {
            let array = self.values().array(link.array);
            if link.addr.is_some() {
                return self.writers_before(array.writers(), pos);
            }
            if !self.writers_before(array.indirect_writers(), pos) {
                return false;
            }
        }
        self.writers_before(r.parents(), pos)
    }

    /// Whether the scheduler may place the instruction now
    pub fn is_ready(&self, id: InstrId) -> bool {
        let instr = self.instr(id);
        let pos = instr.position();

        if instr.required_instrs().iter().any(|&r| !self.instr(r).is_scheduled()) {
            return false;
        }

        for v in instr.sources() {
            let ready = match v {
                Value::Register(r) => {
                    self.register_ready(*r, pos)
                        && self.values().register(*r).addr().map_or(true, |a| self.register_ready(a, pos))
                }
                Value::Uniform(u) => u.buf_addr.map_or(true, |a| self.register_ready(a, pos)),
                _ => true,
            };
            if !ready {
                return false;
            }
        }

        if let Some(dest) = instr.dest() {
            let d = self.values().register(dest);
            if !d.is_ssa() {
                if let Some(addr) = d.addr() {
                    let before = Position {
                        block: pos.block,
                        index: pos.index.saturating_sub(1),
                    };
                    if !self.register_ready(addr, pos) || !self.register_ready(dest, before) {
                        return false;
                    }
                }
                // earlier reads of the old value must go first
                let pending_read = d.uses().iter().any(|&u| {
                    let user = self.instr(u);
                    let p = user.position();
                    u != id && !user.is_scheduled() && p.block <= pos.block && p.index < pos.index
                });
                if pending_read {
                    return false;
                }
            }
        }

        instr.extra_dependencies().iter().all(|&r| self.register_ready(r, pos))
    }

    // =========================================================================
    // Split
    // =========================================================================

    /// Turn a multi-slot instruction into a group of single-slot ones
    ///
    /// Only the lane matching the destination channel writes, the other
    /// lanes get placeholder destinations. Source registers are pinned to
    /// their lane. Returns `None` for single-slot instructions.
    ///
    /// # Panics
    ///
    /// If a lane does not fit the new group.
    pub fn split(&mut self, id: InstrId) -> Option<GroupId> {
        let instr = self.instr(id);
        if instr.slots() == 1 {
            return None;
        }
        let dest = instr.dest()?;
        let op = instr.alu_op()?;
        let (slots, nsrc, flags, pos) = (instr.slots(), instr.nsrc(), instr.flags(), instr.position());
        let srcs = instr.sources().to_vec();
        let dest_chan = self.values().register(dest).chan() as usize;
        log::debug!("split {}", self.display(id));

        self.set_dead(id);
        let gid = self.new_group();

        for s in 0..slots {
            let dst = if s == dest_chan {
                dest
            } else {
                self.values_mut().dummy_dest(s as u8)
            };
            let pin = self.values().register(dst).pin();
            if pin != Pin::ChanGroup {
                let placed = if pin == Pin::Group { Pin::ChanGroup } else { Pin::Chan };
                self.values_mut().set_pin(dst, placed);
            }

            let lane_srcs = srcs[s * nsrc..(s + 1) * nsrc].to_vec();
            for r in lane_srcs.iter().filter_map(Value::as_register) {
                match self.values().register(r).pin() {
                    Pin::Free | Pin::None => self.values_mut().set_pin(r, Pin::Chan),
                    Pin::Group => self.values_mut().set_pin(r, Pin::ChanGroup),
                    _ => {}
                }
            }

            let mut lane_flags = flags & AluFlags::DST_CLAMP;
            if s == 0 || !flags.contains(AluFlags::IS_64BIT) {
                lane_flags |= flags
                    & (AluFlags::SRC0_NEG
                        | AluFlags::SRC1_NEG
                        | AluFlags::SRC2_NEG
                        | AluFlags::SRC0_ABS
                        | AluFlags::SRC1_ABS);
            }
            if s == dest_chan {
                lane_flags |= AluFlags::WRITE;
            }

            let lane = self.add_instr(AluInstr::new(op, Some(dst), lane_srcs, lane_flags));
            self.instr_mut(lane).position = pos;
            assert!(
                self.add_to_group(gid, lane),
                "unable to place lane {} of split instruction {}",
                s,
                id.0
            );
            log::trace!("  {}", self.display(lane));
        }
        Some(gid)
    }
}
