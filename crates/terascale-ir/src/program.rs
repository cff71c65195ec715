//! # Program
//!
//! Arena owning the values, instructions, groups and gradient nodes of one
//! shader, plus the ordered instruction stream handed to the encoder.
//!
//! Instructions refer to registers by [`RegId`] and registers refer back to
//! their readers and writers by [`InstrId`]. All mutation that touches both
//! sides goes through `Program` so the two directions stay consistent.
//!
//! ```text
//!   ValuePool ◄──── uses / parents ────┐
//!      ▲                               │
//!      │ RegId                         │ InstrId
//!   AluInstr ──── parent_group ────► AluGroup
//!      ▲                               ▲
//!      └────────── stream: Node ───────┘
//! ```

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use arrayvec::ArrayVec;

use crate::chip::ChipClass;
use crate::group::{AluGroup, GroupId, TRANS_LANE};
use crate::instr::{AluFlags, AluInstr, BankSwizzle, CfMarker, InstrId, Opcode, Position};
use crate::opcode::Units;
use crate::pool::{PoolCheckpoint, ValuePool};
use crate::readport::{self, LaneReads, PortRead, ReadPortReservation};
use crate::tex::{GradientInstr, TexId};
use crate::value::{Pin, RegId, Value};

/// Entry of the instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// Instruction emitted on its own
    Alu(InstrId),
    /// Complete group
    Group(GroupId),
    /// Gradient fetch
    Gradient(TexId),
}

/// Indirect addressing used by an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndirectAddr {
    /// Address register
    pub addr: Option<RegId>,
    /// The address indexes the destination array
    pub for_dest: bool,
    /// The address selects a constant buffer
    pub is_index: bool,
}

/// Saved program state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pool: PoolCheckpoint,
    instrs: usize,
    groups: usize,
    gradients: usize,
    stream: usize,
    next_index: u32,
}

/// Lane placement computed for a group
pub(crate) type LanePlan = ArrayVec<(usize, InstrId, BankSwizzle), 5>;

/// Arena of one shader's ALU code
#[derive(Debug, Clone)]
pub struct Program {
    chip: ChipClass,
    values: ValuePool,
    instrs: Vec<AluInstr>,
    groups: Vec<AluGroup>,
    gradients: Vec<GradientInstr>,
    stream: Vec<Node>,
    block: u32,
    next_index: u32,
}

impl Program {
    /// Empty program for `chip`
    pub fn new(chip: ChipClass) -> Self {
        Self {
            chip,
            values: ValuePool::new(),
            instrs: Vec::new(),
            groups: Vec::new(),
            gradients: Vec::new(),
            stream: Vec::new(),
            block: 0,
            next_index: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Target generation
    pub fn chip(&self) -> ChipClass {
        self.chip
    }

    /// Value arena
    pub fn values(&self) -> &ValuePool {
        &self.values
    }

    /// Value arena, mutable
    pub fn values_mut(&mut self) -> &mut ValuePool {
        &mut self.values
    }

    /// Instruction by id
    pub fn instr(&self, id: InstrId) -> &AluInstr {
        &self.instrs[id.index()]
    }

    /// Instruction by id, mutable
    ///
    /// Sources and destination can only be changed through `Program`.
    pub fn instr_mut(&mut self, id: InstrId) -> &mut AluInstr {
        &mut self.instrs[id.index()]
    }

    /// Number of instructions in the arena
    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    /// All live instructions
    pub fn instrs(&self) -> impl Iterator<Item = (InstrId, &AluInstr)> {
        self.instrs
            .iter()
            .enumerate()
            .filter(|(_, i)| !i.dead)
            .map(|(n, i)| (InstrId(n as u32), i))
    }

    /// Group by id
    pub fn group(&self, id: GroupId) -> &AluGroup {
        &self.groups[id.index()]
    }

    /// Number of groups in the arena
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Gradient node by id
    pub fn gradient(&self, id: TexId) -> &GradientInstr {
        &self.gradients[id.index()]
    }

    /// Emitted nodes in order
    pub fn stream(&self) -> &[Node] {
        &self.stream
    }

    /// Emitted instructions in order, group members in lane order
    pub fn emitted_instrs(&self) -> Vec<InstrId> {
        let mut out = Vec::new();
        for node in &self.stream {
            match *node {
                Node::Alu(id) if !self.instrs[id.index()].dead => out.push(id),
                Node::Group(gid) => out.extend(
                    self.groups[gid.index()]
                        .members()
                        .filter(|m| !self.instrs[m.index()].dead),
                ),
                _ => {}
            }
        }
        out
    }

    /// Current basic block
    pub fn block(&self) -> u32 {
        self.block
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Insert an instruction into the arena
    ///
    /// Registers the instruction as a use of every register it reads
    /// (including indirect address registers) and, when it writes, as a
    /// parent of its destination.
    pub fn add_instr(&mut self, mut instr: AluInstr) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        instr.flags |= self.relative_flags(&instr);
        self.instrs.push(instr);
        self.link(id);
        id
    }

    /// Relative-addressing flags implied by the operands
    pub(crate) fn relative_flags(&self, instr: &AluInstr) -> AluFlags {
        let nsrc = instr.nsrc();
        let mut rel = AluFlags::empty();
        for (i, v) in instr.src.iter().enumerate() {
            if let Value::Register(r) = v {
                if self.values.register(*r).addr().is_some() {
                    rel |= AluFlags::rel(i % nsrc);
                }
            }
        }
        if let Some(d) = instr.dest {
            if self.values.register(d).addr().is_some() {
                rel |= AluFlags::DST_REL;
            }
        }
        rel
    }

    pub(crate) fn update_relative_flags(&mut self, id: InstrId) {
        let rel = self.relative_flags(&self.instrs[id.index()]);
        let instr = &mut self.instrs[id.index()];
        instr.flags.remove(AluFlags::SRC0_REL | AluFlags::SRC1_REL | AluFlags::SRC2_REL | AluFlags::DST_REL);
        instr.flags |= rel;
    }

    fn link(&mut self, id: InstrId) {
        let instr = &self.instrs[id.index()];
        for v in &instr.src {
            add_value_use(&mut self.values, v, id);
        }
        if instr.writes() {
            if let Some(d) = instr.dest {
                link_dest(&mut self.values, d, id);
            }
        }
    }

    pub(crate) fn unlink(&mut self, id: InstrId) {
        let instr = &self.instrs[id.index()];
        for v in &instr.src {
            del_value_use(&mut self.values, v, id);
        }
        if let Some(d) = instr.dest {
            unlink_dest(&mut self.values, d, id);
        }
    }

    pub(crate) fn unlink_sources(&mut self, id: InstrId) {
        let instr = &self.instrs[id.index()];
        for v in &instr.src {
            del_value_use(&mut self.values, v, id);
        }
    }

    /// Drop `removed` from the use lists, then re-register current sources
    pub(crate) fn refresh_uses(&mut self, id: InstrId, removed: &[Value]) {
        for v in removed {
            del_value_use(&mut self.values, v, id);
        }
        let instr = &self.instrs[id.index()];
        for v in &instr.src {
            add_value_use(&mut self.values, v, id);
        }
        if instr.writes() {
            if let Some(d) = instr.dest {
                if let Some(a) = self.values.register(d).addr() {
                    self.values.register_mut(a).add_use(id);
                }
            }
        }
    }

    /// Replace all sources of an instruction
    pub fn set_sources(&mut self, id: InstrId, src: Vec<Value>) {
        let old = core::mem::take(&mut self.instrs[id.index()].src);
        self.instrs[id.index()].replace_sources(src);
        self.refresh_uses(id, &old);
        self.update_relative_flags(id);
    }

    /// Insert a gradient fetch into the arena
    pub fn add_gradient(&mut self, grad: GradientInstr) -> TexId {
        let id = TexId(self.gradients.len() as u32);
        for r in grad.src {
            let reg = self.values.register_mut(r);
            if !reg.tex_uses.contains(&id) {
                reg.tex_uses.push(id);
            }
        }
        self.gradients.push(grad);
        id
    }

    /// New empty group sized for the target
    pub fn new_group(&mut self) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(AluGroup::new(self.chip.group_width()));
        id
    }

    // =========================================================================
    // Stream
    // =========================================================================

    fn next_position(&mut self) -> Position {
        let pos = Position {
            block: self.block,
            index: self.next_index,
        };
        self.next_index += 1;
        pos
    }

    /// Append a stand-alone instruction to the stream
    pub fn emit(&mut self, id: InstrId) {
        let pos = self.next_position();
        self.instrs[id.index()].position = pos;
        self.stream.push(Node::Alu(id));
    }

    /// Append a complete group to the stream
    pub fn emit_group(&mut self, gid: GroupId) {
        assert!(!self.groups[gid.index()].is_empty(), "emitting an empty group");
        let pos = self.next_position();
        for m in self.groups[gid.index()].order.clone() {
            self.instrs[m.index()].position = pos;
        }
        self.stream.push(Node::Group(gid));
    }

    /// Append a gradient fetch to the stream
    pub fn emit_gradient(&mut self, id: TexId) {
        self.next_index += 1;
        self.stream.push(Node::Gradient(id));
    }

    /// Start a new basic block
    pub fn start_block(&mut self) {
        self.block += 1;
        self.next_index = 0;
    }

    /// Place an instruction at an explicit position
    pub fn set_position(&mut self, id: InstrId, block: u32, index: u32) {
        self.instrs[id.index()].position = Position { block, index };
    }

    /// Mark an instruction scheduled
    pub fn mark_scheduled(&mut self, id: InstrId) {
        self.instrs[id.index()].scheduled = true;
    }

    /// Mark every member of a group scheduled
    pub fn mark_group_scheduled(&mut self, gid: GroupId) {
        for m in self.groups[gid.index()].order.clone() {
            self.instrs[m.index()].scheduled = true;
        }
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Save the program state
    pub fn checkpoint(&mut self) -> Checkpoint {
        Checkpoint {
            pool: self.values.checkpoint(),
            instrs: self.instrs.len(),
            groups: self.groups.len(),
            gradients: self.gradients.len(),
            stream: self.stream.len(),
            next_index: self.next_index,
        }
    }

    /// Keep everything done since the last checkpoint
    pub fn commit(&mut self) {
        self.values.commit();
    }

    /// Undo everything done since `cp`
    pub fn rollback(&mut self, cp: Checkpoint) {
        for n in (cp.instrs..self.instrs.len()).rev() {
            self.unlink(InstrId(n as u32));
        }
        for n in cp.gradients..self.gradients.len() {
            let id = TexId(n as u32);
            for r in self.gradients[n].src {
                self.values.register_mut(r).tex_uses.retain(|&t| t != id);
            }
        }
        self.instrs.truncate(cp.instrs);
        self.groups.truncate(cp.groups);
        self.gradients.truncate(cp.gradients);
        self.stream.truncate(cp.stream);
        self.next_index = cp.next_index;
        self.values.rollback(cp.pool);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Channel the instruction writes, or its fallback lane
    pub fn dest_chan(&self, id: InstrId) -> u8 {
        let instr = &self.instrs[id.index()];
        match instr.dest {
            Some(d) => self.values.register(d).chan(),
            None => instr.fallback_chan,
        }
    }

    /// Indirect addressing of an instruction
    pub fn indirect_addr(&self, id: InstrId) -> IndirectAddr {
        let instr = &self.instrs[id.index()];
        for v in &instr.src {
            match v {
                Value::Register(r) => {
                    if let Some(addr) = self.values.register(*r).addr() {
                        return IndirectAddr {
                            addr: Some(addr),
                            for_dest: false,
                            is_index: false,
                        };
                    }
                }
                Value::Uniform(u) => {
                    if let Some(addr) = u.buf_addr {
                        return IndirectAddr {
                            addr: Some(addr),
                            for_dest: false,
                            is_index: true,
                        };
                    }
                }
                _ => {}
            }
        }
        if let Some(addr) = instr.dest.and_then(|d| self.values.register(d).addr()) {
            return IndirectAddr {
                addr: Some(addr),
                for_dest: true,
                is_index: false,
            };
        }
        IndirectAddr::default()
    }

    /// Scheduler bias: negative values prefer early placement
    pub fn register_priority(&self, id: InstrId) -> i32 {
        let instr = &self.instrs[id.index()];
        if instr.has_flag(AluFlags::NO_SCHEDULE_BIAS) {
            return 0;
        }
        let mut priority = 0;
        if let Some(d) = instr.dest.filter(|_| instr.writes()) {
            let dest = self.values.register(d);
            if dest.is_ssa() && !matches!(dest.pin(), Pin::Group | Pin::ChanGroup) && dest.addr().is_none() {
                priority -= 1;
            }
        }
        for v in &instr.src {
            match v {
                Value::Register(r) => {
                    let reg = self.values.register(*r);
                    if reg.is_ssa() {
                        let pending = reg
                            .uses()
                            .iter()
                            .filter(|u| !self.instrs[u.index()].scheduled)
                            .count();
                        if pending == 1 {
                            priority += 1;
                        }
                    }
                    if reg.addr().is_some() {
                        priority += 2;
                    }
                }
                Value::Uniform(_) => priority += 1,
                _ => {}
            }
        }
        priority
    }

    /// Fix the channel of free or grouped source registers
    pub fn pin_sources_to_chan(&mut self, id: InstrId) {
        let regs: ArrayVec<RegId, 12> = self.instrs[id.index()]
            .src
            .iter()
            .filter_map(|v| v.as_register())
            .collect();
        for r in regs {
            let pin = self.values.register(r).pin();
            if matches!(pin, Pin::Free | Pin::Group) {
                self.values.set_pin(r, pin.placed());
            }
        }
    }

    /// Whether two instructions would print identically
    pub fn is_equal_to(&self, a: InstrId, b: InstrId) -> bool {
        let (x, y) = (&self.instrs[a.index()], &self.instrs[b.index()]);
        if x.opcode != y.opcode
            || x.bank_swizzle != y.bank_swizzle
            || x.cf != y.cf
            || x.slots != y.slots
            || x.flags & AluFlags::ENCODED != y.flags & AluFlags::ENCODED
            || x.src != y.src
        {
            return false;
        }
        if x.writes() {
            x.dest == y.dest
        } else {
            self.dest_chan(a) == self.dest_chan(b)
        }
    }

    // =========================================================================
    // Read ports
    // =========================================================================

    pub(crate) fn lane_reads(&self, srcs: &[Value], trans: bool, preferred: Option<BankSwizzle>) -> LaneReads {
        LaneReads {
            reads: srcs.iter().map(|v| PortRead::of(&self.values, v)).collect(),
            trans,
            preferred,
        }
    }

    /// Whether the sources of a stand-alone instruction can be fetched
    ///
    /// Grouped instructions are checked together with their group.
    pub fn check_readport_validation(&self, id: InstrId) -> bool {
        let instr = &self.instrs[id.index()];
        if let Some(gid) = instr.parent_group {
            return self.plan_group(gid, None, None).is_some();
        }
        self.instruction_fits(id, &instr.src)
    }

    pub(crate) fn instruction_fits(&self, id: InstrId, srcs: &[Value]) -> bool {
        let instr = &self.instrs[id.index()];
        let nsrc = instr.nsrc();
        let lanes: ArrayVec<LaneReads, 4> = srcs
            .chunks(nsrc)
            .map(|slot| self.lane_reads(slot, false, instr.bank_swizzle))
            .collect();
        readport::instruction_fits(&lanes)
    }

    /// Read-port plan for a group
    ///
    /// `extra` adds a candidate instruction in the given lane, `substitute`
    /// evaluates one member with replacement sources.
    pub(crate) fn plan_group(
        &self,
        gid: GroupId,
        extra: Option<(InstrId, usize)>,
        substitute: Option<(InstrId, &[Value])>,
    ) -> Option<(ReadPortReservation, LanePlan)> {
        let group = &self.groups[gid.index()];
        let mut placed: ArrayVec<(usize, InstrId), 5> = ArrayVec::new();
        for lane in 0..group.width() {
            if let Some(m) = group.lanes[lane] {
                placed.push((lane, m));
            } else if let Some((id, l)) = extra.filter(|&(_, l)| l == lane) {
                placed.push((l, id));
            }
        }
        let lanes: ArrayVec<LaneReads, 5> = placed
            .iter()
            .map(|&(lane, id)| {
                let instr = &self.instrs[id.index()];
                let srcs = match substitute {
                    Some((sid, srcs)) if sid == id => srcs,
                    _ => &instr.src[..],
                };
                self.lane_reads(srcs, lane == TRANS_LANE, instr.bank_swizzle)
            })
            .collect();
        let (reservation, swizzles) = readport::find_bank_swizzles(&lanes)?;
        let plan = placed
            .iter()
            .zip(swizzles)
            .map(|(&(lane, id), swz)| (lane, id, swz))
            .collect();
        Some((reservation, plan))
    }

    pub(crate) fn apply_plan(&mut self, gid: GroupId, reservation: ReadPortReservation, plan: &LanePlan) {
        for &(_, id, swz) in plan {
            self.instrs[id.index()].bank_swizzle = Some(swz);
        }
        self.groups[gid.index()].readports = reservation;
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Add a single-slot instruction to a group
    ///
    /// Picks a lane and bank swizzles for the updated group. Returns `false`
    /// without changing anything if the instruction does not fit.
    pub fn add_to_group(&mut self, gid: GroupId, id: InstrId) -> bool {
        let instr = &self.instrs[id.index()];
        assert!(instr.parent_group.is_none(), "instruction already grouped");
        if instr.slots > 1 {
            log::trace!("group {}: multi-slot instruction must be split first", gid.0);
            return false;
        }

        let group = &self.groups[gid.index()];
        if instr.cf != CfMarker::Alu && group.members().any(|m| self.instrs[m.index()].cf == instr.cf) {
            return false;
        }
        let lds = instr.has_lds_access();
        if lds && group.has_lds {
            return false;
        }
        let ia = self.indirect_addr(id);
        let addr = ia.addr.map(|a| (a, ia.is_index));
        if let (Some(want), Some(have)) = (addr, group.addr) {
            if want != have {
                return false;
            }
        }

        let units = match instr.opcode {
            Opcode::Alu(op) => op.units(self.chip),
            Opcode::Lds(_) => Units::Vector,
        };
        let dest_chan = self.dest_chan(id) as usize;
        let movable = !instr.has_flag(AluFlags::IS_64BIT)
            && instr.dest.is_some_and(|d| self.values.register(d).pin() == Pin::Free);
        let has_trans = self.chip.has_trans_unit() && units.trans();
        let prefer_trans = has_trans && (instr.has_flag(AluFlags::IS_TRANS) || !units.vector());

        let mut candidates: ArrayVec<usize, 6> = ArrayVec::new();
        if prefer_trans {
            candidates.push(TRANS_LANE);
        }
        if units.vector() {
            candidates.push(dest_chan);
            if movable {
                candidates.extend((0..4).filter(|&c| c != dest_chan));
            }
        }
        if has_trans && !prefer_trans {
            candidates.push(TRANS_LANE);
        }

        for lane in candidates {
            if !self.groups[gid.index()].lane_free(lane) {
                continue;
            }
            if lane != TRANS_LANE && lane != dest_chan {
                let Some(d) = self.instrs[id.index()].dest else {
                    continue;
                };
                if self.values.find(self.values.register(d).sel(), lane as u8).is_some() {
                    continue;
                }
            }
            if let Some((reservation, plan)) = self.plan_group(gid, Some((id, lane)), None) {
                self.apply_plan(gid, reservation, &plan);
                self.place(gid, id, lane, dest_chan, lds, addr);
                log::trace!("group {}: instr {} in lane {}", gid.0, id.0, lane);
                return true;
            }
        }
        false
    }

    fn place(
        &mut self,
        gid: GroupId,
        id: InstrId,
        lane: usize,
        dest_chan: usize,
        lds: bool,
        addr: Option<(RegId, bool)>,
    ) {
        if let Some(d) = self.instrs[id.index()].dest {
            if lane != TRANS_LANE && lane != dest_chan {
                self.values.set_chan(d, lane as u8);
            }
            let pin = self.values.register(d).pin();
            self.values.set_pin(d, pin.placed());
        }

        let writes = self.instrs[id.index()].writes();
        let group = &mut self.groups[gid.index()];
        group.lanes[lane] = Some(id);
        group.order.push(id);
        group.has_lds |= lds;
        if addr.is_some() {
            group.addr = addr;
        }
        let previous = group.last;
        let takes_last = writes || previous.is_none();
        if takes_last {
            group.last = Some(id);
        }

        if takes_last {
            if let Some(prev) = previous {
                self.instrs[prev.index()].reset_flag(AluFlags::LAST);
            }
            self.instrs[id.index()].set_flag(AluFlags::LAST);
        } else {
            self.instrs[id.index()].reset_flag(AluFlags::LAST);
        }
        self.instrs[id.index()].parent_group = Some(gid);
    }
}

// =============================================================================
// USE / PARENT BOOKKEEPING
// =============================================================================

fn add_value_use(pool: &mut ValuePool, v: &Value, id: InstrId) {
    match v {
        Value::Register(r) => {
            pool.register_mut(*r).add_use(id);
            if let Some(addr) = pool.register(*r).addr() {
                pool.register_mut(addr).add_use(id);
            }
        }
        Value::Uniform(u) => {
            if let Some(addr) = u.buf_addr {
                pool.register_mut(addr).add_use(id);
            }
        }
        _ => {}
    }
}

fn del_value_use(pool: &mut ValuePool, v: &Value, id: InstrId) {
    match v {
        Value::Register(r) => {
            pool.register_mut(*r).del_use(id);
            if let Some(addr) = pool.register(*r).addr() {
                pool.register_mut(addr).del_use(id);
            }
        }
        Value::Uniform(u) => {
            if let Some(addr) = u.buf_addr {
                pool.register_mut(addr).del_use(id);
            }
        }
        _ => {}
    }
}

pub(crate) fn link_dest(pool: &mut ValuePool, d: RegId, id: InstrId) {
    pool.register_mut(d).add_parent(id);
    if let Some(link) = pool.register(d).array().copied() {
        let array = pool.array_mut(link.array);
        if !array.writers.contains(&id) {
            array.writers.push(id);
        }
        if let Some(addr) = link.addr {
            if !array.indirect_writers.contains(&id) {
                array.indirect_writers.push(id);
            }
            pool.register_mut(addr).add_use(id);
        }
    }
}

pub(crate) fn unlink_dest(pool: &mut ValuePool, d: RegId, id: InstrId) {
    pool.register_mut(d).del_parent(id);
    if let Some(link) = pool.register(d).array().copied() {
        let array = pool.array_mut(link.array);
        array.writers.retain(|&w| w != id);
        array.indirect_writers.retain(|&w| w != id);
        if let Some(addr) = link.addr {
            pool.register_mut(addr).del_use(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::AluOp;
    use crate::value::{RegisterFlags, Uniform};

    fn reg(p: &mut Program, sel: u32, chan: u8, pin: Pin) -> RegId {
        p.values_mut().get_or_create(sel, chan, pin, RegisterFlags::SSA)
    }

    #[test]
    fn test_add_instr_registers_uses() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let b = reg(&mut p, 2, 1, Pin::None);
        let d = reg(&mut p, 3, 0, Pin::None);
        let id = p.add_instr(AluInstr::new(AluOp::Add, Some(d), vec![a.into(), b.into()], AluFlags::WRITE));
        assert_eq!(p.values().register(a).uses(), &[id]);
        assert_eq!(p.values().register(b).uses(), &[id]);
        assert_eq!(p.values().register(d).parents(), &[id]);
    }

    #[test]
    fn test_array_write_registers_address_use() {
        let mut p = Program::new(ChipClass::Evergreen);
        let arr = p.values_mut().allocate_array(4, 1);
        let addr = reg(&mut p, 10, 0, Pin::None);
        let elem = p.values_mut().array_element(arr, 1, 0, Some(addr));
        let id = p.add_instr(AluInstr::new(AluOp::Mov, Some(elem), vec![Value::one()], AluFlags::WRITE));
        assert_eq!(p.values().register(addr).uses(), &[id]);
        assert_eq!(p.values().array(arr).indirect_writers(), &[id]);
        assert!(p.instr(id).has_flag(AluFlags::DST_REL));
        let ia = p.indirect_addr(id);
        assert_eq!(ia.addr, Some(addr));
        assert!(ia.for_dest);
    }

    #[test]
    fn test_uniform_buffer_address_is_a_use() {
        let mut p = Program::new(ChipClass::Evergreen);
        let idx = reg(&mut p, 5, 0, Pin::None);
        let d = reg(&mut p, 6, 0, Pin::None);
        let mut u = Uniform::new(1, 4, 2);
        u.buf_addr = Some(idx);
        let id = p.add_instr(AluInstr::new(AluOp::Mov, Some(d), vec![u.into()], AluFlags::WRITE));
        assert_eq!(p.values().register(idx).uses(), &[id]);
        assert!(p.indirect_addr(id).is_index);
    }

    #[test]
    fn test_group_places_by_channel_and_marks_last() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let dx = reg(&mut p, 2, 0, Pin::Chan);
        let dy = reg(&mut p, 2, 1, Pin::Chan);
        let gid = p.new_group();
        let i0 = p.add_instr(AluInstr::new(AluOp::Mov, Some(dx), vec![a.into()], AluFlags::WRITE));
        let i1 = p.add_instr(AluInstr::new(AluOp::Mov, Some(dy), vec![a.into()], AluFlags::WRITE));
        assert!(p.add_to_group(gid, i0));
        assert!(p.instr(i0).has_flag(AluFlags::LAST));
        assert!(p.add_to_group(gid, i1));
        assert!(!p.instr(i0).has_flag(AluFlags::LAST));
        assert!(p.instr(i1).has_flag(AluFlags::LAST));
        assert_eq!(p.group(gid).lane(1), Some(i1));
        assert_eq!(p.instr(i1).parent_group(), Some(gid));
    }

    #[test]
    fn test_non_writing_member_does_not_take_last() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d = reg(&mut p, 2, 0, Pin::Chan);
        let gid = p.new_group();
        let w = p.add_instr(AluInstr::new(AluOp::Mov, Some(d), vec![a.into()], AluFlags::WRITE));
        let dummy = p.values_mut().dummy_dest(1);
        let n = p.add_instr(AluInstr::new(AluOp::Mov, Some(dummy), vec![a.into()], AluFlags::LAST));
        assert!(p.add_to_group(gid, w));
        assert!(p.add_to_group(gid, n));
        assert!(p.instr(w).has_flag(AluFlags::LAST));
        assert!(!p.instr(n).has_flag(AluFlags::LAST));
        assert_eq!(p.group(gid).last_instr(), Some(w));
    }

    #[test]
    fn test_free_dest_moves_to_open_lane() {
        let mut p = Program::new(ChipClass::Cayman);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d0 = reg(&mut p, 2, 0, Pin::Chan);
        let free = reg(&mut p, 3, 0, Pin::Free);
        let gid = p.new_group();
        let i0 = p.add_instr(AluInstr::new(AluOp::Mov, Some(d0), vec![a.into()], AluFlags::WRITE));
        let i1 = p.add_instr(AluInstr::new(AluOp::Mov, Some(free), vec![a.into()], AluFlags::WRITE));
        assert!(p.add_to_group(gid, i0));
        assert!(p.add_to_group(gid, i1));
        assert_eq!(p.values().register(free).chan(), 1);
        assert_eq!(p.values().register(free).pin(), Pin::Chan);
        assert_eq!(p.group(gid).lane(1), Some(i1));
    }

    #[test]
    fn test_pinned_lane_conflict_rejected() {
        let mut p = Program::new(ChipClass::Cayman);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d0 = reg(&mut p, 2, 0, Pin::Chan);
        let d1 = reg(&mut p, 4, 0, Pin::Chan);
        let gid = p.new_group();
        let i0 = p.add_instr(AluInstr::new(AluOp::Mov, Some(d0), vec![a.into()], AluFlags::WRITE));
        let i1 = p.add_instr(AluInstr::new(AluOp::Mov, Some(d1), vec![a.into()], AluFlags::WRITE));
        assert!(p.add_to_group(gid, i0));
        assert!(!p.add_to_group(gid, i1));
        assert_eq!(p.instr(i1).parent_group(), None);
        assert_eq!(p.group(gid).len(), 1);
    }

    #[test]
    fn test_trans_only_op_uses_trans_lane() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d = reg(&mut p, 2, 0, Pin::None);
        let gid = p.new_group();
        let id = p.add_instr(AluInstr::new(AluOp::RecipIeee, Some(d), vec![a.into()], AluFlags::WRITE));
        assert!(p.add_to_group(gid, id));
        assert_eq!(p.group(gid).lane(TRANS_LANE), Some(id));
    }

    #[test]
    fn test_cf_marker_once_per_group() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let dx = reg(&mut p, 2, 0, Pin::Chan);
        let dy = reg(&mut p, 2, 1, Pin::Chan);
        let gid = p.new_group();
        let i0 = p.add_instr(
            AluInstr::new(AluOp::Mov, Some(dx), vec![a.into()], AluFlags::WRITE).with_cf(CfMarker::PushBefore),
        );
        let i1 = p.add_instr(
            AluInstr::new(AluOp::Mov, Some(dy), vec![a.into()], AluFlags::WRITE).with_cf(CfMarker::PushBefore),
        );
        assert!(p.add_to_group(gid, i0));
        assert!(!p.add_to_group(gid, i1));
    }

    #[test]
    fn test_group_rejects_read_port_overflow() {
        let mut p = Program::new(ChipClass::Evergreen);
        let srcs: Vec<RegId> = (10..16).map(|sel| reg(&mut p, sel, 0, Pin::None)).collect();
        let dx = reg(&mut p, 2, 0, Pin::Chan);
        let dy = reg(&mut p, 2, 1, Pin::Chan);
        let gid = p.new_group();
        let i0 = p.add_instr(AluInstr::new(
            AluOp::MuladdIeee,
            Some(dx),
            vec![srcs[0].into(), srcs[1].into(), srcs[2].into()],
            AluFlags::WRITE,
        ));
        let i1 = p.add_instr(AluInstr::new(
            AluOp::MuladdIeee,
            Some(dy),
            vec![srcs[3].into(), srcs[4].into(), srcs[5].into()],
            AluFlags::WRITE,
        ));
        assert!(p.add_to_group(gid, i0));
        assert!(!p.add_to_group(gid, i1));
        assert!(p.instr(i0).has_flag(AluFlags::LAST));
    }

    #[test]
    fn test_rollback_removes_uses_and_stream() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d = reg(&mut p, 2, 0, Pin::None);
        let keep = p.add_instr(AluInstr::new(AluOp::Mov, Some(d), vec![a.into()], AluFlags::WRITE));
        p.emit(keep);
        let cp = p.checkpoint();
        let t = p.values_mut().temp_register(0, Pin::Free);
        let id = p.add_instr(AluInstr::new(AluOp::Add, Some(t), vec![a.into(), d.into()], AluFlags::WRITE));
        p.emit(id);
        p.rollback(cp);
        assert_eq!(p.instr_count(), 1);
        assert_eq!(p.stream(), &[Node::Alu(keep)]);
        assert_eq!(p.values().register(a).uses(), &[keep]);
        assert!(!p.values().register(d).has_uses());
    }

    #[test]
    fn test_register_priority() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::None);
        let d = reg(&mut p, 2, 0, Pin::None);
        let id = p.add_instr(AluInstr::new(
            AluOp::Add,
            Some(d),
            vec![a.into(), Uniform::new(0, 0, 0).into()],
            AluFlags::WRITE,
        ));
        // -1 for the SSA write, +1 for the last pending read of a, +1 for the uniform
        assert_eq!(p.register_priority(id), 1);
    }

    #[test]
    fn test_pin_sources_to_chan() {
        let mut p = Program::new(ChipClass::Evergreen);
        let a = reg(&mut p, 1, 0, Pin::Free);
        let b = reg(&mut p, 2, 1, Pin::Group);
        let d = reg(&mut p, 3, 0, Pin::None);
        let id = p.add_instr(AluInstr::new(AluOp::Add, Some(d), vec![a.into(), b.into()], AluFlags::WRITE));
        p.pin_sources_to_chan(id);
        assert_eq!(p.values().register(a).pin(), Pin::Chan);
        assert_eq!(p.values().register(b).pin(), Pin::ChanGroup);
    }
}
