//! # Value Pool
//!
//! Arena owning every register and local array of a shader. Registers are
//! keyed by `(sel, chan)` (array elements by their array position), so the
//! same textual register always resolves to the same [`RegId`].
//!
//! Registers are never freed while a pass runs. A checkpoint records the
//! arena length and journals pin and channel changes so a failed lowering
//! can be undone.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::value::{
    ArrayId, ArrayLink, LocalArray, Pin, RegId, Register, RegisterFlags, DUMMY_SEL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegKey {
    Plain {
        sel: u32,
        chan: u8,
    },
    Element {
        array: ArrayId,
        offset: u32,
        chan: u8,
        addr: Option<RegId>,
    },
}

/// Saved arena state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCheckpoint {
    registers: usize,
    arrays: usize,
    next_sel: u32,
}

#[derive(Debug, Clone, Copy)]
struct RegChange {
    id: RegId,
    chan: u8,
    pin: Pin,
}

/// Register and array arena
#[derive(Debug, Clone)]
pub struct ValuePool {
    registers: Vec<Register>,
    arrays: Vec<LocalArray>,
    lookup: HashMap<RegKey, RegId>,
    next_sel: u32,
    journal: Option<Vec<RegChange>>,
}

impl ValuePool {
    /// Empty pool; register index 0 is left to fixed hardware registers
    pub fn new() -> Self {
        Self {
            registers: Vec::new(),
            arrays: Vec::new(),
            lookup: HashMap::new(),
            next_sel: 1,
            journal: None,
        }
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the pool holds no register
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Register by id
    pub fn register(&self, id: RegId) -> &Register {
        &self.registers[id.index()]
    }

    pub(crate) fn register_mut(&mut self, id: RegId) -> &mut Register {
        &mut self.registers[id.index()]
    }

    /// Iterate over all registers
    pub fn registers(&self) -> impl Iterator<Item = (RegId, &Register)> {
        self.registers
            .iter()
            .enumerate()
            .map(|(i, r)| (RegId(i as u32), r))
    }

    // =========================================================================
    // Registers
    // =========================================================================

    /// Look up a plain register
    pub fn find(&self, sel: u32, chan: u8) -> Option<RegId> {
        self.lookup.get(&RegKey::Plain { sel, chan }).copied()
    }

    /// Get the register `(sel, chan)`, creating it with `pin` and `flags`
    ///
    /// An existing register is returned unchanged.
    pub fn get_or_create(&mut self, sel: u32, chan: u8, pin: Pin, flags: RegisterFlags) -> RegId {
        if let Some(id) = self.find(sel, chan) {
            return id;
        }
        if sel >= self.next_sel && sel != DUMMY_SEL {
            self.next_sel = sel + 1;
        }
        self.insert(RegKey::Plain { sel, chan }, Register::new(sel, chan, pin, flags))
    }

    fn insert(&mut self, key: RegKey, reg: Register) -> RegId {
        let id = RegId(self.registers.len() as u32);
        self.registers.push(reg);
        self.lookup.insert(key, id);
        id
    }

    /// Reserve a fresh register index
    pub fn allocate_sel(&mut self) -> u32 {
        if self.next_sel == DUMMY_SEL {
            self.next_sel += 1;
        }
        let sel = self.next_sel;
        self.next_sel += 1;
        sel
    }

    /// Fresh SSA temporary
    pub fn temp_register(&mut self, chan: u8, pin: Pin) -> RegId {
        let sel = self.allocate_sel();
        self.get_or_create(sel, chan, pin, RegisterFlags::SSA)
    }

    /// Fresh four-channel SSA temporary sharing one register index
    pub fn temp_vec4(&mut self, pin: Pin) -> [RegId; 4] {
        let sel = self.allocate_sel();
        [0, 1, 2, 3].map(|chan| self.get_or_create(sel, chan, pin, RegisterFlags::SSA))
    }

    /// Placeholder destination of a lane that computes nothing useful
    pub fn dummy_dest(&mut self, chan: u8) -> RegId {
        self.get_or_create(DUMMY_SEL, chan, Pin::Chan, RegisterFlags::empty())
    }

    /// Whether `id` is a placeholder destination
    pub fn is_dummy(&self, id: RegId) -> bool {
        let reg = self.register(id);
        reg.sel == DUMMY_SEL && reg.array.is_none()
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    /// Allocate a local array of `size` elements
    pub fn allocate_array(&mut self, size: u32, ncomponents: u8) -> ArrayId {
        assert!(size > 0, "empty local array");
        assert!((1..=4).contains(&ncomponents), "array element width {}", ncomponents);
        let base_sel = self.next_sel;
        self.next_sel += size;
        if (base_sel..self.next_sel).contains(&DUMMY_SEL) {
            self.next_sel = DUMMY_SEL + 1;
            return self.allocate_array(size, ncomponents);
        }
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(LocalArray {
            base_sel,
            size,
            ncomponents,
            writers: Vec::new(),
            indirect_writers: Vec::new(),
        });
        log::trace!("array A{} of {} x {} channels", base_sel, size, ncomponents);
        id
    }

    /// Array by id
    pub fn array(&self, id: ArrayId) -> &LocalArray {
        &self.arrays[id.index()]
    }

    pub(crate) fn array_mut(&mut self, id: ArrayId) -> &mut LocalArray {
        &mut self.arrays[id.index()]
    }

    /// Find the array whose first element has register index `base_sel`
    pub fn find_array(&self, base_sel: u32) -> Option<ArrayId> {
        self.arrays
            .iter()
            .position(|a| a.base_sel == base_sel)
            .map(|i| ArrayId(i as u32))
    }

    /// Element register of an array, optionally indirectly addressed
    pub fn array_element(&mut self, array: ArrayId, offset: u32, chan: u8, addr: Option<RegId>) -> RegId {
        let arr = self.array(array);
        assert!(offset < arr.size, "array offset {} out of {}", offset, arr.size);
        assert!(chan < arr.ncomponents, "array channel {} out of {}", chan, arr.ncomponents);
        let key = RegKey::Element {
            array,
            offset,
            chan,
            addr,
        };
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let mut reg = Register::new(arr.base_sel + offset, chan, Pin::Array, RegisterFlags::empty());
        reg.array = Some(ArrayLink {
            array,
            offset,
            addr,
        });
        self.insert(key, reg)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Move a register to another channel
    pub(crate) fn set_chan(&mut self, id: RegId, chan: u8) {
        let reg = &self.registers[id.index()];
        if reg.chan == chan {
            return;
        }
        assert!(reg.array.is_none(), "array elements cannot change channel");
        let old = RegKey::Plain {
            sel: reg.sel,
            chan: reg.chan,
        };
        let new = RegKey::Plain { sel: reg.sel, chan };
        assert!(
            !self.lookup.contains_key(&new),
            "channel {} of register {} is taken",
            chan,
            reg.sel
        );
        self.record(id);
        self.lookup.remove(&old);
        self.lookup.insert(new, id);
        self.registers[id.index()].chan = chan;
    }

    /// Change the pin of a register
    pub(crate) fn set_pin(&mut self, id: RegId, pin: Pin) {
        if self.registers[id.index()].pin != pin {
            self.record(id);
            self.registers[id.index()].pin = pin;
        }
    }

    /// Add register flags
    pub fn set_flags(&mut self, id: RegId, flags: RegisterFlags) {
        self.registers[id.index()].flags |= flags;
    }

    fn record(&mut self, id: RegId) {
        let reg = &self.registers[id.index()];
        let change = RegChange {
            id,
            chan: reg.chan,
            pin: reg.pin,
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Save the arena state and start journaling placement changes
    pub fn checkpoint(&mut self) -> PoolCheckpoint {
        self.journal = Some(Vec::new());
        PoolCheckpoint {
            registers: self.registers.len(),
            arrays: self.arrays.len(),
            next_sel: self.next_sel,
        }
    }

    /// Keep everything done since the checkpoint
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Restore the state saved by `checkpoint`
    pub fn rollback(&mut self, cp: PoolCheckpoint) {
        if let Some(journal) = self.journal.take() {
            for change in journal.into_iter().rev() {
                if change.id.index() >= cp.registers {
                    continue;
                }
                let reg = &self.registers[change.id.index()];
                if reg.chan != change.chan {
                    let sel = reg.sel;
                    self.lookup.remove(&RegKey::Plain { sel, chan: reg.chan });
                    self.lookup.insert(
                        RegKey::Plain {
                            sel,
                            chan: change.chan,
                        },
                        change.id,
                    );
                }
                let reg = &mut self.registers[change.id.index()];
                reg.chan = change.chan;
                reg.pin = change.pin;
            }
        }
        self.registers.truncate(cp.registers);
        self.arrays.truncate(cp.arrays);
        self.lookup.retain(|_, id| id.index() < cp.registers);
        self.next_sel = cp.next_sel;
    }
}

impl Default for ValuePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_are_interned() {
        let mut pool = ValuePool::new();
        let a = pool.get_or_create(4, 1, Pin::None, RegisterFlags::SSA);
        let b = pool.get_or_create(4, 1, Pin::Chan, RegisterFlags::empty());
        assert_eq!(a, b);
        assert_eq!(pool.register(a).pin(), Pin::None);
        assert!(pool.allocate_sel() > 4);
    }

    #[test]
    fn test_temp_vec4_shares_sel() {
        let mut pool = ValuePool::new();
        let v = pool.temp_vec4(Pin::Group);
        let sel = pool.register(v[0]).sel();
        for (chan, id) in v.iter().enumerate() {
            assert_eq!(pool.register(*id).sel(), sel);
            assert_eq!(pool.register(*id).chan() as usize, chan);
        }
    }

    #[test]
    fn test_array_elements() {
        let mut pool = ValuePool::new();
        let arr = pool.allocate_array(4, 2);
        let addr = pool.temp_register(0, Pin::None);
        let direct = pool.array_element(arr, 2, 1, None);
        let indirect = pool.array_element(arr, 2, 1, Some(addr));
        assert_ne!(direct, indirect);
        assert_eq!(pool.array_element(arr, 2, 1, None), direct);
        assert_eq!(pool.register(direct).pin(), Pin::Array);
        assert_eq!(pool.register(indirect).addr(), Some(addr));
        let base = pool.array(arr).base_sel();
        assert_eq!(pool.find_array(base), Some(arr));
        assert_eq!(pool.register(direct).sel(), base + 2);
    }

    #[test]
    fn test_set_chan_updates_lookup() {
        let mut pool = ValuePool::new();
        let r = pool.temp_register(0, Pin::Free);
        let sel = pool.register(r).sel();
        pool.set_chan(r, 2);
        assert_eq!(pool.find(sel, 2), Some(r));
        assert_eq!(pool.find(sel, 0), None);
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut pool = ValuePool::new();
        let r = pool.temp_register(0, Pin::Free);
        let sel = pool.register(r).sel();
        let cp = pool.checkpoint();
        pool.set_chan(r, 3);
        pool.set_pin(r, Pin::Chan);
        let t = pool.temp_register(1, Pin::None);
        let tsel = pool.register(t).sel();
        pool.rollback(cp);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.register(r).chan(), 0);
        assert_eq!(pool.register(r).pin(), Pin::Free);
        assert_eq!(pool.find(sel, 0), Some(r));
        assert_eq!(pool.find(tsel, 1), None);
        assert_eq!(pool.allocate_sel(), tsel);
    }

    #[test]
    fn test_dummy_dest() {
        let mut pool = ValuePool::new();
        let d = pool.dummy_dest(2);
        assert!(pool.is_dummy(d));
        assert_eq!(pool.register(d).pin(), Pin::Chan);
        assert_eq!(pool.dummy_dest(2), d);
    }
}
