// This module implements the ValuePool, the owner of the abstract value namespace of one
// shader compilation. Every operand an instruction references is a ValueId, an index into
// the pool's arena: logical registers (written by instructions, assigned a physical GPR only
// when remap_registers runs), literal vectors (immediate dwords carried in the instruction
// stream) and constant-file references (a kcache line addressed by bank and vec4 index).
// Instructions share values by index, so remapping is a single rewrite of the arena's
// physical-location fields. Registers preloaded by the hardware (vertex ids, barycentrics,
// ring offsets) are pinned: their physical register is fixed at allocation and reserved for
// the whole shader. remap_registers runs liveness over the finished instruction stream and
// assigns physical registers first-fit; exceeding the stage budget fails the compilation
// with AllocationOverflow and leaves the pool untouched. A second call without intervening
// allocation returns the previous result unchanged.

//! Value pool: logical values and their physical register assignment.

use std::fmt;

use hashbrown::HashMap;

use super::error::{BudgetResource, CompileError, CompileResult};
use super::liveness::{Liveness, ValueUses};
use super::register_file::{RegId, RegisterFile, MAX_GPRS};

/// Index of a value in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// What a value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A general purpose register, physical index assigned by remapping.
    Register,
    /// Immediate dwords, one per channel.
    Literal([u32; 4]),
    /// A vec4 line of a constant buffer, read through the constant cache.
    Constant { bank: u8, sel: u32 },
}

/// A single entry of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub kind: ValueKind,
    /// Number of meaningful channels (1-4).
    pub width: u8,
    /// Physical register, fixed for pinned values and set by remapping otherwise.
    pub phys: Option<RegId>,
    pub pinned: bool,
    /// Written by more than one instruction.
    pub multi_write: bool,
    /// Read after the last instruction (stage outputs).
    pub live_out: bool,
}

impl Value {
    fn new(kind: ValueKind, width: u8) -> Self {
        debug_assert!((1..=4).contains(&width), "value width out of range: {}", width);
        Self {
            kind,
            width: width.clamp(1, 4),
            phys: None,
            pinned: false,
            multi_write: false,
            live_out: false,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind, ValueKind::Register)
    }
}

#[derive(Debug, Clone, Copy)]
struct RemapState {
    value_count: usize,
    gpr_count: u32,
}

/// Arena of values for one shader.
#[derive(Debug, Default)]
pub struct ValuePool {
    values: Vec<Value>,
    literals: HashMap<([u32; 4], u8), ValueId>,
    constants: HashMap<(u8, u32), ValueId>,
    remapped: Option<RemapState>,
}

const CHANNELS: [char; 8] = ['x', 'y', 'z', 'w', '0', '1', '?', '_'];

impl ValuePool {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);
        id
    }

    /// Allocate a fresh value of the given kind and channel width.
    pub fn allocate(&mut self, kind: ValueKind, width: u8) -> ValueId {
        let id = self.push(Value::new(kind, width));
        log::trace!("allocate {} {:?} width {}", id, kind, width);
        id
    }

    /// Allocate a register written by several instructions.
    pub fn allocate_multi_write(&mut self, width: u8) -> ValueId {
        let mut value = Value::new(ValueKind::Register, width);
        value.multi_write = true;
        self.push(value)
    }

    /// Allocate a register preloaded by the hardware into `reg`.
    pub fn allocate_pinned(&mut self, reg: RegId, width: u8) -> CompileResult<ValueId> {
        if reg as usize >= MAX_GPRS {
            return Err(CompileError::AllocationOverflow {
                resource: BudgetResource::Gpr,
                required: reg as u32 + 1,
                budget: MAX_GPRS as u32,
            });
        }
        let mut value = Value::new(ValueKind::Register, width);
        value.phys = Some(reg);
        value.pinned = true;
        let id = self.push(value);
        log::trace!("pin {} to R{}", id, reg);
        Ok(id)
    }

    /// Literal vector; identical literals share one value.
    pub fn literal(&mut self, bits: [u32; 4], width: u8) -> ValueId {
        if let Some(&id) = self.literals.get(&(bits, width)) {
            return id;
        }
        let id = self.allocate(ValueKind::Literal(bits), width);
        self.literals.insert((bits, width), id);
        id
    }

    /// Constant cache line; one value per (bank, sel).
    pub fn constant(&mut self, bank: u8, sel: u32) -> ValueId {
        if let Some(&id) = self.constants.get(&(bank, sel)) {
            return id;
        }
        let id = self.allocate(ValueKind::Constant { bank, sel }, 4);
        self.constants.insert((bank, sel), id);
        id
    }

    pub fn mark_live_out(&mut self, id: ValueId) {
        if let Some(value) = self.values.get_mut(id.0 as usize) {
            value.live_out = true;
        }
    }

    pub fn live_out_values(&self) -> Vec<ValueId> {
        self.iter()
            .filter(|(_, v)| v.live_out)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn get(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.0 as usize)
    }

    pub fn kind(&self, id: ValueId) -> Option<ValueKind> {
        self.get(id).map(|v| v.kind)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (ValueId(i as u32), v))
    }

    pub fn is_register(&self, id: ValueId) -> bool {
        self.get(id).is_some_and(Value::is_register)
    }

    /// Register values that the remap pass has to place.
    pub fn needs_register(&self, id: ValueId) -> bool {
        self.get(id).is_some_and(|v| v.is_register() && !v.pinned)
    }

    pub fn is_multi_write(&self, id: ValueId) -> bool {
        self.get(id).is_some_and(|v| v.multi_write)
    }

    pub fn is_pinned(&self, id: ValueId) -> bool {
        self.get(id).is_some_and(|v| v.pinned)
    }

    pub fn phys(&self, id: ValueId) -> Option<RegId> {
        self.get(id).and_then(|v| v.phys)
    }

    /// Physical registers pinned by the stage.
    pub fn reserved_registers(&self) -> Vec<RegId> {
        let mut regs: Vec<RegId> = self
            .values
            .iter()
            .filter(|v| v.pinned)
            .filter_map(|v| v.phys)
            .collect();
        regs.sort_unstable();
        regs.dedup();
        regs
    }

    /// GPR count of the last successful remap.
    pub fn gpr_count(&self) -> Option<u32> {
        self.remapped.map(|s| s.gpr_count)
    }

    /// Assign physical registers to every logical register referenced by
    /// `instructions`, first-fit over the register file.
    ///
    /// Returns the number of GPRs the shader uses. Fails with
    /// [`CompileError::AllocationOverflow`] if that exceeds `budget`; the pool
    /// is left unchanged in that case.
    pub fn remap_registers<I: ValueUses>(
        &mut self,
        instructions: &[I],
        budget: u32,
    ) -> CompileResult<u32> {
        if let Some(state) = self.remapped {
            if state.value_count == self.values.len() {
                log::debug!("remap: no new values since last remap, keeping assignment");
                return Ok(state.gpr_count);
            }
        }

        let liveness = Liveness::compute(instructions, self)?;
        let mut regfile = RegisterFile::new(MAX_GPRS);
        for reg in self.reserved_registers() {
            if regfile.reserve(reg).is_err() {
                return Err(CompileError::AllocationOverflow {
                    resource: BudgetResource::Gpr,
                    required: reg as u32 + 1,
                    budget,
                });
            }
        }

        let mut active: Vec<(usize, RegId)> = Vec::new();
        let mut assignment = Vec::new();
        for (id, info) in liveness.ranges_by_start() {
            active.retain(|&(last, reg)| {
                if last < info.first {
                    let _ = regfile.free_register(reg);
                    false
                } else {
                    true
                }
            });

            let reg = match regfile.allocate_first_fit() {
                Ok(reg) => reg,
                Err(_) => {
                    return Err(CompileError::AllocationOverflow {
                        resource: BudgetResource::Gpr,
                        required: MAX_GPRS as u32 + 1,
                        budget,
                    })
                }
            };
            log::trace!(
                "remap {} [{}..{}] -> R{}{}",
                id,
                info.first,
                info.last,
                reg,
                if info.loop_extended { " (loop)" } else { "" }
            );
            active.push((info.last, reg));
            assignment.push((id, reg));
        }

        let gpr_count = regfile.gpr_count();
        if gpr_count > budget {
            return Err(CompileError::AllocationOverflow {
                resource: BudgetResource::Gpr,
                required: gpr_count,
                budget,
            });
        }

        for value in self.values.iter_mut().filter(|v| !v.pinned) {
            value.phys = None;
        }
        for (id, reg) in assignment {
            self.values[id.0 as usize].phys = Some(reg);
        }
        self.remapped = Some(RemapState {
            value_count: self.values.len(),
            gpr_count,
        });
        log::debug!("remap: {} values, {} GPRs (budget {})", self.values.len(), gpr_count, budget);
        Ok(gpr_count)
    }

    /// Render one channel of a value.
    pub fn format_chan(&self, id: ValueId, chan: u8) -> String {
        let c = CHANNELS[(chan & 7) as usize];
        match self.get(id) {
            None => format!("{}.{}", id, c),
            Some(value) => match value.kind {
                ValueKind::Register => match value.phys {
                    Some(reg) => format!("R{}.{}", reg, c),
                    None => format!("{}.{}", id, c),
                },
                ValueKind::Literal(bits) => format!("L[0x{:x}]", bits[(chan & 3) as usize]),
                ValueKind::Constant { bank, sel } => format!("KC{}[{}].{}", bank, sel, c),
            },
        }
    }

    /// Render a register operand with a swizzle (`R3.xy`, `%7.wzyx`).
    pub fn format_vec(&self, id: ValueId, swizzle: &[u8]) -> String {
        let swz: String = swizzle.iter().map(|&c| CHANNELS[(c & 7) as usize]).collect();
        match self.get(id) {
            Some(Value {
                kind: ValueKind::Register,
                phys: Some(reg),
                ..
            }) => format!("R{}.{}", reg, swz),
            Some(Value {
                kind: ValueKind::Constant { bank, sel },
                ..
            }) => format!("KC{}[{}].{}", bank, sel, swz),
            Some(Value {
                kind: ValueKind::Literal(_),
                ..
            }) => {
                let chans: Vec<String> = swizzle.iter().map(|&c| self.format_chan(id, c)).collect();
                format!("({})", chans.join(", "))
            }
            _ => format!("{}.{}", id, swz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::liveness::LoopMarker;

    struct Uses(Vec<ValueId>);

    impl ValueUses for Uses {
        fn visit_values(&self, f: &mut dyn FnMut(ValueId)) {
            for v in &self.0 {
                f(*v);
            }
        }

        fn loop_marker(&self) -> Option<LoopMarker> {
            None
        }
    }

    #[test]
    fn test_literal_and_constant_dedup() {
        let mut pool = ValuePool::new();
        let a = pool.literal([1, 2, 0, 0], 2);
        let b = pool.literal([1, 2, 0, 0], 2);
        let c = pool.literal([1, 2, 0, 0], 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.constant(0, 3), pool.constant(0, 3));
        assert_ne!(pool.constant(0, 3), pool.constant(1, 3));
    }

    #[test]
    fn test_remap_first_fit_reuses_dead_registers() {
        let mut pool = ValuePool::new();
        let a = pool.allocate(ValueKind::Register, 4);
        let b = pool.allocate(ValueKind::Register, 4);
        let c = pool.allocate(ValueKind::Register, 4);

        // a dies at 1, c starts at 2 and can take a's register
        let code = vec![Uses(vec![a]), Uses(vec![a, b]), Uses(vec![b, c])];
        let count = pool.remap_registers(&code, 8).unwrap();
        assert_eq!(count, 2);
        assert_eq!(pool.phys(a), Some(0));
        assert_eq!(pool.phys(b), Some(1));
        assert_eq!(pool.phys(c), Some(0));
    }

    #[test]
    fn test_pinned_registers_are_skipped() {
        let mut pool = ValuePool::new();
        let pinned = pool.allocate_pinned(0, 4).unwrap();
        let a = pool.allocate(ValueKind::Register, 1);
        let code = vec![Uses(vec![pinned, a])];
        assert_eq!(pool.remap_registers(&code, 8).unwrap(), 2);
        assert_eq!(pool.phys(a), Some(1));
        assert_eq!(pool.reserved_registers(), vec![0]);
    }

    #[test]
    fn test_remap_is_idempotent() {
        let mut pool = ValuePool::new();
        let vals: Vec<_> = (0..3).map(|_| pool.allocate(ValueKind::Register, 2)).collect();
        let code = vec![Uses(vals.clone())];
        let first = pool.remap_registers(&code, 8).unwrap();
        let snapshot: Vec<_> = vals.iter().map(|v| pool.phys(*v)).collect();
        let second = pool.remap_registers(&code, 8).unwrap();
        assert_eq!(first, second);
        assert_eq!(snapshot, vals.iter().map(|v| pool.phys(*v)).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflow_leaves_pool_untouched() {
        let mut pool = ValuePool::new();
        let vals: Vec<_> = (0..3).map(|_| pool.allocate(ValueKind::Register, 1)).collect();
        let code = vec![Uses(vals.clone())];
        let err = pool.remap_registers(&code, 2).unwrap_err();
        assert_eq!(
            err,
            CompileError::AllocationOverflow {
                resource: BudgetResource::Gpr,
                required: 3,
                budget: 2,
            }
        );
        assert!(vals.iter().all(|v| pool.phys(*v).is_none()));
        assert_eq!(pool.gpr_count(), None);
    }

    #[test]
    fn test_formatting() {
        let mut pool = ValuePool::new();
        let r = pool.allocate(ValueKind::Register, 4);
        let k = pool.constant(1, 2);
        let l = pool.literal([0x3f80_0000, 0, 0, 0], 1);
        assert_eq!(pool.format_chan(r, 1), "%0.y");
        assert_eq!(pool.format_chan(k, 3), "KC1[2].w");
        assert_eq!(pool.format_chan(l, 0), "L[0x3f800000]");
        pool.remap_registers(&[Uses(vec![r])], 4).unwrap();
        assert_eq!(pool.format_vec(r, &[3, 2, 4, 5]), "R0.wz01");
    }
}
