// This module holds the state shared by every instruction emitter during the emission pass.
// EmitContext owns the value pool and the append-only instruction list of one compilation,
// maps IR SSA indices to the channels that hold them, and maps each IR register to the
// multi-write pool value backing it. Many IR nodes do not need target code at all: constants
// become literal operands, vertex attributes and system values are bindings to pinned
// registers, and uniform reads become constant cache references. The SSA map therefore
// stores a channel per component instead of a value, and emitters resolve sources lane by
// lane. All ALU output goes through emit_alu, which enforces the per-instruction constant
// read limit by moving surplus constant cache lines into temporaries first. ResourceUsage
// accumulates what the shader touches (kcache banks, texture slots, RAT ids, atomic counter
// locations, scratch slots) for the final report.

//! Instruction emitters and their shared emission context.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::core::{
    BindingTable, CompileError, CompileResult, DeviceCaps, ShaderStats, ValueId, ValueKind,
    ValuePool,
};
use crate::ir::{Dest, Instr, InstrKind, NodeId, ShaderProgram, ShaderStage, Src, SrcRef, VarId};
use crate::target::{AluDest, AluInstruction, AluModifiers, AluOp, AluSrc, Chan, Instruction, SEL_MASK};

pub mod alu;
pub mod buffer;
pub mod control_flow;
pub mod tex;

pub use alu::AluEmitter;
pub use buffer::BufferEmitter;
pub use control_flow::{check_brackets, BlockState, ControlFlowLowerer};
pub use tex::TexEmitter;

/// Constant bank holding driver-provided buffer information.
pub const BUFFER_INFO_BANK: u8 = 16;

/// Translator for one category of IR instructions.
pub trait EmitInstruction {
    /// Whether this emitter translates `kind`.
    fn handles(&self, kind: &InstrKind) -> bool;

    /// Append the target instructions for `instr`.
    fn emit(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<()>;
}

/// Resources referenced by the emitted code.
#[derive(Debug, Default, Clone)]
pub struct ResourceUsage {
    pub kcache_banks: BTreeSet<u8>,
    pub textures: BTreeSet<u32>,
    pub ubos: BTreeSet<u32>,
    pub images: BTreeSet<u32>,
    pub ssbos: BTreeSet<u32>,
    pub rat_ids: BTreeSet<u32>,
    /// Hardware location per (binding, byte offset) of an atomic counter.
    pub atomic_locations: BTreeMap<(u32, u32), u32>,
    /// Atomic counter buffers referenced.
    pub atomic_files: BTreeSet<u32>,
    /// First scratch slot of each array variable.
    pub scratch_bases: HashMap<VarId, u32>,
    pub scratch_slots: u32,
    pub uses_kill: bool,
}

impl ResourceUsage {
    /// Hardware location of an atomic counter, assigning the next free one.
    pub fn atomic_location(&mut self, binding: u32, offset: u32) -> u32 {
        let next = self.atomic_locations.len() as u32;
        self.atomic_files.insert(binding);
        *self.atomic_locations.entry((binding, offset)).or_insert(next)
    }
}

/// State of the emission pass.
pub struct EmitContext<'a> {
    pub stage: ShaderStage,
    pub caps: &'a DeviceCaps,
    pub bindings: &'a BindingTable,
    pub program: &'a ShaderProgram,
    pub pool: ValuePool,
    pub instructions: Vec<Instruction>,
    pub stats: ShaderStats,
    pub usage: ResourceUsage,
    ssa: Vec<Option<Vec<Chan>>>,
    registers: Vec<ValueId>,
    node: Option<NodeId>,
}

impl<'a> EmitContext<'a> {
    pub fn new(
        program: &'a ShaderProgram,
        caps: &'a DeviceCaps,
        bindings: &'a BindingTable,
        usage: ResourceUsage,
    ) -> Self {
        let mut pool = ValuePool::new();
        let registers = program
            .registers
            .iter()
            .map(|reg| pool.allocate_multi_write(reg.components))
            .collect();
        Self {
            stage: program.stage,
            caps,
            bindings,
            program,
            pool,
            instructions: Vec::new(),
            stats: ShaderStats::default(),
            usage,
            ssa: vec![None; program.ssa_count as usize],
            registers,
            node: None,
        }
    }

    pub fn set_node(&mut self, node: NodeId) {
        self.node = Some(node);
    }

    pub fn malformed(&self, reason: impl Into<String>) -> CompileError {
        CompileError::malformed(self.node, reason)
    }

    pub fn unsupported(&self, operation: impl Into<String>) -> CompileError {
        CompileError::unsupported(self.stage, operation)
    }

    /// Append an instruction.
    pub fn emit(&mut self, instr: Instruction) {
        log::trace!("emit {}", instr.display(&self.pool));
        self.stats.record_instruction(instr.category(), instr.opcode());
        self.instructions.push(instr);
    }

    /// Pool value backing an IR register.
    pub fn register_value(&self, src: SrcRef) -> CompileResult<ValueId> {
        match src {
            SrcRef::Register(reg) => self
                .registers
                .get(reg.0 as usize)
                .copied()
                .ok_or_else(|| self.malformed(format!("undeclared register ${}", reg.0))),
            SrcRef::Ssa(index) => Err(self.malformed(format!("%{} is not a register", index))),
        }
    }

    /// Channels read by `src`, one per source component.
    pub fn resolve(&self, src: &Src) -> CompileResult<Vec<Chan>> {
        let base: Vec<Chan> = match src.source {
            SrcRef::Ssa(index) => match self.ssa.get(index as usize) {
                Some(Some(chans)) => chans.clone(),
                _ => return Err(self.malformed(format!("use of undefined value %{}", index))),
            },
            SrcRef::Register(_) => {
                let value = self.register_value(src.source)?;
                let width = self.pool.get(value).map_or(4, |v| v.width);
                (0..width).map(|c| Chan::new(value, c)).collect()
            }
        };
        if !(1..=4).contains(&src.components) {
            return Err(self.malformed(format!("source with {} components", src.components)));
        }
        src.swizzle[..src.components as usize]
            .iter()
            .map(|&c| {
                base.get(c as usize).copied().ok_or_else(|| {
                    self.malformed(format!(
                        "component {} read from a {}-component value",
                        c,
                        base.len()
                    ))
                })
            })
            .collect()
    }

    /// Channels of `src`, broadcasting a scalar to `lanes` lanes.
    pub fn resolve_lanes(&self, src: &Src, lanes: usize) -> CompileResult<Vec<Chan>> {
        let chans = self.resolve(src)?;
        match chans.len() {
            1 if lanes > 1 => Ok(vec![chans[0]; lanes]),
            n if n >= lanes => Ok(chans[..lanes].to_vec()),
            n => Err(self.malformed(format!("{}-component operand where {} are required", n, lanes))),
        }
    }

    pub fn resolve_scalar(&self, src: &Src) -> CompileResult<Chan> {
        Ok(self.resolve_lanes(src, 1)?[0])
    }

    fn define_ssa(&mut self, index: u32, chans: Vec<Chan>) -> CompileResult<()> {
        let Some(slot) = self.ssa.get_mut(index as usize) else {
            return Err(CompileError::malformed(
                self.node,
                format!("SSA index %{} out of range", index),
            ));
        };
        if slot.is_some() {
            return Err(CompileError::malformed(
                self.node,
                format!("SSA value %{} defined twice", index),
            ));
        }
        *slot = Some(chans);
        Ok(())
    }

    fn dest_of<'i>(&self, instr: &'i Instr) -> CompileResult<&'i Dest> {
        instr
            .dest
            .as_ref()
            .ok_or_else(|| self.malformed(format!("{} without destination", instr.kind.name())))
    }

    /// Register and write mask receiving the result of `instr`.
    ///
    /// SSA destinations get a fresh register and are bound to its channels.
    pub fn dest_target(&mut self, instr: &Instr) -> CompileResult<AluDest> {
        match *self.dest_of(instr)? {
            Dest::Ssa(def) => {
                let value = self.pool.allocate(ValueKind::Register, def.components);
                self.stats.values_allocated += 1;
                self.define_ssa(def.index, (0..def.components).map(|c| Chan::new(value, c)).collect())?;
                Ok(AluDest {
                    value,
                    write_mask: (1u8 << def.components) - 1,
                })
            }
            Dest::Register { reg, write_mask } => Ok(AluDest {
                value: self.register_value(SrcRef::Register(reg))?,
                write_mask,
            }),
        }
    }

    /// Destination as register plus result selector per channel, for
    /// instructions that write through a swizzle (TEX, FETCH).
    pub fn vector_dest(&mut self, instr: &Instr) -> CompileResult<(ValueId, [u8; 4])> {
        let dest = self.dest_target(instr)?;
        Ok((dest.value, packed_swizzle(dest.write_mask)))
    }

    /// Bind the destination of `instr` to existing channels.
    ///
    /// SSA destinations become aliases without code; register destinations
    /// receive a MOV.
    pub fn bind_dest(&mut self, instr: &Instr, chans: Vec<Chan>) -> CompileResult<()> {
        match *self.dest_of(instr)? {
            Dest::Ssa(def) => {
                if chans.len() < def.components as usize {
                    return Err(self.malformed(format!(
                        "{} provides {} components, destination has {}",
                        instr.kind.name(),
                        chans.len(),
                        def.components
                    )));
                }
                self.define_ssa(def.index, chans[..def.components as usize].to_vec())
            }
            Dest::Register { .. } => {
                let dest = self.dest_target(instr)?;
                let lanes = dest.write_mask.count_ones() as usize;
                let src = lane_src(&chans, lanes);
                self.emit_alu(AluInstruction::new(AluOp::MOV, Some(dest), vec![src]))
            }
        }
    }

    /// Literal channel holding `bits`.
    pub fn literal_chan(&mut self, bits: u32) -> Chan {
        Chan::new(self.pool.literal([bits, 0, 0, 0], 1), 0)
    }

    pub fn literal_f32(&mut self, value: f32) -> Chan {
        self.literal_chan(value.to_bits())
    }

    /// Fresh temporary register.
    pub fn temp(&mut self, width: u8) -> ValueId {
        self.stats.values_allocated += 1;
        self.pool.allocate(ValueKind::Register, width)
    }

    /// A register holding `chans`, with the channel selector of each lane.
    ///
    /// Channels already in one register are used in place; anything else is
    /// copied into a temporary with a single MOV.
    pub fn ensure_register(&mut self, chans: &[Chan]) -> CompileResult<(ValueId, Vec<u8>)> {
        if let Some(first) = chans.first() {
            if self.pool.is_register(first.value) && chans.iter().all(|c| c.value == first.value) {
                return Ok((first.value, chans.iter().map(|c| c.chan).collect()));
            }
        }
        let value = self.gather(chans, (1u8 << chans.len()) - 1)?;
        Ok((value, (0..chans.len() as u8).collect()))
    }

    /// A register whose written channels (`write_mask`) hold the lanes of
    /// `chans` in order.
    pub fn gather(&mut self, chans: &[Chan], write_mask: u8) -> CompileResult<ValueId> {
        let positions: Vec<u8> = (0..4u8).filter(|c| write_mask & (1 << c) != 0).collect();
        if positions.len() != chans.len() {
            return Err(self.malformed(format!(
                "{} lanes for a {}-channel write",
                chans.len(),
                positions.len()
            )));
        }
        if let Some(first) = chans.first() {
            let in_place = self.pool.is_register(first.value)
                && chans
                    .iter()
                    .zip(&positions)
                    .all(|(c, &p)| c.value == first.value && c.chan == p);
            if in_place {
                return Ok(first.value);
            }
        }
        let width = positions.last().map_or(1, |p| p + 1);
        let value = self.temp(width);
        self.stats.operand_copies += 1;
        self.emit_alu(AluInstruction::new(
            AluOp::MOV,
            Some(AluDest { value, write_mask }),
            vec![AluSrc::new(chans.to_vec())],
        ))?;
        Ok(value)
    }

    /// Append an ALU instruction, splitting off constant reads beyond the
    /// per-instruction limit.
    pub fn emit_alu(&mut self, mut alu: AluInstruction) -> CompileResult<()> {
        let limit = self.caps.const_read_limit.max(1) as usize;
        let constants = alu.constant_values(&self.pool);
        if constants.len() > limit {
            self.stats.constant_splits += 1;
            log::debug!(
                "{} reads {} constant lines, limit {}: splitting",
                alu.op.name(),
                constants.len(),
                limit
            );
            for group in split_groups(&alu, &constants, limit) {
                let temp = self.temp(group.len() as u8);
                let mut srcs = Vec::with_capacity(group.len());
                for (i, chan) in group.iter().enumerate() {
                    srcs.push(*chan);
                    let replacement = Chan::new(temp, i as u8);
                    for src_chan in alu.srcs.iter_mut().flat_map(|s| s.chans.iter_mut()) {
                        if src_chan == chan {
                            *src_chan = replacement;
                        }
                    }
                }
                self.emit(Instruction::Alu(AluInstruction::new(
                    AluOp::MOV,
                    Some(AluDest {
                        value: temp,
                        write_mask: (1u8 << group.len()) - 1,
                    }),
                    vec![AluSrc::new(srcs)],
                )));
            }
        }
        self.emit(Instruction::Alu(alu));
        Ok(())
    }

    /// Emit an ALU op on lanes with modifier flags.
    pub fn alu(
        &mut self,
        op: AluOp,
        dest: Option<AluDest>,
        srcs: Vec<AluSrc>,
        mods: AluModifiers,
    ) -> CompileResult<()> {
        self.emit_alu(AluInstruction::new(op, dest, srcs).with_mods(mods))
    }

    /// Record a constant buffer bank read through the constant cache.
    pub fn use_kcache(&mut self, bank: u8) {
        self.usage.kcache_banks.insert(bank);
    }
}

/// Choose which constant lines `alu` keeps inline and group the channels
/// of the others into MOVs, each reading at most `limit` lines and
/// writing one vector register.
///
/// The `limit` lines with the most referenced channels stay inline, so the
/// moved channels are as few as possible; the moved lines are then packed
/// into the fewest groups. With K lines this gives ceil(K/L) instructions
/// whenever the moved channels fit that many MOV destinations.
fn split_groups(alu: &AluInstruction, constants: &[ValueId], limit: usize) -> Vec<Vec<Chan>> {
    let lines: Vec<Vec<Chan>> = constants
        .iter()
        .map(|&constant| {
            let mut chans: Vec<Chan> = Vec::new();
            for chan in alu.srcs.iter().flat_map(|s| s.chans.iter()) {
                if chan.value == constant && !chans.contains(chan) {
                    chans.push(*chan);
                }
            }
            chans
        })
        .collect();

    // stable sorts: ties keep the order of first use
    let mut by_size: Vec<usize> = (0..lines.len()).collect();
    by_size.sort_by_key(|&i| std::cmp::Reverse(lines[i].len()));
    let moved: Vec<usize> = by_size.into_iter().skip(limit).collect();

    let sizes: Vec<usize> = moved.iter().map(|&i| lines[i].len()).collect();
    let mut best: Vec<Vec<usize>> = (0..moved.len()).map(|k| vec![k]).collect();
    pack_lines(&sizes, limit, 0, &mut Vec::new(), &mut best);

    let mut groups: Vec<Vec<usize>> = best
        .into_iter()
        .map(|group| {
            let mut group: Vec<usize> = group.into_iter().map(|k| moved[k]).collect();
            group.sort_unstable();
            group
        })
        .collect();
    groups.sort_by_key(|group| group[0]);
    groups
        .into_iter()
        .map(|group| group.into_iter().flat_map(|i| lines[i].iter().copied()).collect())
        .collect()
}

/// Search for the fewest groups of at most `limit` lines and four channels.
/// `sizes` holds the channel count per line; `best` starts as any valid
/// grouping and is replaced by every smaller one found.
fn pack_lines(
    sizes: &[usize],
    limit: usize,
    next: usize,
    current: &mut Vec<Vec<usize>>,
    best: &mut Vec<Vec<usize>>,
) {
    if current.len() >= best.len() {
        return;
    }
    if next == sizes.len() {
        *best = current.clone();
        return;
    }
    for g in 0..current.len() {
        let used: usize = current[g].iter().map(|&k| sizes[k]).sum();
        if current[g].len() < limit && used + sizes[next] <= 4 {
            current[g].push(next);
            pack_lines(sizes, limit, next + 1, current, best);
            current[g].pop();
        }
    }
    current.push(vec![next]);
    pack_lines(sizes, limit, next + 1, current, best);
    current.pop();
}

/// Selector per destination channel for packed lanes: the k-th written
/// channel takes result component k.
pub fn packed_swizzle(write_mask: u8) -> [u8; 4] {
    let mut swz = [SEL_MASK; 4];
    let mut lane = 0;
    for (c, s) in swz.iter_mut().enumerate() {
        if write_mask & (1 << c) != 0 {
            *s = lane;
            lane += 1;
        }
    }
    swz
}

/// Source made of the first `lanes` channels, broadcasting a scalar.
pub fn lane_src(chans: &[Chan], lanes: usize) -> AluSrc {
    if chans.len() == 1 {
        AluSrc::new(vec![chans[0]; lanes.max(1)])
    } else {
        AluSrc::new(chans.iter().take(lanes).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrAluOp, ProgramBuilder, Semantic};

    fn program_with_uses() -> ShaderProgram {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 0);
        let va = b.load_input(a);
        b.alu(IrAluOp::Fadd, &[va, va]);
        b.finish()
    }

    #[test]
    fn test_packed_swizzle() {
        assert_eq!(packed_swizzle(0b1010), [SEL_MASK, 0, SEL_MASK, 1]);
        assert_eq!(packed_swizzle(0b0111), [0, 1, 2, SEL_MASK]);
    }

    #[test]
    fn test_constant_split_counts() {
        let program = program_with_uses();
        let caps = DeviceCaps::default().with_const_read_limit(2);
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());

        let dest = ctx.temp(1);
        let k: Vec<Chan> = (0..5).map(|i| Chan::new(ctx.pool.constant(0, i), 0)).collect();
        // K = 3 distinct lines with limit 2: one MOV plus the op
        ctx.emit_alu(AluInstruction::new(
            AluOp::MULADD_IEEE,
            Some(AluDest {
                value: dest,
                write_mask: 1,
            }),
            vec![
                AluSrc::scalar(k[0]),
                AluSrc::scalar(k[1]),
                AluSrc::scalar(k[2]),
            ],
        ))
        .unwrap();
        assert_eq!(ctx.instructions.len(), 2);
        let last = ctx.instructions[1].as_alu().unwrap();
        assert_eq!(last.constant_values(&ctx.pool).len(), 2);
        assert_eq!(ctx.stats.constant_splits, 1);

        // K = 5 lines spread over a vector op with limit 2: ceil(5/2) = 3
        ctx.instructions.clear();
        let dest = ctx.temp(4);
        ctx.emit_alu(AluInstruction::new(
            AluOp::MULADD_IEEE,
            Some(AluDest {
                value: dest,
                write_mask: 0b11,
            }),
            vec![
                AluSrc::new(vec![k[0], k[1]]),
                AluSrc::new(vec![k[2], k[3]]),
                AluSrc::new(vec![k[4], k[4]]),
            ],
        ))
        .unwrap();
        assert_eq!(ctx.instructions.len(), 3);
        for instr in &ctx.instructions {
            assert!(instr.as_alu().unwrap().constant_values(&ctx.pool).len() <= 2);
        }
    }

    #[test]
    fn test_split_keeps_widest_lines_inline() {
        let program = program_with_uses();
        let caps = DeviceCaps::default().with_const_read_limit(2);
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());

        // three vec4 reads starting at dword 1: lines use 3, 4, 4 and 1 channels
        let lines: Vec<ValueId> = (0..4).map(|i| ctx.pool.constant(0, i)).collect();
        let dword = |d: u32| Chan::new(lines[(d / 4) as usize], (d % 4) as u8);
        let srcs: Vec<AluSrc> = [1u32, 5, 9]
            .iter()
            .map(|&first| AluSrc::new((first..first + 4).map(dword).collect()))
            .collect();
        let dest = ctx.temp(4);
        ctx.emit_alu(AluInstruction::new(
            AluOp::MULADD_IEEE,
            Some(AluDest {
                value: dest,
                write_mask: 0xf,
            }),
            srcs,
        ))
        .unwrap();

        // ceil(4/2) = 2: one MOV carries the 3-channel and the 1-channel line
        assert_eq!(ctx.instructions.len(), 2);
        let mov = ctx.instructions[0].as_alu().unwrap();
        assert_eq!(mov.op, AluOp::MOV);
        assert_eq!(mov.constant_values(&ctx.pool), vec![lines[0], lines[3]]);
        assert_eq!(mov.dest.unwrap().write_mask, 0xf);
        let fma = ctx.instructions[1].as_alu().unwrap();
        assert_eq!(fma.constant_values(&ctx.pool), vec![lines[1], lines[2]]);
    }

    #[test]
    fn test_split_packing_search() {
        let mut best: Vec<Vec<usize>> = (0..4).map(|k| vec![k]).collect();
        pack_lines(&[3, 3, 1, 1], 2, 0, &mut Vec::new(), &mut best);
        assert_eq!(best.len(), 2);
        for group in &best {
            assert!(group.len() <= 2);
            assert!(group.iter().map(|&k| [3, 3, 1, 1][k]).sum::<usize>() <= 4);
        }

        let mut best: Vec<Vec<usize>> = (0..3).map(|k| vec![k]).collect();
        pack_lines(&[4, 4, 4], 3, 0, &mut Vec::new(), &mut best);
        assert_eq!(best.len(), 3);
    }

    #[test]
    fn test_gather_reuses_matching_register() {
        let program = program_with_uses();
        let caps = DeviceCaps::default();
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());

        let r = ctx.temp(4);
        let chans: Vec<Chan> = (0..4).map(|c| Chan::new(r, c)).collect();
        assert_eq!(ctx.gather(&chans, 0xf).unwrap(), r);
        assert!(ctx.instructions.is_empty());

        let swapped = vec![Chan::new(r, 1), Chan::new(r, 0)];
        let (value, swz) = ctx.ensure_register(&swapped).unwrap();
        assert_eq!((value, swz), (r, vec![1, 0]));

        let lit = ctx.literal_f32(1.0);
        let (copy, swz) = ctx.ensure_register(&[Chan::new(r, 0), lit]).unwrap();
        assert_ne!(copy, r);
        assert_eq!(swz, vec![0, 1]);
        assert_eq!(ctx.instructions.len(), 1);
        assert_eq!(ctx.stats.operand_copies, 1);
    }

    #[test]
    fn test_undefined_ssa_is_malformed() {
        let program = program_with_uses();
        let caps = DeviceCaps::default();
        let bindings = BindingTable::new();
        let ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());
        let err = ctx.resolve(&Src::ssa(1, 4)).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("undefined value %1"));
    }
}
