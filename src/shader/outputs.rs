// This module keeps the output register map of a shader: one slot per export target (a
// position, misc, clip-distance or parameter export in vertex-like stages, a color or
// depth/stencil/sample-mask export in fragment shaders), and for every output variable the
// slot and first channel it writes. Several variables may share one combined slot, such as
// point size, layer and viewport index packed into the misc vector. A store either aliases
// the stored register directly, when the variable is written exactly once, at top level and
// in full from a value nothing overwrites afterwards, or copies into a dedicated register
// allocated on first use. Values backing exported slots are flagged live-out so that the
// register remap keeps them alive until the exports appended during finalization.

//! Output slots and stores to output variables.

use hashbrown::HashMap;

use crate::core::{CompileResult, ValueId};
use crate::emit::EmitContext;
use crate::ir::{NodeId, Semantic, Src, SrcRef, VarId};
use crate::target::{AluDest, AluModifiers, AluOp, AluSrc, Chan, ExportKind, SEL_MASK};

use super::scan::ScanInfo;

/// One export target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSlot {
    pub kind: ExportKind,
    pub base: u32,
    pub semantic: Semantic,
    /// Semantic id used to link parameter exports to fragment inputs.
    pub spi_sid: u32,
    pub value: Option<ValueId>,
    pub swizzle: [u8; 4],
    /// Channels written so far.
    pub written: u8,
    /// Slot shared by several variables.
    pub combined: bool,
    /// Byte offset in a geometry ring item.
    pub ring_offset: u32,
}

impl OutputSlot {
    pub fn new(kind: ExportKind, base: u32, semantic: Semantic, spi_sid: u32) -> Self {
        Self {
            kind,
            base,
            semantic,
            spi_sid,
            value: None,
            swizzle: [SEL_MASK; 4],
            written: 0,
            combined: false,
            ring_offset: 0,
        }
    }

    pub fn combined(mut self) -> Self {
        self.combined = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct OutputMap {
    slots: Vec<OutputSlot>,
    targets: HashMap<VarId, (usize, u8)>,
    /// Every store goes through a dedicated register that is never exported
    /// (geometry outputs are written to the ring instead).
    force_dedicated: bool,
}

impl OutputMap {
    pub fn new(force_dedicated: bool) -> Self {
        Self {
            force_dedicated,
            ..Self::default()
        }
    }

    pub fn add_slot(&mut self, slot: OutputSlot) -> usize {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    pub fn find_slot(&self, kind: ExportKind, base: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.kind == kind && s.base == base)
    }

    /// Route stores to `var` into `slot`, starting at channel `chan_base`.
    pub fn map_var(&mut self, var: VarId, slot: usize, chan_base: u8) {
        self.targets.insert(var, (slot, chan_base));
    }

    pub fn slots(&self) -> &[OutputSlot] {
        &self.slots
    }

    pub fn count(&self, kind: ExportKind) -> usize {
        self.slots.iter().filter(|s| s.kind == kind).count()
    }

    /// Register currently backing the slot of `var`.
    pub fn output_register(&self, var: VarId) -> Option<ValueId> {
        let &(slot, _) = self.targets.get(&var)?;
        self.slots[slot].value
    }

    /// Lay the slots out as consecutive vec4 entries of a ring item.
    pub fn assign_ring_offsets(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.ring_offset = i as u32 * 16;
        }
    }

    /// Bytes written to the ring per emitted vertex.
    pub fn ring_item_size(&self) -> u32 {
        self.slots.len() as u32 * 16
    }

    /// Lower a store of `src` (lanes packed by `write_mask`) to `var`.
    pub fn store(
        &mut self,
        ctx: &mut EmitContext<'_>,
        scan: &ScanInfo,
        node: NodeId,
        var: VarId,
        src: &Src,
        write_mask: u8,
    ) -> CompileResult<()> {
        let Some(&(index, chan_base)) = self.targets.get(&var) else {
            return Err(ctx.malformed(format!("store to unmapped output #{}", var.0)));
        };
        let mask = write_mask << chan_base;
        if write_mask == 0 || mask > 0xf {
            return Err(ctx.malformed(format!("output write mask {:#x}", write_mask)));
        }
        let chans = ctx.resolve_lanes(src, write_mask.count_ones() as usize)?;

        if self.can_alias(ctx, scan, node, index, chan_base, var, src, &chans) {
            let slot = &mut self.slots[index];
            let value = chans[0].value;
            let positions = (0..4u8).filter(|c| mask & (1 << c) != 0);
            for (chan, pos) in chans.iter().zip(positions) {
                slot.swizzle[pos as usize] = chan.chan;
            }
            slot.value = Some(value);
            slot.written = mask;
            ctx.pool.mark_live_out(value);
            log::debug!("output {} {} aliases {}", slot.kind.name(), slot.base, value);
            return Ok(());
        }

        let value = match self.slots[index].value {
            Some(value) => value,
            None => {
                let value = ctx.pool.allocate_multi_write(4);
                ctx.stats.values_allocated += 1;
                if !self.force_dedicated {
                    ctx.pool.mark_live_out(value);
                }
                self.slots[index].value = Some(value);
                value
            }
        };
        let slot = &mut self.slots[index];
        slot.written |= mask;
        for c in 0..4u8 {
            if mask & (1 << c) != 0 {
                slot.swizzle[c as usize] = c;
            }
        }

        let mut mods = AluModifiers::empty();
        if src.negate {
            mods |= AluModifiers::SRC0_NEG;
        }
        if src.abs {
            mods |= AluModifiers::SRC0_ABS;
        }
        ctx.alu(
            AluOp::MOV,
            Some(AluDest {
                value,
                write_mask: mask,
            }),
            vec![AluSrc::new(chans)],
            mods,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn can_alias(
        &self,
        ctx: &EmitContext<'_>,
        scan: &ScanInfo,
        node: NodeId,
        index: usize,
        chan_base: u8,
        var: VarId,
        src: &Src,
        chans: &[Chan],
    ) -> bool {
        if self.force_dedicated || self.slots[index].combined || chan_base != 0 {
            return false;
        }
        let info = scan.output_stores.get(&var).copied().unwrap_or_default();
        if info.count != 1 || !info.top_level || !info.full_width || src.negate || src.abs {
            return false;
        }
        let Some(first) = chans.first() else {
            return false;
        };
        if !ctx.pool.is_register(first.value) || chans.iter().any(|c| c.value != first.value) {
            return false;
        }
        match src.source {
            SrcRef::Register(reg) => scan.register_last_write.get(&reg).is_some_and(|&last| last < node),
            SrcRef::Ssa(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BindingTable, DeviceCaps};
    use crate::emit::{AluEmitter, EmitInstruction, ResourceUsage};
    use crate::ir::{IrAluOp, ProgramBuilder, ShaderStage};

    #[test]
    fn test_single_full_store_aliases() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let out = b.output("o", 4, Semantic::Generic(0), 0);
        let r = b.register("r", 4);
        let c = b.load_const_f32(&[1.0, 2.0, 3.0, 4.0]);
        b.alu_to_reg(r, 0xf, IrAluOp::Mov, &[c]);
        let store = b.store_output(out, Src::reg(r, 4).swizzled(&[3, 2, 1, 0]));
        let program = b.finish();
        let scan = ScanInfo::scan(&program).unwrap();

        let caps = DeviceCaps::default();
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());
        let mut map = OutputMap::new(false);
        let slot = map.add_slot(OutputSlot::new(ExportKind::Param, 0, Semantic::Generic(0), 10));
        map.map_var(out, slot, 0);

        let src = Src::reg(r, 4).swizzled(&[3, 2, 1, 0]);
        map.store(&mut ctx, &scan, store, out, &src, 0xf).unwrap();
        assert!(ctx.instructions.is_empty());
        let value = map.output_register(out).unwrap();
        assert_eq!(map.slots()[slot].swizzle, [3, 2, 1, 0]);
        assert!(ctx.pool.get(value).unwrap().live_out);
    }

    #[test]
    fn test_combined_slot_copies_into_channel() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let psize = b.output("psize", 1, Semantic::PointSize, 0);
        let layer = b.output("layer", 1, Semantic::Layer, 1);
        let c = b.load_const_f32(&[1.0]);
        let s1 = b.store_output(psize, c);
        let s2 = b.store_output(layer, c);
        let program = b.finish();
        let scan = ScanInfo::scan(&program).unwrap();

        let caps = DeviceCaps::default();
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());
        // bind the constant operand
        if let Some(crate::ir::Node::Instr(instr)) = program.body.first() {
            EmitInstruction::emit(&mut AluEmitter::new(), &mut ctx, instr).unwrap();
        }
        let mut map = OutputMap::new(false);
        let slot = map.add_slot(OutputSlot::new(ExportKind::Pos, 61, Semantic::PointSize, 0).combined());
        map.map_var(psize, slot, 0);
        map.map_var(layer, slot, 2);

        map.store(&mut ctx, &scan, s1, psize, &c, 1).unwrap();
        map.store(&mut ctx, &scan, s2, layer, &c, 1).unwrap();
        let masks: Vec<u8> = ctx
            .instructions
            .iter()
            .filter_map(|i| i.as_alu())
            .filter_map(|a| a.dest.map(|d| d.write_mask))
            .collect();
        assert_eq!(masks, vec![0b0001, 0b0100]);
        assert_eq!(map.slots()[slot].written, 0b0101);
        assert_eq!(map.slots()[slot].swizzle, [0, SEL_MASK, 2, SEL_MASK]);
    }

    #[test]
    fn test_register_rewritten_after_store_is_copied() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let out = b.output("o", 4, Semantic::Generic(0), 0);
        let r = b.register("r", 4);
        let c = b.load_const_f32(&[1.0, 2.0, 3.0, 4.0]);
        b.alu_to_reg(r, 0xf, IrAluOp::Mov, &[c]);
        let store = b.store_output(out, Src::reg(r, 4));
        b.alu_to_reg(r, 0xf, IrAluOp::Fneg, &[c]);
        let program = b.finish();
        let scan = ScanInfo::scan(&program).unwrap();

        let caps = DeviceCaps::default();
        let bindings = BindingTable::new();
        let mut ctx = EmitContext::new(&program, &caps, &bindings, ResourceUsage::default());
        let mut map = OutputMap::new(false);
        let slot = map.add_slot(OutputSlot::new(ExportKind::Param, 0, Semantic::Generic(0), 10));
        map.map_var(out, slot, 0);
        map.store(&mut ctx, &scan, store, out, &Src::reg(r, 4), 0xf).unwrap();
        assert_eq!(ctx.instructions.len(), 1);
        assert_ne!(map.output_register(out), Some(ValueId(0)));
    }
}
