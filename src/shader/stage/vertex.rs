//! Vertex shader policy.
//!
//! Vertex attributes are preloaded by the fetch shader: the attribute at
//! location `L` arrives in `R(L+1)`, and `R0` carries the vertex id in `x` and
//! the instance id in `w`. Outputs go to position exports (position at 60,
//! the misc vector with point size, layer and viewport index at 61, clip
//! distances from 62) and parameter exports numbered in location order. The
//! output mapping is shared with geometry shaders.

use hashbrown::HashMap;

use crate::core::{BudgetResource, CompileError, CompileResult, DeviceCaps, RegId, ValueId};
use crate::emit::EmitContext;
use crate::ir::{Instr, InstrKind, Semantic, ShaderProgram, SysValue, VarId, VarMode};
use crate::shader::outputs::{OutputMap, OutputSlot};
use crate::shader::report::ExportRecord;
use crate::shader::CompileOptions;
use crate::target::{ExportKind, SEL_0, SEL_1};

use super::{evaluate_spi_sid, export_group, load_preloaded_value, written_slots};

/// Attribute locations the fetch shader can preload.
pub const MAX_ATTRIBUTES: u32 = 32;

pub const POS_EXPORT_BASE: u32 = 60;
pub const MISC_EXPORT_BASE: u32 = 61;
pub const CLIP_EXPORT_BASE: u32 = 62;

#[derive(Debug, Default)]
pub struct VertexStage {
    inputs: Vec<(VarId, u32)>,
    attributes: HashMap<VarId, ValueId>,
    ids: Option<ValueId>,
}

impl VertexStage {
    pub fn do_process_inputs(&mut self, program: &ShaderProgram) -> CompileResult<()> {
        for (i, var) in program.variables.iter().enumerate() {
            if var.mode != VarMode::Input {
                continue;
            }
            if var.location >= MAX_ATTRIBUTES {
                return Err(CompileError::malformed(
                    None,
                    format!("vertex attribute @{} at location {}", var.name, var.location),
                ));
            }
            self.inputs.push((VarId(i as u32), var.location));
        }
        Ok(())
    }

    pub fn allocate_reserved_registers(&mut self, ctx: &mut EmitContext<'_>) -> CompileResult<()> {
        self.ids = Some(ctx.pool.allocate_pinned(0, 4)?);
        for &(var, location) in &self.inputs {
            let value = ctx.pool.allocate_pinned((location + 1) as RegId, 4)?;
            self.attributes.insert(var, value);
        }
        Ok(())
    }

    pub fn emit_stage_instruction(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<bool> {
        match instr.kind {
            InstrKind::LoadInput { var, component } => {
                let Some(&value) = self.attributes.get(&var) else {
                    return Err(ctx.malformed(format!("load of unknown input #{}", var.0)));
                };
                let chans: Vec<u8> = (component..4).collect();
                load_preloaded_value(ctx, instr, value, &chans)?;
            }
            InstrKind::SysValue(sysval) => {
                let Some(ids) = self.ids else {
                    return Err(ctx.malformed("system value read before register reservation"));
                };
                let chan = match sysval {
                    SysValue::VertexId => 0,
                    SysValue::InstanceId => 3,
                    other => return Err(ctx.unsupported(format!("system value {}", other.name()))),
                };
                load_preloaded_value(ctx, instr, ids, &[chan])?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Output map of vertex-like stages.
///
/// `force_dedicated` routes every store through a register of its own, for
/// stages that write outputs to a ring instead of exporting them.
pub fn map_vertex_outputs(program: &ShaderProgram, caps: &DeviceCaps, force_dedicated: bool) -> CompileResult<OutputMap> {
    let mut outputs = OutputMap::new(force_dedicated);
    let mut vars: Vec<(usize, &crate::ir::Variable)> = program
        .variables
        .iter()
        .enumerate()
        .filter(|(_, v)| v.mode == VarMode::Output)
        .collect();
    vars.sort_by_key(|(i, v)| (v.location, *i));

    let mut next_param = 0u32;
    for (i, var) in vars {
        let id = VarId(i as u32);
        let (kind, base, chan_base, combined) = match var.semantic {
            Semantic::Position => (ExportKind::Pos, POS_EXPORT_BASE, 0, false),
            Semantic::PointSize => (ExportKind::Pos, MISC_EXPORT_BASE, 0, true),
            Semantic::Layer => (ExportKind::Pos, MISC_EXPORT_BASE, 2, true),
            Semantic::ViewportIndex => (ExportKind::Pos, MISC_EXPORT_BASE, 3, true),
            Semantic::ClipDistance(n) => (ExportKind::Pos, CLIP_EXPORT_BASE + n as u32, 0, false),
            Semantic::FragDepth | Semantic::FragStencil | Semantic::SampleMask | Semantic::FragData(_) => {
                return Err(CompileError::unsupported(
                    program.stage,
                    format!("output @{} with a fragment semantic", var.name),
                ));
            }
            _ => {
                next_param += 1;
                (ExportKind::Param, next_param - 1, 0, false)
            }
        };
        if chan_base + var.components > 4 {
            return Err(CompileError::malformed(
                None,
                format!("output @{} does not fit its export slot", var.name),
            ));
        }
        let slot = match outputs.find_slot(kind, base) {
            Some(slot) => slot,
            None => {
                let mut slot = OutputSlot::new(kind, base, var.semantic, evaluate_spi_sid(var.semantic));
                if combined {
                    slot = slot.combined();
                }
                outputs.add_slot(slot)
            }
        };
        outputs.map_var(id, slot, chan_base);
    }

    let positions = outputs.count(ExportKind::Pos) as u32;
    let highest_pos = outputs
        .slots()
        .iter()
        .filter(|s| s.kind == ExportKind::Pos)
        .map(|s| s.base - POS_EXPORT_BASE + 1)
        .max()
        .unwrap_or(0);
    if positions.max(highest_pos) > caps.max_pos_exports {
        return Err(CompileError::AllocationOverflow {
            resource: BudgetResource::PosExport,
            required: positions.max(highest_pos),
            budget: caps.max_pos_exports,
        });
    }
    let budget = caps.budget(program.stage).param_exports;
    if next_param > budget {
        return Err(CompileError::AllocationOverflow {
            resource: BudgetResource::ParamExport,
            required: next_param,
            budget,
        });
    }
    log::debug!("{} position and {} parameter exports", positions, next_param);
    Ok(outputs)
}

/// Position exports followed by parameter exports.
///
/// The hardware expects at least one of each; missing ones are replaced
/// by constant exports when `options.dummy_exports` is set.
pub fn export_vertex_outputs(ctx: &mut EmitContext<'_>, outputs: &OutputMap, options: &CompileOptions) -> Vec<ExportRecord> {
    let mut records = Vec::new();

    let mut positions = written_slots(outputs, ExportKind::Pos);
    if !positions.iter().any(|s| s.base == POS_EXPORT_BASE) {
        log::warn!("vertex shader does not write a position");
        if options.dummy_exports {
            let mut slot = OutputSlot::new(ExportKind::Pos, POS_EXPORT_BASE, Semantic::Position, 0);
            slot.swizzle = [SEL_0, SEL_0, SEL_0, SEL_1];
            positions.push(slot);
        }
    }
    records.extend(export_group(ctx, positions));

    let mut params = written_slots(outputs, ExportKind::Param);
    if params.is_empty() && options.dummy_exports {
        let mut slot = OutputSlot::new(ExportKind::Param, 0, Semantic::None, 0);
        slot.swizzle = [SEL_0, SEL_0, SEL_0, SEL_1];
        params.push(slot);
    }
    records.extend(export_group(ctx, params));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BindingTable;
    use crate::ir::{IrAluOp, ProgramBuilder, ShaderStage};
    use crate::shader::{compile, compile_with_options};
    use crate::target::Instruction;

    fn exports(code: &[Instruction]) -> Vec<(ExportKind, u32, bool)> {
        code.iter()
            .filter_map(|i| i.as_export())
            .map(|e| (e.kind, e.base, e.is_last))
            .collect()
    }

    #[test]
    fn test_attributes_are_preloaded() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 3);
        let pos = b.output("pos", 4, Semantic::Position, 0);
        let va = b.load_input(a);
        b.store_output(pos, va);
        let shader = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap();

        assert!(shader.report.reserved_gprs.contains(&0));
        assert!(shader.report.reserved_gprs.contains(&4));
        let export = shader.instructions[0].as_export().unwrap();
        assert_eq!(shader.pool.phys(export.value.unwrap()), Some(4));
        assert_eq!(
            exports(&shader.instructions),
            vec![(ExportKind::Pos, 60, true), (ExportKind::Param, 0, true)]
        );
    }

    #[test]
    fn test_sysvals_and_misc_vector() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let pos = b.output("pos", 4, Semantic::Position, 0);
        let psize = b.output("psize", 1, Semantic::PointSize, 1);
        let col = b.output("col", 4, Semantic::Color(0), 2);
        let vid = b.sysval(SysValue::VertexId);
        let iid = b.sysval(SysValue::InstanceId);
        let f = b.alu(IrAluOp::I2f, &[vid]);
        b.store_output(psize, f);
        let v = b.alu(IrAluOp::Vec4, &[vid, iid, vid, iid]);
        b.store_output(pos, v);
        b.store_output(col, v);
        let shader = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap();

        assert_eq!(
            exports(&shader.instructions),
            vec![
                (ExportKind::Pos, 60, false),
                (ExportKind::Pos, 61, true),
                (ExportKind::Param, 0, true)
            ]
        );
        let sid = shader.report.exports.last().unwrap().spi_sid;
        assert_eq!(sid, evaluate_spi_sid(Semantic::Color(0)));
    }

    #[test]
    fn test_missing_position_gets_dummy_export() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let col = b.output("col", 4, Semantic::Generic(1), 0);
        let c = b.load_const_f32(&[0.5, 0.5, 0.5, 1.0]);
        b.store_output(col, c);
        let program = b.finish();

        let shader = compile(&program, &DeviceCaps::default(), &BindingTable::new()).unwrap();
        let pos = shader.instructions.iter().filter_map(|i| i.as_export()).next().unwrap();
        assert_eq!((pos.kind, pos.value), (ExportKind::Pos, None));

        let options = CompileOptions { dummy_exports: false };
        let shader = compile_with_options(&program, &DeviceCaps::default(), &BindingTable::new(), options).unwrap();
        assert_eq!(exports(&shader.instructions), vec![(ExportKind::Param, 0, true)]);
    }

    #[test]
    fn test_export_budgets() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        for i in 0..3 {
            b.output(&format!("o{}", i), 4, Semantic::Generic(i), i as u32);
        }
        let caps = DeviceCaps::default().with_stage_budget(
            ShaderStage::Vertex,
            crate::core::StageBudget {
                gprs: 124,
                param_exports: 2,
            },
        );
        let err = compile(&b.finish(), &caps, &BindingTable::new()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::AllocationOverflow {
                resource: BudgetResource::ParamExport,
                required: 3,
                budget: 2
            }
        ));

        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.output("clip", 4, Semantic::ClipDistance(3), 0);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_allocation_overflow());
    }

    #[test]
    fn test_vertex_rejects_fragment_only_operations() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.sysval(SysValue::FrontFace);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());

        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.instr_void(crate::ir::InstrKind::Discard);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());

        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.output("depth", 1, Semantic::FragDepth, 0);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());
    }
}
