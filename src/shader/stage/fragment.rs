//! Fragment shader policy.
//!
//! The hardware preloads one barycentric (i, j) pair per interpolation mode
//! the shader uses, two pairs per register, followed by the fragment position,
//! the front-face flag and the sample mask/id registers when they are read.
//! Smooth inputs are interpolated with INTERP_ZW / INTERP_XY from their pair,
//! flat inputs are loaded from the provoking vertex. Colors go to pixel
//! exports by location; depth, stencil and sample mask share the export at 61.

use hashbrown::HashMap;

use crate::core::{BudgetResource, CompileError, CompileResult, DeviceCaps, RegId, ValueId};
use crate::emit::EmitContext;
use crate::ir::{Instr, InstrKind, Semantic, ShaderProgram, SysValue, VarId, VarMode};
use crate::shader::outputs::{OutputMap, OutputSlot};
use crate::shader::report::ExportRecord;
use crate::shader::scan::{BaryMode, ScanInfo};
use crate::shader::CompileOptions;
use crate::target::{
    AluModifiers, AluOp, AluSrc, Chan, ExportKind, Instruction, InterpInstruction, InterpKind,
};

use super::{export_group, load_preloaded_value, written_slots};

pub const DEPTH_EXPORT_BASE: u32 = 61;

#[derive(Debug, Default)]
pub struct FragmentStage {
    /// Parameter index of every input.
    params: HashMap<VarId, u32>,
    /// Channel holding `i` for each interpolation mode; `j` follows it.
    bary: Vec<(BaryMode, Chan)>,
    frag_coord: Option<ValueId>,
    face: Option<ValueId>,
    sample: Option<ValueId>,
}

impl FragmentStage {
    pub fn do_process_inputs(&mut self, program: &ShaderProgram, caps: &DeviceCaps) -> CompileResult<()> {
        let mut inputs: Vec<(u32, usize)> = program
            .variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.mode == VarMode::Input)
            .map(|(i, v)| (v.location, i))
            .collect();
        inputs.sort_unstable();
        let budget = caps.budget(program.stage).param_exports;
        if inputs.len() as u32 > budget {
            return Err(CompileError::AllocationOverflow {
                resource: BudgetResource::ParamExport,
                required: inputs.len() as u32,
                budget,
            });
        }
        for (param, (_, var)) in inputs.into_iter().enumerate() {
            self.params.insert(VarId(var as u32), param as u32);
        }
        Ok(())
    }

    pub fn do_process_outputs(&mut self, program: &ShaderProgram, caps: &DeviceCaps) -> CompileResult<OutputMap> {
        let mut outputs = OutputMap::new(false);
        for (i, var) in program.variables.iter().enumerate() {
            if var.mode != VarMode::Output {
                continue;
            }
            let (base, chan_base, combined) = match var.semantic {
                Semantic::Color(n) | Semantic::FragData(n) => {
                    if n as u32 >= caps.max_pixel_exports {
                        return Err(CompileError::AllocationOverflow {
                            resource: BudgetResource::PixelExport,
                            required: n as u32 + 1,
                            budget: caps.max_pixel_exports,
                        });
                    }
                    (n as u32, 0, false)
                }
                Semantic::FragDepth => (DEPTH_EXPORT_BASE, 0, true),
                Semantic::FragStencil => (DEPTH_EXPORT_BASE, 1, true),
                Semantic::SampleMask => (DEPTH_EXPORT_BASE, 2, true),
                other => {
                    return Err(CompileError::unsupported(
                        program.stage,
                        format!("output @{} with semantic {:?}", var.name, other),
                    ))
                }
            };
            if chan_base + var.components > 4 {
                return Err(CompileError::malformed(
                    None,
                    format!("output @{} does not fit its export slot", var.name),
                ));
            }
            let slot = match outputs.find_slot(ExportKind::Pixel, base) {
                Some(slot) => slot,
                None => {
                    let mut slot = OutputSlot::new(ExportKind::Pixel, base, var.semantic, 0);
                    if combined {
                        slot = slot.combined();
                    }
                    outputs.add_slot(slot)
                }
            };
            outputs.map_var(VarId(i as u32), slot, chan_base);
        }
        Ok(outputs)
    }

    pub fn allocate_reserved_registers(&mut self, ctx: &mut EmitContext<'_>, scan: &ScanInfo) -> CompileResult<()> {
        let modes: Vec<BaryMode> = scan.bary_modes.iter().copied().collect();
        let mut next: RegId = 0;
        for pair in modes.chunks(2) {
            let value = ctx.pool.allocate_pinned(next, 4)?;
            for (k, &mode) in pair.iter().enumerate() {
                self.bary.push((mode, Chan::new(value, 2 * k as u8)));
            }
            next += 1;
        }
        let mut pin = |used: bool, ctx: &mut EmitContext<'_>| -> CompileResult<Option<ValueId>> {
            if !used {
                return Ok(None);
            }
            let value = ctx.pool.allocate_pinned(next, 4)?;
            next += 1;
            Ok(Some(value))
        };
        self.frag_coord = pin(scan.sysvals.contains(&SysValue::FragCoord), ctx)?;
        self.face = pin(scan.sysvals.contains(&SysValue::FrontFace), ctx)?;
        self.sample = pin(
            scan.sysvals.contains(&SysValue::SampleId) || scan.sysvals.contains(&SysValue::SampleMaskIn),
            ctx,
        )?;
        Ok(())
    }

    pub fn emit_stage_instruction(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<bool> {
        match &instr.kind {
            InstrKind::LoadInput { var, component } => self.emit_load_input(ctx, instr, *var, *component)?,
            InstrKind::SysValue(sysval) => self.emit_sysvalue(ctx, instr, *sysval)?,
            InstrKind::Discard => {
                let one = ctx.literal_f32(1.0);
                let zero = ctx.literal_f32(0.0);
                ctx.alu(
                    AluOp::KILLGT,
                    None,
                    vec![AluSrc::scalar(one), AluSrc::scalar(zero)],
                    AluModifiers::empty(),
                )?;
                ctx.usage.uses_kill = true;
            }
            InstrKind::DiscardIf { cond } => {
                let cond = ctx.resolve_scalar(cond)?;
                let zero = ctx.literal_chan(0);
                ctx.alu(
                    AluOp::KILLNE_INT,
                    None,
                    vec![AluSrc::scalar(cond), AluSrc::scalar(zero)],
                    AluModifiers::empty(),
                )?;
                ctx.usage.uses_kill = true;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn emit_load_input(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr, var: VarId, component: u8) -> CompileResult<()> {
        let Some(&param) = self.params.get(&var) else {
            return Err(ctx.malformed(format!("load of unknown input #{}", var.0)));
        };
        let program = ctx.program;
        let Some(input) = program.variable(var) else {
            return Err(ctx.malformed(format!("load of unknown input #{}", var.0)));
        };
        let count = instr.dest.as_ref().map_or(0, |d| d.components());
        let needed = ((1u16 << count) - 1) << component;
        if count == 0 || needed > 0xf {
            return Err(ctx.malformed(format!(
                "{} components from component {} of @{}",
                count, component, input.name
            )));
        }
        let needed = needed as u8;
        let result = ctx.temp(4);

        match BaryMode::of(input) {
            Some(mode) => {
                let Some(&(_, i)) = self.bary.iter().find(|(m, _)| *m == mode) else {
                    return Err(ctx.malformed(format!("no barycentrics for {:?}", mode)));
                };
                let j = Chan::new(i.value, i.chan + 1);
                for (kind, mask) in [(InterpKind::Zw, 0b1100), (InterpKind::Xy, 0b0011)] {
                    if needed & mask != 0 {
                        ctx.emit(Instruction::Interp(InterpInstruction {
                            kind,
                            dest: result,
                            write_mask: needed & mask,
                            bary: Some((i, j)),
                            param,
                        }));
                    }
                }
            }
            None => ctx.emit(Instruction::Interp(InterpInstruction {
                kind: InterpKind::LoadP0,
                dest: result,
                write_mask: needed,
                bary: None,
                param,
            })),
        }
        let chans = (component..component + count).map(|c| Chan::new(result, c)).collect();
        ctx.bind_dest(instr, chans)
    }

    fn emit_sysvalue(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr, sysval: SysValue) -> CompileResult<()> {
        let missing = |ctx: &EmitContext<'_>| ctx.malformed(format!("{} was not reserved", sysval.name()));
        match sysval {
            SysValue::FragCoord => {
                let value = self.frag_coord.ok_or_else(|| missing(ctx))?;
                load_preloaded_value(ctx, instr, value, &[0, 1, 2, 3])
            }
            SysValue::FrontFace => {
                let face = self.face.ok_or_else(|| missing(ctx))?;
                let zero = ctx.literal_f32(0.0);
                let dest = ctx.dest_target(instr)?;
                let lanes = dest.write_mask.count_ones() as usize;
                ctx.alu(
                    AluOp::SETGT_DX10,
                    Some(dest),
                    vec![
                        AluSrc::new(vec![Chan::new(face, 0); lanes]),
                        AluSrc::new(vec![zero; lanes]),
                    ],
                    AluModifiers::empty(),
                )
            }
            SysValue::SampleMaskIn => {
                let value = self.sample.ok_or_else(|| missing(ctx))?;
                load_preloaded_value(ctx, instr, value, &[0])
            }
            SysValue::SampleId => {
                let value = self.sample.ok_or_else(|| missing(ctx))?;
                load_preloaded_value(ctx, instr, value, &[3])
            }
            other => Err(ctx.unsupported(format!("system value {}", other.name()))),
        }
    }

    /// Pixel exports, colors first.
    pub fn do_finalize(&mut self, ctx: &mut EmitContext<'_>, outputs: &OutputMap, options: &CompileOptions) -> Vec<ExportRecord> {
        let mut slots = written_slots(outputs, ExportKind::Pixel);
        if !slots.iter().any(|s| s.base < DEPTH_EXPORT_BASE) && options.dummy_exports {
            log::debug!("fragment shader writes no color, exporting a masked pixel 0");
            slots.push(OutputSlot::new(ExportKind::Pixel, 0, Semantic::Color(0), 0));
        }
        export_group(ctx, slots)
    }
}
