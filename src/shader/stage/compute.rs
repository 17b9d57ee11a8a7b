//! Compute shader policy.
//!
//! `R0.xyz` holds the local invocation id and `R1.xyz` the workgroup id. The
//! number of workgroups is read from the driver's buffer info bank.

use crate::core::{CompileError, CompileResult, ValueId};
use crate::emit::{EmitContext, BUFFER_INFO_BANK};
use crate::ir::{Instr, InstrKind, ShaderProgram, SysValue, VarMode};
use crate::shader::outputs::OutputMap;
use crate::target::{AluModifiers, AluOp, Chan};

use super::load_preloaded_value;

#[derive(Debug, Default)]
pub struct ComputeStage {
    local_id: Option<ValueId>,
    workgroup_id: Option<ValueId>,
}

fn reject_mode(program: &ShaderProgram, mode: VarMode) -> CompileResult<()> {
    match program.variables.iter().find(|v| v.mode == mode) {
        Some(var) => Err(CompileError::unsupported(
            program.stage,
            format!("{} variable @{}", mode.name(), var.name),
        )),
        None => Ok(()),
    }
}

impl ComputeStage {
    pub fn do_process_inputs(&mut self, program: &ShaderProgram) -> CompileResult<()> {
        reject_mode(program, VarMode::Input)
    }

    pub fn do_process_outputs(&mut self, program: &ShaderProgram) -> CompileResult<OutputMap> {
        reject_mode(program, VarMode::Output)?;
        Ok(OutputMap::new(false))
    }

    pub fn allocate_reserved_registers(&mut self, ctx: &mut EmitContext<'_>) -> CompileResult<()> {
        self.local_id = Some(ctx.pool.allocate_pinned(0, 4)?);
        self.workgroup_id = Some(ctx.pool.allocate_pinned(1, 4)?);
        Ok(())
    }

    pub fn emit_stage_instruction(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<bool> {
        match &instr.kind {
            InstrKind::SysValue(SysValue::LocalInvocationId) => {
                let value = self.local_id.ok_or_else(|| ctx.malformed("local id was not reserved"))?;
                load_preloaded_value(ctx, instr, value, &[0, 1, 2])?;
            }
            InstrKind::SysValue(SysValue::WorkgroupId) => {
                let value = self
                    .workgroup_id
                    .ok_or_else(|| ctx.malformed("workgroup id was not reserved"))?;
                load_preloaded_value(ctx, instr, value, &[0, 1, 2])?;
            }
            InstrKind::SysValue(SysValue::NumWorkgroups) => {
                let line = ctx.pool.constant(BUFFER_INFO_BANK, 0);
                ctx.use_kcache(BUFFER_INFO_BANK);
                ctx.bind_dest(instr, (0..3).map(|c| Chan::new(line, c)).collect())?;
            }
            InstrKind::SysValue(other) => {
                return Err(ctx.unsupported(format!("system value {}", other.name())));
            }
            InstrKind::Barrier => ctx.alu(AluOp::GROUP_BARRIER, None, Vec::new(), AluModifiers::empty())?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BindingTable, DeviceCaps};
    use crate::ir::{IrAluOp, ProgramBuilder, Semantic, ShaderStage};
    use crate::shader::compile;

    #[test]
    fn test_ids_and_barrier() {
        let mut b = ProgramBuilder::new(ShaderStage::Compute);
        let local = b.sysval(SysValue::LocalInvocationId);
        let group = b.sysval(SysValue::WorkgroupId);
        let count = b.sysval(SysValue::NumWorkgroups);
        b.instr_void(InstrKind::Barrier);
        let t = b.alu(IrAluOp::Imul, &[group, count]);
        b.alu(IrAluOp::Iadd, &[t, local]);
        let shader = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap();

        let ops: Vec<&str> = shader.instructions.iter().map(|i| i.opcode()).collect();
        assert_eq!(ops, vec!["GROUP_BARRIER", "MULLO_INT", "ADD_INT"]);
        assert_eq!(shader.report.reserved_gprs, vec![0, 1]);
        assert_eq!(shader.report.kcache_banks, vec![BUFFER_INFO_BANK]);
        assert!(shader.report.exports.is_empty());
    }

    #[test]
    fn test_compute_rejects_varyings() {
        let mut b = ProgramBuilder::new(ShaderStage::Compute);
        b.input("a", 4, Semantic::Generic(0), 0);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());

        let mut b = ProgramBuilder::new(ShaderStage::Compute);
        b.sysval(SysValue::FragCoord);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());
    }
}
