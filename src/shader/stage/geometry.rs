//! Geometry shader policy.
//!
//! Per-vertex inputs are fetched from the ESGS ring at the offsets the
//! hardware preloads: vertices 0-2 in `R0.x`, `R0.y`, `R0.w` and vertices 3-5
//! in `R1.x`, `R1.y`, `R1.w`; `R0.z` holds the primitive id and `R1.z` the
//! invocation id. Outputs are collected in dedicated registers and written to
//! the GSVS ring on every emitted vertex, one vec4 per output slot, at the
//! byte offset kept in a per-stream vertex counter.

use std::collections::BTreeMap;

use crate::core::{CompileError, CompileResult, DeviceCaps, ValueId};
use crate::emit::EmitContext;
use crate::ir::{Instr, InstrKind, Operand, ShaderProgram, SysValue, VarId};
use crate::shader::outputs::OutputMap;
use crate::shader::scan::ScanInfo;
use crate::target::{
    AluDest, AluModifiers, AluOp, AluSrc, CfInstruction, Chan, FetchInstruction, FetchKind, Instruction,
    MemWriteInstruction, MemWriteKind, SEL_MASK,
};

use super::{load_preloaded_value, vertex};

/// Vertices per input primitive the ring offsets cover.
pub const MAX_INPUT_VERTICES: u8 = 6;

#[derive(Debug, Default)]
pub struct GeometryStage {
    r0: Option<ValueId>,
    r1: Option<ValueId>,
    /// Byte offset of the next vertex, per stream.
    counters: BTreeMap<u8, ValueId>,
    ring_item_size: u32,
}

impl GeometryStage {
    pub fn do_process_inputs(&mut self, program: &ShaderProgram) -> CompileResult<()> {
        let vertices = program.geometry.input_vertices;
        if vertices == 0 || vertices > MAX_INPUT_VERTICES {
            return Err(CompileError::malformed(
                None,
                format!("geometry shader with {} input vertices", vertices),
            ));
        }
        Ok(())
    }

    pub fn do_process_outputs(
        &mut self,
        program: &ShaderProgram,
        caps: &DeviceCaps,
        scan: &ScanInfo,
    ) -> CompileResult<OutputMap> {
        let mut outputs = vertex::map_vertex_outputs(program, caps, true)?;
        outputs.assign_ring_offsets();
        self.ring_item_size = outputs.ring_item_size();
        log::debug!(
            "geometry ring item {} bytes, streams {:?}",
            self.ring_item_size,
            scan.streams
        );
        Ok(outputs)
    }

    pub fn allocate_reserved_registers(&mut self, ctx: &mut EmitContext<'_>, scan: &ScanInfo) -> CompileResult<()> {
        self.r0 = Some(ctx.pool.allocate_pinned(0, 4)?);
        self.r1 = Some(ctx.pool.allocate_pinned(1, 4)?);
        for &stream in &scan.streams {
            let counter = ctx.pool.allocate_multi_write(1);
            let zero = ctx.literal_chan(0);
            ctx.alu(
                AluOp::MOV,
                Some(AluDest {
                    value: counter,
                    write_mask: 1,
                }),
                vec![AluSrc::scalar(zero)],
                AluModifiers::empty(),
            )?;
            self.counters.insert(stream, counter);
        }
        Ok(())
    }

    pub fn ring_item_size(&self) -> u32 {
        self.ring_item_size
    }

    fn preloaded(&self, ctx: &EmitContext<'_>, reg: u8) -> CompileResult<ValueId> {
        let value = if reg == 0 { self.r0 } else { self.r1 };
        value.ok_or_else(|| ctx.malformed("geometry registers were not reserved"))
    }

    /// Channel holding the ESGS ring offset of input vertex `vertex`.
    fn vertex_offset(&self, ctx: &EmitContext<'_>, vertex: u32) -> CompileResult<Chan> {
        const CHANS: [u8; 3] = [0, 1, 3];
        let value = self.preloaded(ctx, (vertex / 3) as u8)?;
        Ok(Chan::new(value, CHANS[(vertex % 3) as usize]))
    }

    pub fn emit_stage_instruction(
        &mut self,
        ctx: &mut EmitContext<'_>,
        outputs: &OutputMap,
        instr: &Instr,
    ) -> CompileResult<bool> {
        match &instr.kind {
            InstrKind::LoadPerVertexInput {
                var,
                vertex,
                component,
            } => self.emit_load_per_vertex(ctx, instr, *var, vertex, *component)?,
            InstrKind::LoadInput { .. } => {
                return Err(ctx.unsupported("load_input of a per-vertex geometry input"));
            }
            InstrKind::SysValue(SysValue::PrimitiveId) => {
                let r0 = self.preloaded(ctx, 0)?;
                load_preloaded_value(ctx, instr, r0, &[2])?;
            }
            InstrKind::SysValue(SysValue::InvocationId) => {
                let r1 = self.preloaded(ctx, 1)?;
                load_preloaded_value(ctx, instr, r1, &[2])?;
            }
            InstrKind::SysValue(other) => {
                return Err(ctx.unsupported(format!("system value {}", other.name())));
            }
            InstrKind::EmitVertex { stream } => self.emit_vertex(ctx, outputs, *stream)?,
            InstrKind::EndPrimitive { stream } => {
                ctx.emit(Instruction::Cf(CfInstruction::CutVertex { stream: *stream }));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn emit_load_per_vertex(
        &mut self,
        ctx: &mut EmitContext<'_>,
        instr: &Instr,
        var: VarId,
        vertex: &Operand,
        component: u8,
    ) -> CompileResult<()> {
        let program = ctx.program;
        let Some(input) = program.variable(var) else {
            return Err(ctx.malformed(format!("load of unknown input #{}", var.0)));
        };
        let vertex = match vertex {
            Operand::Const(v) if *v < program.geometry.input_vertices as u32 => *v,
            Operand::Const(v) => {
                return Err(ctx.malformed(format!(
                    "vertex {} of a {}-vertex primitive",
                    v, program.geometry.input_vertices
                )))
            }
            Operand::Dynamic(_) => return Err(ctx.unsupported("dynamically indexed geometry input vertex")),
        };
        let addr = self.vertex_offset(ctx, vertex)?;
        let (dest, mut swizzle) = ctx.vector_dest(instr)?;
        for sel in swizzle.iter_mut().filter(|s| **s != SEL_MASK) {
            *sel += component;
            if *sel > 3 {
                return Err(ctx.malformed(format!("component {} of @{} out of range", sel, input.name)));
            }
        }
        ctx.emit(Instruction::Fetch(FetchInstruction {
            kind: FetchKind::EsgsRing,
            dest,
            dest_swizzle: swizzle,
            addr: Some(addr),
            offset: input.location * 16,
            resource_id: 0,
            resource_index: None,
        }));
        Ok(())
    }

    fn emit_vertex(&mut self, ctx: &mut EmitContext<'_>, outputs: &OutputMap, stream: u8) -> CompileResult<()> {
        let Some(&counter) = self.counters.get(&stream) else {
            return Err(ctx.malformed(format!("no vertex counter for stream {}", stream)));
        };
        for slot in outputs.slots() {
            let Some(value) = slot.value else { continue };
            ctx.emit(Instruction::MemWrite(MemWriteInstruction {
                kind: MemWriteKind::GsRing { stream },
                value,
                write_mask: slot.written,
                addr: Some(Chan::new(counter, 0)),
                offset: slot.ring_offset,
            }));
        }
        ctx.emit(Instruction::Cf(CfInstruction::EmitVertex { stream }));
        let size = ctx.literal_chan(self.ring_item_size);
        ctx.alu(
            AluOp::ADD_INT,
            Some(AluDest {
                value: counter,
                write_mask: 1,
            }),
            vec![AluSrc::scalar(Chan::new(counter, 0)), AluSrc::scalar(size)],
            AluModifiers::empty(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BindingTable;
    use crate::ir::{ProgramBuilder, Semantic, ShaderStage};
    use crate::shader::compile;

    fn per_vertex(b: &mut ProgramBuilder, var: VarId, vertex: u32) -> crate::ir::Src {
        b.instr(
            4,
            InstrKind::LoadPerVertexInput {
                var,
                vertex: Operand::Const(vertex),
                component: 0,
            },
        )
    }

    #[test]
    fn test_emit_vertex_writes_ring() {
        let mut b = ProgramBuilder::new(ShaderStage::Geometry);
        b.set_geometry(3, 3);
        let input = b.input("p", 4, Semantic::Position, 2);
        let pos = b.output("pos", 4, Semantic::Position, 0);
        let col = b.output("col", 4, Semantic::Generic(0), 1);
        for v in 0..3 {
            let p = per_vertex(&mut b, input, v);
            b.store_output(pos, p);
            b.store_output(col, p);
            b.instr_void(InstrKind::EmitVertex { stream: 0 });
        }
        b.instr_void(InstrKind::EndPrimitive { stream: 0 });
        let shader = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap();

        assert_eq!(shader.report.ring_item_size, Some(32));
        assert!(shader.report.exports.is_empty());
        let ops: Vec<&str> = shader.instructions.iter().map(|i| i.opcode()).collect();
        assert_eq!(&ops[..7], &["MOV", "ESGS", "MOV", "MOV", "RING", "RING", "EMIT_VERTEX"]);
        assert_eq!(ops.last(), Some(&"CUT_VERTEX"));

        let fetch_offsets: Vec<(u8, u32)> = shader
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Fetch(f) => Some((f.addr.unwrap().chan, f.offset)),
                _ => None,
            })
            .collect();
        assert_eq!(fetch_offsets, vec![(0, 32), (1, 32), (3, 32)]);

        let ring_offsets: Vec<u32> = shader
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::MemWrite(m) => Some(m.offset),
                _ => None,
            })
            .take(2)
            .collect();
        assert_eq!(ring_offsets, vec![0, 16]);
    }

    #[test]
    fn test_per_vertex_errors() {
        let mut b = ProgramBuilder::new(ShaderStage::Geometry);
        b.set_geometry(1, 1);
        let input = b.input("p", 4, Semantic::Generic(0), 0);
        per_vertex(&mut b, input, 1);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_malformed());

        let mut b = ProgramBuilder::new(ShaderStage::Geometry);
        let input = b.input("p", 4, Semantic::Generic(0), 0);
        b.load_input(input);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_stream_out_of_range() {
        let mut b = ProgramBuilder::new(ShaderStage::Geometry);
        b.instr_void(InstrKind::EmitVertex { stream: 4 });
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_malformed());
    }
}
