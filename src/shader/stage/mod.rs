// This module holds the per-stage policies of the shader processor. Vertex, fragment, compute
// and geometry shaders differ in which registers the hardware preloads before the shader
// starts (vertex and instance ids, barycentrics, thread and workgroup ids, ring offsets),
// how input variables are read (pinned attribute registers, interpolation, ring fetches),
// which output semantics they can write and where they go (position and parameter exports,
// pixel exports, the GSVS ring), and which instructions only make sense in that stage
// (discard, barriers, vertex emission). StagePolicy is a closed tagged variant over the four
// stages; the processor calls the same fixed hooks on every stage, in this order:
// do_process_inputs, do_process_outputs, allocate_reserved_registers, emit_stage_instruction
// for every instruction node, and do_finalize after register remapping.

//! Stage specializations of the shader processor.

pub mod compute;
pub mod fragment;
pub mod geometry;
pub mod vertex;

pub use compute::ComputeStage;
pub use fragment::FragmentStage;
pub use geometry::GeometryStage;
pub use vertex::VertexStage;

use crate::core::{CompileResult, DeviceCaps, ValueId};
use crate::emit::EmitContext;
use crate::ir::{Instr, Semantic, ShaderProgram, ShaderStage};
use crate::target::{Chan, ExportInstruction, Instruction};

use super::outputs::{OutputMap, OutputSlot};
use super::report::ExportRecord;
use super::scan::ScanInfo;
use super::CompileOptions;

/// Policy object of one shader stage.
#[derive(Debug)]
pub enum StagePolicy {
    Vertex(VertexStage),
    Fragment(FragmentStage),
    Compute(ComputeStage),
    Geometry(GeometryStage),
}

impl StagePolicy {
    pub fn for_stage(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => StagePolicy::Vertex(VertexStage::default()),
            ShaderStage::Fragment => StagePolicy::Fragment(FragmentStage::default()),
            ShaderStage::Compute => StagePolicy::Compute(ComputeStage::default()),
            ShaderStage::Geometry => StagePolicy::Geometry(GeometryStage::default()),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        match self {
            StagePolicy::Vertex(_) => ShaderStage::Vertex,
            StagePolicy::Fragment(_) => ShaderStage::Fragment,
            StagePolicy::Compute(_) => ShaderStage::Compute,
            StagePolicy::Geometry(_) => ShaderStage::Geometry,
        }
    }

    /// Check the input declarations and record how each input is read.
    pub fn do_process_inputs(&mut self, program: &ShaderProgram, caps: &DeviceCaps) -> CompileResult<()> {
        match self {
            StagePolicy::Vertex(s) => s.do_process_inputs(program),
            StagePolicy::Fragment(s) => s.do_process_inputs(program, caps),
            StagePolicy::Compute(s) => s.do_process_inputs(program),
            StagePolicy::Geometry(s) => s.do_process_inputs(program),
        }
    }

    /// Build the output map: one slot per export target.
    pub fn do_process_outputs(
        &mut self,
        program: &ShaderProgram,
        caps: &DeviceCaps,
        scan: &ScanInfo,
    ) -> CompileResult<OutputMap> {
        match self {
            StagePolicy::Vertex(_) => vertex::map_vertex_outputs(program, caps, false),
            StagePolicy::Fragment(s) => s.do_process_outputs(program, caps),
            StagePolicy::Compute(s) => s.do_process_outputs(program),
            StagePolicy::Geometry(s) => s.do_process_outputs(program, caps, scan),
        }
    }

    /// Pin the registers the hardware preloads for this stage.
    pub fn allocate_reserved_registers(&mut self, ctx: &mut EmitContext<'_>, scan: &ScanInfo) -> CompileResult<()> {
        match self {
            StagePolicy::Vertex(s) => s.allocate_reserved_registers(ctx)?,
            StagePolicy::Fragment(s) => s.allocate_reserved_registers(ctx, scan)?,
            StagePolicy::Compute(s) => s.allocate_reserved_registers(ctx)?,
            StagePolicy::Geometry(s) => s.allocate_reserved_registers(ctx, scan)?,
        }
        log::debug!("{} stage reserves {:?}", self.stage(), ctx.pool.reserved_registers());
        Ok(())
    }

    /// Emit a stage-specific instruction; `false` leaves `instr` to the
    /// generic emitters.
    pub fn emit_stage_instruction(
        &mut self,
        ctx: &mut EmitContext<'_>,
        outputs: &OutputMap,
        instr: &Instr,
    ) -> CompileResult<bool> {
        match self {
            StagePolicy::Vertex(s) => s.emit_stage_instruction(ctx, instr),
            StagePolicy::Fragment(s) => s.emit_stage_instruction(ctx, instr),
            StagePolicy::Compute(s) => s.emit_stage_instruction(ctx, instr),
            StagePolicy::Geometry(s) => s.emit_stage_instruction(ctx, outputs, instr),
        }
    }

    /// Append the output exports. Runs after register remapping.
    pub fn do_finalize(
        &mut self,
        ctx: &mut EmitContext<'_>,
        outputs: &OutputMap,
        options: &CompileOptions,
    ) -> CompileResult<Vec<ExportRecord>> {
        match self {
            StagePolicy::Vertex(_) => Ok(vertex::export_vertex_outputs(ctx, outputs, options)),
            StagePolicy::Fragment(s) => Ok(s.do_finalize(ctx, outputs, options)),
            StagePolicy::Compute(_) | StagePolicy::Geometry(_) => Ok(Vec::new()),
        }
    }

    pub fn ring_item_size(&self) -> Option<u32> {
        match self {
            StagePolicy::Geometry(s) => Some(s.ring_item_size()),
            _ => None,
        }
    }
}

/// Bind the destination of `instr` to channels of a preloaded register.
///
/// No code is emitted for SSA destinations. Pinned registers stay reserved
/// for the whole shader, so a later read inside a loop still sees the
/// preloaded value.
pub fn load_preloaded_value(ctx: &mut EmitContext<'_>, instr: &Instr, value: ValueId, chans: &[u8]) -> CompileResult<()> {
    log::trace!("{} reads preloaded {}", instr.kind.name(), value);
    let chans = chans.iter().map(|&c| Chan::new(value, c)).collect();
    ctx.bind_dest(instr, chans)
}

/// Append the export of `slot`.
pub fn emit_export_instruction(ctx: &mut EmitContext<'_>, slot: &OutputSlot, is_last: bool) -> ExportRecord {
    ctx.emit(Instruction::Export(ExportInstruction {
        kind: slot.kind,
        base: slot.base,
        value: slot.value,
        swizzle: slot.swizzle,
        is_last,
    }));
    ExportRecord {
        kind: slot.kind,
        base: slot.base,
        semantic: slot.semantic,
        spi_sid: slot.spi_sid,
    }
}

/// Export `slots` in order of their base, flagging the last one.
fn export_group(ctx: &mut EmitContext<'_>, mut slots: Vec<OutputSlot>) -> Vec<ExportRecord> {
    slots.sort_by_key(|s| s.base);
    let count = slots.len();
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| emit_export_instruction(ctx, slot, i + 1 == count))
        .collect()
}

/// Written slots of one export kind.
fn written_slots(outputs: &OutputMap, kind: crate::target::ExportKind) -> Vec<OutputSlot> {
    outputs
        .slots()
        .iter()
        .filter(|s| s.kind == kind && s.written != 0)
        .cloned()
        .collect()
}

/// Semantic id linking a parameter export to the fragment input reading it.
pub fn evaluate_spi_sid(semantic: Semantic) -> u32 {
    let (name, index): (u32, u8) = match semantic {
        Semantic::Position | Semantic::PointSize | Semantic::SampleMask | Semantic::FragDepth => return 0,
        Semantic::Generic(n) => return 9 + n as u32 + 1,
        Semantic::TexCoord(n) => return n as u32 + 1,
        Semantic::None => (0, 0),
        Semantic::Color(n) | Semantic::FragData(n) => (1, n),
        Semantic::BackColor(n) => (2, n),
        Semantic::Fog => (3, 0),
        Semantic::PrimitiveId => (9, 0),
        Semantic::FragStencil => (12, 0),
        Semantic::ClipDistance(n) => (13, n),
        Semantic::PointCoord => (20, 0),
        Semantic::ViewportIndex => (21, 0),
        Semantic::Layer => (22, 0),
    };
    (0x80 | (name << 3) | (index as u32 & 7)) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_sid() {
        assert_eq!(evaluate_spi_sid(Semantic::Position), 0);
        assert_eq!(evaluate_spi_sid(Semantic::Generic(0)), 10);
        assert_eq!(evaluate_spi_sid(Semantic::TexCoord(2)), 3);
        assert_eq!(evaluate_spi_sid(Semantic::Color(1)), 0x80 + (1 << 3) + 1 + 1);
        assert_eq!(evaluate_spi_sid(Semantic::Fog), 0x80 + (3 << 3) + 1);
    }

    #[test]
    fn test_policy_per_stage() {
        for stage in [
            ShaderStage::Vertex,
            ShaderStage::Fragment,
            ShaderStage::Compute,
            ShaderStage::Geometry,
        ] {
            let policy = StagePolicy::for_stage(stage);
            assert_eq!(policy.stage(), stage);
            assert_eq!(policy.ring_item_size().is_some(), stage == ShaderStage::Geometry);
        }
    }
}
