//! Texture instruction selection.
//!
//! Texture instructions read one source register through a swizzle: the
//! coordinates occupy the low lanes, the array layer follows them, and the
//! comparator, LOD, bias or sample index go to the lanes left over. Unused
//! lanes select the constant 0. Cube maps are projected onto a face with a
//! short ALU prologue first.

use crate::core::{BindingSpace, CompileError, CompileResult, ValueId};
use crate::ir::{Instr, InstrKind, TexDim, TexNode, TexOp};
use crate::target::{
    AluDest, AluModifiers, AluOp, AluSrc, Chan, FetchInstruction, FetchKind, Instruction,
    TexFlags, TexInstruction, TexOpcode, SEL_0,
};

use super::{EmitContext, EmitInstruction};

#[derive(Debug, Default)]
pub struct TexEmitter;

impl TexEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EmitInstruction for TexEmitter {
    fn handles(&self, kind: &InstrKind) -> bool {
        matches!(kind, InstrKind::Tex(_))
    }

    fn emit(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<()> {
        let InstrKind::Tex(tex) = &instr.kind else {
            return Err(ctx.malformed(format!("{} routed to the texture emitter", instr.kind.name())));
        };
        check_binding(ctx, tex.binding)?;
        ctx.usage.textures.insert(tex.binding);

        if tex.dim == TexDim::Buffer {
            return emit_buffer_fetch(ctx, instr, tex);
        }
        match tex.op {
            TexOp::Txs => emit_size_query(ctx, instr, tex),
            TexOp::TextureSamples => emit_sample_count(ctx, instr, tex),
            TexOp::Txf | TexOp::TxfMs => emit_texel_fetch(ctx, instr, tex),
            TexOp::Tex | TexOp::Txb | TexOp::Txl | TexOp::Txd | TexOp::Tg4 => {
                emit_sample(ctx, instr, tex)
            }
        }
    }
}

fn check_binding(ctx: &EmitContext<'_>, binding: u32) -> CompileResult<()> {
    ctx.bindings.lookup(BindingSpace::Texture, binding)?;
    if binding >= ctx.caps.max_textures {
        return Err(CompileError::binding(
            BindingSpace::Texture,
            binding,
            format!("device has {} sampler slots", ctx.caps.max_textures),
        ));
    }
    Ok(())
}

/// Lanes of a texture source register under construction.
#[derive(Debug, Default)]
struct TexLanes {
    lanes: [Option<Chan>; 4],
}

impl TexLanes {
    fn set(&mut self, lane: usize, chan: Chan) {
        self.lanes[lane] = Some(chan);
    }

    fn is_free(&self, lane: usize) -> bool {
        self.lanes[lane].is_none()
    }

    /// Register holding the lanes and the selector of each lane.
    fn materialize(&self, ctx: &mut EmitContext<'_>) -> CompileResult<(ValueId, [u8; 4])> {
        let defined: Vec<(usize, Chan)> = self
            .lanes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|c| (i, c)))
            .collect();
        let Some(&(_, first)) = defined.first() else {
            return Err(ctx.malformed("texture instruction without source operands"));
        };

        let mut swizzle = [SEL_0; 4];
        if ctx.pool.is_register(first.value) && defined.iter().all(|(_, c)| c.value == first.value) {
            for &(lane, chan) in &defined {
                swizzle[lane] = chan.chan;
            }
            return Ok((first.value, swizzle));
        }

        let mask = defined.iter().fold(0u8, |m, &(lane, _)| m | 1 << lane);
        let chans: Vec<Chan> = defined.iter().map(|&(_, c)| c).collect();
        let value = ctx.gather(&chans, mask)?;
        for &(lane, _) in &defined {
            swizzle[lane] = lane as u8;
        }
        Ok((value, swizzle))
    }
}

fn base_flags(tex: &TexNode) -> TexFlags {
    let mut flags = TexFlags::empty();
    if tex.is_array {
        flags |= TexFlags::ARRAY;
    }
    if tex.is_shadow {
        flags |= TexFlags::SHADOW;
    }
    if tex.dim == TexDim::Rect {
        flags |= TexFlags::UNNORMALIZED;
    }
    flags
}

fn tex_instruction(
    op: TexOpcode,
    tex: &TexNode,
    dest: Option<(ValueId, [u8; 4])>,
    src: (ValueId, [u8; 4]),
) -> Instruction {
    Instruction::Tex(TexInstruction {
        op,
        dest,
        src: src.0,
        src_swizzle: src.1,
        resource_id: tex.binding,
        sampler_id: tex.binding,
        dim: tex.dim,
        offsets: tex.offset.unwrap_or([0; 3]),
        flags: base_flags(tex),
        gather_comp: tex.component,
    })
}

/// Coordinate channels including the array layer.
fn coordinates(ctx: &mut EmitContext<'_>, tex: &TexNode) -> CompileResult<Vec<Chan>> {
    let Some(coord) = &tex.coord else {
        return Err(ctx.malformed(format!("{} without coordinates", tex.op.name())));
    };
    let needed = (tex.dim.coord_components() + tex.is_array as u8) as usize;
    let chans = ctx.resolve(coord)?;
    if chans.len() < needed {
        return Err(ctx.malformed(format!(
            "{} {} texture needs {} coordinate components, got {}",
            tex.op.name(),
            tex.dim.name(),
            needed,
            chans.len()
        )));
    }
    Ok(chans[..needed].to_vec())
}

/// Project cube coordinates onto a face: the result holds the face
/// coordinates in x/y and the face index (plus 8 * layer for arrays) in z.
fn cube_prologue(ctx: &mut EmitContext<'_>, coords: &[Chan]) -> CompileResult<Vec<Chan>> {
    let (x, y, z) = (coords[0], coords[1], coords[2]);
    let tmp = ctx.temp(4);
    let t = |c: u8| Chan::new(tmp, c);

    ctx.alu(
        AluOp::CUBE,
        Some(AluDest {
            value: tmp,
            write_mask: 0xf,
        }),
        vec![AluSrc::new(vec![z, z, x, y]), AluSrc::new(vec![y, x, z, z])],
        AluModifiers::empty(),
    )?;
    ctx.alu(
        AluOp::RECIP_IEEE,
        Some(AluDest {
            value: tmp,
            write_mask: 0b0100,
        }),
        vec![AluSrc::scalar(t(2))],
        AluModifiers::SRC0_ABS,
    )?;
    let one_half = ctx.literal_f32(1.5);
    ctx.alu(
        AluOp::MULADD_IEEE,
        Some(AluDest {
            value: tmp,
            write_mask: 0b0011,
        }),
        vec![
            AluSrc::new(vec![t(0), t(1)]),
            AluSrc::new(vec![t(2), t(2)]),
            AluSrc::new(vec![one_half, one_half]),
        ],
        AluModifiers::empty(),
    )?;

    if let Some(&layer) = coords.get(3) {
        let eight = ctx.literal_f32(8.0);
        ctx.alu(
            AluOp::MULADD_IEEE,
            Some(AluDest {
                value: tmp,
                write_mask: 0b1000,
            }),
            vec![AluSrc::scalar(layer), AluSrc::scalar(eight), AluSrc::scalar(t(3))],
            AluModifiers::empty(),
        )?;
    }
    Ok(vec![t(1), t(0), t(3)])
}

fn emit_sample(ctx: &mut EmitContext<'_>, instr: &Instr, tex: &TexNode) -> CompileResult<()> {
    let mut coords = coordinates(ctx, tex)?;
    if tex.dim == TexDim::Cube {
        if tex.op == TexOp::Txd {
            return Err(ctx.unsupported("txd on cube textures"));
        }
        coords = cube_prologue(ctx, &coords)?;
    }
    let mut lanes = TexLanes::default();
    for (lane, chan) in coords.iter().enumerate() {
        lanes.set(lane, *chan);
    }

    if tex.is_shadow {
        let Some(comparator) = &tex.comparator else {
            return Err(ctx.malformed(format!("shadow {} without comparator", tex.op.name())));
        };
        let chan = ctx.resolve_scalar(comparator)?;
        lanes.set(3, chan);
    }

    let lod_operand = match tex.op {
        TexOp::Txl => Some(("lod", tex.lod)),
        TexOp::Txb => Some(("bias", tex.bias)),
        _ => None,
    };
    if let Some((what, operand)) = lod_operand {
        let Some(src) = operand else {
            return Err(ctx.malformed(format!("{} without {}", tex.op.name(), what)));
        };
        let chan = ctx.resolve_scalar(&src)?;
        // the comparator takes w; the level moves to z when that is free
        let lane = if lanes.is_free(3) {
            3
        } else if lanes.is_free(2) {
            2
        } else {
            return Err(ctx.unsupported(format!(
                "shadow {} with {} on {}{} textures",
                tex.op.name(),
                what,
                tex.dim.name(),
                if tex.is_array { " array" } else { "" }
            )));
        };
        lanes.set(lane, chan);
    }

    if tex.op == TexOp::Txd {
        emit_gradients(ctx, tex)?;
    }

    let opcode = match (tex.op, tex.is_shadow) {
        (TexOp::Tex, false) => TexOpcode::SAMPLE,
        (TexOp::Tex, true) => TexOpcode::SAMPLE_C,
        (TexOp::Txl, false) => TexOpcode::SAMPLE_L,
        (TexOp::Txl, true) => TexOpcode::SAMPLE_C_L,
        (TexOp::Txb, false) => TexOpcode::SAMPLE_LB,
        (TexOp::Txb, true) => TexOpcode::SAMPLE_C_LB,
        (TexOp::Txd, false) => TexOpcode::SAMPLE_G,
        (TexOp::Txd, true) => TexOpcode::SAMPLE_C_G,
        (TexOp::Tg4, false) => TexOpcode::GATHER4,
        (TexOp::Tg4, true) => TexOpcode::GATHER4_C,
        (op, _) => return Err(ctx.malformed(format!("{} is not a sampling operation", op.name()))),
    };

    let src = lanes.materialize(ctx)?;
    let dest = ctx.vector_dest(instr)?;
    ctx.emit(tex_instruction(opcode, tex, Some(dest), src));
    Ok(())
}

/// Load the explicit derivatives into the gradient registers of the unit.
fn emit_gradients(ctx: &mut EmitContext<'_>, tex: &TexNode) -> CompileResult<()> {
    let (Some(ddx), Some(ddy)) = (&tex.ddx, &tex.ddy) else {
        return Err(ctx.malformed("txd without both derivatives"));
    };
    let width = tex.dim.coord_components() as usize;
    for (src, opcode) in [(ddx, TexOpcode::SET_GRADIENTS_H), (ddy, TexOpcode::SET_GRADIENTS_V)] {
        let chans = ctx.resolve_lanes(src, width)?;
        let mut lanes = TexLanes::default();
        for (lane, chan) in chans.into_iter().enumerate() {
            lanes.set(lane, chan);
        }
        let src = lanes.materialize(ctx)?;
        ctx.emit(tex_instruction(opcode, tex, None, src));
    }
    Ok(())
}

fn emit_texel_fetch(ctx: &mut EmitContext<'_>, instr: &Instr, tex: &TexNode) -> CompileResult<()> {
    if tex.dim == TexDim::Cube {
        return Err(ctx.unsupported(format!("{} on cube textures", tex.op.name())));
    }
    let coords = coordinates(ctx, tex)?;
    let mut lanes = TexLanes::default();
    for (lane, chan) in coords.into_iter().enumerate() {
        lanes.set(lane, chan);
    }
    let extra = if tex.op == TexOp::TxfMs {
        let Some(index) = &tex.ms_index else {
            return Err(ctx.malformed("txf_ms without sample index"));
        };
        Some(index)
    } else {
        tex.lod.as_ref()
    };
    // a missing level reads the SEL_0 selector
    if let Some(src) = extra {
        let chan = ctx.resolve_scalar(src)?;
        lanes.set(3, chan);
    }
    let src = lanes.materialize(ctx)?;
    let dest = ctx.vector_dest(instr)?;
    ctx.emit(tex_instruction(TexOpcode::LD, tex, Some(dest), src));
    Ok(())
}

fn emit_size_query(ctx: &mut EmitContext<'_>, instr: &Instr, tex: &TexNode) -> CompileResult<()> {
    let dest = ctx.vector_dest(instr)?;
    let src = match &tex.lod {
        Some(lod) => {
            let chan = ctx.resolve_scalar(lod)?;
            let mut lanes = TexLanes::default();
            lanes.set(0, chan);
            lanes.materialize(ctx)?
        }
        None => (dest.0, [SEL_0; 4]),
    };
    ctx.emit(tex_instruction(TexOpcode::GET_TEXTURE_RESINFO, tex, Some(dest), src));
    Ok(())
}

fn emit_sample_count(ctx: &mut EmitContext<'_>, instr: &Instr, tex: &TexNode) -> CompileResult<()> {
    if tex.dim != TexDim::D2Ms {
        return Err(ctx.malformed(format!(
            "texture_samples on a {} texture",
            tex.dim.name()
        )));
    }
    let dest = ctx.vector_dest(instr)?;
    ctx.emit(tex_instruction(
        TexOpcode::GET_NUMBER_OF_SAMPLES,
        tex,
        Some(dest),
        (dest.0, [SEL_0; 4]),
    ));
    Ok(())
}

/// Buffer textures are read through the vertex cache.
fn emit_buffer_fetch(ctx: &mut EmitContext<'_>, instr: &Instr, tex: &TexNode) -> CompileResult<()> {
    if tex.op != TexOp::Txf {
        return Err(ctx.unsupported(format!("{} on buffer textures", tex.op.name())));
    }
    let Some(coord) = &tex.coord else {
        return Err(ctx.malformed("txf without coordinates"));
    };
    let index = ctx.resolve_scalar(coord)?;
    let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
    ctx.emit(Instruction::Fetch(FetchInstruction {
        kind: FetchKind::Buffer,
        dest,
        dest_swizzle,
        addr: Some(index),
        offset: 0,
        resource_id: tex.binding,
        resource_index: None,
    }));
    Ok(())
}
