// This module lowers every memory access that is not a texture sample. Reads from the default
// uniform block and from uniform buffers at compile-time offsets need no code: the result is
// bound to constant cache lines, and the ALU instructions that consume it read the constant
// file directly. Run-time offsets go through a vertex-cache fetch instead. Storage buffers and
// images are random access targets (RATs) on Evergreen and later; images occupy RAT ids
// 0..max_images and storage buffers follow them. Atomic counters are global data share (GDS)
// operations addressed by a hardware location assigned per (binding, offset) during the scan
// pass. Function-temporary arrays live in scratch memory, one vec4 slot per element.

//! Uniform, buffer, image, atomic counter and scratch array access.

use crate::core::{BindingSpace, CompileError, CompileResult, ValueId};
use crate::ir::{AtomicOp, CounterOp, Instr, InstrKind, Operand, Src, TexDim, VarId, VarMode, Variable};
use crate::target::{
    AluDest, AluModifiers, AluOp, AluSrc, Chan, FetchInstruction, FetchKind, GdsInstruction, GdsOp,
    Instruction, MemWriteInstruction, MemWriteKind, RatInstruction, RatOp, TexFlags,
    TexInstruction, TexOpcode, SEL_0,
};

use super::{EmitContext, EmitInstruction, BUFFER_INFO_BANK};

#[derive(Debug, Default)]
pub struct BufferEmitter;

impl BufferEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EmitInstruction for BufferEmitter {
    fn handles(&self, kind: &InstrKind) -> bool {
        matches!(
            kind,
            InstrKind::LoadUniform { .. }
                | InstrKind::LoadUbo { .. }
                | InstrKind::SsboLoad { .. }
                | InstrKind::SsboStore { .. }
                | InstrKind::SsboAtomic { .. }
                | InstrKind::ImageLoad { .. }
                | InstrKind::ImageStore { .. }
                | InstrKind::ImageAtomic { .. }
                | InstrKind::ImageSize { .. }
                | InstrKind::AtomicCounter { .. }
                | InstrKind::LoadArray { .. }
                | InstrKind::StoreArray { .. }
        )
    }

    fn emit(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<()> {
        match &instr.kind {
            InstrKind::LoadUniform { var, index } => emit_load_uniform(ctx, instr, *var, index),
            InstrKind::LoadUbo { buffer, offset } => emit_load_ubo(ctx, instr, buffer, offset),
            InstrKind::SsboLoad { binding, offset } => emit_ssbo_load(ctx, instr, *binding, offset),
            InstrKind::SsboStore {
                binding,
                offset,
                value,
                write_mask,
            } => emit_ssbo_store(ctx, *binding, offset, value, *write_mask),
            InstrKind::SsboAtomic {
                op,
                binding,
                offset,
                data,
                compare,
            } => {
                let rat_id = ssbo_rat(ctx, *binding)?;
                let addr = dword_address(ctx, offset)?;
                emit_rat_atomic(ctx, instr, *op, rat_id, addr, data, compare.as_ref())
            }
            InstrKind::ImageLoad {
                binding,
                dim,
                is_array,
                coord,
            } => {
                let rat_id = image_rat(ctx, *binding)?;
                let addr = image_address(ctx, *dim, *is_array, coord)?;
                let result = ctx.temp(4);
                ctx.emit(Instruction::Rat(RatInstruction {
                    op: RatOp::NopRtn,
                    rat_id,
                    dest: Some(result),
                    addr,
                    data: None,
                    write_mask: 0xf,
                }));
                let chans = (0..4).map(|c| Chan::new(result, c)).collect();
                ctx.bind_dest(instr, chans)
            }
            InstrKind::ImageStore {
                binding,
                dim,
                is_array,
                coord,
                value,
            } => {
                let rat_id = image_rat(ctx, *binding)?;
                let addr = image_address(ctx, *dim, *is_array, coord)?;
                let chans = ctx.resolve_lanes(value, 4)?;
                let data = ctx.gather(&chans, 0xf)?;
                ctx.emit(Instruction::Rat(RatInstruction {
                    op: RatOp::StoreTyped,
                    rat_id,
                    dest: None,
                    addr,
                    data: Some(data),
                    write_mask: 0xf,
                }));
                Ok(())
            }
            InstrKind::ImageAtomic {
                op,
                binding,
                dim,
                is_array,
                coord,
                data,
                compare,
            } => {
                let rat_id = image_rat(ctx, *binding)?;
                let addr = image_address(ctx, *dim, *is_array, coord)?;
                emit_rat_atomic(ctx, instr, *op, rat_id, addr, data, compare.as_ref())
            }
            InstrKind::ImageSize {
                binding,
                dim,
                is_array,
            } => emit_image_size(ctx, instr, *binding, *dim, *is_array),
            InstrKind::AtomicCounter {
                op,
                binding,
                offset,
                data,
            } => emit_atomic_counter(ctx, instr, *op, *binding, *offset, data),
            InstrKind::LoadArray { var, index } => emit_load_array(ctx, instr, *var, index),
            InstrKind::StoreArray {
                var,
                index,
                value,
                write_mask,
            } => emit_store_array(ctx, *var, index, value, *write_mask),
            other => Err(ctx.malformed(format!("{} routed to the buffer emitter", other.name()))),
        }
    }
}

fn variable<'a>(ctx: &EmitContext<'a>, var: VarId, mode: VarMode) -> CompileResult<&'a Variable> {
    let program = ctx.program;
    match program.variable(var) {
        Some(v) if v.mode == mode => Ok(v),
        Some(v) => Err(ctx.malformed(format!(
            "@{} is a {} variable, expected {}",
            v.name,
            v.mode.name(),
            mode.name()
        ))),
        None => Err(ctx.malformed(format!("undeclared variable #{}", var.0))),
    }
}

fn dest_components(ctx: &EmitContext<'_>, instr: &Instr) -> CompileResult<u8> {
    instr
        .dest
        .map(|d| d.components())
        .ok_or_else(|| ctx.malformed(format!("{} without destination", instr.kind.name())))
}

fn check_alignment(ctx: &EmitContext<'_>, offset: u32) -> CompileResult<()> {
    if offset % 4 != 0 {
        return Err(ctx.malformed(format!("byte offset {} is not dword aligned", offset)));
    }
    Ok(())
}

fn emit_load_uniform(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    var: VarId,
    index: &Operand,
) -> CompileResult<()> {
    let uniform = variable(ctx, var, VarMode::Uniform)?;
    match index {
        Operand::Const(i) => {
            if *i >= uniform.slots() {
                return Err(ctx.malformed(format!(
                    "index {} into @{} with {} slots",
                    i,
                    uniform.name,
                    uniform.slots()
                )));
            }
            let line = ctx.pool.constant(0, uniform.location + i);
            ctx.use_kcache(0);
            let chans = (0..uniform.components).map(|c| Chan::new(line, c)).collect();
            ctx.bind_dest(instr, chans)
        }
        Operand::Dynamic(src) => {
            // slot index to byte address
            let index = ctx.resolve_scalar(src)?;
            let addr = ctx.temp(1);
            let four = ctx.literal_chan(4);
            ctx.alu(
                AluOp::LSHL_INT,
                Some(AluDest {
                    value: addr,
                    write_mask: 1,
                }),
                vec![AluSrc::scalar(index), AluSrc::scalar(four)],
                AluModifiers::empty(),
            )?;
            ctx.usage.ubos.insert(0);
            let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
            ctx.emit(Instruction::Fetch(FetchInstruction {
                kind: FetchKind::Ubo,
                dest,
                dest_swizzle,
                addr: Some(Chan::new(addr, 0)),
                offset: uniform.location * 16,
                resource_id: 0,
                resource_index: None,
            }));
            Ok(())
        }
    }
}

fn emit_load_ubo(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    buffer: &Operand,
    offset: &Operand,
) -> CompileResult<()> {
    let buffer = match buffer {
        Operand::Const(b) => *b,
        Operand::Dynamic(index) => {
            if !ctx.caps.chip.has_rat() {
                return Err(ctx.unsupported(format!(
                    "dynamically indexed uniform buffers on {}",
                    ctx.caps.chip
                )));
            }
            let index = ctx.resolve_scalar(index)?;
            // any bound buffer may be selected at run time
            let bound = ctx.bindings.indices(BindingSpace::UniformBuffer);
            if bound.is_empty() {
                return Err(CompileError::binding(
                    BindingSpace::UniformBuffer,
                    0,
                    "dynamically indexed uniform buffer with no buffers bound",
                ));
            }
            ctx.usage.ubos.extend(bound);
            let (addr, fixed) = match offset {
                Operand::Const(o) => {
                    check_alignment(ctx, *o)?;
                    (None, *o)
                }
                Operand::Dynamic(src) => (Some(ctx.resolve_scalar(src)?), 0),
            };
            let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
            ctx.emit(Instruction::Fetch(FetchInstruction {
                kind: FetchKind::Ubo,
                dest,
                dest_swizzle,
                addr,
                offset: fixed,
                resource_id: 0,
                resource_index: Some(index),
            }));
            return Ok(());
        }
    };

    ctx.bindings.lookup(BindingSpace::UniformBuffer, buffer)?;
    if buffer >= BUFFER_INFO_BANK as u32 {
        return Err(CompileError::binding(
            BindingSpace::UniformBuffer,
            buffer,
            format!("constant banks 0..{} are available", BUFFER_INFO_BANK),
        ));
    }

    match offset {
        Operand::Const(o) => {
            check_alignment(ctx, *o)?;
            let components = dest_components(ctx, instr)? as u32;
            let first = o / 4;
            let chans = (first..first + components)
                .map(|dword| Chan::new(ctx.pool.constant(buffer as u8, dword / 4), (dword % 4) as u8))
                .collect();
            ctx.use_kcache(buffer as u8);
            ctx.bind_dest(instr, chans)
        }
        Operand::Dynamic(src) => {
            let addr = ctx.resolve_scalar(src)?;
            ctx.usage.ubos.insert(buffer);
            let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
            ctx.emit(Instruction::Fetch(FetchInstruction {
                kind: FetchKind::Ubo,
                dest,
                dest_swizzle,
                addr: Some(addr),
                offset: 0,
                resource_id: buffer,
                resource_index: None,
            }));
            Ok(())
        }
    }
}

/// RAT id of a storage buffer binding.
fn ssbo_rat(ctx: &mut EmitContext<'_>, binding: u32) -> CompileResult<u32> {
    if !ctx.caps.chip.has_rat() {
        return Err(ctx.unsupported(format!("storage buffers on {}", ctx.caps.chip)));
    }
    ctx.bindings.lookup(BindingSpace::StorageBuffer, binding)?;
    let rat_id = ctx.caps.max_images + binding;
    if rat_id >= ctx.caps.max_rats {
        return Err(CompileError::binding(
            BindingSpace::StorageBuffer,
            binding,
            format!("RAT id {} exceeds the {} available", rat_id, ctx.caps.max_rats),
        ));
    }
    ctx.usage.ssbos.insert(binding);
    ctx.usage.rat_ids.insert(rat_id);
    Ok(rat_id)
}

/// RAT id of an image binding.
fn image_rat(ctx: &mut EmitContext<'_>, binding: u32) -> CompileResult<u32> {
    if !ctx.caps.chip.has_rat() {
        return Err(ctx.unsupported(format!("images on {}", ctx.caps.chip)));
    }
    ctx.bindings.lookup(BindingSpace::Image, binding)?;
    if binding >= ctx.caps.max_images {
        return Err(CompileError::binding(
            BindingSpace::Image,
            binding,
            format!("device has {} image slots", ctx.caps.max_images),
        ));
    }
    ctx.usage.images.insert(binding);
    ctx.usage.rat_ids.insert(binding);
    Ok(binding)
}

/// Register holding the dword index addressed by a byte offset.
fn dword_address(ctx: &mut EmitContext<'_>, offset: &Operand) -> CompileResult<ValueId> {
    match offset {
        Operand::Const(o) => {
            check_alignment(ctx, *o)?;
            let index = ctx.literal_chan(o / 4);
            ctx.gather(&[index], 1)
        }
        Operand::Dynamic(src) => {
            let bytes = ctx.resolve_scalar(src)?;
            let two = ctx.literal_chan(2);
            let addr = ctx.temp(1);
            ctx.alu(
                AluOp::LSHR_INT,
                Some(AluDest {
                    value: addr,
                    write_mask: 1,
                }),
                vec![AluSrc::scalar(bytes), AluSrc::scalar(two)],
                AluModifiers::empty(),
            )?;
            Ok(addr)
        }
    }
}

fn image_address(ctx: &mut EmitContext<'_>, dim: TexDim, is_array: bool, coord: &Src) -> CompileResult<ValueId> {
    let lanes = (dim.coord_components() + is_array as u8) as usize;
    let chans = ctx.resolve_lanes(coord, lanes)?;
    ctx.gather(&chans, (1u8 << lanes) - 1)
}

fn emit_ssbo_load(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    binding: u32,
    offset: &Operand,
) -> CompileResult<()> {
    let rat_id = ssbo_rat(ctx, binding)?;
    let (addr, fixed) = match offset {
        Operand::Const(o) => {
            check_alignment(ctx, *o)?;
            (None, *o)
        }
        Operand::Dynamic(src) => (Some(ctx.resolve_scalar(src)?), 0),
    };
    let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
    ctx.emit(Instruction::Fetch(FetchInstruction {
        kind: FetchKind::Ssbo,
        dest,
        dest_swizzle,
        addr,
        offset: fixed,
        resource_id: rat_id,
        resource_index: None,
    }));
    Ok(())
}

fn emit_ssbo_store(
    ctx: &mut EmitContext<'_>,
    binding: u32,
    offset: &Operand,
    value: &Src,
    write_mask: u8,
) -> CompileResult<()> {
    if write_mask == 0 || write_mask > 0xf {
        return Err(ctx.malformed(format!("store write mask {:#x}", write_mask)));
    }
    let rat_id = ssbo_rat(ctx, binding)?;
    let addr = dword_address(ctx, offset)?;
    let chans = ctx.resolve_lanes(value, write_mask.count_ones() as usize)?;
    let data = ctx.gather(&chans, write_mask)?;
    ctx.emit(Instruction::Rat(RatInstruction {
        op: RatOp::StoreTyped,
        rat_id,
        dest: None,
        addr,
        data: Some(data),
        write_mask,
    }));
    Ok(())
}

fn rat_atomic_op(op: AtomicOp) -> RatOp {
    match op {
        AtomicOp::Add => RatOp::AddRtn,
        AtomicOp::Imin => RatOp::MinIntRtn,
        AtomicOp::Umin => RatOp::MinUintRtn,
        AtomicOp::Imax => RatOp::MaxIntRtn,
        AtomicOp::Umax => RatOp::MaxUintRtn,
        AtomicOp::And => RatOp::AndRtn,
        AtomicOp::Or => RatOp::OrRtn,
        AtomicOp::Xor => RatOp::XorRtn,
        AtomicOp::Exchange => RatOp::XchgRtn,
        AtomicOp::CompSwap => RatOp::CmpxchgIntRtn,
    }
}

/// Atomic on a RAT; the previous memory value is returned in x.
fn emit_rat_atomic(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    op: AtomicOp,
    rat_id: u32,
    addr: ValueId,
    data: &Src,
    compare: Option<&Src>,
) -> CompileResult<()> {
    let mut chans = vec![ctx.resolve_scalar(data)?];
    match (op, compare) {
        (AtomicOp::CompSwap, Some(compare)) => chans.push(ctx.resolve_scalar(compare)?),
        (AtomicOp::CompSwap, None) => return Err(ctx.malformed("comp_swap without compare value")),
        (_, Some(_)) => {
            return Err(ctx.malformed(format!("atomic {} takes no compare value", op.name())));
        }
        (_, None) => {}
    }
    let data = ctx.gather(&chans, (1u8 << chans.len()) - 1)?;
    let result = ctx.temp(1);
    ctx.emit(Instruction::Rat(RatInstruction {
        op: rat_atomic_op(op),
        rat_id,
        dest: Some(result),
        addr,
        data: Some(data),
        write_mask: 1,
    }));
    if instr.dest.is_some() {
        ctx.bind_dest(instr, vec![Chan::new(result, 0)])?;
    }
    Ok(())
}

fn emit_image_size(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    binding: u32,
    dim: TexDim,
    is_array: bool,
) -> CompileResult<()> {
    image_rat(ctx, binding)?;
    let dest = ctx.vector_dest(instr)?;
    let mut flags = TexFlags::empty();
    if is_array {
        flags |= TexFlags::ARRAY;
    }
    // image resources are placed after the sampler views
    ctx.emit(Instruction::Tex(TexInstruction {
        op: TexOpcode::GET_TEXTURE_RESINFO,
        dest: Some(dest),
        src: dest.0,
        src_swizzle: [SEL_0; 4],
        resource_id: ctx.caps.max_textures + binding,
        sampler_id: 0,
        dim,
        offsets: [0; 3],
        flags,
        gather_comp: 0,
    }));
    Ok(())
}

fn gds_op(op: CounterOp) -> GdsOp {
    match op {
        CounterOp::Inc => GdsOp::IncRet,
        CounterOp::PostDec => GdsOp::DecRet,
        CounterOp::Read => GdsOp::ReadRet,
        CounterOp::Add => GdsOp::AddRet,
        CounterOp::Min => GdsOp::MinUintRet,
        CounterOp::Max => GdsOp::MaxUintRet,
        CounterOp::And => GdsOp::AndRet,
        CounterOp::Or => GdsOp::OrRet,
        CounterOp::Xor => GdsOp::XorRet,
        CounterOp::Exchange => GdsOp::XchgRet,
        CounterOp::CompSwap => GdsOp::CmpxchgRet,
    }
}

fn emit_atomic_counter(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    op: CounterOp,
    binding: u32,
    offset: u32,
    data: &[Src],
) -> CompileResult<()> {
    if !ctx.caps.chip.has_rat() {
        return Err(ctx.unsupported(format!("atomic counters on {}", ctx.caps.chip)));
    }
    ctx.bindings.lookup(BindingSpace::AtomicCounter, binding)?;
    if data.len() != op.num_data() {
        return Err(ctx.malformed(format!(
            "atomic counter {} takes {} operands, got {}",
            op.name(),
            op.num_data(),
            data.len()
        )));
    }
    let base = ctx.usage.atomic_location(binding, offset);
    let src = if data.is_empty() {
        None
    } else {
        let chans = data
            .iter()
            .map(|s| ctx.resolve_scalar(s))
            .collect::<CompileResult<Vec<Chan>>>()?;
        Some(ctx.gather(&chans, (1u8 << chans.len()) - 1)?)
    };
    let result = ctx.temp(1);
    ctx.emit(Instruction::Gds(GdsInstruction {
        op: gds_op(op),
        dest: Chan::new(result, 0),
        src,
        base,
    }));
    if instr.dest.is_some() {
        ctx.bind_dest(instr, vec![Chan::new(result, 0)])?;
    }
    Ok(())
}

/// Scratch slot address of an array element: fixed slot or run-time index
/// relative to the array base.
fn array_address(
    ctx: &mut EmitContext<'_>,
    var: VarId,
    index: &Operand,
) -> CompileResult<(Option<Chan>, u32)> {
    let array = variable(ctx, var, VarMode::Array)?;
    let Some(&base) = ctx.usage.scratch_bases.get(&var) else {
        return Err(ctx.malformed(format!("array @{} has no scratch slots", array.name)));
    };
    match index {
        Operand::Const(i) if *i >= array.slots() => Err(ctx.malformed(format!(
            "index {} into @{} with {} elements",
            i,
            array.name,
            array.slots()
        ))),
        Operand::Const(i) => Ok((None, base + i)),
        Operand::Dynamic(src) => Ok((Some(ctx.resolve_scalar(src)?), base)),
    }
}

fn emit_load_array(ctx: &mut EmitContext<'_>, instr: &Instr, var: VarId, index: &Operand) -> CompileResult<()> {
    let (addr, offset) = array_address(ctx, var, index)?;
    let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
    ctx.emit(Instruction::Fetch(FetchInstruction {
        kind: FetchKind::Scratch,
        dest,
        dest_swizzle,
        addr,
        offset,
        resource_id: 0,
        resource_index: None,
    }));
    Ok(())
}

fn emit_store_array(
    ctx: &mut EmitContext<'_>,
    var: VarId,
    index: &Operand,
    value: &Src,
    write_mask: u8,
) -> CompileResult<()> {
    if write_mask == 0 || write_mask > 0xf {
        return Err(ctx.malformed(format!("store write mask {:#x}", write_mask)));
    }
    let (addr, offset) = array_address(ctx, var, index)?;
    let chans = ctx.resolve_lanes(value, write_mask.count_ones() as usize)?;
    let value = ctx.gather(&chans, write_mask)?;
    ctx.emit(Instruction::MemWrite(MemWriteInstruction {
        kind: MemWriteKind::Scratch,
        value,
        write_mask,
        addr,
        offset,
    }));
    Ok(())
}
