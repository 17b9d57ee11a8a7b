//! ALU instruction selection.
//!
//! Most IR operations map to a single target opcode. The exceptions are
//! spelled out where they are lowered: comparisons and selects reorder their
//! operands, `iabs` and the trigonometric functions expand to short
//! sequences, screen-space derivatives go through the texture unit, and a
//! handful of operations have no mapping at all.

use crate::core::{CompileResult, ValueId};
use crate::ir::{Instr, InstrKind, IrAluOp, Src};
use crate::target::{
    AluDest, AluModifiers, AluOp, AluSrc, Chan, Instruction, TexFlags, TexInstruction, TexOpcode,
    SEL_0,
};

use super::{EmitContext, EmitInstruction};

/// Emitter for arithmetic, logic, conversion and constant loads.
#[derive(Debug, Default)]
pub struct AluEmitter;

impl AluEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EmitInstruction for AluEmitter {
    fn handles(&self, kind: &InstrKind) -> bool {
        matches!(kind, InstrKind::Alu { .. } | InstrKind::LoadConst { .. })
    }

    fn emit(&mut self, ctx: &mut EmitContext<'_>, instr: &Instr) -> CompileResult<()> {
        match &instr.kind {
            InstrKind::LoadConst { values } => emit_load_literal(ctx, instr, values),
            InstrKind::Alu { op, srcs, saturate } => emit_alu_op(ctx, instr, *op, srcs, *saturate),
            other => Err(ctx.malformed(format!("{} routed to the ALU emitter", other.name()))),
        }
    }
}

/// Constants become literal operands; no code is emitted for SSA results.
fn emit_load_literal(ctx: &mut EmitContext<'_>, instr: &Instr, values: &[u32]) -> CompileResult<()> {
    if values.is_empty() || values.len() > 4 {
        return Err(ctx.malformed(format!("constant with {} components", values.len())));
    }
    let mut bits = [0u32; 4];
    bits[..values.len()].copy_from_slice(values);
    let literal = ctx.pool.literal(bits, values.len() as u8);
    let chans = (0..values.len() as u8).map(|c| Chan::new(literal, c)).collect();
    ctx.bind_dest(instr, chans)
}

/// Resolve IR sources into ALU lanes and modifier flags.
///
/// Absolute value on the third source has no hardware encoding; such a
/// source is copied through a MOV carrying the modifier first.
fn operands(
    ctx: &mut EmitContext<'_>,
    srcs: &[Src],
    lanes: usize,
) -> CompileResult<(Vec<AluSrc>, AluModifiers)> {
    let mut out = Vec::with_capacity(srcs.len());
    let mut mods = AluModifiers::empty();
    for (slot, src) in srcs.iter().enumerate() {
        let mut chans = ctx.resolve_lanes(src, lanes)?;
        if src.abs {
            match AluModifiers::abs(slot) {
                Some(flag) => mods |= flag,
                None => {
                    let temp = ctx.temp(lanes as u8);
                    ctx.alu(
                        AluOp::MOV,
                        Some(full_dest(temp, lanes)),
                        vec![AluSrc::new(chans)],
                        AluModifiers::SRC0_ABS,
                    )?;
                    chans = lanes_of(temp, lanes);
                }
            }
        }
        if src.negate {
            mods |= AluModifiers::neg(slot);
        }
        out.push(AluSrc::new(chans));
    }
    Ok((out, mods))
}

fn full_dest(value: ValueId, lanes: usize) -> AluDest {
    AluDest {
        value,
        write_mask: (1u8 << lanes) - 1,
    }
}

fn lanes_of(value: ValueId, lanes: usize) -> Vec<Chan> {
    (0..lanes as u8).map(|c| Chan::new(value, c)).collect()
}

fn emit_alu_op(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    op: IrAluOp,
    srcs: &[Src],
    saturate: bool,
) -> CompileResult<()> {
    if srcs.len() != op.num_srcs() {
        return Err(ctx.malformed(format!(
            "{} takes {} sources, got {}",
            op.name(),
            op.num_srcs(),
            srcs.len()
        )));
    }
    if matches!(op, IrAluOp::Idiv | IrAluOp::Udiv | IrAluOp::Umod | IrAluOp::Fpow | IrAluOp::Fmod) {
        return Err(ctx.unsupported(op.name()));
    }
    if matches!(op, IrAluOp::Fddx | IrAluOp::Fddy) {
        return emit_derivative(ctx, instr, op, &srcs[0]);
    }

    let dest = ctx.dest_target(instr)?;
    let lanes = dest.write_mask.count_ones() as usize;
    let clamp = if saturate {
        AluModifiers::DST_CLAMP
    } else {
        AluModifiers::empty()
    };

    use IrAluOp::*;
    let (target, order): (AluOp, &[usize]) = match op {
        Vec2 | Vec3 | Vec4 => return emit_vector_constructor(ctx, dest, srcs, clamp),
        Fdot2 | Fdot3 | Fdot4 => return emit_dot(ctx, op, dest, srcs, clamp),
        Fsin | Fcos => return emit_trig(ctx, op, dest, &srcs[0], clamp),
        Iabs => return emit_iabs(ctx, dest, &srcs[0]),
        Fneg | Fabs | Fsat => {
            let (alu_srcs, mut mods) = operands(ctx, srcs, lanes)?;
            match op {
                Fneg => mods.toggle(AluModifiers::SRC0_NEG),
                Fabs => {
                    mods.remove(AluModifiers::SRC0_NEG);
                    mods.insert(AluModifiers::SRC0_ABS);
                }
                _ => mods.insert(AluModifiers::DST_CLAMP),
            }
            return ctx.alu(AluOp::MOV, Some(dest), alu_srcs, mods | clamp);
        }
        Fsub => {
            let (alu_srcs, mut mods) = operands(ctx, srcs, lanes)?;
            mods.toggle(AluModifiers::SRC1_NEG);
            return ctx.alu(AluOp::ADD, Some(dest), alu_srcs, mods | clamp);
        }
        Ineg => {
            let zero = ctx.literal_chan(0);
            let (mut alu_srcs, mods) = operands(ctx, srcs, lanes)?;
            alu_srcs.insert(0, AluSrc::new(vec![zero; lanes]));
            return ctx.alu(AluOp::SUB_INT, Some(dest), alu_srcs, mods.moved_src(0, 1));
        }
        B2f => {
            let one = ctx.literal_chan(1.0f32.to_bits());
            let (mut alu_srcs, mods) = operands(ctx, srcs, lanes)?;
            alu_srcs.push(AluSrc::new(vec![one; lanes]));
            return ctx.alu(AluOp::AND_INT, Some(dest), alu_srcs, mods);
        }

        Mov => (AluOp::MOV, &[0]),
        Fadd => (AluOp::ADD, &[0, 1]),
        Fmul => (AluOp::MUL_IEEE, &[0, 1]),
        Ffma => (AluOp::MULADD_IEEE, &[0, 1, 2]),
        Fmin => (AluOp::MIN, &[0, 1]),
        Fmax => (AluOp::MAX, &[0, 1]),
        Ffloor => (AluOp::FLOOR, &[0]),
        Fceil => (AluOp::CEIL, &[0]),
        Ftrunc => (AluOp::TRUNC, &[0]),
        FroundEven => (AluOp::RNDNE, &[0]),
        Ffract => (AluOp::FRACT, &[0]),
        Frcp => (AluOp::RECIP_IEEE, &[0]),
        Frsq => (AluOp::RECIPSQRT_IEEE, &[0]),
        Fsqrt => (AluOp::SQRT_IEEE, &[0]),
        Fexp2 => (AluOp::EXP_IEEE, &[0]),
        Flog2 => (AluOp::LOG_IEEE, &[0]),
        // a < b is evaluated as b > a
        Flt => (AluOp::SETGT_DX10, &[1, 0]),
        Fge => (AluOp::SETGE_DX10, &[0, 1]),
        Feq => (AluOp::SETE_DX10, &[0, 1]),
        Fne => (AluOp::SETNE_DX10, &[0, 1]),
        Ilt => (AluOp::SETGT_INT, &[1, 0]),
        Ige => (AluOp::SETGE_INT, &[0, 1]),
        Ieq => (AluOp::SETE_INT, &[0, 1]),
        Ine => (AluOp::SETNE_INT, &[0, 1]),
        Ult => (AluOp::SETGT_UINT, &[1, 0]),
        Uge => (AluOp::SETGE_UINT, &[0, 1]),
        // CNDE picks src1 when src0 is zero
        Fcsel => (AluOp::CNDE, &[0, 2, 1]),
        Bcsel => (AluOp::CNDE_INT, &[0, 2, 1]),
        Iadd => (AluOp::ADD_INT, &[0, 1]),
        Isub => (AluOp::SUB_INT, &[0, 1]),
        Imul => (AluOp::MULLO_INT, &[0, 1]),
        Imin => (AluOp::MIN_INT, &[0, 1]),
        Imax => (AluOp::MAX_INT, &[0, 1]),
        Umin => (AluOp::MIN_UINT, &[0, 1]),
        Umax => (AluOp::MAX_UINT, &[0, 1]),
        Ishl => (AluOp::LSHL_INT, &[0, 1]),
        Ishr => (AluOp::ASHR_INT, &[0, 1]),
        Ushr => (AluOp::LSHR_INT, &[0, 1]),
        Iand => (AluOp::AND_INT, &[0, 1]),
        Ior => (AluOp::OR_INT, &[0, 1]),
        Ixor => (AluOp::XOR_INT, &[0, 1]),
        Inot => (AluOp::NOT_INT, &[0]),
        F2i => (AluOp::FLT_TO_INT, &[0]),
        F2u => (AluOp::FLT_TO_UINT, &[0]),
        I2f => (AluOp::INT_TO_FLT, &[0]),
        U2f => (AluOp::UINT_TO_FLT, &[0]),
        Idiv | Udiv | Umod | Fpow | Fmod | Fddx | Fddy => return Err(ctx.unsupported(op.name())),
    };

    let ordered: Vec<Src> = order.iter().map(|&i| srcs[i]).collect();
    let (alu_srcs, mods) = operands(ctx, &ordered, lanes)?;
    ctx.alu(target, Some(dest), alu_srcs, mods | clamp)
}

fn emit_vector_constructor(
    ctx: &mut EmitContext<'_>,
    dest: AluDest,
    srcs: &[Src],
    clamp: AluModifiers,
) -> CompileResult<()> {
    let lanes = dest.write_mask.count_ones() as usize;
    if lanes != srcs.len() {
        return Err(ctx.malformed(format!(
            "vec{} written to {} channels",
            srcs.len(),
            lanes
        )));
    }
    let chans = srcs
        .iter()
        .map(|s| ctx.resolve_scalar(s))
        .collect::<CompileResult<Vec<Chan>>>()?;
    if srcs.iter().all(|s| !s.negate && !s.abs) {
        return ctx.alu(AluOp::MOV, Some(dest), vec![AluSrc::new(chans)], clamp);
    }

    // Per-lane modifiers need one MOV per channel.
    let channels = (0..4u8).filter(|c| dest.write_mask & (1 << c) != 0);
    for ((chan, src), channel) in chans.into_iter().zip(srcs).zip(channels) {
        let mut mods = clamp;
        if src.negate {
            mods |= AluModifiers::SRC0_NEG;
        }
        if src.abs {
            mods |= AluModifiers::SRC0_ABS;
        }
        ctx.alu(
            AluOp::MOV,
            Some(AluDest {
                value: dest.value,
                write_mask: 1 << channel,
            }),
            vec![AluSrc::scalar(chan)],
            mods,
        )?;
    }
    Ok(())
}

fn emit_dot(
    ctx: &mut EmitContext<'_>,
    op: IrAluOp,
    dest: AluDest,
    srcs: &[Src],
    clamp: AluModifiers,
) -> CompileResult<()> {
    if dest.write_mask.count_ones() != 1 {
        return Err(ctx.malformed(format!("{} must write a single channel", op.name())));
    }
    let width = match op {
        IrAluOp::Fdot2 => 2,
        IrAluOp::Fdot3 => 3,
        _ => 4,
    };
    let (mut alu_srcs, mods) = operands(ctx, srcs, width)?;
    let zero = ctx.literal_chan(0);
    for src in &mut alu_srcs {
        src.chans.resize(4, zero);
    }
    ctx.alu(AluOp::DOT4_IEEE, Some(dest), alu_srcs, mods | clamp)
}

/// sin/cos only accept arguments in [-pi, pi]; the argument is first
/// reduced to one period.
fn emit_trig(
    ctx: &mut EmitContext<'_>,
    op: IrAluOp,
    dest: AluDest,
    src: &Src,
    clamp: AluModifiers,
) -> CompileResult<()> {
    let lanes = dest.write_mask.count_ones() as usize;
    let (alu_srcs, mods) = operands(ctx, std::slice::from_ref(src), lanes)?;
    let temp = ctx.temp(lanes as u8);
    let tmp_dest = full_dest(temp, lanes);
    let tmp_src = || AluSrc::new(lanes_of(temp, lanes));

    let inv_two_pi = ctx.literal_f32(0.159_154_94);
    let half = ctx.literal_f32(0.5);
    let mut srcs = alu_srcs;
    srcs.push(AluSrc::new(vec![inv_two_pi; lanes]));
    srcs.push(AluSrc::new(vec![half; lanes]));
    ctx.alu(AluOp::MULADD_IEEE, Some(tmp_dest), srcs, mods)?;
    ctx.alu(AluOp::FRACT, Some(tmp_dest), vec![tmp_src()], AluModifiers::empty())?;

    let two_pi = ctx.literal_f32(6.283_185_3);
    let minus_pi = ctx.literal_f32(-3.141_592_7);
    ctx.alu(
        AluOp::MULADD_IEEE,
        Some(tmp_dest),
        vec![
            tmp_src(),
            AluSrc::new(vec![two_pi; lanes]),
            AluSrc::new(vec![minus_pi; lanes]),
        ],
        AluModifiers::empty(),
    )?;

    let target = if op == IrAluOp::Fsin { AluOp::SIN } else { AluOp::COS };
    ctx.alu(target, Some(dest), vec![tmp_src()], clamp)
}

/// |x| = max(x, 0 - x)
fn emit_iabs(ctx: &mut EmitContext<'_>, dest: AluDest, src: &Src) -> CompileResult<()> {
    let lanes = dest.write_mask.count_ones() as usize;
    let chans = ctx.resolve_lanes(src, lanes)?;
    let zero = ctx.literal_chan(0);
    let temp = ctx.temp(lanes as u8);
    ctx.alu(
        AluOp::SUB_INT,
        Some(full_dest(temp, lanes)),
        vec![AluSrc::new(vec![zero; lanes]), AluSrc::new(chans.clone())],
        AluModifiers::empty(),
    )?;
    ctx.alu(
        AluOp::MAX_INT,
        Some(dest),
        vec![AluSrc::new(chans), AluSrc::new(lanes_of(temp, lanes))],
        AluModifiers::empty(),
    )
}

/// Screen-space derivatives are read back from the texture unit.
fn emit_derivative(
    ctx: &mut EmitContext<'_>,
    instr: &Instr,
    op: IrAluOp,
    src: &Src,
) -> CompileResult<()> {
    if ctx.stage != crate::ir::ShaderStage::Fragment {
        return Err(ctx.unsupported(op.name()));
    }
    let (dest, dest_swizzle) = ctx.vector_dest(instr)?;
    let lanes = dest_swizzle.iter().filter(|&&s| s < 4).count();
    let (alu_srcs, mods) = operands(ctx, std::slice::from_ref(src), lanes)?;
    let chans = if mods.is_empty() {
        alu_srcs[0].chans.clone()
    } else {
        let temp = ctx.temp(lanes as u8);
        ctx.alu(AluOp::MOV, Some(full_dest(temp, lanes)), alu_srcs, mods)?;
        lanes_of(temp, lanes)
    };
    let (value, swz) = ctx.ensure_register(&chans)?;
    let mut src_swizzle = [SEL_0; 4];
    src_swizzle[..swz.len()].copy_from_slice(&swz);

    let opcode = if op == IrAluOp::Fddx {
        TexOpcode::GET_GRADIENTS_H
    } else {
        TexOpcode::GET_GRADIENTS_V
    };
    ctx.emit(Instruction::Tex(TexInstruction {
        op: opcode,
        dest: Some((dest, dest_swizzle)),
        src: value,
        src_swizzle,
        resource_id: 0,
        sampler_id: 0,
        dim: crate::ir::TexDim::D2,
        offsets: [0; 3],
        flags: TexFlags::empty(),
        gather_comp: 0,
    }));
    Ok(())
}
