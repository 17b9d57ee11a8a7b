// This module defines the instruction stream produced by the shader processor. Every
// instruction references operands by ValueId into the compilation's ValuePool; a Chan picks
// one channel of a value, which lets a single ALU source gather channels from registers,
// kcache lines and literals alike. The instruction families mirror the hardware clause
// types: ALU, TEX (texture sampling and gradient setup), FETCH (vertex-cache loads for
// indirect UBO reads, buffer textures, storage buffers, scratch and the ESGS ring), MEM
// (scratch and GSVS ring writes), RAT (typed stores and atomics on images and storage
// buffers), GDS (atomic counters), INTERP (fragment input interpolation), EXPORT and the
// control-flow markers. The Instruction enum implements ValueUses so the remap pass can
// compute live ranges over the finished stream, and renders through a display wrapper that
// resolves ValueIds against the pool: logical %N names before remapping, R<n> after.

//! Target instruction set.

use std::fmt;

use bitflags::bitflags;

use super::alu_op::{AluModifiers, AluOp};
use crate::core::{LoopMarker, ValueId, ValueKind, ValuePool, ValueUses};
use crate::ir::TexDim;

/// Swizzle selector for the constant 0.0.
pub const SEL_0: u8 = 4;
/// Swizzle selector for the constant 1.0.
pub const SEL_1: u8 = 5;
/// Swizzle selector for a masked channel.
pub const SEL_MASK: u8 = 7;

/// One channel of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chan {
    pub value: ValueId,
    pub chan: u8,
}

impl Chan {
    pub fn new(value: ValueId, chan: u8) -> Self {
        Self { value, chan }
    }
}

/// One ALU source: a channel per lane.
///
/// Lane `k` feeds the `k`-th written channel of the destination. Reduction
/// ops read all four lanes and write a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluSrc {
    pub chans: Vec<Chan>,
}

impl AluSrc {
    pub fn new(chans: Vec<Chan>) -> Self {
        Self { chans }
    }

    pub fn scalar(chan: Chan) -> Self {
        Self { chans: vec![chan] }
    }

    /// All lanes read channels of a single value.
    pub fn single_value(&self) -> Option<ValueId> {
        let first = self.chans.first()?.value;
        self.chans
            .iter()
            .all(|c| c.value == first)
            .then_some(first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluDest {
    pub value: ValueId,
    pub write_mask: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluInstruction {
    pub op: AluOp,
    pub dest: Option<AluDest>,
    pub srcs: Vec<AluSrc>,
    pub mods: AluModifiers,
}

impl AluInstruction {
    pub fn new(op: AluOp, dest: Option<AluDest>, srcs: Vec<AluSrc>) -> Self {
        Self {
            op,
            dest,
            srcs,
            mods: AluModifiers::empty(),
        }
    }

    pub fn with_mods(mut self, mods: AluModifiers) -> Self {
        self.mods |= mods;
        self
    }

    /// Distinct constant cache lines read by the instruction.
    pub fn constant_values(&self, pool: &ValuePool) -> Vec<ValueId> {
        let mut out: Vec<ValueId> = Vec::new();
        for chan in self.srcs.iter().flat_map(|s| s.chans.iter()) {
            if matches!(pool.kind(chan.value), Some(ValueKind::Constant { .. }))
                && !out.contains(&chan.value)
            {
                out.push(chan.value);
            }
        }
        out
    }
}

/// Texture unit opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TexOpcode {
    SAMPLE,
    SAMPLE_L,
    SAMPLE_LB,
    SAMPLE_G,
    SAMPLE_C,
    SAMPLE_C_L,
    SAMPLE_C_LB,
    SAMPLE_C_G,
    LD,
    GET_TEXTURE_RESINFO,
    GET_NUMBER_OF_SAMPLES,
    GATHER4,
    GATHER4_C,
    SET_GRADIENTS_H,
    SET_GRADIENTS_V,
    GET_GRADIENTS_H,
    GET_GRADIENTS_V,
}

impl TexOpcode {
    pub fn name(self) -> &'static str {
        use TexOpcode::*;
        match self {
            SAMPLE => "SAMPLE",
            SAMPLE_L => "SAMPLE_L",
            SAMPLE_LB => "SAMPLE_LB",
            SAMPLE_G => "SAMPLE_G",
            SAMPLE_C => "SAMPLE_C",
            SAMPLE_C_L => "SAMPLE_C_L",
            SAMPLE_C_LB => "SAMPLE_C_LB",
            SAMPLE_C_G => "SAMPLE_C_G",
            LD => "LD",
            GET_TEXTURE_RESINFO => "GET_TEXTURE_RESINFO",
            GET_NUMBER_OF_SAMPLES => "GET_NUMBER_OF_SAMPLES",
            GATHER4 => "GATHER4",
            GATHER4_C => "GATHER4_C",
            SET_GRADIENTS_H => "SET_GRADIENTS_H",
            SET_GRADIENTS_V => "SET_GRADIENTS_V",
            GET_GRADIENTS_H => "GET_GRADIENTS_H",
            GET_GRADIENTS_V => "GET_GRADIENTS_V",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TexFlags: u8 {
        /// Coordinates are in texels (rectangle textures).
        const UNNORMALIZED = 1 << 0;
        const ARRAY = 1 << 1;
        const SHADOW = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexInstruction {
    pub op: TexOpcode,
    /// Destination register and swizzle; gradient setup writes nothing.
    pub dest: Option<(ValueId, [u8; 4])>,
    pub src: ValueId,
    pub src_swizzle: [u8; 4],
    pub resource_id: u32,
    pub sampler_id: u32,
    pub dim: TexDim,
    pub offsets: [i8; 3],
    pub flags: TexFlags,
    /// Component selected by GATHER4.
    pub gather_comp: u8,
}

/// Vertex-cache fetch source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Ubo,
    Buffer,
    Ssbo,
    Scratch,
    EsgsRing,
}

impl FetchKind {
    pub fn name(self) -> &'static str {
        match self {
            FetchKind::Ubo => "UBO",
            FetchKind::Buffer => "BUFFER",
            FetchKind::Ssbo => "SSBO",
            FetchKind::Scratch => "SCRATCH",
            FetchKind::EsgsRing => "ESGS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchInstruction {
    pub kind: FetchKind,
    pub dest: ValueId,
    pub dest_swizzle: [u8; 4],
    /// Run-time address; `None` reads at `offset` alone.
    pub addr: Option<Chan>,
    /// Byte offset (vec4 slot index for scratch).
    pub offset: u32,
    pub resource_id: u32,
    /// Dynamically selected buffer, added to `resource_id`.
    pub resource_index: Option<Chan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemWriteKind {
    Scratch,
    GsRing { stream: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemWriteInstruction {
    pub kind: MemWriteKind,
    pub value: ValueId,
    pub write_mask: u8,
    pub addr: Option<Chan>,
    pub offset: u32,
}

/// Random access target operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatOp {
    NopRtn,
    StoreTyped,
    AddRtn,
    MinIntRtn,
    MinUintRtn,
    MaxIntRtn,
    MaxUintRtn,
    AndRtn,
    OrRtn,
    XorRtn,
    XchgRtn,
    CmpxchgIntRtn,
}

impl RatOp {
    pub fn name(self) -> &'static str {
        match self {
            RatOp::NopRtn => "NOP_RTN",
            RatOp::StoreTyped => "STORE_TYPED",
            RatOp::AddRtn => "ADD_RTN",
            RatOp::MinIntRtn => "MIN_INT_RTN",
            RatOp::MinUintRtn => "MIN_UINT_RTN",
            RatOp::MaxIntRtn => "MAX_INT_RTN",
            RatOp::MaxUintRtn => "MAX_UINT_RTN",
            RatOp::AndRtn => "AND_RTN",
            RatOp::OrRtn => "OR_RTN",
            RatOp::XorRtn => "XOR_RTN",
            RatOp::XchgRtn => "XCHG_RTN",
            RatOp::CmpxchgIntRtn => "CMPXCHG_INT_RTN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatInstruction {
    pub op: RatOp,
    pub rat_id: u32,
    /// Returned value for the `*_RTN` family.
    pub dest: Option<ValueId>,
    /// Address register: byte offset for buffers, texel coordinate for images.
    pub addr: ValueId,
    pub data: Option<ValueId>,
    pub write_mask: u8,
}

/// Global data share operations used for atomic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GdsOp {
    IncRet,
    DecRet,
    ReadRet,
    AddRet,
    MinUintRet,
    MaxUintRet,
    AndRet,
    OrRet,
    XorRet,
    XchgRet,
    CmpxchgRet,
}

impl GdsOp {
    pub fn name(self) -> &'static str {
        match self {
            GdsOp::IncRet => "INC_RET",
            GdsOp::DecRet => "DEC_RET",
            GdsOp::ReadRet => "READ_RET",
            GdsOp::AddRet => "ADD_RET",
            GdsOp::MinUintRet => "MIN_UINT_RET",
            GdsOp::MaxUintRet => "MAX_UINT_RET",
            GdsOp::AndRet => "AND_RET",
            GdsOp::OrRet => "OR_RET",
            GdsOp::XorRet => "XOR_RET",
            GdsOp::XchgRet => "XCHG_RET",
            GdsOp::CmpxchgRet => "CMPXCHG_RET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdsInstruction {
    pub op: GdsOp,
    pub dest: Chan,
    pub src: Option<ValueId>,
    /// Hardware counter location.
    pub base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpKind {
    Xy,
    Zw,
    LoadP0,
}

impl InterpKind {
    pub fn name(self) -> &'static str {
        match self {
            InterpKind::Xy => "INTERP_XY",
            InterpKind::Zw => "INTERP_ZW",
            InterpKind::LoadP0 => "INTERP_LOAD_P0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpInstruction {
    pub kind: InterpKind,
    pub dest: ValueId,
    pub write_mask: u8,
    /// Barycentric (i, j) pair; flat loads have none.
    pub bary: Option<(Chan, Chan)>,
    pub param: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Pixel,
    Pos,
    Param,
}

impl ExportKind {
    pub fn name(self) -> &'static str {
        match self {
            ExportKind::Pixel => "PIXEL",
            ExportKind::Pos => "POS",
            ExportKind::Param => "PARAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInstruction {
    pub kind: ExportKind,
    pub base: u32,
    /// Exported register; `None` exports constant selectors only.
    pub value: Option<ValueId>,
    pub swizzle: [u8; 4],
    /// Last export of its kind.
    pub is_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfInstruction {
    IfStart { id: u32, cond: Chan },
    ElseStart { id: u32 },
    IfEnd { id: u32 },
    LoopBegin { id: u32 },
    LoopEnd { id: u32 },
    LoopBreak { id: u32 },
    LoopContinue { id: u32 },
    EmitVertex { stream: u8 },
    CutVertex { stream: u8 },
}

impl CfInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            CfInstruction::IfStart { .. } => "IF_START",
            CfInstruction::ElseStart { .. } => "ELSE_START",
            CfInstruction::IfEnd { .. } => "IF_END",
            CfInstruction::LoopBegin { .. } => "LOOP_BEGIN",
            CfInstruction::LoopEnd { .. } => "LOOP_END",
            CfInstruction::LoopBreak { .. } => "LOOP_BREAK",
            CfInstruction::LoopContinue { .. } => "LOOP_CONTINUE",
            CfInstruction::EmitVertex { .. } => "EMIT_VERTEX",
            CfInstruction::CutVertex { .. } => "CUT_VERTEX",
        }
    }

    /// Change in block nesting caused by this marker, applied before (`-`)
    /// or after (`+`) the marker itself.
    fn depth_change(&self) -> (usize, usize) {
        match self {
            CfInstruction::IfStart { .. } | CfInstruction::LoopBegin { .. } => (0, 1),
            CfInstruction::ElseStart { .. } => (1, 1),
            CfInstruction::IfEnd { .. } | CfInstruction::LoopEnd { .. } => (1, 0),
            _ => (0, 0),
        }
    }
}

/// A target instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Alu(AluInstruction),
    Tex(TexInstruction),
    Fetch(FetchInstruction),
    MemWrite(MemWriteInstruction),
    Rat(RatInstruction),
    Gds(GdsInstruction),
    Interp(InterpInstruction),
    Export(ExportInstruction),
    Cf(CfInstruction),
}

impl Instruction {
    /// Clause category used by statistics.
    pub fn category(&self) -> &'static str {
        match self {
            Instruction::Alu(_) => "ALU",
            Instruction::Tex(_) => "TEX",
            Instruction::Fetch(_) => "FETCH",
            Instruction::MemWrite(_) => "MEM",
            Instruction::Rat(_) => "RAT",
            Instruction::Gds(_) => "GDS",
            Instruction::Interp(_) => "INTERP",
            Instruction::Export(_) => "EXPORT",
            Instruction::Cf(_) => "CF",
        }
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Alu(alu) => alu.op.name(),
            Instruction::Tex(tex) => tex.op.name(),
            Instruction::Fetch(fetch) => fetch.kind.name(),
            Instruction::MemWrite(mem) => match mem.kind {
                MemWriteKind::Scratch => "SCRATCH",
                MemWriteKind::GsRing { .. } => "RING",
            },
            Instruction::Rat(rat) => rat.op.name(),
            Instruction::Gds(gds) => gds.op.name(),
            Instruction::Interp(interp) => interp.kind.name(),
            Instruction::Export(_) => "EXPORT",
            Instruction::Cf(cf) => cf.name(),
        }
    }

    pub fn as_alu(&self) -> Option<&AluInstruction> {
        match self {
            Instruction::Alu(alu) => Some(alu),
            _ => None,
        }
    }

    pub fn as_cf(&self) -> Option<&CfInstruction> {
        match self {
            Instruction::Cf(cf) => Some(cf),
            _ => None,
        }
    }

    pub fn as_export(&self) -> Option<&ExportInstruction> {
        match self {
            Instruction::Export(export) => Some(export),
            _ => None,
        }
    }

    pub fn display<'a>(&'a self, pool: &'a ValuePool) -> InstructionDisplay<'a> {
        InstructionDisplay { instr: self, pool }
    }
}

impl ValueUses for Instruction {
    fn visit_values(&self, f: &mut dyn FnMut(ValueId)) {
        match self {
            Instruction::Alu(alu) => {
                if let Some(dest) = alu.dest {
                    f(dest.value);
                }
                for chan in alu.srcs.iter().flat_map(|s| s.chans.iter()) {
                    f(chan.value);
                }
            }
            Instruction::Tex(tex) => {
                if let Some((dest, _)) = tex.dest {
                    f(dest);
                }
                f(tex.src);
            }
            Instruction::Fetch(fetch) => {
                f(fetch.dest);
                for chan in fetch.addr.iter().chain(fetch.resource_index.iter()) {
                    f(chan.value);
                }
            }
            Instruction::MemWrite(mem) => {
                f(mem.value);
                if let Some(addr) = mem.addr {
                    f(addr.value);
                }
            }
            Instruction::Rat(rat) => {
                if let Some(dest) = rat.dest {
                    f(dest);
                }
                f(rat.addr);
                if let Some(data) = rat.data {
                    f(data);
                }
            }
            Instruction::Gds(gds) => {
                f(gds.dest.value);
                if let Some(src) = gds.src {
                    f(src);
                }
            }
            Instruction::Interp(interp) => {
                f(interp.dest);
                if let Some((i, j)) = interp.bary {
                    f(i.value);
                    f(j.value);
                }
            }
            Instruction::Export(export) => {
                if let Some(value) = export.value {
                    f(value);
                }
            }
            Instruction::Cf(CfInstruction::IfStart { cond, .. }) => f(cond.value),
            Instruction::Cf(_) => {}
        }
    }

    fn loop_marker(&self) -> Option<LoopMarker> {
        match self {
            Instruction::Cf(CfInstruction::LoopBegin { .. }) => Some(LoopMarker::Begin),
            Instruction::Cf(CfInstruction::LoopEnd { .. }) => Some(LoopMarker::End),
            _ => None,
        }
    }
}

/// Renders an instruction with operands resolved against a pool.
pub struct InstructionDisplay<'a> {
    instr: &'a Instruction,
    pool: &'a ValuePool,
}

fn mask_swizzle(write_mask: u8) -> [u8; 4] {
    let mut swz = [SEL_MASK; 4];
    for (i, s) in swz.iter_mut().enumerate() {
        if write_mask & (1 << i) != 0 {
            *s = i as u8;
        }
    }
    swz
}

fn written_chans(write_mask: u8) -> Vec<u8> {
    (0..4u8).filter(|i| write_mask & (1 << i) != 0).collect()
}

impl InstructionDisplay<'_> {
    fn alu_src(&self, src: &AluSrc) -> String {
        if let [chan] = src.chans.as_slice() {
            return self.pool.format_chan(chan.value, chan.chan);
        }
        match src.single_value() {
            Some(value) if !matches!(self.pool.kind(value), Some(ValueKind::Literal(_))) => {
                let swz: Vec<u8> = src.chans.iter().map(|c| c.chan).collect();
                self.pool.format_vec(value, &swz)
            }
            _ => {
                let parts: Vec<String> = src
                    .chans
                    .iter()
                    .map(|c| self.pool.format_chan(c.value, c.chan))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    fn addr(&self, addr: Option<Chan>, offset: u32) -> String {
        match addr {
            Some(chan) => format!("{} + {}", self.pool.format_chan(chan.value, chan.chan), offset),
            None => offset.to_string(),
        }
    }

    fn dim(dim: TexDim, flags: TexFlags) -> String {
        let mut name = dim.name().to_ascii_uppercase();
        if flags.contains(TexFlags::ARRAY) {
            name.push_str("_ARRAY");
        }
        name
    }
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool;
        match self.instr {
            Instruction::Alu(alu) => {
                write!(f, "ALU {}", alu.op.name())?;
                let mut sep = " ";
                if let Some(dest) = alu.dest {
                    write!(f, " {}", pool.format_vec(dest.value, &written_chans(dest.write_mask)))?;
                    sep = ", ";
                }
                for (i, src) in alu.srcs.iter().enumerate() {
                    let mut text = self.alu_src(src);
                    if alu.mods.src_abs(i) {
                        text = format!("|{}|", text);
                    }
                    if alu.mods.src_neg(i) {
                        text = format!("-{}", text);
                    }
                    write!(f, "{}{}", sep, text)?;
                    sep = ", ";
                }
                if alu.mods.contains(AluModifiers::DST_CLAMP) {
                    write!(f, " clamp")?;
                }
                if alu.mods.contains(AluModifiers::UPDATE_EXEC) {
                    write!(f, " update_exec")?;
                }
                if alu.mods.contains(AluModifiers::UPDATE_PRED) {
                    write!(f, " update_pred")?;
                }
                Ok(())
            }
            Instruction::Tex(tex) => {
                write!(f, "TEX {}", tex.op.name())?;
                if let Some((dest, swz)) = tex.dest {
                    write!(f, " {},", pool.format_vec(dest, &swz))?;
                }
                write!(
                    f,
                    " {}, RID:{} SID:{} {}",
                    pool.format_vec(tex.src, &tex.src_swizzle),
                    tex.resource_id,
                    tex.sampler_id,
                    Self::dim(tex.dim, tex.flags)
                )?;
                if tex.offsets != [0; 3] {
                    write!(f, " OFS:{},{},{}", tex.offsets[0], tex.offsets[1], tex.offsets[2])?;
                }
                if tex.flags.contains(TexFlags::UNNORMALIZED) {
                    write!(f, " UNNORM")?;
                }
                if matches!(tex.op, TexOpcode::GATHER4 | TexOpcode::GATHER4_C) {
                    write!(f, " COMP:{}", tex.gather_comp)?;
                }
                Ok(())
            }
            Instruction::Fetch(fetch) => {
                write!(
                    f,
                    "FETCH {} {}, {}",
                    fetch.kind.name(),
                    pool.format_vec(fetch.dest, &fetch.dest_swizzle),
                    self.addr(fetch.addr, fetch.offset)
                )?;
                if !matches!(fetch.kind, FetchKind::Scratch | FetchKind::EsgsRing) {
                    write!(f, ", RID:{}", fetch.resource_id)?;
                    if let Some(index) = fetch.resource_index {
                        write!(f, " + {}", pool.format_chan(index.value, index.chan))?;
                    }
                }
                Ok(())
            }
            Instruction::MemWrite(mem) => {
                let target = match mem.kind {
                    MemWriteKind::Scratch => "SCRATCH".to_string(),
                    MemWriteKind::GsRing { stream } => format!("RING{}", stream),
                };
                write!(
                    f,
                    "MEM {} {}, {}",
                    target,
                    pool.format_vec(mem.value, &mask_swizzle(mem.write_mask)),
                    self.addr(mem.addr, mem.offset)
                )
            }
            Instruction::Rat(rat) => {
                write!(f, "RAT {}", rat.op.name())?;
                if let Some(dest) = rat.dest {
                    write!(f, " {},", pool.format_vec(dest, &written_chans(rat.write_mask)))?;
                }
                write!(f, " RAT{} addr:{}", rat.rat_id, pool.format_vec(rat.addr, &[0, 1, 2, 3]))?;
                if let Some(data) = rat.data {
                    write!(f, " data:{}", pool.format_vec(data, &mask_swizzle(rat.write_mask)))?;
                }
                Ok(())
            }
            Instruction::Gds(gds) => {
                write!(f, "GDS {} {}", gds.op.name(), pool.format_chan(gds.dest.value, gds.dest.chan))?;
                if let Some(src) = gds.src {
                    write!(f, ", {}", pool.format_vec(src, &[0, 1]))?;
                }
                write!(f, ", base:{}", gds.base)
            }
            Instruction::Interp(interp) => {
                write!(
                    f,
                    "{} {}",
                    interp.kind.name(),
                    pool.format_vec(interp.dest, &mask_swizzle(interp.write_mask))
                )?;
                if let Some((i, j)) = interp.bary {
                    write!(
                        f,
                        ", {} {}",
                        pool.format_chan(i.value, i.chan),
                        pool.format_chan(j.value, j.chan)
                    )?;
                }
                write!(f, ", PARAM{}", interp.param)
            }
            Instruction::Export(export) => {
                let name = if export.is_last { "EXPORT_DONE" } else { "EXPORT" };
                let value = match export.value {
                    Some(value) => pool.format_vec(value, &export.swizzle),
                    None => {
                        let swz: String = export
                            .swizzle
                            .iter()
                            .map(|&c| match c {
                                SEL_0 => '0',
                                SEL_1 => '1',
                                _ => '_',
                            })
                            .collect();
                        format!("__.{}", swz)
                    }
                };
                write!(f, "{} {} {} {}", name, export.kind.name(), export.base, value)
            }
            Instruction::Cf(cf) => match cf {
                CfInstruction::IfStart { id, cond } => write!(
                    f,
                    "IF_START id:{} cond:{}",
                    id,
                    pool.format_chan(cond.value, cond.chan)
                ),
                CfInstruction::ElseStart { id }
                | CfInstruction::IfEnd { id }
                | CfInstruction::LoopBegin { id }
                | CfInstruction::LoopEnd { id }
                | CfInstruction::LoopBreak { id }
                | CfInstruction::LoopContinue { id } => write!(f, "{} id:{}", cf.name(), id),
                CfInstruction::EmitVertex { stream } | CfInstruction::CutVertex { stream } => {
                    write!(f, "{} stream={}", cf.name(), stream)
                }
            },
        }
    }
}

/// Render a listing, one instruction per line, indented by block depth.
pub fn format_listing(instructions: &[Instruction], pool: &ValuePool) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for instr in instructions {
        if let Instruction::Cf(cf) = instr {
            depth = depth.saturating_sub(cf.depth_change().0);
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str(&instr.display(pool).to_string());
        out.push('\n');
        if let Instruction::Cf(cf) = instr {
            depth += cf.depth_change().1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alu_display_with_modifiers() {
        let mut pool = ValuePool::new();
        let r = pool.allocate(ValueKind::Register, 4);
        let k = pool.constant(0, 1);
        let alu = AluInstruction::new(
            AluOp::ADD,
            Some(AluDest {
                value: r,
                write_mask: 0b0011,
            }),
            vec![
                AluSrc::new(vec![Chan::new(r, 0), Chan::new(r, 1)]),
                AluSrc::new(vec![Chan::new(k, 0), Chan::new(k, 1)]),
            ],
        )
        .with_mods(AluModifiers::SRC1_NEG | AluModifiers::SRC1_ABS | AluModifiers::DST_CLAMP);
        let instr = Instruction::Alu(alu);
        assert_eq!(
            instr.display(&pool).to_string(),
            "ALU ADD %0.xy, %0.xy, -|KC0[1].xy| clamp"
        );
    }

    #[test]
    fn test_gathered_source_display() {
        let mut pool = ValuePool::new();
        let r = pool.allocate(ValueKind::Register, 1);
        let k = pool.constant(0, 1);
        let src = AluSrc::new(vec![Chan::new(r, 0), Chan::new(k, 1)]);
        let instr = Instruction::Alu(AluInstruction::new(
            AluOp::MOV,
            Some(AluDest {
                value: r,
                write_mask: 0b0011,
            }),
            vec![src],
        ));
        assert!(instr.display(&pool).to_string().ends_with("{%0.x,KC0[1].y}"));
    }

    #[test]
    fn test_listing_indents_blocks() {
        let mut pool = ValuePool::new();
        let c = pool.allocate(ValueKind::Register, 1);
        let code = vec![
            Instruction::Cf(CfInstruction::IfStart {
                id: 0,
                cond: Chan::new(c, 0),
            }),
            Instruction::Cf(CfInstruction::LoopBegin { id: 0 }),
            Instruction::Cf(CfInstruction::LoopBreak { id: 0 }),
            Instruction::Cf(CfInstruction::LoopEnd { id: 0 }),
            Instruction::Cf(CfInstruction::ElseStart { id: 0 }),
            Instruction::Cf(CfInstruction::IfEnd { id: 0 }),
        ];
        let listing = format_listing(&code, &pool);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "IF_START id:0 cond:%0.x");
        assert_eq!(lines[1], "  LOOP_BEGIN id:0");
        assert_eq!(lines[2], "    LOOP_BREAK id:0");
        assert_eq!(lines[3], "  LOOP_END id:0");
        assert_eq!(lines[4], "ELSE_START id:0");
        assert_eq!(lines[5], "IF_END id:0");
    }

    #[test]
    fn test_value_uses_and_loop_markers() {
        let mut pool = ValuePool::new();
        let a = pool.allocate(ValueKind::Register, 4);
        let b = pool.allocate(ValueKind::Register, 4);
        let export = Instruction::Export(ExportInstruction {
            kind: ExportKind::Pos,
            base: 60,
            value: Some(a),
            swizzle: [0, 1, 2, 3],
            is_last: true,
        });
        let mut seen = Vec::new();
        export.visit_values(&mut |v| seen.push(v));
        assert_eq!(seen, vec![a]);
        assert_eq!(export.display(&pool).to_string(), "EXPORT_DONE POS 60 %0.xyzw");

        let fetch = Instruction::Fetch(FetchInstruction {
            kind: FetchKind::Ubo,
            dest: b,
            dest_swizzle: [0, 1, 2, 3],
            addr: Some(Chan::new(a, 0)),
            offset: 16,
            resource_id: 1,
            resource_index: None,
        });
        assert_eq!(fetch.display(&pool).to_string(), "FETCH UBO %1.xyzw, %0.x + 16, RID:1");
        assert_eq!(
            Instruction::Cf(CfInstruction::LoopEnd { id: 3 }).loop_marker(),
            Some(LoopMarker::End)
        );
        assert_eq!(export.loop_marker(), None);
    }
}
