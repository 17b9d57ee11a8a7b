//! Hardware-agnostic shader IR consumed by the backend.
//!
//! A [`ShaderProgram`] is a structured tree: straight-line instruction nodes
//! interleaved with `if` and `loop` nodes. Values are either SSA definitions
//! (`%N`, defined exactly once) or non-SSA registers (`$name`, written by any
//! number of nodes); anything that merges across control flow goes through a
//! register, so the IR carries no phi nodes the backend has to resolve.
//!
//! # Textual form
//!
//! ```text
//! ; Comments start with semicolon
//! shader vertex
//! input @a : vec4 generic 0 @0
//! output @pos : vec4 position @0
//! reg $r : vec4
//!
//! %0 = load_input @a
//! %1 = fadd %0, %0.wzyx
//! if %0.x {
//!     $r = fmul %1, %1
//! } else {
//!     $r = mov %1
//! }
//! store_output @pos, $r
//! ```

use std::fmt;

pub mod builder;
pub mod check;
pub mod parser;
pub mod print;

pub use builder::ProgramBuilder;
pub use check::{CheckDirective, TestRunner, TestSpec};

/// Identity of an IR node, assigned in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "vertex" | "vs" => Some(ShaderStage::Vertex),
            "fragment" | "fs" => Some(ShaderStage::Fragment),
            "compute" | "cs" => Some(ShaderStage::Compute),
            "geometry" | "gs" => Some(ShaderStage::Geometry),
            _ => None,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarMode {
    Input,
    Output,
    /// Default uniform block, addressed in vec4 slots.
    Uniform,
    /// Function-temporary array, addressable with a dynamic index.
    Array,
}

impl VarMode {
    pub fn name(self) -> &'static str {
        match self {
            VarMode::Input => "input",
            VarMode::Output => "output",
            VarMode::Uniform => "uniform",
            VarMode::Array => "array",
        }
    }
}

/// Varying semantic of an input or output variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    None,
    Position,
    PointSize,
    ClipDistance(u8),
    Color(u8),
    BackColor(u8),
    Fog,
    Generic(u8),
    TexCoord(u8),
    PointCoord,
    PrimitiveId,
    Layer,
    ViewportIndex,
    FragDepth,
    FragStencil,
    SampleMask,
    FragData(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpLocation {
    #[default]
    Center,
    Centroid,
    Sample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub mode: VarMode,
    /// Driver location: attribute slot, varying slot, uniform vec4 slot.
    pub location: u32,
    pub semantic: Semantic,
    pub components: u8,
    pub interp: Interpolation,
    pub interp_loc: InterpLocation,
    /// Element count for arrays and arrayed uniforms, 0 for scalars/vectors.
    pub array_len: u32,
}

impl Variable {
    /// Number of vec4 slots the variable occupies.
    pub fn slots(&self) -> u32 {
        self.array_len.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub components: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsaDef {
    pub index: u32,
    pub components: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Ssa(SsaDef),
    Register { reg: RegisterId, write_mask: u8 },
}

impl Dest {
    /// Number of components written.
    pub fn components(&self) -> u8 {
        match self {
            Dest::Ssa(def) => def.components,
            Dest::Register { write_mask, .. } => write_mask.count_ones() as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcRef {
    Ssa(u32),
    Register(RegisterId),
}

/// Operand read: a value reference, a swizzle and ALU source modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Src {
    pub source: SrcRef,
    pub swizzle: [u8; 4],
    /// Number of meaningful swizzle entries.
    pub components: u8,
    pub negate: bool,
    pub abs: bool,
}

impl Src {
    pub fn ssa(index: u32, components: u8) -> Self {
        Self {
            source: SrcRef::Ssa(index),
            swizzle: [0, 1, 2, 3],
            components,
            negate: false,
            abs: false,
        }
    }

    pub fn reg(reg: RegisterId, components: u8) -> Self {
        Self {
            source: SrcRef::Register(reg),
            swizzle: [0, 1, 2, 3],
            components,
            negate: false,
            abs: false,
        }
    }

    /// Select a single component of this source.
    pub fn chan(mut self, c: u8) -> Self {
        self.swizzle = [self.swizzle[c as usize]; 4];
        self.components = 1;
        self
    }

    /// Apply a swizzle on top of the current one.
    pub fn swizzled(mut self, swz: &[u8]) -> Self {
        let old = self.swizzle;
        for (i, &c) in swz.iter().enumerate().take(4) {
            self.swizzle[i] = old[c as usize];
        }
        for i in swz.len()..4 {
            self.swizzle[i] = self.swizzle[swz.len().saturating_sub(1)];
        }
        self.components = swz.len() as u8;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.abs = true;
        self
    }
}

/// Operand that is either known at compile time or computed at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Const(u32),
    Dynamic(Src),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrAluOp {
    Mov,
    Vec2,
    Vec3,
    Vec4,
    Fadd,
    Fsub,
    Fmul,
    Ffma,
    Fneg,
    Fabs,
    Fsat,
    Fmin,
    Fmax,
    Ffloor,
    Fceil,
    Ftrunc,
    FroundEven,
    Ffract,
    Frcp,
    Frsq,
    Fsqrt,
    Fexp2,
    Flog2,
    Fsin,
    Fcos,
    Fpow,
    Fmod,
    Fdot2,
    Fdot3,
    Fdot4,
    Fddx,
    Fddy,
    Flt,
    Fge,
    Feq,
    Fne,
    Fcsel,
    Iadd,
    Isub,
    Imul,
    Ineg,
    Iabs,
    Imin,
    Imax,
    Umin,
    Umax,
    Ishl,
    Ishr,
    Ushr,
    Iand,
    Ior,
    Ixor,
    Inot,
    Ilt,
    Ige,
    Ieq,
    Ine,
    Ult,
    Uge,
    Idiv,
    Udiv,
    Umod,
    F2i,
    F2u,
    I2f,
    U2f,
    B2f,
    Bcsel,
}

impl IrAluOp {
    /// Textual name and source count.
    pub const fn info(self) -> (&'static str, usize) {
        use IrAluOp::*;
        match self {
            Mov => ("mov", 1),
            Vec2 => ("vec2", 2),
            Vec3 => ("vec3", 3),
            Vec4 => ("vec4", 4),
            Fadd => ("fadd", 2),
            Fsub => ("fsub", 2),
            Fmul => ("fmul", 2),
            Ffma => ("ffma", 3),
            Fneg => ("fneg", 1),
            Fabs => ("fabs", 1),
            Fsat => ("fsat", 1),
            Fmin => ("fmin", 2),
            Fmax => ("fmax", 2),
            Ffloor => ("ffloor", 1),
            Fceil => ("fceil", 1),
            Ftrunc => ("ftrunc", 1),
            FroundEven => ("fround_even", 1),
            Ffract => ("ffract", 1),
            Frcp => ("frcp", 1),
            Frsq => ("frsq", 1),
            Fsqrt => ("fsqrt", 1),
            Fexp2 => ("fexp2", 1),
            Flog2 => ("flog2", 1),
            Fsin => ("fsin", 1),
            Fcos => ("fcos", 1),
            Fpow => ("fpow", 2),
            Fmod => ("fmod", 2),
            Fdot2 => ("fdot2", 2),
            Fdot3 => ("fdot3", 2),
            Fdot4 => ("fdot4", 2),
            Fddx => ("fddx", 1),
            Fddy => ("fddy", 1),
            Flt => ("flt", 2),
            Fge => ("fge", 2),
            Feq => ("feq", 2),
            Fne => ("fne", 2),
            Fcsel => ("fcsel", 3),
            Iadd => ("iadd", 2),
            Isub => ("isub", 2),
            Imul => ("imul", 2),
            Ineg => ("ineg", 1),
            Iabs => ("iabs", 1),
            Imin => ("imin", 2),
            Imax => ("imax", 2),
            Umin => ("umin", 2),
            Umax => ("umax", 2),
            Ishl => ("ishl", 2),
            Ishr => ("ishr", 2),
            Ushr => ("ushr", 2),
            Iand => ("iand", 2),
            Ior => ("ior", 2),
            Ixor => ("ixor", 2),
            Inot => ("inot", 1),
            Ilt => ("ilt", 2),
            Ige => ("ige", 2),
            Ieq => ("ieq", 2),
            Ine => ("ine", 2),
            Ult => ("ult", 2),
            Uge => ("uge", 2),
            Idiv => ("idiv", 2),
            Udiv => ("udiv", 2),
            Umod => ("umod", 2),
            F2i => ("f2i", 1),
            F2u => ("f2u", 1),
            I2f => ("i2f", 1),
            U2f => ("u2f", 1),
            B2f => ("b2f", 1),
            Bcsel => ("bcsel", 3),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().0
    }

    pub fn num_srcs(self) -> usize {
        self.info().1
    }

    /// Operations producing a scalar regardless of source width.
    pub fn is_reduction(self) -> bool {
        matches!(self, IrAluOp::Fdot2 | IrAluOp::Fdot3 | IrAluOp::Fdot4)
    }

    /// Operations whose sources are one scalar per destination component.
    pub fn is_vector_constructor(self) -> bool {
        matches!(self, IrAluOp::Vec2 | IrAluOp::Vec3 | IrAluOp::Vec4)
    }

    pub const ALL: &'static [IrAluOp] = &[
        IrAluOp::Mov, IrAluOp::Vec2, IrAluOp::Vec3, IrAluOp::Vec4, IrAluOp::Fadd,
        IrAluOp::Fsub, IrAluOp::Fmul, IrAluOp::Ffma, IrAluOp::Fneg, IrAluOp::Fabs,
        IrAluOp::Fsat, IrAluOp::Fmin, IrAluOp::Fmax, IrAluOp::Ffloor, IrAluOp::Fceil,
        IrAluOp::Ftrunc, IrAluOp::FroundEven, IrAluOp::Ffract, IrAluOp::Frcp, IrAluOp::Frsq,
        IrAluOp::Fsqrt, IrAluOp::Fexp2, IrAluOp::Flog2, IrAluOp::Fsin, IrAluOp::Fcos,
        IrAluOp::Fpow, IrAluOp::Fmod, IrAluOp::Fdot2, IrAluOp::Fdot3, IrAluOp::Fdot4,
        IrAluOp::Fddx, IrAluOp::Fddy, IrAluOp::Flt, IrAluOp::Fge, IrAluOp::Feq,
        IrAluOp::Fne, IrAluOp::Fcsel, IrAluOp::Iadd, IrAluOp::Isub, IrAluOp::Imul,
        IrAluOp::Ineg, IrAluOp::Iabs, IrAluOp::Imin, IrAluOp::Imax, IrAluOp::Umin,
        IrAluOp::Umax, IrAluOp::Ishl, IrAluOp::Ishr, IrAluOp::Ushr, IrAluOp::Iand,
        IrAluOp::Ior, IrAluOp::Ixor, IrAluOp::Inot, IrAluOp::Ilt, IrAluOp::Ige,
        IrAluOp::Ieq, IrAluOp::Ine, IrAluOp::Ult, IrAluOp::Uge, IrAluOp::Idiv,
        IrAluOp::Udiv, IrAluOp::Umod, IrAluOp::F2i, IrAluOp::F2u, IrAluOp::I2f,
        IrAluOp::U2f, IrAluOp::B2f, IrAluOp::Bcsel,
    ];

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexDim {
    D1,
    D2,
    D3,
    Cube,
    Rect,
    Buffer,
    D2Ms,
}

impl TexDim {
    pub fn name(self) -> &'static str {
        match self {
            TexDim::D1 => "1d",
            TexDim::D2 => "2d",
            TexDim::D3 => "3d",
            TexDim::Cube => "cube",
            TexDim::Rect => "rect",
            TexDim::Buffer => "buf",
            TexDim::D2Ms => "2dms",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(TexDim::D1),
            "2d" => Some(TexDim::D2),
            "3d" => Some(TexDim::D3),
            "cube" => Some(TexDim::Cube),
            "rect" => Some(TexDim::Rect),
            "buf" => Some(TexDim::Buffer),
            "2dms" => Some(TexDim::D2Ms),
            _ => None,
        }
    }

    /// Coordinate components, without the array layer.
    pub fn coord_components(self) -> u8 {
        match self {
            TexDim::D1 | TexDim::Buffer => 1,
            TexDim::D2 | TexDim::Rect | TexDim::D2Ms => 2,
            TexDim::D3 | TexDim::Cube => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexOp {
    /// Implicit-derivative sample.
    Tex,
    /// Sample with bias.
    Txb,
    /// Sample with explicit LOD.
    Txl,
    /// Sample with explicit derivatives.
    Txd,
    /// Texel fetch.
    Txf,
    /// Multisample texel fetch.
    TxfMs,
    /// Size query.
    Txs,
    /// Gather four texels of one component.
    Tg4,
    /// Sample count query.
    TextureSamples,
}

impl TexOp {
    pub fn name(self) -> &'static str {
        match self {
            TexOp::Tex => "tex",
            TexOp::Txb => "txb",
            TexOp::Txl => "txl",
            TexOp::Txd => "txd",
            TexOp::Txf => "txf",
            TexOp::TxfMs => "txf_ms",
            TexOp::Txs => "txs",
            TexOp::Tg4 => "tg4",
            TexOp::TextureSamples => "texture_samples",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        [
            TexOp::Tex,
            TexOp::Txb,
            TexOp::Txl,
            TexOp::Txd,
            TexOp::Txf,
            TexOp::TxfMs,
            TexOp::Txs,
            TexOp::Tg4,
            TexOp::TextureSamples,
        ]
        .into_iter()
        .find(|op| op.name() == s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TexNode {
    pub op: TexOp,
    pub binding: u32,
    pub dim: TexDim,
    pub is_array: bool,
    pub is_shadow: bool,
    pub coord: Option<Src>,
    pub lod: Option<Src>,
    pub bias: Option<Src>,
    pub comparator: Option<Src>,
    pub ddx: Option<Src>,
    pub ddy: Option<Src>,
    pub ms_index: Option<Src>,
    pub offset: Option<[i8; 3]>,
    /// Gathered component for tg4.
    pub component: u8,
}

impl TexNode {
    pub fn new(op: TexOp, binding: u32, dim: TexDim) -> Self {
        Self {
            op,
            binding,
            dim,
            is_array: false,
            is_shadow: false,
            coord: None,
            lod: None,
            bias: None,
            comparator: None,
            ddx: None,
            ddy: None,
            ms_index: None,
            offset: None,
            component: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    Add,
    Imin,
    Umin,
    Imax,
    Umax,
    And,
    Or,
    Xor,
    Exchange,
    CompSwap,
}

impl AtomicOp {
    pub fn name(self) -> &'static str {
        match self {
            AtomicOp::Add => "add",
            AtomicOp::Imin => "imin",
            AtomicOp::Umin => "umin",
            AtomicOp::Imax => "imax",
            AtomicOp::Umax => "umax",
            AtomicOp::And => "and",
            AtomicOp::Or => "or",
            AtomicOp::Xor => "xor",
            AtomicOp::Exchange => "exchange",
            AtomicOp::CompSwap => "comp_swap",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        [
            AtomicOp::Add,
            AtomicOp::Imin,
            AtomicOp::Umin,
            AtomicOp::Imax,
            AtomicOp::Umax,
            AtomicOp::And,
            AtomicOp::Or,
            AtomicOp::Xor,
            AtomicOp::Exchange,
            AtomicOp::CompSwap,
        ]
        .into_iter()
        .find(|op| op.name() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterOp {
    Inc,
    PostDec,
    Read,
    Add,
    Min,
    Max,
    And,
    Or,
    Xor,
    Exchange,
    CompSwap,
}

impl CounterOp {
    pub fn name(self) -> &'static str {
        match self {
            CounterOp::Inc => "inc",
            CounterOp::PostDec => "post_dec",
            CounterOp::Read => "read",
            CounterOp::Add => "add",
            CounterOp::Min => "min",
            CounterOp::Max => "max",
            CounterOp::And => "and",
            CounterOp::Or => "or",
            CounterOp::Xor => "xor",
            CounterOp::Exchange => "exchange",
            CounterOp::CompSwap => "comp_swap",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        [
            CounterOp::Inc,
            CounterOp::PostDec,
            CounterOp::Read,
            CounterOp::Add,
            CounterOp::Min,
            CounterOp::Max,
            CounterOp::And,
            CounterOp::Or,
            CounterOp::Xor,
            CounterOp::Exchange,
            CounterOp::CompSwap,
        ]
        .into_iter()
        .find(|op| op.name() == s)
    }

    /// Number of data operands the operation consumes.
    pub fn num_data(self) -> usize {
        match self {
            CounterOp::Inc | CounterOp::PostDec | CounterOp::Read => 0,
            CounterOp::CompSwap => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SysValue {
    VertexId,
    InstanceId,
    FragCoord,
    FrontFace,
    SampleId,
    SampleMaskIn,
    LocalInvocationId,
    WorkgroupId,
    NumWorkgroups,
    PrimitiveId,
    InvocationId,
}

impl SysValue {
    pub fn name(self) -> &'static str {
        match self {
            SysValue::VertexId => "vertex_id",
            SysValue::InstanceId => "instance_id",
            SysValue::FragCoord => "frag_coord",
            SysValue::FrontFace => "front_face",
            SysValue::SampleId => "sample_id",
            SysValue::SampleMaskIn => "sample_mask_in",
            SysValue::LocalInvocationId => "local_invocation_id",
            SysValue::WorkgroupId => "workgroup_id",
            SysValue::NumWorkgroups => "num_workgroups",
            SysValue::PrimitiveId => "primitive_id",
            SysValue::InvocationId => "invocation_id",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        [
            SysValue::VertexId,
            SysValue::InstanceId,
            SysValue::FragCoord,
            SysValue::FrontFace,
            SysValue::SampleId,
            SysValue::SampleMaskIn,
            SysValue::LocalInvocationId,
            SysValue::WorkgroupId,
            SysValue::NumWorkgroups,
            SysValue::PrimitiveId,
            SysValue::InvocationId,
        ]
        .into_iter()
        .find(|v| v.name() == s)
    }

    /// Component count of the value.
    pub fn components(self) -> u8 {
        match self {
            SysValue::FragCoord => 4,
            SysValue::LocalInvocationId | SysValue::WorkgroupId | SysValue::NumWorkgroups => 3,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    /// Immediate bit patterns, one per component.
    LoadConst { values: Vec<u32> },
    Alu { op: IrAluOp, srcs: Vec<Src>, saturate: bool },
    LoadInput { var: VarId, component: u8 },
    LoadPerVertexInput { var: VarId, vertex: Operand, component: u8 },
    StoreOutput { var: VarId, src: Src, write_mask: u8 },
    /// Read from the default uniform block; `index` selects an array slot.
    LoadUniform { var: VarId, index: Operand },
    /// Read from a uniform buffer at a byte offset.
    LoadUbo { buffer: Operand, offset: Operand },
    Tex(TexNode),
    SsboLoad { binding: u32, offset: Operand },
    SsboStore { binding: u32, offset: Operand, value: Src, write_mask: u8 },
    SsboAtomic { op: AtomicOp, binding: u32, offset: Operand, data: Src, compare: Option<Src> },
    ImageLoad { binding: u32, dim: TexDim, is_array: bool, coord: Src },
    ImageStore { binding: u32, dim: TexDim, is_array: bool, coord: Src, value: Src },
    ImageAtomic {
        op: AtomicOp,
        binding: u32,
        dim: TexDim,
        is_array: bool,
        coord: Src,
        data: Src,
        compare: Option<Src>,
    },
    ImageSize { binding: u32, dim: TexDim, is_array: bool },
    /// Atomic counter at (binding, byte offset).
    AtomicCounter { op: CounterOp, binding: u32, offset: u32, data: Vec<Src> },
    LoadArray { var: VarId, index: Operand },
    StoreArray { var: VarId, index: Operand, value: Src, write_mask: u8 },
    Discard,
    DiscardIf { cond: Src },
    SysValue(SysValue),
    EmitVertex { stream: u8 },
    EndPrimitive { stream: u8 },
    Barrier,
    /// SSA merge nodes; the backend expects registers instead.
    Phi { srcs: Vec<Src> },
    /// Subroutine call; the backend expects inlined programs.
    Call { callee: String },
}

impl InstrKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrKind::LoadConst { .. } => "load_const",
            InstrKind::Alu { op, .. } => op.name(),
            InstrKind::LoadInput { .. } => "load_input",
            InstrKind::LoadPerVertexInput { .. } => "load_per_vertex_input",
            InstrKind::StoreOutput { .. } => "store_output",
            InstrKind::LoadUniform { .. } => "load_uniform",
            InstrKind::LoadUbo { .. } => "load_ubo",
            InstrKind::Tex(tex) => tex.op.name(),
            InstrKind::SsboLoad { .. } => "ssbo_load",
            InstrKind::SsboStore { .. } => "ssbo_store",
            InstrKind::SsboAtomic { .. } => "ssbo_atomic",
            InstrKind::ImageLoad { .. } => "image_load",
            InstrKind::ImageStore { .. } => "image_store",
            InstrKind::ImageAtomic { .. } => "image_atomic",
            InstrKind::ImageSize { .. } => "image_size",
            InstrKind::AtomicCounter { .. } => "atomic_counter",
            InstrKind::LoadArray { .. } => "load_array",
            InstrKind::StoreArray { .. } => "store_array",
            InstrKind::Discard => "discard",
            InstrKind::DiscardIf { .. } => "discard_if",
            InstrKind::SysValue(_) => "sysval",
            InstrKind::EmitVertex { .. } => "emit_vertex",
            InstrKind::EndPrimitive { .. } => "end_primitive",
            InstrKind::Barrier => "barrier",
            InstrKind::Phi { .. } => "phi",
            InstrKind::Call { .. } => "call",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub id: NodeId,
    pub dest: Option<Dest>,
    pub kind: InstrKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Instr(Instr),
    If {
        id: NodeId,
        cond: Src,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Loop {
        id: NodeId,
        body: Vec<Node>,
    },
    Jump {
        id: NodeId,
        kind: JumpKind,
    },
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Instr(instr) => instr.id,
            Node::If { id, .. } | Node::Loop { id, .. } | Node::Jump { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryInfo {
    pub max_vertices: u32,
    pub input_vertices: u8,
}

impl Default for GeometryInfo {
    fn default() -> Self {
        Self {
            max_vertices: 1,
            input_vertices: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgram {
    pub stage: ShaderStage,
    pub variables: Vec<Variable>,
    pub registers: Vec<Register>,
    pub body: Vec<Node>,
    /// One past the highest SSA index used.
    pub ssa_count: u32,
    pub geometry: GeometryInfo,
    pub workgroup_size: [u32; 3],
}

impl ShaderProgram {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            variables: Vec::new(),
            registers: Vec::new(),
            body: Vec::new(),
            ssa_count: 0,
            geometry: GeometryInfo::default(),
            workgroup_size: [1, 1, 1],
        }
    }

    pub fn parse(text: &str) -> crate::core::CompileResult<Self> {
        parser::parse_program(text)
    }

    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(id.0 as usize)
    }

    pub fn register(&self, id: RegisterId) -> Option<&Register> {
        self.registers.get(id.0 as usize)
    }

    /// Visit every instruction node in program order.
    pub fn for_each_instr<'a>(&'a self, f: &mut dyn FnMut(&'a Instr)) {
        fn walk<'a>(nodes: &'a [Node], f: &mut dyn FnMut(&'a Instr)) {
            for node in nodes {
                match node {
                    Node::Instr(instr) => f(instr),
                    Node::If {
                        then_body,
                        else_body,
                        ..
                    } => {
                        walk(then_body, f);
                        walk(else_body, f);
                    }
                    Node::Loop { body, .. } => walk(body, f),
                    Node::Jump { .. } => {}
                }
            }
        }
        walk(&self.body, f);
    }

    /// Number of instruction nodes, control-flow nodes excluded.
    pub fn instr_count(&self) -> usize {
        let mut count = 0;
        self.for_each_instr(&mut |_| count += 1);
        count
    }
}

impl fmt::Display for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print::print_program(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swizzle_composition() {
        let src = Src::ssa(3, 4).swizzled(&[3, 2, 1, 0]);
        assert_eq!(src.swizzle, [3, 2, 1, 0]);
        let src = src.swizzled(&[1, 1]);
        assert_eq!(&src.swizzle[..2], &[2, 2]);
        assert_eq!(src.components, 2);
        assert_eq!(src.chan(0).swizzle, [2, 2, 2, 2]);
    }

    #[test]
    fn test_op_names_round_trip() {
        for op in IrAluOp::ALL {
            assert_eq!(IrAluOp::from_name(op.name()), Some(*op));
        }
        assert_eq!(TexOp::from_name("txl"), Some(TexOp::Txl));
        assert_eq!(SysValue::from_name("frag_coord"), Some(SysValue::FragCoord));
        assert_eq!(ShaderStage::from_name("fs"), Some(ShaderStage::Fragment));
    }
}
