//! sfn - shader backend for VLIW GPUs.
//!
//! sfn lowers a hardware-agnostic shader IR (typed instructions, structured
//! `if`/`loop` nodes, variable and resource declarations) into the
//! instruction stream of a VLIW GPU: ALU groups over a fixed register file,
//! texture and vertex fetches, RAT/GDS memory operations, structured
//! control-flow markers and exports.
//!
//! # Primary Usage
//!
//! ```ignore
//! use sfn::{compile, BindingTable, DeviceCaps, ShaderProgram};
//!
//! let program = ShaderProgram::parse(source)?;
//! let caps = DeviceCaps::default();
//! let mut bindings = BindingTable::new();
//! bindings.bind_range(sfn::core::BindingSpace::Texture, 4);
//!
//! let shader = compile(&program, &caps, &bindings)?;
//! println!("{}", shader.listing());
//! println!("{}", shader.report);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Shader IR, its text parser/printer and the filecheck harness
//! - [`core`] - Errors, device capabilities, bindings and the value pool
//! - [`target`] - Target instruction records and opcodes
//! - [`emit`] - Control-flow lowering and the ALU/texture/buffer emitters
//! - [`shader`] - Shader processor and per-stage policies

pub mod core;
pub mod emit;
pub mod ir;
pub mod shader;
pub mod target;

pub use crate::core::{BindingTable, ChipClass, CompileError, CompileResult, DeviceCaps, ShaderStats, ValuePool};
pub use crate::ir::{ProgramBuilder, ShaderProgram, ShaderStage};
pub use crate::shader::{
    compile, compile_with_options, CompileArgs, CompileOptions, CompiledShader, ShaderProcessor, ShaderReport,
};
pub use crate::target::Instruction;
