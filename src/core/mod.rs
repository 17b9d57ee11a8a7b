// This module gathers the stage-independent infrastructure of the shader backend: the error
// taxonomy, the device capability record and the binding table that arrive from outside, the
// value pool that owns every logical operand of a compilation, the physical register file
// and liveness analysis behind its remap pass, and the statistics counters reported with
// each compiled shader. Nothing in here knows about individual IR operations or target
// opcodes; the emitters and the shader processor build on top of these pieces.

//! Core backend infrastructure.
//!
//! # Key Components
//!
//! ## Value Pool (`value_pool`)
//! - Arena of registers, literals and constant-cache references
//! - Index-based sharing between instructions
//! - First-fit remapping to physical registers under a stage budget
//!
//! ## Register File (`register_file`)
//! - Bitset tracking of reserved and allocated GPRs
//!
//! ## Liveness (`liveness`)
//! - Linear live ranges with loop extension
//!
//! ## Device Interface (`caps`, `bindings`)
//! - Capability presets per chip class
//! - Binding table keyed by resource space and index

pub mod bindings;
pub mod caps;
pub mod error;
pub mod liveness;
pub mod register_file;
pub mod stats;
pub mod value_pool;

pub use bindings::{BindingTable, ResourceBinding};
pub use caps::{ChipClass, DeviceCaps, StageBudget};
pub use error::{BindingSpace, BudgetResource, CompileError, CompileResult};
pub use liveness::{Liveness, LivenessInfo, LoopMarker, ValueUses};
pub use register_file::{RegAllocError, RegBitSet, RegId, RegisterFile, MAX_GPRS};
pub use stats::ShaderStats;
pub use value_pool::{Value, ValueId, ValueKind, ValuePool};
