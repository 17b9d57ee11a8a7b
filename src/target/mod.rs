//! Target VLIW instruction set: opcodes, instruction records and listing.

pub mod alu_op;
pub mod instruction;

pub use alu_op::{AluModifiers, AluOp};
pub use instruction::{
    format_listing, AluDest, AluInstruction, AluSrc, CfInstruction, Chan, ExportInstruction,
    ExportKind, FetchInstruction, FetchKind, GdsInstruction, GdsOp, Instruction,
    InstructionDisplay, InterpInstruction, InterpKind, MemWriteInstruction, MemWriteKind,
    RatInstruction, RatOp, TexFlags, TexInstruction, TexOpcode, SEL_0, SEL_1, SEL_MASK,
};
