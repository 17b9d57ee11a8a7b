//! Lowering of structured `if`/`loop` nodes to bracketed CF markers.
//!
//! The lowerer keeps one frame per open block on an explicit stack. Markers
//! are only produced for transitions that are legal from the current frame,
//! so the emitted stream is always well nested; anything else is reported as
//! a malformed program. Errors carry no node id; the caller attaches the id
//! of the IR node being lowered.

use crate::core::{CompileError, CompileResult};
use crate::ir::JumpKind;
use crate::target::{CfInstruction, Chan, Instruction};

/// State of the innermost open block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Outside,
    InThen,
    InElse,
    InLoopBody,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: u32,
    state: BlockState,
}

#[derive(Debug, Default)]
pub struct ControlFlowLowerer {
    stack: Vec<Frame>,
    max_depth: usize,
}

impl ControlFlowLowerer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BlockState {
        self.stack.last().map_or(BlockState::Outside, |f| f.state)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn push(&mut self, id: u32, state: BlockState) -> CompileResult<()> {
        let open = |f: &Frame| {
            f.id == id && matches!(state, BlockState::InLoopBody) == matches!(f.state, BlockState::InLoopBody)
        };
        if self.stack.iter().any(open) {
            return Err(CompileError::malformed(None, format!("block id {} is already open", id)));
        }
        self.stack.push(Frame { id, state });
        self.max_depth = self.max_depth.max(self.stack.len());
        Ok(())
    }

    fn top_matching(&mut self, id: u32, what: &str) -> CompileResult<&mut Frame> {
        match self.stack.last_mut() {
            Some(frame) if frame.id == id => Ok(frame),
            Some(frame) => Err(CompileError::malformed(
                None,
                format!("{} for block {} while block {} is innermost", what, id, frame.id),
            )),
            None => Err(CompileError::malformed(
                None,
                format!("{} for block {} outside of any block", what, id),
            )),
        }
    }

    pub fn emit_if_start(&mut self, id: u32, cond: Chan) -> CompileResult<Instruction> {
        self.push(id, BlockState::InThen)?;
        Ok(Instruction::Cf(CfInstruction::IfStart { id, cond }))
    }

    pub fn emit_else_start(&mut self, id: u32) -> CompileResult<Instruction> {
        let frame = self.top_matching(id, "else")?;
        if frame.state != BlockState::InThen {
            return Err(CompileError::malformed(
                None,
                format!("else for block {} in state {:?}", id, frame.state),
            ));
        }
        frame.state = BlockState::InElse;
        Ok(Instruction::Cf(CfInstruction::ElseStart { id }))
    }

    pub fn emit_ifelse_end(&mut self, id: u32) -> CompileResult<Instruction> {
        let frame = self.top_matching(id, "if end")?;
        if !matches!(frame.state, BlockState::InThen | BlockState::InElse) {
            return Err(CompileError::malformed(None, format!("if end closes loop {}", id)));
        }
        self.stack.pop();
        Ok(Instruction::Cf(CfInstruction::IfEnd { id }))
    }

    pub fn emit_loop_start(&mut self, id: u32) -> CompileResult<Instruction> {
        self.push(id, BlockState::InLoopBody)?;
        Ok(Instruction::Cf(CfInstruction::LoopBegin { id }))
    }

    pub fn emit_loop_end(&mut self, id: u32) -> CompileResult<Instruction> {
        let frame = self.top_matching(id, "loop end")?;
        if frame.state != BlockState::InLoopBody {
            return Err(CompileError::malformed(None, format!("loop end closes if {}", id)));
        }
        self.stack.pop();
        Ok(Instruction::Cf(CfInstruction::LoopEnd { id }))
    }

    /// Break or continue targeting the innermost enclosing loop.
    pub fn emit_jump_instruction(&mut self, kind: JumpKind) -> CompileResult<Instruction> {
        let Some(frame) = self
            .stack
            .iter()
            .rev()
            .find(|f| f.state == BlockState::InLoopBody)
        else {
            let what = match kind {
                JumpKind::Break => "break",
                JumpKind::Continue => "continue",
            };
            return Err(CompileError::malformed(None, format!("{} outside of a loop", what)));
        };
        let id = frame.id;
        Ok(Instruction::Cf(match kind {
            JumpKind::Break => CfInstruction::LoopBreak { id },
            JumpKind::Continue => CfInstruction::LoopContinue { id },
        }))
    }

    /// Check that every block was closed.
    pub fn finish(&self) -> CompileResult<()> {
        match self.stack.last() {
            None => Ok(()),
            Some(frame) => Err(CompileError::malformed(
                None,
                format!("{} open block(s) at end of shader, innermost id {}", self.stack.len(), frame.id),
            )),
        }
    }
}

/// Check that the CF markers of `instructions` form matched brackets.
///
/// Returns the number of (if, loop) blocks.
pub fn check_brackets(instructions: &[Instruction]) -> CompileResult<(usize, usize)> {
    #[derive(PartialEq)]
    enum Open {
        If(u32, bool),
        Loop(u32),
    }
    let mut stack: Vec<Open> = Vec::new();
    let mut counts = (0, 0);
    let err = |pos: usize, what: &str| {
        CompileError::malformed(None, format!("unmatched {} at position {}", what, pos))
    };
    for (pos, instr) in instructions.iter().enumerate() {
        let Some(cf) = instr.as_cf() else { continue };
        match *cf {
            CfInstruction::IfStart { id, .. } => stack.push(Open::If(id, false)),
            CfInstruction::ElseStart { id } => match stack.last_mut() {
                Some(Open::If(open, seen_else)) if *open == id && !*seen_else => *seen_else = true,
                _ => return Err(err(pos, "ELSE_START")),
            },
            CfInstruction::IfEnd { id } => match stack.pop() {
                Some(Open::If(open, _)) if open == id => counts.0 += 1,
                _ => return Err(err(pos, "IF_END")),
            },
            CfInstruction::LoopBegin { id } => stack.push(Open::Loop(id)),
            CfInstruction::LoopEnd { id } => match stack.pop() {
                Some(Open::Loop(open)) if open == id => counts.1 += 1,
                _ => return Err(err(pos, "LOOP_END")),
            },
            CfInstruction::LoopBreak { id } | CfInstruction::LoopContinue { id } => {
                if !stack.contains(&Open::Loop(id)) {
                    return Err(err(pos, "loop jump"));
                }
            }
            CfInstruction::EmitVertex { .. } | CfInstruction::CutVertex { .. } => {}
        }
    }
    if stack.is_empty() {
        Ok(counts)
    } else {
        Err(err(instructions.len(), "block start"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ValueKind, ValuePool};

    fn cond() -> Chan {
        let mut pool = ValuePool::new();
        Chan::new(pool.allocate(ValueKind::Register, 1), 0)
    }

    #[test]
    fn test_if_else_sequence() {
        let mut cf = ControlFlowLowerer::new();
        let mut out = vec![cf.emit_if_start(0, cond()).unwrap()];
        assert_eq!(cf.state(), BlockState::InThen);
        out.push(cf.emit_else_start(0).unwrap());
        assert_eq!(cf.state(), BlockState::InElse);
        out.push(cf.emit_ifelse_end(0).unwrap());
        assert_eq!(cf.state(), BlockState::Outside);
        cf.finish().unwrap();
        assert_eq!(check_brackets(&out).unwrap(), (1, 0));
    }

    #[test]
    fn test_else_requires_open_then() {
        let mut cf = ControlFlowLowerer::new();
        assert!(cf.emit_else_start(0).unwrap_err().is_malformed());

        cf.emit_if_start(0, cond()).unwrap();
        cf.emit_else_start(0).unwrap();
        assert!(cf.emit_else_start(0).unwrap_err().is_malformed());
        assert!(cf.emit_else_start(1).unwrap_err().is_malformed());
    }

    #[test]
    fn test_jumps_resolve_to_innermost_loop() {
        let mut cf = ControlFlowLowerer::new();
        assert!(cf.emit_jump_instruction(JumpKind::Break).is_err());

        cf.emit_loop_start(0).unwrap();
        cf.emit_loop_start(1).unwrap();
        cf.emit_if_start(0, cond()).unwrap();
        let jump = cf.emit_jump_instruction(JumpKind::Continue).unwrap();
        assert_eq!(jump, Instruction::Cf(CfInstruction::LoopContinue { id: 1 }));
        assert_eq!(cf.depth(), 3);

        // closing the outer loop first breaks nesting
        assert!(cf.emit_loop_end(0).is_err());
        cf.emit_ifelse_end(0).unwrap();
        cf.emit_loop_end(1).unwrap();
        let jump = cf.emit_jump_instruction(JumpKind::Break).unwrap();
        assert_eq!(jump, Instruction::Cf(CfInstruction::LoopBreak { id: 0 }));
        cf.emit_loop_end(0).unwrap();
        cf.finish().unwrap();
        assert_eq!(cf.max_depth(), 3);
    }

    #[test]
    fn test_unclosed_block_fails_finish() {
        let mut cf = ControlFlowLowerer::new();
        cf.emit_loop_start(4).unwrap();
        assert!(cf.finish().unwrap_err().is_malformed());
        assert!(cf.emit_ifelse_end(4).is_err());
        assert!(cf.emit_loop_start(4).is_err());
    }

    #[test]
    fn test_check_brackets_rejects_interleaving() {
        let c = cond();
        let code = vec![
            Instruction::Cf(CfInstruction::IfStart { id: 0, cond: c }),
            Instruction::Cf(CfInstruction::LoopBegin { id: 0 }),
            Instruction::Cf(CfInstruction::IfEnd { id: 0 }),
            Instruction::Cf(CfInstruction::LoopEnd { id: 0 }),
        ];
        assert!(check_brackets(&code).is_err());
    }
}
