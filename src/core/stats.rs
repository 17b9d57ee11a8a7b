//! Per-shader compilation statistics.

use std::fmt;

use hashbrown::HashMap;

/// Counters gathered while compiling one shader.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShaderStats {
    /// IR instruction nodes visited by the emission pass.
    pub nodes_visited: usize,

    /// Target instructions emitted.
    pub instructions_emitted: usize,

    /// Count per instruction category (ALU, TEX, FETCH, ...).
    pub category_counts: HashMap<&'static str, usize>,

    /// Count per opcode.
    pub instruction_counts: HashMap<String, usize>,

    /// ALU instructions that had to be split for the constant read limit.
    pub constant_splits: usize,

    /// MOVs inserted to bring operands into a single register.
    pub operand_copies: usize,

    /// Logical values created.
    pub values_allocated: usize,

    /// Physical registers after remapping.
    pub gprs_used: u32,

    /// Deepest control-flow nesting.
    pub max_cf_depth: usize,
}

impl ShaderStats {
    /// Record an emitted instruction.
    pub fn record_instruction(&mut self, category: &'static str, opcode: &str) {
        self.instructions_emitted += 1;
        *self.category_counts.entry(category).or_insert(0) += 1;
        *self
            .instruction_counts
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    pub fn category(&self, category: &str) -> usize {
        self.category_counts.get(category).copied().unwrap_or(0)
    }

    pub fn record_cf_depth(&mut self, depth: usize) {
        self.max_cf_depth = self.max_cf_depth.max(depth);
    }
}

impl fmt::Display for ShaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shader Statistics:")?;
        writeln!(f, "  IR nodes visited: {}", self.nodes_visited)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Constant splits: {}", self.constant_splits)?;
        writeln!(f, "  Operand copies: {}", self.operand_copies)?;
        writeln!(f, "  Values allocated: {}", self.values_allocated)?;
        writeln!(f, "  GPRs used: {}", self.gprs_used)?;
        writeln!(f, "  Max CF depth: {}", self.max_cf_depth)?;

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|(a_op, a), (b_op, b)| b.cmp(a).then_with(|| a_op.cmp(b_op)));

            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_recording() {
        let mut stats = ShaderStats::default();
        stats.record_instruction("ALU", "ADD");
        stats.record_instruction("ALU", "MUL_IEEE");
        stats.record_instruction("ALU", "ADD");
        stats.record_instruction("TEX", "SAMPLE");
        stats.record_cf_depth(2);
        stats.record_cf_depth(1);

        assert_eq!(stats.instructions_emitted, 4);
        assert_eq!(stats.category("ALU"), 3);
        assert_eq!(stats.category("EXPORT"), 0);
        assert_eq!(stats.instruction_counts["ADD"], 2);
        assert_eq!(stats.max_cf_depth, 2);
    }

    #[test]
    fn test_statistics_display() {
        let mut stats = ShaderStats::default();
        stats.record_instruction("ALU", "ADD");
        stats.gprs_used = 3;

        let output = format!("{}", stats);
        assert!(output.contains("Instructions emitted: 1"));
        assert!(output.contains("GPRs used: 3"));
        assert!(output.contains("ADD: 1"));
    }
}
