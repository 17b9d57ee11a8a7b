//! Scan pass run before emission.
//!
//! Collects what the stage policies need to know up front: which system
//! values and interpolation modes are read (only those get preloaded
//! registers), how each output is stored, the last write of every IR
//! register, atomic counter usage and geometry streams. Variable accesses are
//! checked against the declared variable modes here, so the emitters can
//! rely on them.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::core::{CompileError, CompileResult};
use crate::ir::{
    Dest, Instr, InstrKind, InterpLocation, Interpolation, Node, NodeId, RegisterId, ShaderProgram,
    ShaderStage, SysValue, VarId, VarMode, Variable,
};

/// Barycentric coordinate set preloaded for fragment shaders, in hardware
/// preload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaryMode {
    PerspSample,
    PerspCenter,
    PerspCentroid,
    LinearSample,
    LinearCenter,
    LinearCentroid,
}

impl BaryMode {
    /// Mode used to interpolate `var`; flat inputs need none.
    pub fn of(var: &Variable) -> Option<Self> {
        let mode = match (var.interp, var.interp_loc) {
            (Interpolation::Flat, _) => return None,
            (Interpolation::Smooth, InterpLocation::Sample) => BaryMode::PerspSample,
            (Interpolation::Smooth, InterpLocation::Center) => BaryMode::PerspCenter,
            (Interpolation::Smooth, InterpLocation::Centroid) => BaryMode::PerspCentroid,
            (Interpolation::NoPerspective, InterpLocation::Sample) => BaryMode::LinearSample,
            (Interpolation::NoPerspective, InterpLocation::Center) => BaryMode::LinearCenter,
            (Interpolation::NoPerspective, InterpLocation::Centroid) => BaryMode::LinearCentroid,
        };
        Some(mode)
    }
}

/// How a single output variable is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStoreInfo {
    pub count: u32,
    /// Every store is outside of any if/loop.
    pub top_level: bool,
    /// Every store writes all components of the variable.
    pub full_width: bool,
}

impl Default for OutputStoreInfo {
    fn default() -> Self {
        Self {
            count: 0,
            top_level: true,
            full_width: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanInfo {
    pub sysvals: BTreeSet<SysValue>,
    pub bary_modes: BTreeSet<BaryMode>,
    pub output_stores: HashMap<VarId, OutputStoreInfo>,
    pub register_last_write: HashMap<RegisterId, NodeId>,
    /// Atomic counters as (binding, byte offset), in order of first use.
    pub atomic_counters: Vec<(u32, u32)>,
    pub streams: BTreeSet<u8>,
    pub uses_discard: bool,
    pub max_depth: usize,
    pub instr_count: usize,
}

const MAX_STREAMS: u8 = 4;

impl ScanInfo {
    pub fn scan(program: &ShaderProgram) -> CompileResult<Self> {
        check_declarations(program)?;
        let mut info = ScanInfo::default();
        info.walk(program, &program.body, 0)?;
        log::debug!(
            "scan: {} instructions, sysvals {:?}, bary {:?}, {} outputs stored",
            info.instr_count,
            info.sysvals,
            info.bary_modes,
            info.output_stores.len()
        );
        Ok(info)
    }

    fn walk(&mut self, program: &ShaderProgram, nodes: &[Node], depth: usize) -> CompileResult<()> {
        self.max_depth = self.max_depth.max(depth);
        for node in nodes {
            match node {
                Node::Instr(instr) => self.scan_instruction(program, instr, depth)?,
                Node::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.walk(program, then_body, depth + 1)?;
                    self.walk(program, else_body, depth + 1)?;
                }
                Node::Loop { body, .. } => self.walk(program, body, depth + 1)?,
                Node::Jump { .. } => {}
            }
        }
        Ok(())
    }

    fn scan_instruction(&mut self, program: &ShaderProgram, instr: &Instr, depth: usize) -> CompileResult<()> {
        self.instr_count += 1;
        if let Some(Dest::Ssa(def)) = instr.dest {
            if !valid_width(def.components) {
                return Err(CompileError::malformed(
                    Some(instr.id),
                    format!("%{} defined with {} components", def.index, def.components),
                ));
            }
        }
        if let Some(Dest::Register { reg, write_mask }) = instr.dest {
            let Some(decl) = program.register(reg) else {
                return Err(CompileError::malformed(Some(instr.id), format!("undeclared register ${}", reg.0)));
            };
            if write_mask == 0 || write_mask >> decl.components != 0 {
                return Err(CompileError::malformed(
                    Some(instr.id),
                    format!("write mask {:#x} on ${}", write_mask, decl.name),
                ));
            }
            let last = self.register_last_write.entry(reg).or_insert(instr.id);
            *last = (*last).max(instr.id);
        }

        match &instr.kind {
            InstrKind::LoadInput { var, .. } => {
                let input = expect_var(program, instr, *var, VarMode::Input)?;
                if program.stage == ShaderStage::Fragment {
                    if let Some(mode) = BaryMode::of(input) {
                        self.bary_modes.insert(mode);
                    }
                }
            }
            InstrKind::LoadPerVertexInput { var, .. } => {
                expect_var(program, instr, *var, VarMode::Input)?;
            }
            InstrKind::StoreOutput { var, write_mask, .. } => {
                let output = expect_var(program, instr, *var, VarMode::Output)?;
                let full = (1u8 << output.components) - 1;
                if *write_mask == 0 || write_mask & !full != 0 {
                    return Err(CompileError::malformed(
                        Some(instr.id),
                        format!("write mask {:#x} on {}-component output @{}", write_mask, output.components, output.name),
                    ));
                }
                let entry = self.output_stores.entry(*var).or_default();
                entry.count += 1;
                entry.top_level &= depth == 0;
                entry.full_width &= *write_mask == full;
            }
            InstrKind::LoadUniform { var, .. } => {
                expect_var(program, instr, *var, VarMode::Uniform)?;
            }
            InstrKind::LoadArray { var, .. } | InstrKind::StoreArray { var, .. } => {
                expect_var(program, instr, *var, VarMode::Array)?;
            }
            InstrKind::SysValue(value) => {
                self.sysvals.insert(*value);
            }
            InstrKind::AtomicCounter { binding, offset, .. } => {
                if !self.atomic_counters.contains(&(*binding, *offset)) {
                    self.atomic_counters.push((*binding, *offset));
                }
            }
            InstrKind::EmitVertex { stream } | InstrKind::EndPrimitive { stream } => {
                if *stream >= MAX_STREAMS {
                    return Err(CompileError::malformed(
                        Some(instr.id),
                        format!("vertex stream {} out of range", stream),
                    ));
                }
                self.streams.insert(*stream);
            }
            InstrKind::Discard | InstrKind::DiscardIf { .. } => self.uses_discard = true,
            _ => {}
        }
        Ok(())
    }
}

fn valid_width(components: u8) -> bool {
    (1..=4).contains(&components)
}

/// Variables and registers must fit a vec4.
fn check_declarations(program: &ShaderProgram) -> CompileResult<()> {
    if let Some(var) = program.variables.iter().find(|v| !valid_width(v.components)) {
        return Err(CompileError::malformed(
            None,
            format!("variable @{} declared with {} components", var.name, var.components),
        ));
    }
    if let Some(reg) = program.registers.iter().find(|r| !valid_width(r.components)) {
        return Err(CompileError::malformed(
            None,
            format!("register ${} declared with {} components", reg.name, reg.components),
        ));
    }
    Ok(())
}

fn expect_var<'p>(
    program: &'p ShaderProgram,
    instr: &Instr,
    var: VarId,
    mode: VarMode,
) -> CompileResult<&'p Variable> {
    match program.variable(var) {
        Some(v) if v.mode == mode => Ok(v),
        Some(v) => Err(CompileError::malformed(
            Some(instr.id),
            format!(
                "{} on {} variable @{}",
                instr.kind.name(),
                v.mode.name(),
                v.name
            ),
        )),
        None => Err(CompileError::malformed(
            Some(instr.id),
            format!("{} references undeclared variable #{}", instr.kind.name(), var.0),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrAluOp, ProgramBuilder, Semantic};

    #[test]
    fn test_scan_collects_outputs_and_sysvals() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 0);
        let pos = b.output("pos", 4, Semantic::Position, 0);
        let col = b.output("col", 4, Semantic::Generic(0), 1);
        let va = b.load_input(a);
        b.sysval(SysValue::VertexId);
        b.store_output(pos, va);
        b.begin_if(va.chan(0));
        b.store_output(col, va);
        b.end_if();
        let info = ScanInfo::scan(&b.finish()).unwrap();

        assert!(info.sysvals.contains(&SysValue::VertexId));
        let p = info.output_stores[&pos];
        assert!(p.top_level && p.full_width && p.count == 1);
        assert!(!info.output_stores[&col].top_level);
        assert_eq!(info.max_depth, 1);
    }

    #[test]
    fn test_scan_rejects_mode_mismatch() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 0);
        let v = b.load_input(a);
        b.store_output(a, v);
        let err = ScanInfo::scan(&b.finish()).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("input variable @a"));
    }

    #[test]
    fn test_bary_modes_and_register_writes() {
        let mut b = ProgramBuilder::new(ShaderStage::Fragment);
        let mut var = Variable {
            name: "v".into(),
            mode: VarMode::Input,
            location: 0,
            semantic: Semantic::Generic(0),
            components: 4,
            interp: Interpolation::NoPerspective,
            interp_loc: InterpLocation::Centroid,
            array_len: 0,
        };
        let v = b.declare(var.clone());
        var.name = "w".into();
        var.interp = Interpolation::Smooth;
        var.interp_loc = InterpLocation::Center;
        var.location = 1;
        let w = b.declare(var);
        let r = b.register("r", 4);
        let lv = b.load_input(v);
        let lw = b.load_input(w);
        b.alu_to_reg(r, 0xf, IrAluOp::Fadd, &[lv, lw]);
        let last = b.alu_to_reg(r, 0x1, IrAluOp::Mov, &[lv.chan(0)]);
        let info = ScanInfo::scan(&b.finish()).unwrap();

        let modes: Vec<BaryMode> = info.bary_modes.iter().copied().collect();
        assert_eq!(modes, vec![BaryMode::PerspCenter, BaryMode::LinearCentroid]);
        assert_eq!(info.register_last_write[&r], last);
    }
}
