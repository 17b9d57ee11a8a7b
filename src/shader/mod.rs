// This module is the shader processor: the orchestrator that turns one IR program into a
// fully resolved instruction list. Compilation runs in three phases. The scan phase walks the
// program once to collect what the stage needs up front (system values read, interpolation
// modes, output store patterns, atomic counters) and classifies the declarations into
// inputs, outputs, uniforms and scratch arrays through the stage policy. The emission phase
// walks the node tree once in program order, lowering if/loop/jump nodes through the
// control-flow lowerer and handing every instruction node first to the stage policy and
// then to the first emitter that claims it. Finalization remaps every logical register onto
// the physical register file under the stage's GPR budget and lets the stage append its
// export instructions. Any error aborts the compilation; nothing partial is returned.

//! Shader processor and per-stage policies.

pub mod args;
pub mod outputs;
pub mod report;
pub mod scan;
pub mod stage;

pub use args::CompileArgs;
pub use outputs::{OutputMap, OutputSlot};
pub use report::{ExportRecord, ShaderReport};
pub use scan::ScanInfo;
pub use stage::StagePolicy;

use crate::core::{BindingTable, CompileError, CompileResult, DeviceCaps, ValuePool};
use crate::emit::{
    AluEmitter, BufferEmitter, ControlFlowLowerer, EmitContext, EmitInstruction, ResourceUsage, TexEmitter,
};
use crate::ir::{Instr, InstrKind, Node, ShaderProgram, ShaderStage, VarId, VarMode};
use crate::target::{format_listing, Instruction};

/// Per-compilation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Replace missing position/parameter/color exports with constant ones.
    pub dummy_exports: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { dummy_exports: true }
    }
}

/// Result of a successful compilation.
#[derive(Debug)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub instructions: Vec<Instruction>,
    /// Operands of `instructions`, with physical registers assigned.
    pub pool: ValuePool,
    pub report: ShaderReport,
}

impl CompiledShader {
    pub fn listing(&self) -> String {
        format_listing(&self.instructions, &self.pool)
    }

    pub fn gpr_count(&self) -> u32 {
        self.report.gpr_count
    }
}

pub struct ShaderProcessor<'a> {
    program: &'a ShaderProgram,
    caps: &'a DeviceCaps,
    bindings: &'a BindingTable,
    options: CompileOptions,
}

impl<'a> ShaderProcessor<'a> {
    pub fn new(program: &'a ShaderProgram, caps: &'a DeviceCaps, bindings: &'a BindingTable) -> Self {
        Self {
            program,
            caps,
            bindings,
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn process(self) -> CompileResult<CompiledShader> {
        let program = self.program;
        log::debug!(
            "compiling {} shader: {} variables, {} registers, {} nodes",
            program.stage,
            program.variables.len(),
            program.registers.len(),
            program.body.len()
        );

        // Scan
        let scan = ScanInfo::scan(program)?;
        let mut stage = StagePolicy::for_stage(program.stage);
        stage.do_process_inputs(program, self.caps)?;
        let mut outputs = stage.do_process_outputs(program, self.caps, &scan)?;
        let usage = process_uniforms(program, &scan)?;

        // Emission
        let mut ctx = EmitContext::new(program, self.caps, self.bindings, usage);
        stage.allocate_reserved_registers(&mut ctx, &scan)?;
        let emitters: Vec<Box<dyn EmitInstruction>> = vec![
            Box::new(AluEmitter::new()),
            Box::new(TexEmitter::new()),
            Box::new(BufferEmitter::new()),
        ];
        let mut emission = Emission {
            ctx,
            stage: &mut stage,
            outputs: &mut outputs,
            scan: &scan,
            cf: ControlFlowLowerer::new(),
            emitters,
            next_if: 0,
            next_loop: 0,
        };
        emission.emit_nodes(&program.body)?;
        emission.cf.finish()?;
        let mut ctx = emission.ctx;

        // Finalize
        let budget = self.caps.budget(program.stage);
        let gprs = ctx.pool.remap_registers(&ctx.instructions, budget.gprs)?;
        ctx.stats.gprs_used = gprs;
        let exports = stage.do_finalize(&mut ctx, &outputs, &self.options)?;

        let EmitContext {
            pool,
            instructions,
            stats,
            usage,
            ..
        } = ctx;
        let report = ShaderReport {
            stage: program.stage,
            chip: self.caps.chip,
            gpr_count: gprs,
            reserved_gprs: pool.reserved_registers(),
            exports,
            kcache_banks: usage.kcache_banks.iter().copied().collect(),
            textures: usage.textures.iter().copied().collect(),
            ubos: usage.ubos.iter().copied().collect(),
            ssbos: usage.ssbos.iter().copied().collect(),
            images: usage.images.iter().copied().collect(),
            rat_ids: usage.rat_ids.iter().copied().collect(),
            atomic_locations: usage.atomic_locations.iter().map(|(&k, &v)| (k, v)).collect(),
            scratch_slots: usage.scratch_slots,
            ring_item_size: stage.ring_item_size(),
            uses_kill: usage.uses_kill,
            stats,
        };
        log::info!(
            "{} shader: {} instructions, {} GPRs",
            program.stage,
            instructions.len(),
            gprs
        );
        Ok(CompiledShader {
            stage: program.stage,
            instructions,
            pool,
            report,
        })
    }
}

/// Compile `program` with default options.
pub fn compile(program: &ShaderProgram, caps: &DeviceCaps, bindings: &BindingTable) -> CompileResult<CompiledShader> {
    ShaderProcessor::new(program, caps, bindings).process()
}

pub fn compile_with_options(
    program: &ShaderProgram,
    caps: &DeviceCaps,
    bindings: &BindingTable,
    options: CompileOptions,
) -> CompileResult<CompiledShader> {
    ShaderProcessor::new(program, caps, bindings)
        .with_options(options)
        .process()
}

/// Check the uniform layout and place scratch arrays and atomic counters.
fn process_uniforms(program: &ShaderProgram, scan: &ScanInfo) -> CompileResult<ResourceUsage> {
    let mut usage = ResourceUsage::default();

    let mut ranges: Vec<(u32, u32, &str)> = program
        .variables
        .iter()
        .filter(|v| v.mode == VarMode::Uniform)
        .map(|v| (v.location, v.location + v.slots(), v.name.as_str()))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        let ((_, end, a), (start, _, b)) = (pair[0], pair[1]);
        if start < end {
            return Err(CompileError::malformed(
                None,
                format!("uniforms @{} and @{} overlap", a, b),
            ));
        }
    }

    for (i, var) in program.variables.iter().enumerate() {
        if var.mode == VarMode::Array {
            usage.scratch_bases.insert(VarId(i as u32), usage.scratch_slots);
            usage.scratch_slots += var.slots();
        }
    }

    for &(binding, offset) in &scan.atomic_counters {
        usage.atomic_location(binding, offset);
    }
    log::debug!(
        "{} uniform ranges, {} scratch slots, {} atomic counters",
        ranges.len(),
        usage.scratch_slots,
        usage.atomic_locations.len()
    );
    Ok(usage)
}

/// State of the emission pass.
struct Emission<'a, 's> {
    ctx: EmitContext<'a>,
    stage: &'s mut StagePolicy,
    outputs: &'s mut OutputMap,
    scan: &'s ScanInfo,
    cf: ControlFlowLowerer,
    emitters: Vec<Box<dyn EmitInstruction>>,
    next_if: u32,
    next_loop: u32,
}

impl Emission<'_, '_> {
    fn emit_nodes(&mut self, nodes: &[Node]) -> CompileResult<()> {
        for node in nodes {
            self.emit_node(node).map_err(|e| e.at_node(node.id()))?;
        }
        Ok(())
    }

    fn emit_node(&mut self, node: &Node) -> CompileResult<()> {
        self.ctx.stats.nodes_visited += 1;
        self.ctx.set_node(node.id());
        match node {
            Node::Instr(instr) => self.emit_instruction(instr),
            Node::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let cond = self.ctx.resolve_scalar(cond)?;
                let id = self.next_if;
                self.next_if += 1;
                let start = self.cf.emit_if_start(id, cond)?;
                self.ctx.emit(start);
                self.ctx.stats.record_cf_depth(self.cf.depth());
                self.emit_nodes(then_body)?;
                if !else_body.is_empty() {
                    let other = self.cf.emit_else_start(id)?;
                    self.ctx.emit(other);
                    self.emit_nodes(else_body)?;
                }
                let end = self.cf.emit_ifelse_end(id)?;
                self.ctx.emit(end);
                Ok(())
            }
            Node::Loop { body, .. } => {
                let id = self.next_loop;
                self.next_loop += 1;
                let start = self.cf.emit_loop_start(id)?;
                self.ctx.emit(start);
                self.ctx.stats.record_cf_depth(self.cf.depth());
                self.emit_nodes(body)?;
                let end = self.cf.emit_loop_end(id)?;
                self.ctx.emit(end);
                Ok(())
            }
            Node::Jump { kind, .. } => {
                let jump = self.cf.emit_jump_instruction(*kind)?;
                self.ctx.emit(jump);
                Ok(())
            }
        }
    }

    fn emit_instruction(&mut self, instr: &Instr) -> CompileResult<()> {
        if self.stage.emit_stage_instruction(&mut self.ctx, &*self.outputs, instr)? {
            return Ok(());
        }
        match &instr.kind {
            InstrKind::StoreOutput {
                var,
                src,
                write_mask,
            } => self
                .outputs
                .store(&mut self.ctx, self.scan, instr.id, *var, src, *write_mask),
            InstrKind::Phi { .. } | InstrKind::Call { .. } => Err(self.ctx.malformed(format!(
                "{} nodes are not accepted by the backend",
                instr.kind.name()
            ))),
            kind => match self.emitters.iter_mut().find(|e| e.handles(kind)) {
                Some(emitter) => emitter.emit(&mut self.ctx, instr),
                None => Err(self.ctx.unsupported(kind.name())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BindingSpace;
    use crate::emit::check_brackets;
    use crate::ir::{IrAluOp, JumpKind, ProgramBuilder, Semantic, Src};

    #[test]
    fn test_loop_ids_and_brackets() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 0);
        let va = b.load_input(a);
        b.begin_loop();
        b.begin_if(va.chan(0));
        b.jump(JumpKind::Break);
        b.end_if();
        b.begin_loop();
        b.jump(JumpKind::Continue);
        b.end_loop();
        b.end_loop();
        b.begin_if(va.chan(1));
        b.end_if();
        let shader = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap();

        assert_eq!(check_brackets(&shader.instructions).unwrap(), (2, 2));
        let markers: Vec<String> = shader
            .instructions
            .iter()
            .filter(|i| i.as_cf().is_some())
            .map(|i| i.display(&shader.pool).to_string())
            .collect();
        assert_eq!(
            markers,
            vec![
                "LOOP_BEGIN id:0",
                "IF_START id:0 cond:R1.x",
                "LOOP_BREAK id:0",
                "IF_END id:0",
                "LOOP_BEGIN id:1",
                "LOOP_CONTINUE id:1",
                "LOOP_END id:1",
                "LOOP_END id:0",
                "IF_START id:1 cond:R1.y",
                "IF_END id:1",
            ]
        );
        assert_eq!(shader.report.stats.max_cf_depth, 2);
    }

    #[test]
    fn test_errors_carry_node_and_abort() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.load_const(&[1]);
        let call = b.instr_void(InstrKind::Call {
            callee: "helper".into(),
        });
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(matches!(err, CompileError::MalformedProgram { node: Some(n), .. } if n == call));

        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let r = b.register("r", 1);
        b.alu_to_reg(r, 1, IrAluOp::Mov, &[Src::ssa(7, 1)]);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_overlapping_uniforms() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        b.uniform("m", 4, 0, 4);
        b.uniform("v", 4, 3, 0);
        let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
        assert!(err.to_string().contains("@m and @v overlap"));
    }

    #[test]
    fn test_report_collects_resources() {
        let mut b = ProgramBuilder::new(ShaderStage::Fragment);
        let color = b.output("c", 4, Semantic::Color(0), 0);
        let arr = b.array("tmp", 4, 3);
        b.array("more", 4, 2);
        let coord = b.load_const_f32(&[0.5, 0.5]);
        let texel = b.tex(crate::ir::TexNode {
            coord: Some(coord),
            ..crate::ir::TexNode::new(crate::ir::TexOp::Tex, 2, crate::ir::TexDim::D2)
        });
        b.instr_void(InstrKind::StoreArray {
            var: arr,
            index: crate::ir::Operand::Const(1),
            value: texel,
            write_mask: 0xf,
        });
        b.store_output(color, texel);
        let mut bindings = BindingTable::new();
        bindings.bind_range(BindingSpace::Texture, 4);
        let shader = compile(&b.finish(), &DeviceCaps::default(), &bindings).unwrap();

        assert_eq!(shader.report.textures, vec![2]);
        assert_eq!(shader.report.scratch_slots, 5);
        assert_eq!(shader.report.exports.len(), 1);
        assert!(shader.gpr_count() >= 1);
        let text = shader.report.to_string();
        assert!(text.contains("textures: 2"));
        assert!(text.contains("scratch: 5"));
    }
}
