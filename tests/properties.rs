//! Whole-compiler properties: instruction count, control-flow brackets,
//! register remapping, constant splitting and binding checks.

use sfn::core::{BindingSpace, BudgetResource};
use sfn::emit::check_brackets;
use sfn::ir::{InstrKind, IrAluOp, Operand, ProgramBuilder, Semantic, Src, TexDim, TexNode, TexOp};
use sfn::target::{AluOp, CfInstruction, Instruction};
use sfn::{compile, compile_with_options, BindingTable, CompileError, CompileOptions, DeviceCaps, ShaderStage};

fn no_dummies() -> CompileOptions {
    CompileOptions { dummy_exports: false }
}

fn alu_count(instructions: &[Instruction]) -> usize {
    instructions.iter().filter(|i| i.as_alu().is_some()).count()
}

#[test]
fn test_straight_line_alu_maps_one_to_one() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let c = b.input("c", 4, Semantic::Generic(1), 1);
    let va = b.load_input(a);
    let vc = b.load_input(c);
    let t0 = b.alu(IrAluOp::Fadd, &[va, vc]);
    let t1 = b.alu(IrAluOp::Fmul, &[t0, va]);
    let t2 = b.alu(IrAluOp::Fmax, &[t1, vc.chan(2)]);
    let t3 = b.alu(IrAluOp::Fsub, &[t2, t0]);
    b.alu(IrAluOp::Ixor, &[t3, va]);
    let program = b.finish();

    let shader = compile_with_options(&program, &DeviceCaps::default(), &BindingTable::new(), no_dummies()).unwrap();
    assert_eq!(shader.instructions.len(), 5);
    assert_eq!(alu_count(&shader.instructions), 5);
    assert_eq!(shader.report.stats.constant_splits, 0);
    assert_eq!(shader.report.stats.nodes_visited, 7);
}

#[test]
fn test_if_else_end_to_end() {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let bv = b.input("b", 4, Semantic::Generic(1), 1);
    let out = b.output("out", 4, Semantic::Generic(0), 0);
    let r = b.register("r", 4);
    let va = b.load_input(a);
    let vb = b.load_input(bv);
    b.begin_if(va.chan(0));
    b.alu_to_reg(r, 0xf, IrAluOp::Fadd, &[va, vb]);
    b.begin_else();
    b.alu_to_reg(r, 0xf, IrAluOp::Fsub, &[va, vb]);
    b.end_if();
    b.store_output(out, Src::reg(r, 4));
    let program = b.finish();

    let shader = compile(&program, &DeviceCaps::default(), &BindingTable::new()).unwrap();
    let markers: Vec<&CfInstruction> = shader.instructions.iter().filter_map(|i| i.as_cf()).collect();
    assert_eq!(markers.len(), 3);
    assert!(matches!(markers[0], CfInstruction::IfStart { id: 0, .. }));
    assert_eq!(markers[1], &CfInstruction::ElseStart { id: 0 });
    assert_eq!(markers[2], &CfInstruction::IfEnd { id: 0 });

    let alus: Vec<_> = shader.instructions.iter().filter_map(|i| i.as_alu()).collect();
    assert_eq!(alus.len(), 2);
    assert_eq!(alus[0].op, AluOp::ADD);
    assert!(!alus[0].mods.src_neg(1));
    assert_eq!(alus[1].op, AluOp::ADD);
    assert!(alus[1].mods.src_neg(1));

    let d0 = alus[0].dest.unwrap().value;
    let d1 = alus[1].dest.unwrap().value;
    assert_eq!(d0, d1);
    assert_eq!(shader.pool.phys(d0), shader.pool.phys(d1));
    assert!(shader.pool.phys(d0).is_some());

    // the register itself is exported, without a copy
    let param = shader
        .instructions
        .iter()
        .filter_map(|i| i.as_export())
        .find(|e| e.kind == sfn::target::ExportKind::Param)
        .unwrap();
    assert_eq!(param.value, Some(d0));
}

#[test]
fn test_brackets_match_for_nested_control_flow() {
    let mut b = ProgramBuilder::new(ShaderStage::Fragment);
    let color = b.output("color", 4, Semantic::Color(0), 0);
    let r = b.register("r", 4);
    let one = b.load_const_f32(&[1.0, 0.0, 0.0, 1.0]);
    b.alu_to_reg(r, 0xf, IrAluOp::Mov, &[one]);
    b.begin_loop();
    let x = b.alu(IrAluOp::Fadd, &[Src::reg(r, 4), one]);
    b.alu_to_reg(r, 0xf, IrAluOp::Mov, &[x]);
    let done = b.alu(IrAluOp::Fge, &[x.chan(0), one.chan(3)]);
    b.begin_if(done);
    b.jump(sfn::ir::JumpKind::Break);
    b.begin_else();
    b.begin_if(x.chan(1));
    b.jump(sfn::ir::JumpKind::Continue);
    b.end_if();
    b.end_if();
    b.end_loop();
    b.store_output(color, Src::reg(r, 4));
    let program = b.finish();

    let shader = compile(&program, &DeviceCaps::default(), &BindingTable::new()).unwrap();
    assert_eq!(check_brackets(&shader.instructions).unwrap(), (2, 1));
    let listing = shader.listing();
    assert!(listing.contains("LOOP_BEGIN id:0"));
    assert!(listing.contains("LOOP_BREAK id:0"));
    assert!(listing.contains("LOOP_CONTINUE id:0"));
    assert!(listing.contains("IF_START id:1"));
    assert!(listing.trim_end().lines().last().unwrap().starts_with("EXPORT_DONE PIXEL 0"));
}

#[test]
fn test_remap_twice_keeps_assignment() {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let va = b.load_input(a);
    let mut acc = b.alu(IrAluOp::Fmul, &[va, va]);
    for _ in 0..4 {
        let t = b.alu(IrAluOp::Fadd, &[acc, va]);
        acc = b.alu(IrAluOp::Fmul, &[t, acc]);
    }
    let program = b.finish();
    let caps = DeviceCaps::default();
    let mut shader = compile(&program, &caps, &BindingTable::new()).unwrap();

    let before: Vec<_> = shader.pool.iter().map(|(id, v)| (id, v.phys)).collect();
    let gprs = shader
        .pool
        .remap_registers(&shader.instructions, caps.budget(ShaderStage::Vertex).gprs)
        .unwrap();
    let after: Vec<_> = shader.pool.iter().map(|(id, v)| (id, v.phys)).collect();
    assert_eq!(before, after);
    assert_eq!(gprs, shader.gpr_count());
}

/// Shader that keeps `n` independent vec4 temporaries live at once.
fn wide_program(n: usize) -> sfn::ShaderProgram {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let out = b.output("out", 4, Semantic::Generic(0), 0);
    let va = b.load_input(a);
    let temps: Vec<Src> = (0..n)
        .map(|i| {
            let k = b.load_const_f32(&[i as f32 + 2.0]);
            b.alu(IrAluOp::Fmul, &[va, k])
        })
        .collect();
    let mut sum = temps[0];
    for t in &temps[1..] {
        sum = b.alu(IrAluOp::Fadd, &[sum, *t]);
    }
    b.store_output(out, sum);
    b.finish()
}

#[test]
fn test_allocation_overflow_at_budget_plus_one() {
    let program = wide_program(6);
    let bindings = BindingTable::new();
    let shader = compile(&program, &DeviceCaps::default(), &bindings).unwrap();
    let needed = shader.gpr_count();
    assert!(needed >= 8);

    let exact = DeviceCaps::default().with_gpr_budget(needed);
    let fit = compile(&program, &exact, &bindings).unwrap();
    assert_eq!(fit.gpr_count(), needed);

    // every assignment stays inside the budget
    let reg_values: Vec<_> = fit
        .pool
        .iter()
        .filter(|(_, v)| v.is_register() && !v.pinned)
        .filter_map(|(_, v)| v.phys)
        .collect();
    assert!(reg_values.iter().all(|&r| (r as u32) < needed));

    let short = DeviceCaps::default().with_gpr_budget(needed - 1);
    let err = compile(&program, &short, &bindings).unwrap_err();
    assert_eq!(
        err,
        CompileError::AllocationOverflow {
            resource: BudgetResource::Gpr,
            required: needed,
            budget: needed - 1,
        }
    );
}

fn three_uniform_fma() -> sfn::ShaderProgram {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let u: Vec<Src> = (0..3)
        .map(|i| {
            let var = b.uniform(&format!("u{}", i), 1, i, 0);
            b.load_uniform(var, Operand::Const(0))
        })
        .collect();
    b.alu(IrAluOp::Ffma, &[u[0], u[1], u[2]]);
    b.finish()
}

#[test]
fn test_constant_split_instruction_counts() {
    let program = three_uniform_fma();
    let bindings = BindingTable::new();
    for (limit, expected) in [(1u32, 3usize), (2, 2), (3, 1), (4, 1)] {
        let caps = DeviceCaps::default().with_const_read_limit(limit);
        let shader = compile_with_options(&program, &caps, &bindings, no_dummies()).unwrap();
        // ceil(K / L) with K = 3 constant lines
        assert_eq!(alu_count(&shader.instructions), expected, "limit {}", limit);
        assert_eq!(expected, (3 + limit as usize - 1) / limit as usize);

        let alus: Vec<_> = shader.instructions.iter().filter_map(|i| i.as_alu()).collect();
        let last = alus.last().unwrap();
        assert_eq!(last.op, AluOp::MULADD_IEEE);
        assert!(last.constant_values(&shader.pool).len() <= limit as usize);
        // every copied line feeds the final instruction
        for mov in &alus[..alus.len() - 1] {
            assert_eq!(mov.op, AluOp::MOV);
            let temp = mov.dest.unwrap().value;
            assert!(last.srcs.iter().any(|s| s.chans.iter().any(|c| c.value == temp)));
        }
    }
}

/// `ffma` over three vec4 UBO reads starting at the given byte offsets.
fn ubo_fma(offsets: [u32; 3]) -> sfn::ShaderProgram {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let srcs: Vec<Src> = offsets
        .iter()
        .map(|&o| b.load_ubo(4, Operand::Const(0), Operand::Const(o)))
        .collect();
    b.alu(IrAluOp::Ffma, &srcs);
    b.finish()
}

#[test]
fn test_split_count_multichannel_lines() {
    let mut bindings = BindingTable::new();
    bindings.bind_range(BindingSpace::UniformBuffer, 1);
    let caps = DeviceCaps::default().with_const_read_limit(2);
    // (offsets, K): unaligned reads straddle two constant lines
    let cases = [
        ([0, 16, 32], 3usize),
        ([4, 20, 36], 4),
        ([4, 36, 64], 5),
        ([4, 36, 68], 6),
    ];
    for (offsets, k) in cases {
        let shader = compile_with_options(&ubo_fma(offsets), &caps, &bindings, no_dummies()).unwrap();
        let alus: Vec<_> = shader.instructions.iter().filter_map(|i| i.as_alu()).collect();
        assert_eq!(alus.len(), (k + 1) / 2, "K = {}", k);
        assert_eq!(alus.last().unwrap().op, AluOp::MULADD_IEEE);
        let lines: usize = alus.iter().map(|a| a.constant_values(&shader.pool).len()).sum();
        assert_eq!(lines, k, "every line is read exactly once, K = {}", k);
        assert!(alus.iter().all(|a| a.constant_values(&shader.pool).len() <= 2));
    }
}

#[test]
fn test_invalid_width_is_malformed() {
    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let va = b.load_input(a);
    b.instr(
        5,
        InstrKind::Alu {
            op: IrAluOp::Mov,
            srcs: vec![va],
            saturate: false,
        },
    );
    let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
    assert!(matches!(err, CompileError::MalformedProgram { node: Some(_), .. }), "{}", err);

    let mut b = ProgramBuilder::new(ShaderStage::Vertex);
    let a = b.input("a", 4, Semantic::Generic(0), 0);
    let wide = b.output("wide", 8, Semantic::Generic(0), 0);
    let va = b.load_input(a);
    b.store_output(wide, va);
    let err = compile(&b.finish(), &DeviceCaps::default(), &BindingTable::new()).unwrap_err();
    assert!(err.is_malformed());
    assert!(err.to_string().contains("@wide"));
}

#[test]
fn test_texture_binding_out_of_table() {
    let mut b = ProgramBuilder::new(ShaderStage::Fragment);
    let color = b.output("color", 4, Semantic::Color(0), 0);
    let coord = b.load_const_f32(&[0.5, 0.5]);
    let texel = b.tex(TexNode {
        coord: Some(coord),
        ..TexNode::new(TexOp::Tex, 5, TexDim::D2)
    });
    b.store_output(color, texel);
    let program = b.finish();

    let mut bindings = BindingTable::new();
    bindings.bind_range(BindingSpace::Texture, 4);
    let err = compile(&program, &DeviceCaps::default(), &bindings).unwrap_err();
    assert!(err.is_binding_error());
    assert!(matches!(
        err,
        CompileError::BindingError {
            space: BindingSpace::Texture,
            binding: 5,
            ..
        }
    ));
}
