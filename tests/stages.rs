//! Per-stage compilation of textual programs.

use sfn::core::BindingSpace;
use sfn::target::{ExportKind, Instruction, RatOp};
use sfn::{compile, BindingTable, DeviceCaps, ShaderProgram, ShaderStage};

fn build(source: &str, bindings: &BindingTable) -> sfn::CompiledShader {
    let _ = env_logger::builder().is_test(true).try_init();
    let program = ShaderProgram::parse(source).unwrap();
    compile(&program, &DeviceCaps::default(), bindings).unwrap()
}

#[test]
fn test_vertex_exports_in_port_order() {
    let shader = build(
        r#"
shader vertex
input @a : vec4 generic 0 @0
output @tc : vec4 texcoord 1 @2
output @pos : vec4 position @0
output @col : vec4 color 0 @1
%0 = load_input @a
%1 = fmul %0, %0
store_output @col, %1
store_output @pos, %0
store_output @tc, %0.yxwz
"#,
        &BindingTable::new(),
    );
    let exports: Vec<(ExportKind, u32, bool)> = shader
        .instructions
        .iter()
        .filter_map(|i| i.as_export())
        .map(|e| (e.kind, e.base, e.is_last))
        .collect();
    assert_eq!(
        exports,
        vec![
            (ExportKind::Pos, 60, true),
            (ExportKind::Param, 0, false),
            (ExportKind::Param, 1, true),
        ]
    );
    let sids: Vec<u32> = shader.report.exports.iter().map(|e| e.spi_sid).collect();
    assert_eq!(sids[2], 2);
    assert_eq!(shader.report.export_count(ExportKind::Param), 2);
}

#[test]
fn test_fragment_flat_input_and_discard() {
    let shader = build(
        r#"
shader fragment
input @v : vec4 generic 0 @0 flat
output @color : vec4 color 0 @0
%0 = load_input @v
%1 = flt %0.x, %0.y
discard_if %1
store_output @color, %0
"#,
        &BindingTable::new(),
    );
    assert!(shader.report.uses_kill);
    let listing = shader.listing();
    assert!(listing.contains("INTERP_LOAD_P0"));
    assert!(listing.contains("ALU KILLNE_INT"));
    assert!(!listing.contains("INTERP_XY"));
    assert_eq!(shader.report.export_count(ExportKind::Pixel), 1);
}

#[test]
fn test_geometry_ring_traffic() {
    let shader = build(
        r#"
shader geometry max_vertices 3 input_vertices 3
input @p : vec4 generic 0 @0
output @pos : vec4 position @0
%0 = load_per_vertex_input @p, 0
store_output @pos, %0
emit_vertex 0
%1 = load_per_vertex_input @p, 2
store_output @pos, %1
emit_vertex 0
end_primitive 0
"#,
        &BindingTable::new(),
    );
    assert_eq!(shader.stage, ShaderStage::Geometry);
    assert_eq!(shader.report.ring_item_size, Some(16));
    assert!(shader.report.exports.is_empty());

    let listing = shader.listing();
    assert!(listing.contains("R0.w + 0"));
    assert_eq!(listing.matches("EMIT_VERTEX stream=0").count(), 2);
    assert_eq!(listing.matches("MEM RING0").count(), 2);
    assert!(listing.trim_end().ends_with("CUT_VERTEX stream=0"));
}

#[test]
fn test_compute_storage_store() {
    let mut bindings = BindingTable::new();
    bindings.bind_range(BindingSpace::StorageBuffer, 1);
    let shader = build(
        r#"
shader compute workgroup_size 64 1 1
%0 = sysval local_invocation_id
%1 = const 4
%2 = imul %0.x, %1
ssbo_store 0, %2, %0.x
barrier
"#,
        &bindings,
    );
    assert_eq!(shader.report.reserved_gprs, vec![0, 1]);
    let caps = DeviceCaps::default();
    let store = shader
        .instructions
        .iter()
        .find_map(|i| match i {
            Instruction::Rat(rat) => Some(rat),
            _ => None,
        })
        .unwrap();
    assert_eq!(store.op, RatOp::StoreTyped);
    assert_eq!(store.rat_id, caps.max_images);
    assert_eq!(shader.report.rat_ids, vec![caps.max_images]);
    assert!(shader.listing().trim_end().ends_with("ALU GROUP_BARRIER"));
}

#[test]
fn test_missing_storage_binding_fails() {
    let program = ShaderProgram::parse(
        r#"
shader compute
%0 = const 0
%1 = ssbo_load 3, 0
"#,
    )
    .unwrap();
    let mut bindings = BindingTable::new();
    bindings.bind_range(BindingSpace::StorageBuffer, 2);
    let err = compile(&program, &DeviceCaps::default(), &bindings).unwrap_err();
    assert!(err.is_binding_error());
}
