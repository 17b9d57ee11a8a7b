//! Textual printer for shader programs; output parses back with [`super::parser`].

use super::*;
use std::fmt::Write;

const CHANNELS: [char; 4] = ['x', 'y', 'z', 'w'];

fn type_name(components: u8) -> String {
    if components == 1 {
        "float".to_string()
    } else {
        format!("vec{}", components)
    }
}

fn semantic_name(semantic: Semantic) -> Option<String> {
    let name = match semantic {
        Semantic::None => return None,
        Semantic::Position => "position".to_string(),
        Semantic::PointSize => "psize".to_string(),
        Semantic::ClipDistance(i) => format!("clipdist {}", i),
        Semantic::Color(i) => format!("color {}", i),
        Semantic::BackColor(i) => format!("bcolor {}", i),
        Semantic::Fog => "fog".to_string(),
        Semantic::Generic(i) => format!("generic {}", i),
        Semantic::TexCoord(i) => format!("texcoord {}", i),
        Semantic::PointCoord => "pcoord".to_string(),
        Semantic::PrimitiveId => "primid".to_string(),
        Semantic::Layer => "layer".to_string(),
        Semantic::ViewportIndex => "viewport".to_string(),
        Semantic::FragDepth => "depth".to_string(),
        Semantic::FragStencil => "stencil".to_string(),
        Semantic::SampleMask => "samplemask".to_string(),
        Semantic::FragData(i) => format!("data {}", i),
    };
    Some(name)
}

fn mask_suffix(mask: u8) -> String {
    (0..4)
        .filter(|c| mask & (1 << c) != 0)
        .map(|c| CHANNELS[c])
        .collect()
}

struct Printer<'a> {
    program: &'a ShaderProgram,
    out: String,
}

impl<'a> Printer<'a> {
    fn src(&self, src: &Src) -> String {
        let (name, width) = match src.source {
            SrcRef::Ssa(index) => (format!("%{}", index), 4),
            SrcRef::Register(reg) => match self.program.register(reg) {
                Some(r) => (format!("${}", r.name), r.components),
                None => (format!("$<{}>", reg.0), 4),
            },
        };

        let identity = src.swizzle[..src.components as usize]
            .iter()
            .enumerate()
            .all(|(i, &c)| i as u8 == c);
        let mut text = name;
        if !identity || src.components != width {
            text.push('.');
            for &c in &src.swizzle[..src.components as usize] {
                text.push(CHANNELS[c as usize & 3]);
            }
        }
        if src.abs {
            text = format!("|{}|", text);
        }
        if src.negate {
            text = format!("-{}", text);
        }
        text
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Const(v) => v.to_string(),
            Operand::Dynamic(src) => self.src(src),
        }
    }

    fn var(&self, var: VarId) -> String {
        match self.program.variable(var) {
            Some(v) => format!("@{}", v.name),
            None => format!("@<{}>", var.0),
        }
    }

    fn dim(dim: TexDim, is_array: bool, is_shadow: bool) -> String {
        let mut s = dim.name().to_string();
        if is_array {
            s.push_str(".array");
        }
        if is_shadow {
            s.push_str(".shadow");
        }
        s
    }

    fn kind(&self, kind: &InstrKind) -> String {
        match kind {
            InstrKind::LoadConst { values } => {
                let vals: Vec<String> = values.iter().map(|v| format!("0x{:x}", v)).collect();
                format!("const {}", vals.join(", "))
            }
            InstrKind::Alu { op, srcs, saturate } => {
                let srcs: Vec<String> = srcs.iter().map(|s| self.src(s)).collect();
                let sat = if *saturate { ".sat" } else { "" };
                format!("{}{} {}", op.name(), sat, srcs.join(", "))
            }
            InstrKind::LoadInput { var, component } => {
                if *component == 0 {
                    format!("load_input {}", self.var(*var))
                } else {
                    format!("load_input {}, {}", self.var(*var), component)
                }
            }
            InstrKind::LoadPerVertexInput { var, vertex, .. } => {
                format!("load_per_vertex_input {}, {}", self.var(*var), self.operand(vertex))
            }
            InstrKind::StoreOutput { var, src, write_mask } => {
                format!("store_output {}.{}, {}", self.var(*var), mask_suffix(*write_mask), self.src(src))
            }
            InstrKind::LoadUniform { var, index } => {
                format!("load_uniform {}, {}", self.var(*var), self.operand(index))
            }
            InstrKind::LoadUbo { buffer, offset } => {
                format!("load_ubo {}, {}", self.operand(buffer), self.operand(offset))
            }
            InstrKind::Tex(tex) => {
                let mut s = format!(
                    "{} {}, {}",
                    tex.op.name(),
                    tex.binding,
                    Self::dim(tex.dim, tex.is_array, tex.is_shadow)
                );
                let named = [
                    ("coord", &tex.coord),
                    ("lod", &tex.lod),
                    ("bias", &tex.bias),
                    ("cmp", &tex.comparator),
                    ("ddx", &tex.ddx),
                    ("ddy", &tex.ddy),
                    ("ms", &tex.ms_index),
                ];
                for (key, src) in named {
                    if let Some(src) = src {
                        let _ = write!(s, ", {} {}", key, self.src(src));
                    }
                }
                if let Some([x, y, z]) = tex.offset {
                    let _ = write!(s, ", offset {} {} {}", x, y, z);
                }
                if tex.op == TexOp::Tg4 {
                    let _ = write!(s, ", comp {}", tex.component);
                }
                s
            }
            InstrKind::SsboLoad { binding, offset } => {
                format!("ssbo_load {}, {}", binding, self.operand(offset))
            }
            InstrKind::SsboStore {
                binding,
                offset,
                value,
                ..
            } => format!("ssbo_store {}, {}, {}", binding, self.operand(offset), self.src(value)),
            InstrKind::SsboAtomic {
                op,
                binding,
                offset,
                data,
                compare,
            } => {
                let mut s = format!(
                    "ssbo_atomic.{} {}, {}, {}",
                    op.name(),
                    binding,
                    self.operand(offset),
                    self.src(data)
                );
                if let Some(cmp) = compare {
                    let _ = write!(s, ", {}", self.src(cmp));
                }
                s
            }
            InstrKind::ImageLoad {
                binding,
                dim,
                is_array,
                coord,
            } => format!(
                "image_load {}, {}, {}",
                binding,
                Self::dim(*dim, *is_array, false),
                self.src(coord)
            ),
            InstrKind::ImageStore {
                binding,
                dim,
                is_array,
                coord,
                value,
            } => format!(
                "image_store {}, {}, {}, {}",
                binding,
                Self::dim(*dim, *is_array, false),
                self.src(coord),
                self.src(value)
            ),
            InstrKind::ImageAtomic {
                op,
                binding,
                dim,
                is_array,
                coord,
                data,
                compare,
            } => {
                let mut s = format!(
                    "image_atomic.{} {}, {}, {}, {}",
                    op.name(),
                    binding,
                    Self::dim(*dim, *is_array, false),
                    self.src(coord),
                    self.src(data)
                );
                if let Some(cmp) = compare {
                    let _ = write!(s, ", {}", self.src(cmp));
                }
                s
            }
            InstrKind::ImageSize {
                binding,
                dim,
                is_array,
            } => format!("image_size {}, {}", binding, Self::dim(*dim, *is_array, false)),
            InstrKind::AtomicCounter {
                op,
                binding,
                offset,
                data,
            } => {
                let mut s = format!("atomic_counter.{} {}, {}", op.name(), binding, offset);
                for d in data {
                    let _ = write!(s, ", {}", self.src(d));
                }
                s
            }
            InstrKind::LoadArray { var, index } => {
                format!("load_array {}, {}", self.var(*var), self.operand(index))
            }
            InstrKind::StoreArray {
                var, index, value, ..
            } => format!(
                "store_array {}, {}, {}",
                self.var(*var),
                self.operand(index),
                self.src(value)
            ),
            InstrKind::Discard => "discard".to_string(),
            InstrKind::DiscardIf { cond } => format!("discard_if {}", self.src(cond)),
            InstrKind::SysValue(value) => format!("sysval {}", value.name()),
            InstrKind::EmitVertex { stream } => format!("emit_vertex {}", stream),
            InstrKind::EndPrimitive { stream } => format!("end_primitive {}", stream),
            InstrKind::Barrier => "barrier".to_string(),
            InstrKind::Phi { srcs } => {
                let srcs: Vec<String> = srcs.iter().map(|s| self.src(s)).collect();
                format!("phi {}", srcs.join(", "))
            }
            InstrKind::Call { callee } => format!("call {}", callee),
        }
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn nodes(&mut self, nodes: &[Node], depth: usize) {
        for node in nodes {
            match node {
                Node::Instr(instr) => {
                    let body = self.kind(&instr.kind);
                    let text = match instr.dest {
                        None => body,
                        Some(Dest::Ssa(def)) => {
                            format!("%{}:{} = {}", def.index, type_name(def.components), body)
                        }
                        Some(Dest::Register { reg, write_mask }) => {
                            let name = self
                                .program
                                .register(reg)
                                .map(|r| r.name.clone())
                                .unwrap_or_else(|| "?".to_string());
                            format!("${}.{} = {}", name, mask_suffix(write_mask), body)
                        }
                    };
                    self.line(depth, &text);
                }
                Node::If {
                    cond,
                    then_body,
                    else_body,
                    ..
                } => {
                    let text = format!("if {} {{", self.src(cond));
                    self.line(depth, &text);
                    self.nodes(then_body, depth + 1);
                    if else_body.is_empty() {
                        self.line(depth, "}");
                    } else {
                        self.line(depth, "} else {");
                        self.nodes(else_body, depth + 1);
                        self.line(depth, "}");
                    }
                }
                Node::Loop { body, .. } => {
                    self.line(depth, "loop {");
                    self.nodes(body, depth + 1);
                    self.line(depth, "}");
                }
                Node::Jump { kind, .. } => {
                    let text = match kind {
                        JumpKind::Break => "break",
                        JumpKind::Continue => "continue",
                    };
                    self.line(depth, text);
                }
            }
        }
    }
}

/// Render a program in its textual form.
pub fn print_program(program: &ShaderProgram) -> String {
    let mut printer = Printer {
        program,
        out: String::new(),
    };

    let mut header = format!("shader {}", program.stage);
    match program.stage {
        ShaderStage::Geometry => {
            let _ = write!(
                header,
                " max_vertices {} input_vertices {}",
                program.geometry.max_vertices, program.geometry.input_vertices
            );
        }
        ShaderStage::Compute => {
            let [x, y, z] = program.workgroup_size;
            let _ = write!(header, " workgroup_size {} {} {}", x, y, z);
        }
        _ => {}
    }
    printer.line(0, &header);

    for var in &program.variables {
        let mut line = format!("{} @{} : {}", var.mode.name(), var.name, type_name(var.components));
        if var.array_len > 0 {
            let _ = write!(line, " [{}]", var.array_len);
        }
        if let Some(semantic) = semantic_name(var.semantic) {
            let _ = write!(line, " {}", semantic);
        }
        if var.mode != VarMode::Array {
            let _ = write!(line, " @{}", var.location);
        }
        match var.interp {
            Interpolation::Smooth => {}
            Interpolation::Flat => line.push_str(" flat"),
            Interpolation::NoPerspective => line.push_str(" noperspective"),
        }
        match var.interp_loc {
            InterpLocation::Center => {}
            InterpLocation::Centroid => line.push_str(" centroid"),
            InterpLocation::Sample => line.push_str(" sample"),
        }
        printer.line(0, &line);
    }
    for reg in &program.registers {
        let line = format!("reg ${} : {}", reg.name, type_name(reg.components));
        printer.line(0, &line);
    }

    printer.nodes(&program.body, 0);
    printer.out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printed_program_parses_back() {
        let text = r#"
shader fragment
input @c : vec4 color 0 @0 flat
output @o : vec4 data 0 @0
reg $r : vec4
%0 = load_input @c
if %0.x {
    $r = fmul %0, %0.wzyx
} else {
    $r = mov -|%0|
}
%1 = tex 2, cube.array, coord %0
store_output @o, %1
"#;
        let program = ShaderProgram::parse(text).unwrap();
        let printed = print_program(&program);
        assert!(printed.contains("if %0.x {"));
        assert!(printed.contains("} else {"));
        assert!(printed.contains("tex 2, cube.array, coord %0"));

        let reparsed = ShaderProgram::parse(&printed).unwrap();
        assert_eq!(reparsed.instr_count(), program.instr_count());
        assert_eq!(reparsed.variables, program.variables);
        assert_eq!(print_program(&reparsed), printed);
    }
}
