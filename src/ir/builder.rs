//! Programmatic construction of [`ShaderProgram`]s.
//!
//! The builder keeps a stack of open `if`/`loop` bodies, hands out node ids
//! and SSA indices in program order, and infers destination widths the same
//! way the textual parser does.

use super::*;

enum Frame {
    If {
        id: NodeId,
        cond: Src,
        then_body: Vec<Node>,
        in_else: bool,
    },
    Loop {
        id: NodeId,
    },
}

/// Incremental builder for a shader program.
pub struct ProgramBuilder {
    program: ShaderProgram,
    next_node: u32,
    current: Vec<Node>,
    stack: Vec<(Frame, Vec<Node>)>,
}

/// Destination width of an ALU node given its sources.
pub fn alu_dest_components(op: IrAluOp, srcs: &[Src]) -> u8 {
    if op.is_reduction() {
        1
    } else if op.is_vector_constructor() {
        srcs.len() as u8
    } else {
        srcs.iter().map(|s| s.components).max().unwrap_or(1)
    }
}

/// Destination width of a texture node.
pub fn tex_dest_components(tex: &TexNode) -> u8 {
    match tex.op {
        TexOp::Txs => size_components(tex.dim, tex.is_array),
        TexOp::TextureSamples => 1,
        _ => 4,
    }
}

/// Components returned by a size query.
pub fn size_components(dim: TexDim, is_array: bool) -> u8 {
    let base = match dim {
        TexDim::Cube => 2,
        other => other.coord_components(),
    };
    base + is_array as u8
}

impl ProgramBuilder {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            program: ShaderProgram::new(stage),
            next_node: 0,
            current: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn set_geometry(&mut self, max_vertices: u32, input_vertices: u8) -> &mut Self {
        self.program.geometry = GeometryInfo {
            max_vertices,
            input_vertices,
        };
        self
    }

    pub fn set_workgroup_size(&mut self, size: [u32; 3]) -> &mut Self {
        self.program.workgroup_size = size;
        self
    }

    pub fn declare(&mut self, var: Variable) -> VarId {
        let id = VarId(self.program.variables.len() as u32);
        self.program.variables.push(var);
        id
    }

    fn plain_var(name: &str, mode: VarMode, components: u8, semantic: Semantic, location: u32) -> Variable {
        Variable {
            name: name.to_string(),
            mode,
            location,
            semantic,
            components,
            interp: Interpolation::Smooth,
            interp_loc: InterpLocation::Center,
            array_len: 0,
        }
    }

    pub fn input(&mut self, name: &str, components: u8, semantic: Semantic, location: u32) -> VarId {
        self.declare(Self::plain_var(name, VarMode::Input, components, semantic, location))
    }

    pub fn output(&mut self, name: &str, components: u8, semantic: Semantic, location: u32) -> VarId {
        self.declare(Self::plain_var(name, VarMode::Output, components, semantic, location))
    }

    pub fn uniform(&mut self, name: &str, components: u8, location: u32, array_len: u32) -> VarId {
        let mut var = Self::plain_var(name, VarMode::Uniform, components, Semantic::None, location);
        var.array_len = array_len;
        self.declare(var)
    }

    pub fn array(&mut self, name: &str, components: u8, len: u32) -> VarId {
        let mut var = Self::plain_var(name, VarMode::Array, components, Semantic::None, 0);
        var.array_len = len;
        self.declare(var)
    }

    pub fn register(&mut self, name: &str, components: u8) -> RegisterId {
        let id = RegisterId(self.program.registers.len() as u32);
        self.program.registers.push(Register {
            name: name.to_string(),
            components,
        });
        id
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Append an instruction with an SSA destination of `components` width.
    pub fn instr(&mut self, components: u8, kind: InstrKind) -> Src {
        let index = self.program.ssa_count;
        self.program.ssa_count += 1;
        let id = self.node_id();
        self.current.push(Node::Instr(Instr {
            id,
            dest: Some(Dest::Ssa(SsaDef { index, components })),
            kind,
        }));
        Src::ssa(index, components)
    }

    /// Append an instruction defining an explicitly numbered SSA value.
    pub fn instr_at(&mut self, index: u32, components: u8, kind: InstrKind) -> Src {
        self.program.ssa_count = self.program.ssa_count.max(index + 1);
        let id = self.node_id();
        self.current.push(Node::Instr(Instr {
            id,
            dest: Some(Dest::Ssa(SsaDef { index, components })),
            kind,
        }));
        Src::ssa(index, components)
    }

    /// Append an instruction without destination.
    pub fn instr_void(&mut self, kind: InstrKind) -> NodeId {
        let id = self.node_id();
        self.current.push(Node::Instr(Instr {
            id,
            dest: None,
            kind,
        }));
        id
    }

    /// Append an instruction writing a register.
    pub fn instr_to_reg(&mut self, reg: RegisterId, write_mask: u8, kind: InstrKind) -> NodeId {
        let id = self.node_id();
        self.current.push(Node::Instr(Instr {
            id,
            dest: Some(Dest::Register { reg, write_mask }),
            kind,
        }));
        id
    }

    pub fn load_const(&mut self, values: &[u32]) -> Src {
        self.instr(
            values.len() as u8,
            InstrKind::LoadConst {
                values: values.to_vec(),
            },
        )
    }

    pub fn load_const_f32(&mut self, values: &[f32]) -> Src {
        let bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        self.load_const(&bits)
    }

    pub fn alu(&mut self, op: IrAluOp, srcs: &[Src]) -> Src {
        let components = alu_dest_components(op, srcs);
        self.instr(
            components,
            InstrKind::Alu {
                op,
                srcs: srcs.to_vec(),
                saturate: false,
            },
        )
    }

    pub fn alu_sat(&mut self, op: IrAluOp, srcs: &[Src]) -> Src {
        let components = alu_dest_components(op, srcs);
        self.instr(
            components,
            InstrKind::Alu {
                op,
                srcs: srcs.to_vec(),
                saturate: true,
            },
        )
    }

    pub fn alu_to_reg(&mut self, reg: RegisterId, write_mask: u8, op: IrAluOp, srcs: &[Src]) -> NodeId {
        self.instr_to_reg(
            reg,
            write_mask,
            InstrKind::Alu {
                op,
                srcs: srcs.to_vec(),
                saturate: false,
            },
        )
    }

    pub fn load_input(&mut self, var: VarId) -> Src {
        let components = self.program.variables[var.0 as usize].components;
        self.instr(components, InstrKind::LoadInput { var, component: 0 })
    }

    pub fn store_output(&mut self, var: VarId, src: Src) -> NodeId {
        let write_mask = (1u8 << src.components) - 1;
        self.instr_void(InstrKind::StoreOutput {
            var,
            src,
            write_mask,
        })
    }

    pub fn load_uniform(&mut self, var: VarId, index: Operand) -> Src {
        let components = self.program.variables[var.0 as usize].components;
        self.instr(components, InstrKind::LoadUniform { var, index })
    }

    pub fn load_ubo(&mut self, components: u8, buffer: Operand, offset: Operand) -> Src {
        self.instr(components, InstrKind::LoadUbo { buffer, offset })
    }

    pub fn tex(&mut self, tex: TexNode) -> Src {
        let components = tex_dest_components(&tex);
        self.instr(components, InstrKind::Tex(tex))
    }

    pub fn sysval(&mut self, value: SysValue) -> Src {
        self.instr(value.components(), InstrKind::SysValue(value))
    }

    pub fn begin_if(&mut self, cond: Src) {
        let id = self.node_id();
        let body = std::mem::take(&mut self.current);
        self.stack.push((
            Frame::If {
                id,
                cond,
                then_body: Vec::new(),
                in_else: false,
            },
            body,
        ));
    }

    pub fn begin_else(&mut self) {
        if let Some((Frame::If {
            then_body, in_else, ..
        }, _)) = self.stack.last_mut()
        {
            assert!(!*in_else, "else already started");
            *then_body = std::mem::take(&mut self.current);
            *in_else = true;
        } else {
            panic!("begin_else without open if");
        }
    }

    pub fn end_if(&mut self) {
        match self.stack.pop() {
            Some((
                Frame::If {
                    id,
                    cond,
                    then_body,
                    in_else,
                },
                outer,
            )) => {
                let inner = std::mem::replace(&mut self.current, outer);
                let (then_body, else_body) = if in_else {
                    (then_body, inner)
                } else {
                    (inner, Vec::new())
                };
                self.current.push(Node::If {
                    id,
                    cond,
                    then_body,
                    else_body,
                });
            }
            _ => panic!("end_if without open if"),
        }
    }

    pub fn begin_loop(&mut self) {
        let id = self.node_id();
        let body = std::mem::take(&mut self.current);
        self.stack.push((Frame::Loop { id }, body));
    }

    pub fn end_loop(&mut self) {
        match self.stack.pop() {
            Some((Frame::Loop { id }, outer)) => {
                let body = std::mem::replace(&mut self.current, outer);
                self.current.push(Node::Loop { id, body });
            }
            _ => panic!("end_loop without open loop"),
        }
    }

    pub fn jump(&mut self, kind: JumpKind) -> NodeId {
        let id = self.node_id();
        self.current.push(Node::Jump { id, kind });
        id
    }

    pub fn finish(mut self) -> ShaderProgram {
        assert!(self.stack.is_empty(), "unterminated control flow in builder");
        self.program.body = std::mem::take(&mut self.current);
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_if_else() {
        let mut b = ProgramBuilder::new(ShaderStage::Vertex);
        let a = b.input("a", 4, Semantic::Generic(0), 0);
        let r = b.register("r", 4);
        let va = b.load_input(a);
        b.begin_if(va.chan(0));
        b.alu_to_reg(r, 0xf, IrAluOp::Fadd, &[va, va]);
        b.begin_else();
        b.alu_to_reg(r, 0xf, IrAluOp::Fsub, &[va, va]);
        b.end_if();
        let program = b.finish();

        assert_eq!(program.body.len(), 2);
        match &program.body[1] {
            Node::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected if node, got {:?}", other),
        }
        assert_eq!(program.instr_count(), 3);
    }

    #[test]
    fn test_dest_width_inference() {
        let x = Src::ssa(0, 3);
        assert_eq!(alu_dest_components(IrAluOp::Fdot3, &[x, x]), 1);
        assert_eq!(alu_dest_components(IrAluOp::Fadd, &[x, x.chan(0)]), 3);
        assert_eq!(
            alu_dest_components(IrAluOp::Vec2, &[x.chan(0), x.chan(1)]),
            2
        );
        assert_eq!(size_components(TexDim::Cube, true), 3);
    }
}
