//! Shader IR (`.sir`) parser implementation.
//!
//! Hand-written recursive descent over the raw text. Statements end at the
//! end of the line; `if`/`loop` bodies are brace-delimited and may span lines.

use super::builder::{alu_dest_components, size_components, tex_dest_components};
use super::*;
use crate::core::{CompileError, CompileResult};
use std::collections::HashMap;

pub fn parse_program(text: &str) -> CompileResult<ShaderProgram> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    builder: ProgramBuilder,

    vars: HashMap<&'a str, VarId>,
    var_components: Vec<u8>,
    regs: HashMap<&'a str, (RegisterId, u8)>,
    ssa_widths: HashMap<u32, u8>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            builder: ProgramBuilder::new(ShaderStage::Vertex),
            vars: HashMap::new(),
            var_components: Vec::new(),
            regs: HashMap::new(),
            ssa_widths: HashMap::new(),
        }
    }

    fn error<T>(&self, reason: impl Into<String>) -> CompileResult<T> {
        Err(CompileError::Parse {
            line: self.line,
            reason: reason.into(),
        })
    }

    fn parse(mut self) -> CompileResult<ShaderProgram> {
        self.skip_whitespace(true);
        self.parse_header()?;

        loop {
            self.skip_whitespace(true);
            if self.is_eof() {
                break;
            }
            match self.peek_identifier() {
                Some(word @ ("input" | "output" | "uniform" | "array")) => {
                    self.read_identifier()?;
                    self.parse_variable(word)?;
                }
                Some("reg") => {
                    self.read_identifier()?;
                    self.parse_register()?;
                }
                _ => self.parse_statement()?,
            }
        }

        Ok(self.builder.finish())
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            if ch == '\n' {
                self.line += 1;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Comment runs to the end of the line; the newline itself is
                // left for the caller when it is significant.
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn at_line_end(&mut self) -> bool {
        self.skip_whitespace(false);
        matches!(self.current_char(), None | Some('\n') | Some('}'))
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(false);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        if !self.try_read(ch) {
            return self.error(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace(false);
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            Some(ch) => return self.error(format!("Expected identifier but found '{}'", ch)),
            None => return self.error("Expected identifier but found EOF"),
        }

        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        Ok(&self.text[start..self.pos])
    }

    fn peek_identifier(&mut self) -> Option<&'a str> {
        let saved = (self.pos, self.line);
        let result = self.read_identifier().ok();
        self.pos = saved.0;
        self.line = saved.1;
        result
    }

    fn read_number(&mut self) -> CompileResult<u32> {
        self.skip_whitespace(false);
        let start = self.pos;
        let is_hex = self.text[self.pos..].starts_with("0x") || self.text[self.pos..].starts_with("0X");
        if is_hex {
            self.advance();
            self.advance();
            while matches!(self.current_char(), Some(ch) if ch.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while matches!(self.current_char(), Some(ch) if ch.is_ascii_digit()) {
                self.advance();
            }
        }

        if start == self.pos || (is_hex && self.pos == start + 2) {
            return self.error("Expected number");
        }

        let number_str = &self.text[start..self.pos];
        let parsed = if is_hex {
            u32::from_str_radix(&number_str[2..], 16)
        } else {
            number_str.parse()
        };
        match parsed {
            Ok(n) => Ok(n),
            Err(e) => self.error(format!("Failed to parse number '{}': {}", number_str, e)),
        }
    }

    /// Immediate for `const`: float if it has a '.' or exponent, else integer.
    fn read_immediate(&mut self) -> CompileResult<u32> {
        self.skip_whitespace(false);
        let start = self.pos;
        if self.text[self.pos..].starts_with("0x") {
            return self.read_number();
        }
        while matches!(self.current_char(), Some(ch) if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.advance();
        }
        let token = &self.text[start..self.pos];
        if token.is_empty() {
            return self.error("Expected immediate");
        }
        if token.contains(['.', 'e', 'E']) {
            match token.parse::<f32>() {
                Ok(v) => Ok(v.to_bits()),
                Err(e) => self.error(format!("Bad float immediate '{}': {}", token, e)),
            }
        } else {
            match token.parse::<i64>() {
                Ok(v) if v >= i32::MIN as i64 && v <= u32::MAX as i64 => Ok(v as u32),
                Ok(_) => self.error(format!("Immediate '{}' out of range", token)),
                Err(e) => self.error(format!("Bad integer immediate '{}': {}", token, e)),
            }
        }
    }

    fn parse_header(&mut self) -> CompileResult<()> {
        match self.read_identifier()? {
            "shader" => {}
            other => return self.error(format!("Expected 'shader' header, found '{}'", other)),
        }
        let stage_name = self.read_identifier()?;
        let stage = match ShaderStage::from_name(stage_name) {
            Some(stage) => stage,
            None => return self.error(format!("Unknown shader stage '{}'", stage_name)),
        };
        self.builder = ProgramBuilder::new(stage);

        let mut geometry = GeometryInfo::default();
        while !self.at_line_end() {
            match self.read_identifier()? {
                "max_vertices" => {
                    geometry.max_vertices = self.read_number()?;
                    self.builder.set_geometry(geometry.max_vertices, geometry.input_vertices);
                }
                "input_vertices" => {
                    geometry.input_vertices = self.read_number()? as u8;
                    self.builder.set_geometry(geometry.max_vertices, geometry.input_vertices);
                }
                "workgroup" | "workgroup_size" => {
                    let size = [self.read_number()?, self.read_number()?, self.read_number()?];
                    self.builder.set_workgroup_size(size);
                }
                other => return self.error(format!("Unknown header attribute '{}'", other)),
            }
        }
        Ok(())
    }

    fn parse_type(&mut self) -> CompileResult<u8> {
        let name = self.read_identifier()?;
        let components = match name {
            "float" | "int" | "uint" | "bool" => 1,
            _ => {
                let digits = name.trim_start_matches(|c: char| c.is_alphabetic());
                match digits.parse::<u8>() {
                    Ok(n @ 1..=4) if name.contains("vec") => n,
                    _ => return self.error(format!("Unknown type '{}'", name)),
                }
            }
        };
        Ok(components)
    }

    fn parse_semantic(&mut self, word: &str) -> CompileResult<Option<Semantic>> {
        let indexed = |p: &mut Self| -> CompileResult<u8> { Ok(p.read_number()? as u8) };
        let semantic = match word {
            "position" => Semantic::Position,
            "psize" => Semantic::PointSize,
            "clipdist" => Semantic::ClipDistance(indexed(self)?),
            "color" => Semantic::Color(indexed(self)?),
            "bcolor" => Semantic::BackColor(indexed(self)?),
            "fog" => Semantic::Fog,
            "generic" => Semantic::Generic(indexed(self)?),
            "texcoord" => Semantic::TexCoord(indexed(self)?),
            "pcoord" => Semantic::PointCoord,
            "primid" => Semantic::PrimitiveId,
            "layer" => Semantic::Layer,
            "viewport" => Semantic::ViewportIndex,
            "depth" => Semantic::FragDepth,
            "stencil" => Semantic::FragStencil,
            "samplemask" => Semantic::SampleMask,
            "data" => Semantic::FragData(indexed(self)?),
            _ => return Ok(None),
        };
        Ok(Some(semantic))
    }

    fn parse_variable(&mut self, mode_word: &str) -> CompileResult<()> {
        let mode = match mode_word {
            "input" => VarMode::Input,
            "output" => VarMode::Output,
            "uniform" => VarMode::Uniform,
            _ => VarMode::Array,
        };
        self.expect('@')?;
        let name = self.read_identifier()?;
        if self.vars.contains_key(name) {
            return self.error(format!("Duplicate variable '@{}'", name));
        }
        self.expect(':')?;
        let components = self.parse_type()?;

        let mut var = Variable {
            name: name.to_string(),
            mode,
            location: 0,
            semantic: Semantic::None,
            components,
            interp: Interpolation::Smooth,
            interp_loc: InterpLocation::Center,
            array_len: 0,
        };

        if self.try_read('[') {
            var.array_len = self.read_number()?;
            self.expect(']')?;
        }
        if mode == VarMode::Array && var.array_len == 0 {
            return self.error(format!("Array '@{}' needs a length", name));
        }

        while !self.at_line_end() {
            if self.try_read('@') {
                var.location = self.read_number()?;
                continue;
            }
            let word = self.read_identifier()?;
            if let Some(semantic) = self.parse_semantic(word)? {
                var.semantic = semantic;
                continue;
            }
            match word {
                "smooth" => var.interp = Interpolation::Smooth,
                "flat" => var.interp = Interpolation::Flat,
                "noperspective" => var.interp = Interpolation::NoPerspective,
                "centroid" => var.interp_loc = InterpLocation::Centroid,
                "sample" => var.interp_loc = InterpLocation::Sample,
                other => return self.error(format!("Unknown variable attribute '{}'", other)),
            }
        }

        let id = self.builder.declare(var);
        self.vars.insert(name, id);
        self.var_components.push(components);
        Ok(())
    }

    fn parse_register(&mut self) -> CompileResult<()> {
        self.expect('$')?;
        let name = self.read_identifier()?;
        if self.regs.contains_key(name) {
            return self.error(format!("Duplicate register '${}'", name));
        }
        self.expect(':')?;
        let components = self.parse_type()?;
        let id = self.builder.register(name, components);
        self.regs.insert(name, (id, components));
        Ok(())
    }

    fn read_var(&mut self) -> CompileResult<VarId> {
        self.expect('@')?;
        let name = self.read_identifier()?;
        match self.vars.get(name) {
            Some(&id) => Ok(id),
            None => self.error(format!("Unknown variable '@{}'", name)),
        }
    }

    fn read_swizzle(&mut self) -> CompileResult<Vec<u8>> {
        let letters = self.read_identifier()?;
        let mut swz = Vec::new();
        for ch in letters.chars() {
            let c = match ch {
                'x' | 'r' => 0,
                'y' | 'g' => 1,
                'z' | 'b' => 2,
                'w' | 'a' => 3,
                _ => return self.error(format!("Bad swizzle '{}'", letters)),
            };
            swz.push(c);
        }
        if swz.is_empty() || swz.len() > 4 {
            return self.error(format!("Bad swizzle '{}'", letters));
        }
        Ok(swz)
    }

    fn parse_src(&mut self) -> CompileResult<Src> {
        self.skip_whitespace(false);
        let negate = self.try_read('-');
        let abs = self.try_read('|');

        let mut src = match self.current_char() {
            Some('%') => {
                self.advance();
                let index = self.read_number()?;
                let width = self.ssa_widths.get(&index).copied().unwrap_or(1);
                Src::ssa(index, width)
            }
            Some('$') => {
                self.advance();
                let name = self.read_identifier()?;
                match self.regs.get(name) {
                    Some(&(id, width)) => Src::reg(id, width),
                    None => return self.error(format!("Unknown register '${}'", name)),
                }
            }
            other => return self.error(format!("Expected source operand, found {:?}", other)),
        };

        if self.current_char() == Some('.') {
            self.advance();
            let swz = self.read_swizzle()?;
            src = src.swizzled(&swz);
        }
        if abs {
            self.expect('|')?;
            src.abs = true;
        }
        src.negate = negate;
        Ok(src)
    }

    fn parse_operand(&mut self) -> CompileResult<Operand> {
        self.skip_whitespace(false);
        match self.current_char() {
            Some(ch) if ch.is_ascii_digit() => Ok(Operand::Const(self.read_number()?)),
            _ => Ok(Operand::Dynamic(self.parse_src()?)),
        }
    }

    fn comma(&mut self) -> CompileResult<()> {
        self.expect(',')
    }

    fn parse_block(&mut self) -> CompileResult<()> {
        self.expect('{')?;
        loop {
            self.skip_whitespace(true);
            if self.current_char() == Some('}') {
                self.advance();
                return Ok(());
            }
            if self.is_eof() {
                return self.error("Unterminated block");
            }
            self.parse_statement()?;
        }
    }

    fn parse_statement(&mut self) -> CompileResult<()> {
        self.skip_whitespace(true);
        match self.current_char() {
            Some('%') | Some('$') => return self.parse_def_statement(),
            _ => {}
        }

        let word = self.read_identifier()?;
        match word {
            "if" => {
                let cond = self.parse_src()?;
                self.builder.begin_if(cond);
                self.parse_block()?;
                let saved = (self.pos, self.line);
                self.skip_whitespace(true);
                if self.peek_identifier() == Some("else") {
                    self.read_identifier()?;
                    self.builder.begin_else();
                    self.parse_block()?;
                } else {
                    self.pos = saved.0;
                    self.line = saved.1;
                }
                self.builder.end_if();
            }
            "loop" => {
                self.builder.begin_loop();
                self.parse_block()?;
                self.builder.end_loop();
            }
            "break" => {
                self.builder.jump(JumpKind::Break);
            }
            "continue" => {
                self.builder.jump(JumpKind::Continue);
            }
            _ => {
                let (kind, _) = self.parse_instr(word, None)?;
                self.builder.instr_void(kind);
            }
        }
        if !self.at_line_end() {
            return self.error(format!("Trailing input after '{}'", word));
        }
        Ok(())
    }

    fn parse_def_statement(&mut self) -> CompileResult<()> {
        if self.current_char() == Some('$') {
            self.advance();
            let name = self.read_identifier()?;
            let (reg, width) = match self.regs.get(name) {
                Some(&entry) => entry,
                None => return self.error(format!("Unknown register '${}'", name)),
            };
            let write_mask = if self.current_char() == Some('.') {
                self.advance();
                self.read_swizzle()?.iter().fold(0u8, |m, c| m | (1 << c))
            } else {
                (1u8 << width) - 1
            };
            self.expect('=')?;
            let word = self.read_identifier()?;
            let (kind, _) = self.parse_instr(word, Some(write_mask.count_ones() as u8))?;
            self.builder.instr_to_reg(reg, write_mask, kind);
        } else {
            self.advance();
            let index = self.read_number()?;
            if self.ssa_widths.contains_key(&index) {
                return self.error(format!("SSA value %{} defined twice", index));
            }
            let explicit = if self.try_read(':') {
                Some(self.parse_type()?)
            } else {
                None
            };
            self.expect('=')?;
            let word = self.read_identifier()?;
            let (kind, inferred) = self.parse_instr(word, explicit)?;
            let components = explicit.or(inferred).unwrap_or(4);
            self.ssa_widths.insert(index, components);
            self.builder.instr_at(index, components, kind);
        }
        if !self.at_line_end() {
            return self.error("Trailing input after instruction");
        }
        Ok(())
    }

    fn parse_dim(&mut self) -> CompileResult<(TexDim, bool, bool)> {
        let name = self.read_identifier_with_digits()?;
        let dim = match TexDim::from_name(name) {
            Some(dim) => dim,
            None => return self.error(format!("Unknown dimension '{}'", name)),
        };
        let mut is_array = false;
        let mut is_shadow = false;
        while self.current_char() == Some('.') {
            self.advance();
            match self.read_identifier()? {
                "array" => is_array = true,
                "shadow" => is_shadow = true,
                other => return self.error(format!("Unknown dimension flag '{}'", other)),
            }
        }
        Ok((dim, is_array, is_shadow))
    }

    /// Dimension names start with a digit ("2d"), so they need their own reader.
    fn read_identifier_with_digits(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace(false);
        let start = self.pos;
        while matches!(self.current_char(), Some(ch) if ch.is_alphanumeric() || ch == '_') {
            self.advance();
        }
        if start == self.pos {
            return self.error("Expected name");
        }
        Ok(&self.text[start..self.pos])
    }

    fn suffix(&mut self) -> CompileResult<Option<&'a str>> {
        if self.current_char() == Some('.') {
            self.advance();
            Ok(Some(self.read_identifier()?))
        } else {
            Ok(None)
        }
    }

    fn parse_tex(&mut self, op: TexOp) -> CompileResult<TexNode> {
        let binding = self.read_number()?;
        self.comma()?;
        let (dim, is_array, is_shadow) = self.parse_dim()?;
        let mut tex = TexNode::new(op, binding, dim);
        tex.is_array = is_array;
        tex.is_shadow = is_shadow;

        while self.try_read(',') {
            let key = self.read_identifier()?;
            match key {
                "coord" => tex.coord = Some(self.parse_src()?),
                "lod" => tex.lod = Some(self.parse_src()?),
                "bias" => tex.bias = Some(self.parse_src()?),
                "cmp" => tex.comparator = Some(self.parse_src()?),
                "ddx" => tex.ddx = Some(self.parse_src()?),
                "ddy" => tex.ddy = Some(self.parse_src()?),
                "ms" => tex.ms_index = Some(self.parse_src()?),
                "comp" => tex.component = self.read_number()? as u8,
                "offset" => {
                    let mut offs = [0i8; 3];
                    for o in offs.iter_mut() {
                        let v = self.read_immediate()? as i32;
                        *o = v as i8;
                    }
                    tex.offset = Some(offs);
                }
                other => return self.error(format!("Unknown texture argument '{}'", other)),
            }
        }
        Ok(tex)
    }

    fn atomic_op(&mut self, suffix: Option<&str>) -> CompileResult<AtomicOp> {
        match suffix.and_then(AtomicOp::from_name) {
            Some(op) => Ok(op),
            None => self.error(format!("Unknown atomic operation {:?}", suffix)),
        }
    }

    /// Parse the operation after `=` (or a void statement). Returns the node
    /// kind and the inferred destination width where one can be derived.
    fn parse_instr(&mut self, word: &'a str, dest_width: Option<u8>) -> CompileResult<(InstrKind, Option<u8>)> {
        let suffix = self.suffix()?;

        if let Some(op) = IrAluOp::from_name(word) {
            let saturate = match suffix {
                None => false,
                Some("sat") => true,
                Some(other) => return self.error(format!("Unknown ALU suffix '{}'", other)),
            };
            let mut srcs = Vec::new();
            if !self.at_line_end() {
                srcs.push(self.parse_src()?);
                while self.try_read(',') {
                    srcs.push(self.parse_src()?);
                }
            }
            if srcs.len() != op.num_srcs() {
                return self.error(format!(
                    "'{}' expects {} sources, got {}",
                    word,
                    op.num_srcs(),
                    srcs.len()
                ));
            }
            let width = alu_dest_components(op, &srcs);
            return Ok((InstrKind::Alu { op, srcs, saturate }, Some(width)));
        }

        let kind = match word {
            "const" => {
                let mut values = vec![self.read_immediate()?];
                while self.try_read(',') {
                    values.push(self.read_immediate()?);
                }
                let width = values.len() as u8;
                return Ok((InstrKind::LoadConst { values }, Some(width)));
            }
            "load_input" => {
                let var = self.read_var()?;
                let component = if self.try_read(',') { self.read_number()? as u8 } else { 0 };
                let width = self.var_components[var.0 as usize].saturating_sub(component).max(1);
                return Ok((InstrKind::LoadInput { var, component }, Some(width)));
            }
            "load_per_vertex_input" => {
                let var = self.read_var()?;
                self.comma()?;
                let vertex = self.parse_operand()?;
                let width = self.var_components[var.0 as usize];
                return Ok((
                    InstrKind::LoadPerVertexInput {
                        var,
                        vertex,
                        component: 0,
                    },
                    Some(width),
                ));
            }
            "store_output" => {
                let var = self.read_var()?;
                let write_mask = if self.current_char() == Some('.') {
                    self.advance();
                    self.read_swizzle()?.iter().fold(0u8, |m, c| m | (1 << c))
                } else {
                    0
                };
                self.comma()?;
                let src = self.parse_src()?;
                let write_mask = if write_mask == 0 {
                    (1u8 << src.components) - 1
                } else {
                    write_mask
                };
                InstrKind::StoreOutput {
                    var,
                    src,
                    write_mask,
                }
            }
            "load_uniform" => {
                let var = self.read_var()?;
                let index = if self.try_read(',') {
                    self.parse_operand()?
                } else {
                    Operand::Const(0)
                };
                let width = self.var_components[var.0 as usize];
                return Ok((InstrKind::LoadUniform { var, index }, Some(width)));
            }
            "load_ubo" => {
                let buffer = self.parse_operand()?;
                self.comma()?;
                let offset = self.parse_operand()?;
                InstrKind::LoadUbo { buffer, offset }
            }
            "ssbo_load" => {
                let binding = self.read_number()?;
                self.comma()?;
                let offset = self.parse_operand()?;
                InstrKind::SsboLoad { binding, offset }
            }
            "ssbo_store" => {
                let binding = self.read_number()?;
                self.comma()?;
                let offset = self.parse_operand()?;
                self.comma()?;
                let value = self.parse_src()?;
                let write_mask = (1u8 << value.components) - 1;
                InstrKind::SsboStore {
                    binding,
                    offset,
                    value,
                    write_mask,
                }
            }
            "ssbo_atomic" => {
                let op = self.atomic_op(suffix)?;
                let binding = self.read_number()?;
                self.comma()?;
                let offset = self.parse_operand()?;
                self.comma()?;
                let data = self.parse_src()?;
                let compare = if self.try_read(',') { Some(self.parse_src()?) } else { None };
                return Ok((
                    InstrKind::SsboAtomic {
                        op,
                        binding,
                        offset,
                        data,
                        compare,
                    },
                    Some(1),
                ));
            }
            "image_load" => {
                let binding = self.read_number()?;
                self.comma()?;
                let (dim, is_array, _) = self.parse_dim()?;
                self.comma()?;
                let coord = self.parse_src()?;
                return Ok((
                    InstrKind::ImageLoad {
                        binding,
                        dim,
                        is_array,
                        coord,
                    },
                    Some(4),
                ));
            }
            "image_store" => {
                let binding = self.read_number()?;
                self.comma()?;
                let (dim, is_array, _) = self.parse_dim()?;
                self.comma()?;
                let coord = self.parse_src()?;
                self.comma()?;
                let value = self.parse_src()?;
                InstrKind::ImageStore {
                    binding,
                    dim,
                    is_array,
                    coord,
                    value,
                }
            }
            "image_atomic" => {
                let op = self.atomic_op(suffix)?;
                let binding = self.read_number()?;
                self.comma()?;
                let (dim, is_array, _) = self.parse_dim()?;
                self.comma()?;
                let coord = self.parse_src()?;
                self.comma()?;
                let data = self.parse_src()?;
                let compare = if self.try_read(',') { Some(self.parse_src()?) } else { None };
                return Ok((
                    InstrKind::ImageAtomic {
                        op,
                        binding,
                        dim,
                        is_array,
                        coord,
                        data,
                        compare,
                    },
                    Some(1),
                ));
            }
            "image_size" => {
                let binding = self.read_number()?;
                self.comma()?;
                let (dim, is_array, _) = self.parse_dim()?;
                return Ok((
                    InstrKind::ImageSize {
                        binding,
                        dim,
                        is_array,
                    },
                    Some(size_components(dim, is_array)),
                ));
            }
            "atomic_counter" => {
                let op = match suffix.and_then(CounterOp::from_name) {
                    Some(op) => op,
                    None => return self.error(format!("Unknown counter operation {:?}", suffix)),
                };
                let binding = self.read_number()?;
                self.comma()?;
                let offset = self.read_number()?;
                let mut data = Vec::new();
                while self.try_read(',') {
                    data.push(self.parse_src()?);
                }
                if data.len() != op.num_data() {
                    return self.error(format!(
                        "atomic_counter.{} expects {} data operands",
                        op.name(),
                        op.num_data()
                    ));
                }
                return Ok((
                    InstrKind::AtomicCounter {
                        op,
                        binding,
                        offset,
                        data,
                    },
                    Some(1),
                ));
            }
            "load_array" => {
                let var = self.read_var()?;
                self.comma()?;
                let index = self.parse_operand()?;
                let width = self.var_components[var.0 as usize];
                return Ok((InstrKind::LoadArray { var, index }, Some(width)));
            }
            "store_array" => {
                let var = self.read_var()?;
                self.comma()?;
                let index = self.parse_operand()?;
                self.comma()?;
                let value = self.parse_src()?;
                let write_mask = (1u8 << value.components) - 1;
                InstrKind::StoreArray {
                    var,
                    index,
                    value,
                    write_mask,
                }
            }
            "discard" => InstrKind::Discard,
            "discard_if" => InstrKind::DiscardIf {
                cond: self.parse_src()?,
            },
            "sysval" => {
                let name = self.read_identifier()?;
                match SysValue::from_name(name) {
                    Some(value) => return Ok((InstrKind::SysValue(value), Some(value.components()))),
                    None => return self.error(format!("Unknown system value '{}'", name)),
                }
            }
            "emit_vertex" => InstrKind::EmitVertex {
                stream: self.read_number()? as u8,
            },
            "end_primitive" => InstrKind::EndPrimitive {
                stream: self.read_number()? as u8,
            },
            "barrier" => InstrKind::Barrier,
            "phi" => {
                let mut srcs = vec![self.parse_src()?];
                while self.try_read(',') {
                    srcs.push(self.parse_src()?);
                }
                let width = srcs[0].components;
                return Ok((InstrKind::Phi { srcs }, Some(width)));
            }
            "call" => InstrKind::Call {
                callee: self.read_identifier()?.to_string(),
            },
            other => match TexOp::from_name(other) {
                Some(op) => {
                    let tex = self.parse_tex(op)?;
                    let width = tex_dest_components(&tex);
                    return Ok((InstrKind::Tex(tex), Some(width)));
                }
                None => return self.error(format!("Unknown operation '{}'", other)),
            },
        };
        Ok((kind, dest_width))
    }
}
