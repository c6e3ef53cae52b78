//! Assembler for the [`gcn`](crate::isa::gcn) instruction set.
//!
//! ```text
//! .kernel scale
//! .uav 0, s8
//!     v_lshlrev_b32 v1, 2, v0
//!     buffer_load_dword v2, v1, s[8:11], 0
//!     v_mul_lo_u32 v2, v2, 3
//!     buffer_store_dword v2, v1, s[8:11], 0
//!     s_endpgm
//! ```

mod lex;

use std::collections::HashMap;
use std::ops::Range;

use lex::{LexError, Token};
use thiserror::Error;

use crate::emu::{sreg, LaunchDescriptor, UserElement};
use crate::isa::gcn::{Format, Inst, Opcode, LITERAL, VGPR_BASE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    byte: usize,
    line: usize,
    col: usize,
}

impl SourceLocation {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn col(&self) -> usize {
        self.col
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}:{} (byte {})", self.line, self.col, self.byte)
    }
}

#[derive(Error, Debug)]
pub enum AsmError {
    #[error("Unexpected token \"{0}\" at {1}")]
    UnexpectedToken(String, SourceLocation),
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("Lex error \"{0}\" at {1}")]
    LexError(LexError, SourceLocation),
    #[error("Unknown token \"{0}\" at {1}")]
    UnknownToken(String, SourceLocation),
    #[error("Unknown instruction \"{0}\" at {1}")]
    UnknownMnemonic(String, SourceLocation),
    #[error("Unknown directive \".{0}\" at {1}")]
    UnknownDirective(String, SourceLocation),
    #[error("{0} takes {1} operands, got {2} at {3}")]
    OperandCount(&'static str, &'static str, usize, SourceLocation),
    #[error("Expected {0} at {1}")]
    Expected(&'static str, SourceLocation),
    #[error("Immediate {0} out of range at {1}")]
    ImmediateOutOfRange(i64, SourceLocation),
    #[error("Register out of range at {0}")]
    RegisterOutOfRange(SourceLocation),
    #[error("Second literal operand at {0}")]
    MultipleLiterals(SourceLocation),
    #[error("Label \"{0}\" defined twice at {1}")]
    DuplicateLabel(String, SourceLocation),
    #[error("Undefined label \"{0}\" at {1}")]
    UndefinedLabel(String, SourceLocation),
    #[error("Branch to \"{0}\" out of range at {1}")]
    BranchOutOfRange(String, SourceLocation),
}

type AsmResult<T> = Result<T, AsmError>;

type TokenPos = Range<usize>;

/// Assembled code plus the resource declarations of its directives.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBinary {
    pub name: Option<String>,
    pub code: Vec<u8>,
    pub vgpr_count: u32,
    pub sgpr_count: u32,
    pub lds_size: u32,
    pub wg_id_sgpr: Option<u32>,
    pub user_elements: Vec<UserElement>,
}

impl KernelBinary {
    /// A compute launch of this kernel. Sizes still need to be set.
    pub fn launch(&self) -> LaunchDescriptor {
        let mut desc = LaunchDescriptor::new(self.code.clone())
            .vgprs(self.vgpr_count)
            .local_memory(self.lds_size);
        desc.sgpr_count = self.sgpr_count;
        desc.wg_id_sgpr = self.wg_id_sgpr;
        desc.user_elements = self.user_elements.clone();
        desc
    }

    /// Slots of every UAV the kernel expects in registers.
    pub fn uav_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.user_elements.iter().filter_map(|e| match *e {
            UserElement::Uav { slot, .. } => Some(slot),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand<'a> {
    Sgpr(u32),
    SgprRange(u32, u32),
    Vgpr(u32),
    Special(u32),
    Int(i64),
    Float(f32),
    Label(&'a str),
}

/// An encoded instruction whose branch offset may still name a label.
struct Pending<'a> {
    inst: Inst,
    pc: u32,
    target: Option<(&'a str, SourceLocation)>,
}

const INLINE_FLOATS: [f32; 8] = [0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0];

struct Parser<'a> {
    src: &'a str,
    inner: std::iter::Peekable<logos::SpannedIter<'a, Token<'a>>>,
    pc: u32,
    labels: HashMap<&'a str, u32>,
    pending: Vec<Pending<'a>>,
    kernel: KernelBinary,
    max_vgpr: Option<u32>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        use logos::Logos;
        Self {
            src,
            inner: Token::lexer(src).spanned().peekable(),
            pc: 0,
            labels: HashMap::new(),
            pending: Vec::new(),
            kernel: KernelBinary {
                name: None,
                code: Vec::new(),
                vgpr_count: 0,
                sgpr_count: sreg::GENERAL_COUNT,
                lds_size: 0,
                wg_id_sgpr: None,
                user_elements: Vec::new(),
            },
            max_vgpr: None,
        }
    }

    fn locate(&self, span: Range<usize>) -> SourceLocation {
        let text = self.src.as_bytes();

        let mut line = 1;
        let mut col = 0;

        let end = span.start.min(text.len());

        for &c in &text[..end] {
            match c {
                b'\n' => {
                    line += 1;
                    col = 0;
                }
                b'\t' => {
                    col = (col / 4) * 4 + 4;
                }
                _ => col += 1,
            }
        }

        SourceLocation {
            byte: span.start,
            line,
            col: col + 1,
        }
    }

    fn unexpected(&self, (token, pos): (Token, TokenPos)) -> AsmError {
        AsmError::UnexpectedToken(token.to_string(), self.locate(pos))
    }

    fn get(&mut self) -> AsmResult<Option<(Token<'a>, TokenPos)>> {
        match self.inner.peek().cloned() {
            Some((Ok(tok), pos)) => Ok(Some((tok, pos))),
            Some((Err(LexError::Unknown), pos)) => Err(AsmError::UnknownToken(
                self.src[pos.clone()].to_string(),
                self.locate(pos),
            )),
            Some((Err(err), pos)) => Err(AsmError::LexError(err, self.locate(pos))),
            None => Ok(None),
        }
    }

    fn skip(&mut self) {
        self.inner.next();
    }

    fn consume(&mut self, token: Token) -> AsmResult<()> {
        let head = self.must_pop()?;
        if head.0 == token {
            Ok(())
        } else {
            Err(self.unexpected(head))
        }
    }

    fn consume_match(&mut self, token: Token) -> AsmResult<bool> {
        let Some(head) = self.get()? else {
            return Ok(false);
        };
        if head.0 == token {
            self.skip();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn pop(&mut self) -> AsmResult<Option<(Token<'a>, TokenPos)>> {
        let head = self.get()?;
        self.skip();
        Ok(head)
    }

    fn must_pop(&mut self) -> AsmResult<(Token<'a>, TokenPos)> {
        self.pop()?.ok_or(AsmError::UnexpectedEof)
    }

    fn parse_int(&mut self) -> AsmResult<(i64, SourceLocation)> {
        let t = self.must_pop()?;
        match t.0 {
            Token::Integer(i) => Ok((i, self.locate(t.1))),
            _ => Err(self.unexpected(t)),
        }
    }

    fn parse_u32(&mut self) -> AsmResult<u32> {
        let (i, loc) = self.parse_int()?;
        u32::try_from(i).map_err(|_| AsmError::ImmediateOutOfRange(i, loc))
    }

    fn parse_sgpr(&mut self) -> AsmResult<u32> {
        let t = self.must_pop()?;
        match t.0 {
            Token::Sgpr(r) | Token::SgprRange((r, _)) if r < sreg::GENERAL_COUNT => Ok(r),
            Token::Sgpr(_) | Token::SgprRange(_) => {
                Err(AsmError::RegisterOutOfRange(self.locate(t.1)))
            }
            _ => Err(self.unexpected(t)),
        }
    }

    fn parse_directive(&mut self, name: &'a str, pos: TokenPos) -> AsmResult<()> {
        match name {
            "kernel" => {
                let t = self.must_pop()?;
                let Token::Identifier(ident) = t.0 else {
                    return Err(self.unexpected(t));
                };
                self.kernel.name = Some(ident.to_string());
            }
            "vgprs" => self.kernel.vgpr_count = self.parse_u32()?,
            "sgprs" => self.kernel.sgpr_count = self.parse_u32()?,
            "lds" => self.kernel.lds_size = self.parse_u32()?,
            "wg_id" => self.kernel.wg_id_sgpr = Some(self.parse_sgpr()?),
            "uav" | "const_buffer" => {
                let slot = self.parse_u32()?;
                self.consume(Token::Comma)?;
                let sreg = self.parse_sgpr()?;
                self.kernel.user_elements.push(if name == "uav" {
                    UserElement::Uav { slot, sreg }
                } else {
                    UserElement::ConstBuffer { slot, sreg }
                });
            }
            "uav_table" | "const_buffer_table" | "resource_table" | "vertex_buffer_table" => {
                let sreg = self.parse_sgpr()?;
                self.kernel.user_elements.push(match name {
                    "uav_table" => UserElement::UavTable { sreg },
                    "const_buffer_table" => UserElement::ConstBufferTable { sreg },
                    "resource_table" => UserElement::ResourceTable { sreg },
                    _ => UserElement::VertexBufferTable { sreg },
                });
            }
            _ => {
                return Err(AsmError::UnknownDirective(
                    name.to_string(),
                    self.locate(pos),
                ))
            }
        }
        Ok(())
    }

    fn parse_operand(&mut self) -> AsmResult<(Operand<'a>, SourceLocation)> {
        let t = self.must_pop()?;
        let operand = match t.0 {
            Token::Sgpr(r) => Operand::Sgpr(r),
            Token::SgprRange((first, last)) => Operand::SgprRange(first, last),
            Token::Vgpr(r) => Operand::Vgpr(r),
            Token::Vcc => Operand::Special(sreg::VCC_LO),
            Token::Exec => Operand::Special(sreg::EXEC_LO),
            Token::Vccz => Operand::Special(sreg::VCCZ),
            Token::Execz => Operand::Special(sreg::EXECZ),
            Token::Scc => Operand::Special(sreg::SCC),
            Token::M0 => Operand::Special(sreg::M0),
            Token::Integer(i) => Operand::Int(i),
            Token::Float(f) => Operand::Float(f),
            Token::Identifier(label) => Operand::Label(label),
            _ => return Err(self.unexpected(t)),
        };
        Ok((operand, self.locate(t.1)))
    }

    fn parse_operands(&mut self) -> AsmResult<Vec<(Operand<'a>, SourceLocation)>> {
        let mut operands = vec![self.parse_operand()?];
        while self.consume_match(Token::Comma)? {
            operands.push(self.parse_operand()?);
        }
        Ok(operands)
    }

    fn note_vgpr(&mut self, r: u32) {
        self.max_vgpr = Some(self.max_vgpr.map_or(r, |m| m.max(r)));
    }

    fn encode_reg(&mut self, (operand, loc): &(Operand<'a>, SourceLocation)) -> AsmResult<u16> {
        match *operand {
            Operand::Sgpr(r) | Operand::SgprRange(r, _) if r < sreg::GENERAL_COUNT => Ok(r as u16),
            Operand::Vgpr(r) if r < 256 => {
                self.note_vgpr(r);
                Ok(VGPR_BASE + r as u16)
            }
            Operand::Special(id) => Ok(id as u16),
            Operand::Sgpr(_) | Operand::SgprRange(..) | Operand::Vgpr(_) => {
                Err(AsmError::RegisterOutOfRange(*loc))
            }
            _ => Err(AsmError::Expected("register", *loc)),
        }
    }

    fn encode_vgpr(&mut self, operand: &(Operand<'a>, SourceLocation)) -> AsmResult<u16> {
        match operand.0 {
            Operand::Vgpr(_) => self.encode_reg(operand),
            _ => Err(AsmError::Expected("vector register", operand.1)),
        }
    }

    fn encode_sgpr(&mut self, operand: &(Operand<'a>, SourceLocation)) -> AsmResult<u16> {
        match operand.0 {
            Operand::Sgpr(_) | Operand::SgprRange(..) => self.encode_reg(operand),
            _ => Err(AsmError::Expected("scalar register", operand.1)),
        }
    }

    /// Encodes a source operand, storing a literal into `literal` when the
    /// value has no inline form.
    fn encode_src(
        &mut self,
        operand: &(Operand<'a>, SourceLocation),
        literal: &mut Option<u32>,
    ) -> AsmResult<u16> {
        let (value, loc) = operand;
        let lit = match *value {
            Operand::Int(i @ 0..=64) => return Ok(128 + i as u16),
            Operand::Int(i @ -16..=-1) => return Ok(192 + (-i) as u16),
            Operand::Int(i) if (i32::MIN as i64..=u32::MAX as i64).contains(&i) => i as u32,
            Operand::Int(i) => return Err(AsmError::ImmediateOutOfRange(i, *loc)),
            Operand::Float(f) => match INLINE_FLOATS.iter().position(|&c| c == f) {
                Some(idx) => return Ok(240 + idx as u16),
                None => f.to_bits(),
            },
            _ => return self.encode_reg(operand),
        };
        match *literal {
            Some(prev) if prev != lit => Err(AsmError::MultipleLiterals(*loc)),
            _ => {
                *literal = Some(lit);
                Ok(LITERAL)
            }
        }
    }

    fn encode_offset(&self, operand: Option<&(Operand<'a>, SourceLocation)>, max: i64) -> AsmResult<u32> {
        match operand {
            None => Ok(0),
            Some((Operand::Int(i), loc)) => {
                if (0..=max).contains(i) {
                    Ok(*i as u32)
                } else {
                    Err(AsmError::ImmediateOutOfRange(*i, *loc))
                }
            }
            Some((_, loc)) => Err(AsmError::Expected("immediate offset", *loc)),
        }
    }

    fn parse_instruction(&mut self, mnemonic: &'a str, pos: TokenPos) -> AsmResult<()> {
        let loc = self.locate(pos);
        let op = Opcode::from_name(mnemonic)
            .ok_or_else(|| AsmError::UnknownMnemonic(mnemonic.to_string(), loc))?;
        let format = op.format();
        let (min, max, expected) = match format {
            Format::Sopp => return self.parse_sopp(op),
            Format::Sop1 | Format::Vop1 | Format::Sopc | Format::Exp => (2, 2, "2"),
            Format::Sop2 => (3, 3, "3"),
            Format::Vop2 if op == Opcode::VCndmaskB32 => (3, 4, "3 or 4"),
            Format::Vop2 => (3, 3, "3"),
            Format::Vopc => (2, 3, "2 or 3"),
            Format::Smem | Format::Ds => (2, 3, "2 or 3"),
            Format::Mubuf => (3, 4, "3 or 4"),
        };
        let mut ops = self.parse_operands()?;
        if ops.len() < min || ops.len() > max {
            return Err(AsmError::OperandCount(op.name(), expected, ops.len(), loc));
        }

        // Optional destinations and carry-ins that are implied by the opcode.
        if format == Format::Vopc && ops.len() == 3 {
            match ops[0].0 {
                Operand::Special(sreg::VCC_LO | sreg::EXEC_LO) => {
                    ops.remove(0);
                }
                _ => return Err(AsmError::Expected("vcc or exec", ops[0].1)),
            }
        }
        if op == Opcode::VCndmaskB32 && ops.len() == 4 {
            if ops[3].0 != Operand::Special(sreg::VCC_LO) {
                return Err(AsmError::Expected("vcc", ops[3].1));
            }
            ops.pop();
        }

        let mut literal = None;
        let inst = match format {
            Format::Sop1 | Format::Vop1 => {
                let dst = match op {
                    Opcode::VMovB32 => self.encode_vgpr(&ops[0])?,
                    _ => self.encode_reg(&ops[0])?,
                };
                let src0 = self.encode_src(&ops[1], &mut literal)?;
                Inst::new(op, dst, src0, 0)
            }
            Format::Sop2 | Format::Vop2 => {
                let dst = if format == Format::Vop2 {
                    self.encode_vgpr(&ops[0])?
                } else {
                    self.encode_reg(&ops[0])?
                };
                let src0 = self.encode_src(&ops[1], &mut literal)?;
                let src1 = self.encode_src(&ops[2], &mut literal)?;
                Inst::new(op, dst, src0, src1)
            }
            Format::Sopc | Format::Vopc => {
                let src0 = self.encode_src(&ops[0], &mut literal)?;
                let src1 = self.encode_src(&ops[1], &mut literal)?;
                Inst::new(op, 0, src0, src1)
            }
            Format::Smem => {
                let dst = self.encode_sgpr(&ops[0])?;
                let base = self.encode_sgpr(&ops[1])?;
                let offset = self.encode_offset(ops.get(2), u16::MAX as i64)?;
                Inst::new(op, dst, base, offset as u16)
            }
            Format::Mubuf => {
                let data = self.encode_vgpr(&ops[0])?;
                let addr = self.encode_vgpr(&ops[1])?;
                let desc = self.encode_sgpr(&ops[2])?;
                let offset = self.encode_offset(ops.get(3), u32::MAX as i64)?;
                Inst::new(op, data, addr, desc).with_literal(offset)
            }
            Format::Ds => {
                let offset = self.encode_offset(ops.get(2), u32::MAX as i64)?;
                let first = self.encode_vgpr(&ops[0])?;
                let second = self.encode_vgpr(&ops[1])?;
                let inst = match op {
                    Opcode::DsReadB32 => Inst::new(op, first, second, 0),
                    _ => Inst::new(op, 0, first, second),
                };
                inst.with_literal(offset)
            }
            Format::Exp => {
                let desc = self.encode_sgpr(&ops[0])?;
                let src = self.encode_vgpr(&ops[1])?;
                Inst::new(op, 0, src, desc)
            }
            Format::Sopp => unreachable!("sopp operands are parsed by parse_sopp"),
        };
        let inst = match literal {
            Some(value) => inst.with_literal(value),
            None => inst,
        };
        self.emit(inst, None);
        Ok(())
    }

    fn parse_sopp(&mut self, op: Opcode) -> AsmResult<()> {
        let inst = Inst::new(op, 0, 0, 0);
        match op {
            Opcode::SEndpgm | Opcode::SBarrier => self.emit(inst, None),
            Opcode::SNop | Opcode::SWaitcnt => {
                let imm = match self.get()? {
                    Some((Token::Integer(_), _)) => {
                        let (i, loc) = self.parse_int()?;
                        u16::try_from(i).map_err(|_| AsmError::ImmediateOutOfRange(i, loc))?
                    }
                    _ => 0,
                };
                self.emit(Inst::new(op, 0, imm, 0), None);
            }
            _ => match self.parse_operand()? {
                (Operand::Label(label), at) => self.emit(inst, Some((label, at))),
                (Operand::Int(i), at) => {
                    let simm = i16::try_from(i).map_err(|_| AsmError::ImmediateOutOfRange(i, at))?;
                    self.emit(Inst::new(op, 0, simm as u16, 0), None);
                }
                (_, at) => return Err(AsmError::Expected("label or offset", at)),
            },
        }
        Ok(())
    }

    fn emit(&mut self, inst: Inst, target: Option<(&'a str, SourceLocation)>) {
        let pc = self.pc;
        self.pc += inst.size();
        self.pending.push(Pending { inst, pc, target });
    }

    fn parse_statement(&mut self) -> AsmResult<()> {
        let t = self.must_pop()?;
        match t.0 {
            Token::Directive(name) => self.parse_directive(name, t.1),
            Token::Identifier(ident) => {
                if self.consume_match(Token::Colon)? {
                    let loc = self.locate(t.1);
                    if self.labels.insert(ident, self.pc).is_some() {
                        return Err(AsmError::DuplicateLabel(ident.to_string(), loc));
                    }
                    Ok(())
                } else {
                    self.parse_instruction(ident, t.1)
                }
            }
            _ => Err(self.unexpected(t)),
        }
    }

    /// Resolves branch labels to word offsets and encodes the program.
    fn finish(mut self) -> AsmResult<KernelBinary> {
        let mut code = Vec::with_capacity(self.pc as usize);
        for Pending { mut inst, pc, target } in std::mem::take(&mut self.pending) {
            if let Some((label, loc)) = target {
                let &dest = self
                    .labels
                    .get(label)
                    .ok_or_else(|| AsmError::UndefinedLabel(label.to_string(), loc))?;
                let delta = (dest as i64 - (pc + inst.size()) as i64) / 4;
                let simm = i16::try_from(delta)
                    .map_err(|_| AsmError::BranchOutOfRange(label.to_string(), loc))?;
                inst.src0 = simm as u16;
            }
            inst.encode(&mut code);
        }
        let mut kernel = self.kernel;
        kernel.code = code;
        if kernel.vgpr_count == 0 {
            kernel.vgpr_count = self.max_vgpr.map_or(1, |m| m + 1);
        }
        Ok(kernel)
    }

    fn parse_program(mut self) -> AsmResult<KernelBinary> {
        while self.get()?.is_some() {
            self.parse_statement()?;
        }
        self.finish()
    }
}

pub fn assemble(src: &str) -> Result<KernelBinary, AsmError> {
    Parser::new(src).parse_program()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::gcn::WORD_SIZE;

    fn decode_all(code: &[u8]) -> Vec<Inst> {
        let mut pc = 0;
        let mut out = Vec::new();
        while (pc as usize) < code.len() {
            let inst = Inst::decode(code, pc).unwrap();
            pc += inst.size();
            out.push(inst);
        }
        out
    }

    #[test]
    fn encodes_operands() {
        let kernel = assemble(
            "v_add_u32 v1, v0, 5\n\
             v_add_u32 v2, v0, 1000\n\
             v_mul_f32 v3, v2, -0.5\n\
             s_mov_b64 exec, -1",
        )
        .unwrap();
        let insts = decode_all(&kernel.code);
        assert_eq!(insts[0], Inst::new(Opcode::VAddU32, VGPR_BASE + 1, VGPR_BASE, 133));
        assert_eq!(
            insts[1],
            Inst::new(Opcode::VAddU32, VGPR_BASE + 2, VGPR_BASE, LITERAL).with_literal(1000)
        );
        assert_eq!(insts[2].src1, 241);
        assert_eq!(insts[3], Inst::new(Opcode::SMovB64, sreg::EXEC_LO as u16, 193, 0));
        assert_eq!(kernel.vgpr_count, 4);
    }

    #[test]
    fn resolves_labels_both_ways() {
        let kernel = assemble(
            "top:\n\
             s_cbranch_scc1 done\n\
             v_mov_b32 v0, 1000\n\
             s_branch top\n\
             done:\n\
             s_endpgm",
        )
        .unwrap();
        let insts = decode_all(&kernel.code);
        // scc1 at 0 (8 bytes), mov at 8 (12 bytes), branch at 20, done at 28
        assert_eq!(insts[0].simm16(), ((28 - WORD_SIZE as i32) / 4) as i16);
        assert_eq!(insts[2].simm16(), -7);
    }

    #[test]
    fn directives() {
        let kernel = assemble(
            ".kernel copy\n\
             .vgprs 8\n\
             .lds 256\n\
             .wg_id s12\n\
             .uav 1, s[4:7]\n\
             .const_buffer_table s2\n\
             s_endpgm",
        )
        .unwrap();
        assert_eq!(kernel.name.as_deref(), Some("copy"));
        assert_eq!(kernel.vgpr_count, 8);
        assert_eq!(kernel.lds_size, 256);
        assert_eq!(kernel.wg_id_sgpr, Some(12));
        assert_eq!(
            kernel.user_elements,
            vec![
                UserElement::Uav { slot: 1, sreg: 4 },
                UserElement::ConstBufferTable { sreg: 2 },
            ]
        );
        assert_eq!(kernel.uav_slots().collect::<Vec<_>>(), vec![1]);
        let desc = kernel.launch();
        assert_eq!(desc.local_memory_size, 256);
        assert_eq!(desc.wg_id_sgpr, Some(12));
    }

    #[test]
    fn optional_operands() {
        let kernel = assemble(
            "v_cmp_lt_u32 vcc, v0, 3\n\
             v_cmpx_gt_u32 v0, 3\n\
             v_cndmask_b32 v1, 0, 1, vcc\n\
             buffer_store_dword v1, v0, s[4:7]\n\
             ds_read_b32 v2, v0\n\
             s_waitcnt\n\
             s_nop 3",
        )
        .unwrap();
        let insts = decode_all(&kernel.code);
        assert_eq!(insts.len(), 7);
        assert_eq!(insts[3].literal, 0);
        assert_eq!(insts[4].dst, VGPR_BASE + 2);
        assert_eq!(insts[6].src0, 3);
    }

    #[test]
    fn reports_locations() {
        let err = assemble("s_endpgm\n  v_frob v0, v1").unwrap_err();
        let AsmError::UnknownMnemonic(name, loc) = err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(name, "v_frob");
        assert_eq!((loc.line(), loc.col()), (2, 3));

        assert!(matches!(
            assemble("s_branch nowhere"),
            Err(AsmError::UndefinedLabel(..))
        ));
        assert!(matches!(
            assemble("a:\na:\ns_endpgm"),
            Err(AsmError::DuplicateLabel(..))
        ));
        assert!(matches!(
            assemble("v_add_u32 v0, 1000, 2000"),
            Err(AsmError::MultipleLiterals(_))
        ));
        assert!(matches!(
            assemble("v_add_u32 v0, v1"),
            Err(AsmError::OperandCount("v_add_u32", "3", 2, _))
        ));
        assert!(matches!(
            assemble("buffer_load_dword s0, v1, s[4:7]"),
            Err(AsmError::Expected("vector register", _))
        ));
        assert!(matches!(assemble(".bogus 1"), Err(AsmError::UnknownDirective(..))));
    }
}
