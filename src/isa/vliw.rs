//! A clause-based instruction set with a mask stack, in the style of
//! R600-era VLIW GPUs.
//!
//! The program starts with control-flow words. ALU work lives in clauses
//! that a control-flow word points at; the wavefront fetches the clause
//! before returning to the next control-flow word. Every word is 8 bytes.
//! Control-flow opcodes are below 0x80, ALU opcodes at or above.

use crate::emu::{ControlContext, EmuError, EmuResult, LaneContext, RegisterFile, TableKind};

use super::{DivergenceStyle, ExecScope, InstCategory, Instruction, Isa, RegisterConvention};

pub const WORD_SIZE: u32 = 8;
pub const LITERAL: u8 = 255;
pub const GPR_COUNT: u8 = 128;

const FLAG_EOP: u8 = 1;
const ALU_BASE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfOp {
    Nop = 0x00,
    Alu = 0x01,
    AluPushBefore = 0x02,
    AluPopAfter = 0x03,
    AluPop2After = 0x04,
    Jump = 0x05,
    Else = 0x06,
    Pop = 0x07,
    LoopStart = 0x08,
    LoopEnd = 0x09,
    GroupBarrier = 0x0a,
    MemRead = 0x0b,
    MemWrite = 0x0c,
    Export = 0x0d,
}

impl CfOp {
    pub fn from_code(code: u8) -> Option<CfOp> {
        use CfOp::*;
        Some(match code {
            0x00 => Nop,
            0x01 => Alu,
            0x02 => AluPushBefore,
            0x03 => AluPopAfter,
            0x04 => AluPop2After,
            0x05 => Jump,
            0x06 => Else,
            0x07 => Pop,
            0x08 => LoopStart,
            0x09 => LoopEnd,
            0x0a => GroupBarrier,
            0x0b => MemRead,
            0x0c => MemWrite,
            0x0d => Export,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use CfOp::*;
        match self {
            Nop => "NOP",
            Alu => "ALU",
            AluPushBefore => "ALU_PUSH_BEFORE",
            AluPopAfter => "ALU_POP_AFTER",
            AluPop2After => "ALU_POP2_AFTER",
            Jump => "JUMP",
            Else => "ELSE",
            Pop => "POP",
            LoopStart => "LOOP_START",
            LoopEnd => "LOOP_END",
            GroupBarrier => "GROUP_BARRIER",
            MemRead => "MEM_READ",
            MemWrite => "MEM_WRITE",
            Export => "EXPORT",
        }
    }

    fn is_clause(self) -> bool {
        matches!(
            self,
            CfOp::Alu | CfOp::AluPushBefore | CfOp::AluPopAfter | CfOp::AluPop2After
        )
    }

    fn is_memory(self) -> bool {
        matches!(self, CfOp::MemRead | CfOp::MemWrite | CfOp::Export)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Mov = 0x80,
    AddInt = 0x81,
    SubInt = 0x82,
    MulloInt = 0x83,
    LshlInt = 0x84,
    Add = 0x85,
    Mul = 0x86,
    PredSetEInt = 0x87,
    PredSetGtInt = 0x88,
    PredSetGeInt = 0x89,
    LdsWrite = 0x8a,
    LdsRead = 0x8b,
}

impl AluOp {
    pub fn from_code(code: u8) -> Option<AluOp> {
        use AluOp::*;
        Some(match code {
            0x80 => Mov,
            0x81 => AddInt,
            0x82 => SubInt,
            0x83 => MulloInt,
            0x84 => LshlInt,
            0x85 => Add,
            0x86 => Mul,
            0x87 => PredSetEInt,
            0x88 => PredSetGtInt,
            0x89 => PredSetGeInt,
            0x8a => LdsWrite,
            0x8b => LdsRead,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use AluOp::*;
        match self {
            Mov => "MOV",
            AddInt => "ADD_INT",
            SubInt => "SUB_INT",
            MulloInt => "MULLO_INT",
            LshlInt => "LSHL_INT",
            Add => "ADD",
            Mul => "MUL",
            PredSetEInt => "PRED_SETE_INT",
            PredSetGtInt => "PRED_SETGT_INT",
            PredSetGeInt => "PRED_SETGE_INT",
            LdsWrite => "LDS_WRITE",
            LdsRead => "LDS_READ",
        }
    }

    fn is_pred(self) -> bool {
        matches!(
            self,
            AluOp::PredSetEInt | AluOp::PredSetGtInt | AluOp::PredSetGeInt
        )
    }
}

/// `[op][flags][pop_count][count][addr: u16][gpr0][gpr1]`
///
/// `addr` is a word index for clauses and branches and a UAV slot for
/// memory words. `count` is the clause length in words or a loop's trip
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfInst {
    pub op: CfOp,
    pub eop: bool,
    pub pop_count: u8,
    pub count: u8,
    pub addr: u16,
    pub gpr0: u8,
    pub gpr1: u8,
}

impl CfInst {
    pub fn new(op: CfOp) -> Self {
        CfInst {
            op,
            eop: false,
            pop_count: 0,
            count: 0,
            addr: 0,
            gpr0: 0,
            gpr1: 0,
        }
    }

    pub fn jump(addr: u16, pop_count: u8) -> Self {
        CfInst {
            addr,
            pop_count,
            ..CfInst::new(CfOp::Jump)
        }
    }

    pub fn else_(addr: u16, pop_count: u8) -> Self {
        CfInst {
            addr,
            pop_count,
            ..CfInst::new(CfOp::Else)
        }
    }

    pub fn pop(pop_count: u8) -> Self {
        CfInst {
            pop_count,
            ..CfInst::new(CfOp::Pop)
        }
    }

    /// `addr` is the word after the matching `LOOP_END`.
    pub fn loop_start(trips: u8, addr: u16) -> Self {
        CfInst {
            count: trips,
            addr,
            ..CfInst::new(CfOp::LoopStart)
        }
    }

    /// Loads the word at byte offset `R[addr_gpr]` of the UAV at `slot` into `R[dst]`.
    pub fn mem_read(slot: u16, dst: u8, addr_gpr: u8) -> Self {
        CfInst {
            addr: slot,
            gpr0: dst,
            gpr1: addr_gpr,
            ..CfInst::new(CfOp::MemRead)
        }
    }

    pub fn mem_write(slot: u16, src: u8, addr_gpr: u8) -> Self {
        CfInst {
            addr: slot,
            gpr0: src,
            gpr1: addr_gpr,
            ..CfInst::new(CfOp::MemWrite)
        }
    }

    /// Stores `R[src]` at the work-item's global index in the UAV at `slot`.
    pub fn export(slot: u16, src: u8) -> Self {
        CfInst {
            addr: slot,
            gpr0: src,
            ..CfInst::new(CfOp::Export)
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.op as u8,
            if self.eop { FLAG_EOP } else { 0 },
            self.pop_count,
            self.count,
        ]);
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&[self.gpr0, self.gpr1]);
    }
}

/// `[op][dst][src0][src1][literal: u32]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluInst {
    pub op: AluOp,
    pub dst: u8,
    pub src0: u8,
    pub src1: u8,
    pub literal: u32,
}

/// An ALU source: a register or the instruction's literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Gpr(u8),
    Lit(u32),
}

impl AluInst {
    /// At most one distinct literal per instruction; a second `Lit`
    /// overwrites the first.
    pub fn new(op: AluOp, dst: u8, src0: Src, src1: Src) -> Self {
        let mut literal = 0;
        let mut operand = |src: Src| match src {
            Src::Gpr(r) => r,
            Src::Lit(value) => {
                literal = value;
                LITERAL
            }
        };
        let src0 = operand(src0);
        let src1 = operand(src1);
        AluInst {
            op,
            dst,
            src0,
            src1,
            literal,
        }
    }

    pub fn mov(dst: u8, src: Src) -> Self {
        AluInst::new(AluOp::Mov, dst, src, Src::Gpr(0))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.op as u8, self.dst, self.src0, self.src1]);
        out.extend_from_slice(&self.literal.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Cf(CfInst),
    Alu(AluInst),
}

impl Inst {
    pub fn decode(stream: &[u8], pc: u32) -> EmuResult<Inst> {
        let at = pc as usize;
        let w = stream
            .get(at..at + WORD_SIZE as usize)
            .ok_or(EmuError::PcOutOfRange {
                pc: pc as i64 + WORD_SIZE as i64,
                len: stream.len(),
            })?;
        let unknown = EmuError::UnknownEncoding {
            pc,
            opcode: w[0] as u32,
        };
        if w[0] >= ALU_BASE {
            let op = AluOp::from_code(w[0]).ok_or(unknown)?;
            return Ok(Inst::Alu(AluInst {
                op,
                dst: w[1],
                src0: w[2],
                src1: w[3],
                literal: u32::from_le_bytes([w[4], w[5], w[6], w[7]]),
            }));
        }
        let op = CfOp::from_code(w[0]).ok_or(unknown)?;
        let eop = w[1] & FLAG_EOP != 0;
        // Memory words run per lane and never reach the control-flow path
        // that honours end of program.
        if eop && op.is_memory() {
            return Err(EmuError::UnknownEncoding {
                pc,
                opcode: w[0] as u32 | (w[1] as u32) << 8,
            });
        }
        Ok(Inst::Cf(CfInst {
            op,
            eop,
            pop_count: w[2],
            count: w[3],
            addr: u16::from_le_bytes([w[4], w[5]]),
            gpr0: w[6],
            gpr1: w[7],
        }))
    }
}

impl Instruction for Inst {
    fn name(&self) -> &'static str {
        match self {
            Inst::Cf(cf) => cf.op.name(),
            Inst::Alu(alu) => alu.op.name(),
        }
    }

    fn scope(&self) -> ExecScope {
        match self {
            Inst::Cf(cf) if cf.op.is_memory() => ExecScope::Vector,
            Inst::Cf(_) => ExecScope::ControlFlow,
            Inst::Alu(_) => ExecScope::Vector,
        }
    }

    fn category(&self) -> InstCategory {
        match self {
            Inst::Cf(cf) => match cf.op {
                CfOp::Jump | CfOp::Else | CfOp::LoopStart | CfOp::LoopEnd => InstCategory::Branch,
                CfOp::GroupBarrier => InstCategory::Barrier,
                CfOp::MemRead | CfOp::MemWrite => InstCategory::VectorMem,
                CfOp::Export => InstCategory::Export,
                _ => InstCategory::ControlFlow,
            },
            Inst::Alu(alu) => match alu.op {
                AluOp::LdsWrite | AluOp::LdsRead => InstCategory::LocalMem,
                _ => InstCategory::VectorAlu,
            },
        }
    }

    fn updates_mask(&self) -> bool {
        matches!(self, Inst::Alu(alu) if alu.op.is_pred())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Byte address of the first word of the loop body.
    pub body: u32,
    pub remaining: u32,
}

#[derive(Debug, Default)]
pub struct WaveState {
    pub loops: Vec<LoopFrame>,
}

fn read_src(ctx: &LaneContext<'_>, alu: &AluInst, src: u8) -> EmuResult<u32> {
    match src {
        LITERAL => Ok(alu.literal),
        r if r < GPR_COUNT => ctx.read_vector(r as u32),
        r => Err(EmuError::InvalidRegister {
            file: RegisterFile::Vector,
            id: r as u32,
        }),
    }
}

fn execute_alu(alu: &AluInst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
    use AluOp::*;
    let a = read_src(ctx, alu, alu.src0)?;
    let b = read_src(ctx, alu, alu.src1)?;
    let dst = alu.dst as u32;
    let result = match alu.op {
        LdsWrite => return ctx.write_local(a, b),
        LdsRead => ctx.read_local(a)?,
        Mov => a,
        AddInt => a.wrapping_add(b),
        SubInt => a.wrapping_sub(b),
        MulloInt => a.wrapping_mul(b),
        LshlInt => a << (b & 31),
        Add => (f32::from_bits(a) + f32::from_bits(b)).to_bits(),
        Mul => (f32::from_bits(a) * f32::from_bits(b)).to_bits(),
        PredSetEInt | PredSetGtInt | PredSetGeInt => {
            let pred = match alu.op {
                PredSetEInt => a == b,
                PredSetGtInt => (a as i32) > (b as i32),
                _ => (a as i32) >= (b as i32),
            };
            ctx.set_predicate(pred);
            pred as u32
        }
    };
    ctx.write_vector(dst, result)
}

fn execute_memory(cf: &CfInst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
    let desc = ctx.table_descriptor(TableKind::Uav, cf.addr as u32)?;
    let reg = cf.gpr0 as u32;
    match cf.op {
        CfOp::MemRead => {
            let offset = ctx.read_vector(cf.gpr1 as u32)?;
            let value = ctx.read_global(desc.base_addr.wrapping_add(offset))?;
            ctx.write_vector(reg, value)
        }
        CfOp::MemWrite => {
            let offset = ctx.read_vector(cf.gpr1 as u32)?;
            let value = ctx.read_vector(reg)?;
            ctx.write_global(desc.base_addr.wrapping_add(offset), value)
        }
        _ => {
            let value = ctx.read_vector(reg)?;
            let index = ctx.work_item().id();
            ctx.write_global(desc.base_addr.wrapping_add(index.wrapping_mul(4)), value)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Vliw;

impl Isa for Vliw {
    type Inst = Inst;
    type WaveState = WaveState;

    fn name(&self) -> &'static str {
        "vliw"
    }

    fn divergence(&self) -> DivergenceStyle {
        DivergenceStyle::MaskStack
    }

    fn convention(&self) -> RegisterConvention {
        RegisterConvention::VectorGroupId
    }

    fn decode(&self, stream: &[u8], pc: u32) -> EmuResult<(Inst, u32)> {
        Ok((Inst::decode(stream, pc)?, WORD_SIZE))
    }

    fn execute_lane(&self, inst: &Inst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
        match inst {
            Inst::Alu(alu) => execute_alu(alu, ctx),
            Inst::Cf(cf) if cf.op.is_memory() => execute_memory(cf, ctx),
            Inst::Cf(cf) => Err(EmuError::Unimplemented(cf.op.name())),
        }
    }

    fn execute_control(
        &self,
        inst: &Inst,
        ctx: &mut ControlContext<'_, WaveState>,
    ) -> EmuResult<()> {
        let Inst::Cf(cf) = inst else {
            return Err(EmuError::Unimplemented(inst.name()));
        };
        let target = cf.addr as u32 * WORD_SIZE;
        match cf.op {
            op if op.is_clause() => {
                if op == CfOp::AluPushBefore {
                    ctx.push_mask()?;
                }
                let pop_after = match op {
                    CfOp::AluPopAfter => 1,
                    CfOp::AluPop2After => 2,
                    _ => 0,
                };
                ctx.enter_clause(target, cf.count as u32 * WORD_SIZE, pop_after);
            }
            CfOp::Jump => {
                if ctx.active_mask().is_empty() {
                    ctx.pop_mask(cf.pop_count as usize)?;
                    ctx.jump_to(target);
                }
            }
            CfOp::Else => {
                let parent = ctx.parent_mask()?;
                let mask = ctx.active_mask().invert_within(parent);
                ctx.set_active_mask(mask)?;
                if mask.is_empty() {
                    ctx.pop_mask(cf.pop_count as usize)?;
                    ctx.jump_to(target);
                }
            }
            CfOp::Pop => ctx.pop_mask(cf.pop_count as usize)?,
            CfOp::LoopStart => {
                if cf.count == 0 || ctx.active_mask().is_empty() {
                    ctx.jump_to(target);
                } else {
                    ctx.push_mask()?;
                    let body = ctx.pc() + WORD_SIZE;
                    ctx.state().loops.push(LoopFrame {
                        body,
                        remaining: cf.count as u32,
                    });
                }
            }
            CfOp::LoopEnd => {
                let active = !ctx.active_mask().is_empty();
                let Some(frame) = ctx.state().loops.last_mut() else {
                    return Err(EmuError::StackUnderflow { count: 1, depth: 0 });
                };
                frame.remaining -= 1;
                if frame.remaining > 0 && active {
                    let body = frame.body;
                    ctx.jump_to(body);
                } else {
                    ctx.state().loops.pop();
                    ctx.pop_mask(1)?;
                }
            }
            CfOp::GroupBarrier => ctx.barrier(),
            CfOp::Nop => {}
            _ => return Err(EmuError::Unimplemented(cf.op.name())),
        }
        if cf.eop {
            ctx.finish();
        }
        Ok(())
    }
}

/// Lays out a program: control-flow words first, then every ALU clause.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    cf: Vec<CfInst>,
    clauses: Vec<(usize, Vec<AluInst>)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Word index of the next control-flow instruction.
    pub fn here(&self) -> u16 {
        self.cf.len() as u16
    }

    pub fn cf(&mut self, inst: CfInst) -> usize {
        self.cf.push(inst);
        self.cf.len() - 1
    }

    /// Adds a clause-entering word. Its address and length are filled in
    /// by [`ProgramBuilder::build`].
    pub fn clause(&mut self, op: CfOp, body: Vec<AluInst>) -> usize {
        let index = self.cf(CfInst::new(op));
        self.clauses.push((index, body));
        index
    }

    /// Points the branch at `index` to word `addr`.
    pub fn set_addr(&mut self, index: usize, addr: u16) {
        if let Some(inst) = self.cf.get_mut(index) {
            inst.addr = addr;
        }
    }

    /// Marks the last control-flow word as end of program, appending a
    /// `NOP` if that word cannot carry the flag.
    pub fn end(&mut self) {
        match self.cf.last_mut() {
            Some(last) if !last.op.is_memory() => last.eop = true,
            _ => {
                self.cf.push(CfInst {
                    eop: true,
                    ..CfInst::new(CfOp::Nop)
                });
            }
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut addr = self.cf.len();
        for (index, body) in &self.clauses {
            let inst = &mut self.cf[*index];
            inst.addr = addr as u16;
            inst.count = body.len() as u8;
            addr += body.len();
        }
        let mut out = Vec::with_capacity(addr * WORD_SIZE as usize);
        for inst in &self.cf {
            inst.encode(&mut out);
        }
        for (_, body) in &self.clauses {
            for alu in body {
                alu.encode(&mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EmuConfig;
    use crate::emu::{BufferDescriptor, DivergenceController, Emulator, LaunchDescriptor};

    fn run(code: Vec<u8>, items: u32, uav_words: u32) -> (Emulator<Vliw>, Vec<u32>) {
        let mut emu = Emulator::new(Vliw, EmuConfig::default());
        let buf = emu.alloc(uav_words as usize * 4, 256).unwrap();
        let id = emu
            .launch(&LaunchDescriptor::new(code).global1d(items).local1d(items))
            .unwrap();
        emu.insert_buffer(
            id,
            TableKind::Uav,
            0,
            &BufferDescriptor::words(buf.addr(), uav_words),
        )
        .unwrap();
        emu.run().unwrap();
        let mut out = vec![0u32; uav_words as usize];
        emu.read(buf, 0, bytemuck::cast_slice_mut(&mut out)).unwrap();
        (emu, out)
    }

    #[test]
    fn decode_splits_on_opcode_range() {
        let mut bytes = Vec::new();
        CfInst::jump(3, 1).encode(&mut bytes);
        AluInst::new(AluOp::AddInt, 1, Src::Gpr(0), Src::Lit(7)).encode(&mut bytes);
        assert_eq!(Inst::decode(&bytes, 0).unwrap(), Inst::Cf(CfInst::jump(3, 1)));
        let Inst::Alu(alu) = Inst::decode(&bytes, 8).unwrap() else {
            panic!("expected alu word");
        };
        assert_eq!(alu.src1, LITERAL);
        assert_eq!(alu.literal, 7);
        assert!(matches!(
            Inst::decode(&[0x40, 0, 0, 0, 0, 0, 0, 0], 0),
            Err(EmuError::UnknownEncoding { opcode: 0x40, .. })
        ));
    }

    #[test]
    fn if_else() {
        // r1 = (lid > 3) ? 10 : 20
        let mut b = ProgramBuilder::new();
        b.clause(
            CfOp::AluPushBefore,
            vec![AluInst::new(AluOp::PredSetGtInt, 2, Src::Gpr(0), Src::Lit(3))],
        );
        let jump = b.cf(CfInst::jump(0, 0));
        b.clause(CfOp::Alu, vec![AluInst::mov(1, Src::Lit(10))]);
        let else_at = b.here();
        let els = b.cf(CfInst::else_(0, 1));
        b.clause(CfOp::AluPopAfter, vec![AluInst::mov(1, Src::Lit(20))]);
        let after = b.here();
        b.set_addr(jump, else_at);
        b.set_addr(els, after);
        b.cf(CfInst::export(0, 1));
        b.end();

        let (emu, out) = run(b.build(), 16, 16);
        let expected: Vec<u32> = (0..16).map(|i| if i > 3 { 10 } else { 20 }).collect();
        assert_eq!(out, expected);
        assert!(emu.stats().control_flow > 0);
    }

    #[test]
    fn jump_skips_when_no_lane_active() {
        let mut b = ProgramBuilder::new();
        b.clause(CfOp::Alu, vec![AluInst::mov(1, Src::Lit(5))]);
        b.clause(
            CfOp::AluPushBefore,
            vec![AluInst::new(AluOp::PredSetGtInt, 2, Src::Gpr(0), Src::Lit(100))],
        );
        let jump = b.cf(CfInst::jump(0, 1));
        b.clause(CfOp::AluPopAfter, vec![AluInst::mov(1, Src::Lit(9))]);
        let after = b.here();
        b.set_addr(jump, after);
        b.cf(CfInst::export(0, 1));
        b.end();

        let (_, out) = run(b.build(), 8, 8);
        assert_eq!(out, vec![5; 8]);
    }

    #[test]
    fn loop_with_per_lane_exit() {
        // r1 counts iterations; lanes leave once r1 reaches their id.
        let mut b = ProgramBuilder::new();
        b.clause(CfOp::Alu, vec![AluInst::mov(1, Src::Lit(0))]);
        let start = b.cf(CfInst::loop_start(10, 0));
        b.clause(
            CfOp::Alu,
            vec![
                AluInst::new(AluOp::AddInt, 1, Src::Gpr(1), Src::Lit(1)),
                AluInst::new(AluOp::PredSetGtInt, 2, Src::Gpr(0), Src::Gpr(1)),
            ],
        );
        b.cf(CfInst::new(CfOp::LoopEnd));
        let after = b.here();
        b.set_addr(start, after);
        b.cf(CfInst::export(0, 1));
        b.end();

        let (_, out) = run(b.build(), 16, 16);
        let expected: Vec<u32> = (0..16u32).map(|i| i.clamp(1, 10)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn barrier_orders_lds_across_wavefronts() {
        // Each item writes its id to LDS, then reads its mirror's slot.
        let mut b = ProgramBuilder::new();
        b.clause(
            CfOp::Alu,
            vec![
                AluInst::new(AluOp::LshlInt, 1, Src::Gpr(0), Src::Lit(2)),
                AluInst::new(AluOp::LdsWrite, 0, Src::Gpr(1), Src::Gpr(0)),
                AluInst::new(AluOp::SubInt, 2, Src::Lit(127), Src::Gpr(0)),
                AluInst::new(AluOp::LshlInt, 2, Src::Gpr(2), Src::Lit(2)),
            ],
        );
        b.cf(CfInst::new(CfOp::GroupBarrier));
        b.clause(
            CfOp::Alu,
            vec![AluInst::new(AluOp::LdsRead, 3, Src::Gpr(2), Src::Gpr(0))],
        );
        b.cf(CfInst::export(0, 3));
        b.end();

        let mut emu = Emulator::new(Vliw, EmuConfig::default());
        let buf = emu.alloc(128 * 4, 256).unwrap();
        let id = emu
            .launch(
                &LaunchDescriptor::new(b.build())
                    .global1d(128)
                    .local1d(128)
                    .local_memory(128 * 4),
            )
            .unwrap();
        emu.insert_buffer(id, TableKind::Uav, 0, &BufferDescriptor::words(buf.addr(), 128))
            .unwrap();
        emu.run().unwrap();
        let mut out = vec![0u32; 128];
        emu.read(buf, 0, bytemuck::cast_slice_mut(&mut out)).unwrap();
        let expected: Vec<u32> = (0..128).rev().collect();
        assert_eq!(out, expected);
        assert_eq!(emu.stats().barrier, 2);
    }

    #[test]
    fn else_without_push_underflows() {
        let mut b = ProgramBuilder::new();
        b.cf(CfInst::else_(0, 0));
        b.end();
        let mut emu = Emulator::new(Vliw, EmuConfig::default());
        emu.launch(&LaunchDescriptor::new(b.build()).global1d(4).local1d(4))
            .unwrap();
        assert!(matches!(
            emu.run(),
            Err(EmuError::StackUnderflow { count: 1, depth: 0 })
        ));
    }

    #[test]
    fn control_flow_word_inside_clause_is_fatal() {
        // the clause body at word 2 is a LOOP_START instead of an ALU word
        let mut code = Vec::new();
        CfInst {
            addr: 2,
            count: 1,
            ..CfInst::new(CfOp::Alu)
        }
        .encode(&mut code);
        CfInst {
            eop: true,
            ..CfInst::new(CfOp::Nop)
        }
        .encode(&mut code);
        CfInst::loop_start(4, 3).encode(&mut code);

        let mut emu = Emulator::new(Vliw, EmuConfig::default());
        let id = emu
            .launch(&LaunchDescriptor::new(code).global1d(4).local1d(4))
            .unwrap();
        assert!(matches!(
            emu.run(),
            Err(EmuError::ControlFlowInClause {
                pc: 16,
                name: "LOOP_START"
            })
        ));
        // only the clause entry ran; nothing was pushed
        assert_eq!(emu.stats().instructions, 1);
        let group = &emu.ndrange(id).unwrap().work_groups()[0];
        let DivergenceController::MaskStack(stack) = group.wavefronts()[0].divergence() else {
            panic!("expected a mask stack");
        };
        assert_eq!(stack.depth(), 0);
    }
}
