//! A small flat-mask instruction set in the style of GCN.
//!
//! Every instruction is one 8-byte word `[opcode][dst][src0][src1]` of
//! little-endian `u16`s, optionally followed by one 32-bit word: a literal
//! when a source operand is 255, or the immediate offset of buffer and LDS
//! instructions. Active lanes live in EXEC.

use crate::emu::{sreg, ControlContext, EmuError, EmuResult, LaneContext, RegisterFile};

use super::{DivergenceStyle, ExecScope, InstCategory, Instruction, Isa, RegisterConvention};

pub const WORD_SIZE: u32 = 8;
pub const LITERAL: u16 = 255;
pub const VGPR_BASE: u16 = 256;

const INLINE_INT_ZERO: u16 = 128;
const INLINE_INT_MAX: u16 = 192;
const INLINE_INT_NEG_MAX: u16 = 208;
const INLINE_FLOAT_BASE: u16 = 240;
const INLINE_FLOATS: [f32; 8] = [0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0];

/// Operand layout shared by a group of opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Sop1,
    Sop2,
    Sopc,
    Sopp,
    Smem,
    Vop1,
    Vop2,
    Vopc,
    Mubuf,
    Ds,
    Exp,
}

impl Format {
    /// Whether the offset word is always present.
    fn has_offset(self) -> bool {
        matches!(self, Format::Mubuf | Format::Ds)
    }

    /// Whether `src0`/`src1` are operands that may select a literal.
    fn has_operands(self) -> bool {
        matches!(
            self,
            Format::Sop1 | Format::Sop2 | Format::Sopc | Format::Vop1 | Format::Vop2 | Format::Vopc
        )
    }
}

macro_rules! opcodes {
    ($($variant:ident = $code:literal, $name:literal, $format:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn code(self) -> u16 {
                match self {
                    $(Opcode::$variant => $code,)*
                }
            }

            pub fn from_code(code: u16) -> Option<Opcode> {
                match code {
                    $($code => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn format(self) -> Format {
                match self {
                    $(Opcode::$variant => Format::$format,)*
                }
            }
        }
    };
}

opcodes! {
    SMovB32 = 0x0100, "s_mov_b32", Sop1;
    SMovB64 = 0x0101, "s_mov_b64", Sop1;
    SNotB64 = 0x0102, "s_not_b64", Sop1;
    SAndSaveexecB64 = 0x0103, "s_and_saveexec_b64", Sop1;

    SAddU32 = 0x0200, "s_add_u32", Sop2;
    SSubU32 = 0x0201, "s_sub_u32", Sop2;
    SMulI32 = 0x0202, "s_mul_i32", Sop2;
    SLshlB32 = 0x0203, "s_lshl_b32", Sop2;
    SAndB64 = 0x0204, "s_and_b64", Sop2;
    SOrB64 = 0x0205, "s_or_b64", Sop2;
    SAndn2B64 = 0x0206, "s_andn2_b64", Sop2;

    SCmpEqU32 = 0x0300, "s_cmp_eq_u32", Sopc;
    SCmpLgU32 = 0x0301, "s_cmp_lg_u32", Sopc;
    SCmpLtU32 = 0x0302, "s_cmp_lt_u32", Sopc;
    SCmpGtU32 = 0x0303, "s_cmp_gt_u32", Sopc;

    SNop = 0x0400, "s_nop", Sopp;
    SWaitcnt = 0x0401, "s_waitcnt", Sopp;
    SBranch = 0x0402, "s_branch", Sopp;
    SCbranchScc0 = 0x0403, "s_cbranch_scc0", Sopp;
    SCbranchScc1 = 0x0404, "s_cbranch_scc1", Sopp;
    SCbranchVccz = 0x0405, "s_cbranch_vccz", Sopp;
    SCbranchVccnz = 0x0406, "s_cbranch_vccnz", Sopp;
    SCbranchExecz = 0x0407, "s_cbranch_execz", Sopp;
    SCbranchExecnz = 0x0408, "s_cbranch_execnz", Sopp;
    SBarrier = 0x0409, "s_barrier", Sopp;
    SEndpgm = 0x040a, "s_endpgm", Sopp;

    SLoadDword = 0x0500, "s_load_dword", Smem;
    SBufferLoadDword = 0x0501, "s_buffer_load_dword", Smem;

    VMovB32 = 0x0600, "v_mov_b32", Vop1;
    VReadfirstlaneB32 = 0x0601, "v_readfirstlane_b32", Vop1;

    VAddU32 = 0x0700, "v_add_u32", Vop2;
    VSubU32 = 0x0701, "v_sub_u32", Vop2;
    VMulLoU32 = 0x0702, "v_mul_lo_u32", Vop2;
    VLshlrevB32 = 0x0703, "v_lshlrev_b32", Vop2;
    VAndB32 = 0x0704, "v_and_b32", Vop2;
    VAddF32 = 0x0705, "v_add_f32", Vop2;
    VMulF32 = 0x0706, "v_mul_f32", Vop2;
    VCndmaskB32 = 0x0707, "v_cndmask_b32", Vop2;

    VCmpEqU32 = 0x0800, "v_cmp_eq_u32", Vopc;
    VCmpNeU32 = 0x0801, "v_cmp_ne_u32", Vopc;
    VCmpLtU32 = 0x0802, "v_cmp_lt_u32", Vopc;
    VCmpGtU32 = 0x0803, "v_cmp_gt_u32", Vopc;
    VCmpxEqU32 = 0x0804, "v_cmpx_eq_u32", Vopc;
    VCmpxLtU32 = 0x0805, "v_cmpx_lt_u32", Vopc;
    VCmpxGtU32 = 0x0806, "v_cmpx_gt_u32", Vopc;

    BufferLoadDword = 0x0900, "buffer_load_dword", Mubuf;
    BufferStoreDword = 0x0901, "buffer_store_dword", Mubuf;
    BufferAtomicAdd = 0x0902, "buffer_atomic_add", Mubuf;

    DsWriteB32 = 0x0a00, "ds_write_b32", Ds;
    DsReadB32 = 0x0a01, "ds_read_b32", Ds;
    DsAddU32 = 0x0a02, "ds_add_u32", Ds;

    ExpMem = 0x0b00, "exp_mem", Exp;
}

/// A decoded instruction. Which fields mean what depends on the opcode's
/// [`Format`]; unused fields are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inst {
    pub op: Opcode,
    pub dst: u16,
    pub src0: u16,
    pub src1: u16,
    /// Literal value or immediate offset, when the encoding carries one.
    pub literal: u32,
}

impl Inst {
    pub fn new(op: Opcode, dst: u16, src0: u16, src1: u16) -> Self {
        Inst {
            op,
            dst,
            src0,
            src1,
            literal: 0,
        }
    }

    pub fn with_literal(mut self, literal: u32) -> Self {
        self.literal = literal;
        self
    }

    /// The signed immediate of a `Sopp` instruction.
    pub fn simm16(&self) -> i16 {
        self.src0 as i16
    }

    fn has_trailing_word(&self) -> bool {
        let format = self.op.format();
        format.has_offset()
            || (format.has_operands() && (self.src0 == LITERAL || self.src1 == LITERAL))
    }

    pub fn size(&self) -> u32 {
        if self.has_trailing_word() {
            WORD_SIZE + 4
        } else {
            WORD_SIZE
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for field in [self.op.code(), self.dst, self.src0, self.src1] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        if self.has_trailing_word() {
            out.extend_from_slice(&self.literal.to_le_bytes());
        }
    }

    pub fn decode(stream: &[u8], pc: u32) -> EmuResult<Inst> {
        let at = pc as usize;
        let field = |i: usize| -> EmuResult<u16> {
            stream
                .get(at + i * 2..at + i * 2 + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or(EmuError::PcOutOfRange {
                    pc: (at + i * 2) as i64,
                    len: stream.len(),
                })
        };
        let code = field(0)?;
        let op = Opcode::from_code(code).ok_or(EmuError::UnknownEncoding {
            pc,
            opcode: code as u32,
        })?;
        let mut inst = Inst::new(op, field(1)?, field(2)?, field(3)?);
        if inst.has_trailing_word() {
            let lo = field(4)? as u32;
            let hi = field(5)? as u32;
            inst.literal = lo | hi << 16;
        }
        Ok(inst)
    }

    fn is_cmpx(&self) -> bool {
        matches!(
            self.op,
            Opcode::VCmpxEqU32 | Opcode::VCmpxLtU32 | Opcode::VCmpxGtU32
        )
    }
}

impl Instruction for Inst {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn scope(&self) -> ExecScope {
        match self.op.format() {
            Format::Sop1 | Format::Sop2 | Format::Sopc | Format::Smem => ExecScope::Scalar,
            Format::Sopp => match self.op {
                Opcode::SNop | Opcode::SWaitcnt => ExecScope::Scalar,
                _ => ExecScope::ControlFlow,
            },
            Format::Vop1 if self.op == Opcode::VReadfirstlaneB32 => ExecScope::FirstActiveLane,
            Format::Vop1 | Format::Vop2 | Format::Vopc | Format::Mubuf | Format::Ds | Format::Exp => {
                ExecScope::Vector
            }
        }
    }

    fn category(&self) -> InstCategory {
        match self.op.format() {
            Format::Sop1 | Format::Sop2 | Format::Sopc => InstCategory::ScalarAlu,
            Format::Smem => InstCategory::ScalarMem,
            Format::Sopp => match self.op {
                Opcode::SNop | Opcode::SWaitcnt => InstCategory::ScalarAlu,
                Opcode::SBarrier => InstCategory::Barrier,
                Opcode::SEndpgm => InstCategory::ControlFlow,
                _ => InstCategory::Branch,
            },
            Format::Vop1 | Format::Vop2 | Format::Vopc => InstCategory::VectorAlu,
            Format::Mubuf => InstCategory::VectorMem,
            Format::Ds => InstCategory::LocalMem,
            Format::Exp => InstCategory::Export,
        }
    }

    fn updates_mask(&self) -> bool {
        match self.op.format() {
            Format::Sop1 | Format::Sop2 => {
                self.op == Opcode::SAndSaveexecB64 || self.dst as u32 == sreg::EXEC_LO
            }
            Format::Vopc => self.is_cmpx(),
            _ => false,
        }
    }
}

fn read_operand(ctx: &LaneContext<'_>, inst: &Inst, op: u16) -> EmuResult<u32> {
    match op {
        INLINE_INT_ZERO..=INLINE_INT_MAX => Ok((op - INLINE_INT_ZERO) as u32),
        193..=INLINE_INT_NEG_MAX => Ok(-((op - INLINE_INT_MAX) as i32) as u32),
        INLINE_FLOAT_BASE..=247 => Ok(INLINE_FLOATS[(op - INLINE_FLOAT_BASE) as usize].to_bits()),
        LITERAL => Ok(inst.literal),
        VGPR_BASE..=511 => ctx.read_vector((op - VGPR_BASE) as u32),
        0..=127 | 251..=253 => ctx.read_scalar(op as u32),
        _ => Err(EmuError::InvalidRegister {
            file: RegisterFile::Scalar,
            id: op as u32,
        }),
    }
}

/// 64-bit scalar source: register pairs read whole, constants extend.
fn read_operand_u64(ctx: &LaneContext<'_>, inst: &Inst, op: u16) -> EmuResult<u64> {
    match op {
        0..=127 => ctx.read_scalar_u64(op as u32),
        193..=INLINE_INT_NEG_MAX => Ok(read_operand(ctx, inst, op)? as i32 as i64 as u64),
        _ => Ok(read_operand(ctx, inst, op)? as u64),
    }
}

fn write_dst(ctx: &mut LaneContext<'_>, op: u16, value: u32) -> EmuResult<()> {
    match op {
        VGPR_BASE..=511 => ctx.write_vector((op - VGPR_BASE) as u32, value),
        _ => ctx.write_scalar(op as u32, value),
    }
}

fn vgpr(op: u16) -> EmuResult<u32> {
    match op {
        VGPR_BASE..=511 => Ok((op - VGPR_BASE) as u32),
        _ => Err(EmuError::InvalidRegister {
            file: RegisterFile::Vector,
            id: op as u32,
        }),
    }
}

fn f32_op(a: u32, b: u32, f: impl Fn(f32, f32) -> f32) -> u32 {
    f(f32::from_bits(a), f32::from_bits(b)).to_bits()
}

/// Byte address of a buffer access, or `None` when it falls outside the
/// descriptor's records.
fn buffer_address(ctx: &LaneContext<'_>, inst: &Inst) -> EmuResult<Option<u32>> {
    let desc = ctx.buffer_descriptor(inst.src1 as u32)?;
    let offset = ctx
        .read_vector(vgpr(inst.src0)?)?
        .wrapping_add(inst.literal);
    let limit = desc.stride as u64 * desc.num_records as u64;
    if offset as u64 >= limit {
        return Ok(None);
    }
    Ok(Some(desc.base_addr.wrapping_add(offset)))
}

fn execute_scalar(inst: &Inst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
    use Opcode::*;
    match inst.op {
        SMovB32 => {
            let value = read_operand(ctx, inst, inst.src0)?;
            ctx.write_scalar(inst.dst as u32, value)
        }
        SMovB64 => {
            let value = read_operand_u64(ctx, inst, inst.src0)?;
            ctx.write_scalar_u64(inst.dst as u32, value)
        }
        SNotB64 => {
            let value = !read_operand_u64(ctx, inst, inst.src0)?;
            ctx.set_scc(value != 0);
            ctx.write_scalar_u64(inst.dst as u32, value)
        }
        SAndSaveexecB64 => {
            let src = read_operand_u64(ctx, inst, inst.src0)?;
            let exec = ctx.read_scalar_u64(sreg::EXEC_LO)?;
            ctx.write_scalar_u64(inst.dst as u32, exec)?;
            let exec = src & exec;
            ctx.set_scc(exec != 0);
            ctx.write_scalar_u64(sreg::EXEC_LO, exec)
        }
        SAddU32 | SSubU32 | SMulI32 | SLshlB32 => {
            let a = read_operand(ctx, inst, inst.src0)?;
            let b = read_operand(ctx, inst, inst.src1)?;
            let result = match inst.op {
                SAddU32 => {
                    let (sum, carry) = a.overflowing_add(b);
                    ctx.set_scc(carry);
                    sum
                }
                SSubU32 => {
                    let (diff, borrow) = a.overflowing_sub(b);
                    ctx.set_scc(borrow);
                    diff
                }
                SMulI32 => (a as i32).wrapping_mul(b as i32) as u32,
                _ => {
                    let shifted = a << (b & 31);
                    ctx.set_scc(shifted != 0);
                    shifted
                }
            };
            ctx.write_scalar(inst.dst as u32, result)
        }
        SAndB64 | SOrB64 | SAndn2B64 => {
            let a = read_operand_u64(ctx, inst, inst.src0)?;
            let b = read_operand_u64(ctx, inst, inst.src1)?;
            let result = match inst.op {
                SAndB64 => a & b,
                SOrB64 => a | b,
                _ => a & !b,
            };
            ctx.set_scc(result != 0);
            ctx.write_scalar_u64(inst.dst as u32, result)
        }
        SCmpEqU32 | SCmpLgU32 | SCmpLtU32 | SCmpGtU32 => {
            let a = read_operand(ctx, inst, inst.src0)?;
            let b = read_operand(ctx, inst, inst.src1)?;
            let scc = match inst.op {
                SCmpEqU32 => a == b,
                SCmpLgU32 => a != b,
                SCmpLtU32 => a < b,
                _ => a > b,
            };
            ctx.set_scc(scc);
            Ok(())
        }
        SNop | SWaitcnt => Ok(()),
        SLoadDword => {
            let base = ctx.read_scalar_u64(inst.src0 as u32)? as u32;
            let value = ctx.read_global(base.wrapping_add(inst.src1 as u32))?;
            ctx.write_scalar(inst.dst as u32, value)
        }
        SBufferLoadDword => {
            let desc = ctx.buffer_descriptor(inst.src0 as u32)?;
            let value = ctx.read_global(desc.base_addr.wrapping_add(inst.src1 as u32))?;
            ctx.write_scalar(inst.dst as u32, value)
        }
        _ => Err(EmuError::Unimplemented(inst.op.name())),
    }
}

fn execute_vector(inst: &Inst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
    use Opcode::*;
    match inst.op {
        VMovB32 | VReadfirstlaneB32 => {
            let value = read_operand(ctx, inst, inst.src0)?;
            write_dst(ctx, inst.dst, value)
        }
        VAddU32 | VSubU32 | VMulLoU32 | VLshlrevB32 | VAndB32 | VAddF32 | VMulF32
        | VCndmaskB32 => {
            let a = read_operand(ctx, inst, inst.src0)?;
            let b = read_operand(ctx, inst, inst.src1)?;
            let result = match inst.op {
                VAddU32 => a.wrapping_add(b),
                VSubU32 => a.wrapping_sub(b),
                VMulLoU32 => a.wrapping_mul(b),
                VLshlrevB32 => b << (a & 31),
                VAndB32 => a & b,
                VAddF32 => f32_op(a, b, |x, y| x + y),
                VMulF32 => f32_op(a, b, |x, y| x * y),
                _ => {
                    if ctx.scalar_lane_bit(sreg::VCC_LO)? {
                        b
                    } else {
                        a
                    }
                }
            };
            ctx.write_vector(vgpr(inst.dst)?, result)
        }
        VCmpEqU32 | VCmpNeU32 | VCmpLtU32 | VCmpGtU32 | VCmpxEqU32 | VCmpxLtU32 | VCmpxGtU32 => {
            let a = read_operand(ctx, inst, inst.src0)?;
            let b = read_operand(ctx, inst, inst.src1)?;
            let bit = match inst.op {
                VCmpEqU32 | VCmpxEqU32 => a == b,
                VCmpNeU32 => a != b,
                VCmpLtU32 | VCmpxLtU32 => a < b,
                _ => a > b,
            };
            ctx.set_scalar_lane_bit(sreg::VCC_LO, bit)?;
            if inst.is_cmpx() {
                ctx.set_scalar_lane_bit(sreg::EXEC_LO, bit)?;
            }
            Ok(())
        }
        BufferLoadDword => {
            let value = match buffer_address(ctx, inst)? {
                Some(addr) => ctx.read_global(addr)?,
                None => 0,
            };
            ctx.write_vector(vgpr(inst.dst)?, value)
        }
        BufferStoreDword => {
            let value = ctx.read_vector(vgpr(inst.dst)?)?;
            match buffer_address(ctx, inst)? {
                Some(addr) => ctx.write_global(addr, value),
                None => Ok(()),
            }
        }
        BufferAtomicAdd => {
            let data = vgpr(inst.dst)?;
            let value = ctx.read_vector(data)?;
            let Some(addr) = buffer_address(ctx, inst)? else {
                return Ok(());
            };
            let old = ctx.atomic_add_global(addr, value)?;
            ctx.write_vector(data, old)
        }
        DsWriteB32 | DsAddU32 => {
            let addr = ctx
                .read_vector(vgpr(inst.src0)?)?
                .wrapping_add(inst.literal);
            let value = ctx.read_vector(vgpr(inst.src1)?)?;
            if inst.op == DsWriteB32 {
                ctx.write_local(addr, value)
            } else {
                ctx.atomic_add_local(addr, value).map(|_| ())
            }
        }
        DsReadB32 => {
            let addr = ctx
                .read_vector(vgpr(inst.src0)?)?
                .wrapping_add(inst.literal);
            let value = ctx.read_local(addr)?;
            ctx.write_vector(vgpr(inst.dst)?, value)
        }
        ExpMem => {
            let desc = ctx.buffer_descriptor(inst.src1 as u32)?;
            let value = ctx.read_vector(vgpr(inst.src0)?)?;
            let addr = desc
                .base_addr
                .wrapping_add(ctx.work_item().id().wrapping_mul(4));
            ctx.write_global(addr, value)
        }
        _ => Err(EmuError::Unimplemented(inst.op.name())),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Gcn;

impl Isa for Gcn {
    type Inst = Inst;
    type WaveState = ();

    fn name(&self) -> &'static str {
        "gcn"
    }

    fn divergence(&self) -> DivergenceStyle {
        DivergenceStyle::FlatMask
    }

    fn convention(&self) -> RegisterConvention {
        RegisterConvention::ScalarGroupId
    }

    fn decode(&self, stream: &[u8], pc: u32) -> EmuResult<(Inst, u32)> {
        let inst = Inst::decode(stream, pc)?;
        Ok((inst, inst.size()))
    }

    fn execute_lane(&self, inst: &Inst, ctx: &mut LaneContext<'_>) -> EmuResult<()> {
        match inst.scope() {
            ExecScope::Scalar => execute_scalar(inst, ctx),
            _ => execute_vector(inst, ctx),
        }
    }

    fn execute_control(&self, inst: &Inst, ctx: &mut ControlContext<'_, ()>) -> EmuResult<()> {
        use Opcode::*;
        let taken = match inst.op {
            SEndpgm => {
                ctx.finish();
                return Ok(());
            }
            SBarrier => {
                ctx.barrier();
                return Ok(());
            }
            SBranch => true,
            SCbranchScc0 => !ctx.scc(),
            SCbranchScc1 => ctx.scc(),
            SCbranchVccz => ctx.vccz(),
            SCbranchVccnz => !ctx.vccz(),
            SCbranchExecz => ctx.execz(),
            SCbranchExecnz => !ctx.execz(),
            _ => return Err(EmuError::Unimplemented(inst.op.name())),
        };
        if taken {
            ctx.jump_relative(inst.simm16() as i64 * 4);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcode_tables_agree() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_name("v_add_i32"), None);
    }

    #[test]
    fn literal_extends_word() {
        let plain = Inst::new(Opcode::VAddU32, VGPR_BASE + 1, VGPR_BASE, 130);
        assert_eq!(plain.size(), 8);
        let lit = Inst::new(Opcode::VAddU32, VGPR_BASE + 1, VGPR_BASE, LITERAL).with_literal(1000);
        assert_eq!(lit.size(), 12);
        let mut bytes = Vec::new();
        lit.encode(&mut bytes);
        assert_eq!(bytes.len(), 12);
        assert_eq!(Inst::decode(&bytes, 0).unwrap(), lit);
    }

    #[test]
    fn branch_immediate_is_not_a_literal() {
        let inst = Inst::new(Opcode::SBranch, 0, 255, 0);
        assert_eq!(inst.size(), 8);
        assert_eq!(inst.simm16(), 255);
        let back = Inst::new(Opcode::SBranch, 0, (-3i16) as u16, 0);
        assert_eq!(back.simm16(), -3);
    }

    #[test]
    fn memory_always_carries_offset() {
        let inst = Inst::new(Opcode::DsReadB32, VGPR_BASE, VGPR_BASE + 1, 0);
        assert_eq!(inst.size(), 12);
    }

    #[test]
    fn decode_errors() {
        let mut bytes = Vec::new();
        Inst::new(Opcode::SEndpgm, 0, 0, 0).encode(&mut bytes);
        bytes[0] = 0xff;
        assert!(matches!(
            Inst::decode(&bytes, 0),
            Err(EmuError::UnknownEncoding { pc: 0, opcode: 0x04ff })
        ));

        let mut bytes = Vec::new();
        Inst::new(Opcode::SMovB32, 0, LITERAL, 0).encode(&mut bytes);
        bytes.truncate(8);
        assert!(matches!(
            Inst::decode(&bytes, 0),
            Err(EmuError::PcOutOfRange { .. })
        ));
    }

    #[test]
    fn scopes_and_mask_updates() {
        let cmpx = Inst::new(Opcode::VCmpxLtU32, 0, VGPR_BASE, 130);
        assert_eq!(cmpx.scope(), ExecScope::Vector);
        assert!(cmpx.updates_mask());
        let cmp = Inst::new(Opcode::VCmpLtU32, 0, VGPR_BASE, 130);
        assert!(!cmp.updates_mask());
        let mov_exec = Inst::new(Opcode::SMovB64, sreg::EXEC_LO as u16, 193, 0);
        assert!(mov_exec.updates_mask());
        assert_eq!(mov_exec.scope(), ExecScope::Scalar);
        let rfl = Inst::new(Opcode::VReadfirstlaneB32, 4, VGPR_BASE, 0);
        assert_eq!(rfl.scope(), ExecScope::FirstActiveLane);
        let end = Inst::new(Opcode::SEndpgm, 0, 0, 0);
        assert_eq!(end.scope(), ExecScope::ControlFlow);
        assert_eq!(end.category(), InstCategory::ControlFlow);
    }
}
