use super::{EmuError, EmuResult};

/// Scalar register numbering shared by every wavefront.
pub mod sreg {
    pub const GENERAL_COUNT: u32 = 104;
    pub const VCC_LO: u32 = 106;
    pub const VCC_HI: u32 = 107;
    pub const M0: u32 = 124;
    pub const EXEC_LO: u32 = 126;
    pub const EXEC_HI: u32 = 127;
    pub const VCCZ: u32 = 251;
    pub const EXECZ: u32 = 252;
    pub const SCC: u32 = 253;
}

const SREG_FILE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFile {
    Scalar,
    Vector,
}

impl std::fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterFile::Scalar => write!(f, "scalar"),
            RegisterFile::Vector => write!(f, "vector"),
        }
    }
}

fn lane_bits(lanes: usize) -> u64 {
    if lanes >= 64 {
        u64::MAX
    } else {
        (1u64 << lanes) - 1
    }
}

/// Per-wavefront scalar registers.
///
/// VCCZ and EXECZ are derived from VCC and EXEC and are refreshed in the same
/// call that writes either half of their source, so a read never observes a
/// stale flag.
#[derive(Clone, Debug)]
pub struct ScalarRegisters {
    regs: [u32; SREG_FILE_SIZE],
    lanes: usize,
}

impl ScalarRegisters {
    pub fn new(lanes: usize) -> Self {
        let mut regs = ScalarRegisters {
            regs: [0; SREG_FILE_SIZE],
            lanes,
        };
        regs.refresh_derived();
        regs
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    fn index(id: u32) -> EmuResult<usize> {
        let valid = id < sreg::GENERAL_COUNT
            || matches!(
                id,
                sreg::VCC_LO
                    | sreg::VCC_HI
                    | sreg::M0
                    | sreg::EXEC_LO
                    | sreg::EXEC_HI
                    | sreg::VCCZ
                    | sreg::EXECZ
                    | sreg::SCC
            );
        if valid {
            Ok(id as usize)
        } else {
            Err(EmuError::InvalidRegister {
                file: RegisterFile::Scalar,
                id,
            })
        }
    }

    pub fn read(&self, id: u32) -> EmuResult<u32> {
        Ok(self.regs[Self::index(id)?])
    }

    pub fn write(&mut self, id: u32, value: u32) -> EmuResult<()> {
        let idx = Self::index(id)?;
        match id {
            sreg::VCCZ | sreg::EXECZ => return Err(EmuError::ReadOnlyRegister(id)),
            sreg::SCC => self.regs[idx] = (value != 0) as u32,
            _ => self.regs[idx] = value,
        }
        match id {
            sreg::VCC_LO | sreg::VCC_HI => self.refresh_vccz(),
            sreg::EXEC_LO | sreg::EXEC_HI => self.refresh_execz(),
            _ => {}
        }
        Ok(())
    }

    /// Reads the register pair starting at `id` as one 64-bit value.
    pub fn read_u64(&self, id: u32) -> EmuResult<u64> {
        let lo = self.read(id)? as u64;
        let hi = self.read(id + 1)? as u64;
        Ok(lo | (hi << 32))
    }

    pub fn write_u64(&mut self, id: u32, value: u64) -> EmuResult<()> {
        self.write(id, value as u32)?;
        self.write(id + 1, (value >> 32) as u32)
    }

    pub fn exec(&self) -> u64 {
        self.regs[sreg::EXEC_LO as usize] as u64 | (self.regs[sreg::EXEC_HI as usize] as u64) << 32
    }

    pub fn set_exec(&mut self, mask: u64) {
        self.regs[sreg::EXEC_LO as usize] = mask as u32;
        self.regs[sreg::EXEC_HI as usize] = (mask >> 32) as u32;
        self.refresh_execz();
    }

    pub fn vcc(&self) -> u64 {
        self.regs[sreg::VCC_LO as usize] as u64 | (self.regs[sreg::VCC_HI as usize] as u64) << 32
    }

    pub fn scc(&self) -> bool {
        self.regs[sreg::SCC as usize] != 0
    }

    pub fn set_scc(&mut self, value: bool) {
        self.regs[sreg::SCC as usize] = value as u32;
    }

    pub fn execz(&self) -> bool {
        self.regs[sreg::EXECZ as usize] != 0
    }

    pub fn vccz(&self) -> bool {
        self.regs[sreg::VCCZ as usize] != 0
    }

    /// Sets or clears the bit for `lane` in the 64-bit pair starting at `id`.
    pub fn set_lane_bit(&mut self, id: u32, lane: usize, bit: bool) -> EmuResult<()> {
        let mut value = self.read_u64(id)?;
        if bit {
            value |= 1 << lane;
        } else {
            value &= !(1 << lane);
        }
        self.write_u64(id, value)
    }

    pub fn refresh_derived(&mut self) {
        self.refresh_vccz();
        self.refresh_execz();
    }

    fn refresh_vccz(&mut self) {
        let zero = self.vcc() & lane_bits(self.lanes) == 0;
        self.regs[sreg::VCCZ as usize] = zero as u32;
    }

    fn refresh_execz(&mut self) {
        let zero = self.exec() & lane_bits(self.lanes) == 0;
        self.regs[sreg::EXECZ as usize] = zero as u32;
    }
}

/// Per-lane vector registers.
#[derive(Clone, Debug)]
pub struct VectorRegisters {
    regs: Box<[u32]>,
}

impl VectorRegisters {
    pub fn new(count: usize) -> Self {
        VectorRegisters {
            regs: vec![0; count].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn read(&self, id: u32) -> EmuResult<u32> {
        self.regs
            .get(id as usize)
            .copied()
            .ok_or(EmuError::InvalidRegister {
                file: RegisterFile::Vector,
                id,
            })
    }

    pub fn write(&mut self, id: u32, value: u32) -> EmuResult<()> {
        let slot = self
            .regs
            .get_mut(id as usize)
            .ok_or(EmuError::InvalidRegister {
                file: RegisterFile::Vector,
                id,
            })?;
        *slot = value;
        Ok(())
    }
}
