use super::memory::{GlobalMemory, LocalMemory};
use super::ndrange::{BufferDescriptor, LaunchInfo, TableKind};
use super::regs::{ScalarRegisters, VectorRegisters};
use super::wavefront::{AccessKind, InstFlags, LaneMask, MemAccess, MemSpace};
use super::EmuResult;

/// One logical thread of a work-group.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub(crate) id: u32,
    pub(crate) id_3d: [u32; 3],
    pub(crate) local_id: u32,
    pub(crate) local_id_3d: [u32; 3],
    pub(crate) lane: usize,
    pub(crate) wavefront: usize,
    pub(crate) work_group: u32,
    pub(crate) vregs: VectorRegisters,
}

impl WorkItem {
    /// The work-item a wavefront runs its scalar instructions on. It has no
    /// vector registers of its own.
    pub(crate) fn scalar(work_group: u32, wavefront: usize) -> Self {
        WorkItem {
            id: 0,
            id_3d: [0; 3],
            local_id: 0,
            local_id_3d: [0; 3],
            lane: 0,
            wavefront,
            work_group,
            vregs: VectorRegisters::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn id_3d(&self) -> [u32; 3] {
        self.id_3d
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn local_id_3d(&self) -> [u32; 3] {
        self.local_id_3d
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn wavefront(&self) -> usize {
        self.wavefront
    }

    pub fn work_group(&self) -> u32 {
        self.work_group
    }

    pub fn read_vector(&self, reg: u32) -> EmuResult<u32> {
        self.vregs.read(reg)
    }

    pub fn write_vector(&mut self, reg: u32, value: u32) -> EmuResult<()> {
        self.vregs.write(reg, value)
    }
}

/// Everything one lane may touch while executing one instruction.
pub struct LaneContext<'a> {
    pub(crate) item: &'a mut WorkItem,
    pub(crate) sregs: &'a mut ScalarRegisters,
    pub(crate) flags: &'a mut InstFlags,
    pub(crate) pending: &'a mut LaneMask,
    pub(crate) local: &'a mut LocalMemory,
    pub(crate) global: &'a mut dyn GlobalMemory,
    pub(crate) launch: &'a LaunchInfo,
}

impl<'a> LaneContext<'a> {
    pub fn lane(&self) -> usize {
        self.item.lane
    }

    pub fn work_item(&self) -> &WorkItem {
        self.item
    }

    pub fn launch(&self) -> &LaunchInfo {
        self.launch
    }

    pub fn read_vector(&self, reg: u32) -> EmuResult<u32> {
        self.item.vregs.read(reg)
    }

    pub fn write_vector(&mut self, reg: u32, value: u32) -> EmuResult<()> {
        self.item.vregs.write(reg, value)
    }

    pub fn read_scalar(&self, reg: u32) -> EmuResult<u32> {
        self.sregs.read(reg)
    }

    pub fn write_scalar(&mut self, reg: u32, value: u32) -> EmuResult<()> {
        self.sregs.write(reg, value)
    }

    pub fn read_scalar_u64(&self, reg: u32) -> EmuResult<u64> {
        self.sregs.read_u64(reg)
    }

    pub fn write_scalar_u64(&mut self, reg: u32, value: u64) -> EmuResult<()> {
        self.sregs.write_u64(reg, value)
    }

    pub fn scc(&self) -> bool {
        self.sregs.scc()
    }

    pub fn set_scc(&mut self, value: bool) {
        self.sregs.set_scc(value)
    }

    /// Reads this lane's bit of the 64-bit scalar pair starting at `reg`.
    pub fn scalar_lane_bit(&self, reg: u32) -> EmuResult<bool> {
        Ok(self.sregs.read_u64(reg)? >> self.item.lane & 1 != 0)
    }

    /// Writes this lane's bit of the 64-bit scalar pair starting at `reg`.
    pub fn set_scalar_lane_bit(&mut self, reg: u32, bit: bool) -> EmuResult<()> {
        self.sregs.set_lane_bit(reg, self.item.lane, bit)
    }

    /// Records this lane's predicate for a mask-stack commit.
    pub fn set_predicate(&mut self, active: bool) {
        self.pending.set(self.item.lane, active);
    }

    fn record(&mut self, space: MemSpace, kind: AccessKind, addr: u32) {
        match (space, kind) {
            (MemSpace::Global, AccessKind::Read) => self.flags.global_mem_read = true,
            (MemSpace::Global, AccessKind::Write) => self.flags.global_mem_write = true,
            (MemSpace::Global, AccessKind::Atomic) => self.flags.global_mem_atomic = true,
            (MemSpace::Local, AccessKind::Read) => self.flags.local_mem_read = true,
            (MemSpace::Local, AccessKind::Write | AccessKind::Atomic) => {
                self.flags.local_mem_write = true
            }
        }
        self.flags.accesses.push(MemAccess {
            lane: self.item.lane,
            space,
            kind,
            addr,
            size: 4,
        });
    }

    pub fn read_global(&mut self, addr: u32) -> EmuResult<u32> {
        self.record(MemSpace::Global, AccessKind::Read, addr);
        self.global.read_u32(addr)
    }

    pub fn write_global(&mut self, addr: u32, value: u32) -> EmuResult<()> {
        self.record(MemSpace::Global, AccessKind::Write, addr);
        self.global.write_u32(addr, value)
    }

    /// Adds `value` to the word at `addr` and returns the previous contents.
    pub fn atomic_add_global(&mut self, addr: u32, value: u32) -> EmuResult<u32> {
        self.record(MemSpace::Global, AccessKind::Atomic, addr);
        let old = self.global.read_u32(addr)?;
        self.global.write_u32(addr, old.wrapping_add(value))?;
        Ok(old)
    }

    pub fn read_local(&mut self, addr: u32) -> EmuResult<u32> {
        self.record(MemSpace::Local, AccessKind::Read, addr);
        self.local.read_u32(addr)
    }

    pub fn write_local(&mut self, addr: u32, value: u32) -> EmuResult<()> {
        self.record(MemSpace::Local, AccessKind::Write, addr);
        self.local.write_u32(addr, value)
    }

    pub fn atomic_add_local(&mut self, addr: u32, value: u32) -> EmuResult<u32> {
        self.record(MemSpace::Local, AccessKind::Atomic, addr);
        let old = self.local.read_u32(addr)?;
        self.local.write_u32(addr, old.wrapping_add(value))?;
        Ok(old)
    }

    /// Interprets four consecutive scalar registers as a buffer descriptor.
    pub fn buffer_descriptor(&self, reg: u32) -> EmuResult<BufferDescriptor> {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.sregs.read(reg + i as u32)?;
        }
        Ok(bytemuck::cast(words))
    }

    /// Reads a buffer descriptor straight out of one of the launch's tables.
    pub fn table_descriptor(&self, table: TableKind, slot: u32) -> EmuResult<BufferDescriptor> {
        self.launch.read_buffer_descriptor(&*self.global, table, slot)
    }
}
