mod memory;
mod ndrange;
mod regs;
mod stats;
mod wavefront;
mod work_group;
mod work_item;

pub use memory::{DevicePointer, GlobalMemory, LocalMemory, Memory};
pub use ndrange::{
    BufferDescriptor, DescriptorKind, ImageDescriptor, LaunchDescriptor, LaunchInfo, NDRange,
    NdRangeId, Stage, TableEntry, TableKind, UserElement, TOTAL_TABLE_SIZE,
};
pub use regs::{sreg, RegisterFile, ScalarRegisters, VectorRegisters};
pub use stats::Stats;
pub use wavefront::{
    AccessKind, ControlContext, DivergenceController, InstFlags, LaneMask, MaskStack, MemAccess,
    MemSpace, StepEvent, Wavefront,
};
pub use work_group::{WorkGroup, WorkGroupState};
pub use work_item::{LaneContext, WorkItem};

use crate::config::EmuConfig;
use crate::isa::Isa;

/// Problems with how a launch or the emulator was set up. The caller can
/// fix the input and try again.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("work dimension {0} is outside 1..=3")]
    InvalidDimensions(usize),
    #[error("expected {dims} global and local sizes")]
    MissingSizes { dims: usize },
    #[error("global size of dimension {0} is zero")]
    ZeroGlobalSize(usize),
    #[error("local size of dimension {0} is zero")]
    ZeroLocalSize(usize),
    #[error("global size {global} of dimension {dim} is not a multiple of local size {local}")]
    IndivisibleSize { dim: usize, global: u32, local: u32 },
    #[error("global size {0:?} has more work-items than fit in 32 bits")]
    GlobalSizeTooLarge([u32; 3]),
    #[error("work-group of {size} work-items exceeds the maximum of {max}")]
    WorkGroupTooLarge { size: u32, max: u32 },
    #[error("work-group id {id} is outside 0..{count}")]
    InvalidWorkGroupId { id: u32, count: u32 },
    #[error("work-group {0} was already enqueued")]
    DuplicateWorkGroup(u32),
    #[error("slot {slot} is outside the {table} table")]
    SlotOutOfRange { table: TableKind, slot: u32 },
    #[error("image descriptors cannot go into the {0} table")]
    ImageInBufferTable(TableKind),
    #[error("user element at s{sreg} does not fit in {sgpr_count} scalar registers")]
    UserElementOutOfRange { sreg: u32, sgpr_count: u32 },
    #[error("no ndrange with id {0}")]
    UnknownNdRange(NdRangeId),
    #[error("wavefront size must be 32 or 64, got {0}")]
    InvalidWavefrontSize(u32),
    #[error("mask stack depth must be at least 1")]
    InvalidStackDepth,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("cannot allocate {0} bytes of device memory")]
    OutOfMemory(usize),
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort emulation.
#[derive(thiserror::Error, Debug)]
pub enum EmuError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("mask stack overflow (maximum depth {max_depth})")]
    StackOverflow { max_depth: usize },
    #[error("cannot pop {count} mask frames at depth {depth}")]
    StackUnderflow { count: usize, depth: usize },
    #[error("mask stack operation on a flat-mask wavefront")]
    NoMaskStack,
    #[error("pc {pc:#x} outside instruction stream of {len} bytes")]
    PcOutOfRange { pc: i64, len: usize },
    #[error("mask width {got} does not match {expected} lanes")]
    MaskWidthMismatch { expected: usize, got: usize },
    #[error("unknown encoding {opcode:#x} at pc {pc:#x}")]
    UnknownEncoding { pc: u32, opcode: u32 },
    #[error("control-flow instruction {name} inside a clause at pc {pc:#x}")]
    ControlFlowInClause { pc: u32, name: &'static str },
    #[error("instruction {0} is not implemented")]
    Unimplemented(&'static str),
    #[error("access to unmapped global memory at {addr:#x} ({size} bytes)")]
    MemoryAccess { addr: u32, size: usize },
    #[error("local memory access at {addr:#x} ({size} bytes) out of bounds")]
    LocalMemoryAccess { addr: u32, size: usize },
    #[error("invalid {file} register {id}")]
    InvalidRegister { file: RegisterFile, id: u32 },
    #[error("register {0} is read-only")]
    ReadOnlyRegister(u32),
    #[error("slot {slot} of the {table} table holds no descriptor")]
    InvalidDescriptor { table: TableKind, slot: u32 },
    #[error("no wavefront with index {0}")]
    InvalidWavefront(usize),
    #[error("no running work-group at index {0}")]
    InvalidWorkGroup(usize),
    #[error("work-group {0} removed before it finished")]
    GroupNotFinished(u32),
    #[error("work-group {group} has no runnable wavefront")]
    Deadlock { group: u32 },
    #[error("instruction limit of {0} reached")]
    InstructionLimit(u64),
}

impl EmuError {
    /// Everything except a wrapped [`ConfigError`] is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EmuError::Config(_))
    }
}

pub type EmuResult<T> = Result<T, EmuError>;

/// Owns device memory and every launched ND-range, and runs them one
/// wavefront step at a time.
pub struct Emulator<I: Isa> {
    isa: I,
    config: EmuConfig,
    memory: Memory,
    ndranges: Vec<NDRange<I>>,
    next_ndrange_id: NdRangeId,
    /// Descriptor table regions released by removed launches.
    free_tables: Vec<u32>,
    executed: u64,
    stats: Stats,
}

impl<I: Isa> Emulator<I> {
    pub fn new(isa: I, config: EmuConfig) -> Self {
        Emulator {
            isa,
            config,
            memory: Memory::new(),
            ndranges: Vec::new(),
            next_ndrange_id: 0,
            free_tables: Vec::new(),
            executed: 0,
            stats: Stats::default(),
        }
    }

    pub fn isa(&self) -> &I {
        &self.isa
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn alloc(&mut self, size: usize, align: usize) -> Result<DevicePointer, ConfigError> {
        self.memory.alloc(size, align)
    }

    pub fn write(&mut self, ptr: DevicePointer, offset: usize, data: &[u8]) -> EmuResult<()> {
        self.memory.write(ptr.addr() + offset as u32, data)
    }

    pub fn read(&self, ptr: DevicePointer, offset: usize, data: &mut [u8]) -> EmuResult<()> {
        self.memory.read(ptr.addr() + offset as u32, data)
    }

    /// Validates the launch, maps its descriptor tables and queues every
    /// work-group.
    pub fn launch(&mut self, desc: &LaunchDescriptor) -> Result<NdRangeId, ConfigError> {
        self.config.validate()?;
        let id = self.next_ndrange_id;
        let tables = self.table_region()?;
        let mut ndrange = NDRange::new(id, &self.isa, &self.config, desc, tables);
        let setup = ndrange
            .setup_size(&desc.global_size, &desc.local_size, desc.work_dim)
            .and_then(|_| ndrange.validate_user_elements())
            .and_then(|_| ndrange.enqueue_all_groups());
        if let Err(e) = setup {
            self.free_tables.push(tables);
            return Err(e);
        }
        log::debug!(
            "ndrange {}: launched {:?} global {:?} local {:?}, {} work-groups",
            id,
            desc.stage,
            ndrange.info().global_size(),
            ndrange.info().local_size(),
            ndrange.info().group_count_1d()
        );
        self.next_ndrange_id += 1;
        self.ndranges.push(ndrange);
        Ok(id)
    }

    fn position(&self, id: NdRangeId) -> Result<usize, ConfigError> {
        self.ndranges
            .iter()
            .position(|nd| nd.id() == id)
            .ok_or(ConfigError::UnknownNdRange(id))
    }

    pub fn ndrange(&self, id: NdRangeId) -> Option<&NDRange<I>> {
        self.ndranges.iter().find(|nd| nd.id() == id)
    }

    pub fn ndrange_mut(&mut self, id: NdRangeId) -> Option<&mut NDRange<I>> {
        self.ndranges.iter_mut().find(|nd| nd.id() == id)
    }

    pub fn insert_buffer(
        &mut self,
        id: NdRangeId,
        table: TableKind,
        slot: u32,
        desc: &BufferDescriptor,
    ) -> EmuResult<()> {
        let idx = self.position(id)?;
        self.ndranges[idx].insert_buffer(&mut self.memory, table, slot, desc)
    }

    pub fn insert_image(
        &mut self,
        id: NdRangeId,
        table: TableKind,
        slot: u32,
        desc: &ImageDescriptor,
    ) -> EmuResult<()> {
        let idx = self.position(id)?;
        self.ndranges[idx].insert_image(&mut self.memory, table, slot, desc)
    }

    /// Registers the callback that resumes a host waiting on `id`. Fires
    /// right away if the launch has already drained.
    pub fn set_wakeup<F>(&mut self, id: NdRangeId, wakeup: F) -> Result<(), ConfigError>
    where
        F: FnOnce() + 'static,
    {
        let idx = self.position(id)?;
        let ndrange = &mut self.ndranges[idx];
        ndrange.set_wakeup(Box::new(wakeup));
        if ndrange.is_completed() {
            ndrange.wakeup_waiting_host();
        }
        Ok(())
    }

    /// Detaches a launch. Its descriptor tables go back to the emulator and
    /// are handed, zeroed, to a later launch.
    pub fn remove_ndrange(&mut self, id: NdRangeId) -> Option<NDRange<I>> {
        let idx = self.position(id).ok()?;
        let ndrange = self.ndranges.remove(idx);
        self.free_tables.push(ndrange.info().table_address(TableKind::ALL[0]));
        Some(ndrange)
    }

    fn table_region(&mut self) -> Result<u32, ConfigError> {
        match self.free_tables.pop() {
            Some(base) => {
                self.memory.clear(base, TOTAL_TABLE_SIZE);
                Ok(base)
            }
            None => Ok(self.memory.alloc(TOTAL_TABLE_SIZE as usize, 256)?.addr()),
        }
    }

    /// One scheduling round over every launch with work left. Returns false
    /// once nothing is left to run.
    pub fn step(&mut self) -> EmuResult<bool> {
        let mut active = false;
        for ndrange in self.ndranges.iter_mut() {
            if ndrange.is_drained() {
                continue;
            }
            active = true;
            if ndrange.work_groups().is_empty() {
                let Some(id) = ndrange.dequeue_next_waiting_group() else {
                    continue;
                };
                ndrange.schedule_group(id, &self.memory)?;
            }
            let (executed, finished) =
                ndrange.step_group(0, &self.isa, &mut self.memory, &mut self.stats)?;
            self.executed += executed as u64;
            if finished {
                let group = ndrange.remove_group(0)?;
                self.stats.work_groups_completed += 1;
                log::debug!("ndrange {}: work-group {} done", ndrange.id(), group.id());
                if ndrange.is_drained() {
                    self.stats.ndranges_completed += 1;
                    ndrange.wakeup_waiting_host();
                }
            }
        }
        if let Some(limit) = self.config.max_instructions {
            let pending = self.ndranges.iter().any(|nd| !nd.is_drained());
            if self.executed >= limit && pending {
                return Err(EmuError::InstructionLimit(limit));
            }
        }
        Ok(active)
    }

    pub fn run(&mut self) -> EmuResult<()> {
        while self.step()? {}
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::asm;
    use crate::isa::gcn::Gcn;
    use std::cell::Cell;
    use std::rc::Rc;

    fn emulator() -> Emulator<Gcn> {
        Emulator::new(Gcn, EmuConfig::default())
    }

    #[test]
    fn single_group_wakes_host_once() {
        let kernel = asm::assemble("v_mov_b32 v1, v0\ns_endpgm").unwrap();
        let mut emu = emulator();
        let id = emu.launch(&kernel.launch().global1d(64).local1d(64)).unwrap();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        emu.set_wakeup(id, move || counter.set(counter.get() + 1))
            .unwrap();

        assert!(emu.step().unwrap());
        assert_eq!(fired.get(), 0);
        assert!(emu.step().unwrap());
        assert_eq!(fired.get(), 1);
        assert!(emu.ndrange(id).unwrap().is_drained());
        assert!(!emu.step().unwrap());
        assert_eq!(fired.get(), 1);

        let stats = emu.stats();
        assert_eq!(stats.work_groups_completed, 1);
        assert_eq!(stats.wavefronts_completed, 1);
        assert_eq!(stats.ndranges_completed, 1);
        assert_eq!(stats.instructions, 2);
    }

    #[test]
    fn wakeup_registered_after_completion_fires() {
        let kernel = asm::assemble("s_endpgm").unwrap();
        let mut emu = emulator();
        let id = emu.launch(&kernel.launch().global1d(4).local1d(4)).unwrap();
        emu.run().unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        emu.set_wakeup(id, move || flag.set(true)).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn launch_rejects_bad_sizes() {
        let kernel = asm::assemble("s_endpgm").unwrap();
        let mut emu = emulator();
        let err = emu.launch(&kernel.launch().global1d(10).local1d(3)).unwrap_err();
        assert!(matches!(err, ConfigError::IndivisibleSize { .. }));
        assert!(!EmuError::from(err).is_fatal());
    }

    #[test]
    fn falling_off_the_end_finishes() {
        let kernel = asm::assemble("v_mov_b32 v1, 7").unwrap();
        let mut emu = emulator();
        emu.launch(&kernel.launch().global1d(8).local1d(8)).unwrap();
        emu.run().unwrap();
        assert_eq!(emu.stats().wavefronts_completed, 1);
    }

    #[test]
    fn branch_past_end_is_fatal() {
        let kernel = asm::assemble("s_branch 4\ns_endpgm").unwrap();
        let mut emu = emulator();
        emu.launch(&kernel.launch().global1d(8).local1d(8)).unwrap();
        let err = emu.run().unwrap_err();
        assert!(matches!(err, EmuError::PcOutOfRange { pc: 24, len: 16 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn instruction_limit() {
        let kernel = asm::assemble("spin:\ns_branch spin").unwrap();
        let config = EmuConfig {
            max_instructions: Some(100),
            ..EmuConfig::default()
        };
        let mut emu = Emulator::new(Gcn, config);
        emu.launch(&kernel.launch().global1d(8).local1d(8)).unwrap();
        assert!(matches!(emu.run(), Err(EmuError::InstructionLimit(100))));
    }

    #[test]
    fn limit_reached_by_finishing_run_is_not_an_error() {
        let kernel = asm::assemble("s_nop\ns_endpgm").unwrap();
        let config = EmuConfig {
            max_instructions: Some(2),
            ..EmuConfig::default()
        };
        let mut emu = Emulator::new(Gcn, config);
        let id = emu.launch(&kernel.launch().global1d(8).local1d(8)).unwrap();
        emu.run().unwrap();
        assert!(emu.ndrange(id).unwrap().is_completed());
        assert_eq!(emu.stats().instructions, 2);
        assert_eq!(emu.stats().wavefronts_completed, 1);

        // one more instruction than allowed still trips the limit
        let kernel = asm::assemble("s_nop\ns_nop\ns_endpgm").unwrap();
        emu.launch(&kernel.launch().global1d(8).local1d(8)).unwrap();
        assert!(matches!(emu.run(), Err(EmuError::InstructionLimit(2))));
    }

    #[test]
    fn removed_launch_tables_are_reused() {
        let kernel = asm::assemble("s_endpgm").unwrap();
        let mut emu = emulator();
        let first = emu.launch(&kernel.launch().global1d(64).local1d(64)).unwrap();
        emu.insert_buffer(first, TableKind::Uav, 0, &BufferDescriptor::words(0x1000, 4))
            .unwrap();
        emu.run().unwrap();
        let base = emu.ndrange(first).unwrap().info().table_address(TableKind::Uav);
        let heap_before = emu.alloc(4, 4).unwrap().addr();

        assert!(emu.remove_ndrange(first).is_some());
        let second = emu.launch(&kernel.launch().global1d(64).local1d(64)).unwrap();
        let nd = emu.ndrange(second).unwrap();
        assert_eq!(nd.info().table_address(TableKind::Uav), base);
        assert!(!nd.info().table_entry(TableKind::Uav, 0).unwrap().valid);
        let mut bytes = vec![0xffu8; TOTAL_TABLE_SIZE as usize];
        emu.memory.read(base, &mut bytes).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
        // nothing new was carved from the heap for the second launch
        assert_eq!(emu.alloc(4, 4).unwrap().addr(), heap_before + 4);
    }

    #[test]
    fn failed_launch_returns_its_tables() {
        let kernel = asm::assemble("s_endpgm").unwrap();
        let mut emu = emulator();
        assert!(emu.launch(&kernel.launch().global1d(10).local1d(4)).is_err());
        let id = emu.launch(&kernel.launch().global1d(8).local1d(4)).unwrap();
        let base = emu.ndrange(id).unwrap().info().table_address(TableKind::Uav);

        let mut fresh = emulator();
        let id = fresh.launch(&kernel.launch().global1d(8).local1d(4)).unwrap();
        assert_eq!(fresh.ndrange(id).unwrap().info().table_address(TableKind::Uav), base);
    }

    #[test]
    fn unknown_ndrange() {
        let mut emu = emulator();
        assert!(matches!(
            emu.set_wakeup(3, || {}),
            Err(ConfigError::UnknownNdRange(3))
        ));
        assert!(emu.remove_ndrange(3).is_none());
    }
}
