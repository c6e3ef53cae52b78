use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};

use crate::config::EmuConfig;
use crate::isa::{DivergenceStyle, Isa, RegisterConvention};

use super::memory::GlobalMemory;
use super::regs::{ScalarRegisters, VectorRegisters};
use super::stats::Stats;
use super::wavefront::{DivergenceController, Wavefront};
use super::work_group::WorkGroup;
use super::work_item::WorkItem;
use super::{ConfigError, EmuError, EmuResult};

pub type NdRangeId = u32;

/// Which kind of shader the launch runs. Decides the cold-start registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Compute,
    Vertex,
    Geometry,
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Uav,
    ConstantBuffer,
    Resource,
    VertexBuffer,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::Uav,
        TableKind::ConstantBuffer,
        TableKind::Resource,
        TableKind::VertexBuffer,
    ];

    pub const fn slots(self) -> u32 {
        16
    }

    pub const fn entry_size(self) -> u32 {
        match self {
            TableKind::ConstantBuffer => 16,
            TableKind::Uav | TableKind::Resource | TableKind::VertexBuffer => 32,
        }
    }

    pub const fn table_size(self) -> u32 {
        self.slots() * self.entry_size()
    }

    fn index(self) -> usize {
        match self {
            TableKind::Uav => 0,
            TableKind::ConstantBuffer => 1,
            TableKind::Resource => 2,
            TableKind::VertexBuffer => 3,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Uav => write!(f, "UAV"),
            TableKind::ConstantBuffer => write!(f, "constant buffer"),
            TableKind::Resource => write!(f, "resource"),
            TableKind::VertexBuffer => write!(f, "vertex buffer"),
        }
    }
}

/// Bytes needed to hold all four descriptor tables back to back.
pub const TOTAL_TABLE_SIZE: u32 = TableKind::Uav.table_size()
    + TableKind::ConstantBuffer.table_size()
    + TableKind::Resource.table_size()
    + TableKind::VertexBuffer.table_size();

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferDescriptor {
    pub base_addr: u32,
    pub stride: u32,
    pub num_records: u32,
    pub flags: u32,
}

impl BufferDescriptor {
    /// A buffer of `num_records` 32-bit words.
    pub fn words(base_addr: u32, num_records: u32) -> Self {
        BufferDescriptor {
            base_addr,
            stride: 4,
            num_records,
            flags: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImageDescriptor {
    pub base_addr: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub pitch: u32,
    pub format: u32,
    pub flags: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorKind {
    #[default]
    Buffer,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableEntry {
    pub valid: bool,
    pub kind: DescriptorKind,
    pub size: u32,
}

#[derive(Debug, Clone)]
struct DescriptorTable {
    kind: TableKind,
    base: u32,
    entries: Vec<TableEntry>,
}

impl DescriptorTable {
    fn new(kind: TableKind, base: u32) -> Self {
        DescriptorTable {
            kind,
            base,
            entries: vec![TableEntry::default(); kind.slots() as usize],
        }
    }

    fn slot_address(&self, slot: u32) -> Result<u32, ConfigError> {
        if slot >= self.kind.slots() {
            return Err(ConfigError::SlotOutOfRange {
                table: self.kind,
                slot,
            });
        }
        Ok(self.base + slot * self.kind.entry_size())
    }
}

/// Scalar registers pre-loaded before a wavefront starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserElement {
    /// Four registers holding the constant buffer descriptor in `slot`.
    ConstBuffer { slot: u32, sreg: u32 },
    /// Two registers holding the address of the constant buffer table.
    ConstBufferTable { sreg: u32 },
    /// Four registers holding the UAV buffer descriptor in `slot`.
    Uav { slot: u32, sreg: u32 },
    UavTable { sreg: u32 },
    ResourceTable { sreg: u32 },
    VertexBufferTable { sreg: u32 },
}

impl UserElement {
    fn sreg_span(&self) -> (u32, u32) {
        match *self {
            UserElement::ConstBuffer { sreg, .. } | UserElement::Uav { sreg, .. } => (sreg, 4),
            UserElement::ConstBufferTable { sreg }
            | UserElement::UavTable { sreg }
            | UserElement::ResourceTable { sreg }
            | UserElement::VertexBufferTable { sreg } => (sreg, 2),
        }
    }
}

/// What the host hands over to start a kernel.
#[derive(Debug, Clone)]
pub struct LaunchDescriptor {
    pub instructions: Vec<u8>,
    pub instruction_address: u32,
    pub stage: Stage,
    pub work_dim: usize,
    pub global_size: [u32; 3],
    pub local_size: [u32; 3],
    pub local_memory_size: u32,
    pub vgpr_count: u32,
    pub sgpr_count: u32,
    pub wg_id_sgpr: Option<u32>,
    pub user_elements: Vec<UserElement>,
}

impl LaunchDescriptor {
    pub fn new(instructions: Vec<u8>) -> Self {
        LaunchDescriptor {
            instructions,
            instruction_address: 0,
            stage: Stage::Compute,
            work_dim: 1,
            global_size: [1; 3],
            local_size: [1; 3],
            local_memory_size: 0,
            vgpr_count: 16,
            sgpr_count: 104,
            wg_id_sgpr: None,
            user_elements: Vec::new(),
        }
    }

    pub fn global1d(mut self, x: u32) -> Self {
        self.global_size = [x, 1, 1];
        self.work_dim = self.work_dim.max(1);
        self
    }

    pub fn global2d(mut self, x: u32, y: u32) -> Self {
        self.global_size = [x, y, 1];
        self.work_dim = self.work_dim.max(2);
        self
    }

    pub fn global3d(mut self, x: u32, y: u32, z: u32) -> Self {
        self.global_size = [x, y, z];
        self.work_dim = 3;
        self
    }

    pub fn local1d(mut self, x: u32) -> Self {
        self.local_size = [x, 1, 1];
        self
    }

    pub fn local2d(mut self, x: u32, y: u32) -> Self {
        self.local_size = [x, y, 1];
        self
    }

    pub fn local3d(mut self, x: u32, y: u32, z: u32) -> Self {
        self.local_size = [x, y, z];
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn local_memory(mut self, bytes: u32) -> Self {
        self.local_memory_size = bytes;
        self
    }

    pub fn vgprs(mut self, count: u32) -> Self {
        self.vgpr_count = count;
        self
    }

    pub fn wg_id_sgpr(mut self, sreg: u32) -> Self {
        self.wg_id_sgpr = Some(sreg);
        self
    }

    pub fn user_element(mut self, element: UserElement) -> Self {
        self.user_elements.push(element);
        self
    }
}

/// The read-only part of a launch, visible to every lane.
#[derive(Debug, Clone)]
pub struct LaunchInfo {
    id: NdRangeId,
    stage: Stage,
    instructions: Vec<u8>,
    instruction_address: u32,
    work_dim: usize,
    global_size: [u32; 3],
    local_size: [u32; 3],
    group_count: [u32; 3],
    local_memory_size: u32,
    vgpr_count: u32,
    sgpr_count: u32,
    wg_id_sgpr: Option<u32>,
    user_elements: Vec<UserElement>,
    tables: [DescriptorTable; 4],
}

impl LaunchInfo {
    pub fn id(&self) -> NdRangeId {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    pub fn instruction_address(&self) -> u32 {
        self.instruction_address
    }

    pub fn work_dim(&self) -> usize {
        self.work_dim
    }

    pub fn global_size(&self) -> [u32; 3] {
        self.global_size
    }

    pub fn local_size(&self) -> [u32; 3] {
        self.local_size
    }

    pub fn group_count(&self) -> [u32; 3] {
        self.group_count
    }

    pub fn global_size_1d(&self) -> u32 {
        self.global_size.iter().product()
    }

    pub fn local_size_1d(&self) -> u32 {
        self.local_size.iter().product()
    }

    pub fn group_count_1d(&self) -> u32 {
        self.group_count.iter().product()
    }

    pub fn local_memory_size(&self) -> u32 {
        self.local_memory_size
    }

    pub fn table_address(&self, table: TableKind) -> u32 {
        self.tables[table.index()].base
    }

    pub fn table_entry(&self, table: TableKind, slot: u32) -> Option<TableEntry> {
        self.tables[table.index()].entries.get(slot as usize).copied()
    }

    /// Reads a buffer descriptor back from global memory.
    pub fn read_buffer_descriptor(
        &self,
        global: &dyn GlobalMemory,
        table: TableKind,
        slot: u32,
    ) -> EmuResult<BufferDescriptor> {
        let addr = self.valid_slot(table, slot)?;
        let mut bytes = [0u8; std::mem::size_of::<BufferDescriptor>()];
        global.read(addr, &mut bytes)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    fn valid_slot(&self, table: TableKind, slot: u32) -> EmuResult<u32> {
        let t = &self.tables[table.index()];
        let addr = t.slot_address(slot)?;
        match t.entries[slot as usize] {
            TableEntry { valid: true, .. } => Ok(addr),
            _ => Err(EmuError::InvalidDescriptor { table, slot }),
        }
    }
}

/// One kernel launch: its iteration space, its descriptor tables, the queue
/// of work-groups still to run and the ones currently scheduled.
pub struct NDRange<I: Isa> {
    info: LaunchInfo,
    waiting: VecDeque<u32>,
    admitted: Vec<bool>,
    work_groups: Vec<WorkGroup<I>>,
    next_wavefront_id: u32,
    wavefront_size: usize,
    mask_stack_depth: usize,
    max_work_group_size: u32,
    divergence: DivergenceStyle,
    convention: RegisterConvention,
    completed: bool,
    wakeup: Option<Box<dyn FnOnce()>>,
}

impl<I: Isa> NDRange<I> {
    /// Creates the launch with tables at `table_base`. Sizes are unset until
    /// [`NDRange::setup_size`] succeeds.
    pub fn new(
        id: NdRangeId,
        isa: &I,
        config: &EmuConfig,
        desc: &LaunchDescriptor,
        table_base: u32,
    ) -> Self {
        let mut base = table_base;
        let tables = TableKind::ALL.map(|kind| {
            let table = DescriptorTable::new(kind, base);
            base += kind.table_size();
            table
        });
        NDRange {
            info: LaunchInfo {
                id,
                stage: desc.stage,
                instructions: desc.instructions.clone(),
                instruction_address: desc.instruction_address,
                work_dim: 1,
                global_size: [1; 3],
                local_size: [1; 3],
                group_count: [1; 3],
                local_memory_size: desc.local_memory_size,
                vgpr_count: desc.vgpr_count,
                sgpr_count: desc.sgpr_count,
                wg_id_sgpr: desc.wg_id_sgpr,
                user_elements: desc.user_elements.clone(),
                tables,
            },
            waiting: VecDeque::new(),
            admitted: vec![false],
            work_groups: Vec::new(),
            next_wavefront_id: 0,
            wavefront_size: config.wavefront_size as usize,
            mask_stack_depth: config.mask_stack_depth,
            max_work_group_size: config.max_work_group_size,
            divergence: isa.divergence(),
            convention: isa.convention(),
            completed: false,
            wakeup: None,
        }
    }

    pub fn id(&self) -> NdRangeId {
        self.info.id
    }

    pub fn info(&self) -> &LaunchInfo {
        &self.info
    }

    pub fn work_groups(&self) -> &[WorkGroup<I>] {
        &self.work_groups
    }

    pub fn work_group_mut(&mut self, index: usize) -> Option<&mut WorkGroup<I>> {
        self.work_groups.get_mut(index)
    }

    pub fn waiting_groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.waiting.iter().copied()
    }

    /// No group is waiting and none is scheduled.
    pub fn is_drained(&self) -> bool {
        self.waiting.is_empty() && self.work_groups.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Validates and stores the iteration space. Unused dimensions become 1.
    pub fn setup_size(&mut self, global: &[u32], local: &[u32], dims: usize) -> Result<(), ConfigError> {
        if !(1..=3).contains(&dims) {
            return Err(ConfigError::InvalidDimensions(dims));
        }
        if global.len() < dims || local.len() < dims {
            return Err(ConfigError::MissingSizes { dims });
        }
        let mut global_size = [1u32; 3];
        let mut local_size = [1u32; 3];
        let mut group_count = [1u32; 3];
        for d in 0..dims {
            if global[d] == 0 {
                return Err(ConfigError::ZeroGlobalSize(d));
            }
            if local[d] == 0 {
                return Err(ConfigError::ZeroLocalSize(d));
            }
            if global[d] % local[d] != 0 {
                return Err(ConfigError::IndivisibleSize {
                    dim: d,
                    global: global[d],
                    local: local[d],
                });
            }
            global_size[d] = global[d];
            local_size[d] = local[d];
            group_count[d] = global[d] / local[d];
        }
        // Every per-dimension local size and group count divides the global
        // size, so their products fit once this one does.
        if global_size
            .iter()
            .try_fold(1u32, |acc, &g| acc.checked_mul(g))
            .is_none()
        {
            return Err(ConfigError::GlobalSizeTooLarge(global_size));
        }
        let work_group_size = local_size.iter().product::<u32>();
        if work_group_size > self.max_work_group_size {
            return Err(ConfigError::WorkGroupTooLarge {
                size: work_group_size,
                max: self.max_work_group_size,
            });
        }
        self.info.work_dim = dims;
        self.info.global_size = global_size;
        self.info.local_size = local_size;
        self.info.group_count = group_count;
        self.admitted = vec![false; self.info.group_count_1d() as usize];
        Ok(())
    }

    /// Checks that every user element fits in the kernel's scalar registers.
    pub fn validate_user_elements(&self) -> Result<(), ConfigError> {
        for element in &self.info.user_elements {
            let (sreg, width) = element.sreg_span();
            if sreg + width > self.info.sgpr_count {
                return Err(ConfigError::UserElementOutOfRange {
                    sreg,
                    sgpr_count: self.info.sgpr_count,
                });
            }
        }
        if let Some(sreg) = self.info.wg_id_sgpr {
            if sreg + self.info.work_dim as u32 > self.info.sgpr_count {
                return Err(ConfigError::UserElementOutOfRange {
                    sreg,
                    sgpr_count: self.info.sgpr_count,
                });
            }
        }
        Ok(())
    }

    pub fn enqueue_waiting_group(&mut self, id: u32) -> Result<(), ConfigError> {
        let count = self.info.group_count_1d();
        let Some(admitted) = self.admitted.get_mut(id as usize) else {
            return Err(ConfigError::InvalidWorkGroupId { id, count });
        };
        if *admitted {
            return Err(ConfigError::DuplicateWorkGroup(id));
        }
        *admitted = true;
        self.waiting.push_back(id);
        Ok(())
    }

    pub fn enqueue_all_groups(&mut self) -> Result<(), ConfigError> {
        for id in 0..self.info.group_count_1d() {
            self.enqueue_waiting_group(id)?;
        }
        Ok(())
    }

    pub fn dequeue_next_waiting_group(&mut self) -> Option<u32> {
        self.waiting.pop_front()
    }

    pub fn insert_buffer(
        &mut self,
        global: &mut dyn GlobalMemory,
        table: TableKind,
        slot: u32,
        desc: &BufferDescriptor,
    ) -> EmuResult<()> {
        let t = &mut self.info.tables[table.index()];
        let addr = t.slot_address(slot)?;
        global.write(addr, bytemuck::bytes_of(desc))?;
        t.entries[slot as usize] = TableEntry {
            valid: true,
            kind: DescriptorKind::Buffer,
            size: std::mem::size_of::<BufferDescriptor>() as u32,
        };
        Ok(())
    }

    pub fn insert_image(
        &mut self,
        global: &mut dyn GlobalMemory,
        table: TableKind,
        slot: u32,
        desc: &ImageDescriptor,
    ) -> EmuResult<()> {
        if !matches!(table, TableKind::Uav | TableKind::Resource) {
            return Err(ConfigError::ImageInBufferTable(table).into());
        }
        let t = &mut self.info.tables[table.index()];
        let addr = t.slot_address(slot)?;
        global.write(addr, bytemuck::bytes_of(desc))?;
        t.entries[slot as usize] = TableEntry {
            valid: true,
            kind: DescriptorKind::Image,
            size: std::mem::size_of::<ImageDescriptor>() as u32,
        };
        Ok(())
    }

    fn descriptor_words(&self, global: &dyn GlobalMemory, table: TableKind, slot: u32) -> EmuResult<[u32; 4]> {
        let desc = self.info.read_buffer_descriptor(global, table, slot)?;
        Ok(bytemuck::cast(desc))
    }

    /// Scalar registers every wavefront of the launch starts with.
    fn user_sregs(&self, global: &dyn GlobalMemory) -> EmuResult<Vec<(u32, u32)>> {
        let mut preload = Vec::new();
        for element in &self.info.user_elements {
            let (sreg, words) = match *element {
                UserElement::ConstBuffer { slot, sreg } => {
                    (sreg, self.descriptor_words(global, TableKind::ConstantBuffer, slot)?)
                }
                UserElement::Uav { slot, sreg } => {
                    (sreg, self.descriptor_words(global, TableKind::Uav, slot)?)
                }
                UserElement::ConstBufferTable { sreg } => {
                    (sreg, [self.info.table_address(TableKind::ConstantBuffer), 0, 0, 0])
                }
                UserElement::UavTable { sreg } => (sreg, [self.info.table_address(TableKind::Uav), 0, 0, 0]),
                UserElement::ResourceTable { sreg } => {
                    (sreg, [self.info.table_address(TableKind::Resource), 0, 0, 0])
                }
                UserElement::VertexBufferTable { sreg } => {
                    (sreg, [self.info.table_address(TableKind::VertexBuffer), 0, 0, 0])
                }
            };
            let (_, width) = element.sreg_span();
            preload.extend((sreg..).zip(words).take(width as usize));
        }
        Ok(preload)
    }

    /// Builds work-group `id` with its wavefronts and work-items and sets up
    /// their starting registers. Returns the group's index in the running set.
    pub fn schedule_group(&mut self, id: u32, global: &dyn GlobalMemory) -> EmuResult<usize> {
        let info = &self.info;
        let [gc0, gc1, _] = info.group_count;
        let group_3d = [id % gc0, id / gc0 % gc1, id / (gc0 * gc1)];
        let [ls0, ls1, _] = info.local_size;
        let [gs0, gs1, _] = info.global_size;
        let item_count = info.local_size_1d() as usize;
        let wave_size = self.wavefront_size.max(1);

        let mut work_items = Vec::with_capacity(item_count);
        for local_id in 0..item_count as u32 {
            let local_3d = [local_id % ls0, local_id / ls0 % ls1, local_id / (ls0 * ls1)];
            let id_3d = [
                group_3d[0] * ls0 + local_3d[0],
                group_3d[1] * ls1 + local_3d[1],
                group_3d[2] * info.local_size[2] + local_3d[2],
            ];
            work_items.push(WorkItem {
                id: id_3d[0] + id_3d[1] * gs0 + id_3d[2] * gs0 * gs1,
                id_3d,
                local_id,
                local_id_3d: local_3d,
                lane: local_id as usize % wave_size,
                wavefront: local_id as usize / wave_size,
                work_group: id,
                vregs: VectorRegisters::new(info.vgpr_count as usize),
            });
        }

        let preload = self.user_sregs(global)?;
        let wave_count = (item_count + wave_size - 1) / wave_size;
        let mut wavefronts = Vec::with_capacity(wave_count);
        for index in 0..wave_count {
            let items = index * wave_size..((index + 1) * wave_size).min(item_count);
            let divergence =
                DivergenceController::new(self.divergence, items.len(), self.mask_stack_depth);
            let mut wavefront = Wavefront::new(self.next_wavefront_id, index, id, items, divergence);
            self.next_wavefront_id += 1;
            for &(sreg, value) in &preload {
                wavefront.sregs.write(sreg, value)?;
            }
            self.cold_start_scalar(&mut wavefront.sregs, id, group_3d)?;
            wavefronts.push(wavefront);
        }
        for item in work_items.iter_mut() {
            self.cold_start_vector(item, id, group_3d)?;
        }

        log::debug!(
            "ndrange {}: scheduled work-group {} {:?} ({} wavefronts)",
            self.info.id,
            id,
            group_3d,
            wave_count
        );
        self.work_groups.push(WorkGroup::new(
            id,
            group_3d,
            wavefronts,
            work_items,
            self.info.local_memory_size as usize,
        ));
        Ok(self.work_groups.len() - 1)
    }

    fn cold_start_scalar(&self, sregs: &mut ScalarRegisters, id: u32, group_3d: [u32; 3]) -> EmuResult<()> {
        if self.convention != RegisterConvention::ScalarGroupId {
            return Ok(());
        }
        let Some(base) = self.info.wg_id_sgpr else {
            return Ok(());
        };
        match self.info.stage {
            Stage::Compute => {
                for (d, &group) in group_3d.iter().enumerate().take(self.info.work_dim) {
                    sregs.write(base + d as u32, group)?;
                }
            }
            Stage::Geometry => sregs.write(base, id)?,
            Stage::Vertex | Stage::Pixel => {}
        }
        Ok(())
    }

    fn cold_start_vector(&self, item: &mut WorkItem, id: u32, group_3d: [u32; 3]) -> EmuResult<()> {
        let mut values: Vec<u32> = match (self.info.stage, self.convention) {
            (Stage::Compute, RegisterConvention::ScalarGroupId) => {
                item.local_id_3d[..self.info.work_dim].to_vec()
            }
            (Stage::Compute, RegisterConvention::VectorGroupId) => {
                let mut v = item.local_id_3d.to_vec();
                v.extend_from_slice(&group_3d);
                v
            }
            (Stage::Vertex, _) => vec![item.id],
            (Stage::Geometry, RegisterConvention::ScalarGroupId) => vec![item.id],
            (Stage::Geometry, RegisterConvention::VectorGroupId) => vec![item.id, id],
            (Stage::Pixel, _) => vec![item.id_3d[0], item.id_3d[1]],
        };
        values.truncate(item.vregs.len());
        for (reg, value) in values.into_iter().enumerate() {
            item.vregs.write(reg as u32, value)?;
        }
        Ok(())
    }

    /// Runs one round over the running group at `index`. Returns whether the
    /// group is finished.
    pub(crate) fn step_group(
        &mut self,
        index: usize,
        isa: &I,
        global: &mut dyn GlobalMemory,
        stats: &mut Stats,
    ) -> EmuResult<(usize, bool)> {
        let Some(group) = self.work_groups.get_mut(index) else {
            return Err(EmuError::InvalidWorkGroup(index));
        };
        let executed = group.step(isa, global, &self.info, stats)?;
        if executed == 0 && !group.is_finished() {
            return Err(EmuError::Deadlock { group: group.id() });
        }
        Ok((executed, group.is_finished()))
    }

    /// Removes a finished group from the running set.
    pub fn remove_group(&mut self, index: usize) -> EmuResult<WorkGroup<I>> {
        let Some(group) = self.work_groups.get(index) else {
            return Err(EmuError::InvalidWorkGroup(index));
        };
        if !group.is_finished() {
            return Err(EmuError::GroupNotFinished(group.id()));
        }
        Ok(self.work_groups.remove(index))
    }

    pub fn set_wakeup(&mut self, wakeup: Box<dyn FnOnce()>) {
        self.wakeup = Some(wakeup);
    }

    pub fn has_wakeup(&self) -> bool {
        self.wakeup.is_some()
    }

    /// Resumes a host waiting on this launch once all work is done. The
    /// callback runs at most once; returns whether it ran now.
    pub fn wakeup_waiting_host(&mut self) -> bool {
        if !self.is_drained() {
            return false;
        }
        self.completed = true;
        match self.wakeup.take() {
            Some(wakeup) => {
                log::debug!("ndrange {}: waking up host", self.info.id);
                wakeup();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn take_group(&mut self, index: usize) -> WorkGroup<I> {
        self.work_groups.remove(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::emu::memory::Memory;
    use crate::isa::gcn::Gcn;
    use crate::isa::vliw::Vliw;
    use std::cell::Cell;
    use std::rc::Rc;

    fn ndrange(desc: &LaunchDescriptor) -> NDRange<Gcn> {
        NDRange::new(0, &Gcn, &EmuConfig::default(), desc, 0x1000)
    }

    #[test]
    fn size_decomposition() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        nd.setup_size(&[256], &[64], 1).unwrap();
        assert_eq!(nd.info().group_count(), [4, 1, 1]);
        assert_eq!(nd.info().global_size(), [256, 1, 1]);
        nd.enqueue_all_groups().unwrap();
        let order: Vec<u32> = std::iter::from_fn(|| nd.dequeue_next_waiting_group()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(nd.dequeue_next_waiting_group(), None);
    }

    #[test]
    fn indivisible_size_is_rejected() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        assert!(matches!(
            nd.setup_size(&[10], &[3], 1),
            Err(ConfigError::IndivisibleSize { dim: 0, global: 10, local: 3 })
        ));
        nd.setup_size(&[12], &[3], 1).unwrap();
        assert_eq!(nd.info().group_count(), [4, 1, 1]);
    }

    #[test]
    fn invalid_sizes() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        assert!(matches!(nd.setup_size(&[8], &[8], 0), Err(ConfigError::InvalidDimensions(0))));
        assert!(matches!(nd.setup_size(&[8, 8, 8, 8], &[1, 1, 1, 1], 4), Err(ConfigError::InvalidDimensions(4))));
        assert!(matches!(nd.setup_size(&[8], &[0], 1), Err(ConfigError::ZeroLocalSize(0))));
        assert!(matches!(nd.setup_size(&[0], &[1], 1), Err(ConfigError::ZeroGlobalSize(0))));
        assert!(matches!(nd.setup_size(&[8], &[8], 2), Err(ConfigError::MissingSizes { dims: 2 })));
        assert!(matches!(
            nd.setup_size(&[1024], &[512], 1),
            Err(ConfigError::WorkGroupTooLarge { size: 512, max: 256 })
        ));
    }

    #[test]
    fn flattened_size_must_fit() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        assert!(matches!(
            nd.setup_size(&[65536, 65536], &[1, 1], 2),
            Err(ConfigError::GlobalSizeTooLarge([65536, 65536, 1]))
        ));
        assert_eq!(nd.info().group_count_1d(), 1);
        assert_eq!(nd.waiting_groups().count(), 0);

        nd.setup_size(&[65536, 1024], &[256, 1], 2).unwrap();
        assert_eq!(nd.info().group_count_1d(), 256 * 1024);
    }

    #[test]
    fn two_dimensional_groups() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        nd.setup_size(&[16, 8], &[4, 4], 2).unwrap();
        assert_eq!(nd.info().group_count(), [4, 2, 1]);
        assert_eq!(nd.info().group_count_1d(), 8);
    }

    #[test]
    fn waiting_queue_rejects_bad_ids() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![]));
        nd.setup_size(&[8], &[4], 1).unwrap();
        nd.enqueue_waiting_group(1).unwrap();
        assert!(matches!(nd.enqueue_waiting_group(1), Err(ConfigError::DuplicateWorkGroup(1))));
        assert!(matches!(
            nd.enqueue_waiting_group(2),
            Err(ConfigError::InvalidWorkGroupId { id: 2, count: 2 })
        ));
    }

    #[test]
    fn schedule_sets_compute_ids() {
        let desc = LaunchDescriptor::new(vec![0; 8]).wg_id_sgpr(12);
        let mut nd = ndrange(&desc);
        nd.setup_size(&[32, 4], &[8, 2], 2).unwrap();
        let mem = Memory::new();
        let index = nd.schedule_group(5, &mem).unwrap();
        let group = &nd.work_groups()[index];
        assert_eq!(group.id_3d(), [1, 1, 0]);
        let wf = &group.wavefronts()[0];
        assert_eq!(wf.sregs().read(12).unwrap(), 1);
        assert_eq!(wf.sregs().read(13).unwrap(), 1);
        assert_eq!(wf.lanes(), 16);
        assert_eq!(wf.active_mask().bits(), 0xffff);

        let item = &group.work_items()[9];
        assert_eq!(item.local_id_3d(), [1, 1, 0]);
        assert_eq!(item.id_3d(), [9, 3, 0]);
        assert_eq!(item.id(), 9 + 3 * 32);
        assert_eq!(item.read_vector(0).unwrap(), 1);
        assert_eq!(item.read_vector(1).unwrap(), 1);
    }

    #[test]
    fn schedule_splits_wavefronts() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![0; 8]));
        nd.setup_size(&[200], &[200], 1).unwrap();
        let index = nd.schedule_group(0, &Memory::new()).unwrap();
        let group = &nd.work_groups()[index];
        let lanes: Vec<usize> = group.wavefronts().iter().map(|wf| wf.lanes()).collect();
        assert_eq!(lanes, vec![64, 64, 64, 8]);
        assert_eq!(group.work_items()[130].lane(), 2);
        assert_eq!(group.work_items()[130].wavefront(), 2);
    }

    #[test]
    fn vector_convention_places_group_ids_in_registers() {
        let desc = LaunchDescriptor::new(vec![0; 8]);
        let mut nd: NDRange<Vliw> = NDRange::new(0, &Vliw, &EmuConfig::default(), &desc, 0x1000);
        nd.setup_size(&[8], &[4], 1).unwrap();
        let index = nd.schedule_group(1, &Memory::new()).unwrap();
        let item = &nd.work_groups()[index].work_items()[3];
        assert_eq!(item.read_vector(0).unwrap(), 3);
        assert_eq!(item.read_vector(3).unwrap(), 1);
    }

    #[test]
    fn pixel_stage_gets_coordinates() {
        let desc = LaunchDescriptor::new(vec![0; 8]).stage(Stage::Pixel);
        let mut nd = ndrange(&desc);
        nd.setup_size(&[4, 4], &[2, 2], 2).unwrap();
        let index = nd.schedule_group(3, &Memory::new()).unwrap();
        let item = &nd.work_groups()[index].work_items()[3];
        assert_eq!(item.read_vector(0).unwrap(), 3);
        assert_eq!(item.read_vector(1).unwrap(), 3);
    }

    #[test]
    fn tables_and_user_elements() {
        let mut mem = Memory::new();
        mem.map(0x1000, TOTAL_TABLE_SIZE);
        let desc = LaunchDescriptor::new(vec![0; 8])
            .user_element(UserElement::Uav { slot: 2, sreg: 4 })
            .user_element(UserElement::ConstBufferTable { sreg: 8 });
        let mut nd = ndrange(&desc);
        nd.setup_size(&[4], &[4], 1).unwrap();
        nd.validate_user_elements().unwrap();

        let buffer = BufferDescriptor::words(0x8000, 64);
        nd.insert_buffer(&mut mem, TableKind::Uav, 2, &buffer).unwrap();
        let entry = nd.info().table_entry(TableKind::Uav, 2).unwrap();
        assert!(entry.valid);
        assert_eq!(entry.kind, DescriptorKind::Buffer);
        assert_eq!(mem.read_u32(0x1000 + 2 * 32).unwrap(), 0x8000);
        assert_eq!(
            nd.info().read_buffer_descriptor(&mem, TableKind::Uav, 2).unwrap(),
            buffer
        );
        assert!(matches!(
            nd.info().read_buffer_descriptor(&mem, TableKind::Uav, 3),
            Err(EmuError::InvalidDescriptor { table: TableKind::Uav, slot: 3 })
        ));
        assert!(matches!(
            nd.insert_buffer(&mut mem, TableKind::ConstantBuffer, 16, &buffer),
            Err(EmuError::Config(ConfigError::SlotOutOfRange { slot: 16, .. }))
        ));

        let index = nd.schedule_group(0, &mem).unwrap();
        let sregs = nd.work_groups()[index].wavefronts()[0].sregs();
        assert_eq!(sregs.read(4).unwrap(), 0x8000);
        assert_eq!(sregs.read(5).unwrap(), 4);
        assert_eq!(sregs.read(6).unwrap(), 64);
        assert_eq!(sregs.read(8).unwrap(), 0x1000 + TableKind::Uav.table_size());
    }

    #[test]
    fn user_element_past_sgpr_count() {
        let mut desc = LaunchDescriptor::new(vec![]).user_element(UserElement::Uav { slot: 0, sreg: 102 });
        desc.sgpr_count = 104;
        let nd = ndrange(&desc);
        assert!(matches!(
            nd.validate_user_elements(),
            Err(ConfigError::UserElementOutOfRange { sreg: 102, .. })
        ));
    }

    #[test]
    fn remove_requires_finished_group() {
        let mut nd = ndrange(&LaunchDescriptor::new(vec![0; 8]));
        nd.setup_size(&[64], &[64], 1).unwrap();
        let index = nd.schedule_group(0, &Memory::new()).unwrap();
        assert!(matches!(nd.remove_group(index), Err(EmuError::GroupNotFinished(0))));
        let group = nd.work_group_mut(index).unwrap();
        assert!(group.on_wavefront_finished(0).unwrap());
        let removed = nd.remove_group(index).unwrap();
        assert!(removed.is_finished());
        assert!(nd.work_groups().is_empty());
    }

    #[test]
    fn wakeup_fires_once_when_drained() {
        let fired = Rc::new(Cell::new(0));
        let mut nd = ndrange(&LaunchDescriptor::new(vec![0; 8]));
        nd.setup_size(&[64], &[64], 1).unwrap();
        nd.enqueue_all_groups().unwrap();
        let counter = fired.clone();
        nd.set_wakeup(Box::new(move || counter.set(counter.get() + 1)));

        assert!(!nd.wakeup_waiting_host());
        let id = nd.dequeue_next_waiting_group().unwrap();
        let index = nd.schedule_group(id, &Memory::new()).unwrap();
        assert!(!nd.wakeup_waiting_host());
        nd.work_group_mut(index).unwrap().on_wavefront_finished(0).unwrap();
        nd.remove_group(index).unwrap();

        assert!(nd.wakeup_waiting_host());
        assert!(!nd.wakeup_waiting_host());
        assert_eq!(fired.get(), 1);
        assert!(nd.is_completed());
    }
}
