use std::ops::Range;

use crate::isa::{DivergenceStyle, ExecScope, Instruction, Isa};

use super::memory::{GlobalMemory, LocalMemory};
use super::ndrange::LaunchInfo;
use super::regs::ScalarRegisters;
use super::stats::Stats;
use super::work_item::{LaneContext, WorkItem};
use super::{EmuError, EmuResult};

/// A set of lanes, one bit per lane, with a fixed width.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LaneMask {
    bits: u64,
    width: usize,
}

impl LaneMask {
    fn width_bits(width: usize) -> u64 {
        if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        }
    }

    pub fn full(width: usize) -> Self {
        LaneMask {
            bits: Self::width_bits(width),
            width,
        }
    }

    pub fn empty(width: usize) -> Self {
        LaneMask { bits: 0, width }
    }

    /// Bits past `width` are dropped.
    pub fn from_bits(bits: u64, width: usize) -> Self {
        LaneMask {
            bits: bits & Self::width_bits(width),
            width,
        }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, lane: usize) -> bool {
        lane < self.width && self.bits >> lane & 1 != 0
    }

    pub fn set(&mut self, lane: usize, active: bool) {
        if lane >= self.width {
            return;
        }
        if active {
            self.bits |= 1 << lane;
        } else {
            self.bits &= !(1 << lane);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn first(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.bits.trailing_zeros() as usize)
    }

    /// Lanes of `within` that are inactive here.
    pub fn invert_within(&self, within: LaneMask) -> LaneMask {
        LaneMask::from_bits(!self.bits & within.bits, self.width)
    }
}

impl std::fmt::Debug for LaneMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LaneMask({:#x}/{})", self.bits, self.width)
    }
}

/// Stack of lane masks used by structured control flow. Frame 0 is the
/// launch mask and is never popped.
#[derive(Debug, Clone)]
pub struct MaskStack {
    frames: Vec<LaneMask>,
    top: usize,
    max_depth: usize,
    pushes: u32,
    pops: u32,
}

impl MaskStack {
    pub fn new(lanes: usize, max_depth: usize) -> Self {
        MaskStack {
            frames: vec![LaneMask::full(lanes)],
            top: 0,
            max_depth,
            pushes: 0,
            pops: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.top
    }

    pub fn top(&self) -> LaneMask {
        self.frames[self.top]
    }

    /// The frame below the top, if there is one.
    pub fn parent(&self) -> Option<LaneMask> {
        self.top.checked_sub(1).map(|idx| self.frames[idx])
    }

    pub fn set_top(&mut self, mask: LaneMask) -> EmuResult<()> {
        let expected = self.frames[self.top].width;
        if mask.width != expected {
            return Err(EmuError::MaskWidthMismatch {
                expected,
                got: mask.width,
            });
        }
        self.frames[self.top] = mask;
        Ok(())
    }

    /// Duplicates the top frame.
    pub fn push(&mut self) -> EmuResult<()> {
        if self.top >= self.max_depth {
            return Err(EmuError::StackOverflow {
                max_depth: self.max_depth,
            });
        }
        let top = self.frames[self.top];
        self.top += 1;
        if self.top == self.frames.len() {
            self.frames.push(top);
        } else {
            self.frames[self.top] = top;
        }
        self.pushes += 1;
        Ok(())
    }

    pub fn pop(&mut self, count: usize) -> EmuResult<()> {
        if count == 0 {
            return Ok(());
        }
        if count > self.top {
            return Err(EmuError::StackUnderflow {
                count,
                depth: self.top,
            });
        }
        self.top -= count;
        self.pops += count as u32;
        Ok(())
    }

    /// Pushes performed by the last instruction.
    pub fn pushes(&self) -> u32 {
        self.pushes
    }

    /// Frames popped by the last instruction.
    pub fn pops(&self) -> u32 {
        self.pops
    }

    fn reset_counters(&mut self) {
        self.pushes = 0;
        self.pops = 0;
    }
}

/// The two ways a wavefront tracks its active lanes.
#[derive(Debug, Clone)]
pub enum DivergenceController {
    /// The mask lives in the EXEC scalar pair.
    FlatMask,
    MaskStack(MaskStack),
}

impl DivergenceController {
    pub fn new(style: DivergenceStyle, lanes: usize, max_depth: usize) -> Self {
        match style {
            DivergenceStyle::FlatMask => DivergenceController::FlatMask,
            DivergenceStyle::MaskStack => {
                DivergenceController::MaskStack(MaskStack::new(lanes, max_depth))
            }
        }
    }

    pub fn active_mask(&self, sregs: &ScalarRegisters) -> LaneMask {
        match self {
            DivergenceController::FlatMask => LaneMask::from_bits(sregs.exec(), sregs.lanes()),
            DivergenceController::MaskStack(stack) => stack.top(),
        }
    }

    pub fn set_active_mask(&mut self, sregs: &mut ScalarRegisters, mask: LaneMask) -> EmuResult<()> {
        match self {
            DivergenceController::FlatMask => {
                if mask.width != sregs.lanes() {
                    return Err(EmuError::MaskWidthMismatch {
                        expected: sregs.lanes(),
                        got: mask.width,
                    });
                }
                sregs.set_exec(mask.bits);
                Ok(())
            }
            DivergenceController::MaskStack(stack) => stack.set_top(mask),
        }
    }

    pub fn push_mask(&mut self) -> EmuResult<()> {
        match self {
            DivergenceController::FlatMask => Err(EmuError::NoMaskStack),
            DivergenceController::MaskStack(stack) => stack.push(),
        }
    }

    pub fn pop_mask(&mut self, count: usize) -> EmuResult<()> {
        match self {
            DivergenceController::FlatMask if count == 0 => Ok(()),
            DivergenceController::FlatMask => Err(EmuError::NoMaskStack),
            DivergenceController::MaskStack(stack) => stack.pop(count),
        }
    }

    fn reset_counters(&mut self) {
        if let DivergenceController::MaskStack(stack) = self {
            stack.reset_counters();
        }
    }

    /// Applies the effect of a mask-affecting instruction once every lane ran.
    fn commit(&mut self, sregs: &mut ScalarRegisters, pending: Option<LaneMask>) -> EmuResult<()> {
        match self {
            DivergenceController::FlatMask => {
                sregs.refresh_derived();
                Ok(())
            }
            DivergenceController::MaskStack(stack) => match pending {
                Some(mask) => stack.set_top(mask),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSpace {
    Global,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub lane: usize,
    pub space: MemSpace,
    pub kind: AccessKind,
    pub addr: u32,
    pub size: u32,
}

/// Side effects of the instruction being executed. Cleared before every step.
#[derive(Debug, Default, Clone)]
pub struct InstFlags {
    pub global_mem_read: bool,
    pub global_mem_write: bool,
    pub global_mem_atomic: bool,
    pub local_mem_read: bool,
    pub local_mem_write: bool,
    pub branch: bool,
    pub barrier: bool,
    pub mask_update: bool,
    pub accesses: Vec<MemAccess>,
}

impl InstFlags {
    fn reset(&mut self) {
        self.global_mem_read = false;
        self.global_mem_write = false;
        self.global_mem_atomic = false;
        self.local_mem_read = false;
        self.local_mem_write = false;
        self.branch = false;
        self.barrier = false;
        self.mask_update = false;
        self.accesses.clear();
    }
}

/// A run of instructions fetched from a secondary cursor before control
/// returns to the main stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clause {
    pc: u32,
    end: u32,
    pop_after: usize,
}

#[derive(Debug, Default)]
struct ControlRequest {
    jump: i64,
    finish: bool,
    barrier: bool,
    clause: Option<Clause>,
}

/// Wavefront-wide view handed to control-flow instructions.
pub struct ControlContext<'a, S> {
    pc: u32,
    size: u32,
    sregs: &'a mut ScalarRegisters,
    divergence: &'a mut DivergenceController,
    flags: &'a mut InstFlags,
    state: &'a mut S,
    request: &'a mut ControlRequest,
}

impl<'a, S> ControlContext<'a, S> {
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn lanes(&self) -> usize {
        self.sregs.lanes()
    }

    pub fn read_scalar(&self, reg: u32) -> EmuResult<u32> {
        self.sregs.read(reg)
    }

    pub fn write_scalar(&mut self, reg: u32, value: u32) -> EmuResult<()> {
        self.sregs.write(reg, value)
    }

    pub fn scc(&self) -> bool {
        self.sregs.scc()
    }

    pub fn vccz(&self) -> bool {
        self.sregs.vccz()
    }

    pub fn execz(&self) -> bool {
        self.sregs.execz()
    }

    pub fn active_mask(&self) -> LaneMask {
        self.divergence.active_mask(self.sregs)
    }

    /// The mask one frame below the top of the stack.
    pub fn parent_mask(&self) -> EmuResult<LaneMask> {
        match &*self.divergence {
            DivergenceController::FlatMask => Err(EmuError::NoMaskStack),
            DivergenceController::MaskStack(stack) => stack.parent().ok_or(EmuError::StackUnderflow {
                count: 1,
                depth: 0,
            }),
        }
    }

    pub fn set_active_mask(&mut self, mask: LaneMask) -> EmuResult<()> {
        self.flags.mask_update = true;
        self.divergence.set_active_mask(self.sregs, mask)
    }

    pub fn push_mask(&mut self) -> EmuResult<()> {
        self.divergence.push_mask()
    }

    pub fn pop_mask(&mut self, count: usize) -> EmuResult<()> {
        self.divergence.pop_mask(count)
    }

    /// Moves the pc by `delta` bytes on top of the normal advance.
    pub fn jump_relative(&mut self, delta: i64) {
        self.flags.branch = true;
        self.request.jump = delta;
    }

    /// Continues at byte offset `target`.
    pub fn jump_to(&mut self, target: u32) {
        let next = self.pc as i64 + self.size as i64;
        self.jump_relative(target as i64 - next);
    }

    pub fn finish(&mut self) {
        self.request.finish = true;
    }

    pub fn barrier(&mut self) {
        self.flags.barrier = true;
        self.request.barrier = true;
    }

    /// Runs `len` bytes starting at `start` before the next main-stream
    /// instruction, then pops `pop_after` mask frames.
    pub fn enter_clause(&mut self, start: u32, len: u32, pop_after: usize) {
        self.request.clause = Some(Clause {
            pc: start,
            end: start + len,
            pop_after,
        });
    }

    pub fn state(&mut self) -> &mut S {
        self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Continue,
    Barrier,
    Finished,
}

/// Resources a wavefront borrows from its work-group and launch for one step.
pub(crate) struct ExecEnv<'a> {
    pub local: &'a mut LocalMemory,
    pub global: &'a mut dyn GlobalMemory,
    pub launch: &'a LaunchInfo,
    pub stats: &'a mut Stats,
}

pub struct Wavefront<I: Isa> {
    pub(crate) id: u32,
    pub(crate) index: usize,
    pub(crate) pc: u32,
    pub(crate) inst: Option<I::Inst>,
    pub(crate) items: Range<usize>,
    pub(crate) scalar_item: WorkItem,
    pub(crate) sregs: ScalarRegisters,
    pub(crate) divergence: DivergenceController,
    pub(crate) clause: Option<Clause>,
    pub(crate) flags: InstFlags,
    pub(crate) state: I::WaveState,
    pub(crate) at_barrier: bool,
    pub(crate) finished: bool,
    pub(crate) finish_pending: bool,
    pub(crate) finish_reported: bool,
    pub(crate) inst_count: u64,
}

impl<I: Isa> Wavefront<I> {
    pub(crate) fn new(
        id: u32,
        index: usize,
        work_group: u32,
        items: Range<usize>,
        divergence: DivergenceController,
    ) -> Self {
        let lanes = items.len();
        let mut sregs = ScalarRegisters::new(lanes);
        sregs.set_exec(LaneMask::full(lanes).bits());
        Wavefront {
            id,
            index,
            pc: 0,
            inst: None,
            items,
            scalar_item: WorkItem::scalar(work_group, index),
            sregs,
            divergence,
            clause: None,
            flags: InstFlags::default(),
            state: I::WaveState::default(),
            at_barrier: false,
            finished: false,
            finish_pending: false,
            finish_reported: false,
            inst_count: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn lanes(&self) -> usize {
        self.items.len()
    }

    pub fn work_items(&self) -> Range<usize> {
        self.items.clone()
    }

    /// The instruction executed by the last step.
    pub fn instruction(&self) -> Option<&I::Inst> {
        self.inst.as_ref()
    }

    pub fn sregs(&self) -> &ScalarRegisters {
        &self.sregs
    }

    pub fn sregs_mut(&mut self) -> &mut ScalarRegisters {
        &mut self.sregs
    }

    pub fn divergence(&self) -> &DivergenceController {
        &self.divergence
    }

    pub fn divergence_mut(&mut self) -> &mut DivergenceController {
        &mut self.divergence
    }

    pub fn active_mask(&self) -> LaneMask {
        self.divergence.active_mask(&self.sregs)
    }

    pub fn flags(&self) -> &InstFlags {
        &self.flags
    }

    pub fn at_barrier(&self) -> bool {
        self.at_barrier
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn in_clause(&self) -> bool {
        self.clause.is_some()
    }

    pub fn inst_count(&self) -> u64 {
        self.inst_count
    }

    /// Fetches, decodes and executes one instruction.
    pub(crate) fn execute(
        &mut self,
        isa: &I,
        items: &mut [WorkItem],
        env: &mut ExecEnv<'_>,
    ) -> EmuResult<StepEvent> {
        self.flags.reset();
        self.divergence.reset_counters();

        let stream = env.launch.instructions();
        let fetch_pc = match &self.clause {
            Some(clause) => clause.pc,
            None => self.pc,
        };
        if fetch_pc as usize >= stream.len() {
            return Err(EmuError::PcOutOfRange {
                pc: fetch_pc as i64,
                len: stream.len(),
            });
        }
        let (inst, size) = isa.decode(stream, fetch_pc)?;
        if self.clause.is_some() && inst.scope() == ExecScope::ControlFlow {
            return Err(EmuError::ControlFlowInClause {
                pc: fetch_pc,
                name: inst.name(),
            });
        }
        log::trace!(
            "wavefront {} pc {:#06x} exec {:?}: {:?}",
            self.id,
            fetch_pc,
            self.active_mask(),
            inst
        );
        env.stats.record(inst.category());
        self.inst_count += 1;

        let scope = inst.scope();
        let mut request = ControlRequest::default();
        let mut pending = None;
        match scope {
            ExecScope::Scalar => {
                let mut unused = LaneMask::empty(self.items.len());
                let mut ctx = LaneContext {
                    item: &mut self.scalar_item,
                    sregs: &mut self.sregs,
                    flags: &mut self.flags,
                    pending: &mut unused,
                    local: &mut *env.local,
                    global: &mut *env.global,
                    launch: env.launch,
                };
                isa.execute_lane(&inst, &mut ctx)?;
            }
            ExecScope::Vector => {
                let active = self.divergence.active_mask(&self.sregs);
                if active.width() != items.len() {
                    return Err(EmuError::MaskWidthMismatch {
                        expected: items.len(),
                        got: active.width(),
                    });
                }
                let mut lanes = active;
                for item in items.iter_mut().filter(|item| active.get(item.lane)) {
                    let mut ctx = LaneContext {
                        item,
                        sregs: &mut self.sregs,
                        flags: &mut self.flags,
                        pending: &mut lanes,
                        local: &mut *env.local,
                        global: &mut *env.global,
                        launch: env.launch,
                    };
                    isa.execute_lane(&inst, &mut ctx)?;
                }
                pending = Some(lanes);
            }
            ExecScope::FirstActiveLane => {
                let active = self.divergence.active_mask(&self.sregs);
                let lane = active.first().unwrap_or(0);
                let Some(item) = items.get_mut(lane) else {
                    return Err(EmuError::MaskWidthMismatch {
                        expected: items.len(),
                        got: active.width(),
                    });
                };
                let mut lanes = active;
                let mut ctx = LaneContext {
                    item,
                    sregs: &mut self.sregs,
                    flags: &mut self.flags,
                    pending: &mut lanes,
                    local: &mut *env.local,
                    global: &mut *env.global,
                    launch: env.launch,
                };
                isa.execute_lane(&inst, &mut ctx)?;
            }
            ExecScope::ControlFlow => {
                let mut ctx = ControlContext {
                    pc: fetch_pc,
                    size,
                    sregs: &mut self.sregs,
                    divergence: &mut self.divergence,
                    flags: &mut self.flags,
                    state: &mut self.state,
                    request: &mut request,
                };
                isa.execute_control(&inst, &mut ctx)?;
            }
        }

        if inst.updates_mask() {
            self.flags.mask_update = true;
            self.divergence.commit(&mut self.sregs, pending)?;
        }

        match self.clause.as_mut() {
            Some(clause) => {
                clause.pc += size;
                if clause.pc >= clause.end {
                    let pop_after = clause.pop_after;
                    self.clause = None;
                    self.divergence.pop_mask(pop_after)?;
                }
            }
            None => {
                if request.finish && request.clause.is_none() {
                    self.finished = true;
                } else {
                    if request.finish {
                        self.finish_pending = true;
                    }
                    self.clause = request.clause;
                    let next = self.pc as i64 + size as i64 + request.jump;
                    if next < 0 || next > u32::MAX as i64 {
                        return Err(EmuError::PcOutOfRange {
                            pc: next,
                            len: stream.len(),
                        });
                    }
                    self.pc = next as u32;
                }
            }
        }

        if !self.finished
            && self.clause.is_none()
            && (self.finish_pending || self.pc as usize == stream.len())
        {
            self.finished = true;
        }
        self.inst = Some(inst);

        Ok(if self.finished {
            StepEvent::Finished
        } else if request.barrier {
            StepEvent::Barrier
        } else {
            StepEvent::Continue
        })
    }
}
