use crate::isa::Isa;

use super::memory::{GlobalMemory, LocalMemory};
use super::ndrange::LaunchInfo;
use super::stats::Stats;
use super::wavefront::{ExecEnv, StepEvent, Wavefront};
use super::work_item::WorkItem;
use super::{EmuError, EmuResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkGroupState {
    Running,
    Finished,
}

pub struct WorkGroup<I: Isa> {
    id: u32,
    id_3d: [u32; 3],
    wavefronts: Vec<Wavefront<I>>,
    work_items: Vec<WorkItem>,
    local_memory: LocalMemory,
    wavefronts_at_barrier: usize,
    wavefronts_finished: usize,
    state: WorkGroupState,
}

impl<I: Isa> WorkGroup<I> {
    pub(crate) fn new(
        id: u32,
        id_3d: [u32; 3],
        wavefronts: Vec<Wavefront<I>>,
        work_items: Vec<WorkItem>,
        local_memory_size: usize,
    ) -> Self {
        WorkGroup {
            id,
            id_3d,
            wavefronts,
            work_items,
            local_memory: LocalMemory::new(local_memory_size),
            wavefronts_at_barrier: 0,
            wavefronts_finished: 0,
            state: WorkGroupState::Running,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn id_3d(&self) -> [u32; 3] {
        self.id_3d
    }

    pub fn wavefronts(&self) -> &[Wavefront<I>] {
        &self.wavefronts
    }

    pub fn wavefront_mut(&mut self, index: usize) -> Option<&mut Wavefront<I>> {
        self.wavefronts.get_mut(index)
    }

    pub fn work_items(&self) -> &[WorkItem] {
        &self.work_items
    }

    pub fn local_memory(&self) -> &LocalMemory {
        &self.local_memory
    }

    pub fn local_memory_mut(&mut self) -> &mut LocalMemory {
        &mut self.local_memory
    }

    pub fn wavefronts_at_barrier(&self) -> usize {
        self.wavefronts_at_barrier
    }

    pub fn wavefronts_finished(&self) -> usize {
        self.wavefronts_finished
    }

    pub fn state(&self) -> WorkGroupState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == WorkGroupState::Finished
    }

    /// Parks `wavefront` at the barrier. Returns true when this arrival
    /// released every wavefront of the group.
    pub fn on_wavefront_reached_barrier(&mut self, wavefront: usize) -> EmuResult<bool> {
        let count = self.wavefronts.len();
        let wf = self
            .wavefronts
            .get_mut(wavefront)
            .ok_or(EmuError::InvalidWavefront(wavefront))?;
        if wf.at_barrier {
            log::warn!(
                "work-group {}: wavefront {} reached the barrier twice",
                self.id,
                wavefront
            );
            return Ok(false);
        }
        wf.at_barrier = true;
        self.wavefronts_at_barrier += 1;
        if self.wavefronts_at_barrier < count {
            return Ok(false);
        }
        for wf in self.wavefronts.iter_mut() {
            wf.at_barrier = false;
        }
        self.wavefronts_at_barrier = 0;
        log::debug!("work-group {}: barrier released", self.id);
        Ok(true)
    }

    /// Counts `wavefront` as done. Returns true on the single call that
    /// moves the group to [`WorkGroupState::Finished`].
    pub fn on_wavefront_finished(&mut self, wavefront: usize) -> EmuResult<bool> {
        if self.state == WorkGroupState::Finished {
            log::warn!(
                "work-group {}: finish notification for wavefront {} after completion",
                self.id,
                wavefront
            );
            return Ok(false);
        }
        let wf = self
            .wavefronts
            .get_mut(wavefront)
            .ok_or(EmuError::InvalidWavefront(wavefront))?;
        if wf.finish_reported {
            log::warn!(
                "work-group {}: wavefront {} finished twice",
                self.id,
                wavefront
            );
            return Ok(false);
        }
        wf.finished = true;
        wf.finish_reported = true;
        self.wavefronts_finished += 1;
        if self.wavefronts_finished < self.wavefronts.len() {
            return Ok(false);
        }
        self.state = WorkGroupState::Finished;
        log::debug!("work-group {}: finished", self.id);
        Ok(true)
    }

    /// Gives every runnable wavefront one instruction. Returns how many ran.
    pub(crate) fn step(
        &mut self,
        isa: &I,
        global: &mut dyn GlobalMemory,
        launch: &LaunchInfo,
        stats: &mut Stats,
    ) -> EmuResult<usize> {
        let mut executed = 0;
        for index in 0..self.wavefronts.len() {
            let wavefront = &mut self.wavefronts[index];
            if wavefront.finished || wavefront.at_barrier {
                continue;
            }
            let items = &mut self.work_items[wavefront.items.clone()];
            let mut env = ExecEnv {
                local: &mut self.local_memory,
                global: &mut *global,
                launch,
                stats: &mut *stats,
            };
            let event = wavefront.execute(isa, items, &mut env)?;
            executed += 1;
            match event {
                StepEvent::Continue => {}
                StepEvent::Barrier => {
                    self.on_wavefront_reached_barrier(index)?;
                }
                StepEvent::Finished => {
                    stats.wavefronts_completed += 1;
                    self.on_wavefront_finished(index)?;
                }
            }
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EmuConfig;
    use crate::emu::{LaunchDescriptor, NDRange};
    use crate::emu::memory::Memory;
    use crate::isa::gcn::Gcn;

    fn two_wavefront_group() -> WorkGroup<Gcn> {
        let mem = Memory::new();
        let desc = LaunchDescriptor::new(vec![0; 8]).global1d(128).local1d(128);
        let mut ndrange = NDRange::new(0, &Gcn, &EmuConfig::default(), &desc, 0);
        ndrange.setup_size(&[128], &[128], 1).unwrap();
        let index = ndrange.schedule_group(0, &mem).unwrap();
        ndrange.take_group(index)
    }

    #[test]
    fn barrier_releases_on_last_arrival() {
        let mut group = two_wavefront_group();
        assert_eq!(group.wavefronts().len(), 2);

        assert!(!group.on_wavefront_reached_barrier(0).unwrap());
        assert_eq!(group.wavefronts_at_barrier(), 1);
        assert!(group.wavefronts()[0].at_barrier());
        assert!(!group.wavefronts()[1].at_barrier());

        assert!(group.on_wavefront_reached_barrier(1).unwrap());
        assert_eq!(group.wavefronts_at_barrier(), 0);
        assert!(group.wavefronts().iter().all(|wf| !wf.at_barrier()));
    }

    #[test]
    fn finishes_exactly_once() {
        let mut group = two_wavefront_group();
        assert!(!group.on_wavefront_finished(0).unwrap());
        assert!(!group.on_wavefront_finished(0).unwrap());
        assert_eq!(group.state(), WorkGroupState::Running);
        assert!(group.on_wavefront_finished(1).unwrap());
        assert!(group.is_finished());
        assert!(!group.on_wavefront_finished(1).unwrap());
        assert_eq!(group.wavefronts_finished(), 2);
    }

    #[test]
    fn unknown_wavefront_is_rejected() {
        let mut group = two_wavefront_group();
        assert!(matches!(
            group.on_wavefront_reached_barrier(7),
            Err(EmuError::InvalidWavefront(7))
        ));
    }
}
