use serde::Serialize;

use crate::isa::InstCategory;

/// Counters collected while the emulator runs. Nothing in the engine reads
/// them back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub instructions: u64,
    pub scalar_alu: u64,
    pub scalar_mem: u64,
    pub vector_alu: u64,
    pub vector_mem: u64,
    pub branch: u64,
    pub barrier: u64,
    pub local_mem: u64,
    pub export: u64,
    pub control_flow: u64,
    pub wavefronts_completed: u64,
    pub work_groups_completed: u64,
    pub ndranges_completed: u64,
}

impl Stats {
    pub fn record(&mut self, category: InstCategory) {
        self.instructions += 1;
        let counter = match category {
            InstCategory::ScalarAlu => &mut self.scalar_alu,
            InstCategory::ScalarMem => &mut self.scalar_mem,
            InstCategory::VectorAlu => &mut self.vector_alu,
            InstCategory::VectorMem => &mut self.vector_mem,
            InstCategory::Branch => &mut self.branch,
            InstCategory::Barrier => &mut self.barrier,
            InstCategory::LocalMem => &mut self.local_mem,
            InstCategory::Export => &mut self.export,
            InstCategory::ControlFlow => &mut self.control_flow,
        };
        *counter += 1;
    }
}
