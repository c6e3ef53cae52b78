//! Instruction-set plumbing.
//!
//! The engine never interprets opcodes. An [`Isa`] decodes bytes into its own
//! instruction type and runs it against the execution contexts the wavefront
//! hands out: a [`LaneContext`] for scalar and per-lane work, a
//! [`ControlContext`] for control flow.

pub mod gcn;
pub mod vliw;

use crate::emu::{ControlContext, EmuResult, LaneContext};

/// How many times, and on which lanes, an instruction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecScope {
    /// Once, on the wavefront's scalar work-item.
    Scalar,
    /// Once per active lane.
    Vector,
    /// Once, on the lowest active lane (lane 0 if none is active).
    FirstActiveLane,
    /// Once, against the wavefront itself.
    ControlFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstCategory {
    ScalarAlu,
    ScalarMem,
    VectorAlu,
    VectorMem,
    Branch,
    Barrier,
    LocalMem,
    Export,
    ControlFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceStyle {
    /// Active lanes live in the EXEC scalar register pair.
    FlatMask,
    /// Active lanes live on top of a push/pop stack of masks.
    MaskStack,
}

/// Where cold-start ids are placed when a work-group is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterConvention {
    /// Work-group id in scalar registers, local ids in the first vector registers.
    ScalarGroupId,
    /// Local ids and work-group ids both in the first six vector registers.
    VectorGroupId,
}

pub trait Instruction: std::fmt::Debug + Clone {
    fn name(&self) -> &'static str;
    fn scope(&self) -> ExecScope;
    fn category(&self) -> InstCategory;

    /// Whether executing this instruction changes the set of active lanes.
    fn updates_mask(&self) -> bool {
        false
    }
}

pub trait Isa {
    type Inst: Instruction;
    /// Per-wavefront state the instruction set keeps for itself.
    type WaveState: Default + std::fmt::Debug;

    fn name(&self) -> &'static str;
    fn divergence(&self) -> DivergenceStyle;
    fn convention(&self) -> RegisterConvention;

    /// Decodes the instruction at `pc`. Never called with `pc` past the stream.
    fn decode(&self, stream: &[u8], pc: u32) -> EmuResult<(Self::Inst, u32)>;

    fn execute_lane(&self, inst: &Self::Inst, ctx: &mut LaneContext<'_>) -> EmuResult<()>;

    fn execute_control(
        &self,
        inst: &Self::Inst,
        ctx: &mut ControlContext<'_, Self::WaveState>,
    ) -> EmuResult<()>;
}
