pub mod asm;
pub mod config;
pub mod emu;
pub mod isa;

pub use asm::{assemble, AsmError, KernelBinary};
pub use config::EmuConfig;
pub use emu::{
    BufferDescriptor, ConfigError, DevicePointer, EmuError, EmuResult, Emulator, LaunchDescriptor,
    NdRangeId, Stage, Stats, TableKind, UserElement,
};
pub use isa::gcn::Gcn;
pub use isa::vliw::Vliw;

#[cfg(test)]
mod test {
    use super::*;

    const ALIGN: usize = 256;

    fn with_output(
        src: &str,
        items: u32,
        fill: u32,
    ) -> (Emulator<Gcn>, NdRangeId, DevicePointer) {
        let kernel = assemble(src).unwrap();
        let mut emu = Emulator::new(Gcn, EmuConfig::default());
        let out = emu.alloc(items as usize * 4, ALIGN).unwrap();
        emu.write(out, 0, bytemuck::cast_slice(&vec![fill; items as usize]))
            .unwrap();
        let id = emu
            .launch(&kernel.launch().global1d(items).local1d(items))
            .unwrap();
        emu.insert_buffer(id, TableKind::Uav, 0, &BufferDescriptor::words(out.addr(), items))
            .unwrap();
        (emu, id, out)
    }

    fn read_words(emu: &Emulator<Gcn>, ptr: DevicePointer, n: usize) -> Vec<u32> {
        let mut res = vec![0u32; n];
        emu.read(ptr, 0, bytemuck::cast_slice_mut(&mut res)).unwrap();
        res
    }

    #[test]
    fn inactive_lane_is_untouched() {
        let src = "
            .uav 0, s[4:7]
            s_andn2_b64 exec, exec, 32      ; lane 5 off
            v_mov_b32 v1, 77
            v_lshlrev_b32 v2, 2, v0
            buffer_store_dword v1, v2, s[4:7], 0
            s_endpgm
        ";
        let (mut emu, id, out) = with_output(src, 8, 0xdead);

        for _ in 0..4 {
            assert!(emu.step().unwrap());
        }
        let group = &emu.ndrange(id).unwrap().work_groups()[0];
        assert_eq!(group.wavefronts()[0].active_mask().bits(), 0b1101_1111);
        assert_eq!(group.work_items()[4].read_vector(1).unwrap(), 77);
        assert_eq!(group.work_items()[5].read_vector(1).unwrap(), 0);

        emu.run().unwrap();
        let res = read_words(&emu, out, 8);
        for (lane, v) in res.iter().enumerate() {
            let expected = if lane == 5 { 0xdead } else { 77 };
            assert_eq!(*v, expected, "lane {lane}");
        }
    }

    #[test]
    fn readfirstlane_uses_lowest_active_lane() {
        let src = "
            .uav 0, s[4:7]
            s_mov_b64 exec, 0xfc
            v_add_u32 v1, v0, 10
            v_readfirstlane_b32 s20, v1
            s_mov_b64 exec, -1
            v_mov_b32 v2, s20
            v_lshlrev_b32 v3, 2, v0
            buffer_store_dword v2, v3, s[4:7], 0
            s_endpgm
        ";
        let (mut emu, _, out) = with_output(src, 8, 0);
        emu.run().unwrap();
        assert_eq!(read_words(&emu, out, 8), vec![12; 8]);
    }

    #[test]
    fn readfirstlane_with_no_active_lane_reads_lane_zero() {
        let src = "
            .uav 0, s[4:7]
            v_add_u32 v1, v0, 10
            s_mov_b64 exec, 0
            v_readfirstlane_b32 s20, v1
            s_mov_b64 exec, -1
            v_mov_b32 v2, s20
            v_lshlrev_b32 v3, 2, v0
            buffer_store_dword v2, v3, s[4:7], 0
            s_endpgm
        ";
        let (mut emu, _, out) = with_output(src, 8, 0);
        emu.run().unwrap();
        assert_eq!(read_words(&emu, out, 8), vec![10; 8]);
    }

    #[test]
    fn scalar_branch_on_scc() {
        let src = "
            .uav 0, s[4:7]
            s_mov_b32 s1, 0
            s_mov_b32 s2, 0
        again:
            s_add_u32 s1, s1, 1
            s_add_u32 s2, s2, s1
            s_cmp_lt_u32 s1, 10
            s_cbranch_scc1 again
            v_mov_b32 v1, s2
            v_lshlrev_b32 v2, 2, v0
            buffer_store_dword v1, v2, s[4:7], 0
            s_endpgm
        ";
        let (mut emu, _, out) = with_output(src, 4, 0);
        emu.run().unwrap();
        assert_eq!(read_words(&emu, out, 4), vec![55; 4]);
        assert_eq!(emu.stats().branch, 10);
    }

    #[test]
    fn buffer_bounds_drop_stores() {
        let src = "
            .uav 0, s[4:7]
            v_lshlrev_b32 v2, 2, v0
            v_mov_b32 v1, 1
            buffer_store_dword v1, v2, s[4:7], 8
            s_endpgm
        ";
        let (mut emu, _, out) = with_output(src, 4, 0);
        emu.run().unwrap();
        // offsets 8, 12 land; 16 and 20 are past the four records
        assert_eq!(read_words(&emu, out, 4), vec![0, 0, 1, 1]);
    }

    #[test]
    fn unmapped_access_is_fatal() {
        let src = "
            s_mov_b32 s0, 0
            s_mov_b32 s1, 0
            s_load_dword s2, s[0:1], 16
            s_endpgm
        ";
        let kernel = assemble(src).unwrap();
        let mut emu = Emulator::new(Gcn, EmuConfig::default());
        emu.launch(&kernel.launch().global1d(4).local1d(4)).unwrap();
        let err = emu.run().unwrap_err();
        assert!(matches!(err, EmuError::MemoryAccess { addr: 16, size: 4 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn wavefront_size_from_config() {
        let kernel = assemble("s_endpgm").unwrap();
        let config = EmuConfig {
            wavefront_size: 32,
            ..EmuConfig::default()
        };
        let mut emu = Emulator::new(Gcn, config);
        let id = emu
            .launch(&kernel.launch().global1d(128).local1d(128))
            .unwrap();
        emu.step().unwrap();
        let group = &emu.ndrange(id).unwrap().work_groups()[0];
        assert_eq!(group.wavefronts().len(), 4);
        assert!(group.wavefronts().iter().all(|wf| wf.lanes() == 32));
    }
}
