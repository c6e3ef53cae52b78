use simt_emu::{assemble, BufferDescriptor, EmuConfig, Emulator, Gcn, TableKind};

fn main() {
    env_logger::init();

    let a: Vec<f32> = vec![1., 2., 3., 4., 5.];
    let b: Vec<f32> = vec![10., 20., 30., 40., 50.];
    let mut c: Vec<f32> = vec![0.; a.len()];
    let n = a.len() as u32;

    let kernel = assemble(KERNEL).expect("assemble kernel");
    let mut emu = Emulator::new(Gcn, EmuConfig::load().expect("load config"));

    const BLOCK_SIZE: u32 = 64;
    let grid_size = (n + BLOCK_SIZE - 1) / BLOCK_SIZE;

    let bytes = a.len() * std::mem::size_of::<f32>();
    let da = emu.alloc(bytes, 256).expect("alloc a");
    let db = emu.alloc(bytes, 256).expect("alloc b");
    let dc = emu.alloc(bytes, 256).expect("alloc c");
    emu.write(da, 0, bytemuck::cast_slice(&a)).expect("write a");
    emu.write(db, 0, bytemuck::cast_slice(&b)).expect("write b");

    let id = emu
        .launch(
            &kernel
                .launch()
                .global1d(grid_size * BLOCK_SIZE)
                .local1d(BLOCK_SIZE),
        )
        .expect("launch kernel");
    for (slot, ptr) in [da, db, dc].into_iter().enumerate() {
        emu.insert_buffer(id, TableKind::Uav, slot as u32, &BufferDescriptor::words(ptr.addr(), n))
            .expect("bind buffer");
    }
    emu.set_wakeup(id, || println!("kernel done"))
        .expect("register wakeup");
    emu.run().expect("execute kernel");

    emu.read(dc, 0, bytemuck::cast_slice_mut(&mut c))
        .expect("read c");
    // prints [11.0, 22.0, 33.0, 44.0, 55.0]
    println!("{:?}", c);
}

// Items past the end of the buffers fall outside the descriptors' records,
// so their loads read zero and their stores are dropped.
const KERNEL: &str = r#"
.kernel vector_add
.uav 0, s[0:3]
.uav 1, s[4:7]
.uav 2, s[8:11]

    v_lshlrev_b32 v1, 2, v0
    buffer_load_dword v2, v1, s[0:3]
    buffer_load_dword v3, v1, s[4:7]
    v_add_f32 v4, v2, v3
    buffer_store_dword v4, v1, s[8:11]
    s_endpgm
"#;
