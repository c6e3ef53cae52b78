use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use simt_emu::{
    assemble, BufferDescriptor, DevicePointer, EmuConfig, Emulator, Gcn, KernelBinary, TableKind,
};

/// Runs an assembled compute kernel on the emulator.
#[derive(Parser, Debug)]
#[command(name = "simt-emu", version, about)]
struct Args {
    /// Kernel assembly source
    kernel: PathBuf,

    /// Global work size, up to three comma-separated dimensions
    #[arg(long, value_delimiter = ',', required = true)]
    global: Vec<u32>,

    /// Work-group size, up to three comma-separated dimensions
    #[arg(long, value_delimiter = ',', required = true)]
    local: Vec<u32>,

    /// Emulator configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print execution counters after the run
    #[arg(long)]
    stats: bool,

    /// Size of every UAV buffer, in 32-bit words
    #[arg(long, default_value_t = 1024)]
    buffer_size: u32,
}

const BUFFER_ALIGN: usize = 256;

/// Lays out constant buffer 0: local and global size interleaved per
/// dimension, then the element count of every UAV buffer.
fn size_constants(global: &[u32; 3], local: &[u32; 3], elements: u32) -> Vec<u32> {
    let mut words: Vec<u32> = local
        .iter()
        .zip(global.iter())
        .flat_map(|(&l, &g)| [l, g])
        .collect();
    words.push(elements);
    words
}

fn pad3(dims: &[u32]) -> [u32; 3] {
    let mut out = [1; 3];
    for (slot, &d) in out.iter_mut().zip(dims) {
        *slot = d;
    }
    out
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let src = std::fs::read_to_string(&args.kernel)?;
    let kernel: KernelBinary = assemble(&src)?;
    let config = match &args.config {
        Some(path) => EmuConfig::load_from_file(path)?,
        None => EmuConfig::load()?,
    };

    let global = pad3(&args.global);
    let local = pad3(&args.local);
    let mut desc = kernel.launch();
    desc.work_dim = args.global.len();
    desc.global_size = global;
    desc.local_size = local;

    let mut emu = Emulator::new(Gcn, config);
    let constants = size_constants(&global, &local, args.buffer_size);
    let cb = emu.alloc(constants.len() * 4, BUFFER_ALIGN)?;
    emu.write(cb, 0, bytemuck::cast_slice(&constants))?;

    let mut uavs: Vec<(u32, DevicePointer)> = Vec::new();
    for slot in kernel.uav_slots() {
        let init: Vec<u32> = (0..args.buffer_size).collect();
        let ptr = emu.alloc(init.len() * 4, BUFFER_ALIGN)?;
        emu.write(ptr, 0, bytemuck::cast_slice(&init))?;
        uavs.push((slot, ptr));
    }

    let id = emu.launch(&desc)?;
    emu.insert_buffer(
        id,
        TableKind::ConstantBuffer,
        0,
        &BufferDescriptor::words(cb.addr(), constants.len() as u32),
    )?;
    for &(slot, ptr) in &uavs {
        emu.insert_buffer(
            id,
            TableKind::Uav,
            slot,
            &BufferDescriptor::words(ptr.addr(), args.buffer_size),
        )?;
    }

    emu.run()?;

    for &(slot, ptr) in &uavs {
        let mut words = vec![0u32; args.buffer_size as usize];
        emu.read(ptr, 0, bytemuck::cast_slice_mut(&mut words))?;
        println!("uav {}: {:?}", slot, words);
    }
    if args.stats {
        print!("{}", toml::to_string(emu.stats())?);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("simt-emu: {}", e);
        exit(1);
    }
}
