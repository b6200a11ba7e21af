//! # Frame Report
//!
//! Runs a synthetic per-frame workload through every heap policy and prints
//! the memory statistics.
//!
//! ```bash
//! frame_report                     # built-in sizes, 120 frames
//! frame_report memory.toml 600     # sizes from a config file
//! ```
//!
//! A missing or malformed config file is fatal: the process exits with
//! status 1.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use stratum::FrameLoop;
use stratum_memory::{
    BuildProfile, DebugRegion, DoubleBufferedHeap, Frame, FreeListHeap, Heap, HeapAllocator,
    HeapVec, MemoryConfig, MemoryManager, MemoryResult, PersistentRegion, RawHeap,
    Scratch, SizeLiteral, StackHeap, Tagged, TransientRegion,
};

/// Tag for streamed asset staging.
const IO_TAG: u32 = 1;

/// Frames between staging flushes.
const FLUSH_INTERVAL: u64 = 8;

/// Per-frame particle record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Particle {
    position: [f32; 3],
    life: f32,
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         STRATUM FRAME REPORT                                     ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let frames: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(120);

    let config = match args.get(1) {
        Some(path) => match MemoryConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("   ✗ FATAL: {err}");
                std::process::exit(1);
            }
        },
        None => MemoryConfig::default(),
    };

    let profile = BuildProfile::active();
    let manager = match MemoryManager::from_config(&config, profile) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("   ✗ FATAL: {err}");
            std::process::exit(1);
        }
    };
    let usage = manager.usage();
    println!("Profile: {}", profile.name());
    for region in usage.regions {
        println!("   ✓ {:<10} {}", region.kind.name(), region.total);
    }
    println!();

    let mut frame_loop = FrameLoop::new(manager);
    if let Err(err) = run(&mut frame_loop, frames) {
        eprintln!("   ✗ workload failed: {err}");
        std::process::exit(1);
    }

    frame_loop.stats().print_summary();
}

fn run(frame_loop: &mut FrameLoop, frames: u64) -> MemoryResult<()> {
    let memory = Rc::clone(frame_loop.memory());
    let particles = HeapAllocator::<Particle, Frame<TransientRegion>>::new(Rc::clone(&memory));
    let scratch = HeapAllocator::<u64, Scratch<TransientRegion>>::new(Rc::clone(&memory));
    let staging = HeapAllocator::<u8, Tagged<TransientRegion, IO_TAG>>::new(Rc::clone(&memory));
    let persistent = HeapAllocator::<u32, Frame<PersistentRegion>>::new(Rc::clone(&memory));
    let debug_lines = HeapAllocator::<u32, Frame<DebugRegion>>::new(Rc::clone(&memory));

    // Heaps outside the regions: interned names, nested scopes, and data
    // handed to the next frame.
    let mut side = RawHeap::new(64_i64.kib())?;
    let mut names = FreeListHeap::new(side.carve(32 * 1024)?)?;
    let mut scopes = StackHeap::new(side.carve(16 * 1024)?);
    let mut handoff = DoubleBufferedHeap::new(side.carve(16 * 1024)?)?;
    let mut interned = Vec::new();

    let mut pending_scratch = Vec::new();
    for frame in 0..frames {
        let ctx = frame_loop.begin_frame();

        let count = 64 + (frame % 16) as usize * 8;
        let mut batch = HeapVec::with_capacity(particles.clone(), count)?;
        for index in 0..count {
            batch.push(Particle {
                position: [index as f32, frame as f32, 0.0],
                life: ctx.delta_time,
            })?;
        }
        let first = batch.get(0)?;
        tracing::debug!(frame, x = first.position[0], life = first.life, "particles staged");
        let _frame_ids = persistent.allocate(16)?;

        // Scratch lives two frames, released oldest-first.
        pending_scratch.push(scratch.allocate(128)?);
        if pending_scratch.len() > 2 {
            let oldest = pending_scratch.remove(0);
            scratch.deallocate(oldest, 128)?;
        }

        staging.allocate(4096)?;
        if frame % FLUSH_INTERVAL == FLUSH_INTERVAL - 1 {
            memory
                .borrow_mut()
                .get_transient_region_mut()
                .tagged_heap_mut()
                .free_blocks(IO_TAG);
        }

        if debug_lines.allocate(32).is_err() {
            // Zero-sized in shipping builds.
            tracing::debug!(frame, "debug region unavailable");
        }

        let name = names.allocate(24 + (frame % 5) as usize * 8)?;
        interned.push(name);
        if interned.len() > 32 {
            names.deallocate(interned.swap_remove(0))?;
        }

        let outer = scopes.allocate(256)?;
        let inner = scopes.allocate(64)?;
        scopes.deallocate(inner)?;
        scopes.deallocate(outer)?;

        handoff.present();
        let visible = handoff.allocate(batch.len() * 4)?;
        handoff.write(&visible, 0, &(batch.len() as u32).to_le_bytes())?;

        frame_loop.end_frame(ctx);
    }

    println!(
        "Interned names: {} live, largest free block {} bytes",
        interned.len(),
        names.largest_free_block()?
    );
    println!();
    Ok(())
}
