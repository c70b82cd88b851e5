//==================================================================================================
// Configuration
//==================================================================================================
#![deny(clippy::all)]

//==================================================================================================
// Modules
//==================================================================================================
mod args;

//==================================================================================================
// Imports
//==================================================================================================
use anyhow::Result;
use args::Args;
use log::debug;
use mem_lib::{Access, AccessKind, PAGE_SIZE};
use mmu_lib::LinearTranslator;
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};
use rand_distr::Zipf;
use trace_lib::MemTracer;

//==================================================================================================
// Constants
//==================================================================================================
/// Where the synthetic workload lives in the guest virtual address space.
const VIRT_BASE: u64 = 0x0000_4000_0000;
/// Where guest RAM sits physically.
const PHYS_BASE: u64 = 0x8000_0000;
/// Pages the Zipf working set draws from.
const WORKLOAD_PAGES: u64 = 100_000;

//==================================================================================================
// Functions
//==================================================================================================
fn main() -> Result<()> {
    env_logger::init();

    let args: Args = Args::parse(std::env::args().collect())?;

    let mut tracer = MemTracer::new();
    if let Some(region) = args.region() {
        tracer.set_region(region)?;
    }
    tracer.set_trace_code(args.trace_code());
    if let Some(l1) = args.l1() {
        tracer.init_l1(l1)?;
    }
    if let Some(l2) = args.l2() {
        tracer.init_l2(l2)?;
    }
    if let Some(l3) = args.l3() {
        tracer.init_l3(l3)?;
    }
    tracer.finalize(Some(args.trace_file()))?;

    let translator = LinearTranslator::new(VIRT_BASE, PHYS_BASE, args.ram_size())?;
    tracer.set_ram_base(PHYS_BASE, args.ram_size());

    let workload = build_workload(&args)?;
    debug!("replaying {} accesses", workload.len());

    tracer.start();
    for access in &workload {
        let (vaddr, size) = (access.access_vaddr(), access.access_size());
        match access.access_kind() {
            AccessKind::Load => tracer.on_load(&translator, vaddr, size),
            AccessKind::Store => tracer.on_store(&translator, vaddr, size),
            AccessKind::Fetch => tracer.on_fetch(&translator, vaddr, size),
        }
    }
    tracer.stop();
    tracer.shutdown();

    Ok(())
}

/// A seeded, replayable access stream: page popularity follows a Zipf
/// distribution over the working set, offsets and widths are uniform, and
/// kinds are drawn with loads and fetches outweighing stores.
fn build_workload(args: &Args) -> Result<Vec<Access>> {
    let mut rng = StdRng::seed_from_u64(args.seed());
    let zipf = Zipf::new(WORKLOAD_PAGES, 1.0)
        .map_err(|err| anyhow::anyhow!("workload distribution: {}", err))?;

    let sizes = [1u64, 2, 4, 8];
    let kinds = [AccessKind::Load, AccessKind::Fetch, AccessKind::Store];
    let kind_weights = WeightedIndex::new([5u32, 3, 2])?;

    let mut workload = Vec::with_capacity(args.number_of_accesses());
    for _ in 0..args.number_of_accesses() {
        let page_index = zipf.sample(&mut rng) as u64;
        let offset = rng.gen_range(0..PAGE_SIZE);
        let size = sizes[rng.gen_range(0..sizes.len())];
        let kind = kinds[kind_weights.sample(&mut rng)];
        workload.push(Access::new(
            VIRT_BASE + page_index * PAGE_SIZE + offset,
            size,
            kind,
        )?);
    }

    Ok(workload)
}
