//==================================================================================================
// Configuration
//==================================================================================================
#![deny(clippy::all)]

//==================================================================================================
// Imports
//==================================================================================================
use ::anyhow::Result;
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

//==================================================================================================
// Constants
//==================================================================================================
/// Tag-word flag: the cell holds a live line.
pub const VALID: u64 = 1 << 63;
/// Tag-word flag: the line was written since it was filled.
pub const DIRTY: u64 = 1 << 62;

const GEOMETRY_HELP: &str = "cache configurations must be of the form\n  \
    sets:ways:linesize\n\
    where sets, ways, and linesize are positive integers, with\n\
    sets and linesize both powers of two and linesize at least 8";

//==================================================================================================
// Aliases
//==================================================================================================
/// Invoked by a traced level on each of its misses with the line-aligned
/// (vaddr, paddr, line size, store) describing the missing line.
pub type MissHook = Rc<dyn Fn(u64, u64, u64, bool)>;

//==================================================================================================
// Structures
//==================================================================================================
/// Victim-way selector: 32-bit Galois LFSR over polynomial 0xD0000001,
/// seeded with 1 so replacement decisions replay identically across runs.
pub struct Lfsr {
    reg: u32,
}

/// Parsed `"sets:ways:linesize"` cache shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    pub sets: usize,
    pub ways: usize,
    pub line_size: u64,
}

/// Per-level access counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub read_accesses: u64,
    pub read_misses: u64,
    pub bytes_read: u64,
    pub write_accesses: u64,
    pub write_misses: u64,
    pub bytes_written: u64,
    pub writebacks: u64,
}

/// One resident line of the fully-associative store: the tag word plus the
/// line-aligned vaddr of the access that installed it.
#[derive(Clone, Copy)]
struct FaLine {
    tag: u64,
    src: u64,
}

enum TagStore {
    /// sets x ways tag words, with a parallel source-vaddr word per cell.
    Direct { tags: Vec<u64>, srcs: Vec<u64> },
    /// Single set keyed by line number. Sorted-key iteration fixes which
    /// entry an LFSR step lands on, keeping victim selection replayable.
    Mapped(BTreeMap<u64, FaLine>),
}

/// One level of the simulated cache hierarchy.
pub struct CacheSim {
    cache_name: String,
    geometry: CacheGeometry,
    index_shift: u32,
    index_mask: u64,
    store: TagStore,
    stats: CacheStats,
    lfsr: Lfsr,
    miss_hook: Option<MissHook>,
    miss_handler: Option<Rc<RefCell<CacheSim>>>,
}

//==================================================================================================
// Implementations
//==================================================================================================
impl Lfsr {
    pub fn new() -> Self {
        Self { reg: 1 }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        self.reg = (self.reg >> 1) ^ (if self.reg & 1 == 0 { 0 } else { 0xD000_0001 });
        self.reg
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheGeometry {
    pub fn parse(config: &str) -> Result<Self> {
        let fields: Vec<&str> = config.split(':').collect();
        if fields.len() != 3 {
            return Err(anyhow::anyhow!(GEOMETRY_HELP));
        }

        let sets = fields[0].parse::<usize>().unwrap_or(0);
        let ways = fields[1].parse::<usize>().unwrap_or(0);
        let line_size = fields[2].parse::<u64>().unwrap_or(0);

        // Sanity Check
        if sets == 0 || !sets.is_power_of_two() {
            return Err(anyhow::anyhow!(GEOMETRY_HELP));
        }
        if ways == 0 {
            return Err(anyhow::anyhow!(GEOMETRY_HELP));
        }
        if line_size < 8 || !line_size.is_power_of_two() {
            return Err(anyhow::anyhow!(GEOMETRY_HELP));
        }

        Ok(Self {
            sets,
            ways,
            line_size,
        })
    }

    /// A single-set cache wide enough that scanning ways linearly would be
    /// wasteful is modeled with a map-backed tag store instead.
    pub fn is_fully_associative(&self) -> bool {
        self.sets == 1 && self.ways > 4
    }
}

impl CacheSim {
    pub fn construct(config: &str, name: &str) -> Result<Self> {
        let geometry = CacheGeometry::parse(config)?;
        debug!(
            "[{}] {} sets, {} ways, {} byte lines",
            name, geometry.sets, geometry.ways, geometry.line_size,
        );

        let store = if geometry.is_fully_associative() {
            TagStore::Mapped(BTreeMap::new())
        } else {
            TagStore::Direct {
                tags: vec![0; geometry.sets * geometry.ways],
                srcs: vec![0; geometry.sets * geometry.ways],
            }
        };

        Ok(Self {
            cache_name: name.to_string(),
            geometry,
            index_shift: geometry.line_size.trailing_zeros(),
            index_mask: (geometry.sets - 1) as u64,
            store,
            stats: CacheStats::default(),
            lfsr: Lfsr::new(),
            miss_hook: None,
            miss_handler: None,
        })
    }

    /// Chains this level to the one that services its misses. Levels are
    /// wired once at startup and never re-wired, so the chain is acyclic.
    pub fn set_miss_handler(&mut self, handler: Rc<RefCell<CacheSim>>) {
        self.miss_handler = Some(handler);
    }

    /// Marks this level as the traced one: every miss here is reported
    /// through `hook` before it is counted and serviced.
    pub fn enable_trace_miss(&mut self, hook: MissHook) {
        self.miss_hook = Some(hook);
    }

    pub fn access(&mut self, vaddr: u64, paddr: u64, bytes: u64, store: bool) {
        if store {
            self.stats.write_accesses += 1;
            self.stats.bytes_written += bytes;
        } else {
            self.stats.read_accesses += 1;
            self.stats.bytes_read += bytes;
        }

        if let Some(cell) = self.check_tag(paddr) {
            if store {
                *cell |= DIRTY;
            }
            return;
        }

        // The miss record describes the line, not the instruction.
        let line_mask = !(self.geometry.line_size - 1);
        if let Some(hook) = &self.miss_hook {
            hook(
                vaddr & line_mask,
                paddr & line_mask,
                self.geometry.line_size,
                store,
            );
        }

        if store {
            self.stats.write_misses += 1;
        } else {
            self.stats.read_misses += 1;
        }

        let (victim_tag, victim_src) = self.victimize(paddr, vaddr & line_mask);

        if victim_tag & (VALID | DIRTY) == (VALID | DIRTY) {
            let dirty_paddr = (victim_tag & !(VALID | DIRTY)) << self.index_shift;
            if let Some(next) = &self.miss_handler {
                next.borrow_mut()
                    .access(victim_src, dirty_paddr, self.geometry.line_size, true);
            }
            self.stats.writebacks += 1;
        }

        // Write-allocate: the fill is a read from below even for a store.
        if let Some(next) = &self.miss_handler {
            next.borrow_mut().access(
                vaddr & line_mask,
                paddr & line_mask,
                self.geometry.line_size,
                false,
            );
        }

        // The fill left the line resident; look it up again instead of
        // reusing the freshly written cell.
        if store {
            if let Some(cell) = self.check_tag(paddr) {
                *cell |= DIRTY;
            }
        }
    }

    fn check_tag(&mut self, paddr: u64) -> Option<&mut u64> {
        let line = paddr >> self.index_shift;
        let index_mask = self.index_mask;
        let ways = self.geometry.ways;

        match &mut self.store {
            TagStore::Direct { tags, .. } => {
                let idx = (line & index_mask) as usize;
                let tag_query = line | VALID;
                tags[idx * ways..(idx + 1) * ways]
                    .iter_mut()
                    .find(|cell| (**cell & !DIRTY) == tag_query)
            }
            TagStore::Mapped(lines) => lines.get_mut(&line).map(|resident| &mut resident.tag),
        }
    }

    fn victimize(&mut self, paddr: u64, src: u64) -> (u64, u64) {
        let line = paddr >> self.index_shift;
        let index_mask = self.index_mask;
        let ways = self.geometry.ways;

        match &mut self.store {
            TagStore::Direct { tags, srcs } => {
                let idx = (line & index_mask) as usize;
                let way = self.lfsr.next() as usize % ways;
                let cell = idx * ways + way;
                let victim = (tags[cell], srcs[cell]);
                tags[cell] = line | VALID;
                srcs[cell] = src;
                victim
            }
            TagStore::Mapped(lines) => {
                let mut victim = (0, 0);
                if lines.len() == ways {
                    let step = self.lfsr.next() as usize % ways;
                    let key = lines.keys().nth(step).copied();
                    if let Some(evicted) = key.and_then(|key| lines.remove(&key)) {
                        victim = (evicted.tag, evicted.src);
                    }
                }
                lines.insert(
                    line,
                    FaLine {
                        tag: line | VALID,
                        src,
                    },
                );
                victim
            }
        }
    }

    /// Writes the per-level statistics block; a level that saw no accesses
    /// stays silent.
    pub fn write_stats(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let stats = &self.stats;
        let accesses = stats.read_accesses + stats.write_accesses;
        if accesses == 0 {
            return Ok(());
        }

        let miss_rate = 100.0 * (stats.read_misses + stats.write_misses) as f64 / accesses as f64;

        writeln!(out, "======== {} ========", self.cache_name)?;
        writeln!(out, "Bytes Read: {}", stats.bytes_read)?;
        writeln!(out, "Bytes Written: {}", stats.bytes_written)?;
        writeln!(out, "Read Accesses: {}", stats.read_accesses)?;
        writeln!(out, "Write Accesses: {}", stats.write_accesses)?;
        writeln!(out, "Read Misses: {}", stats.read_misses)?;
        writeln!(out, "Write Misses: {}", stats.write_misses)?;
        writeln!(out, "Writebacks: {}", stats.writebacks)?;
        writeln!(out, "Miss Rate: {:.3}", miss_rate)
    }

    /// True when the line covering `paddr` is resident.
    pub fn cache_contains(&self, paddr: u64) -> bool {
        let line = paddr >> self.index_shift;
        match &self.store {
            TagStore::Direct { tags, .. } => {
                let idx = (line & self.index_mask) as usize;
                let tag_query = line | VALID;
                tags[idx * self.geometry.ways..(idx + 1) * self.geometry.ways]
                    .iter()
                    .any(|cell| (cell & !DIRTY) == tag_query)
            }
            TagStore::Mapped(lines) => lines.contains_key(&line),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn cache_geometry(&self) -> CacheGeometry {
        self.geometry
    }

    pub fn cache_line_size(&self) -> u64 {
        self.geometry.line_size
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats
    }

    pub fn cache_is_fully_associative(&self) -> bool {
        matches!(self.store, TagStore::Mapped(_))
    }
}
