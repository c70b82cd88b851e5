//==================================================================================================
// Configuration
//==================================================================================================
#![deny(clippy::all)]

//==================================================================================================
// Imports
//==================================================================================================
use ::anyhow::Result;
use cache_lib::{CacheSim, MissHook};
use log::debug;
use mem_lib::{crosses_page, misaligned, AccessKind, PAGE_MASK};
use mmu_lib::{AddressTranslator, TranslateResult};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::rc::Rc;

//==================================================================================================
// Constants
//==================================================================================================
const REGION_HINT: &str = "trace region must be of the form <start>:<end>\n  \
    (e.g., 0x80000:0x90000)";

//==================================================================================================
// Enum
//==================================================================================================
enum SinkOut {
    Stdout(io::Stdout),
    File(File),
    Memory(Vec<u8>),
}

enum TracerKind {
    Instruction,
    Data,
}

//==================================================================================================
// Structures
//==================================================================================================
/// Destination for trace records and teardown statistics.
pub struct TraceSink {
    out: SinkOut,
}

/// Process-wide tracing switches and the sink they guard.
struct TraceConfig {
    started: bool,
    emit: bool,
    trace_code: bool,
    region_start: u64,
    region_end: u64,
    ram_base: u64,
    sink: Option<TraceSink>,
}

/// One registered front cache and the access kinds it consumes.
struct CacheTracer {
    kind: TracerKind,
    cache: Rc<RefCell<CacheSim>>,
}

/// The tracing context the emulator owns: configuration, the tracer
/// registry, and the cache hierarchy. Every entry point takes `&mut self`,
/// which is the single-threaded discipline the model requires.
pub struct MemTracer {
    config: Rc<RefCell<TraceConfig>>,
    tracers: Vec<CacheTracer>,
    cache_l1i: Option<Rc<RefCell<CacheSim>>>,
    cache_l1d: Option<Rc<RefCell<CacheSim>>>,
    cache_l2: Option<Rc<RefCell<CacheSim>>>,
    cache_l3: Option<Rc<RefCell<CacheSim>>>,
}

//==================================================================================================
// Implementations
//==================================================================================================
impl TraceSink {
    /// Opens the sink; `None` or `"-"` mean standard output. Failing to
    /// create the file is a fatal configuration error.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let out = match path {
            None | Some("-") => SinkOut::Stdout(io::stdout()),
            Some(path) => {
                let file = File::create(path).map_err(|err| {
                    anyhow::anyhow!("cannot open trace file {}: {}", path, err)
                })?;
                SinkOut::File(file)
            }
        };
        Ok(Self { out })
    }

    /// In-memory sink, for embedding and tests.
    pub fn memory() -> Self {
        Self {
            out: SinkOut::Memory(Vec::new()),
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match &mut self.out {
            SinkOut::Stdout(out) => out,
            SinkOut::File(out) => out,
            SinkOut::Memory(out) => out,
        }
    }

    // Best effort: a trace that cannot be written must not take the
    // emulator down.
    fn line(&mut self, line: std::fmt::Arguments) {
        let _ = writeln!(self.writer(), "{}", line);
    }

    fn write_access(&mut self, store: bool, paddr: u64, size: u64, vaddr: u64) {
        let tag = if store { 'S' } else { 'L' };
        if vaddr != 0 {
            self.line(format_args!(
                "{} 0x{:x} size {} => 0x{:x}",
                tag, paddr, size, vaddr
            ));
        } else {
            // vaddr 0 marks records with no vaddr context (writebacks).
            self.line(format_args!("{} 0x{:x} size {}", tag, paddr, size));
        }
    }

    /// Contents of a memory sink; `None` for file and stdout sinks.
    pub fn contents(&self) -> Option<String> {
        match &self.out {
            SinkOut::Memory(buffer) => Some(String::from_utf8_lossy(buffer).into_owned()),
            _ => None,
        }
    }
}

impl TraceConfig {
    fn new() -> Self {
        Self {
            started: false,
            emit: false,
            trace_code: true,
            region_start: 0,
            region_end: u64::MAX,
            ram_base: 0,
            sink: None,
        }
    }

    fn log_filtered(&mut self, vaddr: u64, paddr: u64, size: u64, store: bool) {
        if !self.emit {
            return;
        }
        if paddr < self.region_start || paddr >= self.region_end {
            return;
        }
        if let Some(sink) = &mut self.sink {
            sink.write_access(store, paddr, size, vaddr);
        }
    }
}

impl TracerKind {
    fn wants(&self, kind: AccessKind) -> bool {
        match self {
            TracerKind::Instruction => kind == AccessKind::Fetch,
            TracerKind::Data => kind == AccessKind::Load || kind == AccessKind::Store,
        }
    }
}

impl MemTracer {
    pub fn new() -> Self {
        debug!("[tracer] creating tracing context");
        Self {
            config: Rc::new(RefCell::new(TraceConfig::new())),
            tracers: Vec::new(),
            cache_l1i: None,
            cache_l1d: None,
            cache_l2: None,
            cache_l3: None,
        }
    }

    //----------------------------------------------------------------------
    // Startup configuration
    //----------------------------------------------------------------------

    /// Replaces the physical-address filter window. `region` is
    /// `"<start>:<end>"` with optionally `0x`-prefixed hex bounds.
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        let Some((start, end)) = region.split_once(':') else {
            return Err(anyhow::anyhow!(REGION_HINT));
        };
        let start = parse_hex(start)?;
        let end = parse_hex(end)?;

        let mut config = self.config.borrow_mut();
        config.region_start = start;
        config.region_end = end;
        debug!("[tracer] region window 0x{:x}:0x{:x}", start, end);
        Ok(())
    }

    /// Records where guest RAM sits. Only the first call counts; that one
    /// is for the system memory.
    pub fn set_ram_base(&mut self, base: u64, size: u64) {
        let mut config = self.config.borrow_mut();
        if config.ram_base != 0 || config.sink.is_none() {
            return;
        }
        config.ram_base = base;
        if let Some(sink) = &mut config.sink {
            sink.line(format_args!("RAM base: 0x{:x}, size: 0x{:x}", base, size));
        }
    }

    /// Whether instruction fetches are logged on the direct (cache-less)
    /// path. A configured cache hierarchy always simulates fetches.
    pub fn set_trace_code(&mut self, trace_code: bool) {
        self.config.borrow_mut().trace_code = trace_code;
    }

    pub fn init_l1(&mut self, config: &str) -> Result<()> {
        let l1i = CacheSim::construct(config, "L1-I")?;
        let l1d = CacheSim::construct(config, "L1-D")?;
        self.cache_l1i = Some(Rc::new(RefCell::new(l1i)));
        self.cache_l1d = Some(Rc::new(RefCell::new(l1d)));
        Ok(())
    }

    pub fn init_l2(&mut self, config: &str) -> Result<()> {
        let (Some(l1i), Some(l1d)) = (&self.cache_l1i, &self.cache_l1d) else {
            return Err(anyhow::anyhow!("cannot define L2 without L1 cache"));
        };

        let l2 = Rc::new(RefCell::new(CacheSim::construct(config, "L2")?));
        l1i.borrow_mut().set_miss_handler(Rc::clone(&l2));
        l1d.borrow_mut().set_miss_handler(Rc::clone(&l2));
        self.cache_l2 = Some(l2);
        Ok(())
    }

    pub fn init_l3(&mut self, config: &str) -> Result<()> {
        let Some(l2) = &self.cache_l2 else {
            return Err(anyhow::anyhow!("cannot define L3 without L2 cache"));
        };

        let l3 = Rc::new(RefCell::new(CacheSim::construct(config, "L3")?));
        l2.borrow_mut().set_miss_handler(Rc::clone(&l3));
        self.cache_l3 = Some(l3);
        Ok(())
    }

    /// Opens the sink, registers the front caches with the registry, and
    /// taps the deepest level so its miss stream reaches the sink.
    pub fn finalize(&mut self, path: Option<&str>) -> Result<()> {
        let sink = TraceSink::open(path)?;
        self.finalize_with_sink(sink);
        Ok(())
    }

    pub fn finalize_with_sink(&mut self, sink: TraceSink) {
        {
            let mut config = self.config.borrow_mut();
            config.sink = Some(sink);
            config.emit = true;
        }

        self.tracers.clear();
        if let (Some(l1i), Some(l1d)) = (&self.cache_l1i, &self.cache_l1d) {
            self.tracers.push(CacheTracer {
                kind: TracerKind::Instruction,
                cache: Rc::clone(l1i),
            });
            self.tracers.push(CacheTracer {
                kind: TracerKind::Data,
                cache: Rc::clone(l1d),
            });
        }

        let hook = self.miss_hook();
        if let Some(l3) = &self.cache_l3 {
            self.header("L3");
            l3.borrow_mut().enable_trace_miss(hook);
        } else if let Some(l2) = &self.cache_l2 {
            self.header("L2");
            l2.borrow_mut().enable_trace_miss(hook);
        } else if let (Some(l1i), Some(l1d)) = (&self.cache_l1i, &self.cache_l1d) {
            self.header("L1");
            l1i.borrow_mut().enable_trace_miss(Rc::clone(&hook));
            l1d.borrow_mut().enable_trace_miss(hook);
        }
    }

    fn header(&self, level: &str) {
        let mut config = self.config.borrow_mut();
        if let Some(sink) = &mut config.sink {
            sink.line(format_args!("{} misses will be traced", level));
        }
    }

    fn miss_hook(&self) -> MissHook {
        let config = Rc::clone(&self.config);
        Rc::new(move |vaddr, paddr, bytes, store| {
            config.borrow_mut().log_filtered(vaddr, paddr, bytes, store);
        })
    }

    //----------------------------------------------------------------------
    // Control
    //----------------------------------------------------------------------

    pub fn start(&mut self) {
        self.config.borrow_mut().started = true;
    }

    pub fn stop(&mut self) {
        self.config.borrow_mut().started = false;
    }

    //----------------------------------------------------------------------
    // Access pipeline
    //----------------------------------------------------------------------

    pub fn on_load(&mut self, env: &dyn AddressTranslator, vaddr: u64, size: u64) {
        self.pipe(env, vaddr, size, AccessKind::Load);
    }

    pub fn on_store(&mut self, env: &dyn AddressTranslator, vaddr: u64, size: u64) {
        self.pipe(env, vaddr, size, AccessKind::Store);
    }

    pub fn on_fetch(&mut self, env: &dyn AddressTranslator, vaddr: u64, size: u64) {
        self.pipe(env, vaddr, size, AccessKind::Fetch);
    }

    fn pipe(&mut self, env: &dyn AddressTranslator, vaddr: u64, size: u64, kind: AccessKind) {
        if !self.config.borrow().started {
            return;
        }
        debug_assert!(size.is_power_of_two());

        // Translation is page-granular, so a straddling access has each
        // half translated on its own. Low half first.
        if misaligned(vaddr, size) && crosses_page(vaddr, size) {
            let half = size / 2;
            self.pipe(env, vaddr, half, kind);
            self.pipe(env, vaddr + half, half, kind);
            return;
        }

        let page = match env.guest_paddr(vaddr & !PAGE_MASK) {
            TranslateResult::Hit(page) => page,
            // An access that would fault is not a memory event.
            TranslateResult::Fault => return,
        };
        let paddr = page | (vaddr & PAGE_MASK);

        if !self.tracers.is_empty() {
            for tracer in &self.tracers {
                if tracer.kind.wants(kind) {
                    tracer
                        .cache
                        .borrow_mut()
                        .access(vaddr, paddr, size, kind.is_store());
                }
            }
            return;
        }

        if kind == AccessKind::Fetch && !self.config.borrow().trace_code {
            return;
        }
        self.config
            .borrow_mut()
            .log_filtered(vaddr, paddr, size, kind.is_store());
    }

    //----------------------------------------------------------------------
    // Teardown
    //----------------------------------------------------------------------

    /// Flushes every level's statistics to the sink (front caches first,
    /// then the deeper levels) and drops the hierarchy. Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut config = self.config.borrow_mut();
            if let Some(sink) = &mut config.sink {
                let out = sink.writer();
                for level in [
                    &self.cache_l1i,
                    &self.cache_l1d,
                    &self.cache_l2,
                    &self.cache_l3,
                ]
                .into_iter()
                .flatten()
                {
                    let _ = level.borrow().write_stats(out);
                }
            }
        }

        self.tracers.clear();
        self.cache_l1i = None;
        self.cache_l1d = None;
        self.cache_l2 = None;
        self.cache_l3 = None;
    }

    //----------------------------------------------------------------------
    // Introspection
    //----------------------------------------------------------------------

    /// (name, counters) for every live cache level, front caches first.
    pub fn level_stats(&self) -> Vec<(String, cache_lib::CacheStats)> {
        [
            &self.cache_l1i,
            &self.cache_l1d,
            &self.cache_l2,
            &self.cache_l3,
        ]
        .into_iter()
        .flatten()
        .map(|level| {
            let level = level.borrow();
            (level.cache_name().to_string(), level.cache_stats())
        })
        .collect()
    }

    /// Contents of a memory sink; `None` for file and stdout sinks.
    pub fn sink_contents(&self) -> Option<String> {
        self.config
            .borrow()
            .sink
            .as_ref()
            .and_then(|sink| sink.contents())
    }
}

impl Default for MemTracer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_hex(field: &str) -> Result<u64> {
    let digits = field.strip_prefix("0x").unwrap_or(field);
    u64::from_str_radix(digits, 16).map_err(|_| anyhow::anyhow!(REGION_HINT))
}
