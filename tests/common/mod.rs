//! Shared harness: builds a binary boot image in memory and provides a
//! recording platform so the entry protocol can be driven by real threads,
//! one per simulated CPU.

#![allow(dead_code)]

use std::alloc::{alloc_zeroed, Layout};
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hvcore::cell::Cell;
use hvcore::config::{HvCellDesc, HvMemoryRegion, HvSystemConfig};
use hvcore::consts::{PAGE_SIZE, PER_CPU_SIZE};
use hvcore::error::{HvError, HvErrorNum, HvResult};
use hvcore::header::{ConsoleFlags, HeaderFlags, HvConsole, HvHeader};
use hvcore::memory::{MemFlags, PagingFlags, PhysAddr, VirtAddr};
use hvcore::percpu::{PerCpu, PerCpuPaging};
use hvcore::platform::Platform;
use hvcore::setup::BootContext;
use hvcore::unit::Unit;

pub const CORE_SIZE: usize = 8 * PAGE_SIZE;

/// Knobs for one in-memory boot image.
pub struct ImageSpec {
    pub max_cpus: u32,
    pub online_cpus: u32,
    pub cpu_set: u64,
    pub flags: HeaderFlags,
    pub console_page: usize,
    pub debug_console: HvConsole,
    pub hypervisor_memory: HvMemoryRegion,
    pub mem_regions: Vec<HvMemoryRegion>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            max_cpus: 4,
            online_cpus: 4,
            cpu_set: 0b1111,
            flags: HeaderFlags::empty(),
            console_page: 3 * PAGE_SIZE,
            debug_console: HvConsole {
                address: 0,
                size: 0,
                con_type: 0,
                flags: ConsoleFlags::empty(),
            },
            hypervisor_memory: HvMemoryRegion {
                phys_start: 0x10_0000,
                virt_start: 0x10_0000,
                size: (8 * PAGE_SIZE) as u64,
                flags: MemFlags::READ | MemFlags::WRITE | MemFlags::EXECUTE,
            },
            mem_regions: Vec::new(),
        }
    }
}

/// Lays out header, per-CPU array, system config and the region array the
/// way the external builder does, and leaks it for the lifetime of the
/// test process (CPUs that activate never return, so the image must
/// outlive every detached thread).
pub fn build_image(spec: &ImageSpec) -> &'static HvHeader {
    let config_offset = CORE_SIZE + PER_CPU_SIZE * spec.max_cpus as usize;
    let total = config_offset
        + size_of::<HvSystemConfig>()
        + spec.mem_regions.len() * size_of::<HvMemoryRegion>();
    let layout = Layout::from_size_align(total, PAGE_SIZE).unwrap();
    unsafe {
        let base = alloc_zeroed(layout);
        assert!(!base.is_null());

        let header = HvHeader::new(
            CORE_SIZE,
            PER_CPU_SIZE,
            spec.max_cpus,
            spec.online_cpus,
            spec.flags,
            spec.console_page,
            spec.debug_console,
        );
        (base as *mut HvHeader).write(header);

        let root_cell = HvCellDesc::new("root", 0, spec.cpu_set, spec.mem_regions.len() as u32);
        let config = HvSystemConfig::new(0, spec.hypervisor_memory, root_cell);
        let config_ptr = base.add(config_offset) as *mut HvSystemConfig;
        config_ptr.write_unaligned(config);

        let regions_ptr =
            base.add(config_offset + size_of::<HvSystemConfig>()) as *mut HvMemoryRegion;
        for (i, region) in spec.mem_regions.iter().enumerate() {
            regions_ptr.add(i).write_unaligned(*region);
        }

        HvHeader::from_ptr(base as *const HvHeader)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PagingInit,
    InitEarly,
    CpuInit(u32),
    HvptLink { virt: VirtAddr },
    CreateMapping { phys: PhysAddr, size: usize, virt: VirtAddr, mem_flags: u64, paging: u32 },
    MapRegion { phys: u64, virt: u64, size: u64, mem_flags: u64 },
    SubpageRegister { virt: u64 },
    SetMappingFlags { virt: VirtAddr, size: usize, mask: u64, value: u64 },
    ConfigCommit,
    DumpStats(String),
}

/// Records every collaborator call; optionally injects one per-CPU init
/// failure. Activated CPUs park forever, like the real one-way transition.
pub struct MockPlatform {
    pub events: Mutex<Vec<Event>>,
    pub activated: AtomicU32,
    pub restored: AtomicU32,
    pub shutdowns: AtomicU32,
    pub fail_cpu_init: Option<u32>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            activated: AtomicU32::new(0),
            restored: AtomicU32::new(0),
            shutdowns: AtomicU32::new(0),
            fail_cpu_init: None,
        }
    }

    pub fn failing_cpu_init(cpu_id: u32) -> Self {
        Self {
            fail_cpu_init: Some(cpu_id),
            ..Self::new()
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count<F: Fn(&Event) -> bool>(&self, pred: F) -> usize {
        self.events().iter().filter(|e| pred(*e)).count()
    }

    pub fn activated(&self) -> u32 {
        self.activated.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> u32 {
        self.restored.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Platform for MockPlatform {
    fn init_early(&self) -> HvResult {
        self.record(Event::InitEarly);
        Ok(())
    }

    fn cpu_init(&self, cpu_data: &mut PerCpu) -> HvResult {
        self.record(Event::CpuInit(cpu_data.id()));
        if self.fail_cpu_init == Some(cpu_data.id()) {
            return Err(HvError::new(HvErrorNum::EIO, file!(), line!(), Some("injected")));
        }
        Ok(())
    }

    fn cpu_activate_vmm(&self, _cpu_data: &mut PerCpu) -> ! {
        self.activated.fetch_add(1, Ordering::SeqCst);
        loop {
            thread::park();
        }
    }

    fn cpu_restore(&self, _cpu_id: u32, _error_code: i32) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }

    fn map_memory_region(&self, _cell: &mut Cell, mem: &HvMemoryRegion) -> HvResult {
        self.record(Event::MapRegion {
            phys: mem.phys_start,
            virt: mem.virt_start,
            size: mem.size,
            mem_flags: { mem.flags }.bits(),
        });
        Ok(())
    }

    fn mmio_subpage_register(&self, _cell: &mut Cell, mem: &HvMemoryRegion) -> HvResult {
        self.record(Event::SubpageRegister {
            virt: mem.virt_start,
        });
        Ok(())
    }

    fn config_commit(&self, _cell: &mut Cell) -> HvResult {
        self.record(Event::ConfigCommit);
        Ok(())
    }

    fn paging_init(&self) -> HvResult {
        self.record(Event::PagingInit);
        Ok(())
    }

    fn create_hvpt_link(&self, _pg: &mut PerCpuPaging, virt: VirtAddr) -> HvResult {
        self.record(Event::HvptLink { virt });
        Ok(())
    }

    fn create_mapping(
        &self,
        _pg: &mut PerCpuPaging,
        phys: PhysAddr,
        size: usize,
        virt: VirtAddr,
        flags: MemFlags,
        paging: PagingFlags,
    ) -> HvResult {
        self.record(Event::CreateMapping {
            phys,
            size,
            virt,
            mem_flags: flags.bits(),
            paging: paging.bits(),
        });
        Ok(())
    }

    fn set_mapping_flags(
        &self,
        _cell: &mut Cell,
        virt: VirtAddr,
        size: usize,
        _paging: PagingFlags,
        mask: u64,
        value: u64,
    ) -> HvResult {
        self.record(Event::SetMappingFlags {
            virt,
            size,
            mask,
            value,
        });
        Ok(())
    }

    fn hvirt_to_phys(&self, vaddr: VirtAddr) -> PhysAddr {
        vaddr
    }

    fn dump_paging_stats(&self, when: &str) {
        self.record(Event::DumpStats(when.to_string()));
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Unit whose `init` appends its name to a shared order log and optionally
/// fails.
pub struct MockUnit {
    name: &'static str,
    fail: Option<HvErrorNum>,
    log: &'static Mutex<Vec<&'static str>>,
}

impl MockUnit {
    pub fn new(
        name: &'static str,
        fail: Option<HvErrorNum>,
        log: &'static Mutex<Vec<&'static str>>,
    ) -> Self {
        Self { name, fail, log }
    }
}

impl Unit for MockUnit {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&self) -> HvResult {
        self.log.lock().unwrap().push(self.name);
        match self.fail {
            Some(num) => Err(HvError::new(num, file!(), line!(), Some("injected"))),
            None => Ok(()),
        }
    }
}

pub fn unit_log() -> &'static Mutex<Vec<&'static str>> {
    Box::leak(Box::new(Mutex::new(Vec::new())))
}

/// One fully wired boot under test. Everything is leaked on purpose:
/// successfully activated CPUs never return, so borrows must be `'static`.
pub struct Boot {
    pub header: &'static HvHeader,
    pub platform: &'static MockPlatform,
    pub ctx: &'static BootContext<'static>,
}

impl Boot {
    pub fn new(spec: ImageSpec, platform: MockPlatform) -> Self {
        Self::with_units(spec, platform, Vec::new(), false)
    }

    pub fn with_units(
        spec: ImageSpec,
        platform: MockPlatform,
        units: Vec<&'static dyn Unit>,
        page_table_protection: bool,
    ) -> Self {
        let header = build_image(&spec);
        let platform: &'static MockPlatform = Box::leak(Box::new(platform));
        let units: &'static [&'static dyn Unit] = Box::leak(units.into_boxed_slice());
        let mut ctx = BootContext::new(header, platform, units);
        if page_table_protection {
            ctx = ctx.with_page_table_protection();
        }
        let ctx: &'static BootContext<'static> = Box::leak(Box::new(ctx));
        Self {
            header,
            platform,
            ctx,
        }
    }

    /// Runs `cpu_entry` for `cpu_id` on its own thread, using the matching
    /// per-CPU slot.
    pub fn spawn(&self, cpu_id: u32) -> JoinHandle<i32> {
        self.spawn_with_slot(cpu_id, cpu_id)
    }

    /// Same, but with an explicit slot index (for out-of-range id tests).
    pub fn spawn_with_slot(&self, slot: u32, cpu_id: u32) -> JoinHandle<i32> {
        let header = self.header;
        let ctx = self.ctx;
        thread::spawn(move || {
            let cpu_data = unsafe { PerCpu::from_id_mut(header, slot) };
            hvcore::setup::cpu_entry(ctx, cpu_id, cpu_data)
        })
    }

    /// Launches CPUs in the given arrival order with a small stagger so the
    /// order of `entered` increments matches.
    pub fn launch(&self, arrival_order: &[u32]) -> Vec<JoinHandle<i32>> {
        let mut handles = Vec::new();
        for &cpu_id in arrival_order {
            handles.push(self.spawn(cpu_id));
            thread::sleep(Duration::from_millis(10));
        }
        handles
    }
}

/// Polls `done` until it holds or `timeout` elapses; true on success.
pub fn wait_until(timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}
