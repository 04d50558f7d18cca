//! Staged bring-up choreography, run cooperatively by every CPU.
//!
//! Control flow is strictly staged: every CPU enters and rendezvouses,
//! exactly one CPU (the first to take the lock) runs the system-wide early
//! stage, all CPUs run their per-CPU stage in parallel, the master runs the
//! late stage, then every CPU either activates the VMM (one-way) or, on any
//! recorded error, restores and returns to the caller.
//!
//! The lock protects only the counters and the master-assignment decision.
//! Everything else is single-writer by protocol stage: the master owns
//! cell-wide state during early/late, each CPU owns its `PerCpu` slot in
//! between. That discipline, not extra locking, is the safety argument.

use core::sync::atomic::{fence, AtomicBool, AtomicI32, Ordering};

use spin::{Mutex, Once, RwLock};

use crate::cell::Cell;
use crate::config::{HvMemoryRegion, HvSystemConfig};
use crate::consts::{
    HV_BASE, LOCAL_CPU_BASE, NUM_TEMPORARY_PAGES, PAGE_SIZE, PGP_RO_BUF_SIZE, PGP_RO_BUF_VIRT,
    TEMPORARY_MAPPING_BASE,
};
use crate::error::{HvError, HvResult};
use crate::header::{ConsoleFlags, HvHeader};
use crate::memory::{MemFlags, PagingFlags, VirtAddr, PTE_WRITE_MASK, PTE_WRITE_PROTECTED};
use crate::percpu::{PerCpu, PerCpuPaging};
use crate::platform::Platform;
use crate::sync::{cpu_relax, Barrier};
use crate::unit::Unit;

#[repr(C, align(4096))]
struct EmptyPage([u8; PAGE_SIZE]);

/// Shared all-zero page backing the defensive remap of the hypervisor
/// image.
static EMPTY_PAGE: EmptyPage = EmptyPage([0; PAGE_SIZE]);

/// Process-wide rendezvous state of one boot sequence.
///
/// Counters only ever grow, and only while holding their barrier's lock.
/// The error cell takes the code of any local failure, last writer wins;
/// a single recorded error aborts the whole boot, so losing an earlier
/// code changes nothing.
pub struct BootState {
    entered: Barrier,
    initialized: Barrier,
    master_cpu_id: Mutex<Option<u32>>,
    error: AtomicI32,
    activate: AtomicBool,
}

impl BootState {
    const fn new() -> Self {
        Self {
            entered: Barrier::new(),
            initialized: Barrier::new(),
            master_cpu_id: Mutex::new(None),
            error: AtomicI32::new(0),
            activate: AtomicBool::new(false),
        }
    }

    fn set_error(&self, err: &HvError) {
        self.error.store(err.code(), Ordering::Release);
    }

    fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire) != 0
    }

    pub fn error_code(&self) -> i32 {
        self.error.load(Ordering::Acquire)
    }

    pub fn entered_cpus(&self) -> u32 {
        self.entered.count()
    }

    pub fn initialized_cpus(&self) -> u32 {
        self.initialized.count()
    }

    pub fn master_cpu_id(&self) -> Option<u32> {
        *self.master_cpu_id.lock()
    }

    pub fn activated(&self) -> bool {
        self.activate.load(Ordering::Acquire)
    }

    /// Spins until `done()` holds or a boot error is observed. Every wait
    /// loop on the boot path goes through here: a loop that misses the
    /// error check spins forever once another CPU has failed.
    fn wait_for(&self, done: impl Fn() -> bool) {
        while !self.has_error() && !done() {
            cpu_relax();
        }
    }
}

/// Everything one boot sequence needs, passed by shared reference into
/// every CPU's entry. Configuration and the root cell are derived once by
/// the master and read-only afterwards.
pub struct BootContext<'a> {
    header: &'a HvHeader,
    platform: &'a dyn Platform,
    units: &'a [&'a dyn Unit],
    /// Page-table protection hardening: link a protected read-only buffer
    /// into every per-CPU table and write-protect it in the root cell's
    /// table. Selected at runtime so both configurations exist in one
    /// build.
    page_table_protection: bool,
    state: BootState,
    system_config: Once<&'a HvSystemConfig>,
    root_cell: Once<RwLock<Cell<'a>>>,
}

impl<'a> BootContext<'a> {
    pub fn new(header: &'a HvHeader, platform: &'a dyn Platform, units: &'a [&'a dyn Unit]) -> Self {
        Self {
            header,
            platform,
            units,
            page_table_protection: false,
            state: BootState::new(),
            system_config: Once::new(),
            root_cell: Once::new(),
        }
    }

    pub fn with_page_table_protection(mut self) -> Self {
        self.page_table_protection = true;
        self
    }

    pub fn header(&self) -> &'a HvHeader {
        self.header
    }

    pub fn state(&self) -> &BootState {
        &self.state
    }

    /// Available once the master finished computing it during early init.
    pub fn system_config(&self) -> Option<&'a HvSystemConfig> {
        self.system_config.get().copied()
    }

    pub fn root_cell(&self) -> Option<&RwLock<Cell<'a>>> {
        self.root_cell.get()
    }
}

/// System-wide initialization, master CPU only, inside the master-election
/// critical section. Any failing step short-circuits the rest; the stage
/// either fully completes or leaves the system in an undefined state that
/// only the fatal path may touch.
fn init_early<'a>(ctx: &BootContext<'a>, cpu_id: u32) -> HvResult {
    let header = ctx.header;
    // The config address derives purely from link-time constants and
    // max_cpus; it must never move once computed.
    let system_config = unsafe { header.system_config() };
    system_config.check()?;
    ctx.system_config.call_once(|| system_config);

    let virtual_console = header.has_virtual_console();

    crate::logging::init();
    println!("\nInitializing hypervisor on CPU {}", cpu_id);
    info!("Hypervisor header: {:#x?}", header);

    ctx.platform.paging_init()?;

    let mut root_cell = Cell::new(&system_config.root_cell)?;

    ctx.platform.init_early()?;

    // Back the hypervisor core and per-CPU region with empty pages for the
    // root cell. This allows the host kernel to fault-in the hypervisor
    // region into its own page tables before shutdown without triggering
    // violations, while not leaking the hypervisor's actual contents.
    //
    // Allow read access to the real console page if the virtual debug
    // console is enabled.
    let hv_mem = system_config.hypervisor_memory;
    let hyp_phys_start = hv_mem.phys_start;
    let hyp_phys_end = hyp_phys_start + hv_mem.size;
    let console_phys = hyp_phys_start + header.console_page as u64;
    let zero_phys = ctx.platform.hvirt_to_phys(EMPTY_PAGE.0.as_ptr() as VirtAddr) as u64;

    let mut virt = hyp_phys_start;
    while virt < hyp_phys_end {
        let phys = if virtual_console && virt == console_phys {
            console_phys
        } else {
            zero_phys
        };
        let hv_page = HvMemoryRegion {
            phys_start: phys,
            virt_start: virt,
            size: PAGE_SIZE as u64,
            flags: MemFlags::READ,
        };
        ctx.platform.map_memory_region(&mut root_cell, &hv_page)?;
        virt += PAGE_SIZE as u64;
    }

    ctx.platform.dump_paging_stats("after early setup");
    ctx.root_cell.call_once(|| RwLock::new(root_cell));
    println!("Initializing processors:");
    Ok(())
}

/// Per-CPU initialization, run on every CPU in parallel after the early
/// stage succeeded. Mappings made before a failing step stay in place; a
/// failure here aborts the whole boot, so nothing unwinds.
fn cpu_init(ctx: &BootContext, cpu_data: &mut PerCpu) -> HvResult {
    let header = ctx.header;
    if cpu_data.id() >= header.max_cpus {
        return hv_result_err!(EINVAL, "CPU id out of range");
    }

    let root_cell = ctx
        .root_cell()
        .ok_or_else(|| hv_err!(EINVAL, "root cell not initialized"))?;
    cpu_data.attach_cell(root_cell.read().id());

    // Set up the per-CPU page table: privately rooted, linked back into
    // the shared hypervisor table.
    cpu_data.pg_structs = PerCpuPaging {
        hv_paging: true,
        root_table: cpu_data.root_table_addr(),
    };
    ctx.platform
        .create_hvpt_link(&mut cpu_data.pg_structs, HV_BASE)?;

    if ctx.page_table_protection {
        if let Err(e) = ctx
            .platform
            .create_hvpt_link(&mut cpu_data.pg_structs, PGP_RO_BUF_VIRT)
        {
            error!("CPU {}: linking protected read-only buffer failed", cpu_data.id());
            return Err(e);
        }
    }

    let console = header.debug_console;
    if console.flags.contains(ConsoleFlags::ACCESS_MMIO) {
        ctx.platform
            .create_hvpt_link(&mut cpu_data.pg_structs, console.address as VirtAddr)?;
    }

    // Private mapping of this CPU's own data structure at the fixed
    // CPU-local base.
    let percpu_phys = ctx
        .platform
        .hvirt_to_phys(cpu_data as *const _ as VirtAddr);
    ctx.platform.create_mapping(
        &mut cpu_data.pg_structs,
        percpu_phys,
        header.percpu_size,
        LOCAL_CPU_BASE,
        MemFlags::READ | MemFlags::WRITE,
        PagingFlags::NON_COHERENT | PagingFlags::HUGE,
    )?;

    ctx.platform.cpu_init(cpu_data)?;

    // Make sure any remappings to the temporary region can be performed
    // without allocations of page table pages.
    ctx.platform.create_mapping(
        &mut cpu_data.pg_structs,
        0,
        NUM_TEMPORARY_PAGES * PAGE_SIZE,
        TEMPORARY_MAPPING_BASE,
        MemFlags::empty(),
        PagingFlags::NON_COHERENT | PagingFlags::NO_HUGE,
    )?;

    Ok(())
}

/// System-wide finalization, master CPU only, after every CPU finished its
/// per-CPU stage.
fn init_late(ctx: &BootContext) -> HvResult {
    let header = ctx.header;
    let root_cell = ctx
        .root_cell()
        .ok_or_else(|| hv_err!(EINVAL, "root cell not initialized"))?;
    let mut root = root_cell.write();

    // The set of CPUs that physically arrived must equal the configured
    // set exactly, neither a subset nor a superset.
    let expected_cpus = root.cpu_set.len();
    if header.online_cpus != expected_cpus {
        return hv_result_err!(EINVAL, "configured CPU set does not match online CPUs");
    }

    for unit in ctx.units {
        println!("Initializing unit: {}", unit.name());
        unit.init()?;
    }

    let config = root.config;
    for mem in config.mem_regions() {
        if mem.is_subpage() {
            ctx.platform.mmio_subpage_register(&mut root, mem)?;
        } else {
            ctx.platform.map_memory_region(&mut root, mem)?;
        }
    }

    if ctx.page_table_protection {
        ctx.platform.set_mapping_flags(
            &mut root,
            PGP_RO_BUF_VIRT,
            PGP_RO_BUF_SIZE,
            PagingFlags::NON_COHERENT | PagingFlags::HUGE,
            PTE_WRITE_MASK,
            PTE_WRITE_PROTECTED,
        )?;
    }

    ctx.platform.config_commit(&mut root)?;

    ctx.platform.dump_paging_stats("after late setup");
    Ok(())
}

fn shutdown(ctx: &BootContext) {
    error!(
        "Boot failed with error {}, shutting down",
        ctx.state.error_code()
    );
    ctx.platform.shutdown();
}

/// Architecture-independent entry point, called once per physical CPU by
/// the entry trampoline.
///
/// Returns the negative error code only on the failure path, after the
/// master has driven shutdown and this CPU restored its pre-entry state.
/// On success the call never returns: the final transition into
/// hypervisor-active operation is one-way.
pub fn cpu_entry(ctx: &BootContext, cpu_id: u32, cpu_data: &mut PerCpu) -> i32 {
    let state = &ctx.state;
    cpu_data.prepare(cpu_id);

    state.entered.enter();
    state.wait_for(|| state.entered.count() >= ctx.header.online_cpus);

    let mut master = false;
    {
        let mut master_cpu_id = state.master_cpu_id.lock();
        if master_cpu_id.is_none() {
            // Only the master CPU, the first to take the lock, performs
            // system-wide initializations. Assignment and the early stage
            // share one critical section so no second CPU can conclude it
            // is master.
            *master_cpu_id = Some(cpu_id);
            master = true;
            if let Err(e) = init_early(ctx, cpu_id) {
                error!("Early init failed: {:?}", e);
                state.set_error(&e);
            }
        }
    }

    if !state.has_error() {
        print!(" CPU {}... ", cpu_id);
        match cpu_init(ctx, cpu_data) {
            Ok(()) => {
                println!("OK");
                // Publish every per-CPU side effect before the CPUs
                // spinning on the counter may continue.
                state.initialized.enter();
            }
            Err(e) => {
                println!("FAILED");
                error!("CPU {} init failed: {:?}", cpu_id, e);
                state.set_error(&e);
            }
        }
    }

    state.wait_for(|| state.initialized.count() >= ctx.header.online_cpus);

    if !state.has_error() && master {
        match init_late(ctx) {
            Ok(()) => {
                // Publish the late stage before releasing the other CPUs.
                fence(Ordering::SeqCst);
                state.activate.store(true, Ordering::Release);
            }
            Err(e) => {
                error!("Late init failed: {:?}", e);
                state.set_error(&e);
            }
        }
    } else {
        state.wait_for(|| state.activate.load(Ordering::Acquire));
    }

    if state.has_error() {
        let code = state.error_code();
        if master {
            shutdown(ctx);
        }
        ctx.platform.cpu_restore(cpu_id, code);
        return code;
    }

    if master {
        println!("Activating hypervisor");
    }

    // point of no return
    ctx.platform.cpu_activate_vmm(cpu_data)
}
