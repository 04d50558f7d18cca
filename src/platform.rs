use crate::cell::Cell;
use crate::config::HvMemoryRegion;
use crate::error::HvResult;
use crate::memory::{MemFlags, PagingFlags, PhysAddr, VirtAddr};
use crate::percpu::{PerCpu, PerCpuPaging};

/// Everything the bring-up core consumes from the surrounding image:
/// architecture entry/exit mechanics, the page-table algebra, and the MMIO
/// and commit plumbing. The core decides what to map and in what order;
/// the implementor owns how.
///
/// All methods may be called concurrently from different CPUs, but the boot
/// protocol guarantees a single writer per target structure: the master CPU
/// for cell-wide state, the owning CPU for its `PerCpuPaging`.
pub trait Platform: Sync {
    /// Architecture-wide early initialization, master CPU only.
    fn init_early(&self) -> HvResult;

    /// Architecture-local per-CPU initialization.
    fn cpu_init(&self, cpu_data: &mut PerCpu) -> HvResult;

    /// The one-way transition into hypervisor-active operation. Never
    /// returns; a CPU that calls this is committed.
    fn cpu_activate_vmm(&self, cpu_data: &mut PerCpu) -> !;

    /// Restores the pre-entry CPU state so control can return to whatever
    /// invoked the hypervisor, carrying `error_code`.
    fn cpu_restore(&self, cpu_id: u32, error_code: i32);

    /// Maps one declared memory region into a cell's address space.
    fn map_memory_region(&self, cell: &mut Cell, mem: &HvMemoryRegion) -> HvResult;

    /// Registers a region too fine-grained for the mapping unit with the
    /// trap-and-emulate machinery.
    fn mmio_subpage_register(&self, cell: &mut Cell, mem: &HvMemoryRegion) -> HvResult;

    /// Makes the cell's mapped state authoritative; from this point the
    /// configuration is immutable for the boot path.
    fn config_commit(&self, cell: &mut Cell) -> HvResult;

    /// Sets up the page-table machinery for the hypervisor's own address
    /// space, master CPU only.
    fn paging_init(&self) -> HvResult;

    /// Links a CPU's private page table to the shared hypervisor table at
    /// `virt`.
    fn create_hvpt_link(&self, pg: &mut PerCpuPaging, virt: VirtAddr) -> HvResult;

    /// Creates a mapping in a CPU's private page table. An empty `flags`
    /// pre-creates non-present entries so that later remappings in the
    /// range never allocate page-table pages.
    fn create_mapping(
        &self,
        pg: &mut PerCpuPaging,
        phys: PhysAddr,
        size: usize,
        virt: VirtAddr,
        flags: MemFlags,
        paging: PagingFlags,
    ) -> HvResult;

    /// Rewrites PTE bits over an existing mapped range of a cell's table:
    /// `(pte & !mask) | value`.
    fn set_mapping_flags(
        &self,
        cell: &mut Cell,
        virt: VirtAddr,
        size: usize,
        paging: PagingFlags,
        mask: u64,
        value: u64,
    ) -> HvResult;

    /// Translates a hypervisor virtual address to physical.
    fn hvirt_to_phys(&self, vaddr: VirtAddr) -> PhysAddr;

    fn dump_paging_stats(&self, when: &str);

    /// Fatal-path teardown, run by the master before every CPU restores
    /// and returns.
    fn shutdown(&self);
}
