use crate::memory::VirtAddr;

pub const PAGE_SIZE: usize = 0x1000;

/// Fixed virtual base the hypervisor core is linked at. Every per-CPU page
/// table gets a link to the shared hypervisor table at this address.
pub const HV_BASE: VirtAddr = 0xffff_ff00_0000_0000;

/// Size reserved for one per-CPU data slot, stack included. The slots form a
/// contiguous array right after the core image.
pub const PER_CPU_SIZE: usize = 0x2000;

/// Scratch region for short-lived runtime remappings. Its page-table entries
/// are pre-created (non-present) during per-CPU init so remapping never has
/// to allocate page-table pages afterwards.
pub const TEMPORARY_MAPPING_BASE: VirtAddr = 0x0000_0080_0000_0000;
pub const NUM_TEMPORARY_PAGES: usize = 16;

/// Fixed per-CPU-local virtual address of the owning CPU's data structure.
pub const LOCAL_CPU_BASE: VirtAddr = TEMPORARY_MAPPING_BASE + NUM_TEMPORARY_PAGES * PAGE_SIZE;

/// Protected read-only buffer used by the page-table protection hardening
/// mode: linked read-only into every per-CPU table, write-protected in the
/// root cell's table during late init.
pub const PGP_RO_BUF_VIRT: VirtAddr = 0x0000_00c0_0000_0000;
pub const PGP_RO_BUF_SIZE: usize = 0x20_0000;

pub const INVALID_CPU_ID: u32 = u32::MAX;
pub const INVALID_CELL_ID: u32 = u32::MAX;

/// Width of the cell CPU-set bitmap.
pub const MAX_CPUS: u32 = 64;
