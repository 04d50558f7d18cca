use crate::consts::PAGE_SIZE;

pub type PhysAddr = usize;
pub type VirtAddr = usize;

bitflags::bitflags! {
    /// Access flags of a guest memory region, binary-stable part of the
    /// configuration format.
    pub struct MemFlags: u64 {
        const READ          = 1 << 0;
        const WRITE         = 1 << 1;
        const EXECUTE       = 1 << 2;
        const DMA           = 1 << 3;
        const IO            = 1 << 4;
        /// Finer-grained than the mapping unit; must be trapped and
        /// emulated instead of mapped directly.
        const SUBPAGE       = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Modifiers for a single page-table construction request.
    pub struct PagingFlags: u32 {
        /// Skip TLB/cache coherency work; the table is not live yet.
        const NON_COHERENT  = 1 << 0;
        /// Use the largest mapping unit available.
        const HUGE          = 1 << 1;
        /// Force terminal-level entries.
        const NO_HUGE       = 1 << 2;
    }
}

/// PTE bit manipulated by the write-protection hardening pass, as a
/// (mask, value) pair for `Platform::set_mapping_flags`.
pub const PTE_WRITE_MASK: u64 = 1 << 1;
pub const PTE_WRITE_PROTECTED: u64 = 0;

pub const fn is_page_aligned(addr: u64) -> bool {
    addr % PAGE_SIZE as u64 == 0
}
