use core::fmt::{Debug, Formatter, Result};
use core::mem::size_of;

use crate::consts::{INVALID_CELL_ID, PAGE_SIZE, PER_CPU_SIZE};
use crate::header::HvHeader;
use crate::memory::VirtAddr;

#[repr(C, align(4096))]
struct RootTablePage([u8; PAGE_SIZE]);

/// Private paging structures linking one CPU's local page table into the
/// shared hypervisor table. Populated during per-CPU init, then handed to
/// the platform's paging operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerCpuPaging {
    /// Links into the shared hypervisor root table rather than standing
    /// alone.
    pub hv_paging: bool,
    /// Virtual address of this CPU's private root table page.
    pub root_table: VirtAddr,
}

/// One CPU's slot in the per-CPU array that follows the core image.
///
/// The slot memory is laid out by the image builder (zeroed); the owning CPU
/// is the only writer during bring-up. Stack space occupies the rest of the
/// slot.
#[repr(C, align(4096))]
pub struct PerCpu {
    /// This CPU's private root page table, linked into the shared
    /// hypervisor table during per-CPU init.
    root_table_page: RootTablePage,
    pub cpu_id: u32,
    cell_id: u32,
    pub pg_structs: PerCpuPaging,
    // Stack will be placed here.
}

const _: () = assert!(size_of::<PerCpu>() <= PER_CPU_SIZE);

impl PerCpu {
    /// Returns the slot of `cpu_id` within the image described by `header`.
    ///
    /// # Safety
    ///
    /// `cpu_id` must be below `header.max_cpus` and the caller must ensure
    /// exclusive access to the slot (one CPU, one slot).
    pub unsafe fn from_id_mut<'a>(header: &HvHeader, cpu_id: u32) -> &'a mut Self {
        let array_base = header as *const _ as usize + header.core_size;
        let vaddr = array_base + cpu_id as usize * header.percpu_size;
        &mut *(vaddr as *mut Self)
    }

    /// Records the CPU's identity in its slot; first thing done on entry.
    /// Slots come zeroed from the image builder, so the cell membership
    /// must be made explicitly invalid until the CPU attaches.
    pub fn prepare(&mut self, cpu_id: u32) {
        self.cpu_id = cpu_id;
        self.cell_id = INVALID_CELL_ID;
        self.pg_structs = PerCpuPaging::default();
    }

    pub fn id(&self) -> u32 {
        self.cpu_id
    }

    pub fn root_table_addr(&self) -> VirtAddr {
        self.root_table_page.0.as_ptr() as VirtAddr
    }

    pub fn attach_cell(&mut self, cell_id: u32) {
        self.cell_id = cell_id;
    }

    pub fn cell_id(&self) -> Option<u32> {
        if self.cell_id == INVALID_CELL_ID {
            None
        } else {
            Some(self.cell_id)
        }
    }
}

impl Debug for PerCpu {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("PerCpu")
            .field("cpu_id", &self.cpu_id)
            .field("cell_id", &self.cell_id)
            .field("pg_structs", &self.pg_structs)
            .finish()
    }
}
