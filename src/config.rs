use core::fmt::{Debug, Formatter, Result};
use core::{mem::size_of, slice};

use crate::error::HvResult;
use crate::memory::{is_page_aligned, MemFlags};

const CONFIG_SIGNATURE: [u8; 6] = *b"HVCSYS";
const CONFIG_REVISION: u16 = 1;

const CELL_SIGNATURE: [u8; 6] = *b"HVCELL";
const CELL_NAME_MAXLEN: usize = 31;

/// Descriptor of one cell, embedded in the system configuration.
///
/// @note Keep the builder's serialization in sync with this structure.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct HvCellDesc {
    signature: [u8; 6],
    revision: u16,
    name: [u8; CELL_NAME_MAXLEN + 1],
    pub id: u32,
    /// Bitmap of the CPUs this cell owns.
    pub cpu_set: u64,
    num_memory_regions: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct HvMemoryRegion {
    pub phys_start: u64,
    pub virt_start: u64,
    pub size: u64,
    pub flags: MemFlags,
}

impl HvMemoryRegion {
    /// Sub-page regions cannot be expressed by the page-table mapping unit
    /// and go through trap-and-emulate registration instead.
    pub fn is_subpage(&self) -> bool {
        let flags = self.flags;
        flags.contains(MemFlags::SUBPAGE)
            || !is_page_aligned(self.virt_start)
            || !is_page_aligned(self.size)
    }
}

/// General descriptor of the system, placed at a fixed offset past the core
/// image and all per-CPU data blocks. Written once by the external builder,
/// read-only in here.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct HvSystemConfig {
    pub signature: [u8; 6],
    pub revision: u16,
    pub flags: u32,
    _padding: u32,
    /// Location of the hypervisor core in physical memory.
    pub hypervisor_memory: HvMemoryRegion,
    pub root_cell: HvCellDesc,
    // The root cell's HvMemoryRegion array is placed here.
}

pub struct CellConfig<'a> {
    desc: &'a HvCellDesc,
}

impl HvCellDesc {
    /// Builds a descriptor value the way the external config builder would.
    pub fn new(name: &str, id: u32, cpu_set: u64, num_memory_regions: u32) -> Self {
        let mut name_buf = [0u8; CELL_NAME_MAXLEN + 1];
        let len = name.len().min(CELL_NAME_MAXLEN);
        name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            signature: CELL_SIGNATURE,
            revision: CONFIG_REVISION,
            name: name_buf,
            id,
            cpu_set,
            num_memory_regions,
        }
    }

    pub const fn config(&self) -> CellConfig {
        CellConfig::from(self)
    }

    pub const fn config_size(&self) -> usize {
        self.num_memory_regions as usize * size_of::<HvMemoryRegion>()
    }

    pub fn check(&self) -> HvResult {
        if self.signature != CELL_SIGNATURE {
            return hv_result_err!(EINVAL, "HvCellDesc signature not matched!");
        }
        if self.revision != CONFIG_REVISION {
            return hv_result_err!(EINVAL, "HvCellDesc revision not matched!");
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        let mut len = 0;
        while len < self.name.len() && self.name[len] != 0 {
            len += 1;
        }
        core::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }
}

impl HvSystemConfig {
    pub fn new(flags: u32, hypervisor_memory: HvMemoryRegion, root_cell: HvCellDesc) -> Self {
        Self {
            signature: CONFIG_SIGNATURE,
            revision: CONFIG_REVISION,
            flags,
            _padding: 0,
            hypervisor_memory,
            root_cell,
        }
    }

    pub const fn size(&self) -> usize {
        size_of::<Self>() + self.root_cell.config_size()
    }

    pub fn check(&self) -> HvResult {
        if self.signature != CONFIG_SIGNATURE {
            return hv_result_err!(EINVAL, "HvSystemConfig signature not matched!");
        }
        if self.revision != CONFIG_REVISION {
            return hv_result_err!(EINVAL, "HvSystemConfig revision not matched!");
        }
        self.root_cell.check()
    }
}

impl<'a> CellConfig<'a> {
    const fn from(desc: &'a HvCellDesc) -> Self {
        Self { desc }
    }

    fn config_ptr<T>(&self) -> *const T {
        unsafe { (self.desc as *const HvCellDesc).add(1) as _ }
    }

    pub const fn size(&self) -> usize {
        self.desc.config_size()
    }

    pub fn desc(&self) -> &'a HvCellDesc {
        self.desc
    }

    pub fn mem_regions(&self) -> &'a [HvMemoryRegion] {
        // XXX: data may unaligned, which cause panic on debug mode. Same below.
        // See: https://doc.rust-lang.org/src/core/slice/mod.rs.html#6435-6443
        unsafe {
            let ptr = self.config_ptr() as _;
            slice::from_raw_parts(ptr, self.desc.num_memory_regions as usize)
        }
    }
}

impl Clone for CellConfig<'_> {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for CellConfig<'_> {}

impl Debug for CellConfig<'_> {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("CellConfig")
            .field("name", &self.desc.name())
            .field("size", &self.size())
            .field("mem_regions", &self.mem_regions())
            .finish()
    }
}
