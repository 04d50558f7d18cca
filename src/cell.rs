use core::fmt::{Debug, Formatter, Result};

use bit_field::BitField;

use crate::config::{CellConfig, HvCellDesc};
use crate::consts::MAX_CPUS;
use crate::error::HvResult;
use crate::memory::PhysAddr;

/// Set of CPUs owned by a cell, a fixed-width bitmap from the cell
/// descriptor.
#[derive(Clone, Copy)]
pub struct CpuSet {
    bitmap: u64,
}

impl CpuSet {
    pub const fn from_bitmap(bitmap: u64) -> Self {
        Self { bitmap }
    }

    pub fn contains(&self, cpu_id: u32) -> bool {
        cpu_id < MAX_CPUS && self.bitmap.get_bit(cpu_id as usize)
    }

    pub fn len(&self) -> u32 {
        self.bitmap.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_CPUS).filter(move |&id| self.bitmap.get_bit(id as usize))
    }
}

/// Architecture-owned page-table state of a cell. The core never walks it;
/// it is created empty here and populated through the platform's mapping
/// operations.
#[derive(Debug, Default)]
pub struct CellPaging {
    pub root_table: PhysAddr,
}

/// An isolated partition. During bring-up only the root cell exists: the
/// privileged partition owning everything not yet delegated elsewhere.
pub struct Cell<'a> {
    id: u32,
    pub config: CellConfig<'a>,
    pub cpu_set: CpuSet,
    pub pg_structs: CellPaging,
}

impl<'a> Cell<'a> {
    /// Parses a cell descriptor into a live cell.
    pub fn new(desc: &'a HvCellDesc) -> HvResult<Self> {
        desc.check()?;
        let cpu_set = CpuSet::from_bitmap(desc.cpu_set);
        if cpu_set.is_empty() {
            return hv_result_err!(EINVAL, "cell owns no CPUs");
        }
        Ok(Self {
            id: desc.id,
            config: desc.config(),
            cpu_set,
            pg_structs: CellPaging::default(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Debug for Cell<'_> {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("name", &self.config.desc().name())
            .field("cpus", &self.cpu_set.len())
            .finish()
    }
}

impl Debug for CpuSet {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
