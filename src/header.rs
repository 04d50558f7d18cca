use core::fmt::{Debug, Formatter, Result};

use crate::config::HvSystemConfig;

pub const HEADER_SIGNATURE: [u8; 8] = *b"HVCOREIM";

bitflags::bitflags! {
    pub struct HeaderFlags: u32 {
        /// The debug console is virtualized for the root cell; its backing
        /// page stays readable through the defensive remap.
        const VIRTUAL_DEBUG_CONSOLE = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct ConsoleFlags: u16 {
        /// The debug console is accessed through MMIO and must be linked
        /// into every per-CPU page table.
        const ACCESS_MMIO = 1 << 0;
    }
}

/// Debug console description, filled in by the loader.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HvConsole {
    pub address: u64,
    pub size: u32,
    pub con_type: u16,
    pub flags: ConsoleFlags,
}

/// Hypervisor description header, placed at the very start of the core
/// image. Parsed by the host loader before calling in, so the layout is
/// binary-stable.
///
/// The header is also the anchor of the whole image layout: the per-CPU
/// array starts at `base + core_size` and the system configuration right
/// after the last per-CPU slot. Both addresses derive purely from header
/// fields and never move.
#[repr(C)]
pub struct HvHeader {
    pub signature: [u8; 8],
    pub core_size: usize,
    pub percpu_size: usize,
    /// Entry point, as an offset into the image.
    pub entry: usize,
    /// Console page, as an offset into the image.
    pub console_page: usize,
    pub max_cpus: u32,
    /// Number of CPUs the loader will actually send through the entry
    /// point. The rendezvous barriers release at exactly this count.
    pub online_cpus: u32,
    pub flags: HeaderFlags,
    _padding: u32,
    pub debug_console: HvConsole,
}

impl HvHeader {
    /// Builds a header value the way an image builder would; `entry` and
    /// `console_page` start at offset zero and are patched by the linker
    /// stage of the real image.
    pub fn new(
        core_size: usize,
        percpu_size: usize,
        max_cpus: u32,
        online_cpus: u32,
        flags: HeaderFlags,
        console_page: usize,
        debug_console: HvConsole,
    ) -> Self {
        Self {
            signature: HEADER_SIGNATURE,
            core_size,
            percpu_size,
            entry: 0,
            console_page,
            max_cpus,
            online_cpus,
            flags,
            _padding: 0,
            debug_console,
        }
    }

    /// Interprets `ptr` as the image base.
    ///
    /// # Safety
    ///
    /// The caller must guarantee a loaded image with a valid header at
    /// `ptr`, immutable for `'a`.
    pub unsafe fn from_ptr<'a>(ptr: *const Self) -> &'a Self {
        &*ptr
    }

    pub fn has_virtual_console(&self) -> bool {
        self.flags.contains(HeaderFlags::VIRTUAL_DEBUG_CONSOLE)
    }

    /// The system configuration sits at a fixed offset past the core image
    /// and all per-CPU data blocks.
    ///
    /// # Safety
    ///
    /// Valid only for a properly laid out image (see [`Self::from_ptr`]).
    pub unsafe fn system_config<'a>(&'a self) -> &'a HvSystemConfig {
        let base = self as *const _ as usize;
        let config_ptr = base + self.core_size + self.percpu_size * self.max_cpus as usize;
        &*(config_ptr as *const HvSystemConfig)
    }
}

impl Debug for HvHeader {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("HvHeader")
            .field("signature", &core::str::from_utf8(&self.signature))
            .field("core_size", &self.core_size)
            .field("percpu_size", &self.percpu_size)
            .field("entry", &self.entry)
            .field("console_page", &self.console_page)
            .field("max_cpus", &self.max_cpus)
            .field("online_cpus", &self.online_cpus)
            .field("flags", &self.flags)
            .field("debug_console", &self.debug_console)
            .finish()
    }
}
