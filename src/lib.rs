//! Bring-up core of a bare-metal partitioning hypervisor.
//!
//! This crate implements the architecture-independent boot choreography that
//! takes an arbitrary number of physical CPUs from "just trapped into
//! hypervisor mode" to "running the root cell under enforced memory
//! isolation": the rendezvous protocol, the master-only early and late
//! initialization stages, and the parallel per-CPU setup in between.
//!
//! Architecture specifics (CPU-mode switches, page-table algebra, the final
//! VMM activation) are consumed through the [`platform::Platform`] trait and
//! provided by the surrounding image.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(test, allow(dead_code))]

#[macro_use]
extern crate log;

#[macro_use]
pub mod logging;
#[macro_use]
pub mod error;

pub mod cell;
pub mod config;
pub mod consts;
pub mod header;
pub mod memory;
pub mod percpu;
pub mod platform;
pub mod setup;
pub mod sync;
pub mod unit;

pub use cell::Cell;
pub use config::{HvCellDesc, HvMemoryRegion, HvSystemConfig};
pub use error::{HvError, HvResult};
pub use header::{HvConsole, HvHeader};
pub use percpu::PerCpu;
pub use platform::Platform;
pub use setup::{cpu_entry, BootContext};
pub use unit::Unit;
