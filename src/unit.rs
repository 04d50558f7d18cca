use crate::error::HvResult;

/// A pluggable subsystem with a one-time initializer, run by the master CPU
/// during late setup. The order of the unit list is the initialization
/// order contract; the first failure aborts the remaining units.
pub trait Unit: Sync {
    fn name(&self) -> &str;

    fn init(&self) -> HvResult;
}
