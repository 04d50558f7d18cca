use core::fmt::{Debug, Formatter, Result};

use numeric_enum_macro::numeric_enum;

numeric_enum! {
    #[repr(i32)]
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub enum HvErrorNum {
        EPERM = 1,
        ENOENT = 2,
        EIO = 5,
        ENOMEM = 12,
        EFAULT = 14,
        EBUSY = 16,
        EEXIST = 17,
        ENODEV = 19,
        EINVAL = 22,
        ERANGE = 34,
        ENOSYS = 38,
    }
}

/// A boot-time error: an errno-style code plus the location that raised it.
///
/// Errors never carry heap data; the boot path has no allocator. The numeric
/// code is what crosses the entry boundary back to the caller, negated in
/// the Unix convention.
pub struct HvError {
    num: HvErrorNum,
    loc_file: &'static str,
    loc_line: u32,
    msg: Option<&'static str>,
}

pub type HvResult<T = ()> = core::result::Result<T, HvError>;

impl HvError {
    pub fn new(
        num: HvErrorNum,
        loc_file: &'static str,
        loc_line: u32,
        msg: Option<&'static str>,
    ) -> Self {
        Self {
            num,
            loc_file,
            loc_line,
            msg,
        }
    }

    pub fn num(&self) -> HvErrorNum {
        self.num
    }

    pub fn code(&self) -> i32 {
        -(self.num as i32)
    }
}

impl Debug for HvError {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(
            f,
            "[{}:{}] {:?}({})",
            self.loc_file,
            self.loc_line,
            self.num,
            self.code()
        )?;
        if let Some(msg) = self.msg {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

macro_rules! hv_err {
    ($num: ident) => {
        $crate::error::HvError::new($crate::error::HvErrorNum::$num, file!(), line!(), None)
    };
    ($num: ident, $msg: expr) => {
        $crate::error::HvError::new($crate::error::HvErrorNum::$num, file!(), line!(), Some($msg))
    };
}

macro_rules! hv_result_err {
    ($num: ident) => {
        Err(hv_err!($num))
    };
    ($num: ident, $msg: expr) => {
        Err(hv_err!($num, $msg))
    };
}
