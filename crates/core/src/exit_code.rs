//! Process exit-code bitmask.
//!
//! Independent stage failures combine by addition so operators can tell
//! compound failures apart from the code alone (e.g. `17` = operation +
//! cleanup).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExitFlags(u8);

impl ExitFlags {
    pub const SUCCESS: ExitFlags = ExitFlags(0);
    /// Backup/restore script or pre-flight validation failed.
    pub const OPERATION: ExitFlags = ExitFlags(1);
    /// A lock script failed.
    pub const LOCK: ExitFlags = ExitFlags(4);
    /// An unlock script failed.
    pub const UNLOCK: ExitFlags = ExitFlags(8);
    /// Removing a remote scratch directory failed.
    pub const CLEANUP: ExitFlags = ExitFlags(16);

    pub fn code(self) -> i32 {
        i32::from(self.0)
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ExitFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for ExitFlags {
    type Output = ExitFlags;

    fn bitor(self, rhs: ExitFlags) -> ExitFlags {
        ExitFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExitFlags {
    fn bitor_assign(&mut self, rhs: ExitFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ExitFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
