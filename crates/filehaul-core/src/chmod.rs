//! Per-bit mode change-lists and ownership changes.

use serde::{Deserialize, Serialize};

/// Number of independently settable POSIX mode bits.
pub const MODE_BIT_COUNT: usize = 12;

/// Mask for each change-list slot: owner/group/other rwx, then the
/// setuid, setgid, and sticky bits.
pub const MODE_BITS: [u32; MODE_BIT_COUNT] = [
    0o400, 0o200, 0o100, // owner rwx
    0o040, 0o020, 0o010, // group rwx
    0o004, 0o002, 0o001, // other rwx
    0o4000, 0o2000, 0o1000, // setuid, setgid, sticky
];

/// Named change-list slots.
pub mod bit {
    pub const OWNER_READ: usize = 0;
    pub const OWNER_WRITE: usize = 1;
    pub const OWNER_EXEC: usize = 2;
    pub const GROUP_READ: usize = 3;
    pub const GROUP_WRITE: usize = 4;
    pub const GROUP_EXEC: usize = 5;
    pub const OTHER_READ: usize = 6;
    pub const OTHER_WRITE: usize = 7;
    pub const OTHER_EXEC: usize = 8;
    pub const SETUID: usize = 9;
    pub const SETGID: usize = 10;
    pub const STICKY: usize = 11;
}

/// What to do with one mode bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChmodAction {
    /// Turn the bit on.
    Set,
    /// Turn the bit off.
    Clear,
    /// Leave the bit as it is.
    #[default]
    Keep,
}

/// A change-list over the 12 POSIX mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModeChange {
    actions: [ChmodAction; MODE_BIT_COUNT],
}

impl ModeChange {
    /// A change-list that leaves every bit alone.
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Set the action for one slot (see [`bit`]).
    pub fn with(mut self, slot: usize, action: ChmodAction) -> Self {
        self.actions[slot] = action;
        self
    }

    /// True if no bit would be touched.
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| *a == ChmodAction::Keep)
    }

    /// Apply the change-list to a mode, leaving `Keep` bits untouched.
    pub fn apply(&self, mode: u32) -> u32 {
        let mut out = mode;
        for (slot, action) in self.actions.iter().enumerate() {
            match action {
                ChmodAction::Set => out |= MODE_BITS[slot],
                ChmodAction::Clear => out &= !MODE_BITS[slot],
                ChmodAction::Keep => {}
            }
        }
        out
    }
}

/// Optional ownership change. Unset fields leave ownership unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Ownership {
    pub fn new(uid: Option<u32>, gid: Option<u32>) -> Self {
        Self { uid, gid }
    }

    /// True if neither uid nor gid would change.
    pub fn is_noop(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}
