//! Reach and release modes.
//!
//! A reach request carries three orthogonal choices: the access wanted, what
//! to do on a cache miss, and whether the read is speculative. A release
//! carries what happened to the content and a hint about where the slot
//! belongs in the eviction order.

use std::fmt;

/// Access wanted from a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Shared read access; any number of readers may hold the slot.
    Read,
    /// Exclusive access to a block the caller overwrites entirely.
    ///
    /// A miss skips the backend read.
    Write,
    /// Exclusive read-modify-write access.
    ReadWrite {
        /// When readers hold the slot, take a private copy instead of
        /// waiting for them to leave.
        copy_on_write: bool,
    },
    /// Exclusive access to a slot bound to no address yet.
    Alloc,
}

impl Access {
    /// Returns true if this access can be shared with other readers.
    #[inline]
    pub fn is_shared(self) -> bool {
        matches!(self, Access::Read)
    }

    /// Returns true if a miss must fill the buffer from the store.
    #[inline]
    pub fn needs_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite { .. })
    }

    /// Returns true if replication may replace waiting for readers.
    #[inline]
    pub fn allows_copy(self) -> bool {
        matches!(self, Access::ReadWrite { copy_on_write: true })
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
            Access::ReadWrite { copy_on_write: true } => write!(f, "read-write-copy"),
            Access::ReadWrite { copy_on_write: false } => write!(f, "read-write"),
            Access::Alloc => write!(f, "alloc"),
        }
    }
}

/// What a reach does when the block is not cached or cannot be granted now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissPolicy {
    /// Load the block on a miss and wait behind conflicting holders.
    Load,
    /// Return "not found" on a miss or a conflicting holder.
    IfHit,
}

/// Who issued a reach; internal requests differ in accounting and in how
/// the slot is put back afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Purpose {
    Caller,
    Preflush,
    Checkpoint,
}

/// A request to reach a block.
///
/// # Example
///
/// ```rust
/// use strata_storage::buffer::{Access, MissPolicy, ReachRequest};
///
/// let req = ReachRequest::read_write_copy().if_hit();
/// assert_eq!(req.access, Access::ReadWrite { copy_on_write: true });
/// assert_eq!(req.miss, MissPolicy::IfHit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReachRequest {
    /// Access wanted.
    pub access: Access,
    /// Behaviour on a miss or conflict.
    pub miss: MissPolicy,
    /// The read is speculative read-ahead.
    pub read_ahead: bool,
    pub(crate) purpose: Purpose,
}

impl ReachRequest {
    const fn new(access: Access) -> Self {
        Self {
            access,
            miss: MissPolicy::Load,
            read_ahead: false,
            purpose: Purpose::Caller,
        }
    }

    /// Shared read.
    pub const fn read() -> Self {
        Self::new(Access::Read)
    }

    /// Shared read accounted as read-ahead.
    pub const fn prefetch() -> Self {
        Self {
            read_ahead: true,
            ..Self::new(Access::Read)
        }
    }

    /// Exclusive write without reading the old content.
    pub const fn write() -> Self {
        Self::new(Access::Write)
    }

    /// Exclusive read-modify-write; waits for readers to leave.
    pub const fn read_write() -> Self {
        Self::new(Access::ReadWrite {
            copy_on_write: false,
        })
    }

    /// Exclusive read-modify-write; replicates the slot if readers hold it.
    pub const fn read_write_copy() -> Self {
        Self::new(Access::ReadWrite {
            copy_on_write: true,
        })
    }

    /// Exclusive slot bound to no address.
    pub const fn alloc() -> Self {
        Self::new(Access::Alloc)
    }

    /// Shared hold taken by a preflush writer: never loads, never waits.
    pub const fn preflush() -> Self {
        Self {
            miss: MissPolicy::IfHit,
            purpose: Purpose::Preflush,
            ..Self::new(Access::Read)
        }
    }

    /// Shared hold taken by the checkpoint flusher: never loads, but waits
    /// for exclusive holders.
    pub(crate) const fn checkpoint() -> Self {
        Self {
            miss: MissPolicy::IfHit,
            purpose: Purpose::Checkpoint,
            ..Self::new(Access::Read)
        }
    }

    /// Returns this request with the opportunistic miss policy.
    #[must_use]
    pub const fn if_hit(mut self) -> Self {
        self.miss = MissPolicy::IfHit;
        self
    }

    /// Returns true if a conflicting holder makes this request wait.
    #[inline]
    pub(crate) fn waits_on_conflict(&self) -> bool {
        self.miss == MissPolicy::Load || self.purpose == Purpose::Checkpoint
    }

    /// Returns true if a miss loads the block.
    #[inline]
    pub(crate) fn loads_on_miss(&self) -> bool {
        self.miss == MissPolicy::Load
    }
}

/// What happened to the slot content while it was held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Content unchanged by this holder.
    Clean,
    /// Content modified; write back later.
    Dirty,
    /// Content modified; write back before the release returns.
    Flush,
    /// Content is garbage; unbind the slot without writing it.
    Discard,
}

/// Where a released slot goes in its eviction partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Ordinary use; most-recently-used end of the hot list.
    Normal,
    /// Caller is done with the block for the foreseeable future; cold list.
    LastUse,
    /// Freshly written by a preflush writer; straight to the clean victims.
    Preflush,
}

/// How a holder gives a slot back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseMode {
    /// Content outcome.
    pub outcome: Outcome,
    /// Eviction placement hint.
    pub priority: Priority,
}

impl ReleaseMode {
    const fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            priority: Priority::Normal,
        }
    }

    /// Content unchanged.
    pub const fn clean() -> Self {
        Self::new(Outcome::Clean)
    }

    /// Content modified.
    pub const fn dirty() -> Self {
        Self::new(Outcome::Dirty)
    }

    /// Content modified and written immediately.
    pub const fn flush() -> Self {
        Self::new(Outcome::Flush)
    }

    /// Content discarded.
    pub const fn discard() -> Self {
        Self::new(Outcome::Discard)
    }

    /// Release after a preflush write.
    pub const fn preflush() -> Self {
        Self {
            outcome: Outcome::Clean,
            priority: Priority::Preflush,
        }
    }

    /// Returns this mode with the last-use hint.
    #[must_use]
    pub const fn last_use(mut self) -> Self {
        self.priority = Priority::LastUse;
        self
    }
}
