//! Buffered-sample store and per-key flag register.
//!
//! The migration workers never lock anything themselves: every read-modify-write of a
//! key's samples or flags goes through one [`GraphItemStore`] call, which must be atomic
//! with respect to other calls on the same key.

use crate::error::{MigrateError, Result};
use crate::model::GraphItem;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Default number of independently locked shards in [`MemoryGraphItems`].
pub const DEFAULT_SHARDS: usize = 64;

/// Per-key status bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GraphFlags(u32);

impl GraphFlags {
    /// No bits set.
    pub const NONE: GraphFlags = GraphFlags(0);
    /// The local RRD file is absent and must be fetched from the previous owner.
    pub const MISSING: GraphFlags = GraphFlags(1 << 0);
    /// The last migration operation on the key failed.
    pub const ERROR: GraphFlags = GraphFlags(1 << 1);
    /// A Send is in progress.
    pub const SENDING: GraphFlags = GraphFlags(1 << 2);
    /// A Fetch is in progress.
    pub const FETCHING: GraphFlags = GraphFlags(1 << 3);

    /// Both in-progress bits.
    pub const IN_FLIGHT: GraphFlags = GraphFlags(Self::SENDING.0 | Self::FETCHING.0);

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds flags from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        GraphFlags(bits)
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: GraphFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub const fn intersects(self, other: GraphFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Copy with `set` added and `clear` removed.
    #[must_use]
    pub const fn apply(self, set: GraphFlags, clear: GraphFlags) -> Self {
        GraphFlags((self.0 | set.0) & !clear.0)
    }
}

impl BitOr for GraphFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        GraphFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for GraphFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for GraphFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        GraphFlags(self.0 & rhs.0)
    }
}

impl Not for GraphFlags {
    type Output = Self;
    fn not(self) -> Self {
        GraphFlags(!self.0)
    }
}

impl fmt::Debug for GraphFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (GraphFlags::MISSING, "MISSING"),
            (GraphFlags::ERROR, "ERROR"),
            (GraphFlags::SENDING, "SENDING"),
            (GraphFlags::FETCHING, "FETCHING"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "GraphFlags(NONE)")
        } else {
            write!(f, "GraphFlags({})", set.join(" | "))
        }
    }
}

/// Local store of pending samples keyed by cache key.
///
/// Implementations synchronize internally; each method is atomic for its key.
pub trait GraphItemStore: Send + Sync {
    /// Current flags of `key`, or [`MigrateError::UnknownKey`].
    fn get_flag(&self, key: &str) -> Result<GraphFlags>;

    /// Registers `key` with `flags` if it is not known yet.
    fn ensure_key(&self, key: &str, flags: GraphFlags);

    /// Overwrites the flags of `key`.
    fn set_flag(&self, key: &str, flags: GraphFlags) -> Result<()>;

    /// Sets `op` on `key` only if no Send or Fetch is in flight.
    ///
    /// Returns `Ok(false)` without mutating anything when the key is busy.
    fn try_mark(&self, key: &str, op: GraphFlags) -> Result<bool>;

    /// Atomically adds `set` and removes `clear`. Unknown keys are ignored.
    fn update_flag(&self, key: &str, set: GraphFlags, clear: GraphFlags);

    /// Removes and returns every buffered sample of `key`.
    fn pop_all(&self, key: &str) -> Vec<GraphItem>;

    /// Puts samples back at the head of `key`'s queue, creating the key if needed.
    fn push_all(&self, key: &str, items: Vec<GraphItem>);

    /// Copy of the buffered samples of `key` without draining them.
    fn snapshot(&self, key: &str) -> Vec<GraphItem>;

    /// Every key currently known to the store.
    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
struct SeriesEntry {
    flags: GraphFlags,
    items: VecDeque<GraphItem>,
}

/// Sharded in-memory [`GraphItemStore`].
pub struct MemoryGraphItems {
    shards: Vec<Mutex<HashMap<String, SeriesEntry>>>,
}

impl Default for MemoryGraphItems {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl MemoryGraphItems {
    /// Creates an empty store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, SeriesEntry>> {
        let idx = crc32fast::hash(key.as_bytes()) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Appends one sample to the tail of `key`'s queue.
    pub fn push(&self, key: &str, item: GraphItem) {
        self.shard(key)
            .lock()
            .entry(key.to_string())
            .or_default()
            .items
            .push_back(item);
    }

    /// Number of samples buffered for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.shard(key)
            .lock()
            .get(key)
            .map_or(0, |entry| entry.items.len())
    }

    /// True if no key holds any buffered sample.
    pub fn is_empty(&self) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.lock().values().all(|entry| entry.items.is_empty()))
    }
}

impl GraphItemStore for MemoryGraphItems {
    fn get_flag(&self, key: &str) -> Result<GraphFlags> {
        self.shard(key)
            .lock()
            .get(key)
            .map(|entry| entry.flags)
            .ok_or_else(|| MigrateError::UnknownKey(key.to_string()))
    }

    fn ensure_key(&self, key: &str, flags: GraphFlags) {
        self.shard(key)
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| SeriesEntry {
                flags,
                items: VecDeque::new(),
            });
    }

    fn set_flag(&self, key: &str, flags: GraphFlags) -> Result<()> {
        let mut shard = self.shard(key).lock();
        let entry = shard
            .get_mut(key)
            .ok_or_else(|| MigrateError::UnknownKey(key.to_string()))?;
        entry.flags = flags;
        Ok(())
    }

    fn try_mark(&self, key: &str, op: GraphFlags) -> Result<bool> {
        let mut shard = self.shard(key).lock();
        let entry = shard
            .get_mut(key)
            .ok_or_else(|| MigrateError::UnknownKey(key.to_string()))?;
        if entry.flags.intersects(GraphFlags::IN_FLIGHT) {
            return Ok(false);
        }
        entry.flags |= op;
        Ok(true)
    }

    fn update_flag(&self, key: &str, set: GraphFlags, clear: GraphFlags) {
        if let Some(entry) = self.shard(key).lock().get_mut(key) {
            entry.flags = entry.flags.apply(set, clear);
        }
    }

    fn pop_all(&self, key: &str) -> Vec<GraphItem> {
        self.shard(key)
            .lock()
            .get_mut(key)
            .map(|entry| entry.items.drain(..).collect())
            .unwrap_or_default()
    }

    fn push_all(&self, key: &str, items: Vec<GraphItem>) {
        if items.is_empty() {
            return;
        }
        let mut shard = self.shard(key).lock();
        let entry = shard.entry(key.to_string()).or_default();
        for item in items.into_iter().rev() {
            entry.items.push_front(item);
        }
    }

    fn snapshot(&self, key: &str) -> Vec<GraphItem> {
        self.shard(key)
            .lock()
            .get(key)
            .map(|entry| entry.items.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<String> {
        self.shards
            .iter()
            .flat_map(|shard| shard.lock().keys().cloned().collect::<Vec<_>>())
            .collect()
    }
}

/// Scoped owner of an in-flight operation bit.
///
/// Dropping the guard clears the operation bit and applies whatever outcome bits were
/// recorded, so every early return releases the key.
pub struct FlagGuard<'a> {
    store: &'a dyn GraphItemStore,
    key: &'a str,
    op: GraphFlags,
    set_on_exit: GraphFlags,
    clear_on_exit: GraphFlags,
}

impl<'a> FlagGuard<'a> {
    /// Marks `op` on `key`, refusing with [`MigrateError::KeyBusy`] if another Send or
    /// Fetch holds the key.
    pub fn acquire(store: &'a dyn GraphItemStore, key: &'a str, op: GraphFlags) -> Result<Self> {
        if !store.try_mark(key, op)? {
            return Err(MigrateError::KeyBusy(key.to_string()));
        }
        Ok(Self {
            store,
            key,
            op,
            set_on_exit: GraphFlags::NONE,
            clear_on_exit: GraphFlags::NONE,
        })
    }

    /// Records a failure: `ERROR` is set on release.
    pub fn fail(&mut self) {
        self.set_on_exit |= GraphFlags::ERROR;
    }

    /// Clears `flags` on release in addition to the operation bit.
    pub fn clear_on_release(&mut self, flags: GraphFlags) {
        self.clear_on_exit |= flags;
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.store
            .update_flag(self.key, self.set_on_exit, self.clear_on_exit | self.op);
    }
}
