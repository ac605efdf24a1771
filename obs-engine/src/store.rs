//! # OrderedStore
//!
//! Abstract sorted-heap collection backing one side of a
//! [`crate::aggregator::LatencyAggregator`]'s dual heap. Two
//! implementations are provided behind one trait so the aggregator can be
//! generic over storage without a base-class hierarchy.
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: `OrderedStore` defines the capability surface;
//!    callers never downcast to a concrete type — mirrors
//!    `hkv-engine::engine::KVEngine`.
//! 2. **Single-Writer Discipline**: Every store is owned exclusively by
//!    one aggregator's consumer task. Peeks return copies, never borrowed
//!    interior pointers, so cross-task readers of min/median proceed
//!    against the aggregator's published atomic snapshot, never the store
//!    directly.

use obs_common::ObsResult;

/// One side of a dual heap: either the low (max-heap) or high (min-heap)
/// half of the running median structure.
pub trait OrderedStore: Send {
    /// Inserts `v`, preserving the heap property.
    fn push(&mut self, v: i64) -> ObsResult<()>;

    /// Removes and returns the extremum (min for a min-heap store, max for
    /// a max-heap store). The caller never calls this on an empty store.
    fn pop(&mut self) -> ObsResult<i64>;

    /// Returns the extremum without removing it.
    fn peek(&self) -> Option<i64>;

    /// Current element count.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every element, resetting the store to empty.
    fn truncate(&mut self) -> ObsResult<()>;

    /// Approximate memory (or disk) footprint in bytes, for diagnostics.
    fn footprint(&self) -> usize;
}

/// Orientation of a [`MemoryHeap`]: which side of the running median it
/// represents. The underlying `Vec` storage and sift algorithms are
/// identical; only the comparison direction differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Max-heap: `pop`/`peek` return the largest element. Used for
    /// `low_heap`.
    Max,
    /// Min-heap: `pop`/`peek` return the smallest element. Used for
    /// `high_heap`.
    Min,
}

/// In-memory binary heap over `i64`, growable array with manual
/// sift-up/sift-down, amortized O(log n) push/pop.
///
/// Grounded on `hkv-engine::memory::MemoryEngine`'s index-based intrusive
/// structure style, simplified here since a binary heap needs no
/// prev/next pointers — array index arithmetic alone encodes the tree.
#[derive(Debug)]
pub struct MemoryHeap {
    polarity: Polarity,
    data: Vec<i64>,
}

impl MemoryHeap {
    pub fn new(polarity: Polarity) -> Self {
        MemoryHeap {
            polarity,
            data: Vec::new(),
        }
    }

    /// Returns true if `a` should sit above `b` in the heap (closer to the
    /// root), i.e. `a` is a better candidate for the tracked extremum.
    fn above(&self, a: i64, b: i64) -> bool {
        match self.polarity {
            Polarity::Max => a > b,
            Polarity::Min => a < b,
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.above(self.data[i], self.data[parent]) {
                self.data.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.data.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut best = i;

            if left < len && self.above(self.data[left], self.data[best]) {
                best = left;
            }
            if right < len && self.above(self.data[right], self.data[best]) {
                best = right;
            }
            if best == i {
                break;
            }
            self.data.swap(i, best);
            i = best;
        }
    }
}

impl OrderedStore for MemoryHeap {
    fn push(&mut self, v: i64) -> ObsResult<()> {
        self.data.push(v);
        self.sift_up(self.data.len() - 1);
        Ok(())
    }

    fn pop(&mut self) -> ObsResult<i64> {
        let top = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        Ok(top)
    }

    fn peek(&self) -> Option<i64> {
        self.data.first().copied()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn truncate(&mut self) -> ObsResult<()> {
        self.data.clear();
        Ok(())
    }

    fn footprint(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<i64>()
    }
}

/// Disk-backed ordered store, keyed into a single shared RocksDB
/// instance. Grounded on `diskheap.go`'s key scheme (`{heap}@len` for
/// the element count, `{heap}@id={i}` for each element) and its
/// array-of-index shape: unlike the Go original (which hands a raw
/// index-addressable array to `container/heap` and lets that package
/// run the sift algorithm), `DiskHeap` runs its own sift-up/down over
/// disk reads, since Rust's standard heap has no such "bring your own
/// storage" extension point.
///
/// The Go source flags its own `Swap` as non-atomic ("目前的swap是非原子的，
/// 可能存在数据不一致" — swap is currently non-atomic, may be
/// inconsistent); this port keeps that property and relies on the same
/// mitigation the rest of the engine already requires: exactly one
/// consumer task ever touches a given `DiskHeap`.
#[cfg(feature = "disk-store")]
pub struct DiskHeap {
    polarity: Polarity,
    heap_name: String,
    db: std::sync::Arc<rocksdb::DB>,
    /// Cached length; re-synced from disk on open, then maintained
    /// locally, mirroring `diskHeap.length`'s in-memory cache.
    len: usize,
}

#[cfg(feature = "disk-store")]
impl DiskHeap {
    const DEFAULT_DB_PATH: &'static str = "./data/latency-heaps";

    fn shared_db() -> obs_common::ObsResult<std::sync::Arc<rocksdb::DB>> {
        static DB: std::sync::OnceLock<
            Result<std::sync::Arc<rocksdb::DB>, String>,
        > = std::sync::OnceLock::new();

        DB.get_or_init(|| {
            rocksdb::DB::open_default(Self::DEFAULT_DB_PATH)
                .map(std::sync::Arc::new)
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(obs_common::ObsError::Backend)
    }

    /// Opens (or attaches to) the store for `heap_name`, a key prefix
    /// that must be unique per aggregator side (e.g. `"svc.Handler.low"`).
    pub fn open(heap_name: impl Into<String>, polarity: Polarity) -> obs_common::ObsResult<Self> {
        let heap_name = heap_name.into();
        let db = Self::shared_db()?;
        let len_key = format!("{heap_name}@len");
        let len = match db.get(&len_key).map_err(|e| obs_common::ObsError::Backend(e.to_string()))? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(0),
            None => 0,
        };
        Ok(DiskHeap {
            polarity,
            heap_name,
            db,
            len,
        })
    }

    fn id_key(&self, i: usize) -> String {
        format!("{}@id={}", self.heap_name, i)
    }

    fn get_val(&self, i: usize) -> obs_common::ObsResult<i64> {
        let bytes = self
            .db
            .get(self.id_key(i))
            .map_err(|e| obs_common::ObsError::Backend(e.to_string()))?
            .ok_or_else(|| obs_common::ObsError::Backend(format!("missing heap slot {i}")))?;
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| obs_common::ObsError::Backend(format!("corrupt heap slot {i}")))
    }

    fn set_val(&self, i: usize, v: i64) -> obs_common::ObsResult<()> {
        self.db
            .put(self.id_key(i), v.to_string())
            .map_err(|e| obs_common::ObsError::Backend(e.to_string()))
    }

    fn set_len(&mut self, len: usize) -> obs_common::ObsResult<()> {
        self.db
            .put(format!("{}@len", self.heap_name), len.to_string())
            .map_err(|e| obs_common::ObsError::Backend(e.to_string()))?;
        self.len = len;
        Ok(())
    }

    fn above(&self, a: i64, b: i64) -> bool {
        match self.polarity {
            Polarity::Max => a > b,
            Polarity::Min => a < b,
        }
    }

    fn swap(&self, i: usize, j: usize) -> obs_common::ObsResult<()> {
        let a = self.get_val(i)?;
        let b = self.get_val(j)?;
        self.set_val(i, b)?;
        self.set_val(j, a)?;
        Ok(())
    }

    fn sift_up(&mut self, mut i: usize) -> obs_common::ObsResult<()> {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.above(self.get_val(i)?, self.get_val(parent)?) {
                self.swap(i, parent)?;
                i = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn sift_down(&mut self, mut i: usize) -> obs_common::ObsResult<()> {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut best = i;

            if left < self.len && self.above(self.get_val(left)?, self.get_val(best)?) {
                best = left;
            }
            if right < self.len && self.above(self.get_val(right)?, self.get_val(best)?) {
                best = right;
            }
            if best == i {
                break;
            }
            self.swap(i, best)?;
            i = best;
        }
        Ok(())
    }
}

#[cfg(feature = "disk-store")]
impl OrderedStore for DiskHeap {
    fn push(&mut self, v: i64) -> obs_common::ObsResult<()> {
        let idx = self.len;
        self.set_val(idx, v)?;
        self.set_len(idx + 1)?;
        self.sift_up(idx)
    }

    fn pop(&mut self) -> obs_common::ObsResult<i64> {
        let last = self.len - 1;
        let top = self.get_val(0)?;
        if last > 0 {
            let tail = self.get_val(last)?;
            self.set_val(0, tail)?;
        }
        self.set_len(last)?;
        if last > 0 {
            self.sift_down(0)?;
        }
        Ok(top)
    }

    fn peek(&self) -> Option<i64> {
        if self.len == 0 {
            None
        } else {
            self.get_val(0).ok()
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn truncate(&mut self) -> obs_common::ObsResult<()> {
        for i in 0..self.len {
            let _ = self.db.delete(self.id_key(i));
        }
        self.set_len(0)
    }

    fn footprint(&self) -> usize {
        self.len * std::mem::size_of::<i64>()
    }
}
