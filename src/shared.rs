//! Lock-guarded range table handle
//!
//! [`RangeTable`] is single-threaded by design. `SharedRangeTable` wraps one
//! table in a `parking_lot::RwLock` and holds the lock for the whole of every
//! call, so a release that issues several primitive batches is never
//! interleaved with another caller's mutation.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::RangeTableConfig;
use crate::core::{ClientId, DeleteRange, IdRange, ServiceId};
use crate::error::Result;
use crate::interval::{RangeTable, RangeTableStats, Released};

/// Cloneable, thread-safe handle to one range table
pub struct SharedRangeTable<D> {
    inner: Arc<RwLock<RangeTable<D>>>,
}

impl<D> Clone for SharedRangeTable<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DeleteRange> SharedRangeTable<D> {
    /// Wrap a new table with the default configuration
    pub fn new(deleter: D) -> Self {
        Self::from_table(RangeTable::new(deleter))
    }

    /// Wrap a new table with the given configuration
    pub fn with_config(deleter: D, config: RangeTableConfig) -> Result<Self> {
        Ok(Self::from_table(RangeTable::with_config(deleter, config)?))
    }

    /// Wrap an existing table
    pub fn from_table(table: RangeTable<D>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    /// [`RangeTable::create_range`] under the write lock
    pub fn create_range(
        &self,
        first_client: ClientId,
        last_client: ClientId,
        first_service: ServiceId,
    ) -> Result<()> {
        self.inner
            .write()
            .create_range(first_client, last_client, first_service)
    }

    /// [`RangeTable::has_range`] under the read lock
    pub fn has_range(&self, first_client: ClientId, last_client: ClientId) -> bool {
        self.inner.read().has_range(first_client, last_client)
    }

    /// [`RangeTable::lookup`] under the read lock
    pub fn lookup(&self, client: ClientId) -> Option<ServiceId> {
        self.inner.read().lookup(client)
    }

    /// [`RangeTable::remove_range`] under the write lock
    pub fn remove_range(&self, first_client: ClientId, last_client: ClientId) -> Released {
        self.inner.write().remove_range(first_client, last_client)
    }

    /// [`RangeTable::remove_range_strict`] under the write lock
    pub fn remove_range_strict(
        &self,
        first_client: ClientId,
        last_client: ClientId,
    ) -> Result<Released> {
        self.inner
            .write()
            .remove_range_strict(first_client, last_client)
    }

    /// [`RangeTable::destroy`] under the write lock
    pub fn destroy(&self, have_context: bool) {
        self.inner.write().destroy(have_context)
    }

    /// Get the number of stored ranges
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of every stored range
    pub fn snapshot(&self) -> Vec<IdRange> {
        self.inner.read().snapshot()
    }

    /// Get table statistics
    pub fn stats(&self) -> RangeTableStats {
        self.inner.read().stats()
    }

    /// Run `f` with exclusive access to the table
    pub fn with_table_mut<R>(&self, f: impl FnOnce(&mut RangeTable<D>) -> R) -> R {
        f(&mut self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecordingDeleter;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_shared_basic() {
        let table = SharedRangeTable::new(RecordingDeleter::new());
        let other = table.clone();

        table.create_range(1, 1, 11).unwrap();
        assert_eq!(other.lookup(1), Some(11));
        assert!(other.has_range(1, 1));

        other.remove_range(1, 1);
        assert!(table.is_empty());
        table.with_table_mut(|t| assert_eq!(t.deleter().calls(), &[(11, 1)]));
    }

    #[test]
    fn test_concurrent_disjoint_allocations() {
        let num_threads = 8;
        let ranges_per_thread = 50u32;
        let span = 10u32;

        let table = SharedRangeTable::new(RecordingDeleter::new());
        let barrier = Arc::new(Barrier::new(num_threads));

        let mut handles = vec![];
        for thread_id in 0..num_threads as u32 {
            let table = table.clone();
            let barrier = barrier.clone();

            handles.push(thread::spawn(move || {
                barrier.wait();
                let base = 1 + thread_id * ranges_per_thread * span * 2;
                for i in 0..ranges_per_thread {
                    // Leave a one-range gap so nothing merges across threads
                    let first = base + i * span * 2;
                    table
                        .create_range(first, first + span - 1, first + 7)
                        .expect("create failed");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), num_threads * ranges_per_thread as usize);
        assert_eq!(table.lookup(1), Some(8));
        assert!(table.with_table_mut(|t| t.check_consistency()));

        table.destroy(true);
        let stats = table.stats();
        assert_eq!(
            stats.deleted_ids,
            u64::from(num_threads as u32 * ranges_per_thread * span)
        );
        assert_eq!(stats.range_count, 0);
    }
}
