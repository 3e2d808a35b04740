//! Interval module for idrange
//!
//! This module provides the range table that maps client id ranges onto
//! service id ranges, and the batched release helper it drives.

pub mod batch;
pub mod table;

// Re-export key types and functions
pub use batch::delete_in_batches;
pub use table::{RangeTable, RangeTableStats, Released};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsistencyChecks, RangeTableConfig};
    use crate::core::RecordingDeleter;

    #[test]
    fn test_interval_integration() {
        let config = RangeTableConfig {
            max_batch: 8,
            consistency_checks: ConsistencyChecks::Always,
        };
        let mut table = RangeTable::with_config(RecordingDeleter::new(), config).unwrap();

        // Three allocations that continue each other collapse into one entry
        table.create_range(1, 10, 501).unwrap();
        table.create_range(11, 20, 511).unwrap();
        table.create_range(21, 30, 521).unwrap();
        assert_eq!(table.len(), 1);

        let released = table.remove_range(1, 30);
        assert_eq!(released.ids(), 30);
        assert_eq!(
            table.deleter().calls(),
            &[(501, 8), (509, 8), (517, 8), (525, 6)]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_split_then_refill() {
        let mut table = RangeTable::new(RecordingDeleter::new());

        table.create_range(100, 199, 1000).unwrap();
        table.remove_range(150, 159);
        assert_eq!(table.len(), 2);

        // Refilling the hole with the same service ids restores a single entry
        table.create_range(150, 159, 1050).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.check_consistency());
        assert_eq!(table.lookup(155), Some(1055));

        table.destroy(true);
        assert_eq!(table.deleter().total_deleted(), 110);
    }
}
