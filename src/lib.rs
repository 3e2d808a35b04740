//! idrange: range-based identifier translation
//!
//! This crate maps contiguous blocks of caller-visible ("client") ids onto
//! contiguous blocks of backend ("service") ids. Ranges are merged on insert
//! and split on removal, and every release of service ids is forwarded to a
//! caller-supplied [`DeleteRange`] primitive in bounded batches.
//!
//! [`RangeTable`] is not internally synchronized. Embedders that need to
//! share one table across threads must hold a lock around every call, or
//! use [`SharedRangeTable`], which does exactly that.
//!
//! ```
//! use idrange::{RangeTable, RecordingDeleter};
//!
//! let mut table = RangeTable::new(RecordingDeleter::new());
//! table.create_range(10, 20, 100).unwrap();
//! assert_eq!(table.lookup(14), Some(104));
//!
//! table.remove_range(14, 16);
//! assert_eq!(table.deleter().calls(), &[(104, 3)]);
//! assert_eq!(table.lookup(15), None);
//!
//! table.destroy(true);
//! ```

#![warn(missing_docs)]

/// Id types, range descriptor and the deletion primitive boundary
pub mod core;

/// Sorted interval table of id ranges
pub mod interval;

/// Lock-guarded handle for cross-thread use
pub mod shared;


// Re-exports
pub use config::{ConsistencyChecks, DEFAULT_MAX_BATCH, RangeTableConfig};
pub use crate::core::{ClientId, DeleteRange, IdRange, NoopDeleter, RecordingDeleter, ServiceId};
pub use error::{Error, Result};
pub use interval::{RangeTable, RangeTableStats, Released};
pub use shared::SharedRangeTable;

/// Error types for idrange operations
pub mod error {
    use std::error::Error as StdError;
    use std::fmt;

    use crate::core::ClientId;

    /// Result alias used throughout the crate
    pub type Result<T> = std::result::Result<T, Error>;

    /// Error types that can occur in range table operations
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// A zero id, an inverted range, or a range that runs past the id width
        InvalidArgument(String),
        /// Some id of the requested range is already mapped
        Overlap {
            /// First client id of the rejected request
            first_client: ClientId,
            /// Last client id of the rejected request
            last_client: ClientId,
        },
        /// Strict removal found ids in the span that are not mapped
        NotMapped {
            /// First client id of the rejected request
            first_client: ClientId,
            /// Last client id of the rejected request
            last_client: ClientId,
        },
        /// Configuration error
        ConfigError(String),
    }

    impl fmt::Display for Error {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
                Error::Overlap {
                    first_client,
                    last_client,
                } => write!(
                    f,
                    "Client ids [{}, {}] overlap an existing range",
                    first_client, last_client
                ),
                Error::NotMapped {
                    first_client,
                    last_client,
                } => write!(
                    f,
                    "Client ids [{}, {}] are not all mapped",
                    first_client, last_client
                ),
                Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            }
        }
    }

    impl StdError for Error {}
}

/// Configuration options for a range table
pub mod config {
    use crate::error::{Error, Result};

    /// Largest count a single call to the deletion primitive may carry:
    /// the maximum of a signed 32-bit count parameter.
    pub const DEFAULT_MAX_BATCH: u32 = i32::MAX as u32;

    /// When the table validates its invariants around mutations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ConsistencyChecks {
        /// Never validate
        Never,
        /// Validate only when debug assertions are enabled
        #[default]
        DebugOnly,
        /// Always validate
        Always,
    }

    impl ConsistencyChecks {
        /// Whether checks run in the current build
        pub fn enabled(self) -> bool {
            match self {
                ConsistencyChecks::Never => false,
                ConsistencyChecks::DebugOnly => cfg!(debug_assertions),
                ConsistencyChecks::Always => true,
            }
        }
    }

    /// Configuration for a [`RangeTable`](crate::RangeTable)
    #[derive(Debug, Clone)]
    pub struct RangeTableConfig {
        /// Maximum count passed to one call of the deletion primitive
        pub max_batch: u32,
        /// Invariant validation around every mutating call
        pub consistency_checks: ConsistencyChecks,
    }

    impl RangeTableConfig {
        /// Reject settings the table cannot work with
        pub fn validate(&self) -> Result<()> {
            if self.max_batch == 0 {
                return Err(Error::ConfigError("max_batch must be at least 1".to_string()));
            }
            Ok(())
        }
    }

    impl Default for RangeTableConfig {
        fn default() -> Self {
            Self {
                max_batch: DEFAULT_MAX_BATCH,
                consistency_checks: ConsistencyChecks::DebugOnly,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RangeTableConfig::default();
        assert_eq!(config.max_batch, 2_147_483_647);
        assert_eq!(config.consistency_checks, ConsistencyChecks::DebugOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = RangeTableConfig {
            max_batch: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_error_display() {
        let err = Error::Overlap {
            first_client: 3,
            last_client: 9,
        };
        assert_eq!(err.to_string(), "Client ids [3, 9] overlap an existing range");
        assert!(ConsistencyChecks::Always.enabled());
        assert!(!ConsistencyChecks::Never.enabled());
    }
}
