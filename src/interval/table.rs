//! Range table mapping client id ranges onto service id ranges
//!
//! Ranges are kept in a `BTreeMap` keyed by their first client id. Inserts
//! merge with neighbours that continue them in both id spaces, removals
//! split or shrink whatever they overlap, and every released service id run
//! is handed to the deletion primitive in bounded batches.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use smallvec::SmallVec;
use tracing::{debug, error, warn};

use crate::config::RangeTableConfig;
use crate::core::{ClientId, DeleteRange, IdRange, NO_ID, ServiceId};
use crate::error::{Error, Result};
use crate::interval::batch::delete_in_batches;

/// Value stored under each range's first client id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    last_client: ClientId,
    first_service: ServiceId,
}

/// Sorted table of disjoint, fully merged id ranges.
///
/// The table is not synchronized. Every method call must be serialized by
/// the owner, for example by holding one lock per table for the duration of
/// the call (see [`SharedRangeTable`](crate::SharedRangeTable)).
///
/// Tables that still hold ranges should be drained with
/// [`destroy`](RangeTable::destroy) before being dropped; dropping a
/// non-empty table is reported as an error.
pub struct RangeTable<D> {
    ranges: BTreeMap<ClientId, Entry>,
    deleter: D,
    config: RangeTableConfig,
    delete_calls: u64,
    deleted_ids: u64,
}

/// What a removal released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Released {
    /// Removed client spans with the service ids they mapped to, in client order
    pub spans: SmallVec<[IdRange; 4]>,
    /// Calls made to the deletion primitive
    pub delete_calls: u32,
}

impl Released {
    /// Total number of ids released
    pub fn ids(&self) -> u64 {
        self.spans.iter().map(IdRange::len).sum()
    }

    /// True when nothing in the requested span was mapped
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Statistics about the range table
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeTableStats {
    /// Stored entries
    pub range_count: usize,
    /// Client ids currently mapped
    pub mapped_ids: u64,
    /// Deletion primitive calls issued over the table's lifetime
    pub delete_calls: u64,
    /// Service ids released over the table's lifetime
    pub deleted_ids: u64,
}

impl<D: DeleteRange> RangeTable<D> {
    /// Create an empty table with the default configuration
    pub fn new(deleter: D) -> Self {
        Self {
            ranges: BTreeMap::new(),
            deleter,
            config: RangeTableConfig::default(),
            delete_calls: 0,
            deleted_ids: 0,
        }
    }

    /// Create an empty table with the given configuration
    pub fn with_config(deleter: D, config: RangeTableConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ranges: BTreeMap::new(),
            deleter,
            config,
            delete_calls: 0,
            deleted_ids: 0,
        })
    }

    /// Get the number of stored ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Active configuration
    pub fn config(&self) -> &RangeTableConfig {
        &self.config
    }

    /// The deletion primitive owned by this table
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Mutable access to the deletion primitive
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    /// Iterate stored ranges in ascending client id order
    pub fn iter(&self) -> impl Iterator<Item = IdRange> + '_ {
        self.ranges.iter().map(|(&first, entry)| to_range(first, entry))
    }

    /// Copy of every stored range in ascending client id order
    pub fn snapshot(&self) -> Vec<IdRange> {
        self.iter().collect()
    }

    /// Number of client ids currently mapped
    pub fn mapped_ids(&self) -> u64 {
        self.iter().map(|range| range.len()).sum()
    }

    /// Get table statistics
    pub fn stats(&self) -> RangeTableStats {
        RangeTableStats {
            range_count: self.ranges.len(),
            mapped_ids: self.mapped_ids(),
            delete_calls: self.delete_calls,
            deleted_ids: self.deleted_ids,
        }
    }

    /// Map client ids `[first_client, last_client]` onto service ids starting
    /// at `first_service`.
    ///
    /// The new range is merged with the range ending right before it and the
    /// range starting right after it whenever the service ids continue too.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for zero ids, an inverted range, or a
    ///   service run that would pass `ServiceId::MAX`
    /// * [`Error::Overlap`] if any client id in the range is already mapped
    ///
    /// The table is unchanged when an error is returned.
    pub fn create_range(
        &mut self,
        first_client: ClientId,
        last_client: ClientId,
        first_service: ServiceId,
    ) -> Result<()> {
        validate_span(first_client, last_client)?;
        if first_service == NO_ID {
            return Err(Error::InvalidArgument("service id 0 is reserved".to_string()));
        }
        if first_service.checked_add(last_client - first_client).is_none() {
            return Err(Error::InvalidArgument(format!(
                "service ids starting at {} cannot cover {} client ids",
                first_service,
                u64::from(last_client - first_client) + 1
            )));
        }
        if self.has_range(first_client, last_client) {
            return Err(Error::Overlap {
                first_client,
                last_client,
            });
        }
        self.assert_consistent("before create_range");

        let new_range = IdRange::new(first_client, last_client, first_service);

        // Extend the range that ends at first_client - 1 if it continues into ours
        let left = first_client
            .checked_sub(1)
            .and_then(|prev| self.find_containing(prev))
            .filter(|left| left.is_mergeable_with(&new_range));
        let mut current = match left {
            Some(left) => {
                let merged = IdRange::new(left.first_client, last_client, left.first_service);
                self.store(merged);
                merged
            }
            None => {
                self.store(new_range);
                new_range
            }
        };

        // Absorb the range starting at last_client + 1 if ours continues into it
        let right = self
            .ranges
            .range((Excluded(current.first_client), Unbounded))
            .next()
            .map(|(&first, entry)| to_range(first, entry))
            .filter(|right| current.is_mergeable_with(right));
        if let Some(right) = right {
            self.ranges.remove(&right.first_client);
            current.last_client = right.last_client;
            self.store(current);
        }

        debug!(
            first_client,
            last_client,
            first_service,
            merged_left = left.is_some(),
            merged_right = right.is_some(),
            ranges = self.ranges.len(),
            "created range"
        );

        self.assert_consistent("after create_range");
        Ok(())
    }

    /// True if any client id in `[first_client, last_client]` is mapped.
    ///
    /// An inverted span contains no ids and returns false.
    pub fn has_range(&self, first_client: ClientId, last_client: ClientId) -> bool {
        if first_client > last_client {
            return false;
        }
        self.find_containing_or_next(first_client)
            .is_some_and(|range| range.first_client <= last_client)
    }

    /// Translate a client id to its service id
    pub fn lookup(&self, client: ClientId) -> Option<ServiceId> {
        self.find_containing(client)
            .and_then(|range| range.service_for(client))
    }

    /// Release every mapped client id in `[first_client, last_client]`.
    ///
    /// Unmapped ids in the span are ignored. Each maximal run of mapped ids
    /// is released through the deletion primitive, in batches no larger than
    /// the configured `max_batch`, before the table entry is shrunk, split or
    /// erased.
    ///
    /// A request starting at id zero or with an inverted span is a caller
    /// bug: it is reported with `warn!` and nothing is released. Use
    /// [`remove_range_strict`](RangeTable::remove_range_strict) to get it
    /// back as an error.
    pub fn remove_range(&mut self, first_client: ClientId, last_client: ClientId) -> Released {
        let mut released = Released::default();
        if let Err(err) = validate_span(first_client, last_client) {
            warn!(first_client, last_client, %err, "ignoring invalid remove_range request");
            return released;
        }
        self.assert_consistent("before remove_range");

        while let Some(range) = self.find_containing_or_next(first_client) {
            if range.first_client > last_client {
                break;
            }

            let del_first = first_client.max(range.first_client);
            let del_last = last_client.min(range.last_client);
            let del_first_service = range.first_service + (del_first - range.first_client);
            let del_count = del_last - del_first + 1;

            let calls = delete_in_batches(
                &mut self.deleter,
                del_first_service,
                del_count,
                self.config.max_batch,
            );
            self.delete_calls += u64::from(calls);
            self.deleted_ids += u64::from(del_count);
            released.delete_calls += calls;
            released
                .spans
                .push(IdRange::new(del_first, del_last, del_first_service));

            let tail = (del_last < range.last_client).then(|| {
                IdRange::new(del_last + 1, range.last_client, del_first_service + del_count)
            });

            if del_first == range.first_client {
                self.ranges.remove(&range.first_client);
                if let Some(tail) = tail {
                    self.store(tail);
                }
            } else {
                self.store(IdRange::new(
                    range.first_client,
                    del_first - 1,
                    range.first_service,
                ));
                if let Some(tail) = tail {
                    // A hole punched in the middle consumed the end of the request
                    self.store(tail);
                    debug!(
                        first_client = del_first,
                        last_client = del_last,
                        tail_first_client = tail.first_client,
                        "split range"
                    );
                    break;
                }
            }
        }

        if !released.is_empty() {
            debug!(
                first_client,
                last_client,
                released_ids = released.ids(),
                delete_calls = released.delete_calls,
                ranges = self.ranges.len(),
                "removed range"
            );
        }

        self.assert_consistent("after remove_range");
        released
    }

    /// Like [`remove_range`](RangeTable::remove_range), but every id in the
    /// span must be mapped.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for a zero first id or an inverted span
    /// * [`Error::NotMapped`] if any id in the span is unmapped; no primitive
    ///   call is made and the table is unchanged
    pub fn remove_range_strict(
        &mut self,
        first_client: ClientId,
        last_client: ClientId,
    ) -> Result<Released> {
        validate_span(first_client, last_client)?;

        let wanted = u64::from(last_client - first_client) + 1;
        let covered: u64 = self
            .ranges
            .range(..=last_client)
            .rev()
            .map(|(&first, entry)| to_range(first, entry))
            .take_while(|range| range.last_client >= first_client)
            .map(|range| {
                let lo = range.first_client.max(first_client);
                let hi = range.last_client.min(last_client);
                u64::from(hi - lo) + 1
            })
            .sum();
        if covered != wanted {
            return Err(Error::NotMapped {
                first_client,
                last_client,
            });
        }

        Ok(self.remove_range(first_client, last_client))
    }

    /// Drain the table.
    ///
    /// With `have_context`, every stored range is released through the
    /// deletion primitive. Without it the backend ids are assumed gone
    /// already and the ranges are discarded without calls.
    pub fn destroy(&mut self, have_context: bool) {
        let ranges = std::mem::take(&mut self.ranges);
        if ranges.is_empty() {
            return;
        }

        if have_context {
            let mut released_ids = 0u64;
            for (first, entry) in &ranges {
                let range = to_range(*first, entry);
                let count = entry.last_client - first + 1;
                let calls = delete_in_batches(
                    &mut self.deleter,
                    range.first_service,
                    count,
                    self.config.max_batch,
                );
                self.delete_calls += u64::from(calls);
                self.deleted_ids += u64::from(count);
                released_ids += range.len();
            }
            debug!(ranges = ranges.len(), released_ids, "destroyed range table");
        } else {
            warn!(
                ranges = ranges.len(),
                "discarding range table without a context, service ids not released"
            );
        }
    }

    /// Validate every table invariant.
    ///
    /// Returns false if any stored range uses id zero, is inverted, runs past
    /// the service id width, overlaps its predecessor, or could have been
    /// merged with its predecessor.
    pub fn check_consistency(&self) -> bool {
        let mut prev: Option<IdRange> = None;
        for range in self.iter() {
            if range.first_client == NO_ID || range.first_service == NO_ID {
                return false;
            }
            if range.first_client > range.last_client {
                return false;
            }
            if range
                .first_service
                .checked_add(range.last_client - range.first_client)
                .is_none()
            {
                return false;
            }
            if let Some(prev) = prev {
                if prev.last_client >= range.first_client || prev.is_mergeable_with(&range) {
                    return false;
                }
            }
            prev = Some(range);
        }
        true
    }

    fn assert_consistent(&self, when: &str) {
        if self.config.consistency_checks.enabled() {
            assert!(self.check_consistency(), "range table inconsistent {}", when);
        }
    }

    /// Insert or overwrite the entry keyed at `range.first_client`
    fn store(&mut self, range: IdRange) {
        self.ranges.insert(
            range.first_client,
            Entry {
                last_client: range.last_client,
                first_service: range.first_service,
            },
        );
    }

    /// The range containing `client`
    fn find_containing(&self, client: ClientId) -> Option<IdRange> {
        self.ranges
            .range(..=client)
            .next_back()
            .map(|(&first, entry)| to_range(first, entry))
            .filter(|range| range.last_client >= client)
    }

    /// The range containing `client`, or failing that the first range after it
    fn find_containing_or_next(&self, client: ClientId) -> Option<IdRange> {
        self.find_containing(client).or_else(|| {
            self.ranges
                .range(client..)
                .next()
                .map(|(&first, entry)| to_range(first, entry))
        })
    }
}

impl<D> Drop for RangeTable<D> {
    fn drop(&mut self) {
        if !self.ranges.is_empty() {
            error!(
                ranges = self.ranges.len(),
                "range table dropped while still holding ranges; call destroy() first"
            );
        }
    }
}

impl<D> std::fmt::Debug for RangeTable<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeTable")
            .field("ranges", &self.ranges.len())
            .field("config", &self.config)
            .field("delete_calls", &self.delete_calls)
            .field("deleted_ids", &self.deleted_ids)
            .finish()
    }
}

fn to_range(first_client: ClientId, entry: &Entry) -> IdRange {
    IdRange::new(first_client, entry.last_client, entry.first_service)
}

fn validate_span(first_client: ClientId, last_client: ClientId) -> Result<()> {
    if first_client == NO_ID {
        return Err(Error::InvalidArgument("client id 0 is reserved".to_string()));
    }
    if first_client > last_client {
        return Err(Error::InvalidArgument(format!(
            "inverted client range [{}, {}]",
            first_client, last_client
        )));
    }
    Ok(())
}
