//! Core data structures for idrange
//!
//! This module contains the id types, the range descriptor stored by the
//! table, and the boundary to the backend primitive that actually releases
//! service ids.

use smallvec::SmallVec;

/// Identifier handed out to users of the table
pub type ClientId = u32;

/// Backend identifier that the deletion primitive operates on
pub type ServiceId = u32;

/// Id zero means "no id" and is never stored
pub const NO_ID: u32 = 0;

/// A closed block of client ids mapped in lock-step onto a block of service ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct IdRange {
    /// First client id (inclusive)
    pub first_client: ClientId,
    /// Last client id (inclusive)
    pub last_client: ClientId,
    /// Service id that `first_client` maps to
    pub first_service: ServiceId,
}

impl IdRange {
    /// Create a range descriptor; no validation is done here
    pub fn new(first_client: ClientId, last_client: ClientId, first_service: ServiceId) -> Self {
        Self {
            first_client,
            last_client,
            first_service,
        }
    }

    /// Number of ids in the range; zero for an inverted descriptor
    pub fn len(&self) -> u64 {
        (u64::from(self.last_client) + 1).saturating_sub(u64::from(self.first_client))
    }

    /// Service id that `last_client` maps to, or `None` if the descriptor is
    /// inverted or its service run passes `ServiceId::MAX`
    pub fn last_service(&self) -> Option<ServiceId> {
        self.last_client
            .checked_sub(self.first_client)
            .and_then(|span| self.first_service.checked_add(span))
    }

    /// Check whether `client` falls inside the range
    pub fn contains(&self, client: ClientId) -> bool {
        client >= self.first_client && client <= self.last_client
    }

    /// Check whether `[first, last]` shares any client id with the range
    pub fn overlaps(&self, first: ClientId, last: ClientId) -> bool {
        !(last < self.first_client || first > self.last_client)
    }

    /// Translate a client id inside this range
    pub fn service_for(&self, client: ClientId) -> Option<ServiceId> {
        if self.contains(client) {
            self.first_service.checked_add(client - self.first_client)
        } else {
            None
        }
    }

    /// True when `next` continues this range in both client and service space
    pub fn is_mergeable_with(&self, next: &IdRange) -> bool {
        let client_adjacent = self.last_client.checked_add(1) == Some(next.first_client);
        let service_adjacent = self
            .last_service()
            .and_then(|last| last.checked_add(1))
            == Some(next.first_service);
        client_adjacent && service_adjacent
    }
}

/// The backend primitive that destroys a run of service ids.
///
/// Callers never see `count` above the table's configured batch limit and
/// never see a zero count. Failures are the implementor's concern; the table
/// does not retry or roll back.
pub trait DeleteRange {
    /// Delete `count` consecutive service ids starting at `first_service`
    fn delete_range(&mut self, first_service: ServiceId, count: u32);
}

impl<F> DeleteRange for F
where
    F: FnMut(ServiceId, u32),
{
    fn delete_range(&mut self, first_service: ServiceId, count: u32) {
        self(first_service, count)
    }
}

/// Deleter for tables whose service ids need no backend cleanup
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeleter;

impl DeleteRange for NoopDeleter {
    fn delete_range(&mut self, _first_service: ServiceId, _count: u32) {}
}

/// Deleter that remembers every call in order
#[derive(Debug, Clone, Default)]
pub struct RecordingDeleter {
    calls: SmallVec<[(ServiceId, u32); 8]>,
}

impl RecordingDeleter {
    /// Create a deleter with no recorded calls
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(first_service, count)` calls received so far
    pub fn calls(&self) -> &[(ServiceId, u32)] {
        &self.calls
    }

    /// Sum of the counts of every call
    pub fn total_deleted(&self) -> u64 {
        self.calls.iter().map(|&(_, count)| u64::from(count)).sum()
    }

    /// Forget recorded calls
    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl DeleteRange for RecordingDeleter {
    fn delete_range(&mut self, first_service: ServiceId, count: u32) {
        self.calls.push((first_service, count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_range_basic() {
        let range = IdRange::new(10, 20, 100);

        assert_eq!(range.len(), 11);
        assert_eq!(range.last_service(), Some(110));
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
        assert_eq!(range.service_for(14), Some(104));
        assert_eq!(range.service_for(21), None);
    }

    #[test]
    fn test_id_range_overlaps() {
        let range = IdRange::new(100, 200, 1);

        assert!(range.overlaps(50, 150));
        assert!(range.overlaps(150, 250));
        assert!(range.overlaps(120, 180));
        assert!(range.overlaps(50, 250));
        assert!(!range.overlaps(50, 99));
        assert!(!range.overlaps(201, 250));
    }

    #[test]
    fn test_mergeable_needs_both_runs_contiguous() {
        let left = IdRange::new(1001, 1155, 1);

        assert!(left.is_mergeable_with(&IdRange::new(1156, 1209, 156)));
        // client adjacent, service gap
        assert!(!left.is_mergeable_with(&IdRange::new(1156, 1209, 157)));
        // service adjacent, client gap
        assert!(!left.is_mergeable_with(&IdRange::new(1157, 1209, 156)));
    }

    #[test]
    fn test_mergeable_at_id_ceiling() {
        let left = IdRange::new(u32::MAX - 1, u32::MAX, 5);
        let right = IdRange::new(1, 1, 7);
        assert!(!left.is_mergeable_with(&right));
    }

    #[test]
    fn test_unvalidated_descriptor_does_not_overflow() {
        let wrapping = IdRange::new(1, 10, u32::MAX);
        assert_eq!(wrapping.last_service(), None);
        assert_eq!(wrapping.service_for(1), Some(u32::MAX));
        assert_eq!(wrapping.service_for(2), None);
        assert!(!wrapping.is_mergeable_with(&IdRange::new(11, 11, 1)));

        let inverted = IdRange::new(9, 5, 100);
        assert_eq!(inverted.last_service(), None);
        assert_eq!(inverted.len(), 0);
        assert!(!inverted.is_mergeable_with(&IdRange::new(6, 6, 105)));
    }

    #[test]
    fn test_closure_as_deleter() {
        let mut seen = Vec::new();
        {
            let mut deleter = |first: ServiceId, count: u32| seen.push((first, count));
            deleter.delete_range(11, 1);
            deleter.delete_range(40, 3);
        }
        assert_eq!(seen, vec![(11, 1), (40, 3)]);
    }

    #[test]
    fn test_recording_deleter() {
        let mut deleter = RecordingDeleter::new();
        deleter.delete_range(5, 10);
        deleter.delete_range(15, 2);

        assert_eq!(deleter.calls(), &[(5, 10), (15, 2)]);
        assert_eq!(deleter.total_deleted(), 12);

        deleter.clear();
        assert!(deleter.calls().is_empty());
    }
}
