//! Chunked release of service id runs
//!
//! The deletion primitive accepts a bounded count per call, so a run longer
//! than the limit is walked forward in consecutive batches.

use tracing::trace;

use crate::core::{DeleteRange, ServiceId};

/// Release `count` service ids starting at `first_service`, never passing
/// more than `max_batch` ids to a single primitive call.
///
/// Returns the number of calls issued. A zero `count` issues none.
pub fn delete_in_batches<D: DeleteRange + ?Sized>(
    deleter: &mut D,
    mut first_service: ServiceId,
    mut count: u32,
    max_batch: u32,
) -> u32 {
    debug_assert!(max_batch > 0);

    let mut calls = 0;
    while count > 0 {
        let chunk = count.min(max_batch);
        trace!(first_service, count = chunk, "deleting service id batch");
        deleter.delete_range(first_service, chunk);
        calls += 1;

        count -= chunk;
        // The run may end at ServiceId::MAX, so only step forward when more remains
        if count > 0 {
            first_service += chunk;
        }
    }
    calls
}
