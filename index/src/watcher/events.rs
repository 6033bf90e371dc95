//! Event coalescing.
//!
//! All events for one canonical path within the debounce window merge into
//! at most one event:
//!
//! - `CREATE … DELETE`   -> dropped entirely
//! - `n × MODIFY`        -> one `MODIFY` with the earliest timestamp
//! - `CREATE … MODIFY`   -> `CREATE`
//! - `MODIFY … DELETE`   -> `DELETE`
//! - anything else       -> the last event wins

use crate::types::ChangeKind;
use crate::types::FileChangeEvent;

/// Merge a window of events for one canonical path, sorted by timestamp.
///
/// Returns `None` when the window cancels itself out (a file created and
/// deleted inside the window).
pub fn coalesce(mut events: Vec<FileChangeEvent>) -> Option<FileChangeEvent> {
    events.sort_by_key(|e| e.timestamp);
    let mut iter = events.into_iter();
    let mut state: Option<FileChangeEvent> = iter.next();

    for next in iter {
        state = match state {
            // The window cancelled out earlier; whatever follows restarts
            // it.
            None => Some(next),
            Some(current) => merge_pair(current, next),
        };
    }
    state
}

fn merge_pair(current: FileChangeEvent, next: FileChangeEvent) -> Option<FileChangeEvent> {
    use ChangeKind::*;

    match (current.kind, next.kind) {
        // Created then deleted inside the window: nothing happened.
        (Create, Delete) => None,
        // Repeated modifies collapse to the earliest.
        (Modify, Modify) => Some(current),
        // A create followed by modifies is still a create.
        (Create, Modify) => Some(current),
        // Modified then deleted: the delete is what matters.
        (Modify, Delete) => Some(next),
        // Everything else: last event wins.
        _ => Some(next),
    }
}
