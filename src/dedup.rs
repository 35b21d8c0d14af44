//! In-memory re-filter of fetched candidates against the cursor.
//!
//! The store query already applies `date > cursor`, but a cycle that read an
//! older cursor can still fetch rows another cycle has claimed since. Applying
//! the same predicate again, against the cursor value current at claim time,
//! keeps the processed sets of any two cycles disjoint.

use tracing::debug;

use crate::store::Message;

/// Keep only messages strictly newer than `cursor`, preserving order.
pub fn filter_unseen(candidates: Vec<Message>, cursor: i64) -> Vec<Message> {
    let total = candidates.len();
    let unseen: Vec<Message> = candidates
        .into_iter()
        .filter(|m| m.date > cursor)
        .collect();

    if unseen.len() < total {
        debug!("Filtered out {} duplicate message(s)", total - unseen.len());
    }
    unseen
}

/// Newest timestamp in the batch.
pub fn max_timestamp(messages: &[Message]) -> Option<i64> {
    messages.iter().map(|m| m.date).max()
}
