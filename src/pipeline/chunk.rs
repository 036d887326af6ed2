//! Per-chunk bookkeeping.
//!
//! Every dispatched item carries an [`ItemTicket`] through both stages. The
//! ticket is dropped when the item settles (recorded, left for the next run,
//! or abandoned at shutdown); the last ticket of a chunk to drop marks the
//! chunk as drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use super::stats::RunStats;

#[derive(Debug)]
struct ChunkProgress {
    index: usize,
    size: usize,
    outstanding: AtomicUsize,
    stats: Arc<RunStats>,
}

/// Settles one item of a chunk when dropped.
#[derive(Debug)]
pub(crate) struct ItemTicket {
    chunk: Arc<ChunkProgress>,
}

impl ItemTicket {
    /// Index of the owning chunk.
    pub(crate) fn chunk_index(&self) -> usize {
        self.chunk.index
    }
}

impl Drop for ItemTicket {
    fn drop(&mut self) {
        if self.chunk.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.chunk.stats.increment_chunks_drained();
            info!(chunk = self.chunk.index, items = self.chunk.size, "chunk drained");
        }
    }
}

/// Issues exactly `count` tickets for chunk `index`.
pub(crate) fn issue_tickets(index: usize, count: usize, stats: &Arc<RunStats>) -> Vec<ItemTicket> {
    let chunk = Arc::new(ChunkProgress {
        index,
        size: count,
        outstanding: AtomicUsize::new(count),
        stats: Arc::clone(stats),
    });
    (0..count)
        .map(|_| ItemTicket {
            chunk: Arc::clone(&chunk),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_drains_on_last_ticket() {
        let stats = Arc::new(RunStats::new());
        let mut tickets = issue_tickets(3, 2, &stats);
        assert_eq!(tickets[0].chunk_index(), 3);

        drop(tickets.pop());
        assert_eq!(stats.chunks_drained(), 0);
        drop(tickets.pop());
        assert_eq!(stats.chunks_drained(), 1);
    }

    #[test]
    fn test_empty_chunk_issues_nothing() {
        let stats = Arc::new(RunStats::new());
        assert!(issue_tickets(0, 0, &stats).is_empty());
        assert_eq!(stats.chunks_drained(), 0);
    }
}
