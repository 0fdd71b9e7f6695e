//! Per-channel offset bookkeeping.
//!
//! Three row sequencers describe the progress of a channel handle:
//!
//! - appended: rows handed to the client by `append_row`.
//! - accepted: rows the service acknowledged receiving.
//! - committed: rows the service reports as durably committed.
//!
//! Committed state only moves forward. Status responses that report an older
//! state, for example because they raced with a newer one, are ignored.
use std::sync::atomic::{AtomicU64, Ordering};

use sluice_resources::OffsetToken;
use sluice_service::CommitState;
use tokio::sync::watch;

#[derive(Debug)]
pub struct OffsetTracker {
    appended_rows: AtomicU64,
    accepted_rows: AtomicU64,
    latest_appended: watch::Sender<Option<OffsetToken>>,
    committed: watch::Sender<CommitState>,
}

impl OffsetTracker {
    /// Creates a tracker for a channel whose service already accepted
    /// `accepted_rows` rows and committed `committed`.
    pub fn new(accepted_rows: u64, committed: CommitState) -> Self {
        let accepted_rows = accepted_rows.max(committed.row_sequencer);
        let latest_appended = committed.offset_token.clone();
        Self {
            appended_rows: AtomicU64::new(accepted_rows),
            accepted_rows: AtomicU64::new(accepted_rows),
            latest_appended: watch::Sender::new(latest_appended),
            committed: watch::Sender::new(committed),
        }
    }

    /// Records rows queued for upload and returns the new appended row sequencer.
    pub fn record_appended(&self, num_rows: u64, offset_token: OffsetToken) -> u64 {
        let appended = self.appended_rows.fetch_add(num_rows, Ordering::AcqRel) + num_rows;
        self.latest_appended.send_replace(Some(offset_token));
        appended
    }

    pub fn record_accepted(&self, row_sequencer: u64) {
        self.accepted_rows.fetch_max(row_sequencer, Ordering::AcqRel);
    }

    /// Folds a commit state reported by the service, returning true if the
    /// committed state moved forward.
    pub fn observe_commit(&self, state: CommitState) -> bool {
        self.committed.send_if_modified(|current| {
            if state.is_ahead_of(current) {
                *current = state;
                true
            } else {
                false
            }
        })
    }

    pub fn appended_row_sequencer(&self) -> u64 {
        self.appended_rows.load(Ordering::Acquire)
    }

    pub fn accepted_row_sequencer(&self) -> u64 {
        self.accepted_rows.load(Ordering::Acquire)
    }

    pub fn committed_row_sequencer(&self) -> u64 {
        self.committed.borrow().row_sequencer
    }

    pub fn committed_offset_token(&self) -> Option<OffsetToken> {
        self.committed.borrow().offset_token.clone()
    }

    pub fn latest_appended_offset_token(&self) -> Option<OffsetToken> {
        self.latest_appended.borrow().clone()
    }

    /// Rows appended through this handle that are not committed yet.
    pub fn uncommitted_rows(&self) -> u64 {
        self.appended_row_sequencer()
            .saturating_sub(self.committed_row_sequencer())
    }

    pub fn is_fully_committed(&self) -> bool {
        self.uncommitted_rows() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(token: u64, rows: u64) -> CommitState {
        CommitState {
            offset_token: Some(OffsetToken::from(token)),
            row_sequencer: rows,
        }
    }

    #[test]
    fn test_committed_state_is_monotonic() {
        let tracker = OffsetTracker::new(0, CommitState::default());
        assert_eq!(tracker.committed_offset_token(), None);

        assert!(tracker.observe_commit(state(4, 5)));
        assert_eq!(tracker.committed_offset_token().unwrap(), "4");

        // an older report is ignored
        assert!(!tracker.observe_commit(state(1, 2)));
        assert!(!tracker.observe_commit(CommitState::default()));
        assert_eq!(tracker.committed_offset_token().unwrap(), "4");
        assert_eq!(tracker.committed_row_sequencer(), 5);

        assert!(tracker.observe_commit(state(9, 10)));
        assert_eq!(tracker.committed_offset_token().unwrap(), "9");
    }

    #[test]
    fn test_appended_and_committed_rows() {
        let tracker = OffsetTracker::new(3, state(2, 3));
        assert!(tracker.is_fully_committed());
        assert_eq!(tracker.latest_appended_offset_token().unwrap(), "2");

        assert_eq!(tracker.record_appended(2, OffsetToken::from(4)), 5);
        assert_eq!(tracker.uncommitted_rows(), 2);
        assert_eq!(tracker.latest_appended_offset_token().unwrap(), "4");

        tracker.record_accepted(5);
        tracker.record_accepted(4);
        assert_eq!(tracker.accepted_row_sequencer(), 5);

        tracker.observe_commit(state(4, 5));
        assert!(tracker.is_fully_committed());
    }
}
