//! Staleness tokens for requests whose results land in a single-valued field.
//!
//! Every request takes a [`Ticket`] when it is issued. When its response
//! arrives, the response may be applied only if no later ticket has been issued
//! since. Issuance order is the only comparator; arrival order is ignored.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket that supersedes every earlier one.
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::Acquire) == ticket.0
    }

    pub fn latest(&self) -> Option<Ticket> {
        match self.latest.load(Ordering::Acquire) {
            0 => None,
            n => Some(Ticket(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_newest_ticket_is_current() {
        let seq = RequestSequencer::new();
        assert!(seq.latest().is_none());

        let a = seq.issue();
        assert!(seq.is_current(a));
        let b = seq.issue();
        assert!(!seq.is_current(a));
        assert!(seq.is_current(b));
        assert!(a < b);
        assert_eq!(seq.latest(), Some(b));
    }
}
