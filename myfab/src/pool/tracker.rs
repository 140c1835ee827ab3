//! Loan tracker: which handles are out, for which server, and whether
//! they have been revoked while on loan.

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub(super) struct Loan {
    pub(super) server: Uuid,
    pub(super) connection_id: u32,
    pub(super) revoked: bool,
}

#[derive(Default)]
pub(super) struct Tracker {
    /// Keyed by a per-loan ticket; connection ids alone can collide
    /// across servers.
    loans: HashMap<u64, Loan>,
    counter: u64,
}

impl Tracker {
    /// Record a loan, returning its ticket.
    pub(super) fn take(&mut self, server: Uuid, connection_id: u32) -> u64 {
        let ticket = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.loans.insert(
            ticket,
            Loan {
                server,
                connection_id,
                revoked: false,
            },
        );
        ticket
    }

    /// Remove a loan; reports whether it had been revoked.
    pub(super) fn check_in(&mut self, ticket: u64) -> Option<Loan> {
        self.loans.remove(&ticket)
    }

    /// Mark every loan of a server revoked, returning the connection ids
    /// to interrupt.
    pub(super) fn revoke_server(&mut self, server: Uuid) -> Vec<u32> {
        let mut ids = Vec::new();
        for loan in self.loans.values_mut() {
            if loan.server == server && !loan.revoked {
                loan.revoked = true;
                ids.push(loan.connection_id);
            }
        }
        ids
    }

    /// Outstanding (non-revoked) loans for a server.
    pub(super) fn tracked(&self, server: Uuid) -> usize {
        self.loans
            .values()
            .filter(|loan| loan.server == server && !loan.revoked)
            .count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loan_lifecycle() {
        let mut tracker = Tracker::default();
        let server = Uuid::new_v4();

        let first = tracker.take(server, 10);
        let second = tracker.take(server, 11);
        assert_eq!(tracker.tracked(server), 2);

        let loan = tracker.check_in(first).unwrap();
        assert!(!loan.revoked);
        assert_eq!(tracker.tracked(server), 1);

        let ids = tracker.revoke_server(server);
        assert_eq!(ids, vec![11]);
        assert_eq!(tracker.tracked(server), 0);

        let loan = tracker.check_in(second).unwrap();
        assert!(loan.revoked);
        assert!(tracker.check_in(second).is_none());
    }

    #[test]
    fn revoke_is_per_server() {
        let mut tracker = Tracker::default();
        let one = Uuid::new_v4();
        let other = Uuid::new_v4();

        tracker.take(one, 1);
        tracker.take(other, 2);

        assert_eq!(tracker.revoke_server(one), vec![1]);
        assert_eq!(tracker.tracked(other), 1);
    }
}
