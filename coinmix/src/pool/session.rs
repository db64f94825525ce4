//! The active round.

use std::time::Instant;

use crate::denomination::Denomination;
use crate::entry_pool::Entry;
use crate::signing::SigningCoordinator;
use crate::types::SessionId;

/// Which side of the round the local node is on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// We submitted an entry to a remote coordinator.
    Participant,
    /// We collect entries from peers and drive signing.
    Host,
}

#[derive(Debug)]
pub(crate) struct Session {
    pub id: SessionId,
    pub role: Role,
    pub denomination: Denomination,
    /// Deadline of the current phase (queue, submission or signing).
    pub deadline: Instant,
    /// Our entry when participating.
    pub own_entry: Option<Entry>,
    /// Entry count last reported by the coordinator.
    pub reported_entries: usize,
    /// Present while a hosted round is signing.
    pub signing: Option<SigningCoordinator>,
}

impl Session {
    pub fn new(id: SessionId, role: Role, denomination: Denomination, deadline: Instant) -> Self {
        Self {
            id,
            role,
            denomination,
            deadline,
            own_entry: None,
            reported_entries: 0,
            signing: None,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}
