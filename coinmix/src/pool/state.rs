//! Session states and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the mixing session.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// No active round.
    #[default]
    Idle,
    /// Waiting for a coordinator slot.
    Queue,
    /// Collecting entries.
    AcceptingEntries,
    /// Collecting signatures for the joint transaction.
    Signing,
    /// Assembling the fully-signed transaction.
    FinalizeTransaction,
    /// Broadcasting the final transaction.
    Transmission,
    /// Round completed.
    Success,
    /// Round failed; the reason is in the last message.
    Error,
}

impl PoolState {
    /// Whether the transition table allows moving from `self` to `next`.
    ///
    /// A user reset bypasses this table; it is honoured from every state.
    pub fn can_transition_to(self, next: PoolState) -> bool {
        use PoolState::*;
        matches!(
            (self, next),
            (Idle, Queue)
                | (Idle, AcceptingEntries)
                | (Queue, AcceptingEntries)
                | (Queue, Error)
                | (Queue, Idle)
                | (AcceptingEntries, Signing)
                | (AcceptingEntries, Error)
                | (AcceptingEntries, Idle)
                | (Signing, FinalizeTransaction)
                | (Signing, Transmission)
                | (Signing, Error)
                | (FinalizeTransaction, Transmission)
                | (FinalizeTransaction, Error)
                | (Transmission, Success)
                | (Transmission, Error)
                | (Success, Idle)
                | (Error, Idle)
        )
    }

    /// States that end a round and wait for `check()`.
    pub fn is_terminal(self) -> bool {
        matches!(self, PoolState::Success | PoolState::Error)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Idle => "idle",
            PoolState::Queue => "queue",
            PoolState::AcceptingEntries => "accepting_entries",
            PoolState::Signing => "signing",
            PoolState::FinalizeTransaction => "finalize_transaction",
            PoolState::Transmission => "transmission",
            PoolState::Success => "success",
            PoolState::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PoolState; 8] = [
        PoolState::Idle,
        PoolState::Queue,
        PoolState::AcceptingEntries,
        PoolState::Signing,
        PoolState::FinalizeTransaction,
        PoolState::Transmission,
        PoolState::Success,
        PoolState::Error,
    ];

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{} -> {}", state, state);
        }
    }

    #[test]
    fn test_signing_never_returns_to_accepting() {
        for from in [
            PoolState::Signing,
            PoolState::FinalizeTransaction,
            PoolState::Transmission,
        ] {
            assert!(!from.can_transition_to(PoolState::AcceptingEntries));
            assert!(!from.can_transition_to(PoolState::Idle));
        }
    }

    #[test]
    fn test_terminal_states_only_lead_to_idle() {
        for terminal in [PoolState::Success, PoolState::Error] {
            for next in ALL {
                assert_eq!(terminal.can_transition_to(next), next == PoolState::Idle);
            }
        }
    }

    #[test]
    fn test_idle_entry_points() {
        let reachable: Vec<_> =
            ALL.into_iter().filter(|next| PoolState::Idle.can_transition_to(*next)).collect();
        assert_eq!(reachable, vec![PoolState::Queue, PoolState::AcceptingEntries]);
    }
}
