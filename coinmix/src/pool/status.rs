//! Observer-facing snapshot of the pool.

use serde::{Deserialize, Serialize};

use super::PoolState;
use crate::types::SessionId;

/// Everything a display layer needs, published after every change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub enabled: bool,
    pub session: Option<SessionId>,
    /// Entries in the current session.
    pub entries: usize,
    pub max_entries: usize,
    /// Our last entry was accepted by the coordinator.
    pub last_entry_accepted: bool,
    /// Denomination mask of the current session, `0` when there is none.
    pub session_denom: u32,
    /// Display form of `session_denom`, e.g. `"10"`.
    pub session_denom_text: String,
    pub last_message: String,
    pub auto_denom_result: String,
    /// Successful rounds since mixing was started.
    pub rounds_completed: u32,
    pub target_rounds: u32,
    pub progress: Option<u8>,
    pub progress_text: String,
    pub cached_num_blocks: u32,
}

impl PoolStatus {
    /// The one-line status message shown to the user.
    pub fn describe(&self) -> String {
        match self.state {
            PoolState::Idle => "Mixing is idle.".to_string(),
            PoolState::Queue => "Submitted to coordinator, waiting in queue".to_string(),
            PoolState::AcceptingEntries => {
                if self.entries == 0 {
                    if self.auto_denom_result.is_empty() {
                        "Mixing in progress...".to_string()
                    } else {
                        self.auto_denom_result.clone()
                    }
                } else if self.last_entry_accepted {
                    "Mixing request complete: Your transaction was accepted into the pool!"
                        .to_string()
                } else {
                    format!(
                        "Submitted following entries to coordinator: {}/{}",
                        self.entries, self.max_entries
                    )
                }
            }
            PoolState::Signing => "Found enough users, signing ...".to_string(),
            PoolState::FinalizeTransaction => "Finalizing transaction.".to_string(),
            PoolState::Transmission => "Transmitting final transaction.".to_string(),
            PoolState::Error => {
                format!("Mixing request incomplete: {}. Will retry...", self.last_message)
            }
            PoolState::Success => format!("Mixing request complete: {}", self.last_message),
        }
    }

    /// Denomination label, `"N/A"` without a session denomination.
    pub fn denomination_label(&self) -> &str {
        if self.session_denom == 0 {
            "N/A"
        } else {
            &self.session_denom_text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_per_state() {
        let mut status = PoolStatus::default();
        assert_eq!(status.describe(), "Mixing is idle.");

        status.state = PoolState::AcceptingEntries;
        status.max_entries = 3;
        status.entries = 2;
        assert_eq!(status.describe(), "Submitted following entries to coordinator: 2/3");

        status.last_entry_accepted = true;
        assert!(status.describe().contains("accepted into the pool"));

        status.entries = 0;
        assert_eq!(status.describe(), "Mixing in progress...");

        status.state = PoolState::Error;
        status.last_message = "Session timed out".to_string();
        assert_eq!(status.describe(), "Mixing request incomplete: Session timed out. Will retry...");
    }

    #[test]
    fn test_denomination_label() {
        let mut status = PoolStatus::default();
        assert_eq!(status.denomination_label(), "N/A");
        status.session_denom = 0b100;
        status.session_denom_text = "10".to_string();
        assert_eq!(status.denomination_label(), "10");
    }

    #[test]
    fn test_status_serializes_with_snake_case_state() {
        let status = PoolStatus {
            state: PoolState::AcceptingEntries,
            ..PoolStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "accepting_entries");
    }
}
