//! Coin mixing session protocol.
//!
//! A node either joins a round hosted by a coordinator or hosts one itself.
//! Each round pools fixed-denomination entries from several participants into
//! one joint transaction, collects every participant's signatures and
//! broadcasts the result. An automatic scheduler keeps starting rounds until
//! the configured amount has been mixed through the configured number of rounds.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use coinmix::{Collaborators, MixingConfig, MixingService};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = MixingConfig::testnet().with_enabled(true);
//! let collaborators = Collaborators {
//!     wallet: Arc::new(my_wallet),
//!     broadcaster: Arc::new(my_broadcaster),
//!     transport: Arc::new(my_transport),
//!     chain: Arc::new(my_chain),
//! };
//! let (service, handle) = MixingService::new(config, collaborators)?;
//! let shutdown = CancellationToken::new();
//! tokio::spawn(service.run(shutdown.clone()));
//!
//! println!("{}", handle.status().describe());
//! ```
//!
//! # Components
//!
//! - [`DenominationCatalog`]: the ladder of fixed coin values
//! - [`EntryPool`]: admission of entries into a hosted session
//! - [`SigningCoordinator`]: joint transaction assembly and signature collection
//! - [`MixingPool`]: the session state machine, free of I/O
//! - [`AutoDenominateScheduler`]: decides when the next round starts
//! - [`MixingService`]: async driver wiring the pool to its collaborators

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod config;
pub mod denomination;
pub mod entry_pool;
pub mod error;
pub mod interface;
pub mod logging;
pub mod messages;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod signing;
pub mod types;

// Re-export main types for convenience
pub use config::{MixingConfig, MixingPreset};
pub use denomination::{DEFAULT_DENOMINATIONS, Denomination, DenominationCatalog};
pub use entry_pool::{Entry, EntryPool};
pub use error::{
    AdmissionError, BroadcastRejection, CodecError, ConfigError, LoggingError, LoggingResult,
    MixingError, Result, TransportError, WalletError,
};
pub use interface::{Broadcaster, ChainTip, MixingWallet, PeerTransport, Recipient, WalletSnapshot};
pub use logging::{LogFileConfig, LoggingConfig, LoggingGuard, init_logging};
pub use messages::PoolMessage;
pub use pool::{MixingPool, PoolAction, PoolState, PoolStatus, Role};
pub use progress::ProgressReport;
pub use scheduler::{AutoDenominateScheduler, SchedulerDecision};
pub use service::{Collaborators, MixingCommand, MixingHandle, MixingService};
pub use signing::{SigningCoordinator, SigningOutcome, SigningPolicy};
pub use tracing::level_filters::LevelFilter;
pub use types::{COIN, OutPoint, ParticipantId, SessionId, Transaction, Txid};

pub use mix_network::Network;

/// Current version of the coinmix library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
