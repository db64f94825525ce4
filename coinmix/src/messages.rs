//! Protocol messages exchanged between participants and the coordinator.
//!
//! Every message names the session it belongs to; the pool ignores messages
//! for any other session.

use bincode::error::DecodeError;
use bincode::{Decode, Encode};

use crate::error::CodecError;
use crate::types::{EntryInput, InputSignature, SessionId, Transaction, TxOut, Txid};

/// Largest encoded message accepted by [`PoolMessage::decode`].
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Decode budget. Charges wire bytes read plus the memory every length prefix claims.
const DECODE_LIMIT: usize = 4 * MAX_MESSAGE_SIZE;

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum PoolMessage {
    /// Ask a coordinator for a slot in a session of the given denomination.
    JoinQueue {
        session: SessionId,
        denom_mask: u32,
    },
    /// The coordinator opened the session for entries.
    QueueReady {
        session: SessionId,
        denom_mask: u32,
    },
    /// A participant's inputs and outputs.
    Entry {
        session: SessionId,
        inputs: Vec<EntryInput>,
        outputs: Vec<TxOut>,
    },
    /// Admission result for an entry.
    EntryStatus {
        session: SessionId,
        accepted: bool,
        reason: String,
        entries: u32,
    },
    /// The joint transaction, to be signed by the recipient.
    SignRequest {
        session: SessionId,
        tx: Transaction,
    },
    /// Signatures over the recipient's own inputs.
    Signatures {
        session: SessionId,
        signatures: Vec<InputSignature>,
    },
    /// Round outcome.
    Complete {
        session: SessionId,
        success: bool,
        txid: Option<Txid>,
        message: String,
    },
}

impl PoolMessage {
    /// Session this message belongs to.
    pub fn session(&self) -> SessionId {
        match self {
            PoolMessage::JoinQueue {
                session,
                ..
            }
            | PoolMessage::QueueReady {
                session,
                ..
            }
            | PoolMessage::Entry {
                session,
                ..
            }
            | PoolMessage::EntryStatus {
                session,
                ..
            }
            | PoolMessage::SignRequest {
                session,
                ..
            }
            | PoolMessage::Signatures {
                session,
                ..
            }
            | PoolMessage::Complete {
                session,
                ..
            } => *session,
        }
    }

    /// Short command name, for logs.
    pub fn command(&self) -> &'static str {
        match self {
            PoolMessage::JoinQueue {
                ..
            } => "join_queue",
            PoolMessage::QueueReady {
                ..
            } => "queue_ready",
            PoolMessage::Entry {
                ..
            } => "entry",
            PoolMessage::EntryStatus {
                ..
            } => "entry_status",
            PoolMessage::SignRequest {
                ..
            } => "sign_request",
            PoolMessage::Signatures {
                ..
            } => "signatures",
            PoolMessage::Complete {
                ..
            } => "complete",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decode one message. The input must contain exactly one message.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::TooLarge(bytes.len()));
        }
        let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
        let (message, read): (PoolMessage, usize) =
            bincode::decode_from_slice(bytes, config).map_err(|e| match e {
                DecodeError::LimitExceeded => CodecError::LimitExceeded,
                other => CodecError::Decode(other),
            })?;
        if read != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - read));
        }
        Ok(message)
    }
}
