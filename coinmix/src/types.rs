//! Common value types used by the mixing protocol.

use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Number of base units in one coin.
pub const COIN: u64 = 100_000_000;

/// Render an amount of base units as a decimal coin string, trimming trailing zeros.
///
/// `format_amount(149_000_000) == "1.49"`, `format_amount(10 * COIN) == "10"`.
pub fn format_amount(amount: u64) -> String {
    let whole = amount / COIN;
    let frac = amount % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:08}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Transaction identifier.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Txid(pub [u8; 32]);

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self)
    }
}

/// Reference to a previous transaction output.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Encode, Decode)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self {
            txid,
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A coin offered to a mixing round.
#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct EntryInput {
    pub outpoint: OutPoint,
    /// Value of the coin being spent, in base units.
    pub value: u64,
}

/// Transaction input of the joint transaction.
#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct TxIn {
    pub previous_output: OutPoint,
    /// Unlocking script; empty until the owner has signed.
    pub script_sig: Vec<u8>,
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Encode, Decode)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A mixing transaction.
#[derive(Clone, PartialEq, Eq, Debug, Default, Encode, Decode)]
pub struct Transaction {
    pub version: u32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
}

impl Transaction {
    /// Identifier over the complete transaction, signatures included.
    pub fn txid(&self) -> Txid {
        let mut hasher = blake3::Hasher::new();
        self.hash_body(&mut hasher, true);
        Txid(*hasher.finalize().as_bytes())
    }

    /// Digest the participants sign; excludes every `script_sig`.
    pub fn signature_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        self.hash_body(&mut hasher, false);
        *hasher.finalize().as_bytes()
    }

    fn hash_body(&self, hasher: &mut blake3::Hasher, with_scripts: bool) {
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&(self.input.len() as u64).to_le_bytes());
        for input in &self.input {
            hasher.update(&input.previous_output.txid.0);
            hasher.update(&input.previous_output.vout.to_le_bytes());
            if with_scripts {
                hasher.update(&(input.script_sig.len() as u64).to_le_bytes());
                hasher.update(&input.script_sig);
            }
        }
        hasher.update(&(self.output.len() as u64).to_le_bytes());
        for output in &self.output {
            hasher.update(&output.value.to_le_bytes());
            hasher.update(&(output.script_pubkey.len() as u64).to_le_bytes());
            hasher.update(&output.script_pubkey);
        }
    }

    /// True when every input carries an unlocking script.
    pub fn is_fully_signed(&self) -> bool {
        !self.input.is_empty() && self.input.iter().all(|input| !input.script_sig.is_empty())
    }

    pub fn total_output_value(&self) -> u64 {
        self.output.iter().map(|o| o.value).sum()
    }
}

/// A signature for one input of the joint transaction.
#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct InputSignature {
    pub outpoint: OutPoint,
    pub script_sig: Vec<u8>,
}

/// Identifier of a mixing session.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Encode, Decode, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl SessionId {
    /// A fresh random session identifier.
    pub fn random() -> Self {
        SessionId(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies who contributed an entry. Remote peers are numbered by the transport.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Encode, Decode, Serialize, Deserialize,
)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// The local wallet.
    pub const LOCAL: ParticipantId = ParticipantId(0);

    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "local")
        } else {
            write!(f, "peer-{}", self.0)
        }
    }
}
