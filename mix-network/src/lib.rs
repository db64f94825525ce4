//! Network selection and static chain parameters shared across coinmix crates.
//!
//! Every network is a variant of [`Network`]; the per-network constants live
//! in an immutable [`ChainParams`] record that is selected once at startup.

use std::fmt;

/// The network the node operates on.
#[derive(Copy, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum Network {
    /// Production network.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network.
    Regtest,
}

/// Immutable chain parameters for one [`Network`].
#[derive(Debug, PartialEq, Eq)]
pub struct ChainParams {
    /// Message-start bytes prefixed to every P2P message.
    pub message_start: [u8; 4],
    /// Default P2P listening port.
    pub default_port: u16,
    /// Default RPC port.
    pub rpc_port: u16,
    /// Data sub-directory; empty for mainnet.
    pub data_dir: &'static str,
    /// Base58 prefix of pay-to-pubkey-hash addresses.
    pub pubkey_address_prefix: u8,
    /// Base58 prefix of pay-to-script-hash addresses.
    pub script_address_prefix: u8,
    /// Base58 prefix of WIF secret keys.
    pub secret_key_prefix: u8,
    /// Blocks between subsidy halvings.
    pub subsidy_halving_interval: u32,
    /// Hex hash of the genesis block, when it is pinned.
    pub genesis_hash: Option<&'static str>,
    /// DNS seeds queried for initial peers.
    pub dns_seeds: &'static [&'static str],
    /// Whether the RPC server refuses to start without a password.
    pub require_rpc_password: bool,
}

const MAINNET_PARAMS: ChainParams = ChainParams {
    message_start: [0x05, 0x06, 0x07, 0x08],
    default_port: 51400,
    rpc_port: 51401,
    data_dir: "",
    pubkey_address_prefix: 18,
    script_address_prefix: 18,
    secret_key_prefix: 28 + 128,
    subsidy_halving_interval: 140_000,
    genesis_hash: Some("000006d2f89bed88605c67665f7154e9520aecfe68a7deacf176672b4248c9df"),
    dns_seeds: &["bits.silentpatriot.com", "216.238.81.202", "64.176.193.63", "149.28.233.244"],
    require_rpc_password: true,
};

const TESTNET_PARAMS: ChainParams = ChainParams {
    message_start: [0x08, 0x07, 0x06, 0x05],
    default_port: 14000,
    rpc_port: 14001,
    data_dir: "testnet",
    pubkey_address_prefix: 43,
    script_address_prefix: 43,
    secret_key_prefix: 88 + 128,
    subsidy_halving_interval: 140_000,
    genesis_hash: Some("00000dae3b9b9f559a4a5d0b0fe71c81c5cff2268b600789ee5e04e8a5ed1660"),
    dns_seeds: &["bits.silentpatriot.com", "216.238.81.202"],
    require_rpc_password: true,
};

// Regtest inherits the testnet prefixes and RPC port.
const REGTEST_PARAMS: ChainParams = ChainParams {
    message_start: [0x01, 0x02, 0x03, 0x04],
    default_port: 18444,
    rpc_port: 14001,
    data_dir: "regtest",
    pubkey_address_prefix: 43,
    script_address_prefix: 43,
    secret_key_prefix: 88 + 128,
    subsidy_halving_interval: 150,
    genesis_hash: None,
    dns_seeds: &[],
    require_rpc_password: false,
};

impl Network {
    /// Creates a `Network` from the magic value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mix_network::Network;
    ///
    /// assert_eq!(Some(Network::Mainnet), Network::from_magic(0x08070605));
    /// assert_eq!(None, Network::from_magic(0xFFFFFFFF));
    /// ```
    pub fn from_magic(magic: u32) -> Option<Network> {
        [Network::Mainnet, Network::Testnet, Network::Regtest]
            .into_iter()
            .find(|network| network.magic() == magic)
    }

    /// Return the magic value, i.e. the message-start bytes read little-endian.
    pub fn magic(self) -> u32 {
        u32::from_le_bytes(self.params().message_start)
    }

    /// The static parameter record for this network.
    pub fn params(self) -> &'static ChainParams {
        match self {
            Network::Mainnet => &MAINNET_PARAMS,
            Network::Testnet => &TESTNET_PARAMS,
            Network::Regtest => &REGTEST_PARAMS,
        }
    }

    /// Select the network from the `-testnet` / `-regtest` command line flags.
    ///
    /// Both flags at once is a startup error.
    pub fn from_flags(testnet: bool, regtest: bool) -> Result<Network, String> {
        match (testnet, regtest) {
            (true, true) => Err("testnet and regtest cannot both be selected".to_string()),
            (false, true) => Ok(Network::Regtest),
            (true, false) => Ok(Network::Testnet),
            (false, false) => Ok(Network::Mainnet),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(format!("Unknown network type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_magic() {
        assert_eq!(Network::Mainnet.magic(), 0x08070605);
        assert_eq!(Network::Testnet.magic(), 0x05060708);
        assert_eq!(Network::Regtest.magic(), 0x04030201);
    }

    #[test]
    fn test_network_from_magic() {
        assert_eq!(Network::from_magic(0x08070605), Some(Network::Mainnet));
        assert_eq!(Network::from_magic(0x05060708), Some(Network::Testnet));
        assert_eq!(Network::from_magic(0x04030201), Some(Network::Regtest));
        assert_eq!(Network::from_magic(0x12345678), None);
    }

    #[test]
    fn test_regtest_inherits_testnet_prefixes() {
        let test = Network::Testnet.params();
        let reg = Network::Regtest.params();
        assert_eq!(test.pubkey_address_prefix, reg.pubkey_address_prefix);
        assert_eq!(test.secret_key_prefix, reg.secret_key_prefix);
        assert_eq!(test.rpc_port, reg.rpc_port);
        assert!(reg.dns_seeds.is_empty());
        assert!(!reg.require_rpc_password);
        assert_eq!(reg.subsidy_halving_interval, 150);
    }

    #[test]
    fn test_mainnet_params() {
        let params = Network::Mainnet.params();
        assert_eq!(params.default_port, 51400);
        assert_eq!(params.secret_key_prefix, 156);
        assert_eq!(params.dns_seeds.len(), 4);
        assert!(params.genesis_hash.is_some());
    }

    #[test]
    fn test_network_from_flags() {
        assert_eq!(Network::from_flags(false, false), Ok(Network::Mainnet));
        assert_eq!(Network::from_flags(true, false), Ok(Network::Testnet));
        assert_eq!(Network::from_flags(false, true), Ok(Network::Regtest));
        assert!(Network::from_flags(true, true).is_err());
    }

    #[test]
    fn test_network_display_round_trips() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert_eq!(network.to_string().parse::<Network>().unwrap(), network);
        }
        assert_eq!("main".parse::<Network>().unwrap(), Network::Mainnet);
        assert!("invalid".parse::<Network>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_network_serde_lowercase() {
        let json = serde_json::to_string(&Network::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
    }
}
