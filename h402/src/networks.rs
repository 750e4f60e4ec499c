//! Registry of the EVM networks a payment can be bound to.
//!
//! Network identifiers and their chain IDs are a stable public contract:
//! a signed payload commits to the chain ID, so changing a mapping here
//! invalidates every signature produced under the old one. Adding a network
//! is a code change, not a runtime setting.
//!
//! | identifier     | chain ID | testnet |
//! |----------------|----------|---------|
//! | `ethereum`     | 1        | no      |
//! | `base`         | 8453     | no      |
//! | `base-sepolia` | 84532    | yes     |
//! | `arbitrum`     | 42161    | no      |
//! | `optimism`     | 10       | no      |
//! | `polygon`      | 137      | no      |

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84532;

/// Arbitrum One chain ID.
pub const ARBITRUM_ONE: u64 = 42161;

/// OP Mainnet chain ID.
pub const OPTIMISM_MAINNET: u64 = 10;

/// Polygon PoS chain ID.
pub const POLYGON_MAINNET: u64 = 137;

/// Static metadata for a known network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// The network this entry describes.
    pub network: Network,
    /// Canonical identifier used on the wire (e.g. `"base-sepolia"`).
    pub name: &'static str,
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// Whether the network is a test network.
    pub testnet: bool,
}

/// Every network known to this build, in declaration order.
pub const KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        network: Network::Ethereum,
        name: "ethereum",
        chain_id: ETHEREUM_MAINNET,
        testnet: false,
    },
    NetworkInfo {
        network: Network::Base,
        name: "base",
        chain_id: BASE_MAINNET,
        testnet: false,
    },
    NetworkInfo {
        network: Network::BaseSepolia,
        name: "base-sepolia",
        chain_id: BASE_SEPOLIA,
        testnet: true,
    },
    NetworkInfo {
        network: Network::Arbitrum,
        name: "arbitrum",
        chain_id: ARBITRUM_ONE,
        testnet: false,
    },
    NetworkInfo {
        network: Network::Optimism,
        name: "optimism",
        chain_id: OPTIMISM_MAINNET,
        testnet: false,
    },
    NetworkInfo {
        network: Network::Polygon,
        name: "polygon",
        chain_id: POLYGON_MAINNET,
        testnet: false,
    },
];

/// Legacy spellings still accepted by [`Network::resolve`].
const ALIASES: &[(&str, Network)] = &[("base_sepolia", Network::BaseSepolia)];

/// A supported payment network.
///
/// Serializes to and from its canonical identifier string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Ethereum Mainnet.
    Ethereum,
    /// Base Mainnet.
    Base,
    /// Base Sepolia testnet.
    BaseSepolia,
    /// Arbitrum One.
    Arbitrum,
    /// OP Mainnet.
    Optimism,
    /// Polygon PoS.
    Polygon,
}

/// Returned when a network identifier is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl Network {
    /// Looks up a network by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] if the identifier is not registered.
    pub fn resolve(identifier: &str) -> Result<Self, UnknownNetwork> {
        KNOWN_NETWORKS
            .iter()
            .find(|info| info.name == identifier)
            .map(|info| info.network)
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == identifier)
                    .map(|(_, network)| *network)
            })
            .ok_or_else(|| UnknownNetwork(identifier.to_owned()))
    }

    /// Looks up a network by EIP-155 chain ID.
    #[must_use]
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        KNOWN_NETWORKS
            .iter()
            .find(|info| info.chain_id == chain_id)
            .map(|info| info.network)
    }

    /// Returns the registry entry for this network.
    #[must_use]
    pub const fn info(self) -> &'static NetworkInfo {
        match self {
            Self::Ethereum => &KNOWN_NETWORKS[0],
            Self::Base => &KNOWN_NETWORKS[1],
            Self::BaseSepolia => &KNOWN_NETWORKS[2],
            Self::Arbitrum => &KNOWN_NETWORKS[3],
            Self::Optimism => &KNOWN_NETWORKS[4],
            Self::Polygon => &KNOWN_NETWORKS[5],
        }
    }

    /// Canonical wire identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// EIP-155 chain ID.
    #[must_use]
    pub const fn chain_id(self) -> u64 {
        self.info().chain_id
    }

    /// Whether this is a test network.
    #[must_use]
    pub const fn is_testnet(self) -> bool {
        self.info().testnet
    }
}

/// Resolves an identifier straight to its chain ID.
///
/// # Errors
///
/// Returns [`UnknownNetwork`] if the identifier is not registered.
pub fn chain_id(identifier: &str) -> Result<u64, UnknownNetwork> {
    Network::resolve(identifier).map(Network::chain_id)
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::resolve(&s).map_err(de::Error::custom)
    }
}
