//! Built-in public RPC endpoints
//!
//! Rebuilt at every startup and never persisted. The first entry of each
//! list is the initial active endpoint.

use crate::chain::Chain;

const ETHEREUM: &[&str] = &[
    "https://eth.llamarpc.com",
    "https://rpc.ankr.com/eth",
    "https://ethereum-rpc.publicnode.com",
];

const POLYGON: &[&str] = &[
    "https://polygon-rpc.com",
    "https://rpc.ankr.com/polygon",
    "https://polygon-bor-rpc.publicnode.com",
];

const ARBITRUM: &[&str] = &[
    "https://arb1.arbitrum.io/rpc",
    "https://rpc.ankr.com/arbitrum",
    "https://arbitrum-one-rpc.publicnode.com",
];

const OPTIMISM: &[&str] = &[
    "https://mainnet.optimism.io",
    "https://rpc.ankr.com/optimism",
    "https://optimism-rpc.publicnode.com",
];

const BASE: &[&str] = &["https://mainnet.base.org", "https://base-rpc.publicnode.com"];

const BSC: &[&str] = &[
    "https://bsc-dataseed.bnbchain.org",
    "https://rpc.ankr.com/bsc",
    "https://bsc-rpc.publicnode.com",
];

const AVALANCHE: &[&str] = &[
    "https://api.avax.network/ext/bc/C/rpc",
    "https://rpc.ankr.com/avalanche",
    "https://avalanche-c-chain-rpc.publicnode.com",
];

const SOLANA: &[&str] = &[
    "https://api.mainnet-beta.solana.com",
    "https://solana-rpc.publicnode.com",
];

const BITCOIN: &[&str] = &[
    "https://bitcoin-rpc.publicnode.com",
    "https://bitcoin.drpc.org",
];

pub fn default_endpoints(chain: Chain) -> &'static [&'static str] {
    match chain {
        Chain::Ethereum => ETHEREUM,
        Chain::Polygon => POLYGON,
        Chain::Arbitrum => ARBITRUM,
        Chain::Optimism => OPTIMISM,
        Chain::Base => BASE,
        Chain::Bsc => BSC,
        Chain::Avalanche => AVALANCHE,
        Chain::Solana => SOLANA,
        Chain::Bitcoin => BITCOIN,
    }
}
