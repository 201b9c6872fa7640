//! Supported chains and their native assets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Bsc,
    Avalanche,
    Solana,
    Bitcoin,
}

/// RPC dialect spoken by a chain's nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Evm,
    Solana,
    Bitcoin,
}

impl Chain {
    pub const ALL: [Chain; 9] = [
        Chain::Ethereum,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Base,
        Chain::Bsc,
        Chain::Avalanche,
        Chain::Solana,
        Chain::Bitcoin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Bsc => "bsc",
            Chain::Avalanche => "avalanche",
            Chain::Solana => "solana",
            Chain::Bitcoin => "bitcoin",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Polygon => "Polygon",
            Chain::Arbitrum => "Arbitrum One",
            Chain::Optimism => "OP Mainnet",
            Chain::Base => "Base",
            Chain::Bsc => "BNB Smart Chain",
            Chain::Avalanche => "Avalanche C-Chain",
            Chain::Solana => "Solana",
            Chain::Bitcoin => "Bitcoin",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Solana => ChainFamily::Solana,
            Chain::Bitcoin => ChainFamily::Bitcoin,
            _ => ChainFamily::Evm,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Ethereum | Chain::Arbitrum | Chain::Optimism | Chain::Base => "ETH",
            Chain::Polygon => "POL",
            Chain::Bsc => "BNB",
            Chain::Avalanche => "AVAX",
            Chain::Solana => "SOL",
            Chain::Bitcoin => "BTC",
        }
    }

    pub fn native_name(&self) -> &'static str {
        match self {
            Chain::Ethereum | Chain::Arbitrum | Chain::Optimism | Chain::Base => "Ether",
            Chain::Polygon => "Polygon",
            Chain::Bsc => "BNB",
            Chain::Avalanche => "Avalanche",
            Chain::Solana => "Solana",
            Chain::Bitcoin => "Bitcoin",
        }
    }

    pub fn native_decimals(&self) -> u32 {
        match self.family() {
            ChainFamily::Evm => 18,
            ChainFamily::Solana => 9,
            ChainFamily::Bitcoin => 8,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slug = s.trim().to_lowercase();
        match slug.as_str() {
            "eth" | "mainnet" => return Ok(Chain::Ethereum),
            "matic" => return Ok(Chain::Polygon),
            "bnb" | "binance" => return Ok(Chain::Bsc),
            "avax" => return Ok(Chain::Avalanche),
            "sol" => return Ok(Chain::Solana),
            "btc" => return Ok(Chain::Bitcoin),
            _ => {}
        }
        Chain::ALL
            .into_iter()
            .find(|c| c.as_str() == slug)
            .ok_or_else(|| AppError::not_found("CHAIN_NOT_SUPPORTED", "chain", s))
    }
}
