//! Static registry of swappable tokens per account-model chain

use crate::codec::address::unify_account_address;
use crate::config::TokenConfig;
use crate::error::{SwapError, SwapResult};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenDescriptor {
    pub symbol: String,
    /// Checksummed contract address
    pub address: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: Vec<TokenDescriptor>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenDescriptor>) -> Self {
        Self { tokens }
    }

    pub fn from_config(tokens: &[TokenConfig]) -> SwapResult<Self> {
        let tokens = tokens
            .iter()
            .map(|token| {
                Ok(TokenDescriptor {
                    symbol: token.symbol.clone(),
                    address: unify_account_address(&token.address)?,
                    decimals: token.decimals,
                })
            })
            .collect::<SwapResult<Vec<_>>>()?;
        Ok(Self::new(tokens))
    }

    /// Case-insensitive address match
    pub fn by_address(&self, address: &str) -> Option<&TokenDescriptor> {
        self.tokens
            .iter()
            .find(|token| token.address.eq_ignore_ascii_case(address))
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&TokenDescriptor> {
        self.tokens
            .iter()
            .find(|token| token.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn require(&self, address: &str) -> SwapResult<&TokenDescriptor> {
        self.by_address(address)
            .ok_or_else(|| SwapError::UnknownAsset(address.to_string()))
    }
}
