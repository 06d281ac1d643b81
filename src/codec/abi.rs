//! Account-model call data for the swap contracts
//!
//! Method selectors are keccak256(signature)[..4], computed once into a static
//! table and looked up by the first four bytes of transaction input.

use crate::error::{SwapError, SwapResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// Four-byte method selector
pub type Selector = [u8; 4];

/// Operations understood by the swap contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapMethod {
    Initiate,
    InitiateToken,
    Redeem,
    Refund,
    /// ERC-20 allowance for the token swap contract
    Approve,
}

impl SwapMethod {
    pub const ALL: [SwapMethod; 5] = [
        SwapMethod::Initiate,
        SwapMethod::InitiateToken,
        SwapMethod::Redeem,
        SwapMethod::Refund,
        SwapMethod::Approve,
    ];

    /// Canonical function signature
    pub fn signature(&self) -> &'static str {
        match self {
            SwapMethod::Initiate => "initiate(uint256,bytes20,address)",
            SwapMethod::InitiateToken => "initiate(uint256,bytes20,address,address,uint256)",
            SwapMethod::Redeem => "redeem(bytes32)",
            SwapMethod::Refund => "refund(bytes20)",
            SwapMethod::Approve => "approve(address,uint256)",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SwapMethod::Initiate | SwapMethod::InitiateToken => "initiate",
            SwapMethod::Redeem => "redeem",
            SwapMethod::Refund => "refund",
            SwapMethod::Approve => "approve",
        }
    }

    fn param_types(&self) -> Vec<ParamType> {
        match self {
            SwapMethod::Initiate => vec![
                ParamType::Uint(256),
                ParamType::FixedBytes(20),
                ParamType::Address,
            ],
            SwapMethod::InitiateToken => vec![
                ParamType::Uint(256),
                ParamType::FixedBytes(20),
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
            ],
            SwapMethod::Redeem => vec![ParamType::FixedBytes(32)],
            SwapMethod::Refund => vec![ParamType::FixedBytes(20)],
            SwapMethod::Approve => vec![ParamType::Address, ParamType::Uint(256)],
        }
    }

    pub fn selector(&self) -> Selector {
        SELECTORS[self]
    }

    pub fn is_initiate(&self) -> bool {
        matches!(self, SwapMethod::Initiate | SwapMethod::InitiateToken)
    }
}

lazy_static! {
    static ref SELECTORS: HashMap<SwapMethod, Selector> = SwapMethod::ALL
        .iter()
        .map(|method| (*method, compute_selector(method.signature())))
        .collect();
    static ref METHODS: HashMap<Selector, SwapMethod> = SELECTORS
        .iter()
        .map(|(method, selector)| (*selector, *method))
        .collect();
}

fn compute_selector(signature: &str) -> Selector {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// Identify the swap operation of raw call data, if any
pub fn method_of(input: &[u8]) -> Option<SwapMethod> {
    if input.len() < 4 {
        return None;
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&input[..4]);
    METHODS.get(&selector).copied()
}

/// Typed arguments of a swap contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapCall {
    Initiate {
        expiration: U256,
        secret_hash: [u8; 20],
        participant: Address,
    },
    InitiateToken {
        expiration: U256,
        secret_hash: [u8; 20],
        participant: Address,
        token: Address,
        value: U256,
    },
    Redeem {
        secret: [u8; 32],
    },
    Refund {
        secret_hash: [u8; 20],
    },
    Approve {
        spender: Address,
        value: U256,
    },
}

impl SwapCall {
    pub fn method(&self) -> SwapMethod {
        match self {
            SwapCall::Initiate { .. } => SwapMethod::Initiate,
            SwapCall::InitiateToken { .. } => SwapMethod::InitiateToken,
            SwapCall::Redeem { .. } => SwapMethod::Redeem,
            SwapCall::Refund { .. } => SwapMethod::Refund,
            SwapCall::Approve { .. } => SwapMethod::Approve,
        }
    }

    fn tokens(&self) -> Vec<Token> {
        match self {
            SwapCall::Initiate {
                expiration,
                secret_hash,
                participant,
            } => vec![
                Token::Uint(*expiration),
                Token::FixedBytes(secret_hash.to_vec()),
                Token::Address(*participant),
            ],
            SwapCall::InitiateToken {
                expiration,
                secret_hash,
                participant,
                token,
                value,
            } => vec![
                Token::Uint(*expiration),
                Token::FixedBytes(secret_hash.to_vec()),
                Token::Address(*participant),
                Token::Address(*token),
                Token::Uint(*value),
            ],
            SwapCall::Redeem { secret } => vec![Token::FixedBytes(secret.to_vec())],
            SwapCall::Refund { secret_hash } => vec![Token::FixedBytes(secret_hash.to_vec())],
            SwapCall::Approve { spender, value } => {
                vec![Token::Address(*spender), Token::Uint(*value)]
            }
        }
    }

    /// Selector followed by ABI-encoded arguments
    pub fn encode(&self) -> Vec<u8> {
        let mut data = self.method().selector().to_vec();
        data.extend_from_slice(&abi::encode(&self.tokens()));
        data
    }

    pub fn decode(input: &[u8]) -> SwapResult<Self> {
        let method = method_of(input).ok_or_else(|| {
            SwapError::Codec(format!(
                "unknown method selector 0x{}",
                hex::encode(&input[..input.len().min(4)])
            ))
        })?;

        let tokens = abi::decode(&method.param_types(), &input[4..])
            .map_err(|e| SwapError::Codec(format!("{} arguments: {}", method.name(), e)))?;
        let mut args = ArgReader::new(method, tokens);

        let call = match method {
            SwapMethod::Initiate => SwapCall::Initiate {
                expiration: args.uint()?,
                secret_hash: args.fixed_bytes()?,
                participant: args.address()?,
            },
            SwapMethod::InitiateToken => SwapCall::InitiateToken {
                expiration: args.uint()?,
                secret_hash: args.fixed_bytes()?,
                participant: args.address()?,
                token: args.address()?,
                value: args.uint()?,
            },
            SwapMethod::Redeem => SwapCall::Redeem {
                secret: args.fixed_bytes()?,
            },
            SwapMethod::Refund => SwapCall::Refund {
                secret_hash: args.fixed_bytes()?,
            },
            SwapMethod::Approve => SwapCall::Approve {
                spender: args.address()?,
                value: args.uint()?,
            },
        };
        Ok(call)
    }
}

/// Positional reader over decoded tokens
struct ArgReader {
    method: SwapMethod,
    tokens: std::vec::IntoIter<Token>,
}

impl ArgReader {
    fn new(method: SwapMethod, tokens: Vec<Token>) -> Self {
        Self {
            method,
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self) -> SwapResult<Token> {
        self.tokens
            .next()
            .ok_or_else(|| SwapError::Codec(format!("{}: missing argument", self.method.name())))
    }

    fn mismatch(&self, expected: &str, token: Token) -> SwapError {
        SwapError::Codec(format!(
            "{}: expected {}, got {:?}",
            self.method.name(),
            expected,
            token
        ))
    }

    fn uint(&mut self) -> SwapResult<U256> {
        match self.next()? {
            Token::Uint(value) => Ok(value),
            other => Err(self.mismatch("uint256", other)),
        }
    }

    fn address(&mut self) -> SwapResult<Address> {
        match self.next()? {
            Token::Address(address) => Ok(address),
            other => Err(self.mismatch("address", other)),
        }
    }

    fn fixed_bytes<const N: usize>(&mut self) -> SwapResult<[u8; N]> {
        match self.next()? {
            Token::FixedBytes(bytes) if bytes.len() == N => {
                let mut out = [0u8; N];
                out.copy_from_slice(&bytes);
                Ok(out)
            }
            other => Err(self.mismatch(&format!("bytes{}", N), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn secret_hash() -> [u8; 20] {
        let mut hash = [0u8; 20];
        hex::decode_to_slice("10ff972f3d8181f603aa7f6b4bc172de730fec2b", &mut hash).unwrap();
        hash
    }

    #[test]
    fn test_refund_call_data() {
        let call = SwapCall::Refund {
            secret_hash: secret_hash(),
        };
        assert_eq!(
            format!("0x{}", hex::encode(call.encode())),
            "0x5a8f9b8110ff972f3d8181f603aa7f6b4bc172de730fec2b000000000000000000000000"
        );
    }

    #[test]
    fn test_selectors_are_unique() {
        let unique: std::collections::HashSet<_> =
            SwapMethod::ALL.iter().map(|m| m.selector()).collect();
        assert_eq!(unique.len(), SwapMethod::ALL.len());
    }

    #[test]
    fn test_initiate_token_decodes_to_same_arguments() {
        let call = SwapCall::InitiateToken {
            expiration: U256::from(1_522_591_716u64),
            secret_hash: secret_hash(),
            participant: Address::from_str("0xd867f293Ba129629a9f9355fa285B8D3711a9092").unwrap(),
            token: Address::from_str("0x53E546387A0d054e7FF127923254c0a679DA6DBf").unwrap(),
            value: U256::from(100),
        };
        let data = call.encode();

        assert_eq!(method_of(&data), Some(SwapMethod::InitiateToken));
        assert_eq!(SwapCall::decode(&data).unwrap(), call);
    }

    #[test]
    fn test_spend_and_approve_calls_decode() {
        let calls = [
            SwapCall::Redeem { secret: [0x1e; 32] },
            SwapCall::Refund {
                secret_hash: secret_hash(),
            },
            SwapCall::Approve {
                spender: Address::from_str("0x7657Ca877Fac31D20528B473162E39B6E152fd2e").unwrap(),
                value: U256::exp10(18),
            },
        ];
        for call in calls {
            let data = call.encode();
            assert_eq!(method_of(&data), Some(call.method()));
            assert_eq!(SwapCall::decode(&data).unwrap(), call);
        }
    }

    #[test]
    fn test_unknown_selector() {
        let err = SwapCall::decode(&[0xde, 0xad, 0xbe, 0xef, 0x00]).unwrap_err();
        assert!(matches!(err, SwapError::Codec(_)));
        assert_eq!(method_of(&[0x01]), None);
    }

    #[test]
    fn test_truncated_arguments() {
        let mut data = SwapCall::Redeem { secret: [7u8; 32] }.encode();
        data.truncate(20);
        assert!(SwapCall::decode(&data).is_err());
    }
}
