//! UTXO script codec and HTLC templates
//!
//! HTLC script:
//! ```text
//! OP_IF
//!     OP_RIPEMD160 <secret_hash> OP_EQUALVERIFY OP_DUP OP_HASH160 <recipient_pkh>
//! OP_ELSE
//!     <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <sender_pkh>
//! OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! Redeem: `<sig> <pubkey> <secret> OP_1 <script>`
//! Refund: `<sig> <pubkey> OP_0 <script>`

use crate::error::{SwapError, SwapResult};

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CLTV as OP_CHECKLOCKTIMEVERIFY, OP_CHECKSIG, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY,
    OP_HASH160, OP_IF, OP_PUSHBYTES_0, OP_PUSHNUM_1, OP_RIPEMD160,
};
use bitcoin::script::{Builder, Instruction, PushBytes, Script, ScriptBuf};
use bitcoin::{PubkeyHash, ScriptHash};

/// Parameters committed to by an HTLC script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcTemplate {
    pub secret_hash: [u8; 20],
    pub recipient_pkh: [u8; 20],
    pub sender_pkh: [u8; 20],
    pub lock_time: LockTime,
}

impl HtlcTemplate {
    pub fn to_script(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_RIPEMD160)
            .push_slice(self.secret_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.recipient_pkh)
            .push_opcode(OP_ELSE)
            .push_int(i64::from(self.lock_time.to_consensus_u32()))
            .push_opcode(OP_CHECKLOCKTIMEVERIFY)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.sender_pkh)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Match a script against the HTLC template
    ///
    /// The four pushed values are read back and the script is rebuilt from
    /// them, so only the exact minimal encoding of the template matches.
    pub fn from_script(script: &Script) -> Option<Self> {
        let instructions = script
            .instructions()
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        let pushes: Vec<&Instruction> = instructions
            .iter()
            .filter(|instruction| instruction.push_bytes().is_some())
            .collect();
        let [secret_hash, recipient, lock_time, sender] = pushes.as_slice() else {
            return None;
        };

        let template = Self {
            secret_hash: secret_hash.push_bytes()?.as_bytes().try_into().ok()?,
            recipient_pkh: recipient.push_bytes()?.as_bytes().try_into().ok()?,
            sender_pkh: sender.push_bytes()?.as_bytes().try_into().ok()?,
            lock_time: LockTime::from_consensus(u32::try_from(lock_time.script_num()?).ok()?),
        };
        (template.to_script().as_bytes() == script.as_bytes()).then_some(template)
    }

    /// P2SH hash of the template script
    pub fn script_hash(&self) -> [u8; 20] {
        self.to_script().script_hash().to_byte_array()
    }
}

/// Which branch of the HTLC a spending input takes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtlcSpend {
    Redeem { pushes: Vec<Vec<u8>> },
    Refund,
}

/// Classify an input's scriptSig as an HTLC spend, returning the spend and the revealed template
pub fn classify_spend(script_sig: &Script) -> Option<(HtlcSpend, HtlcTemplate)> {
    let instructions = script_sig
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let (redeem_script, rest) = instructions.split_last()?;
    let redeem_script = Script::from_bytes(redeem_script.push_bytes()?.as_bytes());
    let template = HtlcTemplate::from_script(redeem_script)?;

    let spend = match rest.last()? {
        Instruction::Op(op) if *op == OP_PUSHNUM_1 => HtlcSpend::Redeem {
            pushes: rest
                .iter()
                .filter_map(|instruction| instruction.push_bytes())
                .map(|data| data.as_bytes().to_vec())
                .collect(),
        },
        Instruction::PushBytes(data) if data.is_empty() => HtlcSpend::Refund,
        _ => return None,
    };
    Some((spend, template))
}

fn push_bytes(data: &[u8]) -> SwapResult<&PushBytes> {
    <&PushBytes>::try_from(data)
        .map_err(|e| SwapError::Codec(format!("push of {} bytes: {}", data.len(), e)))
}

pub fn redeem_script_sig(
    signature: &[u8],
    pubkey: &[u8],
    secret: &[u8],
    script: &Script,
) -> SwapResult<ScriptBuf> {
    Ok(Builder::new()
        .push_slice(push_bytes(signature)?)
        .push_slice(push_bytes(pubkey)?)
        .push_slice(push_bytes(secret)?)
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(push_bytes(script.as_bytes())?)
        .into_script())
}

pub fn refund_script_sig(signature: &[u8], pubkey: &[u8], script: &Script) -> SwapResult<ScriptBuf> {
    Ok(Builder::new()
        .push_slice(push_bytes(signature)?)
        .push_slice(push_bytes(pubkey)?)
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(push_bytes(script.as_bytes())?)
        .into_script())
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*pubkey_hash))
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(*script_hash))
}
