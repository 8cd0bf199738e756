// Path: crates/client/src/abi.rs
//! Minimal Solidity ABI codec for the certification contract.
//!
//! Only the shapes the contract uses are supported: `(string, string)`
//! arguments, a `uint256` return value and `Error(string)` revert data.

use auditchain_types::ledger::LedgerCall;
use auditchain_types::report::ContentFingerprint;
use thiserror::Error;

/// `bytes4(keccak256("certifyReport(string,string)"))`.
pub const CERTIFY_REPORT_SELECTOR: [u8; 4] = [0x8a, 0x4f, 0x83, 0x9e];
/// `bytes4(keccak256("reportCount()"))`.
pub const REPORT_COUNT_SELECTOR: [u8; 4] = [0x18, 0x5c, 0x6f, 0x84];
/// `bytes4(keccak256("Error(string)"))`.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

const WORD: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("Invalid hex: {0}")]
    Hex(String),
    #[error("Return data too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("Value does not fit in 64 bits")]
    Overflow,
}

/// Encodes the calldata for `call`.
pub fn encode_call(call: &LedgerCall) -> Vec<u8> {
    match call {
        LedgerCall::CertifyReport {
            timestamp_or_id,
            fingerprint,
        } => {
            let mut out = CERTIFY_REPORT_SELECTOR.to_vec();
            out.extend(encode_strings(&[timestamp_or_id.as_str(), fingerprint.as_str()]));
            out
        }
        LedgerCall::ReportCount => REPORT_COUNT_SELECTOR.to_vec(),
    }
}

/// Encodes a tuple of dynamic `string` arguments: one offset word per
/// argument, then each argument's length word and right-padded bytes.
fn encode_strings(args: &[&str]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();
    let head_len = args.len() * WORD;
    for arg in args {
        head.extend(uint_word((head_len + tail.len()) as u64));
        let bytes = arg.as_bytes();
        tail.extend(uint_word(bytes.len() as u64));
        tail.extend_from_slice(bytes);
        let padding = (WORD - bytes.len() % WORD) % WORD;
        tail.extend(std::iter::repeat(0u8).take(padding));
    }
    head.extend(tail);
    head
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    for (dst, src) in word.iter_mut().skip(WORD - 8).zip(value.to_be_bytes()) {
        *dst = src;
    }
    word
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::Overflow)?;
    data.get(offset..end).ok_or(AbiError::TooShort {
        expected: end,
        got: data.len(),
    })
}

fn word_to_u64(word: &[u8]) -> Result<u64, AbiError> {
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

/// Decodes a single `uint256` return value that fits in 64 bits.
pub fn decode_u64(data: &[u8]) -> Result<u64, AbiError> {
    word_to_u64(read_word(data, 0)?)
}

/// Reads the dynamic `string` whose offset sits in head slot `slot`.
fn read_string(body: &[u8], slot: usize) -> Option<String> {
    let head = read_word(body, slot.checked_mul(WORD)?).ok()?;
    let offset = usize::try_from(word_to_u64(head).ok()?).ok()?;
    let len = usize::try_from(word_to_u64(read_word(body, offset).ok()?).ok()?).ok()?;
    let start = offset.checked_add(WORD)?;
    let bytes = body.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Decodes `Error(string)` revert data. `None` for any other shape.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    read_string(body, 0)
}

/// Decodes transaction input back into the contract call it carries.
/// `None` for any other contract method or malformed arguments.
pub fn decode_call(data: &[u8]) -> Option<LedgerCall> {
    if let Some(body) = data.strip_prefix(&CERTIFY_REPORT_SELECTOR) {
        return Some(LedgerCall::CertifyReport {
            timestamp_or_id: read_string(body, 0)?,
            fingerprint: ContentFingerprint::new(read_string(body, 1)?),
        });
    }
    (data == REPORT_COUNT_SELECTOR).then_some(LedgerCall::ReportCount)
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes hex with or without a `0x` prefix.
pub fn from_hex(s: &str) -> Result<Vec<u8>, AbiError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| AbiError::Hex(e.to_string()))
}

/// Parses a JSON-RPC hex quantity such as `0x1a`.
pub fn parse_quantity(s: &str) -> Result<u64, AbiError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| AbiError::Hex(e.to_string()))
}
