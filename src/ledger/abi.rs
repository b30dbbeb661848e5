//! Call data for the batch registry contract.
//!
//! The contract surface is fixed: one event announcing a batch and one
//! state-changing function that records it.

use tiny_keccak::{Hasher, Keccak};

/// Interface description of the registry contract.
pub const REGISTRY_ABI: &str = r#"[
	{"anonymous":false,"inputs":[
		{"indexed":true,"internalType":"uint256","name":"startTime","type":"uint256"},
		{"indexed":true,"internalType":"uint256","name":"endTime","type":"uint256"},
		{"indexed":false,"internalType":"string","name":"cid","type":"string"}
	],"name":"IntentsBatchIPFS","type":"event"},
	{"inputs":[
		{"internalType":"uint256","name":"startTime","type":"uint256"},
		{"internalType":"uint256","name":"endTime","type":"uint256"},
		{"internalType":"string","name":"cid","type":"string"}
	],"name":"intentBatchEmit","outputs":[],"stateMutability":"nonpayable","type":"function"}
]"#;

pub const COMMIT_FUNCTION: &str = "intentBatchEmit(uint256,uint256,string)";
pub const BATCH_EVENT: &str = "IntentsBatchIPFS(uint256,uint256,string)";

const WORD: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of the batch event, for matching logs.
pub fn batch_event_topic() -> [u8; 32] {
    keccak256(BATCH_EVENT.as_bytes())
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `intentBatchEmit(startTime, endTime, cid)` call data: selector, two static
/// words, the string offset, then the length-prefixed, zero-padded string.
pub fn encode_commit_call(start_time: u64, end_time: u64, cid: &str) -> Vec<u8> {
    let cid = cid.as_bytes();
    let padded_len = cid.len().div_ceil(WORD) * WORD;
    let mut data = Vec::with_capacity(4 + WORD * 4 + padded_len);

    data.extend_from_slice(&selector(COMMIT_FUNCTION));
    data.extend_from_slice(&uint_word(start_time));
    data.extend_from_slice(&uint_word(end_time));
    data.extend_from_slice(&uint_word((3 * WORD) as u64));
    data.extend_from_slice(&uint_word(cid.len() as u64));
    data.extend_from_slice(cid);
    data.resize(4 + WORD * 4 + padded_len, 0);
    data
}
