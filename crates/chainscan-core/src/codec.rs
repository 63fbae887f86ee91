//! Block log entry encoding (JSON).

use serde::Deserialize;

use crate::error::LogError;
use crate::types::Block;

pub fn encode_block(block: &Block) -> Result<Vec<u8>, LogError> {
    Ok(serde_json::to_vec(block)?)
}

pub fn decode_block(payload: &[u8]) -> Result<Block, LogError> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Deserialize)]
struct HeightPeek {
    height: u64,
}

/// Decode only the height of an encoded block.
pub fn peek_height(payload: &[u8]) -> Result<u64, LogError> {
    let peek: HeightPeek = serde_json::from_slice(payload)?;
    Ok(peek.height)
}
