//! Spam redaction applied to blocks on their way out to clients.
use std::sync::Arc;

use crate::compact::CompactBlock;

/// Redact note payloads of transactions with more than `threshold` shielded
/// outputs plus actions.
///
/// Returns `block` itself when `threshold` is 0. Otherwise works on a deep
/// copy: cached blocks are shared and must never be modified. Redaction clears
/// the ciphertext and ephemeral key of every Sapling output and the
/// ciphertext, ephemeral key and nullifier of every Orchard action; counts,
/// ids and commitments stay as they were.
pub fn filter_spammy_block(block: Arc<CompactBlock>, threshold: usize) -> Arc<CompactBlock> {
    if threshold == 0 {
        return block;
    }

    let mut copy = CompactBlock::clone(&block);
    for tx in copy
        .vtx
        .iter_mut()
        .filter(|tx| tx.shielded_output_count() > threshold)
    {
        for output in &mut tx.outputs {
            output.ciphertext.clear();
            output.ephemeral_key.clear();
        }
        for action in &mut tx.actions {
            action.ciphertext.clear();
            action.ephemeral_key.clear();
            action.nullifier.clear();
        }
    }
    Arc::new(copy)
}
