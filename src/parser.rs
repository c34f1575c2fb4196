//! Raw block decoding on top of `zebra_chain`, and reduction to [`CompactBlock`].
//!
//! Txids start out as double-SHA256 of each re-encoded transaction. That is
//! right for v1..v4 and wrong for v5, whose ids are defined over a digest
//! tree; [`crate::fetcher::BlockFetcher`] overwrites them with the node's
//! verbose txid list.
use std::io::Cursor;

use bitcoin::{
    hashes::{sha256d, Hash},
    BlockHash, Txid,
};
use zebra_chain::block;
use zebra_chain::serialization::{ZcashDeserialize, ZcashSerialize};
use zebra_chain::transaction::Transaction;

use crate::compact::{
    CompactBlock, CompactOrchardAction, CompactSaplingOutput, CompactSaplingSpend, CompactTx,
    COMPACT_NOTE_SIZE, COMPACT_PROTO_VERSION,
};
use crate::error::ParseError;

/// A decoded block together with the txids the compact form will carry.
#[derive(Debug, Clone)]
pub struct Block {
    inner: block::Block,
    hash: BlockHash,
    txids: Vec<Txid>,
}

/// Decode one block from the front of `data`, returning it with any unconsumed bytes.
pub fn parse_block(data: &[u8]) -> Result<(Block, &[u8]), ParseError> {
    let mut cursor = Cursor::new(data);
    let inner = block::Block::zcash_deserialize(&mut cursor)?;
    let consumed = usize::try_from(cursor.position()).map_or(data.len(), |n| n.min(data.len()));

    let txids = inner
        .transactions
        .iter()
        .map(|tx| derived_txid(tx))
        .collect::<Result<Vec<_>, _>>()?;
    let block = Block {
        hash: BlockHash::from_byte_array(inner.hash().0),
        inner,
        txids,
    };
    Ok((block, &data[consumed..]))
}

fn derived_txid(tx: &Transaction) -> Result<Txid, ParseError> {
    let bytes = tx.zcash_serialize_to_vec()?;
    Ok(Txid::from_raw_hash(sha256d::Hash::hash(&bytes)))
}

impl Block {
    /// Double-SHA256 of the serialized header.
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Parent hash, internal byte order.
    pub fn prev_hash(&self) -> BlockHash {
        BlockHash::from_byte_array(self.inner.header.previous_block_hash.0)
    }

    /// Header timestamp in unix seconds.
    pub fn time(&self) -> u32 {
        // decoded from a u32 field
        self.inner.header.time.timestamp() as u32
    }

    /// Height committed to by the coinbase script (BIP34).
    pub fn height(&self) -> Result<u64, ParseError> {
        self.inner
            .coinbase_height()
            .map(|h| u64::from(h.0))
            .ok_or(ParseError::MissingCoinbaseHeight)
    }

    /// Number of transactions in the block.
    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Txids in block order.
    pub fn txids(&self) -> &[Txid] {
        &self.txids
    }

    /// Txids in block order, for replacing with the node's own list.
    pub fn txids_mut(&mut self) -> &mut [Txid] {
        &mut self.txids
    }

    /// The decoded `zebra_chain` block.
    pub fn inner(&self) -> &block::Block {
        &self.inner
    }

    /// Reduce to the compact form; transactions without shielded elements are dropped.
    pub fn to_compact(&self) -> Result<CompactBlock, ParseError> {
        Ok(CompactBlock {
            proto_version: COMPACT_PROTO_VERSION,
            height: self.height()?,
            hash: self.hash,
            prev_hash: self.prev_hash(),
            time: self.time(),
            vtx: self
                .inner
                .transactions
                .iter()
                .zip(&self.txids)
                .enumerate()
                .filter_map(|(i, (tx, txid))| compact_tx(i, *txid, tx))
                .collect(),
        })
    }
}

fn compact_tx(index: usize, hash: Txid, tx: &Transaction) -> Option<CompactTx> {
    let spends: Vec<_> = tx
        .sapling_nullifiers()
        .map(|nf| CompactSaplingSpend {
            nf: <[u8; 32]>::from(*nf).to_vec(),
        })
        .collect();
    let outputs: Vec<_> = tx
        .sapling_outputs()
        .map(|output| CompactSaplingOutput {
            cmu: output.cm_u.to_bytes().to_vec(),
            ephemeral_key: <[u8; 32]>::from(output.ephemeral_key).to_vec(),
            ciphertext: note_prefix(&<[u8; 580]>::from(output.enc_ciphertext)),
        })
        .collect();
    let actions: Vec<_> = tx
        .orchard_actions()
        .map(|action| CompactOrchardAction {
            nullifier: <[u8; 32]>::from(action.nullifier).to_vec(),
            cmx: <[u8; 32]>::from(action.cm_x).to_vec(),
            ephemeral_key: <[u8; 32]>::from(action.ephemeral_key).to_vec(),
            ciphertext: note_prefix(&<[u8; 580]>::from(action.enc_ciphertext)),
        })
        .collect();

    if spends.is_empty() && outputs.is_empty() && actions.is_empty() {
        return None;
    }
    Some(CompactTx {
        index: index as u64,
        hash,
        fee: 0,
        spends,
        outputs,
        actions,
    })
}

fn note_prefix(ciphertext: &[u8]) -> Vec<u8> {
    ciphertext[..COMPACT_NOTE_SIZE].to_vec()
}
