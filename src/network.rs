//! Per-network Sapling activation heights.
use crate::rpc::BlockchainInfo;

/// Sapling activation height for a chain name as reported by `getblockchaininfo`.
/// Regtest (and unknown chains) return `None`; their height comes from the node.
pub fn sapling_activation_height(chain: &str) -> Option<u64> {
    match chain {
        "main" => Some(419_200),
        "test" => Some(280_000),
        _ => None,
    }
}

/// Height the cache should start at for the node's chain: the node's upgrade
/// table first, then the known heights, then 0. [`crate::LightdInfo`] reports
/// only what the node says.
pub fn activation_height(info: &BlockchainInfo) -> u64 {
    info.sapling_activation_height()
        .or_else(|| sapling_activation_height(&info.chain))
        .unwrap_or(0)
}
