//! Canonical channel-state encoding
//!
//! Both participants must hash the exact same bytes. The canonical form is
//! compact JSON with keys lexicographically sorted at every level, balance
//! keys sorted by symbol, and amounts rendered as fixed-decimal strings.

use sentinel_types::{AssetAmount, ChannelBalances, ChannelId};

use crate::signing::keccak256;

/// Canonical text encoding of `(channelId, turnNum, balances)`
pub fn canonical_state(
    channel_id: &ChannelId,
    turn_num: u64,
    balances: &ChannelBalances,
) -> String {
    let mut entries: Vec<(String, String)> = balances
        .iter()
        .map(|(asset, raw)| {
            (
                asset.symbol().to_string(),
                AssetAmount::new(*raw, *asset).to_display(),
            )
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let balances_json = entries
        .iter()
        .map(|(symbol, amount)| format!("\"{}\":\"{}\"", symbol, amount))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{{\"balances\":{{{}}},\"channelId\":\"{}\",\"turnNum\":{}}}",
        balances_json, channel_id.0, turn_num
    )
}

/// The digest both parties sign: Keccak-256 of the canonical encoding
pub fn state_hash(
    channel_id: &ChannelId,
    turn_num: u64,
    balances: &ChannelBalances,
) -> [u8; 32] {
    keccak256(canonical_state(channel_id, turn_num, balances).as_bytes())
}
