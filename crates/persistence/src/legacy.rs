//! Line-based key/value save format written by the first release.
//!
//! ```text
//! coins=1234
//! total_taps=56
//! upgrades=cursor:3;grandma:1
//! ```
//!
//! The format has no escaping, so ids containing `:`, `;`, `=` or whitespace
//! are refused on encode. Decoding is lenient: malformed upgrade entries are
//! skipped rather than failing the whole save.

use crate::{PersistError, PersistedSnapshot, SNAPSHOT_VERSION};
use clicker_core::is_portable_id;
use std::collections::BTreeMap;
use tracing::debug;

const COINS_KEY: &str = "coins";
const TOTAL_TAPS_KEY: &str = "total_taps";
const UPGRADES_KEY: &str = "upgrades";

/// Encode owned counts as `id:count;id:count`.
pub fn encode_owned_counts(counts: &BTreeMap<String, u32>) -> Result<String, PersistError> {
    let mut parts = Vec::with_capacity(counts.len());
    for (id, count) in counts {
        if !is_portable_id(id) {
            return Err(PersistError::InvalidId(id.clone()));
        }
        parts.push(format!("{id}:{count}"));
    }
    Ok(parts.join(";"))
}

/// Decode `id:count;id:count`, skipping entries that do not parse.
pub fn decode_owned_counts(text: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for entry in text.split(';').filter(|e| !e.is_empty()) {
        let mut fields = entry.split(':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(id), Some(count), None) if !id.is_empty() => match count.trim().parse::<u32>() {
                Ok(n) => {
                    counts.insert(id.to_string(), n);
                }
                Err(_) => debug!(entry, "skipping legacy entry with bad count"),
            },
            _ => debug!(entry, "skipping malformed legacy entry"),
        }
    }
    counts
}

/// Encode a snapshot in the legacy document format.
///
/// `saved_at` has no legacy representation and is dropped.
pub fn encode(snapshot: &PersistedSnapshot) -> Result<String, PersistError> {
    let upgrades = encode_owned_counts(&snapshot.owned_counts)?;
    Ok(format!(
        "{COINS_KEY}={}\n{TOTAL_TAPS_KEY}={}\n{UPGRADES_KEY}={upgrades}\n",
        snapshot.balance, snapshot.total_taps
    ))
}

/// Decode a legacy document.
///
/// Missing keys default like the first release did. A document with no
/// recognised key, or with a non-numeric coin or tap value, is malformed.
pub fn decode(text: &str) -> Result<PersistedSnapshot, PersistError> {
    let mut balance = None;
    let mut total_taps = None;
    let mut upgrades = None;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            return Err(PersistError::Malformed(format!("expected key=value, got {line:?}")));
        };
        match key.trim() {
            COINS_KEY => balance = Some(parse_number(COINS_KEY, value)?),
            TOTAL_TAPS_KEY => total_taps = Some(parse_number(TOTAL_TAPS_KEY, value)?),
            UPGRADES_KEY => upgrades = Some(decode_owned_counts(value.trim())),
            other => debug!(key = other, "ignoring unknown legacy key"),
        }
    }
    if balance.is_none() && total_taps.is_none() && upgrades.is_none() {
        return Err(PersistError::Malformed("no legacy keys found".into()));
    }
    Ok(PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        balance: balance.unwrap_or(0),
        total_taps: total_taps.unwrap_or(0),
        owned_counts: upgrades.unwrap_or_default(),
        saved_at: None,
    })
}

fn parse_number(key: &str, value: &str) -> Result<u64, PersistError> {
    value.trim().parse().map_err(|_| {
        PersistError::Malformed(format!("{key} is not a non-negative integer: {value:?}"))
    })
}
