//! Pair whitelist provider.
//!
//! Reads the exchange configuration and returns its trading pairs. The
//! whitelist is only used to size data-fetch progress, so every failure
//! degrades to an empty list.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

const WHITELIST_KEY: &str = "pair_whitelist";
const STATIC_PAIR_LIST: &str = "StaticPairList";

/// Ordered, de-duplicated, non-empty pair names from `path`.
pub fn read_pair_whitelist(path: &Path) -> Vec<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), err = %e, "exchange config unreadable");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(doc) => pairs_from_document(&doc),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "exchange config is not valid JSON");
            Vec::new()
        }
    }
}

/// Locate the whitelist in a parsed exchange configuration.
///
/// Lookup order: the `StaticPairList` entry of `pairlists`, any
/// `pairlists` entry carrying a whitelist, the document root, then the
/// first whitelist found anywhere in the tree.
pub fn pairs_from_document(doc: &Value) -> Vec<String> {
    if let Some(pairlists) = doc.get("pairlists").and_then(Value::as_array) {
        let static_list = pairlists
            .iter()
            .filter(|item| item.get("method").and_then(Value::as_str) == Some(STATIC_PAIR_LIST))
            .find_map(whitelist_of);
        if let Some(list) = static_list.or_else(|| pairlists.iter().find_map(whitelist_of)) {
            return clean(list);
        }
    }
    if let Some(list) = whitelist_of(doc) {
        return clean(list);
    }
    find_first(doc).map(|list| clean(list)).unwrap_or_default()
}

fn whitelist_of(value: &Value) -> Option<&Vec<Value>> {
    value.get(WHITELIST_KEY).and_then(Value::as_array)
}

fn find_first(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Object(map) => whitelist_of(value).or_else(|| map.values().find_map(find_first)),
        Value::Array(items) => items.iter().find_map(find_first),
        _ => None,
    }
}

fn clean(list: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for pair in list.iter().filter_map(Value::as_str) {
        let pair = pair.trim();
        if pair.is_empty() || out.iter().any(|seen| seen == pair) {
            continue;
        }
        out.push(pair.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn static_pair_list_wins() {
        let doc = json!({
            "pair_whitelist": ["ROOT/USDT"],
            "pairlists": [
                {"method": "VolumePairList", "pair_whitelist": ["VOL/USDT"]},
                {"method": "StaticPairList", "pair_whitelist": ["BTC/USDT", "ETH/USDT"]}
            ]
        });
        assert_eq!(pairs_from_document(&doc), vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn falls_back_to_any_pairlist_then_root() {
        let doc = json!({
            "pair_whitelist": ["ROOT/USDT"],
            "pairlists": [{"method": "VolumePairList", "pair_whitelist": ["VOL/USDT"]}]
        });
        assert_eq!(pairs_from_document(&doc), vec!["VOL/USDT"]);

        let doc = json!({"pairlists": [], "pair_whitelist": ["ROOT/USDT"]});
        assert_eq!(pairs_from_document(&doc), vec!["ROOT/USDT"]);
    }

    #[test]
    fn finds_nested_whitelist() {
        let doc = json!({
            "exchange": {"name": "x", "pair_whitelist": ["A/B", "", 3, "A/B", " C/D "]}
        });
        assert_eq!(pairs_from_document(&doc), vec!["A/B", "C/D"]);
    }

    #[test]
    fn missing_or_malformed_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(read_pair_whitelist(&temp.path().join("missing.json")).is_empty());

        let bad = temp.path().join("bad.json");
        fs::write(&bad, "{not json").expect("write");
        assert!(read_pair_whitelist(&bad).is_empty());
    }

    #[test]
    fn reads_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config_exchange.json");
        fs::write(&path, r#"{"exchange":{"pair_whitelist":["BTC/USDT","ETH/USDT"]}}"#)
            .expect("write");
        assert_eq!(read_pair_whitelist(&path), vec!["BTC/USDT", "ETH/USDT"]);
    }
}
