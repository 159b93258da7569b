//! Metadata log (`.log.met`) decoder
//!
//! git-annex stores per-key metadata as an append-only log. Each line
//! starts with a timestamp token (`1769651283s` or
//! `1507541153.566038914s`) followed by alternating field names and
//! `+`/`-` prefixed value tokens. Values containing whitespace or
//! non-ASCII are base64-encoded behind a `!` prefix. Replaying the
//! lines in file order yields the current field values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::{BTreeMap, BTreeSet};

/// Current values of a single key's metadata after replay: field name
/// to lexicographically sorted values.
pub type MetadataSnapshot = BTreeMap<String, Vec<String>>;

/// True for tokens matching `<digits>[.<digits>]s`.
fn is_timestamp_token(token: &str) -> bool {
    let Some(body) = token.strip_suffix('s') else {
        return false;
    };
    let mut parts = body.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match parts.next() {
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    }
}

/// Decode a single value token body (after the `+`/`-` prefix).
///
/// A `!` prefix marks standard base64. Undecodable input degrades to
/// U+FFFD rather than failing the blob.
fn decode_value(raw: &str) -> String {
    match raw.strip_prefix('!') {
        Some(encoded) => match BASE64.decode(encoded) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => "\u{FFFD}".to_string(),
        },
        None => raw.to_string(),
    }
}

/// Parse a `.log.met` blob into its replayed snapshot.
///
/// `+` adds a value to a field's set, `-` removes it; removing an
/// absent value is a no-op. A field token with no following values
/// registers the field with an empty set. Lines that do not start with
/// a timestamp token are skipped: the log is append-only and a partial
/// tail must not poison a rebuild. This function never fails.
pub fn parse_metadata_log(content: &[u8]) -> MetadataSnapshot {
    let text = String::from_utf8_lossy(content);
    let mut state: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some(first) if is_timestamp_token(first) => {}
            _ => continue,
        }

        let mut current_field: Option<String> = None;
        for token in tokens {
            if let Some(rest) = token.strip_prefix('+') {
                if let Some(field) = &current_field {
                    state.entry(field.clone()).or_default().insert(decode_value(rest));
                }
            } else if let Some(rest) = token.strip_prefix('-') {
                if let Some(field) = &current_field {
                    let value = decode_value(rest);
                    state.entry(field.clone()).or_default().remove(&value);
                }
            } else {
                state.entry(token.to_string()).or_default();
                current_field = Some(token.to_string());
            }
        }
    }

    state
        .into_iter()
        .map(|(field, values)| (field, values.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> MetadataSnapshot {
        parse_metadata_log(content.as_bytes())
    }

    #[test]
    fn single_field_single_value() {
        let result = parse("1769651283s artist +AphexTwin\n");
        assert_eq!(result["artist"], vec!["AphexTwin"]);
    }

    #[test]
    fn base64_value_and_multiple_fields() {
        let result = parse("1769651283s artist +!Qm9hcmRzIG9mIENhbmFkYQ== genre +IDM\n");
        assert_eq!(result["artist"], vec!["Boards of Canada"]);
        assert_eq!(result["genre"], vec!["IDM"]);
    }

    #[test]
    fn multi_value_field_sorted() {
        let result = parse("1769651283s genre +Ambient +IDM +Downtempo\n");
        assert_eq!(result["genre"], vec!["Ambient", "Downtempo", "IDM"]);
    }

    #[test]
    fn replay_removes_values() {
        let result = parse("1769651283s genre +Ambient +IDM\n1769651284s genre -IDM\n");
        assert_eq!(result["genre"], vec!["Ambient"]);
    }

    #[test]
    fn remove_before_add_is_noop() {
        let result = parse("1769651283s genre -IDM\n1769651284s genre +IDM\n");
        assert_eq!(result["genre"], vec!["IDM"]);
    }

    #[test]
    fn decimal_timestamp_accepted() {
        let result = parse("1507541153.566038914s rating +5\n");
        assert_eq!(result["rating"], vec!["5"]);
    }

    #[test]
    fn bare_field_registers_empty_set() {
        let result = parse("1769651283s comment\n");
        assert_eq!(result["comment"], Vec::<String>::new());
    }

    #[test]
    fn bare_field_then_next_field_on_same_line() {
        let result = parse("1769651283s comment genre +IDM\n");
        assert_eq!(result["comment"], Vec::<String>::new());
        assert_eq!(result["genre"], vec!["IDM"]);
    }

    #[test]
    fn crate_multi_values() {
        let result = parse("1700000000s artist +Alice title +!SGVsbG8gV29ybGQ= crate +A crate +B\n");
        assert_eq!(result["artist"], vec!["Alice"]);
        assert_eq!(result["title"], vec!["Hello World"]);
        assert_eq!(result["crate"], vec!["A", "B"]);
    }

    #[test]
    fn empty_and_whitespace_content() {
        assert!(parse("").is_empty());
        assert!(parse("   \n  \n").is_empty());
    }

    #[test]
    fn line_without_timestamp_is_skipped() {
        let result = parse("artist +Nope\n1769651283s artist +Yes\n");
        assert_eq!(result["artist"], vec!["Yes"]);
    }

    #[test]
    fn bad_base64_degrades_to_replacement_char() {
        let result = parse("1769651283s title +!%%%invalid\n");
        assert_eq!(result["title"], vec!["\u{FFFD}"]);
    }

    #[test]
    fn invalid_utf8_in_decoded_value_is_replaced() {
        // base64 of bytes [0x41, 0xFF, 0x42]
        let encoded = BASE64.encode([0x41u8, 0xFF, 0x42]);
        let content = format!("1769651283s title +!{encoded}\n");
        let result = parse(&content);
        assert_eq!(result["title"], vec!["A\u{FFFD}B"]);
    }

    #[test]
    fn replay_is_deterministic() {
        let blob = b"1s genre +B +A\n2s genre -A\n3s crate +X\n";
        assert_eq!(parse_metadata_log(blob), parse_metadata_log(blob));
    }

    #[test]
    fn value_token_before_any_field_is_ignored() {
        let result = parse("1769651283s +orphan artist +Real\n");
        assert!(!result.contains_key("+orphan"));
        assert_eq!(result["artist"], vec!["Real"]);
    }
}
