//! Recover the completed members of a JSON object that is still streaming in.
//!
//! Structured-output models emit one JSON object token by token. Every prefix
//! of that text is turned into the object made of the members whose values
//! are already complete, so callers can act on `{"date":"Date","amo` as
//! `{"date":"Date"}`.

use crate::models::PartialMapping;
use serde_json::Value;

/// Outcome of scanning one token.
enum Scan {
    /// Token ends at this byte offset (exclusive).
    Complete(usize),
    /// Input ran out inside the token.
    Pending,
}

/// Parse the completed members of a (possibly truncated) JSON object.
///
/// Returns `None` when the text is not the start of a JSON object. A member
/// whose value is still being written is left out, as is a bare number at the
/// very end of the text since more digits may follow.
pub fn parse_partial_object(text: &str) -> Option<PartialMapping> {
    let bytes = text.as_bytes();
    let mut pos = skip_ws(bytes, 0);
    let mut object = PartialMapping::new();

    if pos == bytes.len() {
        return Some(object);
    }
    if bytes[pos] != b'{' {
        return None;
    }
    pos += 1;

    loop {
        pos = skip_ws(bytes, pos);
        match bytes.get(pos) {
            None | Some(b'}') => return Some(object),
            Some(b',') => {
                pos += 1;
                continue;
            }
            Some(b'"') => {}
            Some(_) => return None,
        }

        let key_start = pos;
        let key_end = match scan_string(bytes, pos) {
            Scan::Complete(end) => end,
            Scan::Pending => return Some(object),
        };
        let key: String = serde_json::from_str(&text[key_start..key_end]).ok()?;

        pos = skip_ws(bytes, key_end);
        match bytes.get(pos) {
            None => return Some(object),
            Some(b':') => pos += 1,
            Some(_) => return None,
        }

        pos = skip_ws(bytes, pos);
        if pos == bytes.len() {
            return Some(object);
        }
        let value_start = pos;
        let value_end = match scan_value(bytes, pos)? {
            Scan::Complete(end) => end,
            Scan::Pending => return Some(object),
        };
        let value: Value = serde_json::from_str(&text[value_start..value_end]).ok()?;
        object.insert(key, value);
        pos = value_end;
    }
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Scan a string token starting at the opening quote.
fn scan_string(bytes: &[u8], start: usize) -> Scan {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return Scan::Complete(pos + 1),
            _ => pos += 1,
        }
    }
    Scan::Pending
}

/// Scan any JSON value. `None` means the text cannot be JSON.
fn scan_value(bytes: &[u8], start: usize) -> Option<Scan> {
    match bytes[start] {
        b'"' => Some(scan_string(bytes, start)),
        b'{' | b'[' => Some(scan_nested(bytes, start)),
        b'}' | b']' | b',' | b':' => None,
        _ => {
            let mut pos = start;
            while pos < bytes.len() {
                match bytes[pos] {
                    b',' | b'}' | b']' => return Some(Scan::Complete(pos)),
                    b if b.is_ascii_whitespace() => return Some(Scan::Complete(pos)),
                    _ => pos += 1,
                }
            }
            Some(Scan::Pending)
        }
    }
}

/// Scan a balanced object or array.
fn scan_nested(bytes: &[u8], start: usize) -> Scan {
    let mut depth = 0usize;
    let mut pos = start;
    while pos < bytes.len() {
        match bytes[pos] {
            b'"' => match scan_string(bytes, pos) {
                Scan::Complete(end) => {
                    pos = end;
                    continue;
                }
                Scan::Pending => return Scan::Pending,
            },
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Scan::Complete(pos + 1);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    Scan::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(mapping: &PartialMapping) -> Vec<&str> {
        mapping.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn empty_and_open_brace_give_empty_object() {
        assert!(parse_partial_object("").unwrap().is_empty());
        assert!(parse_partial_object("  {").unwrap().is_empty());
    }

    #[test]
    fn truncated_value_is_left_out() {
        let partial = parse_partial_object(r#"{"date":"Date","amount":"Amo"#).unwrap();
        assert_eq!(keys(&partial), vec!["date"]);
        assert_eq!(partial.get("date"), Some(&Value::from("Date")));
    }

    #[test]
    fn truncated_key_and_missing_colon_are_left_out() {
        let partial = parse_partial_object(r#"{"date":"Date","amou"#).unwrap();
        assert_eq!(keys(&partial), vec!["date"]);

        let partial = parse_partial_object(r#"{"date":"Date","amount""#).unwrap();
        assert_eq!(keys(&partial), vec!["date"]);
    }

    #[test]
    fn complete_object_parses_every_member() {
        let partial = parse_partial_object(
            r#"{ "date": "Date", "amount": "Amount", "description": "Memo" }"#,
        )
        .unwrap();
        assert_eq!(partial.len(), 3);
        assert_eq!(partial.get("description"), Some(&Value::from("Memo")));
    }

    #[test]
    fn escapes_are_decoded() {
        let partial = parse_partial_object(r#"{"description":"Memo \"free\" text"}"#).unwrap();
        assert_eq!(
            partial.get("description"),
            Some(&Value::from("Memo \"free\" text"))
        );
    }

    #[test]
    fn trailing_number_waits_for_a_delimiter() {
        let partial = parse_partial_object(r#"{"amount":12"#).unwrap();
        assert!(partial.is_empty());

        let partial = parse_partial_object(r#"{"amount":12,"#).unwrap();
        assert_eq!(partial.get("amount"), Some(&Value::from(12)));
    }

    #[test]
    fn nested_values_are_kept_once_closed() {
        let partial = parse_partial_object(r#"{"extra":{"a":[1,2]},"date":"D"#).unwrap();
        assert_eq!(keys(&partial), vec!["extra"]);

        let partial = parse_partial_object(r#"{"extra":{"a":[1,"#).unwrap();
        assert!(partial.is_empty());
    }

    #[test]
    fn non_object_text_is_rejected() {
        assert!(parse_partial_object("[1,2]").is_none());
        assert!(parse_partial_object("Sure! Here is the mapping").is_none());
        assert!(parse_partial_object(r#"{"date" "Date"}"#).is_none());
    }

    #[test]
    fn multibyte_text_is_handled() {
        let partial = parse_partial_object(r#"{"description":"Beskrivning – överföring"}"#).unwrap();
        assert_eq!(
            partial.get("description"),
            Some(&Value::from("Beskrivning – överföring"))
        );
    }
}
