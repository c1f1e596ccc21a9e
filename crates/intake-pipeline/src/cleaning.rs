//! Cleaning stage: deterministic textual normalization.
//!
//! Every string anywhere in the content tree is normalized the same way:
//! CRLF/CR become LF, control and NUL characters are stripped, runs of
//! spaces and tabs collapse to one space, and the whole string is trimmed.

use intake_core::DataRecord;
use serde_json::Value;

/// Clean every string in the record's content.
pub fn clean_record(record: &mut DataRecord) {
    let mut content = record.content.clone();
    clean_value(&mut content);
    if content != record.content {
        record.set_content(content);
    }
}

fn clean_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = clean_text(s),
        Value::Array(items) => {
            for item in items {
                clean_value(item);
            }
        },
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                clean_value(v);
            }
        },
        _ => {},
    }
}

/// Normalize one string.
fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        let ch = match ch {
            '\r' => {
                // CRLF collapses to LF, a bare CR becomes LF.
                if chars.peek() == Some(&'\n') {
                    continue;
                }
                '\n'
            },
            '\t' => ' ',
            c => c,
        };
        if ch == '\n' {
            out.push('\n');
            pending_space = false;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if ch == ' ' {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with('\n') {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use intake_core::RawRecord;
    use serde_json::json;

    use super::*;

    #[test]
    fn whitespace_collapses_and_trims() {
        assert_eq!(clean_text("  Acme \t  Corp  "), "Acme Corp");
    }

    #[test]
    fn control_and_nul_characters_are_stripped() {
        assert_eq!(clean_text("a\u{0000}b\u{0007}c"), "abc");
    }

    #[test]
    fn line_endings_normalize_to_lf() {
        assert_eq!(clean_text("line one\r\nline two\rline three"), "line one\nline two\nline three");
    }

    #[test]
    fn cleaning_descends_into_nested_structures() {
        let mut record = DataRecord::from_raw(RawRecord::new(
            "src",
            json!({
                "name": "  Acme   Corp ",
                "filings": [{"title": "Q1\r\nreport"}],
                "count": 3
            }),
        ));
        clean_record(&mut record);

        assert_eq!(record.content["name"], "Acme Corp");
        assert_eq!(record.content["filings"][0]["title"], "Q1\nreport");
        assert_eq!(record.content["count"], 3);
        assert!(record.invariants_hold());
    }

    #[test]
    fn clean_content_is_untouched() {
        let mut record = DataRecord::from_raw(RawRecord::new("src", json!({"name": "Acme"})));
        let hash = record.content_hash.clone();
        clean_record(&mut record);
        assert_eq!(record.content_hash, hash);
    }
}
