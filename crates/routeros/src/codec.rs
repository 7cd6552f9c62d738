//! Conversion between typed values and RouterOS script literals.
//!
//! Writes go through [`encode`], which produces text that the device parses
//! back to the same value. Reads come back as `key|type|text` lines framed by
//! `<REC>` and `<END>` markers and are decoded with [`decode_records`].

use crate::error::{Error, Result};
use crate::types::{ItemId, Record, Value};

/// Marker starting a record block in a read response.
pub const RECORD_START: &str = "<REC>";

/// Marker terminating a read response.
pub const RESPONSE_END: &str = "<END>";

const TRUE_WORDS: [&str; 3] = ["yes", "true", "on"];
const FALSE_WORDS: [&str; 3] = ["no", "false", "off"];

fn bool_word(text: &str) -> Option<bool> {
    let lowered = text.to_ascii_lowercase();
    if TRUE_WORDS.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_WORDS.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Interpret a value as a boolean if it is one or spells one.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Str(s) => bool_word(s),
        _ => None,
    }
}

/// Whether a string has the shape of a task-file sentinel (`!`, `! v`,
/// `~ p`, `!~ p`).
pub fn is_sentinel_shaped(text: &str) -> bool {
    text == "!" || text.starts_with("! ") || text.starts_with("~ ") || text.starts_with("!~ ")
}

/// Plain text of a value, as shown to users.
pub fn text(value: &Value) -> String {
    match value {
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Str(s) => s.clone(),
        Value::List(items) => items.iter().map(text).collect::<Vec<_>>().join(","),
        Value::Duration(secs) => format_duration(*secs),
    }
}

/// Canonical text used for equality: boolean spellings collapse to
/// `yes`/`no`, everything else is its plain text.
pub fn canonical(value: &Value) -> String {
    match as_bool(value) {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => match value {
            Value::List(items) => items.iter().map(canonical).collect::<Vec<_>>().join(","),
            other => text(other),
        },
    }
}

fn as_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Duration(secs) => Some(*secs),
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::Str(s) => parse_duration(s),
        _ => None,
    }
}

fn list_items(value: &Value) -> Vec<String> {
    match value {
        Value::List(items) => items.iter().map(canonical).collect(),
        Value::Str(s) if s.is_empty() => Vec::new(),
        Value::Str(s) => s.split(',').map(|part| canonical(&Value::str(part.trim()))).collect(),
        other => vec![canonical(other)],
    }
}

/// Compare a desired value with an actual value canonically.
pub fn values_equal(desired: &Value, actual: &Value) -> bool {
    if matches!(desired, Value::Duration(_)) || matches!(actual, Value::Duration(_)) {
        if let (Some(a), Some(b)) = (as_seconds(desired), as_seconds(actual)) {
            return a == b;
        }
    }
    if matches!(desired, Value::List(_)) || matches!(actual, Value::List(_)) {
        return list_items(desired) == list_items(actual);
    }
    canonical(desired) == canonical(actual)
}

fn quote(raw: &str) -> Result<String> {
    let normalized = raw.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len() + 2);
    out.push('"');
    for c in normalized.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\r\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                return Err(Error::encoding(format!("control character {c:?} in {raw:?}")));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(out)
}

/// Render a value as a device literal for `add`, `set` and filters.
///
/// Booleans and boolean spellings become `yes`/`no`, lists become
/// `[:toarray "a,b"]`, text already starting with `"`, `(` or `[` is passed
/// verbatim so callers can supply expressions, and all other text is quoted.
pub fn encode(value: &Value) -> Result<String> {
    match value {
        Value::Bool(true) => Ok("yes".to_string()),
        Value::Bool(false) => Ok("no".to_string()),
        Value::Int(n) => Ok(n.to_string()),
        Value::Duration(secs) => Ok(format_duration(*secs)),
        Value::Str(s) => {
            if let Some(b) = bool_word(s) {
                return Ok(if b { "yes" } else { "no" }.to_string());
            }
            if s.starts_with(['"', '(', '[']) {
                return Ok(s.clone());
            }
            quote(s)
        }
        Value::List(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if matches!(item, Value::List(_)) {
                    return Err(Error::encoding("nested lists cannot be written"));
                }
                let part = text(item);
                if part.contains(',') {
                    return Err(Error::encoding(format!("list element {part:?} contains ','")));
                }
                parts.push(part);
            }
            Ok(format!("[:toarray {}]", quote(&parts.join(","))?))
        }
    }
}

/// Render text as a quoted string literal, whatever it looks like.
pub fn encode_forced(raw: &str) -> Result<String> {
    quote(raw)
}

/// Render a value for a write, rejecting sentinel-shaped text.
///
/// Such text would read back as a condition rather than a value, so it
/// cannot round-trip through a task file.
pub fn encode_for_write(value: &Value) -> Result<String> {
    check_writable(value)?;
    encode(value)
}

/// Reject values that cannot be written as literals.
pub fn check_writable(value: &Value) -> Result<()> {
    match value {
        Value::Str(s) if is_sentinel_shaped(s) => Err(Error::encoding(format!(
            "{s:?} looks like a condition and cannot be written as a value"
        ))),
        Value::List(items) => items.iter().try_for_each(check_writable),
        _ => Ok(()),
    }
}

/// Decode one value from its device type name and `:tostr` text.
///
/// Returns `None` for the device's empty types (`nothing`, `nil`), which
/// means the parameter is absent.
pub fn decode(type_name: &str, raw: &str) -> Option<Value> {
    match type_name {
        "nothing" | "nil" => None,
        "bool" => Some(Value::Bool(matches!(raw, "true" | "yes"))),
        "num" => Some(raw.parse().map_or_else(|_| Value::str(raw), Value::Int)),
        "time" => Some(parse_duration(raw).map_or_else(|| Value::str(raw), Value::Duration)),
        "array" if raw.is_empty() => Some(Value::List(Vec::new())),
        "array" => Some(Value::List(raw.split(';').map(Value::str).collect())),
        _ => Some(Value::str(raw)),
    }
}

/// Parse a framed read response into records.
///
/// A line that is not `key|type|text` continues the previous text value,
/// which is how multi-line comments come back.
pub fn decode_records(response: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut last_key: Option<String> = None;

    for line in response.lines() {
        let line = line.trim_end_matches('\r');
        if line == RECORD_START {
            records.extend(current.take());
            current = Some(Record::new());
            last_key = None;
            continue;
        }
        if line == RESPONSE_END {
            records.extend(current.take());
            return Ok(records);
        }
        // Output before the first record is banner noise.
        let Some(record) = current.as_mut() else {
            continue;
        };

        let mut parts = line.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(type_name), Some(raw)) if !key.is_empty() => {
                if key == ".id" {
                    record.id = Some(ItemId::new(raw));
                    last_key = None;
                } else {
                    if let Some(value) = decode(type_name, raw) {
                        record.insert(key, value);
                    }
                    last_key = Some(key.to_string());
                }
            }
            _ => match last_key.as_deref().and_then(|k| record.fields.get_mut(k)) {
                Some(Value::Str(text)) => {
                    text.push('\n');
                    text.push_str(line);
                }
                _ => return Err(Error::encoding(format!("malformed response line: {line:?}"))),
            },
        }
    }

    Err(Error::encoding("response ended without an end marker"))
}

/// Parse a RouterOS time literal into seconds.
///
/// Accepts unit forms (`1w2d3h4m5s`, `1h30m`, `500ms`), clock forms
/// (`00:05:00`), their combination (`1w2d03:04:05`) and bare seconds.
/// Sub-second parts are truncated.
pub fn parse_duration(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }

    let (units, clock) = match raw.find(':') {
        Some(colon) => {
            let start = raw[..colon]
                .rfind(|c: char| !c.is_ascii_digit())
                .map_or(0, |i| i + 1);
            (&raw[..start], Some(&raw[start..]))
        }
        None => (raw, None),
    };

    let mut total: u64 = 0;
    let mut seen = false;
    let mut digits = String::new();
    let mut chars = units.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        let factor = match c {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                total += n / 1000;
                seen = true;
                continue;
            }
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total += n * factor;
        seen = true;
    }
    if !digits.is_empty() {
        return None;
    }

    if let Some(clock) = clock {
        let parts: Vec<&str> = clock.split(':').collect();
        let [h, m, s] = parts.as_slice() else {
            return None;
        };
        let h: u64 = h.parse().ok()?;
        let m: u64 = m.parse().ok()?;
        let s: u64 = s.split('.').next()?.parse().ok()?;
        if m >= 60 || s >= 60 {
            return None;
        }
        total += h * 3_600 + m * 60 + s;
        seen = true;
    }

    seen.then_some(total)
}

/// Format seconds as a RouterOS time literal (`1w2d3h4m5s`, `0s`).
pub fn format_duration(secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    let mut rest = secs;
    for (unit, size) in [('w', 604_800), ('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        let n = rest / size;
        rest %= size;
        if n > 0 {
            out.push_str(&n.to_string());
            out.push(unit);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_booleans() {
        assert_eq!(encode(&Value::Bool(true)).unwrap(), "yes");
        assert_eq!(encode(&Value::str("off")).unwrap(), "no");
        assert_eq!(encode(&Value::str("True")).unwrap(), "yes");
    }

    #[test]
    fn test_encode_quotes_and_escapes() {
        assert_eq!(encode(&Value::str("ether1")).unwrap(), "\"ether1\"");
        assert_eq!(
            encode(&Value::str("say \"hi\" to $user\\")).unwrap(),
            r#""say \"hi\" to \$user\\""#
        );
        assert_eq!(encode(&Value::str("a\nb")).unwrap(), r#""a\r\nb""#);
        assert_eq!(encode(&Value::str("")).unwrap(), "\"\"");
    }

    #[test]
    fn test_encode_passes_expressions_verbatim() {
        assert_eq!(encode(&Value::str("[/interface find]")).unwrap(), "[/interface find]");
        assert_eq!(encode(&Value::str("(1 + 2)")).unwrap(), "(1 + 2)");
        assert_eq!(encode(&Value::str("\"quoted\"")).unwrap(), "\"quoted\"");
    }

    #[test]
    fn test_encode_forced_always_quotes() {
        assert_eq!(encode_forced("yes").unwrap(), "\"yes\"");
        assert_eq!(encode_forced("[x]").unwrap(), "\"[x]\"");
    }

    #[test]
    fn test_encode_lists() {
        let list = Value::List(vec![Value::str("ether1"), Value::str("ether2")]);
        assert_eq!(encode(&list).unwrap(), "[:toarray \"ether1,ether2\"]");

        let nested = Value::List(vec![Value::List(vec![])]);
        assert!(encode(&nested).is_err());
    }

    #[test]
    fn test_encode_rejects_control_characters() {
        let err = encode(&Value::str("bell\u{7}")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EncodingError);
    }

    #[test]
    fn test_sentinels_are_not_writable() {
        assert!(encode_for_write(&Value::str("!")).is_err());
        assert!(encode_for_write(&Value::str("! lan")).is_err());
        assert!(encode_for_write(&Value::str("~ ^br")).is_err());
        assert!(encode_for_write(&Value::str("!lan")).is_ok());
    }

    #[test]
    fn test_decode_types() {
        assert_eq!(decode("bool", "true"), Some(Value::Bool(true)));
        assert_eq!(decode("num", "1500"), Some(Value::Int(1500)));
        assert_eq!(decode("time", "1d02:00:00"), Some(Value::Duration(93_600)));
        assert_eq!(
            decode("array", "a;b"),
            Some(Value::List(vec![Value::str("a"), Value::str("b")]))
        );
        assert_eq!(decode("nothing", ""), None);
        assert_eq!(decode("ip", "10.0.0.1"), Some(Value::str("10.0.0.1")));
    }

    #[test]
    fn test_decode_records() {
        let response = "\
<REC>
.id|id|*1
address|str|10.0.0.1/24
disabled|bool|false
comment|str|uplink
second line
<REC>
.id|id|*2
address|str|10.0.1.1/24
<END>
";
        let records = decode_records(response).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, Some(ItemId::new("*1")));
        assert_eq!(records[0].get("disabled"), Some(&Value::Bool(false)));
        assert_eq!(records[0].get("comment"), Some(&Value::str("uplink\nsecond line")));
        assert_eq!(records[1].get("address"), Some(&Value::str("10.0.1.1/24")));
    }

    #[test]
    fn test_decode_records_requires_end_marker() {
        assert!(decode_records("<REC>\nname|str|x\n").is_err());
        assert!(decode_records("<END>\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("1d"), Some(86_400));
        assert_eq!(parse_duration("1h30m"), Some(5_400));
        assert_eq!(parse_duration("00:05:00"), Some(300));
        assert_eq!(parse_duration("1w2d03:04:05"), Some(604_800 + 172_800 + 11_045));
        assert_eq!(parse_duration("1s500ms"), Some(1));
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("ether1"), None);
        assert_eq!(parse_duration("10.0.0.1"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(5_400), "1h30m");
        assert_eq!(format_duration(604_800 + 5), "1w5s");
    }

    #[test]
    fn test_values_equal_canonical() {
        assert!(values_equal(&Value::str("yes"), &Value::Bool(true)));
        assert!(values_equal(&Value::Int(1500), &Value::str("1500")));
        assert!(values_equal(&Value::str("1d"), &Value::Duration(86_400)));
        assert!(values_equal(&Value::str("00:10:00"), &Value::Duration(600)));
        assert!(values_equal(
            &Value::str("ether1,ether2"),
            &Value::List(vec![Value::str("ether1"), Value::str("ether2")])
        ));
        assert!(!values_equal(&Value::str("ether1"), &Value::str("ether2")));
        assert!(!values_equal(&Value::str("1d"), &Value::Duration(60)));
    }
}
