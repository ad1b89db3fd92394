// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Line-protocol codec
//
// Encodes and decodes one point per text line:
//
//   measurement[,tag=value,...] field=value[,field=value,...] [timestamp]
//
// Tags are sorted by key so encoding is deterministic. Field literals
// carry their type: integers get an `i` suffix, strings are double-quoted,
// booleans are `true`/`false`, everything else is a float. The codec is
// its own inverse: decode(encode(p)) == p, including field types.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

/// A typed field value. The type survives the text round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

/// One observation: measurement, tag set, field set, optional
/// nanosecond timestamp. A point without a timestamp is stamped by the
/// target database at ingestion time.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: Option<i64>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn timestamp(mut self, ns: i64) -> Self {
        self.timestamp = Some(ns);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty line")]
    EmptyLine,
    #[error("empty measurement name")]
    EmptyMeasurement,
    #[error("empty tag key or value")]
    EmptyTag,
    #[error("line has no field set")]
    MissingFields,
    #[error("empty field key or value")]
    EmptyField,
    #[error("duplicate key '{0}'")]
    DuplicateKey(String),
    #[error("invalid field value '{0}'")]
    InvalidFieldValue(String),
    #[error("unterminated string value")]
    UnterminatedString,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("unexpected trailing input")]
    TrailingInput,
}

// Delimiters in measurement names, tag keys/values and field keys are
// backslash-escaped. The backslash itself is escaped too, otherwise a
// literal backslash before a delimiter would be ambiguous on decode.
fn escape_name(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

// String field values escape only quotes and backslashes.
fn escape_string_value(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Encode a point as one line of line protocol, without a trailing
/// newline.
pub fn encode(point: &Point) -> String {
    let mut out = String::with_capacity(64);
    escape_name(&mut out, &point.measurement);

    for (key, value) in &point.tags {
        out.push(',');
        escape_name(&mut out, key);
        out.push('=');
        escape_name(&mut out, value);
    }

    out.push(' ');
    let mut first = true;
    for (key, value) in &point.fields {
        if !first {
            out.push(',');
        }
        first = false;
        escape_name(&mut out, key);
        out.push('=');
        match value {
            FieldValue::Integer(v) => {
                let _ = write!(out, "{}i", v);
            }
            FieldValue::Float(v) => {
                let _ = write!(out, "{}", v);
            }
            FieldValue::Boolean(v) => {
                let _ = write!(out, "{}", v);
            }
            FieldValue::String(v) => {
                out.push('"');
                escape_string_value(&mut out, v);
                out.push('"');
            }
        }
    }

    if let Some(ts) = point.timestamp {
        let _ = write!(out, " {}", ts);
    }

    out
}

/// Decode one line of line protocol. Fails with [`ParseError`] on any
/// malformed input; never guesses.
pub fn decode(line: &str) -> Result<Point, ParseError> {
    let mut scanner = Scanner::new(line);

    if scanner.at_end() {
        return Err(ParseError::EmptyLine);
    }

    let measurement = scanner.take_name(&[',', ' '])?;
    if measurement.is_empty() {
        return Err(ParseError::EmptyMeasurement);
    }

    let mut tags = BTreeMap::new();
    while scanner.eat(',') {
        let key = scanner.take_name(&['='])?;
        if !scanner.eat('=') {
            return Err(ParseError::EmptyTag);
        }
        let value = scanner.take_name(&[',', ' '])?;
        if key.is_empty() || value.is_empty() {
            return Err(ParseError::EmptyTag);
        }
        if tags.insert(key.clone(), value).is_some() {
            return Err(ParseError::DuplicateKey(key));
        }
    }

    if !scanner.eat(' ') {
        return Err(ParseError::MissingFields);
    }

    let mut fields = BTreeMap::new();
    loop {
        let key = scanner.take_name(&['='])?;
        if !scanner.eat('=') || key.is_empty() {
            return Err(ParseError::EmptyField);
        }
        let value = scanner.take_field_value()?;
        if fields.insert(key.clone(), value).is_some() {
            return Err(ParseError::DuplicateKey(key));
        }
        if !scanner.eat(',') {
            break;
        }
    }

    let timestamp = if scanner.eat(' ') {
        let raw = scanner.take_rest();
        Some(
            raw.parse::<i64>()
                .map_err(|_| ParseError::InvalidTimestamp(raw))?,
        )
    } else {
        None
    };

    if !scanner.at_end() {
        return Err(ParseError::TrailingInput);
    }

    Ok(Point {
        measurement,
        tags,
        fields,
        timestamp,
    })
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.chars.peek() == Some(&c) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    // Consume up to (not including) the first unescaped stop character.
    // A backslash escapes the following character unconditionally.
    fn take_name(&mut self, stops: &[char]) -> Result<String, ParseError> {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '\\' {
                self.chars.next();
                match self.chars.next() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(ParseError::TrailingInput),
                }
            } else if stops.contains(&c) || c == ' ' {
                // A space always ends a name section even when the caller
                // only asked to stop at '=' or ','.
                break;
            } else {
                self.chars.next();
                out.push(c);
            }
        }
        Ok(out)
    }

    fn take_field_value(&mut self) -> Result<FieldValue, ParseError> {
        if self.chars.peek() == Some(&'"') {
            self.chars.next();
            let mut out = String::new();
            loop {
                match self.chars.next() {
                    Some('\\') => match self.chars.next() {
                        Some(escaped) => out.push(escaped),
                        None => return Err(ParseError::UnterminatedString),
                    },
                    Some('"') => return Ok(FieldValue::String(out)),
                    Some(c) => out.push(c),
                    None => return Err(ParseError::UnterminatedString),
                }
            }
        }

        let mut raw = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == ',' || c == ' ' {
                break;
            }
            self.chars.next();
            raw.push(c);
        }
        if raw.is_empty() {
            return Err(ParseError::EmptyField);
        }

        if let Some(digits) = raw.strip_suffix('i') {
            return digits
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| ParseError::InvalidFieldValue(raw.clone()));
        }
        match raw.as_str() {
            "true" | "t" | "T" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
            "false" | "f" | "F" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
            _ => {}
        }
        raw.parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|_| ParseError::InvalidFieldValue(raw.clone()))
    }

    fn take_rest(&mut self) -> String {
        let mut out = String::new();
        for c in self.chars.by_ref() {
            out.push(c);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_basic() {
        let point = Point::new("cpu")
            .tag("host", "server01")
            .field("usage", FieldValue::Float(0.64))
            .timestamp(1496310265000000000);

        assert_eq!(
            encode(&point),
            "cpu,host=server01 usage=0.64 1496310265000000000"
        );
    }

    #[test]
    fn test_encode_sorts_tags() {
        let point = Point::new("cpu")
            .tag("zone", "b")
            .tag("host", "a")
            .field("value", FieldValue::Integer(1));

        assert_eq!(encode(&point), "cpu,host=a,zone=b value=1i");
    }

    #[test]
    fn test_encode_field_types() {
        let point = Point::new("m")
            .field("b", FieldValue::Boolean(true))
            .field("f", FieldValue::Float(1.5))
            .field("i", FieldValue::Integer(-7))
            .field("s", FieldValue::String("hi \"there\"".to_string()));

        assert_eq!(encode(&point), r#"m b=true,f=1.5,i=-7i,s="hi \"there\"""#);
    }

    #[test]
    fn test_encode_escapes_delimiters() {
        let point = Point::new("my measurement")
            .tag("host name", "a,b=c")
            .field("value", FieldValue::Integer(1))
            .timestamp(42);

        assert_eq!(
            encode(&point),
            r"my\ measurement,host\ name=a\,b\=c value=1i 42"
        );
    }

    #[test]
    fn test_decode_basic() {
        let point = decode("cpu,host=server01 usage=0.64 1496310265000000000").unwrap();
        assert_eq!(point.measurement, "cpu");
        assert_eq!(point.tags.get("host").unwrap(), "server01");
        assert_eq!(point.fields.get("usage"), Some(&FieldValue::Float(0.64)));
        assert_eq!(point.timestamp, Some(1496310265000000000));
    }

    #[test]
    fn test_decode_no_tags_no_timestamp() {
        let point = decode("cpu value=1i").unwrap();
        assert!(point.tags.is_empty());
        assert_eq!(point.fields.get("value"), Some(&FieldValue::Integer(1)));
        assert_eq!(point.timestamp, None);
    }

    #[test]
    fn test_decode_integer_stays_integer() {
        let point = decode("m v=5i").unwrap();
        assert_eq!(point.fields.get("v"), Some(&FieldValue::Integer(5)));

        let point = decode("m v=5").unwrap();
        assert_eq!(point.fields.get("v"), Some(&FieldValue::Float(5.0)));
    }

    #[test]
    fn test_decode_empty_field_value_fails() {
        assert!(decode("cpu,host=a value=").is_err());
    }

    #[test]
    fn test_decode_missing_fields_fails() {
        assert_eq!(decode("cpu,host=a"), Err(ParseError::MissingFields));
        assert_eq!(decode(""), Err(ParseError::EmptyLine));
    }

    #[test]
    fn test_decode_bad_timestamp_fails() {
        assert!(matches!(
            decode("cpu value=1i notatime"),
            Err(ParseError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_decode_unterminated_string_fails() {
        assert_eq!(
            decode(r#"cpu value="oops"#),
            Err(ParseError::UnterminatedString)
        );
    }

    #[test]
    fn test_decode_duplicate_tag_fails() {
        assert!(matches!(
            decode("cpu,a=1,a=2 value=1i"),
            Err(ParseError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_roundtrip() {
        let points = vec![
            Point::new("cpu")
                .tag("host", "server 01")
                .tag("region", "eu=west")
                .field("usage_idle", FieldValue::Float(97.3))
                .field("count", FieldValue::Integer(12))
                .timestamp(1496310265009000000),
            Point::new("disk io,total")
                .field("status", FieldValue::String(r#"path="C:\data""#.to_string()))
                .field("online", FieldValue::Boolean(false)),
            Point::new("m")
                .tag("path", r"C:\temp")
                .field("v", FieldValue::Float(1e-9))
                .timestamp(-42),
        ];

        for point in points {
            let line = encode(&point);
            let decoded = decode(&line).unwrap();
            assert_eq!(decoded, point, "round-trip failed for {}", line);
        }
    }
}
