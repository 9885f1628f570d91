//! Compact binary encoding for property values and label sets, used by the
//! durable backend's BLOB columns. Every primitive and container value
//! round-trips bit-exactly; temporal values are stored as their ISO-8601
//! text form rather than raw integers, trading a few bytes for a format
//! that is readable with any SQLite browser.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use corvusdb_api::{Crs, Duration, Point, TimeValue, Value};
use ordered_float::OrderedFloat;

#[derive(Debug)]
pub enum DecodeError {
    Empty,
    InvalidLength,
    InvalidUtf8,
    InvalidTemporal,
    UnknownType(u8),
    UnknownCrs(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty value bytes"),
            DecodeError::InvalidLength => write!(f, "invalid value length"),
            DecodeError::InvalidUtf8 => write!(f, "invalid utf-8 in string value"),
            DecodeError::InvalidTemporal => write!(f, "invalid temporal value"),
            DecodeError::UnknownType(t) => write!(f, "unknown value type tag: {t}"),
            DecodeError::UnknownCrs(c) => write!(f, "unknown crs tag: {c}"),
        }
    }
}

impl std::error::Error for DecodeError {}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_DATE: u8 = 5;
const TAG_TIME: u8 = 6;
const TAG_DATETIME: u8 = 7;
const TAG_DURATION: u8 = 8;
const TAG_POINT: u8 = 9;
const TAG_DISTANCE: u8 = 10;
const TAG_LIST: u8 = 11;
const TAG_MAP: u8 = 12;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.0.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STRING);
            write_string(out, s);
        }
        Value::Date(d) => {
            out.push(TAG_DATE);
            write_string(out, &d.format("%Y-%m-%d").to_string());
        }
        Value::Time(t) => {
            out.push(TAG_TIME);
            let text = match t.offset {
                Some(off) => format!("{}{}", t.time.format("%H:%M:%S%.f"), format_offset(off)),
                None => t.time.format("%H:%M:%S%.f").to_string(),
            };
            write_string(out, &text);
        }
        Value::DateTime(dt) => {
            out.push(TAG_DATETIME);
            write_string(out, &dt.to_rfc3339());
        }
        Value::Duration(d) => {
            out.push(TAG_DURATION);
            write_string(out, &d.to_iso8601());
        }
        Value::Point(p) => {
            out.push(TAG_POINT);
            let crs_tag: u8 = match p.crs {
                Crs::Cartesian => 0,
                Crs::Cartesian3D => 1,
                Crs::Wgs84 => 2,
            };
            out.push(crs_tag);
            out.extend_from_slice(&p.a.to_le_bytes());
            out.extend_from_slice(&p.b.to_le_bytes());
            match p.c {
                Some(c) => {
                    out.push(1);
                    out.extend_from_slice(&c.to_le_bytes());
                }
                None => out.push(0),
            }
        }
        Value::Distance(d) => {
            out.push(TAG_DISTANCE);
            out.extend_from_slice(&d.0.to_le_bytes());
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(map) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (k, v) in map {
                write_string(out, k);
                encode_into(v, out);
            }
        }
        Value::Node(_) | Value::Edge(_) | Value::Path(_) => {
            // Graph-shaped values never live in a property slot; callers
            // that might hand us one have a bug upstream.
            panic!("attempted to encode a graph-shaped value as a property");
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut pos = 0usize;
    let value = decode_at(bytes, &mut pos)?;
    Ok(value)
}

fn decode_at(bytes: &[u8], pos: &mut usize) -> Result<Value, DecodeError> {
    let tag = *bytes.get(*pos).ok_or(DecodeError::Empty)?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => {
            let b = *bytes.get(*pos).ok_or(DecodeError::InvalidLength)?;
            *pos += 1;
            Ok(Value::Bool(b != 0))
        }
        TAG_INT => {
            let v = read_i64(bytes, pos)?;
            Ok(Value::Int(v))
        }
        TAG_FLOAT => {
            let v = read_f64(bytes, pos)?;
            Ok(Value::Float(OrderedFloat(v)))
        }
        TAG_STRING => Ok(Value::Str(read_string(bytes, pos)?)),
        TAG_DATE => {
            let text = read_string(bytes, pos)?;
            let d = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_err(|_| DecodeError::InvalidTemporal)?;
            Ok(Value::Date(d))
        }
        TAG_TIME => {
            let text = read_string(bytes, pos)?;
            Ok(Value::Time(parse_time_value(&text)?))
        }
        TAG_DATETIME => {
            let text = read_string(bytes, pos)?;
            let dt = DateTime::parse_from_rfc3339(&text).map_err(|_| DecodeError::InvalidTemporal)?;
            Ok(Value::DateTime(dt))
        }
        TAG_DURATION => {
            let text = read_string(bytes, pos)?;
            let d = Duration::parse(&text).ok_or(DecodeError::InvalidTemporal)?;
            Ok(Value::Duration(d))
        }
        TAG_POINT => {
            let crs_tag = *bytes.get(*pos).ok_or(DecodeError::InvalidLength)?;
            *pos += 1;
            let crs = match crs_tag {
                0 => Crs::Cartesian,
                1 => Crs::Cartesian3D,
                2 => Crs::Wgs84,
                other => return Err(DecodeError::UnknownCrs(other)),
            };
            let a = read_f64(bytes, pos)?;
            let b = read_f64(bytes, pos)?;
            let has_c = *bytes.get(*pos).ok_or(DecodeError::InvalidLength)?;
            *pos += 1;
            let c = if has_c != 0 { Some(read_f64(bytes, pos)?) } else { None };
            Ok(Value::Point(Point { crs, a, b, c }))
        }
        TAG_DISTANCE => {
            let v = read_f64(bytes, pos)?;
            Ok(Value::Distance(OrderedFloat(v)))
        }
        TAG_LIST => {
            let len = read_u32(bytes, pos)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_at(bytes, pos)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let len = read_u32(bytes, pos)? as usize;
            let mut map = BTreeMap::new();
            for _ in 0..len {
                let key = read_string(bytes, pos)?;
                let value = decode_at(bytes, pos)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        other => Err(DecodeError::UnknownType(other)),
    }
}

fn format_offset(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
}

fn parse_time_value(text: &str) -> Result<TimeValue, DecodeError> {
    if let Some(split) = text.find(['+', '-']).filter(|&i| i > 0) {
        let (time_part, offset_part) = text.split_at(split);
        let time = NaiveTime::parse_from_str(time_part, "%H:%M:%S%.f")
            .map_err(|_| DecodeError::InvalidTemporal)?;
        let offset = parse_offset(offset_part)?;
        Ok(TimeValue { time, offset: Some(offset) })
    } else {
        let time = NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .map_err(|_| DecodeError::InvalidTemporal)?;
        Ok(TimeValue { time, offset: None })
    }
}

fn parse_offset(text: &str) -> Result<FixedOffset, DecodeError> {
    let sign = if text.starts_with('-') { -1 } else { 1 };
    let rest = &text[1..];
    let mut parts = rest.split(':');
    let hours: i32 = parts.next().and_then(|s| s.parse().ok()).ok_or(DecodeError::InvalidTemporal)?;
    let minutes: i32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let total = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total).ok_or(DecodeError::InvalidTemporal)
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let len = read_u32(bytes, pos)? as usize;
    let slice = bytes.get(*pos..*pos + len).ok_or(DecodeError::InvalidLength)?;
    *pos += len;
    String::from_utf8(slice.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    let v = u32::from_le_bytes(bytes.get(*pos..*pos + 4).ok_or(DecodeError::InvalidLength)?.try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_i64(bytes: &[u8], pos: &mut usize) -> Result<i64, DecodeError> {
    let v = i64::from_le_bytes(bytes.get(*pos..*pos + 8).ok_or(DecodeError::InvalidLength)?.try_into().unwrap());
    *pos += 8;
    Ok(v)
}

fn read_f64(bytes: &[u8], pos: &mut usize) -> Result<f64, DecodeError> {
    let v = f64::from_le_bytes(bytes.get(*pos..*pos + 8).ok_or(DecodeError::InvalidLength)?.try_into().unwrap());
    *pos += 8;
    Ok(v)
}

/// Encodes a node's label set, in insertion order, for the `nodes` table.
pub fn encode_labels(labels: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(labels.len() as u32).to_le_bytes());
    for label in labels {
        write_string(&mut out, label);
    }
    out
}

pub fn decode_labels(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut pos = 0usize;
    let len = read_u32(bytes, &mut pos)? as usize;
    let mut labels = Vec::with_capacity(len);
    for _ in 0..len {
        labels.push(read_string(bytes, &mut pos)?);
    }
    Ok(labels)
}

/// Encodes a property map for the `nodes`/`edges` table's `properties` blob.
pub fn encode_properties(props: &BTreeMap<String, Value>) -> Vec<u8> {
    encode(&Value::Map(props.clone()))
}

pub fn decode_properties(bytes: &[u8]) -> Result<BTreeMap<String, Value>, DecodeError> {
    match decode(bytes)? {
        Value::Map(m) => Ok(m),
        _ => Err(DecodeError::InvalidLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvusdb_api::Point;

    fn round_trip(v: Value) {
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn round_trips_scalars() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Int(-42));
        round_trip(Value::float(1.25));
        round_trip(Value::Str("hello".into()));
    }

    #[test]
    fn round_trips_date() {
        round_trip(Value::Date(NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()));
    }

    #[test]
    fn round_trips_duration() {
        round_trip(Value::Duration(Duration::new(14, 3, 14706, 0)));
    }

    #[test]
    fn round_trips_point() {
        round_trip(Value::Point(Point::cartesian(1.0, 2.0)));
        round_trip(Value::Point(Point::wgs84(51.5, -0.1, None)));
    }

    #[test]
    fn round_trips_nested_list_and_map() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::List(vec![Value::Bool(true), Value::Null]));
        round_trip(Value::Map(map));
    }

    #[test]
    fn int_never_decodes_as_float() {
        let encoded = encode(&Value::Int(7));
        match decode(&encoded).unwrap() {
            Value::Int(7) => {}
            other => panic!("expected Int(7), got {other:?}"),
        }
    }
}
