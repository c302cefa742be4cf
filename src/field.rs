//! Field codec: encodes and decodes one typed value to/from the on-disk byte
//! representation used by every table file (see `file_manager` for the
//! surrounding layout).
//!
//! All multi-byte integers are big-endian. The textual form is the canonical
//! interchange format at the command boundary: callers hand in/receive
//! `String`s, and a `ColumnType` says what strings are legal for a column.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// The four column types this database supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Varchar,
    Boolean,
    Timestamp,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Int => write!(f, "INT"),
            ColumnType::Varchar => write!(f, "VARCHAR"),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

impl ColumnType {
    /// The on-disk type tag used in the schema section of a table file (§4.D).
    pub fn tag(self) -> u8 {
        match self {
            ColumnType::Int => 0x01,
            ColumnType::Varchar => 0x02,
            ColumnType::Timestamp => 0x03,
            ColumnType::Boolean => 0x04,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0x01 => Ok(ColumnType::Int),
            0x02 => Ok(ColumnType::Varchar),
            0x03 => Ok(ColumnType::Timestamp),
            0x04 => Ok(ColumnType::Boolean),
            _ => Err(Error::Unsupported),
        }
    }
}

const MAX_VARCHAR_BYTES: usize = 65_535;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("value {value:?} is not a valid {column_type} value")]
    TypeMismatch { column_type: ColumnType, value: String },
    #[error("column type tag is not recognized")]
    Unsupported,
    #[error("stored data is truncated or an announced length is out of range")]
    CorruptData,
    #[error("VARCHAR value is {len} bytes, exceeding the {MAX_VARCHAR_BYTES} byte limit")]
    ValueTooLong { len: usize },
}

/// Encodes `text` as a value of `column_type`.
///
/// # Errors
/// `TypeMismatch` if `text` does not parse as `column_type`; `ValueTooLong`
/// if a VARCHAR payload exceeds 65,535 bytes.
pub fn encode(column_type: ColumnType, text: &str) -> Result<Vec<u8>, Error> {
    match column_type {
        ColumnType::Int => {
            let v: i32 = text.parse().map_err(|_| Error::TypeMismatch {
                column_type,
                value: text.to_string(),
            })?;
            let mut buf = Vec::with_capacity(4);
            buf.write_i32::<BigEndian>(v).expect("Vec<u8> writes never fail");
            Ok(buf)
        }
        ColumnType::Varchar => {
            let bytes = text.as_bytes();
            if bytes.len() > MAX_VARCHAR_BYTES {
                return Err(Error::ValueTooLong { len: bytes.len() });
            }
            let mut buf = Vec::with_capacity(2 + bytes.len());
            buf.write_u16::<BigEndian>(bytes.len() as u16)
                .expect("Vec<u8> writes never fail");
            buf.extend_from_slice(bytes);
            Ok(buf)
        }
        ColumnType::Boolean => {
            let b = parse_bool(text).ok_or_else(|| Error::TypeMismatch {
                column_type,
                value: text.to_string(),
            })?;
            Ok(vec![if b { 0x01 } else { 0x00 }])
        }
        ColumnType::Timestamp => {
            let millis = parse_timestamp_millis(text).ok_or_else(|| Error::TypeMismatch {
                column_type,
                value: text.to_string(),
            })?;
            let mut buf = Vec::with_capacity(8);
            buf.write_i64::<BigEndian>(millis)
                .expect("Vec<u8> writes never fail");
            Ok(buf)
        }
    }
}

/// Decodes one value of `column_type` starting at `offset` in `bytes`.
///
/// Returns the canonical textual form and the number of bytes consumed.
///
/// # Errors
/// `CorruptData` if `bytes[offset..]` is too short, or a VARCHAR length
/// prefix claims more bytes than remain.
pub fn decode(column_type: ColumnType, bytes: &[u8], offset: usize) -> Result<(String, usize), Error> {
    let slice = bytes.get(offset..).ok_or(Error::CorruptData)?;
    match column_type {
        ColumnType::Int => {
            let mut c = Cursor::new(slice);
            let v = c.read_i32::<BigEndian>().map_err(|_| Error::CorruptData)?;
            Ok((v.to_string(), 4))
        }
        ColumnType::Varchar => {
            let mut c = Cursor::new(slice);
            let len = c.read_u16::<BigEndian>().map_err(|_| Error::CorruptData)? as usize;
            let start = 2;
            let end = start.checked_add(len).ok_or(Error::CorruptData)?;
            let str_bytes = slice.get(start..end).ok_or(Error::CorruptData)?;
            let s = std::str::from_utf8(str_bytes)
                .map_err(|_| Error::CorruptData)?
                .to_string();
            Ok((s, end))
        }
        ColumnType::Boolean => {
            let b = *slice.first().ok_or(Error::CorruptData)?;
            match b {
                0x00 => Ok(("false".to_string(), 1)),
                0x01 => Ok(("true".to_string(), 1)),
                _ => Err(Error::CorruptData),
            }
        }
        ColumnType::Timestamp => {
            let mut c = Cursor::new(slice);
            let millis = c.read_i64::<BigEndian>().map_err(|_| Error::CorruptData)?;
            Ok((format_timestamp_millis(millis), 8))
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Accepts an RFC 3339 instant, or `YYYY-MM-DD HH:MM:SS` (space treated as `T`,
/// assumed UTC). Returns milliseconds since the Unix epoch.
fn parse_timestamp_millis(text: &str) -> Option<i64> {
    let normalized = text.replacen(' ', "T", 1);
    let normalized = if normalized.contains('T') && !has_offset(&normalized) {
        format!("{normalized}Z")
    } else {
        normalized
    };
    parse_rfc3339_millis(&normalized)
}

fn has_offset(s: &str) -> bool {
    // Anything after the date/time separator that looks like a zone marker.
    if let Some(t_pos) = s.find('T') {
        let rest = &s[t_pos + 1..];
        rest.contains('Z') || rest.contains('+') || rest.matches('-').count() > 0
    } else {
        false
    }
}

/// A small RFC 3339 parser covering the subset this crate needs: no leap
/// seconds, optional fractional seconds, `Z` or `+HH:MM`/`-HH:MM` offsets.
fn parse_rfc3339_millis(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    if bytes.len() < 20 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: i64 = s.get(5..7)?.parse().ok()?;
    let day: i64 = s.get(8..10)?.parse().ok()?;
    if s.as_bytes().get(10) != Some(&b'T') {
        return None;
    }
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    let min: i64 = s.get(14..16)?.parse().ok()?;
    let sec: i64 = s.get(17..19)?.parse().ok()?;

    let mut rest = s.get(19..)?;
    let mut millis_frac: i64 = 0;
    if let Some(stripped) = rest.strip_prefix('.') {
        let digits: String = stripped.chars().take_while(|c| c.is_ascii_digit()).collect();
        let consumed = digits.len();
        let mut three = digits.clone();
        three.truncate(3);
        while three.len() < 3 {
            three.push('0');
        }
        millis_frac = three.parse().ok()?;
        rest = &stripped[consumed..];
    }

    let offset_minutes: i64 = if rest == "Z" || rest.is_empty() {
        0
    } else {
        let sign = match rest.as_bytes().first()? {
            b'+' => 1,
            b'-' => -1,
            _ => return None,
        };
        let oh: i64 = rest.get(1..3)?.parse().ok()?;
        let om: i64 = rest.get(4..6)?.parse().ok()?;
        sign * (oh * 60 + om)
    };

    let days = days_from_civil(year, month, day)?;
    let total_seconds = days * 86_400 + hour * 3600 + min * 60 + sec - offset_minutes * 60;
    Some(total_seconds * 1000 + millis_frac)
}

/// Howard Hinnant's days-from-civil algorithm (proleptic Gregorian, days since 1970-01-01).
fn days_from_civil(y: i64, m: i64, d: i64) -> Option<i64> {
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn format_timestamp_millis(millis: i64) -> String {
    let total_seconds = millis.div_euclid(1000);
    let ms = millis.rem_euclid(1000);
    let days = total_seconds.div_euclid(86_400);
    let secs_of_day = total_seconds.rem_euclid(86_400);
    let (y, mo, d) = civil_from_days(days);
    let h = secs_of_day / 3600;
    let mi = (secs_of_day % 3600) / 60;
    let s = secs_of_day % 60;
    if ms == 0 {
        format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z")
    } else {
        format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}.{ms:03}Z")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips() {
        for v in [-1, 0, 1, i32::MIN, i32::MAX] {
            let encoded = encode(ColumnType::Int, &v.to_string()).unwrap();
            assert_eq!(encoded.len(), 4);
            let (text, consumed) = decode(ColumnType::Int, &encoded, 0).unwrap();
            assert_eq!(consumed, 4);
            assert_eq!(text.parse::<i32>().unwrap(), v);
        }
    }

    #[test]
    fn int_rejects_non_numeric_text() {
        assert_eq!(
            encode(ColumnType::Int, "abc"),
            Err(Error::TypeMismatch {
                column_type: ColumnType::Int,
                value: "abc".to_string()
            })
        );
    }

    #[test]
    fn varchar_round_trips_empty_and_unicode() {
        for s in ["", "hello", "héllo wörld", "日本語"] {
            let encoded = encode(ColumnType::Varchar, s).unwrap();
            let (text, consumed) = decode(ColumnType::Varchar, &encoded, 0).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(text, s);
        }
    }

    #[test]
    fn varchar_too_long_is_rejected() {
        let huge = "x".repeat(MAX_VARCHAR_BYTES + 1);
        assert!(matches!(
            encode(ColumnType::Varchar, &huge),
            Err(Error::ValueTooLong { .. })
        ));
    }

    #[test]
    fn boolean_round_trips_case_insensitively() {
        for (input, expected) in [("true", "true"), ("TRUE", "true"), ("False", "false"), ("FALSE", "false")] {
            let encoded = encode(ColumnType::Boolean, input).unwrap();
            let (text, consumed) = decode(ColumnType::Boolean, &encoded, 0).unwrap();
            assert_eq!(consumed, 1);
            assert_eq!(text, expected);
        }
    }

    #[test]
    fn timestamp_accepts_space_separated_form() {
        let encoded = encode(ColumnType::Timestamp, "2024-01-15 10:30:00").unwrap();
        let (text, consumed) = decode(ColumnType::Timestamp, &encoded, 0).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(text, "2024-01-15T10:30:00Z");
    }

    #[test]
    fn timestamp_round_trips_rfc3339_with_offset() {
        let encoded = encode(ColumnType::Timestamp, "2024-01-15T05:30:00+05:00").unwrap();
        let (text, _) = decode(ColumnType::Timestamp, &encoded, 0).unwrap();
        assert_eq!(text, "2024-01-15T00:30:00Z");
    }

    #[test]
    fn decode_short_buffer_is_corrupt_data() {
        assert_eq!(decode(ColumnType::Int, &[0, 1], 0), Err(Error::CorruptData));
        assert_eq!(decode(ColumnType::Varchar, &[0, 5, b'h', b'i'], 0), Err(Error::CorruptData));
    }

    #[test]
    fn from_tag_round_trips_all_variants() {
        for t in [ColumnType::Int, ColumnType::Varchar, ColumnType::Boolean, ColumnType::Timestamp] {
            assert_eq!(ColumnType::from_tag(t.tag()).unwrap(), t);
        }
        assert_eq!(ColumnType::from_tag(0xff), Err(Error::Unsupported));
    }
}
