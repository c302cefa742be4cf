//! Row codec: composes an ordered schema's fields into one length-prefixed
//! record (§4.B), delegating per-field encode/decode to `field`.
//!
//! A textual `Row` is a column-name → textual-value map; it is the
//! caller-facing representation used at the command boundary (§6). Each
//! on-disk record also carries a `deleted`/`version` metadata pair inherited
//! from the extended row variant the data model reserves space for (§3);
//! every write path in this crate writes `deleted = false, version = 1`, and
//! `decode_row` hands the pair back unmodified so a later caller can tell a
//! tombstoned row from a live one without a file format change.

use std::collections::HashMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::field::{self, ColumnType};

/// A textual row: every key in a schema's column set maps to one value.
pub type Row = HashMap<String, String>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("row is missing required column {0:?}")]
    MissingColumn(String),
    #[error(transparent)]
    Field(#[from] field::Error),
    #[error("stored row is truncated or its announced length does not match its contents")]
    CorruptData,
}

/// An ordered column-name → type mapping. Order is identity: it governs
/// on-disk byte layout and row decode (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Builds a schema from an ordered list of `(name, type)` pairs.
    ///
    /// Column names must be unique; duplicates are a caller bug (the table
    /// service validates this before ever constructing a `Schema`), so this
    /// constructor panics rather than propagating a `Result` for a condition
    /// that should never survive validation.
    pub fn new(columns: Vec<(String, ColumnType)>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for (name, _) in &columns {
            assert!(seen.insert(name.clone()), "duplicate column name {name:?} in schema");
        }
        Schema { columns }
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Per-row metadata carried by the extended row variant (§3). Not produced
/// with any other values by the in-scope write paths; preserved verbatim on
/// round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMeta {
    pub deleted: bool,
    pub version: u64,
}

impl Default for RowMeta {
    fn default() -> Self {
        RowMeta { deleted: false, version: 1 }
    }
}

/// Encodes `row` under `schema` as `[4-byte length][field1]...[fieldN][deleted][version]`.
/// The length prefix covers everything after itself, including the metadata
/// suffix, but not the four length bytes.
///
/// # Errors
/// `MissingColumn` if `row` lacks a key named by `schema`; a `Field` error if
/// a present value does not encode under its column's type. Extra keys in
/// `row` not present in `schema` are silently ignored.
pub fn encode_row(row: &Row, schema: &Schema, meta: RowMeta) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    for (name, column_type) in schema.columns() {
        let text = row.get(name).ok_or_else(|| Error::MissingColumn(name.clone()))?;
        let bytes = field::encode(*column_type, text)?;
        payload.extend_from_slice(&bytes);
    }
    payload.push(if meta.deleted { 0x01 } else { 0x00 });
    payload
        .write_u64::<BigEndian>(meta.version)
        .expect("Vec<u8> writes never fail");

    let mut out = Vec::with_capacity(4 + payload.len());
    out.write_u32::<BigEndian>(payload.len() as u32)
        .expect("Vec<u8> writes never fail");
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes one record at the start of `bytes`, returning the row, its
/// metadata, and the total number of bytes consumed (including the 4-byte
/// length prefix).
///
/// # Errors
/// `CorruptData` if `bytes` is shorter than the announced length, or the
/// cumulative per-field consumption does not equal it; a `Field` error if
/// a field's bytes do not decode under its column's type.
pub fn decode_row(bytes: &[u8], schema: &Schema) -> Result<(Row, RowMeta, usize), Error> {
    if bytes.len() < 4 {
        return Err(Error::CorruptData);
    }
    let announced_len = (&bytes[0..4]).read_u32::<BigEndian>().map_err(|_| Error::CorruptData)? as usize;
    let payload_start = 4;
    let payload_end = payload_start.checked_add(announced_len).ok_or(Error::CorruptData)?;
    let payload = bytes.get(payload_start..payload_end).ok_or(Error::CorruptData)?;

    let mut row = Row::new();
    let mut offset = 0;
    for (name, column_type) in schema.columns() {
        let (text, consumed) = field::decode(*column_type, payload, offset)?;
        offset += consumed;
        row.insert(name.clone(), text);
    }
    let deleted = match payload.get(offset) {
        Some(0x00) => false,
        Some(0x01) => true,
        _ => return Err(Error::CorruptData),
    };
    offset += 1;
    let version = payload.get(offset..offset + 8).ok_or(Error::CorruptData)?;
    let version = (&version[..]).read_u64::<BigEndian>().map_err(|_| Error::CorruptData)?;
    offset += 8;

    if offset != payload.len() {
        return Err(Error::CorruptData);
    }
    Ok((row, RowMeta { deleted, version }, payload_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> Schema {
        Schema::new(vec![
            ("id".to_string(), ColumnType::Int),
            ("name".to_string(), ColumnType::Varchar),
        ])
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn round_trips_a_valid_row() {
        let schema = users_schema();
        let r = row(&[("id", "1"), ("name", "John")]);
        let encoded = encode_row(&r, &schema, RowMeta::default()).unwrap();
        let (decoded, meta, consumed) = decode_row(&encoded, &schema).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(meta, RowMeta::default());
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn preserves_non_default_metadata_on_round_trip() {
        let schema = users_schema();
        let r = row(&[("id", "1"), ("name", "John")]);
        let meta = RowMeta { deleted: true, version: 7 };
        let encoded = encode_row(&r, &schema, meta).unwrap();
        let (_, decoded_meta, _) = decode_row(&encoded, &schema).unwrap();
        assert_eq!(decoded_meta, meta);
    }

    #[test]
    fn missing_column_is_rejected() {
        let schema = users_schema();
        let r = row(&[("id", "1")]);
        assert_eq!(
            encode_row(&r, &schema, RowMeta::default()),
            Err(Error::MissingColumn("name".to_string()))
        );
    }

    #[test]
    fn extra_columns_are_ignored() {
        let schema = users_schema();
        let r = row(&[("id", "1"), ("name", "John"), ("extra", "ignored")]);
        let encoded = encode_row(&r, &schema, RowMeta::default()).unwrap();
        let (decoded, _, _) = decode_row(&encoded, &schema).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn schema_order_governs_byte_layout() {
        let a_then_b = Schema::new(vec![
            ("a".to_string(), ColumnType::Int),
            ("b".to_string(), ColumnType::Int),
        ]);
        let b_then_a = Schema::new(vec![
            ("b".to_string(), ColumnType::Int),
            ("a".to_string(), ColumnType::Int),
        ]);
        let r = row(&[("a", "1"), ("b", "2")]);
        let enc1 = encode_row(&r, &a_then_b, RowMeta::default()).unwrap();
        let enc2 = encode_row(&r, &b_then_a, RowMeta::default()).unwrap();
        assert_ne!(enc1, enc2);
    }

    #[test]
    fn truncated_record_is_corrupt_data() {
        let schema = users_schema();
        let r = row(&[("id", "1"), ("name", "John")]);
        let mut encoded = encode_row(&r, &schema, RowMeta::default()).unwrap();
        encoded.truncate(encoded.len() - 2);
        assert_eq!(decode_row(&encoded, &schema), Err(Error::CorruptData));
    }

    #[test]
    fn length_prefix_mismatch_is_corrupt_data() {
        let schema = users_schema();
        let r = row(&[("id", "1"), ("name", "John")]);
        let mut encoded = encode_row(&r, &schema, RowMeta::default()).unwrap();
        // Lie about the payload length.
        encoded[3] += 1;
        assert_eq!(decode_row(&encoded, &schema), Err(Error::CorruptData));
    }
}
