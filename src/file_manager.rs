//! Table file manager: the on-disk binary layout for one table and the
//! atomic write protocol that keeps a table file always either fully the
//! old version or fully the new one (§4.D).
//!
//! Layout is a 24-byte header, a schema section, then a row section:
//!
//! ```text
//! offset  size  field
//! 0       2     magic (0xDBF0, big-endian)
//! 2       2     format version (1)
//! 4       8     row count
//! 12      4     column count
//! 16      4     schema section length in bytes (informational)
//! 20      4     reserved (0)
//! 24      ..    schema section: per column, [name_len: u16][name utf8][type_tag: u8]
//! ..      ..    row section: back-to-back `row::encode_row` records
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::field::ColumnType;
use crate::row::{self, Row, RowMeta, Schema};

const MAGIC: u16 = 0xDBF0;
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 24;
const TABLE_EXTENSION: &str = "dat";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error accessing table file: {0}")]
    Io(#[from] std::io::Error),
    #[error("table file is corrupt: {0}")]
    CorruptFile(String),
    #[error("table file has unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("table {0:?} does not exist")]
    NotFound(String),
    #[error(transparent)]
    Row(#[from] row::Error),
}

/// Reads and writes table files under one storage directory, one file per
/// table, using the tmp-write-fsync-rename protocol for durability.
pub struct TableFileManager {
    directory: PathBuf,
}

impl TableFileManager {
    /// Creates the storage directory if missing.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        if let Err(e) = fs::create_dir_all(&directory) {
            log::warn!("could not create storage directory {directory:?} at construction: {e}");
        }
        TableFileManager { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn table_path(&self, table_name: &str) -> PathBuf {
        self.directory.join(format!("{table_name}.{TABLE_EXTENSION}"))
    }

    fn tmp_path(&self, table_name: &str) -> PathBuf {
        self.directory.join(format!("{table_name}.{TABLE_EXTENSION}.tmp"))
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        self.table_path(table_name).is_file()
    }

    /// Lists every table name with a matching `*.dat` file in the storage
    /// directory, excluding `*.dat.tmp`. Corrupt or unrelated files are
    /// skipped, not an error, since listing must survive a
    /// partially-damaged directory (§7).
    pub fn list_tables(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Atomically writes `schema` and `rows` as the entirety of `table_name`'s
    /// file: build the full byte image, write it to a temp file, fsync the
    /// temp file, remove the previous file if any, then rename the temp file
    /// into place. On any failure the tmp file is removed and the original
    /// (if any) is left untouched; a reader never observes a partial file
    /// under the final name.
    pub fn write_table(
        &self,
        table_name: &str,
        schema: &Schema,
        rows: &[(Row, RowMeta)],
    ) -> Result<(), Error> {
        let bytes = encode_table(schema, rows)?;
        let tmp_path = self.tmp_path(table_name);

        let result = (|| -> Result<(), Error> {
            {
                let mut tmp_file = File::create(&tmp_path)?;
                tmp_file.write_all(&bytes)?;
                tmp_file.sync_all()?;
            }
            let final_path = self.table_path(table_name);
            if final_path.exists() {
                fs::remove_file(&final_path)?;
            }
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        } else {
            self.fsync_directory();
            log::info!("wrote table {table_name:?}: {} rows, {} bytes", rows.len(), bytes.len());
        }
        result
    }

    /// Best-effort fsync of the storage directory so the rename above is
    /// itself durable. POSIX directory fsync behavior is platform-dependent
    /// and not portably testable, so failures are logged, not propagated.
    fn fsync_directory(&self) {
        match File::open(&self.directory) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    log::warn!("directory fsync failed for {:?}: {e}", self.directory);
                }
            }
            Err(e) => log::warn!("could not open {:?} for directory fsync: {e}", self.directory),
        }
    }

    /// Reads `table_name`'s file in full. Returns `Ok(None)` if the file is
    /// absent, matching §4.D's "returns None if the file is absent"
    /// contract.
    pub fn read_table(&self, table_name: &str) -> Result<Option<(Schema, Vec<(Row, RowMeta)>)>, Error> {
        let path = self.table_path(table_name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        decode_table(&bytes).map(Some)
    }

    /// The current on-disk size of `table_name`'s file, used to plan how
    /// many fixed-size pages its byte image spans. Unlike `read_table`,
    /// this is only ever called for a table already known to exist (via a
    /// prior `list_tables`), so a missing file here is an error.
    pub fn file_len(&self, table_name: &str) -> Result<u64, Error> {
        let path = self.table_path(table_name);
        let metadata = fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(table_name.to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Ok(metadata.len())
    }

    /// Reads exactly `len` bytes starting at `start` from `table_name`'s
    /// file. Used to fill one buffer-pool page at a time rather than
    /// re-reading the whole file on every cache miss.
    pub fn read_bytes_range(&self, table_name: &str, start: u64, len: usize) -> Result<Vec<u8>, Error> {
        use std::io::{Seek, SeekFrom};
        let path = self.table_path(table_name);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(table_name.to_string())
            } else {
                Error::Io(e)
            }
        })?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Best-effort file removal. Returns whether the file existed.
    pub fn delete_table(&self, table_name: &str) -> Result<bool, Error> {
        let path = self.table_path(table_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn encode_table(schema: &Schema, rows: &[(Row, RowMeta)]) -> Result<Vec<u8>, Error> {
    let mut schema_section = Vec::new();
    for (name, column_type) in schema.columns() {
        schema_section
            .write_u16::<BigEndian>(name.len() as u16)
            .expect("Vec<u8> writes never fail");
        schema_section.extend_from_slice(name.as_bytes());
        schema_section.push(column_type.tag());
    }

    let mut row_section = Vec::new();
    for (row, meta) in rows {
        row_section.extend_from_slice(&row::encode_row(row, schema, *meta)?);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + schema_section.len() + row_section.len());
    out.write_u16::<BigEndian>(MAGIC).expect("Vec<u8> writes never fail");
    out.write_u16::<BigEndian>(FORMAT_VERSION).expect("Vec<u8> writes never fail");
    out.write_u64::<BigEndian>(rows.len() as u64).expect("Vec<u8> writes never fail");
    out.write_u32::<BigEndian>(schema.len() as u32).expect("Vec<u8> writes never fail");
    out.write_u32::<BigEndian>(schema_section.len() as u32)
        .expect("Vec<u8> writes never fail");
    out.write_u32::<BigEndian>(0).expect("Vec<u8> writes never fail"); // reserved
    out.extend_from_slice(&schema_section);
    out.extend_from_slice(&row_section);
    Ok(out)
}

/// Decodes a full table byte image assembled from cached pages or a direct
/// file read; exposed so callers can assemble bytes through the buffer pool
/// and still reuse this module's decode logic.
pub fn decode_table(bytes: &[u8]) -> Result<(Schema, Vec<(Row, RowMeta)>), Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::CorruptFile("file shorter than header".to_string()));
    }
    let mut header = &bytes[0..HEADER_LEN];
    let magic = header.read_u16::<BigEndian>().unwrap();
    if magic != MAGIC {
        return Err(Error::CorruptFile(format!("bad magic {magic:#x}")));
    }
    let version = header.read_u16::<BigEndian>().unwrap();
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let row_count = header.read_u64::<BigEndian>().unwrap() as usize;
    let column_count = header.read_u32::<BigEndian>().unwrap() as usize;
    let schema_bytes = header.read_u32::<BigEndian>().unwrap() as usize;
    let _reserved = header.read_u32::<BigEndian>().unwrap();

    let schema_start = HEADER_LEN;
    let schema_end = schema_start
        .checked_add(schema_bytes)
        .ok_or_else(|| Error::CorruptFile("schema length overflow".to_string()))?;
    let schema_section = bytes
        .get(schema_start..schema_end)
        .ok_or_else(|| Error::CorruptFile("schema section truncated".to_string()))?;

    let mut columns = Vec::with_capacity(column_count);
    let mut cursor = schema_section;
    for _ in 0..column_count {
        let name_len = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| Error::CorruptFile("truncated column name length".to_string()))?
            as usize;
        if cursor.len() < name_len + 1 {
            return Err(Error::CorruptFile("truncated column entry".to_string()));
        }
        let name = std::str::from_utf8(&cursor[..name_len])
            .map_err(|_| Error::CorruptFile("column name is not valid utf-8".to_string()))?
            .to_string();
        cursor = &cursor[name_len..];
        let tag = cursor[0];
        cursor = &cursor[1..];
        let column_type = ColumnType::from_tag(tag)
            .map_err(|_| Error::CorruptFile(format!("unknown column type tag {tag:#x}")))?;
        columns.push((name, column_type));
    }
    if columns.len() != column_count {
        return Err(Error::CorruptFile("column count mismatch".to_string()));
    }
    let schema = Schema::new(columns);

    let mut rows = Vec::with_capacity(row_count);
    let mut offset = schema_end;
    for _ in 0..row_count {
        let (row, meta, consumed) = row::decode_row(&bytes[offset..], &schema)?;
        rows.push((row, meta));
        offset += consumed;
    }
    if offset != bytes.len() {
        return Err(Error::CorruptFile(
            "trailing bytes after declared row count".to_string(),
        ));
    }
    Ok((schema, rows))
}
