//! Table service: the concurrent in-memory table registry that is the
//! single entry point external collaborators (TCP acceptor, HTTP gateway,
//! SQL parser) call into through the `Dispatcher` trait (§4.E, §6).
//!
//! Registry access is split two ways: a `RwLock` guards which tables
//! exist (read lock for lookups, write lock only while creating or
//! dropping a table), and each table's own `Mutex` guards that table's
//! rows, so two different tables can be mutated concurrently without
//! contending on a single lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::ServerConfig;
use crate::error::DbError;
use crate::field::ColumnType;
use crate::file_manager::{self, TableFileManager};
use crate::page::{BufferPool, Page, PageId, PAGE_SIZE};
use crate::predicate::{self, Predicate};
use crate::row::{Row, RowMeta, Schema};

/// One request an external collaborator can send the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTable { table: String, columns: Vec<(String, ColumnType)> },
    DropTable { table: String },
    Insert { table: String, row: Row },
    Select { table: String, predicate: Predicate },
    /// The EXPLAIN annex is an external collaborator this crate does not
    /// implement; this variant always produces a `NotImplemented` response.
    Explain { query: String },
    /// A liveness check with no storage effect; always answered `Ok`.
    Ping,
}

/// The service's reply to a dispatched `Command`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Rows(Vec<Row>),
    Err { code: u16, message: String },
}

impl From<DbError> for Response {
    fn from(err: DbError) -> Self {
        Response::Err { code: err.code(), message: err.to_string() }
    }
}

/// The seam between this crate and any external command source.
pub trait Dispatcher {
    fn dispatch(&self, command: Command) -> Response;
}

struct TableState {
    schema: Schema,
    rows: Vec<(Row, RowMeta)>,
}

type Registry = Arc<RwLock<HashMap<String, Arc<Mutex<TableState>>>>>;

pub struct TableService {
    file_manager: TableFileManager,
    registry: Registry,
    buffer_pool: Arc<BufferPool>,
}

impl TableService {
    /// Opens the storage directory named by `config`, creating it if
    /// missing, and loads every table file found there into the in-memory
    /// registry. A table file that fails to decode is logged and skipped
    /// rather than aborting startup (§7).
    pub fn open(config: &ServerConfig) -> Result<Self, DbError> {
        std::fs::create_dir_all(&config.storage_directory)
            .map_err(|e| DbError::File(file_manager::Error::Io(e)))?;

        let file_manager = TableFileManager::new(config.storage_directory.clone());
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let buffer_pool = Arc::new(BufferPool::with_writer(
            config.buffer_pool_max_pages,
            make_page_writer(registry.clone(), config.storage_directory.clone()),
        ));

        for name in file_manager.list_tables().map_err(DbError::File)? {
            match load_table_through_pool(&file_manager, &buffer_pool, &name) {
                Ok((schema, rows)) => {
                    registry
                        .write()
                        .expect("registry lock poisoned")
                        .insert(name, Arc::new(Mutex::new(TableState { schema, rows })));
                }
                Err(e) => log::warn!("skipping corrupt table file {name:?} during startup scan: {e}"),
            }
        }

        Ok(TableService { file_manager, registry, buffer_pool })
    }

    pub fn buffer_pool_stats(&self) -> crate::page::PoolStats {
        self.buffer_pool.stats()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.registry.read().expect("registry lock poisoned").contains_key(table)
    }

    pub fn create_table(&self, table: &str, columns: Vec<(String, ColumnType)>) -> Result<(), DbError> {
        validate_schema(table, &columns)?;
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if registry.contains_key(table) {
            return Err(DbError::TableAlreadyExists(table.to_string()));
        }
        let schema = Schema::new(columns);
        self.file_manager.write_table(table, &schema, &[]).map_err(DbError::File)?;
        registry.insert(table.to_string(), Arc::new(Mutex::new(TableState { schema, rows: Vec::new() })));
        log::info!("created table {table:?}");
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<(), DbError> {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if !registry.contains_key(table) {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        self.file_manager.delete_table(table).map_err(DbError::File)?;
        registry.remove(table);
        self.buffer_pool.invalidate_table(table);
        log::info!("dropped table {table:?}");
        Ok(())
    }

    pub fn insert(&self, table: &str, row: Row) -> Result<(), DbError> {
        let state_arc = self.table_handle(table)?;
        let mut state = state_arc.lock().expect("table lock poisoned");
        let snapshot = state.rows.clone();

        state.rows.push((row, RowMeta::default()));
        if let Err(e) = self.file_manager.write_table(table, &state.schema, &state.rows) {
            state.rows = snapshot;
            return Err(DbError::File(e));
        }
        self.buffer_pool.invalidate_table(table);
        Ok(())
    }

    /// Full scan of `table`, filtering out tombstoned rows and any row not
    /// matching `predicate` (§3, §6). Indexed lookups are out of scope;
    /// every `select` walks the whole resident row set.
    pub fn select(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>, DbError> {
        let state_arc = self.table_handle(table)?;
        let state = state_arc.lock().expect("table lock poisoned");
        let mut out = Vec::new();
        for (row, meta) in &state.rows {
            if meta.deleted {
                continue;
            }
            if predicate::matches(predicate, row, &state.schema).map_err(DbError::Predicate)? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    fn table_handle(&self, table: &str) -> Result<Arc<Mutex<TableState>>, DbError> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }
}

impl Dispatcher for TableService {
    fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::CreateTable { table, columns } => match self.create_table(&table, columns) {
                Ok(()) => Response::Ok,
                Err(e) => e.into(),
            },
            Command::DropTable { table } => match self.drop_table(&table) {
                Ok(()) => Response::Ok,
                Err(e) => e.into(),
            },
            Command::Insert { table, row } => match self.insert(&table, row) {
                Ok(()) => Response::Ok,
                Err(e) => e.into(),
            },
            Command::Select { table, predicate } => match self.select(&table, &predicate) {
                Ok(rows) => Response::Rows(rows),
                Err(e) => e.into(),
            },
            Command::Explain { .. } => DbError::NotImplemented.into(),
            Command::Ping => Response::Ok,
        }
    }
}

/// A table or column name must match `[A-Za-z_][A-Za-z0-9_]*` (§3).
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates a table name and its column definitions before a `Schema` is
/// ever constructed: the table name and every column name must match the
/// identifier grammar, and column names must be unique within the schema
/// (`Schema::new` also asserts this, but only as a last-resort safety net —
/// a caller-supplied duplicate must surface as `InvalidSchema`, not a panic).
fn validate_schema(table: &str, columns: &[(String, ColumnType)]) -> Result<(), DbError> {
    if !is_valid_identifier(table) {
        return Err(DbError::InvalidSchema(format!("table name {table:?} is not a valid identifier")));
    }
    let mut seen = std::collections::HashSet::new();
    for (name, _) in columns {
        if !is_valid_identifier(name) {
            return Err(DbError::InvalidSchema(format!("column name {name:?} is not a valid identifier")));
        }
        if !seen.insert(name.as_str()) {
            return Err(DbError::InvalidSchema(format!("duplicate column name {name:?}")));
        }
    }
    Ok(())
}

/// Builds the buffer pool's eviction writer. Since a table file has no
/// sub-file page addressing (§9), committing one dirty page means
/// re-writing the whole owning table through the atomic write path.
fn make_page_writer(registry: Registry, storage_directory: std::path::PathBuf) -> crate::page::PageWriter {
    let file_manager = TableFileManager::new(storage_directory);
    Arc::new(move |page_id: &PageId, _page: &Page| -> Result<(), String> {
        let registry = registry.read().map_err(|_| "registry lock poisoned".to_string())?;
        let state_arc = registry
            .get(&page_id.table_name)
            .ok_or_else(|| format!("table {:?} no longer exists", page_id.table_name))?;
        let state = state_arc.lock().map_err(|_| "table lock poisoned".to_string())?;
        file_manager
            .write_table(&page_id.table_name, &state.schema, &state.rows)
            .map_err(|e| e.to_string())
    })
}

/// Reads `table_name`'s file through the buffer pool, one `PAGE_SIZE` chunk
/// at a time, so repeated reloads of the same table reuse cached pages
/// instead of re-reading the whole file (§4.C, "reads are cache-first").
fn load_table_through_pool(
    file_manager: &TableFileManager,
    pool: &BufferPool,
    table_name: &str,
) -> Result<(Schema, Vec<(Row, RowMeta)>), DbError> {
    let total_len = file_manager.file_len(table_name).map_err(DbError::File)? as usize;
    let num_pages = total_len.div_ceil(PAGE_SIZE).max(1);
    let mut bytes = Vec::with_capacity(total_len);

    for page_number in 0..num_pages {
        let start = page_number * PAGE_SIZE;
        let this_len = PAGE_SIZE.min(total_len.saturating_sub(start));
        let page_id = PageId::new(table_name, page_number as u64);
        let page = pool
            .get_or_load(&page_id, || {
                let chunk = file_manager
                    .read_bytes_range(table_name, start as u64, this_len)
                    .map_err(|e| crate::page::Error::LoadFailed(page_id.clone(), e.to_string()))?;
                let mut buf = vec![0u8; PAGE_SIZE];
                buf[..chunk.len()].copy_from_slice(&chunk);
                Page::from_bytes(buf)
            })
            .map_err(DbError::Page)?;
        bytes.extend_from_slice(&page.as_bytes()[..this_len]);
    }

    file_manager::decode_table(&bytes).map_err(DbError::File)
}
