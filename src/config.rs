//! Server configuration: where table files live and how large the buffer
//! pool may grow. Loadable from environment variables with sane defaults,
//! matching the on-disk root and buffer pool capacity surface described
//! for the external collaborators in §6.

use std::path::PathBuf;

use crate::page::DEFAULT_MAX_PAGES;

const STORAGE_DIR_VAR: &str = "KVDB_STORAGE_DIR";
const BUFFER_POOL_MAX_PAGES_VAR: &str = "KVDB_BUFFER_POOL_MAX_PAGES";
const DEFAULT_STORAGE_DIR: &str = "./data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub storage_directory: PathBuf,
    pub buffer_pool_max_pages: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            storage_directory: PathBuf::from(DEFAULT_STORAGE_DIR),
            buffer_pool_max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from environment variables, falling back to
    /// `Default` for anything unset. `KVDB_BUFFER_POOL_MAX_PAGES` that fails
    /// to parse as a positive integer is logged and ignored rather than
    /// rejected, since a malformed knob shouldn't prevent startup.
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();
        if let Ok(dir) = std::env::var(STORAGE_DIR_VAR) {
            config.storage_directory = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(BUFFER_POOL_MAX_PAGES_VAR) {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.buffer_pool_max_pages = n,
                _ => log::warn!(
                    "ignoring invalid {BUFFER_POOL_MAX_PAGES_VAR}={raw:?}, using default {}",
                    config.buffer_pool_max_pages
                ),
            }
        }
        config
    }

    pub fn with_storage_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_directory = dir.into();
        self
    }

    pub fn with_buffer_pool_max_pages(mut self, max_pages: usize) -> Self {
        self.buffer_pool_max_pages = max_pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = ServerConfig::default();
        assert_eq!(config.buffer_pool_max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.storage_directory, PathBuf::from(DEFAULT_STORAGE_DIR));
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = ServerConfig::default()
            .with_storage_directory("/tmp/kvdb-test")
            .with_buffer_pool_max_pages(16);
        assert_eq!(config.storage_directory, PathBuf::from("/tmp/kvdb-test"));
        assert_eq!(config.buffer_pool_max_pages, 16);
    }
}
