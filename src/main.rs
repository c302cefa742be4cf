//! Thin demo entry point. Real command sources (TCP acceptor, HTTP
//! gateway, SQL parser) are external collaborators that are not part of
//! this crate; this binary just proves a `TableService` starts, opens its
//! storage directory, and is ready to accept dispatched commands.

use anyhow::Context;
use kvdb::ServerConfig;
use kvdb::TableService;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env();
    log::info!(
        "starting kvdb storage core: storage_directory={:?}, buffer_pool_max_pages={}",
        config.storage_directory,
        config.buffer_pool_max_pages
    );

    let service = TableService::open(&config)
        .with_context(|| format!("failed to open storage directory {:?}", config.storage_directory))?;

    let stats = service.buffer_pool_stats();
    log::info!(
        "storage core ready: {} cached pages (max {}); awaiting an external dispatcher to route commands here",
        stats.cached_pages,
        stats.max_pages
    );
    Ok(())
}
