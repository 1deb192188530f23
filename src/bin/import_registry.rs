//! Refreshes the RNC cache from the DGII taxpayer registry archive.
//!
//! Usage: `import_registry [path/to/archive.zip]`. Without an argument the
//! archive is downloaded from `REGISTRY_ARCHIVE_URL`.

use std::path::PathBuf;
use std::sync::Arc;

use rnc_lookup_api::cache_store::PgCacheStore;
use rnc_lookup_api::config::Config;
use rnc_lookup_api::db::Database;
use rnc_lookup_api::importer::BulkImporter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;
    tracing::info!("Connected to database. Starting registry import...");

    let importer = BulkImporter::from_config(Arc::new(PgCacheStore::new(db.pool.clone())), &config)?;

    let started = std::time::Instant::now();
    let result = match std::env::args().nth(1).map(PathBuf::from) {
        Some(archive) => {
            tracing::info!("Importing local archive {}", archive.display());
            importer.import_archive(&archive).await
        }
        None => {
            tracing::info!("Downloading registry from {}", config.registry_archive_url);
            importer.run().await
        }
    };

    match result {
        Ok(report) => {
            tracing::info!(
                "Import finished in {:.1}s: {} records committed, {} rows skipped",
                started.elapsed().as_secs_f64(),
                report.committed,
                report.skipped
            );
            Ok(())
        }
        Err(failure) => {
            tracing::error!("{}", failure);
            Err(failure.into())
        }
    }
}
