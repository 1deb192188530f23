use chrono::Utc;
use std::env;

use rnc_lookup_api::data::cache_store::{CacheStore, PgCacheStore, MAX_ROWS_PER_STATEMENT};
use rnc_lookup_api::data::db::Database;
use rnc_lookup_api::data::metrics::{MetricsRecorder, PgMetricsRecorder};
use rnc_lookup_api::models::{LookupOutcome, TaxpayerProfile};

async fn connect() -> anyhow::Result<Database> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;
    let db = Database::new(&db_url).await?;
    db.ensure_schema().await?;
    Ok(db)
}

/// Unique 11-digit identifier so repeated runs do not collide.
fn test_identifier() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("9{:010}", nanos.rem_euclid(10_000_000_000))
}

/// Smoke test for the Postgres cache table.
/// Marked ignored to avoid touching a real database by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn cache_upsert_and_batch_smoke_test() -> anyhow::Result<()> {
    let db = connect().await?;
    let store = PgCacheStore::new(db.pool.clone());
    let id = test_identifier();

    let mut profile = TaxpayerProfile::default();
    profile.identifier = id.clone();
    profile.legal_name = "SMOKE TEST SRL".to_string();
    profile.queried_identifier = id.clone();

    store.upsert(&id, &profile).await?;
    let record = store.get(&id).await?.expect("record just written");
    assert_eq!(record.profile.legal_name, "SMOKE TEST SRL");
    let first_write = record.created_at;

    // Batch with a duplicate key: last occurrence wins, written once
    let mut renamed = profile.clone();
    renamed.legal_name = "SMOKE TEST RENAMED SRL".to_string();
    let written = store.upsert_batch(&[profile.clone(), renamed]).await?;
    assert_eq!(written, 1);

    let record = store.get(&id).await?.expect("record after batch");
    assert_eq!(record.profile.legal_name, "SMOKE TEST RENAMED SRL");
    assert!(record.created_at >= first_write);

    sqlx::query("DELETE FROM rnc_cache WHERE rnc = $1")
        .bind(&id)
        .execute(&db.pool)
        .await?;
    assert!(store.get(&id).await?.is_none());

    Ok(())
}

/// A batch larger than one statement's bind limit is split inside one transaction.
#[tokio::test]
#[ignore]
async fn oversized_batch_smoke_test() -> anyhow::Result<()> {
    let db = connect().await?;
    let store = PgCacheStore::new(db.pool.clone());
    let prefix = test_identifier();

    let profiles: Vec<TaxpayerProfile> = (0..MAX_ROWS_PER_STATEMENT + 10)
        .map(|i| {
            let mut profile = TaxpayerProfile::default();
            profile.identifier = format!("{}{:06}", prefix, i);
            profile
        })
        .collect();

    let written = store.upsert_batch(&profiles).await?;
    assert_eq!(written as usize, profiles.len());

    sqlx::query("DELETE FROM rnc_cache WHERE rnc LIKE $1")
        .bind(format!("{}%", prefix))
        .execute(&db.pool)
        .await?;

    Ok(())
}

/// Smoke test for the daily usage counters.
#[tokio::test]
#[ignore]
async fn metrics_increment_smoke_test() -> anyhow::Result<()> {
    let db = connect().await?;
    let recorder = PgMetricsRecorder::new(db.pool.clone());
    let today = Utc::now().date_naive();

    let before = recorder
        .daily_totals()
        .await?
        .into_iter()
        .find(|d| d.date == today);

    recorder
        .record(LookupOutcome {
            cache_hit: false,
            error: true,
        })
        .await?;

    let after = recorder
        .daily_totals()
        .await?
        .into_iter()
        .find(|d| d.date == today)
        .expect("row for today");

    let (total, misses, errors) = before
        .map(|d| (d.total_requests, d.cache_misses, d.errors))
        .unwrap_or_default();
    assert!(after.total_requests > total);
    assert!(after.cache_misses > misses);
    assert!(after.errors > errors);

    Ok(())
}
