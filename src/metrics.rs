use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::cache_store::StoreError;
use crate::models::{DailyUsageMetrics, LookupOutcome};

/// Day-bucketed lookup counters.
#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record(&self, outcome: LookupOutcome) -> Result<(), StoreError>;

    /// All days, most recent first.
    async fn daily_totals(&self) -> Result<Vec<DailyUsageMetrics>, StoreError>;
}

fn increments(outcome: LookupOutcome) -> (i64, i64, i64) {
    let hit = i64::from(outcome.cache_hit);
    (hit, 1 - hit, i64::from(outcome.error))
}

#[derive(Clone)]
pub struct PgMetricsRecorder {
    pool: PgPool,
}

impl PgMetricsRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsRecorder for PgMetricsRecorder {
    async fn record(&self, outcome: LookupOutcome) -> Result<(), StoreError> {
        let now = Utc::now();
        let (hits, misses, errors) = increments(outcome);

        // Single statement: day-row creation and increment cannot interleave
        sqlx::query(
            r#"
            INSERT INTO usage_metrics
                (date, total_requests, cache_hits, cache_misses, errors, created_at, updated_at)
            VALUES ($1, 1, $2, $3, $4, $5, $5)
            ON CONFLICT (date) DO UPDATE SET
                total_requests = usage_metrics.total_requests + 1,
                cache_hits = usage_metrics.cache_hits + EXCLUDED.cache_hits,
                cache_misses = usage_metrics.cache_misses + EXCLUDED.cache_misses,
                errors = usage_metrics.errors + EXCLUDED.errors,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(now.date_naive())
        .bind(hits)
        .bind(misses)
        .bind(errors)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn daily_totals(&self) -> Result<Vec<DailyUsageMetrics>, StoreError> {
        let rows = sqlx::query_as::<_, DailyUsageMetrics>(
            r#"
            SELECT date, total_requests, cache_hits, cache_misses, errors
            FROM usage_metrics
            ORDER BY date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// In-process recorder for tests and local runs.
#[derive(Default)]
pub struct MemoryMetricsRecorder {
    days: Mutex<BTreeMap<NaiveDate, DailyUsageMetrics>>,
}

impl MemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_on(&self, date: NaiveDate, outcome: LookupOutcome) {
        let (hits, misses, errors) = increments(outcome);
        let mut days = self.days.lock().await;
        let row = days.entry(date).or_insert_with(|| DailyUsageMetrics {
            date,
            total_requests: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
        });
        row.total_requests += 1;
        row.cache_hits += hits;
        row.cache_misses += misses;
        row.errors += errors;
    }
}

#[async_trait]
impl MetricsRecorder for MemoryMetricsRecorder {
    async fn record(&self, outcome: LookupOutcome) -> Result<(), StoreError> {
        self.record_on(Utc::now().date_naive(), outcome).await;
        Ok(())
    }

    async fn daily_totals(&self) -> Result<Vec<DailyUsageMetrics>, StoreError> {
        Ok(self.days.lock().await.values().rev().cloned().collect())
    }
}
