//! Time-bounded storage of taxpayer profiles.
//!
//! Records are never deleted. Staleness is decided at read time by comparing
//! `created_at` with the configured TTL, and a stale record simply stays in
//! place until the next upsert overwrites it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::models::{CacheRecord, TaxpayerProfile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Profile codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the record for `identifier`, fresh or not.
    async fn get(&self, identifier: &str) -> Result<Option<CacheRecord>, StoreError>;

    /// Overwrites the record unconditionally and refreshes its timestamp.
    async fn upsert(&self, identifier: &str, profile: &TaxpayerProfile) -> Result<(), StoreError>;

    /// Writes a batch keyed by each profile's `identifier` atomically.
    /// Returns the number of distinct identifiers written.
    async fn upsert_batch(&self, profiles: &[TaxpayerProfile]) -> Result<u64, StoreError>;
}

/// Postgres caps a statement at 65535 bind parameters; each row binds three.
pub const MAX_ROWS_PER_STATEMENT: usize = 65535 / 3;

/// A record is fresh while its age is at most `ttl`.
pub fn is_fresh(record: &CacheRecord, now: DateTime<Utc>, ttl: Duration) -> bool {
    now.signed_duration_since(record.created_at) <= ttl
}

/// Keeps the last occurrence of every identifier, in order of that occurrence.
fn last_wins(profiles: &[TaxpayerProfile]) -> Vec<&TaxpayerProfile> {
    let mut seen = HashSet::new();
    let mut kept: Vec<&TaxpayerProfile> = profiles
        .iter()
        .rev()
        .filter(|p| seen.insert(p.identifier.as_str()))
        .collect();
    kept.reverse();
    kept
}

/// Postgres-backed cache store (`rnc_cache` table).
#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, identifier: &str) -> Result<Option<CacheRecord>, StoreError> {
        let row: Option<(serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT response_json, created_at FROM rnc_cache WHERE rnc = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        let Some((json, created_at)) = row else {
            return Ok(None);
        };

        // A row written under an older profile layout is treated as absent
        match serde_json::from_value::<TaxpayerProfile>(json) {
            Ok(profile) => Ok(Some(CacheRecord {
                identifier: identifier.to_string(),
                profile,
                created_at,
            })),
            Err(e) => {
                tracing::warn!("Cached profile for {} failed to decode: {}", identifier, e);
                Ok(None)
            }
        }
    }

    async fn upsert(&self, identifier: &str, profile: &TaxpayerProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rnc_cache (rnc, response_json, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (rnc) DO UPDATE
            SET response_json = EXCLUDED.response_json,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(identifier)
        .bind(Json(profile))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_batch(&self, profiles: &[TaxpayerProfile]) -> Result<u64, StoreError> {
        // ON CONFLICT DO UPDATE rejects a batch that touches one key twice
        let rows = last_wins(profiles);
        if rows.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO rnc_cache (rnc, response_json, created_at) ");
            builder.push_values(chunk.iter(), |mut b, profile| {
                b.push_bind(profile.identifier.clone())
                    .push_bind(Json((*profile).clone()))
                    .push_bind(now);
            });
            builder.push(
                " ON CONFLICT (rnc) DO UPDATE \
                 SET response_json = EXCLUDED.response_json, created_at = EXCLUDED.created_at",
            );
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(rows.len() as u64)
    }
}

/// In-process cache store for tests and local runs.
#[derive(Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record with an explicit timestamp.
    pub async fn insert_record(&self, record: CacheRecord) {
        self.records
            .write()
            .await
            .insert(record.identifier.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of all stored profiles keyed by identifier.
    pub async fn profiles(&self) -> HashMap<String, TaxpayerProfile> {
        self.records
            .read()
            .await
            .iter()
            .map(|(k, r)| (k.clone(), r.profile.clone()))
            .collect()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, identifier: &str) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.records.read().await.get(identifier).cloned())
    }

    async fn upsert(&self, identifier: &str, profile: &TaxpayerProfile) -> Result<(), StoreError> {
        let record = CacheRecord {
            identifier: identifier.to_string(),
            profile: profile.clone(),
            created_at: Utc::now(),
        };
        self.records
            .write()
            .await
            .insert(identifier.to_string(), record);
        Ok(())
    }

    async fn upsert_batch(&self, profiles: &[TaxpayerProfile]) -> Result<u64, StoreError> {
        let rows = last_wins(profiles);
        let now = Utc::now();
        let mut records = self.records.write().await;
        for profile in &rows {
            records.insert(
                profile.identifier.clone(),
                CacheRecord {
                    identifier: profile.identifier.clone(),
                    profile: (*profile).clone(),
                    created_at: now,
                },
            );
        }
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(created_at: DateTime<Utc>) -> CacheRecord {
        CacheRecord {
            identifier: "101".to_string(),
            profile: TaxpayerProfile::default(),
            created_at,
        }
    }

    #[test]
    fn freshness_boundary() {
        let ttl = Duration::days(7);
        let created = Utc::now();
        let eps = Duration::seconds(1);
        let record = record_at(created);

        assert!(is_fresh(&record, created + ttl - eps, ttl));
        assert!(is_fresh(&record, created + ttl, ttl));
        assert!(!is_fresh(&record, created + ttl + eps, ttl));
    }

    #[test]
    fn batch_duplicates_keep_last() {
        let mut first = TaxpayerProfile::default();
        first.identifier = "1".into();
        first.legal_name = "OLD".into();
        let mut other = TaxpayerProfile::default();
        other.identifier = "2".into();
        let mut second = first.clone();
        second.legal_name = "NEW".into();

        let batch = [first, other, second];
        let kept = last_wins(&batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].identifier, "2");
        assert_eq!(kept[1].legal_name, "NEW");
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let store = MemoryCacheStore::new();
        let mut profile = TaxpayerProfile::default();
        profile.identifier = "101".into();
        profile.legal_name = "ACME".into();

        store.upsert("101", &profile).await.unwrap();
        let once = store.profiles().await;
        store.upsert("101", &profile).await.unwrap();
        assert_eq!(store.profiles().await, once);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn statement_rows_fit_bind_limit() {
        assert!(MAX_ROWS_PER_STATEMENT * 3 <= u16::MAX as usize);
        assert!((MAX_ROWS_PER_STATEMENT + 1) * 3 > u16::MAX as usize);
    }
}
