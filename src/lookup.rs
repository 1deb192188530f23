//! Lookup-or-fetch flow for a single identifier.
//!
//! ```text
//! sanitize -> cache (fresh hit? return) -> DGII form -> parse
//!          -> success: persist + return
//!          -> not registered: 404, nothing stored
//!          -> banner / empty page / network: 503, nothing stored
//! ```
//!
//! Every terminal outcome except input validation is reported to the
//! metrics recorder exactly once.

use chrono::{Duration, Utc};
use moka::future::Cache;
use std::sync::Arc;

use crate::cache_store::{is_fresh, CacheStore};
use crate::errors::AppError;
use crate::form_client::TaxpayerSource;
use crate::metrics::MetricsRecorder;
use crate::models::{LookupOutcome, TaxpayerProfile};
use crate::normalize::sanitize_identifier;
use crate::parser::parse_result_page;

pub struct LookupService {
    cache: Arc<dyn CacheStore>,
    source: Arc<dyn TaxpayerSource>,
    metrics: Arc<dyn MetricsRecorder>,
    ttl: Duration,
    /// Present when concurrent misses for one identifier share a fetch.
    in_flight: Option<Cache<String, TaxpayerProfile>>,
}

impl LookupService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        source: Arc<dyn TaxpayerSource>,
        metrics: Arc<dyn MetricsRecorder>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            metrics,
            ttl,
            in_flight: None,
        }
    }

    /// Coalesces concurrent misses for the same identifier into one upstream fetch.
    pub fn with_coalescing(mut self) -> Self {
        self.in_flight = Some(
            Cache::builder()
                .time_to_live(std::time::Duration::from_secs(30))
                .max_capacity(10_000)
                .build(),
        );
        self
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsRecorder> {
        &self.metrics
    }

    pub async fn lookup(&self, raw_identifier: &str) -> Result<TaxpayerProfile, AppError> {
        let identifier = sanitize_identifier(raw_identifier);
        if identifier.is_empty() {
            return Err(AppError::BadRequest(
                "Identifier must contain at least one digit".to_string(),
            ));
        }

        if let Some(profile) = self.cached_profile(&identifier).await {
            tracing::info!("Cache HIT for {}", identifier);
            self.report(LookupOutcome {
                cache_hit: true,
                error: false,
            })
            .await;
            return Ok(profile);
        }

        tracing::info!("Cache MISS for {} - querying DGII", identifier);
        let result = match &self.in_flight {
            Some(in_flight) => {
                let fetched = in_flight
                    .try_get_with(identifier.clone(), self.fetch_fresh(&identifier))
                    .await
                    .map_err(|e| (*e).clone());
                in_flight.invalidate(&identifier).await;
                fetched
            }
            None => self.fetch_fresh(&identifier).await,
        };

        self.report(LookupOutcome {
            cache_hit: false,
            error: result.is_err(),
        })
        .await;
        result
    }

    /// Fresh cached profile, flagged as cache-sourced. Read failures count as a miss.
    async fn cached_profile(&self, identifier: &str) -> Option<TaxpayerProfile> {
        match self.cache.get(identifier).await {
            Ok(Some(record)) if is_fresh(&record, Utc::now(), self.ttl) => {
                let mut profile = record.profile;
                profile.from_cache = true;
                Some(profile)
            }
            Ok(Some(record)) => {
                tracing::debug!(
                    "Cached record for {} is stale (created {})",
                    identifier,
                    record.created_at
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", identifier, e);
                None
            }
        }
    }

    /// Scrapes, classifies and, on success only, persists.
    async fn fetch_fresh(&self, identifier: &str) -> Result<TaxpayerProfile, AppError> {
        let html = self.source.fetch_result_page(identifier).await?;

        let profile = match parse_result_page(&html) {
            Ok(parsed) => parsed.into_profile(identifier),
            Err(classified) => {
                tracing::info!(
                    "DGII lookup for {} classified as {}: {}",
                    identifier,
                    classified.kind,
                    classified.message
                );
                return Err(classified.into());
            }
        };

        // The caller still gets the fresh profile if the write fails
        if let Err(e) = self.cache.upsert(identifier, &profile).await {
            tracing::error!("Failed to cache profile for {}: {}", identifier, e);
        }

        Ok(profile)
    }

    async fn report(&self, outcome: LookupOutcome) {
        if let Err(e) = self.metrics.record(outcome).await {
            tracing::warn!("Failed to record usage metrics: {}", e);
        }
    }
}
