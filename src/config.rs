use serde::Deserialize;
use std::time::Duration;

use crate::cache_store::MAX_ROWS_PER_STATEMENT;

/// Upstream DGII page that renders the RNC/Cédula search form.
pub const DEFAULT_LOOKUP_URL: &str =
    "https://dgii.gov.do/app/WebApps/ConsultasWeb2/ConsultasWeb/consultas/rnc.aspx";

/// Published taxpayer registry archive.
pub const DEFAULT_REGISTRY_ARCHIVE_URL: &str =
    "https://dgii.gov.do/app/WebApps/Consultas/RNC/RNC_CONTRIBUYENTES.zip";

/// Upper bound for `CACHE_TTL_HOURS` (one hundred years).
pub const MAX_CACHE_TTL_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub lookup_url: String,
    pub cache_ttl_hours: u64,
    pub registry_archive_url: String,
    pub import_batch_size: usize,
    pub download_attempts: u32,
    pub coalesce_lookups: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            lookup_url: http_url_var("DGII_LOOKUP_URL", DEFAULT_LOOKUP_URL)?,
            cache_ttl_hours: bounded_var("CACHE_TTL_HOURS", 168, MAX_CACHE_TTL_HOURS)?,
            registry_archive_url: http_url_var(
                "REGISTRY_ARCHIVE_URL",
                DEFAULT_REGISTRY_ARCHIVE_URL,
            )?,
            import_batch_size: bounded_var("IMPORT_BATCH_SIZE", 1000, MAX_ROWS_PER_STATEMENT)?,
            download_attempts: positive_var("DOWNLOAD_ATTEMPTS", 5)?,
            coalesce_lookups: std::env::var("COALESCE_LOOKUPS")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("DGII lookup URL: {}", config.lookup_url);
        tracing::debug!("Registry archive URL: {}", config.registry_archive_url);
        tracing::debug!("Cache TTL: {}h", config.cache_ttl_hours);
        tracing::debug!("Server Port: {}", config.port);
        if config.coalesce_lookups {
            tracing::info!("Concurrent lookup coalescing enabled");
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours.min(MAX_CACHE_TTL_HOURS) as i64)
    }

    /// Per-request timeout toward the DGII lookup page.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}

fn http_url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let raw = std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string());

    let parsed = url::Url::parse(&raw)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(raw)
}

fn bounded_var<T>(name: &str, default: T, max: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let value = positive_var(name, default)?;
    if value > max {
        anyhow::bail!("{} must be at most {}", name, max);
    }
    Ok(value)
}

fn positive_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    let value = match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{} must be a positive number", name))?,
        _ => default,
    };
    if value <= T::default() {
        anyhow::bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_falls_back_to_default_when_unset() {
        let url = http_url_var("RNC_TEST_UNSET_URL", DEFAULT_LOOKUP_URL).unwrap();
        assert_eq!(url, DEFAULT_LOOKUP_URL);
    }

    #[test]
    fn non_http_url_is_rejected() {
        std::env::set_var("RNC_TEST_FTP_URL", "ftp://dgii.gov.do/rnc.zip");
        assert!(http_url_var("RNC_TEST_FTP_URL", DEFAULT_REGISTRY_ARCHIVE_URL).is_err());
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        std::env::set_var("RNC_TEST_ZERO_BATCH", "0");
        assert!(positive_var::<usize>("RNC_TEST_ZERO_BATCH", 1000).is_err());

        std::env::set_var("RNC_TEST_BAD_TTL", "a week");
        assert!(positive_var::<u64>("RNC_TEST_BAD_TTL", 168).is_err());

        std::env::set_var("RNC_TEST_GOOD_ATTEMPTS", " 3 ");
        assert_eq!(positive_var::<u32>("RNC_TEST_GOOD_ATTEMPTS", 5).unwrap(), 3);
        assert_eq!(positive_var::<u32>("RNC_TEST_UNSET_ATTEMPTS", 5).unwrap(), 5);
    }

    #[test]
    fn oversized_batch_and_ttl_are_rejected() {
        std::env::set_var("RNC_TEST_HUGE_BATCH", "50000");
        assert!(bounded_var::<usize>("RNC_TEST_HUGE_BATCH", 1000, MAX_ROWS_PER_STATEMENT).is_err());

        std::env::set_var("RNC_TEST_MAX_BATCH", MAX_ROWS_PER_STATEMENT.to_string());
        assert_eq!(
            bounded_var::<usize>("RNC_TEST_MAX_BATCH", 1000, MAX_ROWS_PER_STATEMENT).unwrap(),
            MAX_ROWS_PER_STATEMENT
        );

        std::env::set_var("RNC_TEST_HUGE_TTL", u64::MAX.to_string());
        assert!(bounded_var::<u64>("RNC_TEST_HUGE_TTL", 168, MAX_CACHE_TTL_HOURS).is_err());
    }

    #[test]
    fn cache_ttl_never_overflows() {
        let config = Config {
            database_url: "postgres://localhost/rnc".to_string(),
            port: 3000,
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            cache_ttl_hours: u64::MAX,
            registry_archive_url: DEFAULT_REGISTRY_ARCHIVE_URL.to_string(),
            import_batch_size: 1000,
            download_attempts: 5,
            coalesce_lookups: false,
        };
        assert_eq!(
            config.cache_ttl(),
            chrono::Duration::hours(MAX_CACHE_TTL_HOURS as i64)
        );
    }
}
